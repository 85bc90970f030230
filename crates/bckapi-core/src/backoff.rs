//! Interval policy for repeating operations.

use std::time::Duration;

/// Reaction to the first failure of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorInterval {
    /// Failures are ignored and the steady interval is kept.
    #[default]
    Ignore,
    /// Stop the chain on failure.
    Cancel,
    /// Retry after this interval, widened by [`Ceiling`] and [`Step`].
    After(Duration),
}

/// Upper bound for the widening retry interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ceiling {
    /// Always retry at the error interval.
    #[default]
    Unset,
    /// Keep widening without limit.
    Unbounded,
    /// Widen up to this interval and stay there.
    Cap(Duration),
    /// Widen up to this interval, then give up.
    CancelAt(Duration),
}

/// Increment applied per consecutive failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
    /// `max(1ms, error) * (failures - 1)`: growth accelerates with every failure.
    #[default]
    Auto,
    Fixed(Duration),
    /// Reach the ceiling in about this many failures.
    Steps(u32),
    /// One retry at the error interval, then straight to the ceiling.
    Jump,
}

/// When to run the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextTick {
    After(Duration),
    Cancel,
}

/// Scheduling parameters of a repeating chain.
///
/// `steady` is the interval while healthy; `None` runs the operation once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepeatPolicy {
    pub initial_delay: Duration,
    pub steady: Option<Duration>,
    pub on_error: ErrorInterval,
    pub ceiling: Ceiling,
    pub step: Step,
}

impl RepeatPolicy {
    /// A single run after `delay`.
    pub fn once(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            ..Self::default()
        }
    }

    /// Runs immediately, then every `interval`.
    pub fn every(interval: Duration) -> Self {
        Self {
            steady: Some(interval),
            ..Self::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_error_interval(mut self, on_error: ErrorInterval) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn with_ceiling(mut self, ceiling: Ceiling) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.step = step;
        self
    }

    /// Interval before the tick following one with `failures` consecutive
    /// failures recorded (`0` when the last tick succeeded).
    pub fn next_tick(&self, failures: u32) -> NextTick {
        let steady = || self.steady.map_or(NextTick::Cancel, NextTick::After);
        if failures == 0 {
            return steady();
        }
        let error = match self.on_error {
            ErrorInterval::Ignore => return steady(),
            ErrorInterval::Cancel => return NextTick::Cancel,
            ErrorInterval::After(error) => millis(error),
        };
        let repeats = u64::from(failures - 1);

        let interval = match self.ceiling {
            Ceiling::Unset => error,
            Ceiling::Unbounded => match self.step {
                Step::Auto => error.saturating_add(auto_step(error, repeats).saturating_mul(repeats)),
                Step::Fixed(step) => error.saturating_add(millis(step).saturating_mul(repeats)),
                Step::Steps(_) | Step::Jump => error,
            },
            Ceiling::Cap(ceiling) | Ceiling::CancelAt(ceiling) => {
                let ceiling = millis(ceiling);
                let cancels = matches!(self.ceiling, Ceiling::CancelAt(_));
                let step = match self.step {
                    Step::Auto => auto_step(error, repeats),
                    Step::Fixed(step) => millis(step),
                    Step::Steps(steps) => ceiling.saturating_sub(error) / u64::from(steps.max(1)),
                    Step::Jump => {
                        return match failures {
                            1 => NextTick::After(Duration::from_millis(error)),
                            2 => NextTick::After(Duration::from_millis(ceiling)),
                            _ if cancels => NextTick::Cancel,
                            _ => NextTick::After(Duration::from_millis(ceiling)),
                        };
                    }
                };
                let interval = error.saturating_add(step.saturating_mul(repeats));
                if interval <= ceiling {
                    interval
                } else if cancels {
                    return NextTick::Cancel;
                } else {
                    ceiling
                }
            }
        };
        NextTick::After(Duration::from_millis(interval))
    }
}

fn auto_step(error: u64, repeats: u64) -> u64 {
    error.max(1).saturating_mul(repeats)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
