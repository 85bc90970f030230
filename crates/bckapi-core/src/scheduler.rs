//! Repeating read/write chains with failure-driven backoff.
//!
//! A chain is one task looping through
//! `Scheduled/Backoff -> InFlight -> Scheduled/Backoff ...` until it is
//! cancelled. Each chain stamps a [`RunToken`] on its resource; stopping the
//! resource or starting another chain of the same kind replaces the token, and
//! the old chain notices at its next checkpoint and exits quietly.

use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::backoff::{NextTick, RepeatPolicy};
use crate::error::ApiError;
use crate::ledger::{ErrorLedger, FailureRecord};
use crate::pipeline::{merge_object, Operation};
use crate::resource::{lock, shared, JsonObject, Resource, Shared};
use crate::service::ApiService;

/// Kind of repeating chain. A resource holds one slot per kind, so a read
/// chain and a write chain can run side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainKind {
    /// Repeated GET merged into the resource.
    Read,
    /// Repeated PUT whose answers land in a separate object.
    Write,
}

impl ChainKind {
    /// Prefix of the run tokens of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl Display for ChainKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque marker of one chain run: `<kind>_timer <millis> <random>`, base 36.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunToken(String);

impl RunToken {
    pub(crate) fn mint(kind: ChainKind) -> Self {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let millis = u64::try_from(millis).unwrap_or_default();
        let salt = fastrand::u64(..1 << 31);
        Self(format!("{kind}_timer {} {}", base36(millis), base36(salt)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RunToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return String::from("0");
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Observable state of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Idle,
    /// Waiting for a tick after a healthy run (or before the first one).
    Scheduled(Duration),
    InFlight,
    /// Waiting for a tick after a failure.
    Backoff(Duration),
    Cancelled,
}

/// What an interceptor sees before a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickContext {
    /// Ticks already run by this chain.
    pub tick: u64,
    pub failure: Option<FailureRecord>,
}

/// Interceptor decision for the upcoming tick.
pub enum Verdict {
    Proceed,
    /// Stop the chain.
    Cancel,
    /// Await the gate; `false` cancels, `true` runs the tick normally.
    Defer(BoxFuture<'static, bool>),
    /// Run this computation instead of the backend call for this tick.
    Substitute(BoxFuture<'static, Result<Option<Value>, ApiError>>),
}

impl Debug for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proceed => f.write_str("Proceed"),
            Self::Cancel => f.write_str("Cancel"),
            Self::Defer(_) => f.write_str("Defer(..)"),
            Self::Substitute(_) => f.write_str("Substitute(..)"),
        }
    }
}

pub type Interceptor<T> = Arc<dyn Fn(&T, &TickContext) -> Verdict + Send + Sync>;

/// Runs after every tick, healthy or not. It cannot stop the chain.
pub type TickHook<O> = Box<dyn FnMut(&mut O, Option<FailureRecord>) + Send>;

/// Optional callbacks of a chain.
pub struct ChainHooks<T, O> {
    interceptor: Option<Interceptor<T>>,
    postprocess: Option<TickHook<O>>,
}

impl<T, O> Default for ChainHooks<T, O> {
    fn default() -> Self {
        Self {
            interceptor: None,
            postprocess: None,
        }
    }
}

impl<T, O> ChainHooks<T, O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consults `interceptor` before every tick but the first.
    ///
    /// It runs with the resource locked, so it must not lock the same
    /// resource again, neither directly nor through [`ApiService::stop`].
    /// Return [`Verdict::Cancel`] to end the chain instead.
    pub fn intercept<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(&T, &TickContext) -> Verdict + Send + Sync + 'static,
    {
        self.interceptor = Some(Arc::new(interceptor));
        self
    }

    pub fn intercept_with(mut self, interceptor: Interceptor<T>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Runs `postprocess` after every tick with the chain output locked.
    ///
    /// For reads the output is the resource itself, which the hook must not
    /// lock again. A hook wanting the chain to end can raise a flag that the
    /// interceptor turns into [`Verdict::Cancel`].
    pub fn after_tick<F>(mut self, postprocess: F) -> Self
    where
        F: FnMut(&mut O, Option<FailureRecord>) + Send + 'static,
    {
        self.postprocess = Some(Box::new(postprocess));
        self
    }
}

/// Handle on a running chain.
pub struct ChainHandle<O> {
    output: Shared<O>,
    token: RunToken,
    state: watch::Receiver<ChainState>,
}

impl<O> ChainHandle<O> {
    /// Object updated by the chain: the resource itself for reads, a fresh
    /// object for writes.
    pub fn output(&self) -> &Shared<O> {
        &self.output
    }

    pub fn token(&self) -> &RunToken {
        &self.token
    }

    pub fn state(&self) -> ChainState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ChainState> {
        self.state.clone()
    }

    /// Resolves once the chain has stopped for any reason.
    pub async fn finished(&mut self) {
        // A closed channel also means the chain task is gone.
        let _ = self
            .state
            .wait_for(|state| *state == ChainState::Cancelled)
            .await;
    }
}

/// Shared switch that interceptors consult to hold ticks while a collaborator
/// is busy.
#[derive(Debug, Clone)]
pub struct PauseGate {
    paused: Arc<watch::Sender<bool>>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            paused: Arc::new(watch::Sender::new(false)),
        }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// `Proceed` while open; otherwise a gate that opens on [`resume`](Self::resume).
    pub fn hold(&self) -> Verdict {
        if !self.is_paused() {
            return Verdict::Proceed;
        }
        let mut paused = self.paused.subscribe();
        Verdict::Defer(Box::pin(async move {
            paused.wait_for(|paused| !*paused).await.is_ok()
        }))
    }
}

type Merge<O> = fn(&mut O, &Value) -> Result<(), ApiError>;

struct Chain<T, O> {
    service: ApiService,
    kind: ChainKind,
    resource: Shared<T>,
    output: Shared<O>,
    merge: Merge<O>,
    policy: RepeatPolicy,
    hooks: ChainHooks<T, O>,
    token: RunToken,
    state: watch::Sender<ChainState>,
}

impl<T, O> Chain<T, O>
where
    T: Resource,
    O: Send + 'static,
{
    fn ledger(&self) -> &ErrorLedger {
        self.service.ledger()
    }

    fn is_current(&self) -> bool {
        lock(&self.resource).locator().run_token(self.kind) == Some(&self.token)
    }

    /// Clears the resource slot if it is still ours, and our ledger entry.
    fn release(&self) {
        {
            let mut resource = lock(&self.resource);
            if resource.locator().run_token(self.kind) == Some(&self.token) {
                resource.locator_mut().set_run_token(self.kind, None);
            }
        }
        self.ledger().record_success(self.token.as_str());
        self.state.send_replace(ChainState::Cancelled);
    }

    async fn run(mut self) {
        let mut tick: u64 = 0;
        loop {
            let failure = self.ledger().get(self.token.as_str());
            let delay = if tick == 0 {
                self.policy.initial_delay
            } else {
                match self.policy.next_tick(failure.map_or(0, |record| record.count)) {
                    NextTick::After(delay) => delay,
                    NextTick::Cancel => {
                        match failure {
                            Some(record) => warn!(token = %self.token, failures = record.count, "repeating chain gave up"),
                            None => debug!(token = %self.token, "repeating chain completed"),
                        }
                        self.release();
                        return;
                    }
                }
            };
            self.state.send_replace(match failure {
                Some(_) if tick > 0 => ChainState::Backoff(delay),
                _ => ChainState::Scheduled(delay),
            });
            tokio::time::sleep(delay).await;
            if !self.is_current() {
                self.release();
                return;
            }

            let mut substitute = None;
            if tick > 0 {
                if let Some(interceptor) = self.hooks.interceptor.clone() {
                    let context = TickContext { tick, failure };
                    let verdict = {
                        let resource = lock(&self.resource);
                        interceptor(&*resource, &context)
                    };
                    match verdict {
                        Verdict::Proceed => {}
                        Verdict::Cancel => {
                            debug!(token = %self.token, "chain cancelled by interceptor");
                            self.release();
                            return;
                        }
                        Verdict::Defer(gate) => {
                            if !gate.await {
                                self.release();
                                return;
                            }
                        }
                        Verdict::Substitute(computation) => substitute = Some(computation),
                    }
                    if !self.is_current() {
                        self.release();
                        return;
                    }
                }
            }

            self.state.send_replace(ChainState::InFlight);
            let outcome = match substitute {
                Some(computation) => computation.await,
                None => {
                    let operation = match self.kind {
                        ChainKind::Read => Operation::Read,
                        ChainKind::Write => Operation::Write,
                    };
                    self.service.dispatch(operation, &self.resource).await.map(Some)
                }
            };
            let answer = match outcome {
                Ok(answer) => {
                    if answer.is_some() {
                        self.ledger().record_success(self.token.as_str());
                    }
                    answer
                }
                Err(error) => {
                    self.service.absorb(self.token.as_str(), &error);
                    None
                }
            };

            // The answer is accounted for, but a stopped chain must not touch
            // its output any more.
            if !self.is_current() {
                self.release();
                return;
            }

            {
                let mut output = lock(&self.output);
                if let Some(answer) = &answer {
                    if let Err(error) = (self.merge)(&mut *output, answer) {
                        self.service.absorb(self.token.as_str(), &error);
                    }
                }
                if let Some(postprocess) = self.hooks.postprocess.as_mut() {
                    postprocess(&mut *output, self.service.ledger().get(self.token.as_str()));
                }
            }
            tick += 1;
        }
    }
}

impl ApiService {
    /// Reads `resource` after `policy.initial_delay`, then keeps re-reading it
    /// at the policy's intervals. Answers merge into the resource itself.
    pub fn timer_read<T: Resource>(
        &self,
        resource: Shared<T>,
        policy: RepeatPolicy,
        hooks: ChainHooks<T, T>,
    ) -> ChainHandle<T> {
        let output = Arc::clone(&resource);
        self.start_chain(ChainKind::Read, resource, output, T::merge_value, policy, hooks)
    }

    /// [`timer_read`](Self::timer_read) starting right away.
    pub fn interval_read<T: Resource>(
        &self,
        resource: Shared<T>,
        policy: RepeatPolicy,
        hooks: ChainHooks<T, T>,
    ) -> ChainHandle<T> {
        self.timer_read(resource, policy.with_initial_delay(Duration::ZERO), hooks)
    }

    /// Repeated PUT of `resource`. Answers merge into a new object.
    pub fn timer_write<T: Resource>(
        &self,
        resource: Shared<T>,
        policy: RepeatPolicy,
        hooks: ChainHooks<T, JsonObject>,
    ) -> ChainHandle<JsonObject> {
        let output = shared(JsonObject::new());
        self.start_chain(ChainKind::Write, resource, output, merge_object, policy, hooks)
    }

    pub fn interval_write<T: Resource>(
        &self,
        resource: Shared<T>,
        policy: RepeatPolicy,
        hooks: ChainHooks<T, JsonObject>,
    ) -> ChainHandle<JsonObject> {
        self.timer_write(resource, policy.with_initial_delay(Duration::ZERO), hooks)
    }

    /// Ends every chain running on `resource`. In-flight calls still complete,
    /// but their answers are discarded.
    pub fn stop<T: Resource>(&self, resource: &Shared<T>) {
        let mut resource = lock(resource);
        for kind in [ChainKind::Read, ChainKind::Write] {
            if let Some(token) = resource.locator().run_token(kind) {
                self.ledger().record_success(token.as_str());
                debug!(%token, "chain stopped");
            }
            resource.locator_mut().set_run_token(kind, None);
        }
    }

    fn start_chain<T, O>(
        &self,
        kind: ChainKind,
        resource: Shared<T>,
        output: Shared<O>,
        merge: Merge<O>,
        policy: RepeatPolicy,
        hooks: ChainHooks<T, O>,
    ) -> ChainHandle<O>
    where
        T: Resource,
        O: Send + 'static,
    {
        let token = RunToken::mint(kind);
        lock(&resource)
            .locator_mut()
            .set_run_token(kind, Some(token.clone()));
        let (state, watcher) = watch::channel(ChainState::Idle);

        let chain = Chain {
            service: self.clone(),
            kind,
            resource,
            output: Arc::clone(&output),
            merge,
            policy,
            hooks,
            token: token.clone(),
            state,
        };
        debug!(%token, "chain started");
        tokio::spawn(chain.run());

        ChainHandle {
            output,
            token,
            state: watcher,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_name_their_kind_and_differ() {
        let first = RunToken::mint(ChainKind::Read);
        let second = RunToken::mint(ChainKind::Read);

        assert!(first.as_str().starts_with("read_timer "));
        assert_eq!(first.as_str().split(' ').count(), 3);
        assert_ne!(first, second);
        assert!(RunToken::mint(ChainKind::Write).as_str().starts_with("write_timer "));
    }

    #[test]
    fn base36_digits() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
    }

    #[tokio::test]
    async fn pause_gate_defers_until_resumed() {
        let gate = PauseGate::new();
        assert!(matches!(gate.hold(), Verdict::Proceed));

        gate.pause();
        let Verdict::Defer(wait) = gate.hold() else {
            panic!("paused gate must defer");
        };
        let waiter = tokio::spawn(wait);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        gate.resume();
        assert!(waiter.await.expect("gate task"));
    }
}
