//! Aggregate backend health signals.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

/// Connectivity quality of a reachable backend.
pub const ONLINE: u32 = 1_000_000;
pub const OFFLINE: u32 = 0;

/// Quality counter lowered by every absorbed transport failure.
///
/// It never drops below 1 on its own: only an explicit
/// [`notify_offline`](Self::notify_offline) reports [`OFFLINE`].
#[derive(Debug)]
pub struct Connectivity {
    quality: AtomicU32,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self {
            quality: AtomicU32::new(ONLINE),
        }
    }
}

impl Connectivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quality(&self) -> u32 {
        self.quality.load(Ordering::Relaxed)
    }

    pub fn is_online(&self) -> bool {
        self.quality() != OFFLINE
    }

    pub fn record_failure(&self) -> u32 {
        let previous = self
            .quality
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |quality| {
                Some(if quality > 1 { quality - 1 } else { quality })
            })
            .unwrap_or_else(|quality| quality);
        if previous > 1 {
            previous - 1
        } else {
            previous
        }
    }

    pub fn notify_online(&self) {
        self.quality.store(ONLINE, Ordering::Relaxed);
        info!("backend connectivity restored");
    }

    pub fn notify_offline(&self) {
        self.quality.store(OFFLINE, Ordering::Relaxed);
        info!("backend connectivity lost");
    }
}

/// Pipeline calls issued during the last second.
#[derive(Debug, Clone, Default)]
pub struct RequestMeter {
    in_window: Arc<AtomicUsize>,
}

impl RequestMeter {
    const WINDOW: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn per_second(&self) -> usize {
        self.in_window.load(Ordering::Relaxed)
    }

    /// Counts one call for the next second. Must run inside a Tokio runtime.
    pub fn record(&self) {
        self.in_window.fetch_add(1, Ordering::Relaxed);
        let in_window = Arc::clone(&self.in_window);
        tokio::spawn(async move {
            tokio::time::sleep(Self::WINDOW).await;
            in_window.fetch_sub(1, Ordering::Relaxed);
        });
    }
}
