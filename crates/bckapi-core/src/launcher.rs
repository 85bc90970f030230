//! Ordered launch of detached calls.

use std::future::Future;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tracing::warn;

type Job = BoxFuture<'static, ()>;

/// Single-consumer queue for detached pipeline calls.
///
/// Jobs run concurrently, but each one is first polled in the order it was
/// launched, so a burst of calls from a tight loop reaches the transport in
/// issue order.
#[derive(Debug, Clone)]
pub struct Launcher {
    jobs: mpsc::UnboundedSender<Job>,
}

impl Launcher {
    /// Starts the consumer task. Must be called inside a Tokio runtime.
    pub fn spawn() -> Self {
        let (jobs, receiver) = mpsc::unbounded_channel();
        tokio::spawn(drive(receiver));
        Self { jobs }
    }

    /// Queues `job`; it starts after every job launched before it.
    pub fn launch<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.jobs.send(Box::pin(job)).is_err() {
            warn!("launcher stopped; dropping detached call");
        }
    }
}

async fn drive(mut receiver: mpsc::UnboundedReceiver<Job>) {
    let mut in_flight = FuturesUnordered::new();
    loop {
        tokio::select! {
            biased;
            job = receiver.recv() => match job {
                Some(job) => in_flight.push(job),
                None => break,
            },
            Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
        }
    }
    while in_flight.next().await.is_some() {}
}
