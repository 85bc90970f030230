//! Incremental reading of paginated collections.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::backoff::{Ceiling, ErrorInterval, RepeatPolicy, Step};
use crate::ledger::FailureRecord;
use crate::resource::{lock, shared, ApiList, Resource, Shared};
use crate::scheduler::{ChainHandle, ChainHooks, Interceptor, TickContext, TickHook, Verdict};
use crate::service::ApiService;

/// Page counter value meaning "the sweep just ended".
pub const SWEEP_DONE: i64 = -1;

const MIN_ERROR_INTERVAL: Duration = Duration::from_millis(100);
const MIN_ERROR_CEILING: Duration = Duration::from_secs(3600);
const CHANNEL_CAPACITY: usize = 16;

/// Items published by a reader. Batches are shared, never copied per
/// subscriber.
pub type Batch<T> = Arc<Vec<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    pub initial_delay: Duration,
    /// Restart the sweep this long after it ends. `None` reads once.
    pub sweep_refresh: Option<Duration>,
    pub page_interval: Duration,
    /// Hard cap per sweep. `None` reads every page.
    pub max_items: Option<usize>,
    /// Publish after every page instead of only at the end of a sweep.
    pub emit_partial: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            sweep_refresh: None,
            page_interval: Duration::ZERO,
            max_items: Some(1000),
            emit_partial: false,
        }
    }
}

impl ReaderConfig {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_sweep_refresh(mut self, refresh: Option<Duration>) -> Self {
        self.sweep_refresh = refresh;
        self
    }

    pub fn with_page_interval(mut self, interval: Duration) -> Self {
        self.page_interval = interval;
        self
    }

    pub fn with_max_items(mut self, max_items: Option<usize>) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_partial_results(mut self, emit_partial: bool) -> Self {
        self.emit_partial = emit_partial;
        self
    }

    fn refresh(&self) -> Option<Duration> {
        self.sweep_refresh.filter(|refresh| !refresh.is_zero())
    }

    fn policy(&self) -> RepeatPolicy {
        let ceiling = self.sweep_refresh.unwrap_or_default().max(MIN_ERROR_CEILING);
        RepeatPolicy::every(self.page_interval)
            .with_initial_delay(self.initial_delay)
            .with_error_interval(ErrorInterval::After(self.page_interval.max(MIN_ERROR_INTERVAL)))
            .with_ceiling(Ceiling::Cap(ceiling))
            .with_step(Step::Auto)
    }
}

#[derive(Debug)]
struct Sweep<T> {
    accumulator: Batch<T>,
    pages: i64,
}

/// Detachable subscriber of a reader.
#[derive(Debug, Clone)]
pub struct Subscription {
    task: AbortHandle,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Cursor over a paginated collection.
///
/// Each sweep follows `next` links from page zero, accumulating results, and
/// publishes the accumulated batch when the last page (or `max_items`) is
/// reached. With a refresh interval the sweep then starts over.
pub struct PagedListReader<T>
where
    T: Resource + Clone + Sync,
{
    service: ApiService,
    config: ReaderConfig,
    request: Shared<ApiList<T>>,
    sweep: Arc<Mutex<Sweep<T>>>,
    channel: broadcast::Sender<Batch<T>>,
    subscriptions: Mutex<Vec<Subscription>>,
    interceptor: Option<Interceptor<ApiList<T>>>,
}

impl<T> PagedListReader<T>
where
    T: Resource + Clone + Sync,
{
    pub fn new(service: ApiService, list: ApiList<T>, config: ReaderConfig) -> Self {
        let (channel, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            service,
            config,
            request: shared(list),
            sweep: Arc::new(Mutex::new(Sweep {
                accumulator: Batch::default(),
                pages: 0,
            })),
            channel,
            subscriptions: Mutex::new(Vec::new()),
            interceptor: None,
        }
    }

    /// Interceptor consulted before every page while a sweep is running.
    ///
    /// The collection request is locked while it runs: calling
    /// [`filter`](Self::filter) or [`stop`](Self::stop) from inside would
    /// deadlock.
    pub fn intercept<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(&ApiList<T>, &TickContext) -> Verdict + Send + Sync + 'static,
    {
        self.interceptor = Some(Arc::new(interceptor));
        self
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// The collection resource the reader pages through.
    pub fn request(&self) -> &Shared<ApiList<T>> {
        &self.request
    }

    /// Pages read in the current sweep, or [`SWEEP_DONE`].
    pub fn pages(&self) -> i64 {
        self.lock_sweep().pages
    }

    pub fn filter<I, K, V>(&self, filters: I) -> &Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        lock(&self.request).locator_mut().add_filter(filters);
        self
    }

    pub fn clear_filters(&self) -> &Self {
        lock(&self.request).locator_mut().clear_filters();
        self
    }

    /// Starts a sweep from page zero. A sweep already running is superseded.
    pub fn start(&self) -> ChainHandle<ApiList<T>> {
        {
            let mut sweep = self.lock_sweep();
            sweep.accumulator = Batch::default();
            sweep.pages = 0;
        }
        lock(&self.request).locator_mut().add_filter([("offset", 0)]);

        let hooks = ChainHooks::new()
            .intercept_with(self.sweep_interceptor())
            .after_tick(self.sweep_postprocess());
        self.service
            .timer_read(Arc::clone(&self.request), self.config.policy(), hooks)
    }

    /// Subscribes `handler`, then starts.
    pub fn start_with<F>(&self, handler: F) -> ChainHandle<ApiList<T>>
    where
        F: FnMut(Batch<T>) + Send + 'static,
    {
        self.subscribe(handler);
        self.start()
    }

    /// Stops the sweep and detaches every subscriber. Pages still in flight
    /// are discarded.
    pub fn stop(&self) {
        self.service.stop(&self.request);
        let subscriptions = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .expect("subscription lock is not poisoned"),
        );
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }

    /// Runs `handler` for every published batch until unsubscribed or stopped.
    pub fn subscribe<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(Batch<T>) + Send + 'static,
    {
        let mut receiver = self.channel.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(batch) => handler(batch),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "reader subscriber lagging"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        let subscription = Subscription {
            task: task.abort_handle(),
        };
        self.subscriptions
            .lock()
            .expect("subscription lock is not poisoned")
            .push(subscription.clone());
        subscription
    }

    /// Raw channel receiver, not tracked by [`stop`](Self::stop).
    pub fn receiver(&self) -> broadcast::Receiver<Batch<T>> {
        self.channel.subscribe()
    }

    fn lock_sweep(&self) -> MutexGuard<'_, Sweep<T>> {
        self.sweep.lock().expect("sweep lock is not poisoned")
    }

    fn sweep_interceptor(&self) -> Interceptor<ApiList<T>> {
        let sweep = Arc::clone(&self.sweep);
        let refresh = self.config.refresh();
        let user = self.interceptor.clone();
        Arc::new(move |list: &ApiList<T>, context: &TickContext| {
            if context.failure.is_none() {
                let mut sweep = sweep.lock().expect("sweep lock is not poisoned");
                if sweep.pages == SWEEP_DONE {
                    sweep.pages = 0;
                    return match refresh {
                        Some(refresh) => Verdict::Defer(Box::pin(async move {
                            tokio::time::sleep(refresh).await;
                            true
                        })),
                        None => Verdict::Cancel,
                    };
                }
            }
            match &user {
                Some(user) => user(list, context),
                None => Verdict::Proceed,
            }
        })
    }

    fn sweep_postprocess(&self) -> TickHook<ApiList<T>> {
        let sweep = Arc::clone(&self.sweep);
        let channel = self.channel.clone();
        let registry = Arc::clone(self.service.registry());
        let config = self.config;
        Box::new(move |list: &mut ApiList<T>, failure: Option<FailureRecord>| {
            if failure.is_some() {
                return;
            }
            let mut sweep = sweep.lock().expect("sweep lock is not poisoned");
            sweep.pages += 1;
            let mut last = list.next.is_none();

            if let Some(results) = list.results.as_ref() {
                let accumulator = Arc::make_mut(&mut sweep.accumulator);
                match config.max_items.filter(|max| *max > 0) {
                    Some(max) => {
                        let room = max.saturating_sub(accumulator.len());
                        if room > results.len() {
                            accumulator.extend(results.iter().cloned());
                        } else {
                            accumulator.extend(results.iter().take(room).cloned());
                            last = true;
                        }
                    }
                    None => accumulator.extend(results.iter().cloned()),
                }
            }

            if !last {
                if let Some(next) = list.next.clone() {
                    if let Err(error) = list.locator_mut().set_href(&next, &registry) {
                        warn!(%error, %next, "cannot follow next page; ending sweep");
                        last = true;
                    }
                }
            }

            if last {
                let batch = std::mem::take(&mut sweep.accumulator);
                debug!(items = batch.len(), pages = sweep.pages, "sweep complete");
                publish(&channel, batch);
                list.locator_mut().add_filter([("offset", 0)]);
                if let Some(results) = list.results.as_mut() {
                    results.clear();
                }
                sweep.pages = SWEEP_DONE;
            } else if config.emit_partial {
                publish(&channel, Arc::clone(&sweep.accumulator));
            }
        })
    }
}

impl<T> Drop for PagedListReader<T>
where
    T: Resource + Clone + Sync,
{
    fn drop(&mut self) {
        self.stop();
    }
}

fn publish<T>(channel: &broadcast::Sender<Batch<T>>, batch: Batch<T>) {
    if channel.send(batch).is_err() {
        debug!("batch published without subscribers");
    }
}

impl ApiService {
    /// Reader over the collection registered under `name`.
    pub fn paged_reader<T>(&self, name: &str, config: ReaderConfig) -> PagedListReader<T>
    where
        T: Resource + Clone + Sync,
    {
        PagedListReader::new(self.clone(), ApiList::named(name), config)
    }
}
