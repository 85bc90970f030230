//! Behavior tests for the paged list reader.
//!
//! The backend serves `encargo` in pages of 100 linked by `next`; time is
//! paused so sweeps, retries and refreshes run on the virtual clock.

use std::sync::{Arc, Mutex};

use bckapi_core::models::Encargo;
use bckapi_core::{Batch, ChainState, HttpMethod, MockBackend, MockReply, PagedListReader, ReaderConfig};
use bckapi_tests::{ms, service, ROOT};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::TryRecvError;

const FIRST: &str = "http://localhost:8000/api/encargo/?offset=0";
const SECOND: &str = "http://localhost:8000/api/encargo/?limit=100&offset=100";
const THIRD: &str = "http://localhost:8000/api/encargo/?limit=100&offset=200";

fn page(first_id: u64, len: u64, next: Option<&str>) -> Value {
    let results: Vec<Value> = (first_id..first_id + len)
        .map(|id| json!({ "id": id, "estado": 4, "_codigo": format!("E-{id:04}") }))
        .collect();
    json!({ "count": 240, "next": next, "previous": null, "results": results })
}

/// 240 encargos over three pages: 100, 100, 40.
fn three_pages() -> MockBackend {
    MockBackend::new()
        .on_get(ROOT, json!({ "encargo": "/api/encargo/" }))
        .on_get(FIRST, page(0, 100, Some(SECOND)))
        .on_get(SECOND, page(100, 100, Some(THIRD)))
        .on_get(THIRD, page(200, 40, None))
}

async fn reader(backend: &Arc<MockBackend>, config: ReaderConfig) -> PagedListReader<Encargo> {
    service(backend).await.paged_reader::<Encargo>("encargo", config)
}

fn ids(batch: &Batch<Encargo>) -> Vec<u64> {
    batch.iter().filter_map(|encargo| encargo.id).collect()
}

// =============================================================================
// Sweeps
// =============================================================================

#[tokio::test(start_paused = true)]
async fn sweep_publishes_every_page_once_at_the_end() {
    // Given: A reader with the default configuration
    let backend = Arc::new(three_pages());
    let reader = reader(&backend, ReaderConfig::default()).await;
    let mut batches = reader.receiver();

    // When: One sweep runs to completion
    let mut handle = reader.start();
    handle.finished().await;

    // Then: A single batch holds all 240 items in page order
    let batch = batches.recv().await.expect("batch");
    assert_eq!(ids(&batch), (0..240).collect::<Vec<_>>());
    assert_eq!(batch[0].codigo.as_deref(), Some("E-0000"));
    assert!(matches!(batches.try_recv(), Err(TryRecvError::Empty)));

    // And: Each page was fetched exactly once
    for url in [FIRST, SECOND, THIRD] {
        assert_eq!(backend.request_count(HttpMethod::Get, url), 1, "{url}");
    }
}

#[tokio::test(start_paused = true)]
async fn max_items_ends_the_sweep_early() {
    // Given: A reader capped at 150 items
    let backend = Arc::new(three_pages());
    let config = ReaderConfig::default().with_max_items(Some(150));
    let reader = reader(&backend, config).await;
    let mut batches = reader.receiver();

    // When: The sweep runs
    let mut handle = reader.start();
    handle.finished().await;

    // Then: Exactly 150 items are published and the third page is never asked for
    let batch = batches.recv().await.expect("batch");
    assert_eq!(batch.len(), 150);
    assert_eq!(batch.last().and_then(|encargo| encargo.id), Some(149));
    assert_eq!(backend.request_count(HttpMethod::Get, THIRD), 0);
}

#[tokio::test(start_paused = true)]
async fn partial_results_publish_the_growing_accumulation() {
    // Given: A reader publishing after every page
    let backend = Arc::new(three_pages());
    let config = ReaderConfig::default().with_partial_results(true);
    let reader = reader(&backend, config).await;
    let mut batches = reader.receiver();

    // When: The sweep runs
    let mut handle = reader.start();
    handle.finished().await;

    // Then: Each batch extends the previous one
    let mut sizes = Vec::new();
    while let Ok(batch) = batches.try_recv() {
        sizes.push(batch.len());
    }
    assert_eq!(sizes, vec![100, 200, 240]);
}

#[tokio::test(start_paused = true)]
async fn failed_page_is_retried_without_losing_the_sweep() {
    // Given: The second page fails once
    let backend = Arc::new(three_pages());
    backend.enqueue(HttpMethod::Get, SECOND, MockReply::Status(502));
    let reader = reader(&backend, ReaderConfig::default()).await;
    let mut batches = reader.receiver();

    // When: The sweep runs
    let mut handle = reader.start();
    handle.finished().await;

    // Then: The page is asked for again and the sweep still publishes everything once
    assert_eq!(backend.request_count(HttpMethod::Get, SECOND), 2);
    let batch = batches.recv().await.expect("batch");
    assert_eq!(batch.len(), 240);
    assert!(matches!(batches.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn refresh_restarts_the_sweep_from_page_zero() {
    // Given: A single-page collection and a one-second refresh
    let backend = Arc::new(
        MockBackend::new()
            .on_get(ROOT, json!({ "encargo": "/api/encargo/" }))
            .on_get(FIRST, page(0, 40, None)),
    );
    let config = ReaderConfig::default().with_sweep_refresh(Some(ms(1_000)));
    let reader = reader(&backend, config).await;
    let mut batches = reader.receiver();

    // When: The reader runs for a while
    reader.start();
    tokio::time::sleep(ms(500)).await;

    // Then: One sweep is done and the next waits for the refresh
    assert_eq!(batches.try_recv().map(|batch| batch.len()), Ok(40));
    assert_eq!(backend.request_count(HttpMethod::Get, FIRST), 1);

    // And: After the refresh a fresh sweep publishes the page again, not appended
    tokio::time::sleep(ms(1_000)).await;
    assert_eq!(batches.try_recv().map(|batch| batch.len()), Ok(40));
    assert_eq!(backend.request_count(HttpMethod::Get, FIRST), 2);
    reader.stop();
}

#[tokio::test(start_paused = true)]
async fn empty_collection_publishes_an_empty_batch_and_ends() {
    // Given: A collection without items
    let backend = Arc::new(
        MockBackend::new()
            .on_get(ROOT, json!({ "encargo": "/api/encargo/" }))
            .on_get(FIRST, json!({ "count": 0, "next": null, "previous": null, "results": [] })),
    );
    let reader = reader(&backend, ReaderConfig::default()).await;
    let mut batches = reader.receiver();

    // When: The sweep runs
    let mut handle = reader.start();
    handle.finished().await;

    // Then: One empty batch is published and the chain is over
    let batch = batches.recv().await.expect("batch");
    assert!(batch.is_empty());
    assert!(matches!(batches.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(handle.state(), ChainState::Cancelled);
    assert_eq!(backend.request_count(HttpMethod::Get, FIRST), 1);
}

#[tokio::test(start_paused = true)]
async fn restarting_mid_sweep_supersedes_the_running_sweep() {
    // Given: A paced reader whose cursor already moved to the second page
    let restart = "http://localhost:8000/api/encargo/?limit=100&offset=0";
    let backend = Arc::new(three_pages().on_get(restart, page(0, 100, Some(SECOND))));
    let config = ReaderConfig::default().with_page_interval(ms(100));
    let reader = reader(&backend, config).await;
    let mut batches = reader.receiver();
    let first = reader.start();
    tokio::time::sleep(ms(50)).await;

    // When: The reader is started again without being stopped
    let mut second = reader.start();
    second.finished().await;

    // Then: Only the new sweep publishes, once, with every item
    let batch = batches.recv().await.expect("batch");
    assert_eq!(ids(&batch), (0..240).collect::<Vec<_>>());
    assert!(matches!(batches.try_recv(), Err(TryRecvError::Empty)));

    // And: The old chain gave up without fetching another page
    assert_eq!(first.state(), ChainState::Cancelled);
    assert_ne!(first.token(), second.token());
    for url in [FIRST, restart, SECOND, THIRD] {
        assert_eq!(backend.request_count(HttpMethod::Get, url), 1, "{url}");
    }
}

// =============================================================================
// Filters, subscribers and stopping
// =============================================================================

#[tokio::test(start_paused = true)]
async fn filters_are_sent_with_the_first_page() {
    // Given: A filtered reader with a subscriber
    let filtered = "http://localhost:8000/api/encargo/?estado=4&offset=0";
    let backend = Arc::new(three_pages().on_get(filtered, page(0, 10, None)));
    let reader = reader(&backend, ReaderConfig::default()).await;
    reader.filter([("estado", 4)]);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let subscription = reader.subscribe(move |batch: Batch<Encargo>| {
        sink.lock().expect("lock").push(batch.len());
    });

    // When: The sweep runs
    let mut handle = reader.start();
    handle.finished().await;
    tokio::time::sleep(ms(1)).await;

    // Then: The filtered page was read and delivered to the subscriber
    assert_eq!(backend.request_count(HttpMethod::Get, filtered), 1);
    assert_eq!(backend.request_count(HttpMethod::Get, FIRST), 0);
    assert_eq!(*received.lock().expect("lock"), vec![10]);

    // And: Stopping the reader detaches the subscriber
    assert!(subscription.is_active());
    reader.stop();
    tokio::time::sleep(ms(1)).await;
    assert!(!subscription.is_active());
}

#[tokio::test(start_paused = true)]
async fn stopping_mid_flight_publishes_nothing() {
    // Given: A slow backend
    let backend = Arc::new(three_pages());
    let reader = reader(&backend, ReaderConfig::default()).await;
    backend.set_latency(ms(50));
    let mut batches = reader.receiver();

    // When: The reader is stopped while the first page is in flight
    reader.start();
    tokio::time::sleep(ms(10)).await;
    reader.stop();
    tokio::time::sleep(ms(1_000)).await;

    // Then: Nothing was published and no further page was requested
    assert!(matches!(batches.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(backend.request_count(HttpMethod::Get, FIRST), 1);
    assert_eq!(backend.request_count(HttpMethod::Get, SECOND), 0);
    assert!(reader.request().lock().expect("lock").is_empty());
}
