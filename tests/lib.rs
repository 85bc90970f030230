// Shared fixtures for the behavior tests
pub use bckapi_core::{
    lock, shared, ApiError, ApiErrorKind, ApiList, ApiObject, ApiService, Batch, ChainKind,
    ChainState, HttpMethod, MockBackend, MockReply, OnError, PagedListReader, ReaderConfig,
    Resource, Shared,
};
pub use std::sync::Arc;
pub use std::time::Duration;

/// Discovery document URL of the default service configuration.
pub const ROOT: &str = "http://localhost:8000/api/";

pub fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Service answering from `backend`, with the registry already loaded.
pub async fn service(backend: &Arc<MockBackend>) -> ApiService {
    let service = ApiService::builder().with_mock(Arc::clone(backend)).build();
    service
        .refresh_root()
        .await
        .expect("discovery document is mocked");
    service
}
