use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::backoff::{Ceiling, ErrorInterval, RepeatPolicy, Step};
use crate::config::ServiceConfig;
use crate::connectivity::{Connectivity, RequestMeter};
use crate::error::{ApiError, ConfigError};
use crate::http_client::{HttpAuth, HttpClient, ReqwestHttpClient};
use crate::launcher::Launcher;
use crate::ledger::ErrorLedger;
use crate::locator::ResourceLocator;
use crate::mock::MockBackend;
use crate::registry::ResourceRegistry;
use crate::resource::{shared, JsonObject, Resource, Shared};
use crate::scheduler::ChainHooks;
use crate::transport::Transport;

/// Discovery document at the API root: resource name → path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootDocument {
    #[serde(skip)]
    locator: ResourceLocator,
    #[serde(flatten)]
    pub entries: JsonObject,
}

impl RootDocument {
    pub fn at(root: impl Into<String>) -> Self {
        Self {
            locator: ResourceLocator::collection_at_path(root),
            entries: JsonObject::new(),
        }
    }
}

impl Resource for RootDocument {
    fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    fn locator_mut(&mut self) -> &mut ResourceLocator {
        &mut self.locator
    }

    fn merge_fields(&mut self, fields: &JsonObject) -> Result<(), ApiError> {
        self.entries
            .extend(fields.iter().map(|(name, value)| (name.clone(), value.clone())));
        Ok(())
    }
}

struct ServiceInner {
    config: ServiceConfig,
    transport: Transport,
    registry: Arc<ResourceRegistry>,
    ledger: ErrorLedger,
    connectivity: Connectivity,
    meter: RequestMeter,
    launcher: Launcher,
    root: Shared<RootDocument>,
}

/// Entry point of the binding layer.
///
/// Cheap to clone; every clone shares the registry, the error ledger and the
/// connectivity signals.
#[derive(Clone)]
pub struct ApiService {
    inner: Arc<ServiceInner>,
}

impl ApiService {
    pub fn builder() -> ApiServiceBuilder {
        ApiServiceBuilder::new()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.inner.registry
    }

    pub fn ledger(&self) -> &ErrorLedger {
        &self.inner.ledger
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    pub fn meter(&self) -> &RequestMeter {
        &self.inner.meter
    }

    pub(crate) fn launcher(&self) -> &Launcher {
        &self.inner.launcher
    }

    /// Fetches the discovery document once and merges it into the registry.
    pub async fn refresh_root(&self) -> Result<usize, ApiError> {
        let written = self.inner.registry.refresh(&self.inner.transport).await?;
        debug!(written, "registry refreshed");
        Ok(written)
    }

    /// Keeps the registry fresh: steady `root_refresh` interval, retrying from
    /// `root_retry` with a widening backoff while discovery fails.
    pub fn start_root_refresh(&self) {
        let config = &self.inner.config;
        let policy = RepeatPolicy::every(config.root_refresh)
            .with_error_interval(ErrorInterval::After(config.root_retry))
            .with_ceiling(Ceiling::Cap(config.root_refresh))
            .with_step(Step::Auto);
        let registry = Arc::clone(&self.inner.registry);
        let hooks = ChainHooks::new().after_tick(move |document: &mut RootDocument, failure| {
            if failure.is_none() {
                registry.merge(&document.entries);
            }
        });
        self.timer_read(Arc::clone(&self.inner.root), policy, hooks);
        info!(root = %config.api_root, "registry refresh started");
    }

    pub fn stop_root_refresh(&self) {
        self.stop(&self.inner.root);
    }
}

/// Builder for [`ApiService`].
///
/// ```rust,ignore
/// let service = ApiService::builder()
///     .with_env()?
///     .with_token("secret")
///     .build();
/// ```
#[derive(Default)]
pub struct ApiServiceBuilder {
    config: ServiceConfig,
    client: Option<Arc<dyn HttpClient>>,
}

impl ApiServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlays `BCKAPI_*` environment variables, see [`ServiceConfig`].
    pub fn with_env(mut self) -> Result<Self, ConfigError> {
        self.config = ServiceConfig::from_env()?;
        Ok(self)
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_origin(mut self, origin: Url) -> Self {
        self.config.origin = origin;
        self
    }

    pub fn with_api_root(mut self, root: impl Into<String>) -> Self {
        self.config.api_root = root.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.config.auth = auth;
        self
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.with_auth(HttpAuth::BearerToken(token.into()))
    }

    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Answers every call from `backend`; the background registry refresh is
    /// left off so tests decide when discovery happens.
    pub fn with_mock(mut self, backend: Arc<MockBackend>) -> Self {
        self.client = Some(backend);
        self.config.auto_refresh_root = false;
        self
    }

    pub fn with_root_refresh(mut self, enabled: bool) -> Self {
        self.config.auto_refresh_root = enabled;
        self
    }

    /// Assembles the service. Must be called inside a Tokio runtime.
    pub fn build(self) -> ApiService {
        let config = self.config;
        let client = self
            .client
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
        let transport = Transport::new(client, config.auth.clone(), config.request_timeout_ms);
        let registry = Arc::new(ResourceRegistry::new(
            config.origin.clone(),
            config.api_root.clone(),
        ));
        let root = shared(RootDocument::at(config.api_root.clone()));
        let auto_refresh = config.auto_refresh_root;

        let service = ApiService {
            inner: Arc::new(ServiceInner {
                config,
                transport,
                registry,
                ledger: ErrorLedger::new(),
                connectivity: Connectivity::new(),
                meter: RequestMeter::new(),
                launcher: Launcher::spawn(),
                root,
            }),
        };
        if auto_refresh {
            service.start_root_refresh();
        }
        service
    }
}
