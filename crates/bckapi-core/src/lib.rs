//! # bckapi core
//!
//! Live binding between client objects and a self-describing, paginated REST
//! backend.
//!
//! ## Overview
//!
//! - **Resource registry** discovered from the API root and kept fresh
//! - **Resource locators** that fix identity once and let filters change freely
//! - **Request pipeline** for read/write/create with absorbed or propagated failures
//! - **Adaptive scheduler** re-running calls at intervals widened by failures
//! - **Paged list reader** sweeping `next` links and broadcasting result batches
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backoff`] | Repeat intervals and failure backoff |
//! | [`config`] | Service settings and environment overlay |
//! | [`connectivity`] | Connectivity quality and request meter |
//! | [`error`] | Error taxonomy |
//! | [`http_client`] | HTTP client abstraction |
//! | [`ledger`] | Per-operation failure counters |
//! | [`locator`] | Resource identity and URLs |
//! | [`mock`] | In-memory backend |
//! | [`models`] | Typed backend resources |
//! | [`pipeline`] | Read, write and create calls |
//! | [`reader`] | Paged list reader |
//! | [`registry`] | Discovered resource paths |
//! | [`resource`] | Resource trait and generic objects |
//! | [`scheduler`] | Repeating chains |
//! | [`service`] | Service and builder |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bckapi_core::{ApiService, ReaderConfig, models::Encargo};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ApiService::builder().with_env()?.build();
//!     service.refresh_root().await?;
//!
//!     let reader = service.paged_reader::<Encargo>("encargo", ReaderConfig::default());
//!     reader.filter([("estado", 4)]);
//!     let mut batches = reader.receiver();
//!     reader.start();
//!
//!     let encargos = batches.recv().await?;
//!     println!("{} encargos", encargos.len());
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod http_client;
pub mod launcher;
pub mod ledger;
pub mod locator;
pub mod mock;
pub mod models;
pub mod pipeline;
pub mod reader;
pub mod registry;
pub mod resource;
pub mod scheduler;
pub mod service;
pub mod transport;

pub use backoff::{Ceiling, ErrorInterval, NextTick, RepeatPolicy, Step};
pub use config::ServiceConfig;
pub use connectivity::{Connectivity, RequestMeter, OFFLINE, ONLINE};
pub use error::{ApiError, ApiErrorKind, ConfigError};
pub use http_client::{HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use ledger::{ErrorLedger, FailureRecord};
pub use locator::{Identifier, LocateBy, LocatorKind, ResourceLocator};
pub use mock::{MockBackend, MockReply};
pub use pipeline::OnError;
pub use reader::{Batch, PagedListReader, ReaderConfig, Subscription, SWEEP_DONE};
pub use registry::ResourceRegistry;
pub use resource::{lock, shared, ApiList, ApiObject, JsonObject, Resource, Shared};
pub use scheduler::{ChainHandle, ChainHooks, ChainKind, ChainState, PauseGate, RunToken, TickContext, Verdict};
pub use service::{ApiService, ApiServiceBuilder, RootDocument};
pub use transport::Transport;
