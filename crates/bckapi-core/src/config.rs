use std::env;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::http_client::HttpAuth;

/// Service settings.
///
/// # Environment Variables
///
/// | Setting | Env Var | Default |
/// |---------|---------|---------|
/// | Backend origin | `BCKAPI_ORIGIN` | `http://localhost:8000` |
/// | Discovery document path | `BCKAPI_ROOT` | `/api/` |
/// | Discovery refresh (seconds) | `BCKAPI_ROOT_UPDATE_S` | `3600` |
/// | Request timeout (ms) | `BCKAPI_TIMEOUT_MS` | `3000` |
/// | Bearer token | `BCKAPI_TOKEN` | none |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub origin: Url,
    pub api_root: String,
    pub root_refresh: Duration,
    /// First retry interval while discovery fails.
    pub root_retry: Duration,
    pub request_timeout_ms: u64,
    pub auth: HttpAuth,
    /// Keep the registry fresh with a background chain.
    pub auto_refresh_root: bool,
}

pub const DEFAULT_ORIGIN: &str = "http://localhost:8000";

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse(DEFAULT_ORIGIN).unwrap_or_else(|_| unreachable!("default origin is valid")),
            api_root: String::from("/api/"),
            root_refresh: Duration::from_secs(3600),
            root_retry: Duration::from_millis(100),
            request_timeout_ms: 3_000,
            auth: HttpAuth::None,
            auto_refresh_root: true,
        }
    }
}

impl ServiceConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(origin) = lookup("BCKAPI_ORIGIN") {
            config.origin = parse_origin(&origin)?;
        }
        if let Some(root) = lookup("BCKAPI_ROOT") {
            config.api_root = root;
        }
        if let Some(seconds) = lookup("BCKAPI_ROOT_UPDATE_S") {
            config.root_refresh =
                Duration::from_secs(parse_number("BCKAPI_ROOT_UPDATE_S", "a number of seconds", &seconds)?);
        }
        if let Some(millis) = lookup("BCKAPI_TIMEOUT_MS") {
            config.request_timeout_ms = parse_number("BCKAPI_TIMEOUT_MS", "a number of milliseconds", &millis)?;
        }
        if let Some(token) = lookup("BCKAPI_TOKEN").filter(|token| !token.trim().is_empty()) {
            config.auth = HttpAuth::BearerToken(token);
        }

        Ok(config)
    }
}

/// Parses an origin; a path, query or fragment is refused.
pub fn parse_origin(value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidOrigin {
        value: value.to_owned(),
        reason: reason.to_owned(),
    };
    let url = Url::parse(value.trim()).map_err(|error| invalid(&error.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("origin cannot carry a path, query or fragment"));
    }
    Ok(url)
}

fn parse_number(name: &'static str, expected: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidVar {
        name,
        expected,
        value: value.to_owned(),
    })
}
