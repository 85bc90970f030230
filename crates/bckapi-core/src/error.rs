use thiserror::Error;

use crate::http_client::HttpError;

/// Fieldless classification of [`ApiError`], handy for matching in callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// No path or URL could be derived.
    UnresolvedLocation,
    /// A fixed identity was asked to move.
    IdentityConflict,
    /// An href that is not a URL.
    InvalidLocation,
    /// Network failure or non-2xx status.
    TransportFailure,
    /// Answer does not fit the resource.
    Decode,
    /// Resource cannot be turned into a body.
    Encode,
}

/// Errors raised by the resource binding layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The resource has no derivable path or URL.
    #[error("location of '{resource}' in the API is unknown (registry loaded: {registry_loaded})")]
    UnresolvedLocation {
        resource: String,
        registry_loaded: bool,
    },

    /// Attempt to change an already fixed path or identifier.
    #[error("cannot relocate '{current}' to '{requested}': {reason}")]
    IdentityConflict {
        current: String,
        requested: String,
        reason: &'static str,
    },

    #[error("invalid location '{value}': {reason}")]
    InvalidLocation { value: String, reason: String },

    #[error(transparent)]
    TransportFailure(#[from] HttpError),

    #[error("cannot decode response from '{url}': {message}")]
    Decode { url: String, message: String },

    #[error("cannot encode body for '{url}': {message}")]
    Encode { url: String, message: String },
}

impl ApiError {
    pub(crate) fn conflict(
        current: impl Into<String>,
        requested: impl Into<String>,
        reason: &'static str,
    ) -> Self {
        Self::IdentityConflict {
            current: current.into(),
            requested: requested.into(),
            reason,
        }
    }

    pub(crate) fn unresolved(resource: impl Into<String>, registry_loaded: bool) -> Self {
        Self::UnresolvedLocation {
            resource: resource.into(),
            registry_loaded,
        }
    }

    pub const fn kind(&self) -> ApiErrorKind {
        match self {
            Self::UnresolvedLocation { .. } => ApiErrorKind::UnresolvedLocation,
            Self::IdentityConflict { .. } => ApiErrorKind::IdentityConflict,
            Self::InvalidLocation { .. } => ApiErrorKind::InvalidLocation,
            Self::TransportFailure(_) => ApiErrorKind::TransportFailure,
            Self::Decode { .. } => ApiErrorKind::Decode,
            Self::Encode { .. } => ApiErrorKind::Encode,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self.kind() {
            ApiErrorKind::UnresolvedLocation => "api.unresolved_location",
            ApiErrorKind::IdentityConflict => "api.identity_conflict",
            ApiErrorKind::InvalidLocation => "api.invalid_location",
            ApiErrorKind::TransportFailure => "api.transport_failure",
            ApiErrorKind::Decode => "api.decode",
            ApiErrorKind::Encode => "api.encode",
        }
    }

    /// HTTP status of a transport failure, `0` when no response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TransportFailure(error) => Some(error.status()),
            _ => None,
        }
    }

    /// The backend refused the payload. Validation is never enforced locally,
    /// so this only ever comes back from the server.
    pub fn is_validation_refusal(&self) -> bool {
        matches!(self.status(), Some(400 | 422))
    }
}

/// Errors produced while reading configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid origin '{value}': {reason}")]
    InvalidOrigin { value: String, reason: String },

    #[error("environment variable {name} must be {expected}, got '{value}'")]
    InvalidVar {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}
