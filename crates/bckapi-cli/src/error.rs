use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] bckapi_core::ConfigError),

    #[error(transparent)]
    Api(#[from] bckapi_core::ApiError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Api(_) => 3,
            Self::Serialization(_) => 10,
            Self::Io(_) => 10,
        }
    }

    /// Stable code for stream error events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "cli.config",
            Self::Api(error) => error.code(),
            Self::Serialization(_) => "cli.serialization",
            Self::Io(_) => "cli.io",
        }
    }
}
