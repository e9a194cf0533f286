use thiserror::Error;

/// Startup configuration failures. Always fatal: nothing is spawned until
/// the configuration loads and validates.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid listen address '{address}': {reason}")]
    ListenAddress { address: String, reason: String },

    #[error("Invalid metrics path '{0}': must start with '/' and not be '/' or '/health'")]
    MetricsPath(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
