use thiserror::Error;

/// Errors raised while building core domain objects
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid CIDR notation: {0}")]
    InvalidCidr(String),

    #[error("invalid tenant definition: {0}")]
    InvalidTenant(String),

    #[error("invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("configuration load failed: {0}")]
    ConfigLoad(#[from] config::ConfigError),
}
