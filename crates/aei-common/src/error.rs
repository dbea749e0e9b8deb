//! Error types shared across the relay crates

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that cross crate boundaries (configuration, environment, serialization)
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

impl RelayError {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        RelayError::Config(msg.into())
    }
}

/// Read a required environment variable, failing when it is unset or blank
pub fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(RelayError::MissingEnv(name.to_string())),
    }
}

/// Read an optional environment variable and parse it, falling back to `default`
/// when unset. A value that is set but fails to parse is an error.
pub fn parse_env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| RelayError::InvalidEnv {
                name: name.to_string(),
                value: raw,
            })
        },
        _ => Ok(default),
    }
}

/// Read an optional, non-blank environment variable
pub fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
