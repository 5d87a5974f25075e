//! Error types for defaults-daemon

use defaults_controller::{EngineError, RegistryError};
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Health server error
    #[error("Server error: {0}")]
    Server(String),

    /// Loading default definitions failed
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The reconciliation engine stopped with an error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
