//! Error types for the simulated cloud.

use fleet_core::ProviderError;
use thiserror::Error;

/// Result type alias for simulated cloud operations.
pub type SimResult<T> = Result<T, SimError>;

/// Errors that can occur inside the simulated cloud.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

impl From<SimError> for ProviderError {
    fn from(e: SimError) -> Self {
        match e {
            SimError::NotFound(what) => ProviderError::NotFound(what),
            SimError::AlreadyExists(what) => ProviderError::AlreadyExists(what),
            other => ProviderError::Unavailable(other.to_string()),
        }
    }
}
