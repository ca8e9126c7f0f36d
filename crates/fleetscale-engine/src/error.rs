//! Engine error types.

use std::time::Duration;

use fleet_core::ProviderError;
use thiserror::Error;

/// Errors from engine building blocks. Decisions never return these
/// directly; they fold them into a [`crate::ScaleOutcome`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The provisioning collaborator could not list the fleet. Never read
    /// as an empty fleet.
    #[error("fleet inventory unavailable: {0}")]
    InventoryUnavailable(#[source] ProviderError),

    #[error("backend set {name}: {source}")]
    BackendSet {
        name: String,
        #[source]
        source: ProviderError,
    },

    #[error("guard for fleet {fleet} not acquired within {waited:?}")]
    GuardTimeout { fleet: String, waited: Duration },
}

impl EngineError {
    /// The collaborator error behind this failure, if any.
    pub fn provider_cause(&self) -> Option<&ProviderError> {
        match self {
            EngineError::InventoryUnavailable(e) => Some(e),
            EngineError::BackendSet { source, .. } => Some(source),
            EngineError::GuardTimeout { .. } => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
