//! Collaborator interfaces consumed by the decision engine.
//!
//! The controller owns no authoritative state: workers live behind the
//! provisioning API and backends behind the load-balancer API. Both are
//! object-safe traits returning boxed futures so the engine can hold them
//! as `Arc<dyn ...>` and tests can swap in the simulated cloud.
//!
//! Implementations report raw outcomes (`AlreadyExists`, `NotFound`);
//! idempotence is layered on top by the engine's backend synchronizer.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    BackendAddress, BackendSet, BackendSetSpec, LaunchRequest, Worker, WorkerFilter, WorkerId,
};

/// Errors reported by a collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("provider call timed out: {0}")]
    Timeout(String),
}

impl ProviderError {
    /// Whether redelivering the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_) | ProviderError::Timeout(_))
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Boxed future returned by collaborator calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = ProviderResult<T>> + Send + 'a>>;

/// Compute-provisioning collaborator.
pub trait ProvisioningApi: Send + Sync {
    /// Launch one worker. Returns its handle as soon as the request is accepted.
    fn create<'a>(&'a self, request: &'a LaunchRequest) -> ProviderFuture<'a, WorkerId>;

    /// Request deletion of a worker.
    fn delete<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, ()>;

    /// Fetch a single worker.
    fn get<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, Worker>;

    /// List workers matching `filter`, in any lifecycle state.
    fn list<'a>(&'a self, filter: &'a WorkerFilter) -> ProviderFuture<'a, Vec<Worker>>;
}

/// Load-balancer control collaborator.
pub trait LoadBalancerApi: Send + Sync {
    /// Create a backend set. Fails with `AlreadyExists` if the name is taken.
    fn create_backend_set<'a>(&'a self, spec: &'a BackendSetSpec) -> ProviderFuture<'a, BackendSet>;

    /// Fetch a backend set by name. Fails with `NotFound` if absent.
    fn get_backend_set<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, BackendSet>;

    /// Register a backend. Fails with `AlreadyExists` if already present.
    fn add_backend<'a>(
        &'a self,
        backend_set: &'a str,
        address: &'a BackendAddress,
    ) -> ProviderFuture<'a, ()>;

    /// Deregister a backend. Fails with `NotFound` if absent.
    fn remove_backend<'a>(
        &'a self,
        backend_set: &'a str,
        address: &'a BackendAddress,
    ) -> ProviderFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ProviderError::Unavailable("503".into()).is_retryable());
        assert!(ProviderError::Timeout("get".into()).is_retryable());
        assert!(!ProviderError::NotFound("w1".into()).is_retryable());
        assert!(!ProviderError::Rejected("quota".into()).is_retryable());
    }

    #[test]
    fn error_messages_carry_detail() {
        let e = ProviderError::AlreadyExists("backend-set web".into());
        assert_eq!(e.to_string(), "already exists: backend-set web");
    }

    #[test]
    fn serializes_with_kind_tag() {
        let e = ProviderError::Unavailable("503".into());
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "unavailable");
        assert_eq!(json["detail"], "503");
    }
}
