//! Per-call time limits on the collaborators.
//!
//! [`BoundedProvisioning`] and [`BoundedLoadBalancer`] wrap a collaborator
//! and fail any single call that outlives the limit with
//! [`ProviderError::Timeout`]. The engine wraps both collaborators this
//! way, so a hung call ends its decision and releases the fleet guard.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use fleet_core::{
    BackendAddress, BackendSet, BackendSetSpec, LaunchRequest, LoadBalancerApi, ProviderError,
    ProviderFuture, ProviderResult, ProvisioningApi, Worker, WorkerFilter, WorkerId,
};

async fn bounded<T>(
    limit: Duration,
    op: &'static str,
    call: impl Future<Output = ProviderResult<T>>,
) -> ProviderResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(op, limit_ms = limit.as_millis() as u64, "collaborator call timed out");
            Err(ProviderError::Timeout(op.to_string()))
        }
    }
}

/// [`ProvisioningApi`] with a per-call time limit.
pub struct BoundedProvisioning {
    inner: Arc<dyn ProvisioningApi>,
    limit: Duration,
}

impl BoundedProvisioning {
    pub fn new(inner: Arc<dyn ProvisioningApi>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

impl ProvisioningApi for BoundedProvisioning {
    fn create<'a>(&'a self, request: &'a LaunchRequest) -> ProviderFuture<'a, WorkerId> {
        Box::pin(bounded(self.limit, "create", self.inner.create(request)))
    }

    fn delete<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(bounded(self.limit, "delete", self.inner.delete(id)))
    }

    fn get<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, Worker> {
        Box::pin(bounded(self.limit, "get", self.inner.get(id)))
    }

    fn list<'a>(&'a self, filter: &'a WorkerFilter) -> ProviderFuture<'a, Vec<Worker>> {
        Box::pin(bounded(self.limit, "list", self.inner.list(filter)))
    }
}

/// [`LoadBalancerApi`] with a per-call time limit.
pub struct BoundedLoadBalancer {
    inner: Arc<dyn LoadBalancerApi>,
    limit: Duration,
}

impl BoundedLoadBalancer {
    pub fn new(inner: Arc<dyn LoadBalancerApi>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

impl LoadBalancerApi for BoundedLoadBalancer {
    fn create_backend_set<'a>(&'a self, spec: &'a BackendSetSpec) -> ProviderFuture<'a, BackendSet> {
        Box::pin(bounded(
            self.limit,
            "create_backend_set",
            self.inner.create_backend_set(spec),
        ))
    }

    fn get_backend_set<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, BackendSet> {
        Box::pin(bounded(self.limit, "get_backend_set", self.inner.get_backend_set(name)))
    }

    fn add_backend<'a>(
        &'a self,
        backend_set: &'a str,
        address: &'a BackendAddress,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(bounded(
            self.limit,
            "add_backend",
            self.inner.add_backend(backend_set, address),
        ))
    }

    fn remove_backend<'a>(
        &'a self,
        backend_set: &'a str,
        address: &'a BackendAddress,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(bounded(
            self.limit,
            "remove_backend",
            self.inner.remove_backend(backend_set, address),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::WorkerState;
    use fleetscale_sim::{SimCloud, SimTiming};

    fn slow_cloud(latency: Duration) -> SimCloud {
        SimCloud::open_in_memory().unwrap().with_timing(SimTiming {
            call_latency: latency,
            ..SimTiming::instant()
        })
    }

    #[tokio::test]
    async fn slow_calls_fail_with_timeout() {
        let cloud = slow_cloud(Duration::from_secs(30));
        let id = cloud.seed_worker("web-1", WorkerState::Ready, None, 1).unwrap();
        let provisioning = BoundedProvisioning::new(Arc::new(cloud.clone()), Duration::from_millis(20));
        let lb = BoundedLoadBalancer::new(Arc::new(cloud), Duration::from_millis(20));

        let started = std::time::Instant::now();
        let err = provisioning.get(&id).await.unwrap_err();
        assert_eq!(err, ProviderError::Timeout("get".to_string()));
        let err = lb.get_backend_set("web").await.unwrap_err();
        assert_eq!(err, ProviderError::Timeout("get_backend_set".to_string()));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let cloud = slow_cloud(Duration::ZERO);
        let id = cloud.seed_worker("web-1", WorkerState::Ready, None, 1).unwrap();
        let provisioning = BoundedProvisioning::new(Arc::new(cloud.clone()), Duration::from_secs(5));
        let lb = BoundedLoadBalancer::new(Arc::new(cloud), Duration::from_secs(5));

        assert_eq!(provisioning.get(&id).await.unwrap().id, id);
        assert!(matches!(provisioning.delete("wkr-404").await, Err(ProviderError::NotFound(_))));
        assert!(matches!(lb.get_backend_set("web").await, Err(ProviderError::NotFound(_))));
    }
}
