//! Backend Set Synchronizer.
//!
//! Wraps the load-balancer collaborator, which reports raw outcomes
//! (`AlreadyExists`, `NotFound`), with idempotent operations:
//!
//! - `ensure_backend_set` is create-or-fetch. A caller that loses a
//!   creation race fetches the winner's set instead of erroring.
//! - `add_backend` treats an address already present as done.
//! - `remove_backend` treats an absent address (or absent set) as done.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use fleet_core::{
    BackendAddress, BackendSet, BackendSetSpec, LoadBalancerApi, ProviderError, ProviderResult,
};

use crate::wait::deadline_after;

/// Idempotent backend-set operations over a [`LoadBalancerApi`].
#[derive(Clone)]
pub struct BackendSync {
    lb: Arc<dyn LoadBalancerApi>,
}

impl BackendSync {
    pub fn new(lb: Arc<dyn LoadBalancerApi>) -> Self {
        Self { lb }
    }

    /// Return the named set, creating it from `spec` if absent. An
    /// existing set is returned unchanged even if its policy differs.
    pub async fn ensure_backend_set(&self, spec: &BackendSetSpec) -> ProviderResult<BackendSet> {
        match self.lb.get_backend_set(&spec.name).await {
            Ok(set) => return Ok(set),
            Err(ProviderError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        match self.lb.create_backend_set(spec).await {
            Ok(set) => {
                info!(
                    backend_set = %spec.name,
                    policy = ?spec.policy,
                    health_port = spec.health_check.port,
                    health_path = %spec.health_check.path,
                    "backend set created"
                );
                Ok(set)
            }
            Err(ProviderError::AlreadyExists(_)) => {
                debug!(backend_set = %spec.name, "backend set created concurrently, fetching");
                self.lb.get_backend_set(&spec.name).await
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch the named set without creating it.
    pub async fn get(&self, name: &str) -> ProviderResult<BackendSet> {
        self.lb.get_backend_set(name).await
    }

    /// Register `address`. Already present is success.
    pub async fn add_backend(&self, backend_set: &str, address: &BackendAddress) -> ProviderResult<()> {
        match self.lb.add_backend(backend_set, address).await {
            Ok(()) => {
                info!(%backend_set, %address, "backend registered");
                Ok(())
            }
            Err(ProviderError::AlreadyExists(_)) => {
                debug!(%backend_set, %address, "backend already registered");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Deregister `address`. Already absent is success.
    pub async fn remove_backend(
        &self,
        backend_set: &str,
        address: &BackendAddress,
    ) -> ProviderResult<()> {
        match self.lb.remove_backend(backend_set, address).await {
            Ok(()) => {
                info!(%backend_set, %address, "backend deregistered");
                Ok(())
            }
            Err(ProviderError::NotFound(_)) => {
                debug!(%backend_set, %address, "backend already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Hold for the drain window after deregistration.
    ///
    /// Polls until the address is gone from the set, then waits out the
    /// rest of `window` so in-flight connections can finish. Returns
    /// whether removal was confirmed. Never blocks past `window`.
    pub async fn drain(
        &self,
        backend_set: &str,
        address: &BackendAddress,
        window: Duration,
        poll: Duration,
    ) -> bool {
        let deadline = deadline_after(window);
        let mut confirmed = false;

        loop {
            match self.lb.get_backend_set(backend_set).await {
                Ok(set) if !set.contains(address) => {
                    confirmed = true;
                    break;
                }
                Ok(_) => {}
                Err(ProviderError::NotFound(_)) => {
                    confirmed = true;
                    break;
                }
                Err(e) => {
                    debug!(%backend_set, %address, error = %e, "drain check failed");
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(poll.min(deadline.saturating_duration_since(Instant::now()))).await;
        }

        if !confirmed {
            warn!(%backend_set, %address, ?window, "backend still listed after drain window");
        }
        tokio::time::sleep_until(deadline).await;
        confirmed
    }
}
