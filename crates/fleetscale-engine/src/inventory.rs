//! Fleet Inventory Reader.
//!
//! The fleet is recomputed from the provisioning collaborator on every
//! read and never cached across decisions.

use std::sync::Arc;

use tracing::debug;

use fleet_core::{BackendSet, ProvisioningApi, Worker, WorkerFilter};

use crate::error::{EngineError, EngineResult};

/// Lists the live workers in a fleet's naming scope.
#[derive(Clone)]
pub struct FleetInventory {
    provisioning: Arc<dyn ProvisioningApi>,
    filter: WorkerFilter,
}

impl FleetInventory {
    pub fn new(provisioning: Arc<dyn ProvisioningApi>, filter: WorkerFilter) -> Self {
        Self {
            provisioning,
            filter,
        }
    }

    pub fn filter(&self) -> &WorkerFilter {
        &self.filter
    }

    /// Non-terminated workers, oldest first. Equal timestamps are ordered
    /// by id.
    ///
    /// A collaborator error is `InventoryUnavailable`, never an empty list.
    pub async fn list_fleet(&self) -> EngineResult<Vec<Worker>> {
        let workers = self
            .provisioning
            .list(&self.filter)
            .await
            .map_err(EngineError::InventoryUnavailable)?;

        let mut fleet: Vec<Worker> = workers.into_iter().filter(Worker::is_live).collect();
        sort_fifo(&mut fleet);

        debug!(
            prefix = %self.filter.name_prefix,
            workers = fleet.len(),
            "fleet listed"
        );
        Ok(fleet)
    }
}

/// Order by creation time, then id.
pub fn sort_fifo(workers: &mut [Worker]) {
    workers.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Set each worker's `registered` flag from the backend set's contents.
pub fn mark_registered(workers: &mut [Worker], set: &BackendSet, port: u16) {
    for worker in workers {
        worker.registered = worker
            .backend_address(port)
            .is_some_and(|address| set.contains(&address));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{
        BackendSetSpec, BalancingPolicy, HealthCheckSpec, HealthProtocol, LoadBalancerApi,
        WorkerState,
    };
    use fleetscale_sim::SimCloud;

    fn inventory(cloud: &SimCloud) -> FleetInventory {
        FleetInventory::new(Arc::new(cloud.clone()), WorkerFilter::new("demo-"))
    }

    #[tokio::test]
    async fn lists_live_workers_oldest_first() {
        let cloud = SimCloud::open_in_memory().unwrap();
        let newer = cloud.seed_worker("demo-b", WorkerState::Ready, None, 300).unwrap();
        let oldest = cloud.seed_worker("demo-a", WorkerState::Ready, None, 100).unwrap();
        let middle = cloud
            .seed_worker("demo-c", WorkerState::Provisioning, None, 200)
            .unwrap();
        cloud.seed_worker("demo-dead", WorkerState::Terminated, None, 50).unwrap();
        cloud.seed_worker("demo-broken", WorkerState::Failed, None, 60).unwrap();
        cloud.seed_worker("other-x", WorkerState::Ready, None, 10).unwrap();

        let fleet = inventory(&cloud).list_fleet().await.unwrap();
        let ids: Vec<&str> = fleet.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec![oldest.as_str(), middle.as_str(), newer.as_str()]);
    }

    #[tokio::test]
    async fn equal_timestamps_break_ties_by_id() {
        let cloud = SimCloud::open_in_memory().unwrap();
        let first = cloud.seed_worker("demo-x", WorkerState::Ready, None, 500).unwrap();
        let second = cloud.seed_worker("demo-y", WorkerState::Ready, None, 500).unwrap();

        let fleet = inventory(&cloud).list_fleet().await.unwrap();
        assert_eq!(fleet[0].id, first);
        assert_eq!(fleet[1].id, second);
    }

    #[tokio::test]
    async fn outage_is_not_an_empty_fleet() {
        let cloud = SimCloud::open_in_memory().unwrap();
        cloud.faults().set_provisioning_down(true);

        let err = inventory(&cloud).list_fleet().await.unwrap_err();
        assert!(matches!(err, EngineError::InventoryUnavailable(_)));
    }

    #[tokio::test]
    async fn membership_follows_backend_set() {
        let cloud = SimCloud::open_in_memory().unwrap();
        let ip = "10.0.0.5".parse().unwrap();
        cloud.seed_worker("demo-a", WorkerState::Ready, Some(ip), 1).unwrap();
        cloud.seed_worker("demo-b", WorkerState::Provisioning, None, 2).unwrap();

        let spec = BackendSetSpec {
            name: "web".to_string(),
            policy: BalancingPolicy::RoundRobin,
            health_check: HealthCheckSpec {
                protocol: HealthProtocol::Tcp,
                port: 8080,
                path: String::new(),
                interval_ms: 1_000,
                timeout_ms: 500,
                retries: 1,
                return_code: 200,
            },
        };
        LoadBalancerApi::create_backend_set(&cloud, &spec).await.unwrap();
        cloud
            .add_backend("web", &"10.0.0.5:8080".parse().unwrap())
            .unwrap();
        let set = cloud.get_backend_set("web").unwrap();

        let mut fleet = inventory(&cloud).list_fleet().await.unwrap();
        mark_registered(&mut fleet, &set, 8080);
        assert!(fleet[0].registered);
        assert!(!fleet[1].registered);
    }
}
