//! `ScaleEngine` — the two trigger entry points and shared wiring.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info_span;
use tracing::Instrument;

use fleet_core::{
    BackendSet, ControllerSettings, Direction, LoadBalancerApi, ProvisioningApi, ScaleTrigger,
    Worker,
};

use crate::backend_set::BackendSync;
use crate::bounded::{BoundedLoadBalancer, BoundedProvisioning};
use crate::error::{EngineError, EngineResult};
use crate::guard::FleetGuard;
use crate::inventory::{mark_registered, FleetInventory};
use crate::outcome::ScaleOutcome;

/// Point-in-time view of a fleet for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetStatus {
    pub fleet: String,
    pub min_instances: u32,
    pub max_instances: u32,
    /// Live workers, oldest first, with membership flags set.
    pub workers: Vec<Worker>,
    /// `None` when the backend set does not exist yet.
    pub backend_set: Option<BackendSet>,
}

/// Decision engine for one fleet. Cheap to clone; clones share the guard.
#[derive(Clone)]
pub struct ScaleEngine {
    pub(crate) settings: Arc<ControllerSettings>,
    pub(crate) provisioning: Arc<dyn ProvisioningApi>,
    pub(crate) inventory: FleetInventory,
    pub(crate) backends: BackendSync,
    pub(crate) guard: FleetGuard,
}

impl ScaleEngine {
    pub fn new(
        settings: ControllerSettings,
        provisioning: Arc<dyn ProvisioningApi>,
        load_balancer: Arc<dyn LoadBalancerApi>,
    ) -> Self {
        let limit = settings.call_timeout;
        let provisioning: Arc<dyn ProvisioningApi> =
            Arc::new(BoundedProvisioning::new(provisioning, limit));
        let load_balancer: Arc<dyn LoadBalancerApi> =
            Arc::new(BoundedLoadBalancer::new(load_balancer, limit));
        let inventory = FleetInventory::new(provisioning.clone(), settings.filter.clone());
        Self {
            settings: Arc::new(settings),
            provisioning,
            inventory,
            backends: BackendSync::new(load_balancer),
            guard: FleetGuard::new(),
        }
    }

    /// Share a lock table with other engines in the same process.
    pub fn with_guard(mut self, guard: FleetGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn fleet_id(&self) -> &str {
        &self.settings.fleet_id
    }

    pub fn inventory(&self) -> &FleetInventory {
        &self.inventory
    }

    pub fn backends(&self) -> &BackendSync {
        &self.backends
    }

    pub fn guard(&self) -> &FleetGuard {
        &self.guard
    }

    /// Route a trigger to the entry point for its direction.
    pub async fn handle(&self, trigger: &ScaleTrigger) -> ScaleOutcome {
        match trigger.direction {
            Direction::Up => self.handle_scale_up_trigger(trigger).await,
            Direction::Down => self.handle_scale_down_trigger(trigger).await,
        }
    }

    /// Add at most one worker to the fleet.
    pub async fn handle_scale_up_trigger(&self, trigger: &ScaleTrigger) -> ScaleOutcome {
        let span = info_span!("scale_up", fleet = %self.settings.fleet_id, reason = %trigger.reason);
        let outcome = self.scale_up().instrument(span).await;
        outcome.log(&self.settings.fleet_id, Direction::Up);
        outcome
    }

    /// Remove at most one worker from the fleet.
    pub async fn handle_scale_down_trigger(&self, trigger: &ScaleTrigger) -> ScaleOutcome {
        let span =
            info_span!("scale_down", fleet = %self.settings.fleet_id, reason = %trigger.reason);
        let outcome = self.scale_down().instrument(span).await;
        outcome.log(&self.settings.fleet_id, Direction::Down);
        outcome
    }

    /// Current fleet and backend set, without taking the guard.
    pub async fn fleet_status(&self) -> EngineResult<FleetStatus> {
        let mut workers = self.inventory.list_fleet().await?;
        let backend_set = match self.backends.get(&self.settings.backend_set.name).await {
            Ok(set) => Some(set),
            Err(fleet_core::ProviderError::NotFound(_)) => None,
            Err(source) => {
                return Err(EngineError::BackendSet {
                    name: self.settings.backend_set.name.clone(),
                    source,
                });
            }
        };
        if let Some(set) = &backend_set {
            mark_registered(&mut workers, set, self.settings.app_port);
        }

        Ok(FleetStatus {
            fleet: self.settings.fleet_id.clone(),
            min_instances: self.settings.min_instances,
            max_instances: self.settings.max_instances,
            workers,
            backend_set,
        })
    }
}
