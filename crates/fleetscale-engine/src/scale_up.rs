//! Scale-Up Decision.
//!
//! ```text
//! guard ─► list fleet ─► |fleet| ≥ max? ─► policy checks ─► create ─► release guard
//!      ─► wait Ready + IP ─► ensure backend set ─► add backend
//! ```
//!
//! The guard covers the capacity check and the create call, so a
//! concurrent decision always sees the new worker (as `Provisioning`)
//! before it checks capacity itself. The bounded Ready wait happens
//! outside the guard.

use std::time::Duration;

use tracing::{debug, info};

use fleet_core::{now_millis, LaunchRequest, Worker, WorkerState};

use crate::engine::ScaleEngine;
use crate::outcome::{FailureReason, PartialKind, RejectReason, ScaleOutcome};
use crate::wait::{wait_ready, ReadyWait};

impl ScaleEngine {
    pub(crate) async fn scale_up(&self) -> ScaleOutcome {
        let s = &*self.settings;

        let ticket = match self.guard.acquire(&s.fleet_id, s.guard_acquire_timeout).await {
            Ok(ticket) => ticket,
            Err(_) => return ScaleOutcome::rejected(RejectReason::GuardTimeout, 0),
        };

        let fleet = match self.inventory.list_fleet().await {
            Ok(fleet) => fleet,
            Err(e) => {
                return ScaleOutcome::failed(
                    FailureReason::InventoryUnavailable,
                    None,
                    e.provider_cause().cloned(),
                );
            }
        };

        if fleet.len() >= s.max_instances as usize {
            return ScaleOutcome::rejected(RejectReason::AtCapacity, fleet.len());
        }
        if s.single_flight_provisioning
            && fleet.iter().any(|w| w.state == WorkerState::Provisioning)
        {
            return ScaleOutcome::rejected(RejectReason::ProvisioningInFlight, fleet.len());
        }
        if in_cooldown(&fleet, s.cooldown, now_millis()) {
            return ScaleOutcome::rejected(RejectReason::CooldownActive, fleet.len());
        }

        let request = LaunchRequest {
            display_name: format!("{}-{}", s.filter.name_prefix, now_millis()),
            spec: s.worker_spec.clone(),
        };
        let id = match self.provisioning.create(&request).await {
            Ok(id) => id,
            Err(e) => return ScaleOutcome::failed(FailureReason::ProvisionError, None, Some(e)),
        };
        drop(ticket);

        info!(
            worker = %id,
            name = %request.display_name,
            shape = %request.spec.shape,
            fleet_size = fleet.len() + 1,
            "worker provisioning started"
        );

        let worker = match wait_ready(
            self.provisioning.as_ref(),
            &id,
            s.provision_ready_timeout,
            s.poll_interval,
        )
        .await
        {
            ReadyWait::Ready(worker) => worker,
            ReadyWait::Unaddressed(worker) => {
                return ScaleOutcome::PartialFailure {
                    kind: PartialKind::Unregistered,
                    worker,
                    cause: None,
                };
            }
            ReadyWait::Died(worker) => {
                return ScaleOutcome::failed(FailureReason::WorkerFailed, Some(worker.id), None);
            }
            ReadyWait::TimedOut(cause) => {
                return ScaleOutcome::failed(FailureReason::ProvisionTimeout, Some(id), cause);
            }
        };

        self.register(worker).await
    }

    async fn register(&self, mut worker: Worker) -> ScaleOutcome {
        let s = &*self.settings;
        let Some(address) = worker.backend_address(s.app_port) else {
            return ScaleOutcome::PartialFailure {
                kind: PartialKind::Unregistered,
                worker,
                cause: None,
            };
        };

        let set = match self.backends.ensure_backend_set(&s.backend_set).await {
            Ok(set) => set,
            Err(e) => {
                return ScaleOutcome::PartialFailure {
                    kind: PartialKind::Unregistered,
                    worker,
                    cause: Some(e),
                };
            }
        };
        if let Err(e) = self.backends.add_backend(&set.name, &address).await {
            return ScaleOutcome::PartialFailure {
                kind: PartialKind::Unregistered,
                worker,
                cause: Some(e),
            };
        }

        debug!(
            worker = %worker.id,
            %address,
            warmup = ?s.backend_set.health_check.warmup(),
            "backend receives traffic once health checks pass"
        );
        worker.registered = true;
        ScaleOutcome::Succeeded { worker }
    }
}

/// Whether the newest worker is younger than `cooldown`.
fn in_cooldown(fleet: &[Worker], cooldown: Duration, now: u64) -> bool {
    if cooldown.is_zero() {
        return false;
    }
    let Some(newest) = fleet.iter().map(|w| w.created_at).max() else {
        return false;
    };
    now.saturating_sub(newest) < cooldown.as_millis() as u64
}
