//! Scale-Down Decision.
//!
//! ```text
//! guard ─► list fleet ─► eligible ≤ min? ─► pick oldest Ready ─► mark evicting ─► release guard
//!      ─► remove backend ─► drain window ─► delete ─► confirm Terminated
//! ```
//!
//! Eligible workers are Ready and not already chosen by an in-flight
//! scale-down. Only those count toward the floor, which is stricter than
//! counting every live worker and keeps concurrent scale-downs from
//! undershooting `min_instances`.

use std::collections::HashSet;

use tracing::{info, warn};

use fleet_core::{ProviderError, Worker, WorkerId, WorkerState};

use crate::engine::ScaleEngine;
use crate::outcome::{FailureReason, PartialKind, RejectReason, ScaleOutcome};
use crate::wait::wait_terminated;

impl ScaleEngine {
    pub(crate) async fn scale_down(&self) -> ScaleOutcome {
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

        let evicting = ticket.evicting();
        let eligible = eligible_for_eviction(&fleet, &evicting);
        if eligible.len() <= s.min_instances as usize {
            return ScaleOutcome::rejected(RejectReason::AtFloor, eligible.len());
        }
        // The fleet is in FIFO order, so the first eligible worker is the oldest.
        let mut victim = eligible[0].clone();
        let _mark = ticket.mark_evicting(&victim.id);
        drop(ticket);

        info!(
            worker = %victim.id,
            name = %victim.display_name,
            created_at = victim.created_at,
            remaining = eligible.len() - 1,
            "selected worker for removal"
        );

        match victim.backend_address(s.app_port) {
            Some(address) => {
                let set = &s.backend_set.name;
                if let Err(e) = self.backends.remove_backend(set, &address).await {
                    return ScaleOutcome::failed(
                        FailureReason::BackendRemovalError,
                        Some(victim.id),
                        Some(e),
                    );
                }
                self.backends
                    .drain(set, &address, s.backend_drain_timeout, s.poll_interval)
                    .await;
            }
            None => {
                warn!(worker = %victim.id, "worker has no private ip, skipping backend removal");
            }
        }
        victim.registered = false;

        match self.provisioning.delete(&victim.id).await {
            Ok(()) | Err(ProviderError::NotFound(_)) => {}
            Err(e) => {
                return ScaleOutcome::PartialFailure {
                    kind: PartialKind::Orphaned,
                    worker: victim,
                    cause: Some(e),
                };
            }
        }

        match wait_terminated(
            self.provisioning.as_ref(),
            &victim.id,
            s.deprovision_timeout,
            s.poll_interval,
        )
        .await
        {
            Ok(_) => victim.state = WorkerState::Terminated,
            Err(last) => {
                warn!(
                    worker = %victim.id,
                    state = ?last,
                    timeout = ?s.deprovision_timeout,
                    "deletion accepted but not yet confirmed"
                );
                victim.state = last.unwrap_or(WorkerState::Draining);
            }
        }

        ScaleOutcome::Succeeded { worker: victim }
    }
}

/// Ready workers not already being evicted, in fleet order.
fn eligible_for_eviction<'a>(fleet: &'a [Worker], evicting: &HashSet<WorkerId>) -> Vec<&'a Worker> {
    fleet
        .iter()
        .filter(|w| w.state == WorkerState::Ready && !evicting.contains(&w.id))
        .collect()
}
