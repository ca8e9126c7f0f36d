//! Decision outcomes.
//!
//! Each trigger produces exactly one `ScaleOutcome`. The variants follow
//! the controller's error taxonomy:
//!
//! - `Succeeded`: the fleet changed by one worker and the backend set
//!   agrees with it.
//! - `Rejected`: a business-rule no-op. Never retried automatically.
//! - `Failed`: a collaborator errored or a bounded wait expired. The
//!   trigger source decides whether to redeliver.
//! - `PartialFailure`: fleet and backend set diverged. Left for the
//!   reconciliation sweep, never reported as success.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use fleet_core::{Direction, ProviderError, Worker, WorkerId};

/// Why a decision was a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Fleet already at `max_instances`.
    AtCapacity,
    /// Fleet already at `min_instances`.
    AtFloor,
    /// The fleet guard was not acquired in time.
    GuardTimeout,
    /// The newest worker is younger than the cooldown window.
    CooldownActive,
    /// Another worker is still provisioning.
    ProvisioningInFlight,
}

impl RejectReason {
    pub const ALL: [RejectReason; 5] = [
        RejectReason::AtCapacity,
        RejectReason::AtFloor,
        RejectReason::GuardTimeout,
        RejectReason::CooldownActive,
        RejectReason::ProvisioningInFlight,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::AtCapacity => "at_capacity",
            RejectReason::AtFloor => "at_floor",
            RejectReason::GuardTimeout => "guard_timeout",
            RejectReason::CooldownActive => "cooldown_active",
            RejectReason::ProvisioningInFlight => "provisioning_in_flight",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a decision failed without diverging state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InventoryUnavailable,
    /// The create call itself failed. Nothing was launched.
    ProvisionError,
    /// The worker did not become Ready in time. It is left in place.
    ProvisionTimeout,
    /// The worker went to `Failed` or `Terminated` while booting.
    WorkerFailed,
    /// Deregistration failed, so the worker was kept running.
    BackendRemovalError,
}

impl FailureReason {
    pub const ALL: [FailureReason; 5] = [
        FailureReason::InventoryUnavailable,
        FailureReason::ProvisionError,
        FailureReason::ProvisionTimeout,
        FailureReason::WorkerFailed,
        FailureReason::BackendRemovalError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::InventoryUnavailable => "inventory_unavailable",
            FailureReason::ProvisionError => "provision_error",
            FailureReason::ProvisionTimeout => "provision_timeout",
            FailureReason::WorkerFailed => "worker_failed",
            FailureReason::BackendRemovalError => "backend_removal_error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How fleet and backend set diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialKind {
    /// Deregistered but still running: the delete call failed.
    Orphaned,
    /// Running and Ready but not registered as a backend.
    Unregistered,
}

impl PartialKind {
    pub const ALL: [PartialKind; 2] = [PartialKind::Orphaned, PartialKind::Unregistered];

    pub fn as_str(self) -> &'static str {
        match self {
            PartialKind::Orphaned => "orphaned",
            PartialKind::Unregistered => "unregistered",
        }
    }
}

impl fmt::Display for PartialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one scale decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScaleOutcome {
    Succeeded {
        worker: Worker,
    },
    Rejected {
        reason: RejectReason,
        fleet_size: usize,
    },
    Failed {
        reason: FailureReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker: Option<WorkerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<ProviderError>,
    },
    PartialFailure {
        kind: PartialKind,
        worker: Worker,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<ProviderError>,
    },
}

impl ScaleOutcome {
    pub(crate) fn rejected(reason: RejectReason, fleet_size: usize) -> Self {
        ScaleOutcome::Rejected { reason, fleet_size }
    }

    pub(crate) fn failed(
        reason: FailureReason,
        worker: Option<WorkerId>,
        cause: Option<ProviderError>,
    ) -> Self {
        ScaleOutcome::Failed {
            reason,
            worker,
            cause,
        }
    }

    /// Short label: `succeeded`, `rejected`, `failed` or `partial`.
    pub fn kind(&self) -> &'static str {
        match self {
            ScaleOutcome::Succeeded { .. } => "succeeded",
            ScaleOutcome::Rejected { .. } => "rejected",
            ScaleOutcome::Failed { .. } => "failed",
            ScaleOutcome::PartialFailure { .. } => "partial",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ScaleOutcome::Succeeded { .. })
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            ScaleOutcome::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// The worker this decision acted on, if it got that far.
    pub fn worker_id(&self) -> Option<&str> {
        match self {
            ScaleOutcome::Succeeded { worker } | ScaleOutcome::PartialFailure { worker, .. } => {
                Some(&worker.id)
            }
            ScaleOutcome::Failed { worker, .. } => worker.as_deref(),
            ScaleOutcome::Rejected { .. } => None,
        }
    }

    /// Emit the outcome at the level its kind calls for.
    pub fn log(&self, fleet: &str, direction: Direction) {
        match self {
            ScaleOutcome::Succeeded { worker } => {
                info!(
                    %fleet,
                    %direction,
                    worker = %worker.id,
                    name = %worker.display_name,
                    "scale decision succeeded"
                );
            }
            ScaleOutcome::Rejected { reason, fleet_size } => {
                info!(%fleet, %direction, %reason, fleet_size, "scale decision rejected");
            }
            ScaleOutcome::Failed {
                reason,
                worker,
                cause,
            } => {
                warn!(
                    %fleet,
                    %direction,
                    %reason,
                    worker = worker.as_deref().unwrap_or("-"),
                    cause = cause.as_ref().map(|c| c.to_string()).unwrap_or_default(),
                    "scale decision failed"
                );
            }
            ScaleOutcome::PartialFailure {
                kind,
                worker,
                cause,
            } => {
                error!(
                    %fleet,
                    %direction,
                    %kind,
                    worker = %worker.id,
                    cause = cause.as_ref().map(|c| c.to_string()).unwrap_or_default(),
                    "scale decision left fleet and backend set diverged"
                );
            }
        }
    }
}
