//! fleetscale-engine — the scale decision engine.
//!
//! Turns scale triggers into at most one provisioning or deprovisioning
//! action against an elastic fleet, keeping the load balancer's backend
//! set in step with the workers that are Ready.
//!
//! # Architecture
//!
//! ```text
//! ScaleTrigger ──► TriggerDispatcher ──► ScaleEngine
//!                   (task per trigger)     ├── FleetGuard      per-fleet mutex + eviction marks
//!                                          ├── FleetInventory  list(filter) → live workers, FIFO order
//!                                          ├── BackendSync     idempotent ensure / add / remove
//!                                          ├── scale up        capacity check → create → wait Ready → register
//!                                          └── scale down      floor check → pick oldest → deregister → drain → delete
//!
//! Reconciler ── periodic sweep: register Ready workers, drop stale backends
//! ```
//!
//! Both collaborators are wrapped in [`bounded`] decorators, so every
//! single call is cut off after `timeouts.call`.
//!
//! Every decision returns exactly one [`ScaleOutcome`]. Business no-ops
//! are `Rejected`, collaborator errors are `Failed` with their cause, and
//! divergent state (an orphaned or unregistered live worker) is
//! `PartialFailure`.

pub mod backend_set;
pub mod bounded;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod guard;
pub mod inventory;
pub mod outcome;
pub mod reconcile;
mod scale_down;
mod scale_up;
mod wait;

pub use backend_set::BackendSync;
pub use bounded::{BoundedLoadBalancer, BoundedProvisioning};
pub use dispatch::{DecisionObserver, DispatchStats, TriggerDispatcher};
pub use engine::{FleetStatus, ScaleEngine};
pub use error::{EngineError, EngineResult};
pub use guard::{EvictionMark, FleetGuard, GuardTicket};
pub use inventory::FleetInventory;
pub use outcome::{FailureReason, PartialKind, RejectReason, ScaleOutcome};
pub use reconcile::{ReconcileStats, Reconciler};
