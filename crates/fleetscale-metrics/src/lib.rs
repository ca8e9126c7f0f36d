//! fleetscale-metrics — observability for scale decisions.
//!
//! Counts decision outcomes per direction, rejection and failure reasons,
//! and reconciliation results, and renders them as Prometheus text.
//!
//! # Architecture
//!
//! ```text
//! DecisionMetrics (atomics)
//!   ├── on_decision()  ← TriggerDispatcher / HTTP handlers
//!   ├── on_reconcile() ← Reconciler loop
//!   └── snapshot() → DecisionSnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod decisions;
pub mod prometheus;

pub use decisions::{DecisionMetrics, DecisionSnapshot};
pub use prometheus::render_prometheus;
