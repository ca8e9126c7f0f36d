//! fleetscale-api — REST API for the fleetscale controller.
//!
//! Delivers scale triggers and alarm notifications to the decision
//! engine and exposes the fleet, its backend set, and decision counters.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/triggers` | Deliver a scale trigger |
//! | POST | `/api/v1/triggers/up` | Scale up by one worker |
//! | POST | `/api/v1/triggers/down` | Scale down by one worker |
//! | POST | `/api/v1/alarms` | Deliver an alarm notification (queued when a dispatcher is attached) |
//! | GET | `/api/v1/fleet` | Live workers with membership flags |
//! | GET | `/api/v1/backends` | Current backend set |
//! | POST | `/api/v1/reconcile` | Run one reconciliation sweep |
//! | GET | `/healthz` | Liveness |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::mpsc;

use fleet_core::ScaleTrigger;
use fleetscale_engine::{Reconciler, ScaleEngine};
use fleetscale_metrics::DecisionMetrics;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: ScaleEngine,
    pub reconciler: Reconciler,
    pub metrics: Arc<DecisionMetrics>,
    /// Trigger dispatcher queue. Alarms are enqueued and acknowledged
    /// with 202 when set, decided inline otherwise.
    pub queue: Option<mpsc::Sender<ScaleTrigger>>,
}

impl ApiState {
    pub fn new(engine: ScaleEngine, metrics: Arc<DecisionMetrics>) -> Self {
        Self {
            reconciler: Reconciler::new(engine.clone()),
            engine,
            metrics,
            queue: None,
        }
    }

    pub fn with_queue(mut self, queue: mpsc::Sender<ScaleTrigger>) -> Self {
        self.queue = Some(queue);
        self
    }
}

/// Build the complete API router (REST + health + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/triggers", post(handlers::deliver_trigger))
        .route("/triggers/up", post(handlers::trigger_up))
        .route("/triggers/down", post(handlers::trigger_down))
        .route("/alarms", post(handlers::deliver_alarm))
        .route("/fleet", get(handlers::get_fleet))
        .route("/backends", get(handlers::get_backends))
        .route("/reconcile", post(handlers::reconcile))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
