//! REST API handlers.
//!
//! Trigger handlers run the decision on a spawned task and map its
//! outcome to a status code: Succeeded and Rejected are 200, Failed is
//! 502, PartialFailure is 500.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error};

use fleet_core::{AlarmNotification, Direction, ProviderError, ScaleTrigger, now_millis};
use fleetscale_engine::{EngineError, ScaleOutcome};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn engine_error_response(e: &EngineError) -> Response {
    let status = match e {
        EngineError::GuardTimeout { .. } => StatusCode::CONFLICT,
        EngineError::InventoryUnavailable(_) | EngineError::BackendSet { .. } => {
            StatusCode::BAD_GATEWAY
        }
    };
    error_response(&e.to_string(), status)
}

/// HTTP status for a decision outcome.
pub fn outcome_status(outcome: &ScaleOutcome) -> StatusCode {
    match outcome {
        ScaleOutcome::Succeeded { .. } | ScaleOutcome::Rejected { .. } => StatusCode::OK,
        ScaleOutcome::Failed { .. } => StatusCode::BAD_GATEWAY,
        ScaleOutcome::PartialFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn outcome_response(outcome: ScaleOutcome) -> Response {
    let status = outcome_status(&outcome);
    let error = match &outcome {
        ScaleOutcome::Failed { reason, .. } => Some(format!("scale decision failed: {reason}")),
        ScaleOutcome::PartialFailure { kind, .. } => {
            Some(format!("fleet and backend set diverged: {kind}"))
        }
        _ => None,
    };
    (
        status,
        Json(ApiResponse {
            success: error.is_none(),
            data: Some(outcome),
            error,
        }),
    )
        .into_response()
}

async fn decide(state: &ApiState, trigger: ScaleTrigger) -> Response {
    let engine = state.engine.clone();
    let metrics = state.metrics.clone();

    // Runs to completion even if the client disconnects.
    let task = tokio::spawn(async move {
        let outcome = engine.handle(&trigger).await;
        metrics.record(trigger.direction, &outcome);
        outcome
    });

    match task.await {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => {
            error!(error = %e, "decision task panicked");
            error_response("decision task failed", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// ── Triggers ───────────────────────────────────────────────────

/// POST /api/v1/triggers
pub async fn deliver_trigger(
    State(state): State<ApiState>,
    Json(mut trigger): Json<ScaleTrigger>,
) -> Response {
    if trigger.timestamp == 0 {
        trigger.timestamp = now_millis();
    }
    decide(&state, trigger).await
}

/// Optional body for the direction-in-path trigger routes.
#[derive(Debug, Default, Deserialize)]
pub struct ReasonBody {
    #[serde(default)]
    pub reason: Option<String>,
}

async fn trigger_direction(state: &ApiState, direction: Direction, body: &[u8]) -> Response {
    let reason = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<ReasonBody>(body) {
            Ok(b) => b.reason,
            Err(e) => {
                return error_response(&format!("invalid body: {e}"), StatusCode::BAD_REQUEST);
            }
        }
    };
    let trigger = ScaleTrigger::new(direction, reason.unwrap_or_else(|| "manual".to_string()));
    decide(state, trigger).await
}

/// POST /api/v1/triggers/up
pub async fn trigger_up(State(state): State<ApiState>, body: Bytes) -> Response {
    trigger_direction(&state, Direction::Up, &body).await
}

/// POST /api/v1/triggers/down
pub async fn trigger_down(State(state): State<ApiState>, body: Bytes) -> Response {
    trigger_direction(&state, Direction::Down, &body).await
}

// ── Alarms ─────────────────────────────────────────────────────

/// POST /api/v1/alarms
pub async fn deliver_alarm(State(state): State<ApiState>, body: Bytes) -> Response {
    let notification = match AlarmNotification::parse(&body) {
        Ok(n) => n,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    };

    let transition = notification.transition;
    match notification.into_trigger() {
        Some(trigger) => match &state.queue {
            Some(queue) => enqueue(queue, trigger).await,
            None => decide(&state, trigger).await,
        },
        None => {
            debug!(?transition, "alarm carries no scaling intent");
            ApiResponse::ok(serde_json::json!({
                "transition": transition,
                "action": "ignored",
            }))
            .into_response()
        }
    }
}

async fn enqueue(queue: &mpsc::Sender<ScaleTrigger>, trigger: ScaleTrigger) -> Response {
    let direction = trigger.direction;
    match queue.send(trigger).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(serde_json::json!({
                "direction": direction,
                "action": "queued",
            })),
        )
            .into_response(),
        Err(_) => error_response("trigger dispatcher stopped", StatusCode::SERVICE_UNAVAILABLE),
    }
}

// ── Status ─────────────────────────────────────────────────────

/// GET /api/v1/fleet
pub async fn get_fleet(State(state): State<ApiState>) -> Response {
    match state.engine.fleet_status().await {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

/// GET /api/v1/backends
pub async fn get_backends(State(state): State<ApiState>) -> Response {
    let name = &state.engine.settings().backend_set.name;
    match state.engine.backends().get(name).await {
        Ok(set) => ApiResponse::ok(set).into_response(),
        Err(ProviderError::NotFound(_)) => {
            error_response("backend set not found", StatusCode::NOT_FOUND)
        }
        Err(e) => error_response(&e.to_string(), StatusCode::BAD_GATEWAY),
    }
}

/// POST /api/v1/reconcile
pub async fn reconcile(State(state): State<ApiState>) -> Response {
    let reconciler = state.reconciler.clone();
    let metrics = state.metrics.clone();

    let task = tokio::spawn(async move {
        let result = reconciler.sweep().await;
        match &result {
            Ok(stats) => metrics.record_reconcile(stats),
            Err(_) => metrics.record_reconcile_error(),
        }
        result
    });

    match task.await {
        Ok(Ok(stats)) => ApiResponse::ok(stats).into_response(),
        Ok(Err(e)) => engine_error_response(&e),
        Err(e) => {
            error!(error = %e, "reconcile task panicked");
            error_response("reconcile task failed", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let fleet_size = state
        .engine
        .inventory()
        .list_fleet()
        .await
        .ok()
        .map(|workers| workers.len());

    let body = fleetscale_metrics::render_prometheus(
        state.engine.fleet_id(),
        &state.metrics.snapshot(),
        fleet_size,
    );
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
