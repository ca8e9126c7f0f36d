//! Controller regression tests.
//!
//! Drives the assembled controller (simulated cloud, engine, dispatcher,
//! metrics, REST API) the way `fleetd run` wires it, through HTTP
//! requests against the router.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::sync::watch;
use tower::ServiceExt;

use fleet_core::{FleetConfig, WorkerState};
use fleetscale_api::{ApiState, build_router};
use fleetscale_engine::{ScaleEngine, TriggerDispatcher};
use fleetscale_metrics::DecisionMetrics;
use fleetscale_sim::{SimCloud, SimTiming};

const CONFIG: &str = r#"
[fleet]
name = "shop"
name_prefix = "shop-instance"
min_instances = 1
max_instances = 3

[backend_set]
name = "shop-backend-set"

[timeouts]
provision_ready = "2s"
backend_drain = "5ms"
guard_acquire = "500ms"
deprovision = "200ms"
poll_interval = "5ms"
"#;

fn test_cloud() -> SimCloud {
    SimCloud::open_in_memory().unwrap().with_timing(SimTiming {
        boot_delay: Duration::from_millis(20),
        teardown_delay: Duration::from_millis(10),
        call_latency: Duration::ZERO,
    })
}

fn test_engine(cloud: &SimCloud) -> ScaleEngine {
    let settings = FleetConfig::from_toml_str(CONFIG).unwrap().settings().unwrap();
    ScaleEngine::new(settings, Arc::new(cloud.clone()), Arc::new(cloud.clone()))
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text_body(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn healthz_responds() {
    let cloud = test_cloud();
    let router = build_router(ApiState::new(test_engine(&cloud), Arc::new(DecisionMetrics::new())));

    let resp = router.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn scale_to_max_then_back_to_min() {
    let cloud = test_cloud();
    let router = build_router(ApiState::new(test_engine(&cloud), Arc::new(DecisionMetrics::new())));

    for _ in 0..3 {
        let resp = router.clone().oneshot(post("/api/v1/triggers/up")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["data"]["outcome"], "succeeded");
    }

    // Fourth scale-up hits the ceiling.
    let resp = router.clone().oneshot(post("/api/v1/triggers/up")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["data"]["outcome"], "rejected");
    assert_eq!(json["data"]["reason"], "at_capacity");

    let resp = router.clone().oneshot(get("/api/v1/backends")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["data"]["backends"].as_array().unwrap().len(), 3);

    let mut removed = Vec::new();
    for _ in 0..2 {
        let resp = router.clone().oneshot(post("/api/v1/triggers/down")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["data"]["outcome"], "succeeded");
        removed.push(json["data"]["worker"]["id"].as_str().unwrap().to_string());
    }
    // Oldest first.
    assert_eq!(removed, vec!["wkr-000001".to_string(), "wkr-000002".to_string()]);

    let resp = router.clone().oneshot(post("/api/v1/triggers/down")).await.unwrap();
    let json = json_body(resp).await;
    assert_eq!(json["data"]["reason"], "at_floor");

    let resp = router.oneshot(get("/api/v1/fleet")).await.unwrap();
    let json = json_body(resp).await;
    let workers = json["data"]["workers"].as_array().unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0]["id"], "wkr-000003");
    assert_eq!(workers[0]["registered"], true);
}

#[tokio::test]
async fn trigger_body_is_accepted() {
    let cloud = test_cloud();
    let router = build_router(ApiState::new(test_engine(&cloud), Arc::new(DecisionMetrics::new())));

    let resp = router
        .oneshot(post_json(
            "/api/v1/triggers",
            r#"{"direction":"up","reason":"memory high"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(cloud.faults().calls().creates, 1);
}

#[tokio::test]
async fn unknown_direction_is_rejected_by_extractor() {
    let cloud = test_cloud();
    let router = build_router(ApiState::new(test_engine(&cloud), Arc::new(DecisionMetrics::new())));

    let resp = router
        .oneshot(post_json("/api/v1/triggers", r#"{"direction":"sideways"}"#))
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
    assert_eq!(cloud.faults().calls(), Default::default());
}

#[tokio::test]
async fn failed_deregistration_reports_bad_gateway_and_keeps_worker() {
    let cloud = test_cloud();
    let ip = "10.0.7.1".parse().unwrap();
    let id = cloud
        .seed_worker("shop-instance-a", WorkerState::Ready, Some(ip), 1)
        .unwrap();
    cloud
        .seed_worker("shop-instance-b", WorkerState::Ready, Some("10.0.7.2".parse().unwrap()), 2)
        .unwrap();
    let router = build_router(ApiState::new(test_engine(&cloud), Arc::new(DecisionMetrics::new())));

    // Register both, then make removal fail.
    let resp = router.clone().oneshot(post("/api/v1/reconcile")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    cloud.faults().set_fail_remove_backend(true);

    let resp = router.clone().oneshot(post("/api/v1/triggers/down")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let json = json_body(resp).await;
    assert_eq!(json["data"]["reason"], "backend_removal_error");
    assert_eq!(json["data"]["worker"], id.as_str());

    assert_eq!(cloud.get_worker(&id).unwrap().state, WorkerState::Ready);
    assert_eq!(cloud.faults().calls().deletes, 0);
}

#[tokio::test]
async fn alarms_flow_through_dispatcher() {
    let cloud = test_cloud();
    let engine = test_engine(&cloud);
    let metrics = Arc::new(DecisionMetrics::new());

    let (tx, rx) = TriggerDispatcher::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = TriggerDispatcher::new(engine.clone()).with_observer(metrics.clone());
    let handle = tokio::spawn(dispatcher.run(rx, shutdown_rx));

    let router = build_router(ApiState::new(engine, metrics.clone()).with_queue(tx));
    let firing = r#"{"type":"OK_TO_FIRING","title":"shop-cpu-high",
        "alarmMetaData":[{"id":"a1","status":"FIRING","query":"CpuUtilization[1m].mean() > 70"}]}"#;

    let resp = router
        .clone()
        .oneshot(post_json("/api/v1/alarms", firing))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    // Shutdown waits for the queued decision to finish.
    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown_tx.send(true).unwrap();
    let stats = handle.await.unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.completed, 1);

    let resp = router.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = text_body(resp).await;
    assert!(text.contains(
        "fleetscale_decisions_total{fleet=\"shop\",direction=\"up\",outcome=\"succeeded\"} 1"
    ));
    assert!(text.contains("fleetscale_fleet_size{fleet=\"shop\"} 1"));
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetscale-sim.redb");

    {
        let cloud = SimCloud::open(&path).unwrap().with_timing(SimTiming::instant());
        let router =
            build_router(ApiState::new(test_engine(&cloud), Arc::new(DecisionMetrics::new())));
        let resp = router.oneshot(post("/api/v1/triggers/up")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let cloud = SimCloud::open(&path).unwrap().with_timing(SimTiming::instant());
    let router = build_router(ApiState::new(test_engine(&cloud), Arc::new(DecisionMetrics::new())));
    let resp = router.oneshot(get("/api/v1/fleet")).await.unwrap();
    let json = json_body(resp).await;
    assert_eq!(json["data"]["workers"].as_array().unwrap().len(), 1);
    assert_eq!(json["data"]["backend_set"]["backends"].as_array().unwrap().len(), 1);
}
