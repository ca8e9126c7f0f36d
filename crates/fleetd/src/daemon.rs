//! `fleetd run` — wires the simulated cloud, engine, dispatcher,
//! reconciler and API together and runs them until Ctrl-C.
//!
//! Shutdown order: the API stops accepting requests, then the dispatcher
//! drains in-flight decisions, then the reconcile loop exits.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use fleet_core::ControllerSettings;
use fleetscale_engine::{Reconciler, ScaleEngine, TriggerDispatcher};
use fleetscale_metrics::DecisionMetrics;
use fleetscale_sim::{SimCloud, SimTiming};

/// Capacity of the trigger queue between the API and the dispatcher.
const TRIGGER_QUEUE: usize = 256;

pub struct DaemonOptions {
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub reconcile_interval: Duration,
    pub boot_delay: Duration,
    pub teardown_delay: Duration,
}

fn open_cloud(options: &DaemonOptions) -> anyhow::Result<SimCloud> {
    let cloud = match &options.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
            let path = dir.join("fleetscale-sim.redb");
            let cloud = SimCloud::open(&path)
                .with_context(|| format!("opening simulated cloud at {}", path.display()))?;
            info!(path = ?path, "simulated cloud opened");
            cloud
        }
        None => {
            info!("simulated cloud running in memory");
            SimCloud::open_in_memory()?
        }
    };

    Ok(cloud.with_timing(SimTiming {
        boot_delay: options.boot_delay,
        teardown_delay: options.teardown_delay,
        ..SimTiming::default()
    }))
}

pub async fn run(settings: ControllerSettings, options: DaemonOptions) -> anyhow::Result<()> {
    info!(
        fleet = %settings.fleet_id,
        min = settings.min_instances,
        max = settings.max_instances,
        backend_set = %settings.backend_set.name,
        "fleetscale daemon starting"
    );

    // ── Collaborators and engine ───────────────────────────────

    let cloud = Arc::new(open_cloud(&options)?);
    let engine = ScaleEngine::new(settings, cloud.clone(), cloud);
    let metrics = Arc::new(DecisionMetrics::new());

    match engine.fleet_status().await {
        Ok(status) => info!(
            workers = status.workers.len(),
            backends = status.backend_set.map(|s| s.backends.len()).unwrap_or(0),
            "initial fleet state"
        ),
        Err(e) => warn!(error = %e, "initial fleet state unavailable"),
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let (trigger_tx, trigger_rx) = TriggerDispatcher::channel(TRIGGER_QUEUE);
    let dispatcher = TriggerDispatcher::new(engine.clone()).with_observer(metrics.clone());
    let dispatch_handle = tokio::spawn(dispatcher.run(trigger_rx, shutdown_rx.clone()));

    let reconcile_handle = if options.reconcile_interval.is_zero() {
        info!("reconcile loop disabled");
        None
    } else {
        let reconciler = Reconciler::new(engine.clone());
        let metrics = metrics.clone();
        let interval = options.reconcile_interval;
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            reconciler
                .run(interval, shutdown, |result| match result {
                    Ok(stats) => metrics.record_reconcile(stats),
                    Err(_) => metrics.record_reconcile_error(),
                })
                .await;
        }))
    };

    // ── API server ─────────────────────────────────────────────

    let state = fleetscale_api::ApiState::new(engine, metrics).with_queue(trigger_tx);
    let router = fleetscale_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], options.port));

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // ── Drain ──────────────────────────────────────────────────

    match dispatch_handle.await {
        Ok(stats) => info!(
            received = stats.received,
            completed = stats.completed,
            panicked = stats.panicked,
            "dispatcher drained"
        ),
        Err(e) => error!(error = %e, "dispatcher task failed"),
    }
    if let Some(handle) = reconcile_handle {
        let _ = handle.await;
    }

    info!("fleetscale daemon stopped");
    Ok(())
}
