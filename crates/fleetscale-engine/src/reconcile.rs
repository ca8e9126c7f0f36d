//! Reconciliation sweep.
//!
//! Converges the backend set toward `{address(w) : w Ready}` after
//! partial failures, cancelled decisions, or out-of-band changes:
//!
//! - every Ready, addressed worker that is not being evicted and is
//!   missing from the set gets registered
//! - every backend whose address matches no such worker is removed
//!
//! The sweep holds the fleet guard for its whole run, so it never
//! interleaves with a decision's read-decide step.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fleet_core::{BackendAddress, WorkerState};

use crate::engine::ScaleEngine;
use crate::error::{EngineError, EngineResult};

/// What one sweep changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    /// Ready workers added to the backend set.
    pub registered: u32,
    /// Backends removed because no Ready worker owns them.
    pub deregistered: u32,
    /// Ready workers skipped because they have no private IP yet.
    pub unaddressed: u32,
    /// Backend calls that failed. Retried on the next sweep.
    pub failed: u32,
}

impl ReconcileStats {
    pub fn changed(&self) -> bool {
        self.registered > 0 || self.deregistered > 0
    }
}

/// Periodic backend-set repair for one fleet.
#[derive(Clone)]
pub struct Reconciler {
    engine: ScaleEngine,
}

impl Reconciler {
    pub fn new(engine: ScaleEngine) -> Self {
        Self { engine }
    }

    /// Run one sweep.
    pub async fn sweep(&self) -> EngineResult<ReconcileStats> {
        let s = self.engine.settings();
        let ticket = self
            .engine
            .guard()
            .acquire(&s.fleet_id, s.guard_acquire_timeout)
            .await?;

        let fleet = self.engine.inventory().list_fleet().await?;
        let evicting = ticket.evicting();
        let set_name = &s.backend_set.name;
        let set = self
            .engine
            .backends()
            .ensure_backend_set(&s.backend_set)
            .await
            .map_err(|source| EngineError::BackendSet {
                name: set_name.clone(),
                source,
            })?;

        let mut stats = ReconcileStats::default();
        let mut desired: HashSet<BackendAddress> = HashSet::new();
        for worker in &fleet {
            if worker.state != WorkerState::Ready || evicting.contains(&worker.id) {
                continue;
            }
            match worker.backend_address(s.app_port) {
                Some(address) => {
                    desired.insert(address);
                }
                None => {
                    debug!(worker = %worker.id, "ready worker has no private ip yet");
                    stats.unaddressed += 1;
                }
            }
        }

        let mut missing: Vec<&BackendAddress> =
            desired.iter().filter(|a| !set.contains(a)).collect();
        missing.sort();
        for address in missing {
            match self.engine.backends().add_backend(set_name, address).await {
                Ok(()) => stats.registered += 1,
                Err(e) => {
                    warn!(backend_set = %set_name, %address, error = %e, "reconcile register failed");
                    stats.failed += 1;
                }
            }
        }

        for address in set.backends.iter().filter(|a| !desired.contains(*a)) {
            match self.engine.backends().remove_backend(set_name, address).await {
                Ok(()) => stats.deregistered += 1,
                Err(e) => {
                    warn!(backend_set = %set_name, %address, error = %e, "reconcile deregister failed");
                    stats.failed += 1;
                }
            }
        }

        if stats.changed() || stats.failed > 0 {
            info!(
                fleet = %s.fleet_id,
                registered = stats.registered,
                deregistered = stats.deregistered,
                unaddressed = stats.unaddressed,
                failed = stats.failed,
                "reconcile sweep repaired backend set"
            );
        } else {
            debug!(fleet = %s.fleet_id, workers = fleet.len(), "reconcile sweep found nothing to do");
        }
        Ok(stats)
    }

    /// Sweep every `interval` until shutdown. `on_sweep` sees each result.
    pub async fn run<F>(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
        mut on_sweep: F,
    ) where
        F: FnMut(&EngineResult<ReconcileStats>) + Send,
    {
        info!(
            fleet = %self.engine.fleet_id(),
            interval_secs = interval.as_secs(),
            "reconciler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let result = self.sweep().await;
                    if let Err(e) = &result {
                        warn!(error = %e, "reconcile sweep failed");
                    }
                    on_sweep(&result);
                }
                _ = shutdown.changed() => {
                    info!("reconciler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use fleet_core::{ControllerSettings, FleetConfig};
    use fleetscale_sim::SimCloud;

    fn settings() -> ControllerSettings {
        let toml = r#"
[fleet]
name = "demo"
name_prefix = "demo"
min_instances = 0
max_instances = 5

[backend_set]
name = "demo-set"

[timeouts]
guard_acquire = "100ms"
poll_interval = "5ms"
"#;
        FleetConfig::from_toml_str(toml).unwrap().settings().unwrap()
    }

    fn reconciler(cloud: &SimCloud) -> Reconciler {
        let engine = ScaleEngine::new(settings(), Arc::new(cloud.clone()), Arc::new(cloud.clone()));
        Reconciler::new(engine)
    }

    fn addr(s: &str) -> BackendAddress {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn registers_missing_and_removes_stale() {
        let cloud = SimCloud::open_in_memory().unwrap();
        cloud
            .seed_worker("demo-a", WorkerState::Ready, Some("10.0.5.1".parse().unwrap()), 1)
            .unwrap();
        cloud
            .seed_worker("demo-b", WorkerState::Ready, Some("10.0.5.2".parse().unwrap()), 2)
            .unwrap();
        cloud.seed_worker("demo-c", WorkerState::Ready, None, 3).unwrap();
        cloud
            .seed_worker("demo-d", WorkerState::Provisioning, None, 4)
            .unwrap();

        let r = reconciler(&cloud);
        r.engine
            .backends()
            .ensure_backend_set(&r.engine.settings().backend_set)
            .await
            .unwrap();
        cloud.add_backend("demo-set", &addr("10.0.5.1:8080")).unwrap();
        cloud.add_backend("demo-set", &addr("10.0.9.9:8080")).unwrap();

        let stats = r.sweep().await.unwrap();
        assert_eq!(
            stats,
            ReconcileStats {
                registered: 1,
                deregistered: 1,
                unaddressed: 1,
                failed: 0,
            }
        );

        let mut backends = cloud.get_backend_set("demo-set").unwrap().backends;
        backends.sort();
        assert_eq!(backends, vec![addr("10.0.5.1:8080"), addr("10.0.5.2:8080")]);

        // A second sweep is a no-op.
        let again = r.sweep().await.unwrap();
        assert!(!again.changed());
    }

    #[tokio::test]
    async fn creates_backend_set_when_absent() {
        let cloud = SimCloud::open_in_memory().unwrap();
        cloud
            .seed_worker("demo-a", WorkerState::Ready, Some("10.0.5.1".parse().unwrap()), 1)
            .unwrap();

        let stats = reconciler(&cloud).sweep().await.unwrap();
        assert_eq!(stats.registered, 1);
        assert!(cloud.get_backend_set("demo-set").is_ok());
    }

    #[tokio::test]
    async fn evicting_workers_are_not_reregistered() {
        let cloud = SimCloud::open_in_memory().unwrap();
        let id = cloud
            .seed_worker("demo-a", WorkerState::Ready, Some("10.0.5.1".parse().unwrap()), 1)
            .unwrap();
        let r = reconciler(&cloud);

        let ticket = r.engine.guard().acquire("demo", Duration::from_millis(10)).await.unwrap();
        let _mark = ticket.mark_evicting(&id);
        drop(ticket);

        let stats = r.sweep().await.unwrap();
        assert_eq!(stats.registered, 0);
        assert!(cloud.get_backend_set("demo-set").unwrap().backends.is_empty());
    }

    #[tokio::test]
    async fn guard_contention_is_an_error() {
        let cloud = SimCloud::open_in_memory().unwrap();
        let r = reconciler(&cloud);
        let _held = r.engine.guard().acquire("demo", Duration::from_millis(10)).await.unwrap();

        let err = r.sweep().await.unwrap_err();
        assert!(matches!(err, EngineError::GuardTimeout { .. }));
    }

    #[tokio::test]
    async fn partial_backend_failures_are_counted() {
        let cloud = SimCloud::open_in_memory().unwrap();
        cloud
            .seed_worker("demo-a", WorkerState::Ready, Some("10.0.5.1".parse().unwrap()), 1)
            .unwrap();
        cloud.faults().set_fail_add_backend(true);

        let stats = reconciler(&cloud).sweep().await.unwrap();
        assert_eq!(stats.registered, 0);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn run_sweeps_until_shutdown() {
        let cloud = SimCloud::open_in_memory().unwrap();
        let r = reconciler(&cloud);
        let (tx, rx) = tokio::sync::watch::channel(false);
        let sweeps = Arc::new(AtomicU32::new(0));

        let handle = {
            let r = r.clone();
            let sweeps = sweeps.clone();
            tokio::spawn(async move {
                r.run(Duration::from_millis(10), rx, |_| {
                    sweeps.fetch_add(1, Ordering::SeqCst);
                })
                .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(sweeps.load(Ordering::SeqCst) >= 1);
    }
}
