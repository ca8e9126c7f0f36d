//! Trigger dispatcher — one task per delivered trigger.
//!
//! Triggers arrive on an `mpsc` channel (at-least-once delivery from the
//! alarm transport or the HTTP surface). Each one is handled on its own
//! tokio task; the fleet guard inside the engine does the serialization.
//! On shutdown the dispatcher closes the channel, decides every trigger
//! already queued, and waits for in-flight decisions, so no accepted
//! trigger is dropped and none is abandoned between create and register.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use fleet_core::ScaleTrigger;

use crate::engine::ScaleEngine;
use crate::outcome::ScaleOutcome;
use crate::reconcile::ReconcileStats;

/// Receives every decision result. Implemented by the metrics recorder.
pub trait DecisionObserver: Send + Sync {
    fn on_decision(&self, trigger: &ScaleTrigger, outcome: &ScaleOutcome);

    fn on_reconcile(&self, _stats: &ReconcileStats) {}
}

/// Counts kept by a dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub completed: u64,
    pub panicked: u64,
}

/// Fans triggers out to per-trigger decision tasks.
pub struct TriggerDispatcher {
    engine: ScaleEngine,
    observers: Vec<Arc<dyn DecisionObserver>>,
}

impl TriggerDispatcher {
    pub fn new(engine: ScaleEngine) -> Self {
        Self {
            engine,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DecisionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Bounded trigger channel.
    pub fn channel(capacity: usize) -> (mpsc::Sender<ScaleTrigger>, mpsc::Receiver<ScaleTrigger>) {
        mpsc::channel(capacity)
    }

    /// Dispatch until shutdown or until every sender is dropped, then
    /// drain queued triggers and in-flight decisions.
    pub async fn run(
        self,
        mut triggers: mpsc::Receiver<ScaleTrigger>,
        mut shutdown: watch::Receiver<bool>,
    ) -> DispatchStats {
        let observers: Arc<[Arc<dyn DecisionObserver>]> = self.observers.into();
        let mut tasks = JoinSet::new();
        let mut stats = DispatchStats::default();

        info!(fleet = %self.engine.fleet_id(), "trigger dispatcher started");

        loop {
            tokio::select! {
                maybe = triggers.recv() => {
                    let Some(trigger) = maybe else {
                        debug!("trigger channel closed");
                        break;
                    };
                    spawn_decision(&self.engine, &mut tasks, &observers, &mut stats, trigger);
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    record_join(&mut stats, joined);
                }
                _ = shutdown.changed() => {
                    info!(in_flight = tasks.len(), "trigger dispatcher shutting down");
                    // Accepted triggers are still decided; only new sends fail.
                    triggers.close();
                    while let Some(trigger) = triggers.recv().await {
                        spawn_decision(&self.engine, &mut tasks, &observers, &mut stats, trigger);
                    }
                    break;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            record_join(&mut stats, joined);
        }
        info!(
            received = stats.received,
            completed = stats.completed,
            "trigger dispatcher stopped"
        );
        stats
    }
}

fn spawn_decision(
    engine: &ScaleEngine,
    tasks: &mut JoinSet<()>,
    observers: &Arc<[Arc<dyn DecisionObserver>]>,
    stats: &mut DispatchStats,
    trigger: ScaleTrigger,
) {
    stats.received += 1;
    debug!(
        direction = %trigger.direction,
        reason = %trigger.reason,
        in_flight = tasks.len(),
        "trigger received"
    );
    let engine = engine.clone();
    let observers = observers.clone();
    tasks.spawn(async move {
        let outcome = engine.handle(&trigger).await;
        for observer in observers.iter() {
            observer.on_decision(&trigger, &outcome);
        }
    });
}

fn record_join(stats: &mut DispatchStats, joined: Result<(), tokio::task::JoinError>) {
    match joined {
        Ok(()) => stats.completed += 1,
        Err(e) => {
            error!(error = %e, "decision task panicked");
            stats.panicked += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use fleet_core::{Direction, FleetConfig, WorkerState};
    use fleetscale_sim::{SimCloud, SimTiming};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(Direction, &'static str)>>,
    }

    impl DecisionObserver for Recorder {
        fn on_decision(&self, trigger: &ScaleTrigger, outcome: &ScaleOutcome) {
            self.seen
                .lock()
                .unwrap()
                .push((trigger.direction, outcome.kind()));
        }
    }

    fn engine(cloud: &SimCloud, max: u32) -> ScaleEngine {
        let toml = format!(
            "[fleet]\nname = \"demo\"\nname_prefix = \"demo\"\nmin_instances = 1\nmax_instances = {max}\n\
             [timeouts]\nprovision_ready = \"2s\"\nbackend_drain = \"5ms\"\npoll_interval = \"5ms\"\ndeprovision = \"100ms\"\n"
        );
        let settings = FleetConfig::from_toml_str(&toml).unwrap().settings().unwrap();
        ScaleEngine::new(settings, Arc::new(cloud.clone()), Arc::new(cloud.clone()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_trigger_reaches_observers() {
        let cloud = SimCloud::open_in_memory().unwrap().with_timing(SimTiming {
            boot_delay: Duration::from_millis(10),
            ..SimTiming::instant()
        });
        cloud
            .seed_worker("demo-0", WorkerState::Ready, Some("10.3.0.1".parse().unwrap()), 1)
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        let dispatcher = TriggerDispatcher::new(engine(&cloud, 2)).with_observer(recorder.clone());

        let (tx, rx) = TriggerDispatcher::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(rx, shutdown_rx));

        for i in 0..3 {
            tx.send(ScaleTrigger::up(format!("cpu-{i}"))).await.unwrap();
        }
        drop(tx);
        let stats = handle.await.unwrap();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.completed, 3);

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.iter().filter(|(_, k)| *k == "succeeded").count(), 1);
        assert_eq!(seen.iter().filter(|(_, k)| *k == "rejected").count(), 2);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_decisions() {
        let cloud = SimCloud::open_in_memory().unwrap().with_timing(SimTiming {
            boot_delay: Duration::from_millis(50),
            ..SimTiming::instant()
        });
        let recorder = Arc::new(Recorder::default());
        let dispatcher = TriggerDispatcher::new(engine(&cloud, 3)).with_observer(recorder.clone());

        let (tx, rx) = TriggerDispatcher::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(rx, shutdown_rx));

        tx.send(ScaleTrigger::up("cpu")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown_tx.send(true).unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(recorder.seen.lock().unwrap().as_slice(), &[(Direction::Up, "succeeded")]);
        assert!(cloud.get_backend_set("autoscaling-demo-backend-set").unwrap().backends.len() == 1);
    }

    #[tokio::test]
    async fn shutdown_decides_triggers_still_queued() {
        let cloud = SimCloud::open_in_memory().unwrap().with_timing(SimTiming::instant());
        let recorder = Arc::new(Recorder::default());
        let dispatcher = TriggerDispatcher::new(engine(&cloud, 3)).with_observer(recorder.clone());

        let (tx, rx) = TriggerDispatcher::channel(32);
        for i in 0..20 {
            tx.send(ScaleTrigger::down(format!("idle-{i}"))).await.unwrap();
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        let stats = dispatcher.run(rx, shutdown_rx).await;
        assert_eq!(stats.received, 20);
        assert_eq!(stats.completed, 20);

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 20);
        assert!(seen.iter().all(|(d, k)| *d == Direction::Down && *k == "rejected"));
        drop(tx);
    }
}
