//! Bounded polling against the provisioning collaborator.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use fleet_core::{ProviderError, ProvisioningApi, Worker, WorkerState};

/// How a wait for readiness ended.
pub(crate) enum ReadyWait {
    /// Ready with a private IP.
    Ready(Worker),
    /// Ready at the deadline but still without an IP.
    Unaddressed(Worker),
    /// Started draining or reached a terminal state instead of Ready.
    Died(Worker),
    /// Deadline passed before Ready. Carries the last error seen, if any.
    TimedOut(Option<ProviderError>),
}

/// `timeout` from now, clamped to a far-future instant instead of overflowing.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 3600))
}

/// Poll `id` until it is Ready with an address, bounded by `timeout`.
/// Draining ends the wait as `Died`, the same as a terminal state.
pub(crate) async fn wait_ready(
    provisioning: &dyn ProvisioningApi,
    id: &str,
    timeout: Duration,
    poll: Duration,
) -> ReadyWait {
    let deadline = deadline_after(timeout);
    let mut last_ready: Option<Worker> = None;
    let mut last_error = None;

    loop {
        match provisioning.get(id).await {
            Ok(worker) if worker.state == WorkerState::Ready => {
                if worker.private_ip.is_some() {
                    return ReadyWait::Ready(worker);
                }
                debug!(worker = %id, "ready, waiting for private ip");
                last_ready = Some(worker);
            }
            Ok(worker) if worker.state == WorkerState::Draining || worker.state.is_terminal() => {
                return ReadyWait::Died(worker);
            }
            Ok(worker) => {
                debug!(worker = %id, state = %worker.state, "waiting for ready");
            }
            Err(e) => {
                debug!(worker = %id, error = %e, "worker poll failed");
                last_error = Some(e);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return match last_ready {
                Some(worker) => ReadyWait::Unaddressed(worker),
                None => ReadyWait::TimedOut(last_error),
            };
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}

/// Poll `id` until it is Terminated or gone, bounded by `timeout`.
/// Returns the last observed state, or `None` once the worker is gone.
pub(crate) async fn wait_terminated(
    provisioning: &dyn ProvisioningApi,
    id: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<Option<WorkerState>, Option<WorkerState>> {
    let deadline = deadline_after(timeout);
    let mut last_state = None;

    loop {
        match provisioning.get(id).await {
            Ok(worker) if worker.state == WorkerState::Terminated => {
                return Ok(Some(WorkerState::Terminated));
            }
            Ok(worker) => last_state = Some(worker.state),
            Err(ProviderError::NotFound(_)) => return Ok(None),
            Err(e) => debug!(worker = %id, error = %e, "termination poll failed"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(last_state);
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{LaunchRequest, WorkerSpec};
    use fleetscale_sim::{SimCloud, SimTiming};
    use std::collections::HashMap;

    fn timing(boot_ms: u64) -> SimTiming {
        SimTiming {
            boot_delay: Duration::from_millis(boot_ms),
            ..SimTiming::instant()
        }
    }

    #[tokio::test]
    async fn waits_through_boot_delay() {
        let cloud = SimCloud::open_in_memory().unwrap().with_timing(timing(30));
        let request = LaunchRequest {
            display_name: "demo-1".to_string(),
            spec: WorkerSpec {
                shape: "CI.Standard.E4.Flex".to_string(),
                ocpus: 1.0,
                memory_gb: 8.0,
                image: "app:latest".to_string(),
                container_name: "app".to_string(),
                env: HashMap::new(),
            },
        };
        let id = cloud.create_worker(&request).unwrap();
        let res = wait_ready(&cloud, &id, Duration::from_secs(5), Duration::from_millis(5)).await;
        assert!(matches!(res, ReadyWait::Ready(w) if w.private_ip.is_some()));
    }

    #[tokio::test]
    async fn stalled_worker_times_out() {
        let cloud = SimCloud::open_in_memory().unwrap();
        let id = cloud.seed_worker("demo-1", WorkerState::Provisioning, None, 1).unwrap();
        let res = wait_ready(&cloud, &id, Duration::from_millis(30), Duration::from_millis(5)).await;
        assert!(matches!(res, ReadyWait::TimedOut(None)));
    }

    #[tokio::test]
    async fn unaddressed_ready_worker_is_reported() {
        let cloud = SimCloud::open_in_memory().unwrap();
        let id = cloud.seed_worker("demo-1", WorkerState::Ready, None, 1).unwrap();
        let res = wait_ready(&cloud, &id, Duration::from_millis(20), Duration::from_millis(5)).await;
        assert!(matches!(res, ReadyWait::Unaddressed(w) if w.id == id));
    }

    #[tokio::test]
    async fn failed_worker_ends_the_wait() {
        let cloud = SimCloud::open_in_memory().unwrap();
        let id = cloud.seed_worker("demo-1", WorkerState::Failed, None, 1).unwrap();
        let res = wait_ready(&cloud, &id, Duration::from_secs(5), Duration::from_millis(5)).await;
        assert!(matches!(res, ReadyWait::Died(w) if w.state == WorkerState::Failed));
    }

    #[tokio::test]
    async fn draining_worker_ends_the_wait() {
        let cloud = SimCloud::open_in_memory().unwrap();
        let id = cloud.seed_worker("demo-1", WorkerState::Draining, None, 1).unwrap();
        let started = std::time::Instant::now();
        let res = wait_ready(&cloud, &id, Duration::from_secs(5), Duration::from_millis(5)).await;
        assert!(matches!(res, ReadyWait::Died(w) if w.state == WorkerState::Draining));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn huge_timeouts_do_not_overflow() {
        let far = deadline_after(Duration::MAX);
        assert!(far > Instant::now() + Duration::from_secs(3600));

        let cloud = SimCloud::open_in_memory().unwrap();
        let id = cloud.seed_worker("demo-1", WorkerState::Failed, None, 1).unwrap();
        let res = wait_ready(&cloud, &id, Duration::MAX, Duration::from_millis(5)).await;
        assert!(matches!(res, ReadyWait::Died(_)));
        let res = wait_terminated(&cloud, "wkr-404", Duration::MAX, Duration::from_millis(5)).await;
        assert_eq!(res, Ok(None));
    }

    #[tokio::test]
    async fn termination_confirmed_or_bounded() {
        let cloud = SimCloud::open_in_memory().unwrap();
        let gone = cloud.seed_worker("demo-1", WorkerState::Terminated, None, 1).unwrap();
        let res = wait_terminated(&cloud, &gone, Duration::from_millis(20), Duration::from_millis(5)).await;
        assert_eq!(res, Ok(Some(WorkerState::Terminated)));

        let res = wait_terminated(&cloud, "wkr-404", Duration::from_millis(20), Duration::from_millis(5)).await;
        assert_eq!(res, Ok(None));

        let lingering = cloud.seed_worker("demo-2", WorkerState::Draining, None, 1).unwrap();
        let res =
            wait_terminated(&cloud, &lingering, Duration::from_millis(20), Duration::from_millis(5)).await;
        assert_eq!(res, Err(Some(WorkerState::Draining)));
    }
}
