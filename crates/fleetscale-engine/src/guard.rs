//! Concurrency Guard — per-fleet mutual exclusion for read-decide-act.
//!
//! One mutex per fleet id, shared by scale-up, scale-down and the
//! reconciliation sweep. Holding a [`GuardTicket`] makes the fleet read
//! and the bound check linearizable with respect to every other decision
//! on the same fleet. Unrelated fleets never contend.
//!
//! A scale-down releases the guard once it has chosen its victim, long
//! before the victim is gone. It leaves an [`EvictionMark`] behind so
//! later decisions neither pick the same worker again nor count it
//! toward the floor. The mark clears when dropped.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, trace};

use fleet_core::WorkerId;

use crate::error::{EngineError, EngineResult};

#[derive(Default)]
struct FleetLock {
    region: Arc<tokio::sync::Mutex<()>>,
    evicting: Mutex<HashSet<WorkerId>>,
}

impl FleetLock {
    fn evicting(&self) -> HashSet<WorkerId> {
        self.evicting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Lock table keyed by fleet id. Cheap to clone; clones share locks.
#[derive(Clone, Default)]
pub struct FleetGuard {
    fleets: Arc<Mutex<HashMap<String, Arc<FleetLock>>>>,
}

impl FleetGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, fleet: &str) -> Arc<FleetLock> {
        let mut fleets = self.fleets.lock().unwrap_or_else(PoisonError::into_inner);
        fleets.entry(fleet.to_string()).or_default().clone()
    }

    /// Enter the fleet's critical region, waiting at most `timeout`.
    pub async fn acquire(&self, fleet: &str, timeout: Duration) -> EngineResult<GuardTicket> {
        let lock = self.lock_for(fleet);
        let region = lock.region.clone();

        match tokio::time::timeout(timeout, region.lock_owned()).await {
            Ok(permit) => {
                trace!(%fleet, "fleet guard acquired");
                Ok(GuardTicket {
                    fleet: fleet.to_string(),
                    lock,
                    _permit: permit,
                })
            }
            Err(_) => {
                debug!(%fleet, ?timeout, "fleet guard acquisition timed out");
                Err(EngineError::GuardTimeout {
                    fleet: fleet.to_string(),
                    waited: timeout,
                })
            }
        }
    }

    /// Workers currently marked for eviction in `fleet`.
    pub fn evicting(&self, fleet: &str) -> HashSet<WorkerId> {
        self.lock_for(fleet).evicting()
    }
}

/// Proof of holding a fleet's critical region. Released on drop.
pub struct GuardTicket {
    fleet: String,
    lock: Arc<FleetLock>,
    _permit: OwnedMutexGuard<()>,
}

impl GuardTicket {
    pub fn fleet(&self) -> &str {
        &self.fleet
    }

    /// Workers chosen by in-flight scale-downs.
    pub fn evicting(&self) -> HashSet<WorkerId> {
        self.lock.evicting()
    }

    /// Mark `worker` as chosen for eviction until the returned mark drops.
    pub fn mark_evicting(&self, worker: &str) -> EvictionMark {
        self.lock
            .evicting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(worker.to_string());
        EvictionMark {
            lock: self.lock.clone(),
            worker: worker.to_string(),
        }
    }
}

impl Drop for GuardTicket {
    fn drop(&mut self) {
        trace!(fleet = %self.fleet, "fleet guard released");
    }
}

/// Keeps a worker out of selection and floor counts while it is removed.
pub struct EvictionMark {
    lock: Arc<FleetLock>,
    worker: WorkerId,
}

impl EvictionMark {
    pub fn worker(&self) -> &str {
        &self.worker
    }
}

impl Drop for EvictionMark {
    fn drop(&mut self) {
        self.lock
            .evicting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.worker);
    }
}
