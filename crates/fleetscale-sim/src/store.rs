//! SimCloud — redb-backed persistence for simulated workers and backend sets.
//!
//! Provides typed operations over workers and backend sets. All records
//! are JSON-serialized into redb's `&[u8]` value columns. Each mutating
//! operation runs in a single write transaction, and redb serializes write
//! transactions, so check-and-insert sequences here are atomic.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fleet_core::{
    now_millis, BackendAddress, BackendSet, BackendSetSpec, LaunchRequest, Worker, WorkerFilter,
    WorkerId, WorkerState,
};

use crate::error::{SimError, SimResult};
use crate::faults::Faults;
use crate::tables::*;

/// Convert any `Display` error into a `SimError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| SimError::$variant(e.to_string())
    };
}

/// Timing model for simulated workers and calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimTiming {
    /// Time from create until a worker reports `Ready`.
    pub boot_delay: Duration,
    /// Time from delete until a worker reports `Terminated`.
    pub teardown_delay: Duration,
    /// Added to every collaborator call before it touches state.
    pub call_latency: Duration,
}

impl Default for SimTiming {
    fn default() -> Self {
        Self {
            boot_delay: Duration::from_secs(5),
            teardown_delay: Duration::from_secs(2),
            call_latency: Duration::ZERO,
        }
    }
}

impl SimTiming {
    /// Instant transitions and no latency.
    pub fn instant() -> Self {
        Self {
            boot_delay: Duration::ZERO,
            teardown_delay: Duration::ZERO,
            call_latency: Duration::ZERO,
        }
    }
}

/// Persisted state of one simulated worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker: Worker,
    /// Unix millis at which a provisioning worker becomes ready.
    pub ready_at: u64,
    /// Unix millis at which a draining worker becomes terminated.
    pub terminated_at: Option<u64>,
    /// The worker never becomes ready.
    pub stalled: bool,
    /// The worker becomes ready without an IP.
    pub ip_withheld: bool,
    /// IP handed out once the worker is ready.
    pub allocated_ip: IpAddr,
}

impl WorkerRecord {
    /// The worker as observed at `now`.
    pub fn observe(&self, now: u64) -> Worker {
        let mut worker = self.worker.clone();
        match worker.state {
            WorkerState::Provisioning if !self.stalled && now >= self.ready_at => {
                worker.state = WorkerState::Ready;
                if !self.ip_withheld {
                    worker.private_ip = Some(self.allocated_ip);
                }
            }
            WorkerState::Draining => {
                if self.terminated_at.is_some_and(|t| now >= t) {
                    worker.state = WorkerState::Terminated;
                }
            }
            _ => {}
        }
        worker
    }
}

/// Thread-safe simulated cloud backed by redb.
#[derive(Clone)]
pub struct SimCloud {
    db: Arc<Database>,
    timing: SimTiming,
    faults: Faults,
}

impl SimCloud {
    /// Open (or create) a persistent simulated cloud at the given path.
    pub fn open(path: &Path) -> SimResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let cloud = Self {
            db: Arc::new(db),
            timing: SimTiming::default(),
            faults: Faults::new(),
        };
        cloud.ensure_tables()?;
        debug!(?path, "simulated cloud opened");
        Ok(cloud)
    }

    /// Create an ephemeral in-memory simulated cloud (for testing).
    pub fn open_in_memory() -> SimResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let cloud = Self {
            db: Arc::new(db),
            timing: SimTiming::default(),
            faults: Faults::new(),
        };
        cloud.ensure_tables()?;
        debug!("in-memory simulated cloud opened");
        Ok(cloud)
    }

    /// Replace the timing model.
    pub fn with_timing(mut self, timing: SimTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn timing(&self) -> SimTiming {
        self.timing
    }

    /// Fault toggles shared by every clone of this cloud.
    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> SimResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(WORKERS).map_err(map_err!(Table))?;
        txn.open_table(BACKEND_SETS).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Workers ────────────────────────────────────────────────────

    /// Launch a worker. It is `Provisioning` until its boot delay passes.
    pub fn create_worker(&self, request: &LaunchRequest) -> SimResult<WorkerId> {
        let now = now_millis();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id;
        {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            let seq = next_counter(&mut counters, "worker_seq")?;
            let ip_seq = next_counter(&mut counters, "ip_seq")?;
            id = format!("wkr-{seq:06}");

            let record = WorkerRecord {
                worker: Worker {
                    id: id.clone(),
                    display_name: request.display_name.clone(),
                    state: WorkerState::Provisioning,
                    private_ip: None,
                    created_at: now,
                    registered: false,
                },
                ready_at: now + self.timing.boot_delay.as_millis() as u64,
                terminated_at: None,
                stalled: self.faults.stall_boot(),
                ip_withheld: self.faults.withhold_ip(),
                allocated_ip: ip_for(ip_seq),
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            table
                .insert(id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(worker = %id, name = %request.display_name, "worker created");
        Ok(id)
    }

    /// Insert a worker directly, bypassing the boot model (for fixtures).
    pub fn seed_worker(
        &self,
        display_name: &str,
        state: WorkerState,
        private_ip: Option<IpAddr>,
        created_at: u64,
    ) -> SimResult<WorkerId> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id;
        {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            let seq = next_counter(&mut counters, "worker_seq")?;
            let ip_seq = next_counter(&mut counters, "ip_seq")?;
            id = format!("wkr-{seq:06}");
            let allocated_ip = private_ip.unwrap_or_else(|| ip_for(ip_seq));

            let record = WorkerRecord {
                worker: Worker {
                    id: id.clone(),
                    display_name: display_name.to_string(),
                    state,
                    private_ip,
                    created_at,
                    registered: false,
                },
                ready_at: created_at,
                terminated_at: None,
                stalled: state == WorkerState::Provisioning,
                ip_withheld: private_ip.is_none(),
                allocated_ip,
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            table
                .insert(id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(id)
    }

    /// Get a worker as currently observed.
    pub fn get_worker(&self, id: &str) -> SimResult<Worker> {
        let record = self
            .get_record(id)?
            .ok_or_else(|| SimError::NotFound(format!("worker {id}")))?;
        Ok(record.observe(now_millis()))
    }

    /// Get the raw record for a worker.
    pub fn get_record(&self, id: &str) -> SimResult<Option<WorkerRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: WorkerRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all workers matching `filter`, in any state.
    pub fn list_workers(&self, filter: &WorkerFilter) -> SimResult<Vec<Worker>> {
        let now = now_millis();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: WorkerRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            let worker = record.observe(now);
            if filter.matches(&worker) {
                results.push(worker);
            }
        }
        Ok(results)
    }

    /// Begin tearing down a worker. Deleting a draining or terminated
    /// worker is accepted and changes nothing.
    pub fn delete_worker(&self, id: &str) -> SimResult<()> {
        let now = now_millis();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            let bytes = table
                .get(id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| SimError::NotFound(format!("worker {id}")))?;
            let mut record: WorkerRecord =
                serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;

            let observed = record.observe(now);
            if matches!(observed.state, WorkerState::Draining | WorkerState::Terminated) {
                debug!(worker = %id, state = %observed.state, "delete of departing worker ignored");
            } else {
                record.worker = observed;
                record.worker.state = WorkerState::Draining;
                record.terminated_at = Some(now + self.timing.teardown_delay.as_millis() as u64);
                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                table
                    .insert(id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(worker = %id, "worker delete accepted");
        Ok(())
    }

    /// Force a worker into a state (for fixtures).
    pub fn set_worker_state(&self, id: &str, state: WorkerState) -> SimResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            let bytes = table
                .get(id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| SimError::NotFound(format!("worker {id}")))?;
            let mut record: WorkerRecord =
                serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
            record.worker.state = state;
            record.stalled = state == WorkerState::Provisioning;
            record.terminated_at = None;
            if state == WorkerState::Ready && !record.ip_withheld {
                record.worker.private_ip = Some(record.allocated_ip);
            }
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Backend sets ───────────────────────────────────────────────

    /// Create a backend set. Fails with `AlreadyExists` on a duplicate name.
    pub fn create_backend_set(&self, spec: &BackendSetSpec) -> SimResult<BackendSet> {
        let set = BackendSet::from_spec(spec);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BACKEND_SETS).map_err(map_err!(Table))?;
            if table.get(spec.name.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(SimError::AlreadyExists(format!("backend set {}", spec.name)));
            }
            let value = serde_json::to_vec(&set).map_err(map_err!(Serialize))?;
            table
                .insert(spec.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(backend_set = %spec.name, "backend set created");
        Ok(set)
    }

    /// Get a backend set by name.
    pub fn get_backend_set(&self, name: &str) -> SimResult<BackendSet> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BACKEND_SETS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let set: BackendSet =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(set)
            }
            None => Err(SimError::NotFound(format!("backend set {name}"))),
        }
    }

    /// Add a backend. Fails with `AlreadyExists` if the address is present.
    pub fn add_backend(&self, name: &str, address: &BackendAddress) -> SimResult<()> {
        self.update_backend_set(name, |set| {
            if set.contains(address) {
                return Err(SimError::AlreadyExists(format!("backend {address}")));
            }
            set.backends.push(*address);
            Ok(())
        })?;
        debug!(backend_set = %name, %address, "backend added");
        Ok(())
    }

    /// Remove a backend. Fails with `NotFound` if the address is absent.
    pub fn remove_backend(&self, name: &str, address: &BackendAddress) -> SimResult<()> {
        self.update_backend_set(name, |set| {
            let before = set.backends.len();
            set.backends.retain(|b| b != address);
            if set.backends.len() == before {
                return Err(SimError::NotFound(format!("backend {address}")));
            }
            Ok(())
        })?;
        debug!(backend_set = %name, %address, "backend removed");
        Ok(())
    }

    /// Read-modify-write a backend set in one transaction.
    fn update_backend_set<F>(&self, name: &str, f: F) -> SimResult<()>
    where
        F: FnOnce(&mut BackendSet) -> SimResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BACKEND_SETS).map_err(map_err!(Table))?;
            let bytes = table
                .get(name)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| SimError::NotFound(format!("backend set {name}")))?;
            let mut set: BackendSet =
                serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
            f(&mut set)?;
            let value = serde_json::to_vec(&set).map_err(map_err!(Serialize))?;
            table.insert(name, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

/// Bump a counter and return its new value.
fn next_counter(table: &mut redb::Table<'_, &'static str, u64>, key: &str) -> SimResult<u64> {
    let current = table
        .get(key)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(key, next).map_err(map_err!(Write))?;
    Ok(next)
}

/// Deterministic private IP for the n-th allocation, inside 10.0.0.0/16.
fn ip_for(seq: u64) -> IpAddr {
    let n = seq.saturating_sub(1);
    let third = ((n / 254) % 256) as u8;
    let fourth = (n % 254 + 1) as u8;
    IpAddr::V4(Ipv4Addr::new(10, 0, third, fourth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{BalancingPolicy, HealthCheckSpec, HealthProtocol, WorkerSpec};
    use std::collections::HashMap;

    fn test_cloud() -> SimCloud {
        SimCloud::open_in_memory().unwrap().with_timing(SimTiming::instant())
    }

    fn launch(name: &str) -> LaunchRequest {
        LaunchRequest {
            display_name: name.to_string(),
            spec: WorkerSpec {
                shape: "CI.Standard.E4.Flex".to_string(),
                ocpus: 1.0,
                memory_gb: 8.0,
                image: "app:latest".to_string(),
                container_name: "app".to_string(),
                env: HashMap::new(),
            },
        }
    }

    fn backend_set_spec(name: &str) -> BackendSetSpec {
        BackendSetSpec {
            name: name.to_string(),
            policy: BalancingPolicy::RoundRobin,
            health_check: HealthCheckSpec {
                protocol: HealthProtocol::Http,
                port: 8080,
                path: "/healthz".to_string(),
                interval_ms: 10_000,
                timeout_ms: 3_000,
                retries: 3,
                return_code: 200,
            },
        }
    }

    fn addr(last: u8) -> BackendAddress {
        BackendAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 8080)
    }

    #[test]
    fn created_worker_becomes_ready_with_ip() {
        let cloud = test_cloud();
        let id = cloud.create_worker(&launch("demo-1")).unwrap();
        assert_eq!(id, "wkr-000001");

        let w = cloud.get_worker(&id).unwrap();
        assert_eq!(w.state, WorkerState::Ready);
        assert_eq!(w.private_ip, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
    }

    #[test]
    fn boot_delay_keeps_worker_provisioning() {
        let cloud = SimCloud::open_in_memory().unwrap().with_timing(SimTiming {
            boot_delay: Duration::from_secs(3600),
            ..SimTiming::instant()
        });
        let id = cloud.create_worker(&launch("demo-1")).unwrap();
        let w = cloud.get_worker(&id).unwrap();
        assert_eq!(w.state, WorkerState::Provisioning);
        assert!(w.private_ip.is_none());
    }

    #[test]
    fn stalled_boot_never_becomes_ready() {
        let cloud = test_cloud();
        cloud.faults().set_stall_boot(true);
        let id = cloud.create_worker(&launch("demo-1")).unwrap();
        assert_eq!(cloud.get_worker(&id).unwrap().state, WorkerState::Provisioning);
    }

    #[test]
    fn withheld_ip_is_ready_without_address() {
        let cloud = test_cloud();
        cloud.faults().set_withhold_ip(true);
        let id = cloud.create_worker(&launch("demo-1")).unwrap();
        let w = cloud.get_worker(&id).unwrap();
        assert_eq!(w.state, WorkerState::Ready);
        assert!(w.private_ip.is_none());
    }

    #[test]
    fn delete_drains_then_terminates() {
        let cloud = test_cloud();
        let id = cloud.create_worker(&launch("demo-1")).unwrap();
        cloud.delete_worker(&id).unwrap();
        // Zero teardown delay: terminated as soon as observed.
        assert_eq!(cloud.get_worker(&id).unwrap().state, WorkerState::Terminated);
        // Deleting again is accepted.
        cloud.delete_worker(&id).unwrap();
    }

    #[test]
    fn delete_unknown_worker_is_not_found() {
        let cloud = test_cloud();
        assert!(matches!(cloud.delete_worker("wkr-999"), Err(SimError::NotFound(_))));
    }

    #[test]
    fn list_filters_by_prefix() {
        let cloud = test_cloud();
        cloud.create_worker(&launch("demo-a")).unwrap();
        cloud.create_worker(&launch("demo-b")).unwrap();
        cloud.create_worker(&launch("other-c")).unwrap();

        let workers = cloud.list_workers(&WorkerFilter::new("demo-")).unwrap();
        assert_eq!(workers.len(), 2);
        assert!(workers.iter().all(|w| w.display_name.starts_with("demo-")));
    }

    #[test]
    fn seeded_worker_keeps_timestamp() {
        let cloud = test_cloud();
        let id = cloud
            .seed_worker("demo-old", WorkerState::Ready, Some(addr(9).ip), 42)
            .unwrap();
        let w = cloud.get_worker(&id).unwrap();
        assert_eq!(w.created_at, 42);
        assert_eq!(w.private_ip, Some(addr(9).ip));
        assert_eq!(w.state, WorkerState::Ready);
    }

    #[test]
    fn set_worker_state_overrides() {
        let cloud = test_cloud();
        let id = cloud
            .seed_worker("demo-1", WorkerState::Provisioning, None, 1)
            .unwrap();
        cloud.set_worker_state(&id, WorkerState::Failed).unwrap();
        assert_eq!(cloud.get_worker(&id).unwrap().state, WorkerState::Failed);
    }

    #[test]
    fn backend_set_create_is_unique() {
        let cloud = test_cloud();
        let spec = backend_set_spec("web");
        let set = cloud.create_backend_set(&spec).unwrap();
        assert!(set.backends.is_empty());
        assert!(matches!(
            cloud.create_backend_set(&spec),
            Err(SimError::AlreadyExists(_))
        ));
        assert_eq!(cloud.get_backend_set("web").unwrap().name, "web");
        assert!(matches!(cloud.get_backend_set("api"), Err(SimError::NotFound(_))));
    }

    #[test]
    fn backend_add_and_remove_report_raw_outcomes() {
        let cloud = test_cloud();
        cloud.create_backend_set(&backend_set_spec("web")).unwrap();

        cloud.add_backend("web", &addr(1)).unwrap();
        assert!(matches!(
            cloud.add_backend("web", &addr(1)),
            Err(SimError::AlreadyExists(_))
        ));
        assert!(cloud.get_backend_set("web").unwrap().contains(&addr(1)));

        cloud.remove_backend("web", &addr(1)).unwrap();
        assert!(matches!(
            cloud.remove_backend("web", &addr(1)),
            Err(SimError::NotFound(_))
        ));
        assert!(cloud.get_backend_set("web").unwrap().backends.is_empty());
    }

    #[test]
    fn backend_ops_on_missing_set_are_not_found() {
        let cloud = test_cloud();
        assert!(matches!(
            cloud.add_backend("ghost", &addr(1)),
            Err(SimError::NotFound(_))
        ));
    }

    #[test]
    fn ip_allocation_skips_network_and_broadcast() {
        assert_eq!(ip_for(1), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(ip_for(254), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 254)));
        assert_eq!(ip_for(255), IpAddr::V4(Ipv4Addr::new(10, 0, 1, 1)));
    }

    #[test]
    fn persistent_cloud_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.redb");
        {
            let cloud = SimCloud::open(&path).unwrap().with_timing(SimTiming::instant());
            cloud.create_worker(&launch("demo-1")).unwrap();
            cloud.create_backend_set(&backend_set_spec("web")).unwrap();
        }
        let cloud = SimCloud::open(&path).unwrap();
        assert_eq!(cloud.list_workers(&WorkerFilter::new("demo")).unwrap().len(), 1);
        assert!(cloud.get_backend_set("web").is_ok());
    }
}
