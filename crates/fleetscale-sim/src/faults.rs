//! Fault injection and call accounting for the simulated cloud.
//!
//! Toggles are plain atomics so tests can flip them while decisions are
//! in flight. Every collaborator call is counted, which lets tests assert
//! that a rejected decision made no mutating call at all. Mutating calls
//! are also journaled in arrival order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use fleet_core::{BackendAddress, WorkerId};

#[derive(Debug, Default)]
struct FaultsInner {
    provisioning_down: AtomicBool,
    load_balancer_down: AtomicBool,
    fail_create: AtomicBool,
    fail_delete: AtomicBool,
    fail_add_backend: AtomicBool,
    fail_remove_backend: AtomicBool,
    stall_boot: AtomicBool,
    withhold_ip: AtomicBool,

    creates: AtomicU64,
    deletes: AtomicU64,
    lists: AtomicU64,
    backend_set_creates: AtomicU64,
    backend_adds: AtomicU64,
    backend_removes: AtomicU64,

    journal: Mutex<Vec<SimCall>>,
}

/// Shared fault toggles. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    inner: Arc<FaultsInner>,
}

/// Snapshot of collaborator call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCalls {
    pub creates: u64,
    pub deletes: u64,
    pub lists: u64,
    pub backend_set_creates: u64,
    pub backend_adds: u64,
    pub backend_removes: u64,
}

impl SimCalls {
    /// Calls that change workers or backends.
    pub fn mutations(&self) -> u64 {
        self.creates + self.deletes + self.backend_set_creates + self.backend_adds + self.backend_removes
    }
}

/// One mutating collaborator call, as journaled by [`Faults::journal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    Create { display_name: String },
    Delete { id: WorkerId },
    CreateBackendSet { name: String },
    AddBackend { backend_set: String, address: BackendAddress },
    RemoveBackend { backend_set: String, address: BackendAddress },
}

macro_rules! toggle {
    ($set:ident, $get:ident, $field:ident) => {
        pub fn $set(&self, on: bool) {
            self.inner.$field.store(on, Ordering::SeqCst);
        }

        pub fn $get(&self) -> bool {
            self.inner.$field.load(Ordering::SeqCst)
        }
    };
}

impl Faults {
    pub fn new() -> Self {
        Self::default()
    }

    // Every provisioning call fails with `Unavailable`.
    toggle!(set_provisioning_down, provisioning_down, provisioning_down);
    // Every load-balancer call fails with `Unavailable`.
    toggle!(set_load_balancer_down, load_balancer_down, load_balancer_down);
    toggle!(set_fail_create, fail_create, fail_create);
    toggle!(set_fail_delete, fail_delete, fail_delete);
    toggle!(set_fail_add_backend, fail_add_backend, fail_add_backend);
    toggle!(set_fail_remove_backend, fail_remove_backend, fail_remove_backend);
    // New workers never leave `Provisioning`.
    toggle!(set_stall_boot, stall_boot, stall_boot);
    // New workers become `Ready` without a private IP.
    toggle!(set_withhold_ip, withhold_ip, withhold_ip);

    /// Clear every toggle. Call counts are kept.
    pub fn heal(&self) {
        for flag in [
            &self.inner.provisioning_down,
            &self.inner.load_balancer_down,
            &self.inner.fail_create,
            &self.inner.fail_delete,
            &self.inner.fail_add_backend,
            &self.inner.fail_remove_backend,
            &self.inner.stall_boot,
            &self.inner.withhold_ip,
        ] {
            flag.store(false, Ordering::SeqCst);
        }
    }

    pub fn calls(&self) -> SimCalls {
        SimCalls {
            creates: self.inner.creates.load(Ordering::SeqCst),
            deletes: self.inner.deletes.load(Ordering::SeqCst),
            lists: self.inner.lists.load(Ordering::SeqCst),
            backend_set_creates: self.inner.backend_set_creates.load(Ordering::SeqCst),
            backend_adds: self.inner.backend_adds.load(Ordering::SeqCst),
            backend_removes: self.inner.backend_removes.load(Ordering::SeqCst),
        }
    }

    /// Mutating calls attempted so far, oldest first. Attempts that an
    /// injected fault rejected are included.
    pub fn journal(&self) -> Vec<SimCall> {
        self.inner
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record(&self, call: SimCall) {
        self.inner
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    pub(crate) fn count_create(&self) {
        self.inner.creates.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn count_delete(&self) {
        self.inner.deletes.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn count_list(&self) {
        self.inner.lists.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn count_backend_set_create(&self) {
        self.inner.backend_set_creates.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn count_backend_add(&self) {
        self.inner.backend_adds.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn count_backend_remove(&self) {
        self.inner.backend_removes.fetch_add(1, Ordering::SeqCst);
    }
}
