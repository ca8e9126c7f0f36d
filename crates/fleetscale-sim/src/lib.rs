//! fleetscale-sim — a simulated cloud for the fleetscale controller.
//!
//! Backed by [redb](https://docs.rs/redb), `SimCloud` plays both
//! collaborators the decision engine talks to: the compute-provisioning
//! API and the load-balancer API. It is what the engine's tests run
//! against and what `fleetd run` drives when no real cloud adapter is
//! wired in.
//!
//! # Architecture
//!
//! ```text
//! SimCloud
//!   ├── workers table       id → WorkerRecord (JSON)
//!   ├── backend_sets table  name → BackendSet (JSON)
//!   ├── counters table      sequence numbers for ids and IPs
//!   ├── SimTiming           boot / teardown delays, per-call latency
//!   └── Faults              outage and failure toggles
//! ```
//!
//! Lifecycle transitions are lazy: a worker created with a boot delay of
//! 2s reports `Provisioning` until 2s have passed, then `Ready`, without
//! any background task. Deleting a worker moves it to `Draining` until
//! its teardown delay passes, then `Terminated`.

pub mod error;
pub mod faults;
pub mod provider;
pub mod store;
pub mod tables;

pub use error::{SimError, SimResult};
pub use faults::{Faults, SimCall, SimCalls};
pub use store::{SimCloud, SimTiming, WorkerRecord};
