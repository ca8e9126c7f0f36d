//! Domain types for the fleetscale controller.
//!
//! A fleet is never stored by the controller: it is recomputed from the
//! provisioning collaborator on every decision. These types describe what
//! the collaborators report and what the engine asks them to do.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Opaque handle for a worker, as issued by the provisioning collaborator.
pub type WorkerId = String;

// ── Worker ────────────────────────────────────────────────────────

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Provisioning,
    Ready,
    Draining,
    Terminated,
    Failed,
}

impl WorkerState {
    /// `Terminated` and `Failed` are final; such workers leave the fleet.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Terminated | WorkerState::Failed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Provisioning => "provisioning",
            WorkerState::Ready => "ready",
            WorkerState::Draining => "draining",
            WorkerState::Terminated => "terminated",
            WorkerState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One unit of the compute fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    /// Display name; the controller scopes its fleet by name prefix.
    pub display_name: String,
    pub state: WorkerState,
    /// Private IP, once the provider has assigned one.
    pub private_ip: Option<IpAddr>,
    /// Unix timestamp (milliseconds) when the worker was created.
    pub created_at: u64,
    /// Whether the worker's address is currently a load-balancer backend.
    ///
    /// Providers leave this `false`; the engine fills it in when it joins
    /// the fleet against the backend set.
    #[serde(default)]
    pub registered: bool,
}

impl Worker {
    /// Whether this worker still belongs to the fleet.
    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Backend address for this worker on the given application port.
    pub fn backend_address(&self, port: u16) -> Option<BackendAddress> {
        self.private_ip.map(|ip| BackendAddress { ip, port })
    }
}

/// Shape of a worker to launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub shape: String,
    pub ocpus: f32,
    pub memory_gb: f32,
    /// Container image URI.
    pub image: String,
    pub container_name: String,
    /// Environment variables injected into the container.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// A request to the provisioning collaborator for one new worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub display_name: String,
    pub spec: WorkerSpec,
}

/// Selects the workers that belong to one fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFilter {
    pub name_prefix: String,
}

impl WorkerFilter {
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
        }
    }

    pub fn matches(&self, worker: &Worker) -> bool {
        worker.display_name.starts_with(&self.name_prefix)
    }
}

// ── Backend set ───────────────────────────────────────────────────

/// A load-balancer backend entry (`ip:port`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl BackendAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{ip}:{}", self.port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

impl FromStr for BackendAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: std::net::SocketAddr = s
            .parse()
            .map_err(|e| format!("invalid backend address {s:?}: {e}"))?;
        Ok(Self {
            ip: addr.ip(),
            port: addr.port(),
        })
    }
}

/// Traffic distribution policy of a backend set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancingPolicy {
    #[default]
    RoundRobin,
    LeastConnections,
    IpHash,
}

/// Protocol used by the load balancer's health checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthProtocol {
    #[default]
    Http,
    Tcp,
}

/// Health-check parameters attached to a backend set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    pub protocol: HealthProtocol,
    pub port: u16,
    /// Probe path; ignored for TCP checks.
    pub path: String,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub retries: u32,
    /// Expected HTTP status code.
    pub return_code: u16,
}

impl HealthCheckSpec {
    /// Time a fresh backend needs before it can receive traffic.
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.interval_ms.saturating_mul(self.retries as u64))
    }
}

/// Everything needed to create a backend set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSetSpec {
    pub name: String,
    pub policy: BalancingPolicy,
    pub health_check: HealthCheckSpec,
}

/// A load balancer's named group of backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSet {
    pub name: String,
    pub policy: BalancingPolicy,
    pub health_check: HealthCheckSpec,
    pub backends: Vec<BackendAddress>,
}

impl BackendSet {
    /// An empty backend set built from its spec.
    pub fn from_spec(spec: &BackendSetSpec) -> Self {
        Self {
            name: spec.name.clone(),
            policy: spec.policy,
            health_check: spec.health_check.clone(),
            backends: Vec::new(),
        }
    }

    pub fn contains(&self, address: &BackendAddress) -> bool {
        self.backends.contains(address)
    }
}

// ── Triggers ──────────────────────────────────────────────────────

/// Scaling direction carried by a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(format!("unknown scale direction: {other}")),
        }
    }
}

/// An inbound scale request.
///
/// `reason` names the metric or alarm that fired. It is recorded in logs
/// and results only; it never changes the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleTrigger {
    pub direction: Direction,
    #[serde(default)]
    pub reason: String,
    /// Unix timestamp (milliseconds) when the trigger was raised.
    #[serde(default)]
    pub timestamp: u64,
}

impl ScaleTrigger {
    pub fn new(direction: Direction, reason: impl Into<String>) -> Self {
        Self {
            direction,
            reason: reason.into(),
            timestamp: now_millis(),
        }
    }

    pub fn up(reason: impl Into<String>) -> Self {
        Self::new(Direction::Up, reason)
    }

    pub fn down(reason: impl Into<String>) -> Self {
        Self::new(Direction::Down, reason)
    }
}

/// Current Unix epoch in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
