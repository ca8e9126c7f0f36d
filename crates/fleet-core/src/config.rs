//! fleet.toml configuration parser.
//!
//! Every section and field is optional; omitted values fall back to the
//! defaults below. [`FleetConfig::settings`] validates the file and
//! resolves it into the typed [`ControllerSettings`] the engine runs on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;
use crate::types::{
    BackendSetSpec, BalancingPolicy, HealthCheckSpec, HealthProtocol, WorkerFilter, WorkerSpec,
};

/// Errors from loading or validating a fleet configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse fleet.toml: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render fleet.toml: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub fleet: FleetSection,
    pub worker: WorkerSection,
    pub backend_set: BackendSetSection,
    pub timeouts: TimeoutsSection,
    pub policy: PolicySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSection {
    /// Fleet identity; keys the concurrency guard.
    pub name: String,
    /// Workers whose display name starts with this prefix form the fleet.
    pub name_prefix: String,
    pub min_instances: u32,
    pub max_instances: u32,
    /// Port the workers serve on; backends are registered as `ip:app_port`.
    pub app_port: u16,
}

impl Default for FleetSection {
    fn default() -> Self {
        Self {
            name: "autoscaling-demo".to_string(),
            name_prefix: "autoscaling-demo-instance".to_string(),
            min_instances: 1,
            max_instances: 5,
            app_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub shape: String,
    pub ocpus: f32,
    pub memory_gb: f32,
    pub image: String,
    pub container_name: String,
    pub env: HashMap<String, String>,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            shape: "CI.Standard.E4.Flex".to_string(),
            ocpus: 1.0,
            memory_gb: 8.0,
            image: "ci-autoscaling:latest".to_string(),
            container_name: "autoscaling-demo".to_string(),
            env: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSetSection {
    pub name: String,
    pub policy: BalancingPolicy,
    pub health_check: HealthCheckSection,
}

impl Default for BackendSetSection {
    fn default() -> Self {
        Self {
            name: "autoscaling-demo-backend-set".to_string(),
            policy: BalancingPolicy::RoundRobin,
            health_check: HealthCheckSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckSection {
    pub protocol: HealthProtocol,
    /// Defaults to `fleet.app_port`.
    pub port: Option<u16>,
    pub path: String,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
    pub return_code: u16,
}

impl Default for HealthCheckSection {
    fn default() -> Self {
        Self {
            protocol: HealthProtocol::Http,
            port: None,
            path: "/actuator/health".to_string(),
            interval: "10s".to_string(),
            timeout: "3s".to_string(),
            retries: 3,
            return_code: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    /// Upper bound on waiting for a new worker to become Ready.
    pub provision_ready: String,
    /// Upper bound on waiting for a removed backend to drain.
    pub backend_drain: String,
    /// Upper bound on acquiring the fleet guard.
    pub guard_acquire: String,
    /// Upper bound on confirming a deleted worker reached Terminated.
    pub deprovision: String,
    /// Interval between state polls.
    pub poll_interval: String,
    /// Upper bound on any single provisioning or load balancer call.
    pub call: String,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            provision_ready: "300s".to_string(),
            backend_drain: "20s".to_string(),
            guard_acquire: "30s".to_string(),
            deprovision: "120s".to_string(),
            poll_interval: "5s".to_string(),
            call: "30s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// Minimum age of the newest worker before another scale-up. "0s" disables.
    pub cooldown: String,
    /// Reject scale-up while any worker is still provisioning.
    pub single_flight_provisioning: bool,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            cooldown: "0s".to_string(),
            single_flight_provisioning: false,
        }
    }
}

/// Validated, typed view of a [`FleetConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub fleet_id: String,
    pub filter: WorkerFilter,
    pub min_instances: u32,
    pub max_instances: u32,
    pub app_port: u16,
    pub worker_spec: WorkerSpec,
    pub backend_set: BackendSetSpec,
    pub provision_ready_timeout: Duration,
    pub backend_drain_timeout: Duration,
    pub guard_acquire_timeout: Duration,
    pub deprovision_timeout: Duration,
    pub poll_interval: Duration,
    pub call_timeout: Duration,
    pub cooldown: Duration,
    pub single_flight_provisioning: bool,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a fleet.toml for a named fleet with the stock defaults.
    pub fn scaffold(name: &str, min_instances: u32, max_instances: u32) -> Self {
        FleetConfig {
            fleet: FleetSection {
                name: name.to_string(),
                name_prefix: format!("{name}-instance"),
                min_instances,
                max_instances,
                ..FleetSection::default()
            },
            backend_set: BackendSetSection {
                name: format!("{name}-backend-set"),
                ..BackendSetSection::default()
            },
            worker: WorkerSection {
                container_name: name.to_string(),
                ..WorkerSection::default()
            },
            ..FleetConfig::default()
        }
    }

    /// Validate and resolve into [`ControllerSettings`].
    pub fn settings(&self) -> Result<ControllerSettings, ConfigError> {
        let fleet = &self.fleet;
        if fleet.name.trim().is_empty() {
            return Err(ConfigError::Invalid("fleet.name must not be empty".into()));
        }
        if fleet.name_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("fleet.name_prefix must not be empty".into()));
        }
        if fleet.max_instances == 0 {
            return Err(ConfigError::Invalid("fleet.max_instances must be at least 1".into()));
        }
        if fleet.min_instances > fleet.max_instances {
            return Err(ConfigError::Invalid(format!(
                "fleet.min_instances ({}) exceeds fleet.max_instances ({})",
                fleet.min_instances, fleet.max_instances
            )));
        }
        if self.backend_set.name.trim().is_empty() {
            return Err(ConfigError::Invalid("backend_set.name must not be empty".into()));
        }

        let hc = &self.backend_set.health_check;
        let interval = duration_field("backend_set.health_check.interval", &hc.interval)?;
        let timeout = duration_field("backend_set.health_check.timeout", &hc.timeout)?;
        if hc.retries == 0 {
            return Err(ConfigError::Invalid(
                "backend_set.health_check.retries must be at least 1".into(),
            ));
        }
        if timeout >= interval {
            return Err(ConfigError::Invalid(
                "backend_set.health_check.timeout must be shorter than its interval".into(),
            ));
        }

        let t = &self.timeouts;
        let provision_ready_timeout = nonzero_duration("timeouts.provision_ready", &t.provision_ready)?;
        let backend_drain_timeout = duration_field("timeouts.backend_drain", &t.backend_drain)?;
        let guard_acquire_timeout = nonzero_duration("timeouts.guard_acquire", &t.guard_acquire)?;
        let deprovision_timeout = duration_field("timeouts.deprovision", &t.deprovision)?;
        let poll_interval = nonzero_duration("timeouts.poll_interval", &t.poll_interval)?;
        let call_timeout = nonzero_duration("timeouts.call", &t.call)?;
        let cooldown = duration_field("policy.cooldown", &self.policy.cooldown)?;

        Ok(ControllerSettings {
            fleet_id: fleet.name.clone(),
            filter: WorkerFilter::new(fleet.name_prefix.clone()),
            min_instances: fleet.min_instances,
            max_instances: fleet.max_instances,
            app_port: fleet.app_port,
            worker_spec: WorkerSpec {
                shape: self.worker.shape.clone(),
                ocpus: self.worker.ocpus,
                memory_gb: self.worker.memory_gb,
                image: self.worker.image.clone(),
                container_name: self.worker.container_name.clone(),
                env: self.worker.env.clone(),
            },
            backend_set: BackendSetSpec {
                name: self.backend_set.name.clone(),
                policy: self.backend_set.policy,
                health_check: HealthCheckSpec {
                    protocol: hc.protocol,
                    port: hc.port.unwrap_or(fleet.app_port),
                    path: hc.path.clone(),
                    interval_ms: interval.as_millis() as u64,
                    timeout_ms: timeout.as_millis() as u64,
                    retries: hc.retries,
                    return_code: hc.return_code,
                },
            },
            provision_ready_timeout,
            backend_drain_timeout,
            guard_acquire_timeout,
            deprovision_timeout,
            poll_interval,
            call_timeout,
            cooldown,
            single_flight_provisioning: self.policy.single_flight_provisioning,
        })
    }
}

/// Longest duration any field accepts.
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 3600);

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let d = parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })?;
    if d > MAX_DURATION {
        return Err(ConfigError::Invalid(format!(
            "{field} must not exceed {}s",
            MAX_DURATION.as_secs()
        )));
    }
    Ok(d)
}

fn nonzero_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let d = duration_field(field, value)?;
    if d.is_zero() {
        return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
    }
    Ok(d)
}
