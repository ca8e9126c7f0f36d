//! fleet-core — shared vocabulary for the fleetscale controller.
//!
//! Holds the domain types every other crate speaks (workers, backend
//! sets, triggers), the two collaborator traits the decision engine is
//! written against, alarm notification parsing, and the `fleet.toml`
//! configuration.

pub mod alarm;
pub mod config;
pub mod duration;
pub mod provider;
pub mod types;

pub use alarm::{AlarmError, AlarmNotification, AlarmTransition};
pub use config::{ConfigError, ControllerSettings, FleetConfig};
pub use duration::parse_duration;
pub use provider::{LoadBalancerApi, ProviderError, ProviderFuture, ProviderResult, ProvisioningApi};
pub use types::*;
