//! Alarm notification parsing.
//!
//! The metrics pipeline delivers threshold crossings as alarm
//! notifications. A transition into FIRING asks for more capacity; a
//! transition back to OK releases it. The metric that fired (CPU, memory,
//! backend-health ratio) only flavours the trigger's reason.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Direction, ScaleTrigger};

/// Errors from decoding an alarm notification.
#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("malformed alarm notification: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Alarm state transition carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmTransition {
    OkToFiring,
    FiringToOk,
    /// Re-notification while still firing.
    Repeat,
    /// Alarm was reset or deleted; carries no scaling intent.
    Reset,
}

/// Per-alarm metadata attached to a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

/// An alarm notification as delivered by the eventing transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmNotification {
    #[serde(rename = "type")]
    pub transition: AlarmTransition,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub timestamp_epoch_millis: Option<u64>,
    #[serde(default)]
    pub alarm_meta_data: Vec<AlarmMetadata>,
}

impl AlarmNotification {
    /// Decode a notification body.
    pub fn parse(body: &[u8]) -> Result<Self, AlarmError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Scaling direction implied by the transition, if any.
    pub fn direction(&self) -> Option<Direction> {
        match self.transition {
            AlarmTransition::OkToFiring | AlarmTransition::Repeat => Some(Direction::Up),
            AlarmTransition::FiringToOk => Some(Direction::Down),
            AlarmTransition::Reset => None,
        }
    }

    /// Name of the metric family that fired, guessed from title and query.
    pub fn metric(&self) -> &'static str {
        let mut haystack = self.title.to_ascii_lowercase();
        for meta in &self.alarm_meta_data {
            if let Some(q) = &meta.query {
                haystack.push(' ');
                haystack.push_str(&q.to_ascii_lowercase());
            }
        }
        if haystack.contains("cpu") {
            "cpu"
        } else if haystack.contains("memory") || haystack.contains("mem") {
            "memory"
        } else if haystack.contains("health") || haystack.contains("backend") {
            "backend_health"
        } else {
            "unknown"
        }
    }

    /// Convert into a scale trigger. `Reset` yields `None`.
    pub fn into_trigger(self) -> Option<ScaleTrigger> {
        let direction = self.direction()?;
        let reason = format!(
            "{} alarm {:?}: {}",
            self.metric(),
            self.transition,
            self.title
        );
        let mut trigger = ScaleTrigger::new(direction, reason);
        if let Some(ts) = self.timestamp_epoch_millis {
            trigger.timestamp = ts;
        }
        Some(trigger)
    }
}
