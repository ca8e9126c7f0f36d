//! Decision counters.
//!
//! Lock-free: every counter is an `AtomicU64` indexed by a small enum,
//! so recording from many decision tasks never contends.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use fleet_core::{Direction, ScaleTrigger};
use fleetscale_engine::{
    DecisionObserver, FailureReason, PartialKind, ReconcileStats, RejectReason, ScaleOutcome,
};

pub const OUTCOME_KINDS: [&str; 4] = ["succeeded", "rejected", "failed", "partial"];
const DIRECTIONS: [Direction; 2] = [Direction::Up, Direction::Down];

fn direction_index(direction: Direction) -> usize {
    match direction {
        Direction::Up => 0,
        Direction::Down => 1,
    }
}

fn kind_index(outcome: &ScaleOutcome) -> usize {
    match outcome {
        ScaleOutcome::Succeeded { .. } => 0,
        ScaleOutcome::Rejected { .. } => 1,
        ScaleOutcome::Failed { .. } => 2,
        ScaleOutcome::PartialFailure { .. } => 3,
    }
}

fn position<T: PartialEq>(all: &[T], value: &T) -> usize {
    all.iter().position(|v| v == value).unwrap_or(0)
}

/// Counters for every decision and sweep since start.
#[derive(Debug, Default)]
pub struct DecisionMetrics {
    /// [direction][outcome kind]
    decisions: [[AtomicU64; 4]; 2],
    rejections: [AtomicU64; 5],
    failures: [AtomicU64; 5],
    partials: [AtomicU64; 2],
    reconcile_sweeps: AtomicU64,
    reconcile_errors: AtomicU64,
    reconcile_registered: AtomicU64,
    reconcile_deregistered: AtomicU64,
}

/// Point-in-time copy of [`DecisionMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionSnapshot {
    pub decisions: Vec<(Direction, &'static str, u64)>,
    pub rejections: Vec<(RejectReason, u64)>,
    pub failures: Vec<(FailureReason, u64)>,
    pub partials: Vec<(PartialKind, u64)>,
    pub reconcile_sweeps: u64,
    pub reconcile_errors: u64,
    pub reconcile_registered: u64,
    pub reconcile_deregistered: u64,
}

impl DecisionSnapshot {
    /// Decisions with the given direction and outcome kind.
    pub fn decisions_for(&self, direction: Direction, kind: &str) -> u64 {
        self.decisions
            .iter()
            .find(|(d, k, _)| *d == direction && *k == kind)
            .map(|(_, _, n)| *n)
            .unwrap_or(0)
    }

    pub fn rejections_for(&self, reason: RejectReason) -> u64 {
        self.rejections
            .iter()
            .find(|(r, _)| *r == reason)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

impl DecisionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one decision outcome.
    pub fn record(&self, direction: Direction, outcome: &ScaleOutcome) {
        self.decisions[direction_index(direction)][kind_index(outcome)]
            .fetch_add(1, Ordering::Relaxed);

        match outcome {
            ScaleOutcome::Rejected { reason, .. } => {
                self.rejections[position(&RejectReason::ALL, reason)].fetch_add(1, Ordering::Relaxed);
            }
            ScaleOutcome::Failed { reason, .. } => {
                self.failures[position(&FailureReason::ALL, reason)].fetch_add(1, Ordering::Relaxed);
            }
            ScaleOutcome::PartialFailure { kind, .. } => {
                self.partials[position(&PartialKind::ALL, kind)].fetch_add(1, Ordering::Relaxed);
            }
            ScaleOutcome::Succeeded { .. } => {}
        }
        trace!(%direction, outcome = outcome.kind(), "decision recorded");
    }

    pub fn record_reconcile(&self, stats: &ReconcileStats) {
        self.reconcile_sweeps.fetch_add(1, Ordering::Relaxed);
        self.reconcile_registered
            .fetch_add(stats.registered as u64, Ordering::Relaxed);
        self.reconcile_deregistered
            .fetch_add(stats.deregistered as u64, Ordering::Relaxed);
    }

    /// Count a sweep that could not run (guard timeout, inventory outage).
    pub fn record_reconcile_error(&self) {
        self.reconcile_sweeps.fetch_add(1, Ordering::Relaxed);
        self.reconcile_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DecisionSnapshot {
        let mut decisions = Vec::with_capacity(8);
        for direction in DIRECTIONS {
            for (k, kind) in OUTCOME_KINDS.iter().enumerate() {
                let n = self.decisions[direction_index(direction)][k].load(Ordering::Relaxed);
                decisions.push((direction, *kind, n));
            }
        }

        DecisionSnapshot {
            decisions,
            rejections: RejectReason::ALL
                .iter()
                .zip(&self.rejections)
                .map(|(r, n)| (*r, n.load(Ordering::Relaxed)))
                .collect(),
            failures: FailureReason::ALL
                .iter()
                .zip(&self.failures)
                .map(|(r, n)| (*r, n.load(Ordering::Relaxed)))
                .collect(),
            partials: PartialKind::ALL
                .iter()
                .zip(&self.partials)
                .map(|(k, n)| (*k, n.load(Ordering::Relaxed)))
                .collect(),
            reconcile_sweeps: self.reconcile_sweeps.load(Ordering::Relaxed),
            reconcile_errors: self.reconcile_errors.load(Ordering::Relaxed),
            reconcile_registered: self.reconcile_registered.load(Ordering::Relaxed),
            reconcile_deregistered: self.reconcile_deregistered.load(Ordering::Relaxed),
        }
    }
}

impl DecisionObserver for DecisionMetrics {
    fn on_decision(&self, trigger: &ScaleTrigger, outcome: &ScaleOutcome) {
        self.record(trigger.direction, outcome);
    }

    fn on_reconcile(&self, stats: &ReconcileStats) {
        self.record_reconcile(stats);
    }
}
