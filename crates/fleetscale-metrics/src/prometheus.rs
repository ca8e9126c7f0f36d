//! Prometheus text exposition format.
//!
//! Renders decision counters and the current fleet size for scraping by
//! a Prometheus server or compatible agent.

use crate::decisions::DecisionSnapshot;

/// Render a snapshot into Prometheus text format.
///
/// Every series carries a `fleet` label. `fleet_size` is omitted when the
/// inventory could not be read.
pub fn render_prometheus(fleet: &str, snapshot: &DecisionSnapshot, fleet_size: Option<usize>) -> String {
    let mut out = String::new();

    out.push_str("# HELP fleetscale_decisions_total Scale decisions by direction and outcome.\n");
    out.push_str("# TYPE fleetscale_decisions_total counter\n");
    for (direction, kind, n) in &snapshot.decisions {
        out.push_str(&format!(
            "fleetscale_decisions_total{{fleet=\"{fleet}\",direction=\"{direction}\",outcome=\"{kind}\"}} {n}\n"
        ));
    }

    out.push_str("# HELP fleetscale_rejections_total Rejected decisions by reason.\n");
    out.push_str("# TYPE fleetscale_rejections_total counter\n");
    for (reason, n) in &snapshot.rejections {
        out.push_str(&format!(
            "fleetscale_rejections_total{{fleet=\"{fleet}\",reason=\"{reason}\"}} {n}\n"
        ));
    }

    out.push_str("# HELP fleetscale_failures_total Failed decisions by reason.\n");
    out.push_str("# TYPE fleetscale_failures_total counter\n");
    for (reason, n) in &snapshot.failures {
        out.push_str(&format!(
            "fleetscale_failures_total{{fleet=\"{fleet}\",reason=\"{reason}\"}} {n}\n"
        ));
    }

    out.push_str("# HELP fleetscale_partial_failures_total Decisions that left fleet and backend set diverged.\n");
    out.push_str("# TYPE fleetscale_partial_failures_total counter\n");
    for (kind, n) in &snapshot.partials {
        out.push_str(&format!(
            "fleetscale_partial_failures_total{{fleet=\"{fleet}\",kind=\"{kind}\"}} {n}\n"
        ));
    }

    out.push_str("# HELP fleetscale_reconcile_sweeps_total Reconciliation sweeps attempted.\n");
    out.push_str("# TYPE fleetscale_reconcile_sweeps_total counter\n");
    out.push_str(&format!(
        "fleetscale_reconcile_sweeps_total{{fleet=\"{fleet}\"}} {}\n",
        snapshot.reconcile_sweeps
    ));

    out.push_str("# HELP fleetscale_reconcile_errors_total Reconciliation sweeps that could not run.\n");
    out.push_str("# TYPE fleetscale_reconcile_errors_total counter\n");
    out.push_str(&format!(
        "fleetscale_reconcile_errors_total{{fleet=\"{fleet}\"}} {}\n",
        snapshot.reconcile_errors
    ));

    out.push_str("# HELP fleetscale_reconcile_backends_total Backends changed by reconciliation.\n");
    out.push_str("# TYPE fleetscale_reconcile_backends_total counter\n");
    out.push_str(&format!(
        "fleetscale_reconcile_backends_total{{fleet=\"{fleet}\",action=\"registered\"}} {}\n",
        snapshot.reconcile_registered
    ));
    out.push_str(&format!(
        "fleetscale_reconcile_backends_total{{fleet=\"{fleet}\",action=\"deregistered\"}} {}\n",
        snapshot.reconcile_deregistered
    ));

    if let Some(size) = fleet_size {
        out.push_str("# HELP fleetscale_fleet_size Live workers in the fleet.\n");
        out.push_str("# TYPE fleetscale_fleet_size gauge\n");
        out.push_str(&format!("fleetscale_fleet_size{{fleet=\"{fleet}\"}} {size}\n"));
    }

    out
}
