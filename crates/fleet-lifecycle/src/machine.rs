//! Cluster state machine — transition table and report-driven derivation.
//!
//! Statuses form the lifecycle
//! `accepted → provisioning → provisioned → waiting_for_agent → ready ⇄
//! full ⇄ compute_node_scaling_up → deprovisioning → cleanup → (removed)`,
//! with `failed` reachable from every non-terminal status. Re-applying
//! the current status is always legal: reports are delivered at least
//! once and a repeat write must be a no-op, not an error.

use thiserror::Error;
use tracing::debug;

use fleet_capacity::{CapacityVerdict, ScaleDecision};
use fleet_registry::{Cluster, ClusterStatus};

/// Rejected status change.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal cluster transition {from} -> {to}")]
    Invalid {
        from: ClusterStatus,
        to: ClusterStatus,
    },
}

/// Whether moving `from → to` is legal.
///
/// Self-transitions are always allowed (idempotent re-application).
pub fn allowed(from: ClusterStatus, to: ClusterStatus) -> bool {
    use fleet_registry::ClusterStatus::*;

    if from == to {
        return !from.is_terminal();
    }
    // Any non-terminal status may fail.
    if to == Failed {
        return !from.is_terminal();
    }

    match (from, to) {
        (Accepted, Provisioning) => true,
        (Provisioning, Provisioned) => true,
        (Provisioned, WaitingForAgent) => true,
        // First healthy report; a full verdict on the very first report
        // is legal too.
        (WaitingForAgent, Ready) | (WaitingForAgent, Full) => true,
        // Report-driven capacity churn.
        (Ready, Full) | (Full, Ready) => true,
        (Ready, ComputeNodeScalingUp) | (Full, ComputeNodeScalingUp) => true,
        (ComputeNodeScalingUp, Ready) | (ComputeNodeScalingUp, Full) => true,
        // Agent lost from any report-accepting status.
        (Ready, WaitingForAgent)
        | (Full, WaitingForAgent)
        | (ComputeNodeScalingUp, WaitingForAgent) => true,
        // Reclaim path.
        (Ready, Deprovisioning) | (Full, Deprovisioning) => true,
        (Deprovisioning, Cleanup) => true,
        _ => false,
    }
}

/// Apply a status change to a cluster, validating it against the table.
///
/// Self-transitions succeed without touching `updated_at`, so applying
/// the same report twice leaves the row byte-identical.
pub fn transition(
    cluster: &mut Cluster,
    to: ClusterStatus,
    now: u64,
) -> Result<(), TransitionError> {
    let from = cluster.status;
    if !allowed(from, to) {
        return Err(TransitionError::Invalid { from, to });
    }
    if from != to {
        debug!(cluster_id = %cluster.id, %from, %to, "cluster status transition");
        cluster.status = to;
        cluster.updated_at = now;
    }
    Ok(())
}

/// Derive the status a report moves the cluster to.
///
/// Only meaningful for statuses that accept reports. The rules, in
/// priority order:
/// 1. An agent reporting `Ready=False` forces `waiting_for_agent`,
///    whatever the capacity numbers say.
/// 2. A scale-up decision moves to `compute_node_scaling_up`.
/// 3. An unfinished in-flight resize keeps `compute_node_scaling_up`.
/// 4. Otherwise the capacity verdict picks `full` or `ready`.
pub fn status_after_report(
    current: ClusterStatus,
    agent_ready: bool,
    verdict: CapacityVerdict,
    decision: ScaleDecision,
    resize_in_flight: bool,
) -> ClusterStatus {
    if !agent_ready {
        return ClusterStatus::WaitingForAgent;
    }
    if matches!(decision, ScaleDecision::ScaleUp { .. }) {
        return ClusterStatus::ComputeNodeScalingUp;
    }
    if current == ClusterStatus::ComputeNodeScalingUp && resize_in_flight {
        return ClusterStatus::ComputeNodeScalingUp;
    }
    match verdict {
        CapacityVerdict::Full => ClusterStatus::Full,
        CapacityVerdict::HasCapacity => ClusterStatus::Ready,
    }
}
