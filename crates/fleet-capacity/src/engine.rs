//! Autoscaling decision engine — verdict in, node-count change out.
//!
//! Translates a capacity verdict plus the agent's node-sizing and resize
//! info into at most one scale action. Oscillation is damped three ways:
//! scale-up is checked before scale-down and the two can never both fire,
//! scale-down requires a full resize step of surplus in every reported
//! dimension (the safety margin), and an in-flight resize suppresses any
//! new decision until the agent reports the requested node count.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fleet_registry::StatusReport;

use crate::evaluator::CapacityVerdict;

/// How compute-node counts are managed for a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Fixed node count set by an operator; the engine never acts.
    #[default]
    Manual,
    /// Dynamic autoscaling driven by agent reports.
    Auto,
}

/// Engine tuning, threaded in at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub mode: ScalingMode,
    /// Scale-down fires only when every reported dimension retains more
    /// than `resize_delta × margin` of remaining capacity.
    pub scale_down_margin: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ScalingMode::Manual,
            scale_down_margin: 1.0,
        }
    }
}

/// A compute-node scaling decision for a single cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// No change needed (or none possible at the node level).
    NoOp,
    /// Resize up to the given node count.
    ScaleUp { target: u32 },
    /// Resize down to the given node count.
    ScaleDown { target: u32 },
}

impl ScaleDecision {
    /// Target node count, if this decision changes anything.
    pub fn target(&self) -> Option<u32> {
        match self {
            ScaleDecision::NoOp => None,
            ScaleDecision::ScaleUp { target } | ScaleDecision::ScaleDown { target } => {
                Some(*target)
            }
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, ScaleDecision::NoOp)
    }
}

/// The decision engine. Pure; owns only its configuration.
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    config: EngineConfig,
}

impl DecisionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Decide the node-count change for one evaluated report.
    ///
    /// `resize_in_flight` is true while a previously requested resize has
    /// not yet shown up in the agent's reported node count; any new
    /// decision is suppressed until it does.
    pub fn decide(
        &self,
        verdict: CapacityVerdict,
        report: &StatusReport,
        resize_in_flight: bool,
    ) -> ScaleDecision {
        if self.config.mode == ScalingMode::Manual {
            return ScaleDecision::NoOp;
        }
        if resize_in_flight {
            debug!(cluster_id = %report.cluster_id, "resize in flight, holding scale decisions");
            return ScaleDecision::NoOp;
        }

        let nodes = &report.node_info;
        let step = report.resize_info.node_delta;
        if step == 0 {
            warn!(cluster_id = %report.cluster_id, "report carries zero node delta, cannot scale");
            return ScaleDecision::NoOp;
        }

        // Scale-up first: when both paths could apply the safety bias is
        // toward more headroom.
        if verdict == CapacityVerdict::Full {
            if nodes.current < nodes.ceiling {
                let target = nodes.ceiling.min(nodes.current + step);
                debug!(
                    cluster_id = %report.cluster_id,
                    from = nodes.current,
                    to = target,
                    "scaling up compute nodes"
                );
                return ScaleDecision::ScaleUp { target };
            }
            // At the ceiling there is no node-level remedy; the fleet
            // orchestrator sees the cluster as full and scales out.
            debug!(
                cluster_id = %report.cluster_id,
                ceiling = nodes.ceiling,
                "full at node ceiling, deferring to fleet scale-out"
            );
            return ScaleDecision::NoOp;
        }

        // Scale-down: only when removing one resize step's worth of
        // capacity would still leave surplus in every reported dimension.
        let lower_bound = nodes.floor.max(nodes.current_workload_minimum);
        if nodes.current > lower_bound && self.has_scale_down_surplus(report) {
            let target = lower_bound.max(nodes.current.saturating_sub(step));
            if target < nodes.current {
                debug!(
                    cluster_id = %report.cluster_id,
                    from = nodes.current,
                    to = target,
                    "scaling down compute nodes"
                );
                return ScaleDecision::ScaleDown { target };
            }
        }

        ScaleDecision::NoOp
    }

    /// Every tracked dimension must be reported, have a known resize
    /// delta, and retain more than `delta × margin` remaining. A
    /// dimension with unknown remaining or unknown delta cannot assert
    /// surplus and vetoes scale-down.
    fn has_scale_down_surplus(&self, report: &StatusReport) -> bool {
        let margin = self.config.scale_down_margin;
        report
            .remaining
            .dimensions()
            .iter()
            .zip(report.resize_info.delta.dimensions().iter())
            .all(|((_, remaining), (_, delta))| match (remaining, delta) {
                (Some(r), Some(d)) => (*r as f64) > (*d as f64) * margin,
                _ => false,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_registry::{CapacityVector, NodeReport, ResizeReport, StatusReport};

    fn auto_engine() -> DecisionEngine {
        DecisionEngine::new(EngineConfig {
            mode: ScalingMode::Auto,
            scale_down_margin: 1.0,
        })
    }

    fn report(
        remaining: CapacityVector,
        nodes: NodeReport,
        node_delta: u32,
        delta: CapacityVector,
    ) -> StatusReport {
        StatusReport {
            cluster_id: "cluster-1".to_string(),
            conditions: vec![],
            total: CapacityVector::default(),
            remaining,
            node_info: nodes,
            resize_info: ResizeReport { node_delta, delta },
        }
    }

    fn full_vector(value: i64) -> CapacityVector {
        CapacityVector {
            connections: Some(value),
            partitions: Some(value),
            throughput_mbps: Some(value),
            data_retention_gib: Some(value),
        }
    }

    #[test]
    fn full_below_ceiling_scales_up_by_one_step() {
        // Ceiling 20, current 5, resize step 3 → scale up to 8.
        let report = report(
            CapacityVector {
                connections: Some(0),
                ..Default::default()
            },
            NodeReport {
                current: 5,
                floor: 3,
                ceiling: 20,
                current_workload_minimum: 3,
            },
            3,
            full_vector(10_000),
        );

        let decision = auto_engine().decide(CapacityVerdict::Full, &report, false);
        assert_eq!(decision, ScaleDecision::ScaleUp { target: 8 });
    }

    #[test]
    fn scale_up_clamped_to_ceiling() {
        let report = report(
            full_vector(0),
            NodeReport {
                current: 19,
                floor: 3,
                ceiling: 20,
                current_workload_minimum: 3,
            },
            3,
            full_vector(10_000),
        );

        let decision = auto_engine().decide(CapacityVerdict::Full, &report, false);
        assert_eq!(decision, ScaleDecision::ScaleUp { target: 20 });
    }

    #[test]
    fn full_at_ceiling_defers_to_fleet() {
        let report = report(
            full_vector(0),
            NodeReport {
                current: 20,
                floor: 3,
                ceiling: 20,
                current_workload_minimum: 3,
            },
            3,
            full_vector(10_000),
        );

        let decision = auto_engine().decide(CapacityVerdict::Full, &report, false);
        assert_eq!(decision, ScaleDecision::NoOp);
    }

    #[test]
    fn surplus_above_margin_scales_down_to_lower_bound() {
        // Floor 3, workload minimum 3, current 8, every dimension one
        // above the resize delta → scale down, bounded to 3.
        let report = report(
            full_vector(10_001),
            NodeReport {
                current: 8,
                floor: 3,
                ceiling: 20,
                current_workload_minimum: 3,
            },
            6,
            full_vector(10_000),
        );

        let decision = auto_engine().decide(CapacityVerdict::HasCapacity, &report, false);
        assert_eq!(decision, ScaleDecision::ScaleDown { target: 3 });
    }

    #[test]
    fn scale_down_never_crosses_workload_minimum() {
        // Workload minimum above floor is the binding bound.
        let report = report(
            full_vector(50_000),
            NodeReport {
                current: 8,
                floor: 3,
                ceiling: 20,
                current_workload_minimum: 5,
            },
            6,
            full_vector(10_000),
        );

        let decision = auto_engine().decide(CapacityVerdict::HasCapacity, &report, false);
        assert_eq!(decision, ScaleDecision::ScaleDown { target: 5 });
    }

    #[test]
    fn remaining_at_margin_does_not_scale_down() {
        // remaining == delta × margin is not surplus; strict inequality.
        let report = report(
            full_vector(10_000),
            NodeReport {
                current: 8,
                floor: 3,
                ceiling: 20,
                current_workload_minimum: 3,
            },
            3,
            full_vector(10_000),
        );

        let decision = auto_engine().decide(CapacityVerdict::HasCapacity, &report, false);
        assert_eq!(decision, ScaleDecision::NoOp);
    }

    #[test]
    fn missing_dimension_vetoes_scale_down() {
        let mut remaining = full_vector(50_000);
        remaining.throughput_mbps = None;
        let report = report(
            remaining,
            NodeReport {
                current: 8,
                floor: 3,
                ceiling: 20,
                current_workload_minimum: 3,
            },
            3,
            full_vector(10_000),
        );

        let decision = auto_engine().decide(CapacityVerdict::HasCapacity, &report, false);
        assert_eq!(decision, ScaleDecision::NoOp);
    }

    #[test]
    fn missing_resize_delta_vetoes_scale_down() {
        let mut delta = full_vector(10_000);
        delta.connections = None;
        let report = report(
            full_vector(50_000),
            NodeReport {
                current: 8,
                floor: 3,
                ceiling: 20,
                current_workload_minimum: 3,
            },
            3,
            delta,
        );

        let decision = auto_engine().decide(CapacityVerdict::HasCapacity, &report, false);
        assert_eq!(decision, ScaleDecision::NoOp);
    }

    #[test]
    fn at_lower_bound_never_scales_down() {
        let report = report(
            full_vector(50_000),
            NodeReport {
                current: 3,
                floor: 3,
                ceiling: 20,
                current_workload_minimum: 3,
            },
            3,
            full_vector(10_000),
        );

        let decision = auto_engine().decide(CapacityVerdict::HasCapacity, &report, false);
        assert_eq!(decision, ScaleDecision::NoOp);
    }

    #[test]
    fn manual_mode_always_noop() {
        let engine = DecisionEngine::new(EngineConfig {
            mode: ScalingMode::Manual,
            scale_down_margin: 1.0,
        });
        let report = report(
            full_vector(0),
            NodeReport {
                current: 5,
                floor: 3,
                ceiling: 20,
                current_workload_minimum: 3,
            },
            3,
            full_vector(10_000),
        );

        assert_eq!(
            engine.decide(CapacityVerdict::Full, &report, false),
            ScaleDecision::NoOp
        );
    }

    #[test]
    fn in_flight_resize_suppresses_decisions() {
        let report = report(
            full_vector(0),
            NodeReport {
                current: 5,
                floor: 3,
                ceiling: 20,
                current_workload_minimum: 3,
            },
            3,
            full_vector(10_000),
        );

        assert_eq!(
            auto_engine().decide(CapacityVerdict::Full, &report, true),
            ScaleDecision::NoOp
        );
    }

    #[test]
    fn zero_node_delta_is_noop() {
        let report = report(
            full_vector(0),
            NodeReport {
                current: 5,
                floor: 3,
                ceiling: 20,
                current_workload_minimum: 3,
            },
            0,
            full_vector(10_000),
        );

        assert_eq!(
            auto_engine().decide(CapacityVerdict::Full, &report, false),
            ScaleDecision::NoOp
        );
    }

    #[test]
    fn never_scales_up_and_down_for_same_input() {
        // An inconsistent report: one dimension exhausted, the others
        // far above the scale-down threshold. The full verdict wins and
        // only a scale-up is emitted.
        let mut remaining = full_vector(50_000);
        remaining.connections = Some(0);
        let report = report(
            remaining,
            NodeReport {
                current: 5,
                floor: 3,
                ceiling: 20,
                current_workload_minimum: 3,
            },
            3,
            full_vector(10_000),
        );

        let decision = auto_engine().decide(CapacityVerdict::Full, &report, false);
        assert!(matches!(decision, ScaleDecision::ScaleUp { .. }));
    }
}
