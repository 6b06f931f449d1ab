//! Domain types for the fleetgrid control plane.
//!
//! `Cluster` and `WorkloadRef` are persisted in the registry. The
//! `StatusReport` family is transient: each report is the cluster's
//! current snapshot as pushed by its in-cluster agent, consumed once to
//! produce a capacity verdict and a status transition, never stored.

use serde::{Deserialize, Serialize};

/// Internal identifier of a cluster (control-plane generated).
pub type ClusterId = String;

// ── Cluster ────────────────────────────────────────────────────────

/// One data-plane cluster in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    /// Cloud-provider assigned identifier. Set exactly once, when the
    /// create call is accepted, and never changed afterwards.
    pub external_id: Option<String>,
    pub cloud_provider: String,
    pub region: String,
    pub multi_az: bool,
    /// Cluster runs in a customer-owned cloud account.
    pub byoc: bool,
    pub managed: bool,
    pub status: ClusterStatus,
    pub identity_provider_id: Option<String>,
    pub cluster_dns: Option<String>,
    /// Target node count of an in-flight compute resize. Present exactly
    /// while the cluster is `compute_node_scaling_up`.
    pub desired_nodes: Option<u32>,
    /// Epoch seconds since the orchestrator first observed the cluster
    /// ready with zero workloads. Cleared when a workload appears.
    pub empty_since: Option<u64>,
    /// Optimistic concurrency token, bumped by every registry update.
    pub version: u64,
    /// Unix timestamp (seconds) when this row was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last update.
    pub updated_at: u64,
}

/// Lifecycle status of a cluster.
///
/// The set is closed: transitions are validated against the table in
/// `fleet-lifecycle`, and unknown statuses cannot be deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    /// Create request recorded; no cloud call issued yet.
    Accepted,
    /// Cloud provider accepted the create call and is building the cluster.
    Provisioning,
    /// The underlying cloud cluster is up.
    Provisioned,
    /// Waiting for the in-cluster agent's first (or next healthy) report.
    WaitingForAgent,
    /// Accepting workloads, capacity remaining.
    Ready,
    /// No remaining capacity in at least one tracked dimension.
    Full,
    /// A compute-node resize is in flight.
    ComputeNodeScalingUp,
    /// Reclaim decided; cloud delete call being issued.
    Deprovisioning,
    /// Cloud delete issued; awaiting teardown confirmation.
    Cleanup,
    /// Unrecoverable provisioning error. Terminal; operator attention.
    Failed,
}

impl ClusterStatus {
    /// Statuses in which the cluster's agent is expected to push reports.
    pub fn accepts_reports(self) -> bool {
        matches!(
            self,
            ClusterStatus::WaitingForAgent
                | ClusterStatus::Ready
                | ClusterStatus::Full
                | ClusterStatus::ComputeNodeScalingUp
        )
    }

    /// Statuses counted as hosting (or able to host) workloads when the
    /// orchestrator sizes the fleet.
    pub fn hosts_workloads(self) -> bool {
        matches!(
            self,
            ClusterStatus::Ready | ClusterStatus::Full | ClusterStatus::ComputeNodeScalingUp
        )
    }

    /// A cluster on its way up — counts as pending fleet capacity.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            ClusterStatus::Accepted
                | ClusterStatus::Provisioning
                | ClusterStatus::Provisioned
                | ClusterStatus::WaitingForAgent
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ClusterStatus::Failed
    }
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClusterStatus::Accepted => "accepted",
            ClusterStatus::Provisioning => "provisioning",
            ClusterStatus::Provisioned => "provisioned",
            ClusterStatus::WaitingForAgent => "waiting_for_agent",
            ClusterStatus::Ready => "ready",
            ClusterStatus::Full => "full",
            ClusterStatus::ComputeNodeScalingUp => "compute_node_scaling_up",
            ClusterStatus::Deprovisioning => "deprovisioning",
            ClusterStatus::Cleanup => "cleanup",
            ClusterStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ── Workload references ────────────────────────────────────────────

/// A tenant workload placed on a cluster.
///
/// The registry only tracks the reference; workload CRUD and placement
/// live outside this crate. A cluster with any active reference is never
/// reclaimed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadRef {
    pub id: String,
    pub cluster_id: ClusterId,
    pub active: bool,
}

impl WorkloadRef {
    /// Key for the workloads table; prefixing by cluster id makes
    /// per-cluster scans a prefix walk.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.cluster_id, self.id)
    }
}

// ── Status reports ─────────────────────────────────────────────────

/// One readiness condition reported by the agent, e.g. `Ready=True`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportCondition {
    /// Condition type, e.g. "Ready".
    pub kind: String,
    /// Boolean-ish status string: "True", "False", "Unknown".
    pub status: String,
}

/// Per-dimension capacity figures. A `None` dimension means the agent
/// reported no information for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CapacityVector {
    pub connections: Option<i64>,
    pub partitions: Option<i64>,
    pub throughput_mbps: Option<i64>,
    pub data_retention_gib: Option<i64>,
}

impl CapacityVector {
    /// The tracked dimensions with their names, for iteration and logs.
    pub fn dimensions(&self) -> [(&'static str, Option<i64>); 4] {
        [
            ("connections", self.connections),
            ("partitions", self.partitions),
            ("throughput_mbps", self.throughput_mbps),
            ("data_retention_gib", self.data_retention_gib),
        ]
    }
}

/// Compute-node sizing as reported by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeReport {
    /// Nodes currently running.
    pub current: u32,
    /// Minimum node count permitted by the provider/account.
    pub floor: u32,
    /// Maximum node count permitted by the provider/account.
    pub ceiling: u32,
    /// Nodes required just to hold the existing workload; scale-down
    /// must never cross this.
    pub current_workload_minimum: u32,
}

/// What one resize step yields, as reported by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResizeReport {
    /// Node count change of one scaling step.
    pub node_delta: u32,
    /// Capacity gained (or lost) per step, per dimension.
    pub delta: CapacityVector,
}

/// One ingestion event from a cluster's agent.
///
/// Reports are idempotent snapshots: arrival order across reports from
/// the same cluster is not guaranteed, and each one fully describes the
/// cluster's current capacity rather than a delta to apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub cluster_id: ClusterId,
    pub conditions: Vec<ReportCondition>,
    pub total: CapacityVector,
    pub remaining: CapacityVector,
    pub node_info: NodeReport,
    pub resize_info: ResizeReport,
}

impl StatusReport {
    /// Whether the agent reports itself ready: the condition of kind
    /// `Ready` carries the status string `"True"`.
    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .find(|c| c.kind.eq_ignore_ascii_case("ready"))
            .is_some_and(|c| c.status.eq_ignore_ascii_case("true"))
    }
}
