//! Dev-mode agent simulator.
//!
//! In a real deployment each data-plane cluster runs an agent that
//! pushes status reports through the management API. With
//! `--simulate-agents`, this loop plays that role against the simulated
//! cloud provider so a fresh checkout demonstrates the whole control
//! loop: clusters bootstrap, go ready, and scale with the synthetic
//! workload count.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleet_cloud::CloudProvider;
use fleet_reconciler::ReportIngestor;
use fleet_registry::{
    CapacityVector, Cluster, ClusterRegistry, NodeReport, ReportCondition, ResizeReport,
    StatusReport,
};

/// Synthetic sizing: what one compute node is worth, per dimension.
const CONNECTIONS_PER_NODE: i64 = 1000;
const PARTITIONS_PER_NODE: i64 = 1500;
const THROUGHPUT_PER_NODE: i64 = 50;
const RETENTION_PER_NODE: i64 = 500;

/// Synthetic cost of one placed workload, per dimension.
const CONNECTIONS_PER_WORKLOAD: i64 = 100;
const PARTITIONS_PER_WORKLOAD: i64 = 150;
const THROUGHPUT_PER_WORKLOAD: i64 = 5;
const RETENTION_PER_WORKLOAD: i64 = 50;

const NODE_FLOOR: u32 = 3;
const NODE_CEILING: u32 = 18;
const NODE_DELTA: u32 = 3;

/// Run the simulated agents until shutdown.
pub async fn run(
    registry: ClusterRegistry,
    ingestor: Arc<ReportIngestor>,
    cloud: Arc<dyn CloudProvider>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "agent simulator started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = tick(&registry, &ingestor, &cloud).await {
                    warn!(error = %e, "agent simulator tick failed");
                }
            }
            _ = shutdown.changed() => {
                info!("agent simulator shutting down");
                break;
            }
        }
    }
}

/// One reporting round: every cluster with a live agent pushes a report.
async fn tick(
    registry: &ClusterRegistry,
    ingestor: &ReportIngestor,
    cloud: &Arc<dyn CloudProvider>,
) -> anyhow::Result<()> {
    let now = epoch_secs();

    for cluster in registry.list_clusters()? {
        if !cluster.status.accepts_reports() {
            continue;
        }
        let Some(external_id) = cluster.external_id.clone() else {
            continue;
        };

        let nodes = match cloud.get_cluster(&external_id).await {
            Ok(state) => state.compute_nodes,
            Err(e) => {
                debug!(cluster_id = %cluster.id, error = %e, "agent cannot see its cluster");
                continue;
            }
        };
        let workloads = registry.count_active_workloads(&cluster.id)?;
        let report = synthesize_report(&cluster, nodes, workloads);

        match ingestor.process_report(&report, now).await {
            Ok(status) => {
                debug!(cluster_id = %cluster.id, %status, nodes, workloads, "simulated report applied")
            }
            Err(e) => debug!(cluster_id = %cluster.id, error = %e, "simulated report rejected"),
        }
    }
    Ok(())
}

/// Build a snapshot report from the cluster's node count and its
/// synthetic workload usage.
fn synthesize_report(cluster: &Cluster, nodes: u32, workloads: usize) -> StatusReport {
    let nodes_i = i64::from(nodes);
    let used = workloads as i64;

    let total = CapacityVector {
        connections: Some(nodes_i * CONNECTIONS_PER_NODE),
        partitions: Some(nodes_i * PARTITIONS_PER_NODE),
        throughput_mbps: Some(nodes_i * THROUGHPUT_PER_NODE),
        data_retention_gib: Some(nodes_i * RETENTION_PER_NODE),
    };
    let remaining = CapacityVector {
        connections: Some(nodes_i * CONNECTIONS_PER_NODE - used * CONNECTIONS_PER_WORKLOAD),
        partitions: Some(nodes_i * PARTITIONS_PER_NODE - used * PARTITIONS_PER_WORKLOAD),
        throughput_mbps: Some(nodes_i * THROUGHPUT_PER_NODE - used * THROUGHPUT_PER_WORKLOAD),
        data_retention_gib: Some(nodes_i * RETENTION_PER_NODE - used * RETENTION_PER_WORKLOAD),
    };
    let delta = CapacityVector {
        connections: Some(i64::from(NODE_DELTA) * CONNECTIONS_PER_NODE),
        partitions: Some(i64::from(NODE_DELTA) * PARTITIONS_PER_NODE),
        throughput_mbps: Some(i64::from(NODE_DELTA) * THROUGHPUT_PER_NODE),
        data_retention_gib: Some(i64::from(NODE_DELTA) * RETENTION_PER_NODE),
    };

    // Enough nodes to hold the current workloads, never below the floor.
    let workload_minimum =
        NODE_FLOOR.max(((used * CONNECTIONS_PER_WORKLOAD) / CONNECTIONS_PER_NODE + 1) as u32);

    StatusReport {
        cluster_id: cluster.id.clone(),
        conditions: vec![ReportCondition {
            kind: "Ready".to_string(),
            status: "True".to_string(),
        }],
        total,
        remaining,
        node_info: NodeReport {
            current: nodes,
            floor: NODE_FLOOR,
            ceiling: NODE_CEILING,
            current_workload_minimum: workload_minimum,
        },
        resize_info: ResizeReport {
            node_delta: NODE_DELTA,
            delta,
        },
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
