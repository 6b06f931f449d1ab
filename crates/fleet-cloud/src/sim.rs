//! Simulated cloud provider.
//!
//! An in-memory `CloudProvider` with the same eventually-consistent feel
//! as the real thing: creates take a few observations to become ready,
//! resizes show up one observation after they are requested, and deletes
//! take an observation to disappear. The world only advances when
//! `get_cluster` is called, which keeps tests deterministic without any
//! clock control.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::provider::{
    CloudClusterState, CloudClusterStatus, CloudError, CloudProvider, CloudResult,
    ClusterMetrics, ClusterSpec,
};

/// Simulation tuning.
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    /// `get_cluster` observations before a new cluster reports ready.
    pub install_polls: u32,
    /// Observations before a deleted cluster disappears.
    pub teardown_polls: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            install_polls: 2,
            teardown_polls: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimPhase {
    Installing,
    Ready,
    Deleting,
}

#[derive(Debug)]
struct SimCluster {
    phase: SimPhase,
    compute_nodes: u32,
    target_nodes: u32,
    polls_until_ready: u32,
    polls_until_gone: u32,
}

/// How many times each provider operation has been invoked.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimCallCounts {
    pub creates: u64,
    pub deletes: u64,
    pub resizes: u64,
}

#[derive(Debug, Default)]
struct SimState {
    clusters: HashMap<String, SimCluster>,
    next_id: u64,
    create_failure: Option<CloudError>,
    resize_failure: Option<CloudError>,
    delete_failure: Option<CloudError>,
    calls: SimCallCounts,
}

/// In-memory cloud provider for tests and dev mode.
#[derive(Debug, Default)]
pub struct SimulatedCloud {
    config: SimConfig,
    state: Mutex<SimState>,
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SimConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Make subsequent create calls fail with the given error, until
    /// cleared with `None`.
    pub fn set_create_failure(&self, failure: Option<CloudError>) {
        self.locked().create_failure = failure;
    }

    /// Make subsequent resize calls fail with the given error, until
    /// cleared with `None`.
    pub fn set_resize_failure(&self, failure: Option<CloudError>) {
        self.locked().resize_failure = failure;
    }

    /// Make subsequent delete calls fail with the given error, until
    /// cleared with `None`.
    pub fn set_delete_failure(&self, failure: Option<CloudError>) {
        self.locked().delete_failure = failure;
    }

    /// Number of clusters currently known to the provider.
    pub fn cluster_count(&self) -> usize {
        self.locked().clusters.len()
    }

    /// Target node count of a cluster, if it exists.
    pub fn target_nodes(&self, external_id: &str) -> Option<u32> {
        self.locked()
            .clusters
            .get(external_id)
            .map(|c| c.target_nodes)
    }

    /// Invocation counters for create/delete/resize.
    pub fn call_counts(&self) -> SimCallCounts {
        self.locked().calls
    }

    fn locked(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CloudProvider for SimulatedCloud {
    async fn create_cluster(&self, spec: &ClusterSpec) -> CloudResult<String> {
        let mut state = self.locked();
        state.calls.creates += 1;
        if let Some(failure) = &state.create_failure {
            return Err(failure.clone());
        }
        state.next_id += 1;
        let external_id = format!("ext-{:04}", state.next_id);
        let phase = if self.config.install_polls == 0 {
            SimPhase::Ready
        } else {
            SimPhase::Installing
        };
        state.clusters.insert(
            external_id.clone(),
            SimCluster {
                phase,
                compute_nodes: spec.base_nodes,
                target_nodes: spec.base_nodes,
                polls_until_ready: self.config.install_polls,
                polls_until_gone: self.config.teardown_polls,
            },
        );
        debug!(%external_id, name = %spec.name, region = %spec.region, "simulated cluster created");
        Ok(external_id)
    }

    async fn delete_cluster(&self, external_id: &str) -> CloudResult<()> {
        let mut state = self.locked();
        state.calls.deletes += 1;
        if let Some(failure) = &state.delete_failure {
            return Err(failure.clone());
        }
        if let Some(cluster) = state.clusters.get_mut(external_id) {
            cluster.phase = SimPhase::Deleting;
            debug!(%external_id, "simulated cluster deleting");
        }
        // Deleting an unknown cluster is a no-op; teardown is idempotent.
        Ok(())
    }

    async fn resize_compute(&self, external_id: &str, target_nodes: u32) -> CloudResult<()> {
        let mut state = self.locked();
        state.calls.resizes += 1;
        if let Some(failure) = &state.resize_failure {
            return Err(failure.clone());
        }
        match state.clusters.get_mut(external_id) {
            Some(cluster) => {
                cluster.target_nodes = target_nodes;
                debug!(%external_id, target_nodes, "simulated resize requested");
                Ok(())
            }
            None => Err(CloudError::NotFound(external_id.to_string())),
        }
    }

    async fn get_cluster(&self, external_id: &str) -> CloudResult<CloudClusterState> {
        let mut state = self.locked();
        let Some(cluster) = state.clusters.get_mut(external_id) else {
            return Err(CloudError::NotFound(external_id.to_string()));
        };

        // Snapshot first, then advance the world by one observation.
        let snapshot = CloudClusterState {
            status: match cluster.phase {
                SimPhase::Installing => CloudClusterStatus::Installing,
                // A deleting cluster is still visible until teardown
                // completes.
                SimPhase::Ready | SimPhase::Deleting => CloudClusterStatus::Ready,
            },
            compute_nodes: cluster.compute_nodes,
        };

        let mut torn_down = false;
        match cluster.phase {
            SimPhase::Installing => {
                cluster.polls_until_ready = cluster.polls_until_ready.saturating_sub(1);
                if cluster.polls_until_ready == 0 {
                    cluster.phase = SimPhase::Ready;
                }
            }
            SimPhase::Ready => {
                cluster.compute_nodes = cluster.target_nodes;
            }
            SimPhase::Deleting => {
                if cluster.polls_until_gone == 0 {
                    torn_down = true;
                } else {
                    cluster.polls_until_gone -= 1;
                }
            }
        }
        if torn_down {
            state.clusters.remove(external_id);
        }

        Ok(snapshot)
    }

    async fn get_metrics(&self, external_id: &str) -> CloudResult<ClusterMetrics> {
        let state = self.locked();
        match state.clusters.get(external_id) {
            Some(cluster) => Ok(ClusterMetrics {
                compute_nodes: cluster.compute_nodes,
            }),
            None => Err(CloudError::NotFound(external_id.to_string())),
        }
    }
}
