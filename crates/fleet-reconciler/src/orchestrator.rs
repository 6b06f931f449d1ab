//! Fleet provisioning orchestrator — fixed-cadence fleet sizing.
//!
//! Independent of any single report, each pass takes a snapshot of the
//! registry and:
//!
//! 1. drives pending clusters through their provisioning lifecycle
//!    (`accepted → provisioning → provisioned → waiting_for_agent`),
//! 2. retries stalled teardowns and removes rows whose cloud cluster is
//!    confirmed gone,
//! 3. creates exactly one new `accepted` cluster when the whole fleet is
//!    out of capacity (at most one pending creation fleet-wide),
//! 4. reclaims clusters that have sat `ready` and empty past the dwell
//!    time, if enough fleet headroom remains.
//!
//! Every write goes through the registry's conditional update; a row
//! changed concurrently by report ingestion is skipped and re-read on
//! the next pass.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fleet_cloud::{CloudClusterStatus, CloudError, CloudProvider, ClusterSpec, RetryPolicy};
use fleet_lifecycle::transition;
use fleet_registry::{Cluster, ClusterId, ClusterRegistry, ClusterStatus};

use crate::error::ReconcilerResult;

/// Orchestrator tuning, threaded in at construction so independently
/// configured instances can run side by side in tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Provider/region stamped onto clusters the orchestrator creates.
    pub cloud_provider: String,
    pub region: String,
    pub multi_az: bool,
    /// Compute nodes a new cluster starts with.
    pub base_nodes: u32,
    /// Whether the orchestrator may create and reclaim clusters. With
    /// this off the fleet is sized by operators only.
    pub dynamic_scaling: bool,
    /// Seconds a cluster must stay ready-and-empty before it becomes a
    /// deletion candidate.
    pub empty_dwell_secs: u64,
    /// Clusters with capacity that must remain after a reclaim.
    pub min_available_clusters: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cloud_provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            multi_az: true,
            base_nodes: 3,
            dynamic_scaling: false,
            empty_dwell_secs: 1800,
            min_available_clusters: 1,
        }
    }
}

/// Point-in-time partition of the fleet, taken at the start of a pass.
#[derive(Debug, Clone)]
pub struct FleetSnapshot {
    pub clusters: Vec<Cluster>,
}

impl FleetSnapshot {
    /// Clusters currently able to take new workloads.
    pub fn available(&self) -> Vec<&Cluster> {
        self.clusters
            .iter()
            .filter(|c| c.status == ClusterStatus::Ready)
            .collect()
    }

    /// Clusters on their way to capacity: anything between `accepted`
    /// and the first agent report, plus in-flight node resizes.
    pub fn pending(&self) -> Vec<&Cluster> {
        self.clusters
            .iter()
            .filter(|c| c.status.is_pending() || c.status == ClusterStatus::ComputeNodeScalingUp)
            .collect()
    }

    /// Whether the fleet needs an additional cluster: nothing can take
    /// workloads and nothing is already on the way. Also true for an
    /// empty fleet (bootstrap).
    pub fn needs_scale_out(&self) -> bool {
        self.available().is_empty() && self.pending().is_empty()
    }
}

/// What a single orchestrator pass did, for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Cluster created in `accepted` this pass, if any.
    pub created: Option<ClusterId>,
    /// Clusters moved to `deprovisioning` this pass.
    pub deprovisioned: Vec<ClusterId>,
    /// Rows removed after confirmed teardown.
    pub removed: Vec<ClusterId>,
}

impl PassSummary {
    pub fn is_empty(&self) -> bool {
        self.created.is_none() && self.deprovisioned.is_empty() && self.removed.is_empty()
    }
}

/// The fleet provisioning orchestrator.
pub struct FleetOrchestrator {
    registry: ClusterRegistry,
    cloud: Arc<dyn CloudProvider>,
    config: OrchestratorConfig,
    retry: RetryPolicy,
}

impl FleetOrchestrator {
    pub fn new(
        registry: ClusterRegistry,
        cloud: Arc<dyn CloudProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            cloud,
            config,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the cloud-call retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run the orchestrator loop until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            dynamic_scaling = self.config.dynamic_scaling,
            "fleet orchestrator started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.pass(epoch_secs()).await {
                        Ok(summary) if !summary.is_empty() => {
                            info!(
                                created = ?summary.created,
                                deprovisioned = summary.deprovisioned.len(),
                                removed = summary.removed.len(),
                                "orchestrator pass applied changes"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "orchestrator pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("fleet orchestrator shutting down");
                    break;
                }
            }
        }
    }

    /// One orchestration pass over a fresh registry snapshot.
    pub async fn pass(&self, now: u64) -> ReconcilerResult<PassSummary> {
        let snapshot = FleetSnapshot {
            clusters: self.registry.list_clusters()?,
        };
        let mut summary = PassSummary::default();

        // Drive per-cluster lifecycle first. Failures on one cluster
        // never block the rest of the pass.
        for cluster in &snapshot.clusters {
            let result = match cluster.status {
                ClusterStatus::Accepted => self.reconcile_accepted(cluster, now).await,
                ClusterStatus::Provisioning => self.reconcile_provisioning(cluster, now).await,
                ClusterStatus::Provisioned => self.reconcile_provisioned(cluster, now),
                ClusterStatus::Deprovisioning => self.issue_delete(cluster, now).await,
                ClusterStatus::Cleanup => {
                    self.reconcile_cleanup(cluster, &mut summary).await
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                warn!(cluster_id = %cluster.id, error = %e, "cluster reconcile step failed");
            }
        }

        if self.config.dynamic_scaling {
            self.scale_in(&snapshot, now, &mut summary).await?;
            self.scale_out(&snapshot, now, &mut summary)?;
        }

        Ok(summary)
    }

    // ── Provisioning lifecycle ─────────────────────────────────────

    /// Issue the cloud create for an accepted cluster. Success stamps
    /// the external id (exactly once) and moves to `provisioning`. An
    /// unrecoverable rejection moves to `failed` and is never retried;
    /// transient failures are retried on later passes.
    async fn reconcile_accepted(&self, cluster: &Cluster, now: u64) -> ReconcilerResult<()> {
        let spec = ClusterSpec {
            name: cluster.id.clone(),
            cloud_provider: cluster.cloud_provider.clone(),
            region: cluster.region.clone(),
            multi_az: cluster.multi_az,
            base_nodes: self.config.base_nodes,
        };

        match self.retry.run(|| self.cloud.create_cluster(&spec)).await {
            Ok(external_id) => {
                let mut updated = cluster.clone();
                updated.external_id = Some(external_id.clone());
                transition(&mut updated, ClusterStatus::Provisioning, now)?;
                if self.write(&updated)?.is_some() {
                    info!(cluster_id = %cluster.id, %external_id, "cloud create accepted");
                }
                Ok(())
            }
            Err(e) if e.is_transient() => {
                warn!(cluster_id = %cluster.id, error = %e, "cloud create failing transiently, will retry next pass");
                Ok(())
            }
            Err(e) => {
                error!(cluster_id = %cluster.id, error = %e, "cloud create rejected, marking failed");
                self.fail_cluster(cluster, now)
            }
        }
    }

    /// Check whether the cloud finished building the cluster.
    async fn reconcile_provisioning(&self, cluster: &Cluster, now: u64) -> ReconcilerResult<()> {
        let Some(external_id) = cluster.external_id.clone() else {
            error!(cluster_id = %cluster.id, "provisioning cluster has no external id, marking failed");
            return self.fail_cluster(cluster, now);
        };

        match self.retry.run(|| self.cloud.get_cluster(&external_id)).await {
            Ok(state) => match state.status {
                CloudClusterStatus::Ready => {
                    let mut updated = cluster.clone();
                    transition(&mut updated, ClusterStatus::Provisioned, now)?;
                    if self.write(&updated)?.is_some() {
                        info!(cluster_id = %cluster.id, nodes = state.compute_nodes, "cloud cluster is up");
                    }
                    Ok(())
                }
                CloudClusterStatus::Installing => Ok(()),
                CloudClusterStatus::Error => {
                    error!(cluster_id = %cluster.id, "cloud reports provisioning error, marking failed");
                    self.fail_cluster(cluster, now)
                }
            },
            Err(CloudError::NotFound(_)) => {
                error!(cluster_id = %cluster.id, %external_id, "cloud lost the cluster mid-provisioning, marking failed");
                self.fail_cluster(cluster, now)
            }
            Err(e) => {
                debug!(cluster_id = %cluster.id, error = %e, "cloud status check failed, will retry next pass");
                Ok(())
            }
        }
    }

    /// A provisioned cluster waits for its agent's first report.
    fn reconcile_provisioned(&self, cluster: &Cluster, now: u64) -> ReconcilerResult<()> {
        let mut updated = cluster.clone();
        transition(&mut updated, ClusterStatus::WaitingForAgent, now)?;
        self.write(&updated)?;
        Ok(())
    }

    // ── Teardown lifecycle ─────────────────────────────────────────

    /// Issue (or re-issue) the cloud delete for a deprovisioning
    /// cluster; success moves it to `cleanup`.
    async fn issue_delete(&self, cluster: &Cluster, now: u64) -> ReconcilerResult<()> {
        let Some(external_id) = cluster.external_id.clone() else {
            // Never reached the cloud; nothing to tear down.
            let mut updated = cluster.clone();
            transition(&mut updated, ClusterStatus::Cleanup, now)?;
            self.write(&updated)?;
            return Ok(());
        };

        match self
            .retry
            .run(|| self.cloud.delete_cluster(&external_id))
            .await
        {
            Ok(()) => {
                let mut updated = cluster.clone();
                transition(&mut updated, ClusterStatus::Cleanup, now)?;
                if self.write(&updated)?.is_some() {
                    info!(cluster_id = %cluster.id, %external_id, "cloud delete issued");
                }
                Ok(())
            }
            Err(e) if e.is_transient() => {
                warn!(cluster_id = %cluster.id, error = %e, "cloud delete failing transiently, will retry next pass");
                Ok(())
            }
            Err(e) => {
                error!(cluster_id = %cluster.id, error = %e, "cloud delete rejected, marking failed");
                self.fail_cluster(cluster, now)
            }
        }
    }

    /// Remove the row once the cloud confirms teardown and nothing
    /// references the cluster any more.
    async fn reconcile_cleanup(
        &self,
        cluster: &Cluster,
        summary: &mut PassSummary,
    ) -> ReconcilerResult<()> {
        let gone = match &cluster.external_id {
            None => true,
            Some(external_id) => {
                match self.retry.run(|| self.cloud.get_cluster(external_id)).await {
                    Err(CloudError::NotFound(_)) => true,
                    Ok(_) => false,
                    Err(e) => {
                        debug!(cluster_id = %cluster.id, error = %e, "teardown check failed, will retry next pass");
                        false
                    }
                }
            }
        };
        if !gone {
            return Ok(());
        }

        if self.registry.count_active_workloads(&cluster.id)? > 0 {
            warn!(cluster_id = %cluster.id, "teardown confirmed but workloads still reference the cluster");
            return Ok(());
        }

        if self.registry.remove_cluster(&cluster.id)? {
            info!(cluster_id = %cluster.id, "cluster torn down and removed");
            summary.removed.push(cluster.id.clone());
        }
        Ok(())
    }

    // ── Fleet sizing ───────────────────────────────────────────────

    /// Create exactly one new cluster when the fleet is out of capacity.
    fn scale_out(
        &self,
        snapshot: &FleetSnapshot,
        now: u64,
        summary: &mut PassSummary,
    ) -> ReconcilerResult<()> {
        if !snapshot.needs_scale_out() {
            return Ok(());
        }

        let seq = self.registry.next_sequence("cluster")?;
        let id = format!("cluster-{seq:06}");
        let cluster = Cluster {
            id: id.clone(),
            external_id: None,
            cloud_provider: self.config.cloud_provider.clone(),
            region: self.config.region.clone(),
            multi_az: self.config.multi_az,
            byoc: false,
            managed: true,
            status: ClusterStatus::Accepted,
            identity_provider_id: None,
            cluster_dns: None,
            desired_nodes: None,
            empty_since: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.registry.insert_cluster(&cluster)?;
        info!(cluster_id = %id, fleet_size = snapshot.clusters.len(), "fleet out of capacity, new cluster accepted");
        summary.created = Some(id);
        Ok(())
    }

    /// Reclaim ready clusters that sat empty past the dwell time,
    /// keeping at least `min_available_clusters` with capacity.
    async fn scale_in(
        &self,
        snapshot: &FleetSnapshot,
        now: u64,
        summary: &mut PassSummary,
    ) -> ReconcilerResult<()> {
        let ready = snapshot.available();
        let mut available = ready.len();

        for cluster in ready {
            let workloads = self.registry.count_active_workloads(&cluster.id)?;

            if workloads > 0 {
                if cluster.empty_since.is_some() {
                    let mut updated = cluster.clone();
                    updated.empty_since = None;
                    self.write(&updated)?;
                }
                continue;
            }

            let Some(since) = cluster.empty_since else {
                // Start the dwell clock.
                let mut updated = cluster.clone();
                updated.empty_since = Some(now);
                self.write(&updated)?;
                continue;
            };

            if now.saturating_sub(since) < self.config.empty_dwell_secs {
                continue;
            }
            if available <= self.config.min_available_clusters {
                debug!(cluster_id = %cluster.id, available, "empty cluster kept, fleet headroom too low");
                continue;
            }

            let mut updated = cluster.clone();
            transition(&mut updated, ClusterStatus::Deprovisioning, now)?;
            let Some(updated) = self.write(&updated)? else {
                continue;
            };
            info!(
                cluster_id = %updated.id,
                empty_for_secs = now.saturating_sub(since),
                "empty cluster reclaim started"
            );
            available -= 1;
            summary.deprovisioned.push(updated.id.clone());

            // The delete call goes out at deprovisioning entry.
            self.issue_delete(&updated, now).await?;
        }
        Ok(())
    }

    // ── Write helpers ──────────────────────────────────────────────

    /// Conditional update that treats a version conflict as "someone
    /// else got there first": the row is skipped and re-read next pass.
    fn write(&self, cluster: &Cluster) -> ReconcilerResult<Option<Cluster>> {
        match self.registry.update_cluster(cluster) {
            Ok(stored) => Ok(Some(stored)),
            Err(e) if e.is_conflict() => {
                debug!(cluster_id = %cluster.id, "row updated concurrently, deferring to next pass");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn fail_cluster(&self, cluster: &Cluster, now: u64) -> ReconcilerResult<()> {
        let mut updated = cluster.clone();
        transition(&mut updated, ClusterStatus::Failed, now)?;
        self.write(&updated)?;
        Ok(())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
