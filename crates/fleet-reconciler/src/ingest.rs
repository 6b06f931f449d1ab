//! Report ingestion — one agent report in, one status write out.
//!
//! Reports for the same cluster are serialized behind a per-cluster
//! mutex; reports for different clusters run fully in parallel. The
//! critical section covers only the read-derive-write cycle against the
//! registry — the resize call to the cloud provider happens after the
//! lock is released, and its result lands via a separate conditional
//! write. Reports are idempotent snapshots, so at-least-once delivery
//! and "last processed wins" ordering are safe.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use fleet_capacity::{DecisionEngine, ScaleDecision, evaluate, exhausted_dimensions};
use fleet_cloud::{CloudProvider, RetryPolicy};
use fleet_lifecycle::{status_after_report, transition};
use fleet_registry::{Cluster, ClusterRegistry, ClusterStatus, StatusReport};

use crate::error::{ReconcilerError, ReconcilerResult};

/// Attempts at the read-derive-write cycle before giving up on a
/// version conflict. Conflicts are rare (only the orchestrator competes
/// for the same row) and always resolvable by re-reading.
const CONFLICT_RETRIES: u32 = 3;

/// Ingests agent status reports and applies them to the registry.
pub struct ReportIngestor {
    registry: ClusterRegistry,
    cloud: Arc<dyn CloudProvider>,
    engine: DecisionEngine,
    retry: RetryPolicy,
    /// Per-cluster serialization: cluster id → mutex.
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl ReportIngestor {
    pub fn new(
        registry: ClusterRegistry,
        cloud: Arc<dyn CloudProvider>,
        engine: DecisionEngine,
    ) -> Self {
        Self {
            registry,
            cloud,
            engine,
            retry: RetryPolicy::default(),
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Override the cloud-call retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Process one status report and return the cluster's resulting
    /// status.
    ///
    /// Fails without mutating any state when the cluster id is unknown
    /// or the cluster's status does not accept reports. `now` is the
    /// ingestion timestamp in epoch seconds.
    pub async fn process_report(
        &self,
        report: &StatusReport,
        now: u64,
    ) -> ReconcilerResult<ClusterStatus> {
        let lock = self.lock_for(&report.cluster_id).await;
        let (cluster, decision) = {
            let _guard = lock.lock().await;
            self.apply_report(report, now)?
        };

        // Issue the resize after the registry write; its outcome is
        // applied through a separate conditional write. While a resize
        // is in flight, re-affirm the persisted target instead of
        // computing a new one — the provider treats a repeated target as
        // a no-op, and this recovers from a resize request that failed
        // transiently earlier.
        let resize_target = decision.target().or_else(|| {
            cluster
                .desired_nodes
                .filter(|d| {
                    cluster.status == ClusterStatus::ComputeNodeScalingUp
                        && report.node_info.current < *d
                })
        });
        if let Some(target) = resize_target {
            self.request_resize(&cluster, target, now).await?;
        }

        Ok(cluster.status)
    }

    /// The serialized read-derive-write cycle.
    fn apply_report(
        &self,
        report: &StatusReport,
        now: u64,
    ) -> ReconcilerResult<(Cluster, ScaleDecision)> {
        for _ in 0..CONFLICT_RETRIES {
            let Some(cluster) = self.registry.get_cluster(&report.cluster_id)? else {
                return Err(ReconcilerError::UnknownCluster(report.cluster_id.clone()));
            };
            if !cluster.status.accepts_reports() {
                return Err(ReconcilerError::Validation(format!(
                    "cluster {} in status {} does not accept reports",
                    cluster.id, cluster.status
                )));
            }

            let agent_ready = report.is_ready();
            let verdict = evaluate(report);
            let resize_in_flight = cluster.status == ClusterStatus::ComputeNodeScalingUp
                && cluster
                    .desired_nodes
                    .is_some_and(|desired| report.node_info.current < desired);

            // Scaling decisions only apply once the cluster has settled
            // into a capacity status; the first report out of
            // waiting_for_agent just establishes ready/full.
            let decision = if agent_ready && cluster.status.hosts_workloads() {
                self.engine.decide(verdict, report, resize_in_flight)
            } else {
                ScaleDecision::NoOp
            };

            let next =
                status_after_report(cluster.status, agent_ready, verdict, decision, resize_in_flight);

            let mut updated = cluster.clone();
            transition(&mut updated, next, now)?;
            updated.desired_nodes = match decision {
                ScaleDecision::ScaleUp { target } => Some(target),
                // Leaving (or never entering) the scaling status drops
                // any stale resize target.
                _ if next != ClusterStatus::ComputeNodeScalingUp => None,
                _ => updated.desired_nodes,
            };

            match self.registry.update_cluster(&updated) {
                Ok(stored) => {
                    if !decision.is_noop() || stored.status != cluster.status {
                        info!(
                            cluster_id = %stored.id,
                            from = %cluster.status,
                            to = %stored.status,
                            exhausted = ?exhausted_dimensions(report),
                            ?decision,
                            "status report applied"
                        );
                    }
                    return Ok((stored, decision));
                }
                Err(e) if e.is_conflict() => {
                    debug!(cluster_id = %report.cluster_id, "version conflict applying report, re-reading");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ReconcilerError::Contention(report.cluster_id.clone()))
    }

    /// Ask the cloud provider for a compute resize. Transient failures
    /// (after retries) are left for the next report to re-trigger; an
    /// unrecoverable rejection marks the cluster failed.
    async fn request_resize(
        &self,
        cluster: &Cluster,
        target: u32,
        now: u64,
    ) -> ReconcilerResult<()> {
        let Some(external_id) = cluster.external_id.clone() else {
            warn!(cluster_id = %cluster.id, "resize decided but cluster has no external id");
            return Ok(());
        };

        match self
            .retry
            .run(|| self.cloud.resize_compute(&external_id, target))
            .await
        {
            Ok(()) => {
                info!(cluster_id = %cluster.id, %external_id, target, "compute resize requested");
                Ok(())
            }
            Err(e) if e.is_transient() => {
                warn!(cluster_id = %cluster.id, error = %e, "resize failed transiently, next report will retry");
                Ok(())
            }
            Err(e) => {
                error!(cluster_id = %cluster.id, error = %e, "resize rejected, marking cluster failed");
                self.mark_failed(&cluster.id, now)?;
                Ok(())
            }
        }
    }

    /// Move a cluster to `failed` with conflict-tolerant retries.
    fn mark_failed(&self, cluster_id: &str, now: u64) -> ReconcilerResult<()> {
        for _ in 0..CONFLICT_RETRIES {
            let Some(cluster) = self.registry.get_cluster(cluster_id)? else {
                return Ok(());
            };
            if cluster.status == ClusterStatus::Failed {
                return Ok(());
            }
            let mut updated = cluster;
            transition(&mut updated, ClusterStatus::Failed, now)?;
            match self.registry.update_cluster(&updated) {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(ReconcilerError::Contention(cluster_id.to_string()))
    }

    async fn lock_for(&self, cluster_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(cluster_id) {
                return Arc::clone(lock);
            }
        }
        let mut locks = self.locks.write().await;
        Arc::clone(
            locks
                .entry(cluster_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}
