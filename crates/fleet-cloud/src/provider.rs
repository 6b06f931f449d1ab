//! The cloud provider contract consumed by the reconciler.
//!
//! All operations are at-least-once retriable on transient errors and
//! idempotent at the target-state level: re-requesting an already
//! applied target node count is a downstream no-op.

use async_trait::async_trait;
use thiserror::Error;

/// Result type alias for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors returned by a cloud provider.
#[derive(Debug, Clone, Error)]
pub enum CloudError {
    /// Timeouts, rate limits, flaky networks. Retried with backoff at
    /// the call site; cluster state is left unchanged until resolved.
    #[error("transient cloud error: {0}")]
    Transient(String),

    /// The provider permanently rejected the request. Surfaces as
    /// cluster status `failed`; never auto-retried.
    #[error("unrecoverable cloud error: {0}")]
    Unrecoverable(String),

    /// The referenced cluster does not exist (any more) at the provider.
    #[error("cloud cluster not found: {0}")]
    NotFound(String),
}

impl CloudError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient(_))
    }
}

/// Parameters for a cluster create call.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSpec {
    /// Control-plane name for the cluster (the internal id).
    pub name: String,
    pub cloud_provider: String,
    pub region: String,
    pub multi_az: bool,
    /// Compute nodes the cluster starts with.
    pub base_nodes: u32,
}

/// Provider-side lifecycle phase of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudClusterStatus {
    /// The provider is still building the cluster.
    Installing,
    /// Up and reachable.
    Ready,
    /// The provider gave up; unrecoverable.
    Error,
}

/// Provider-side view of a cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudClusterState {
    pub status: CloudClusterStatus,
    pub compute_nodes: u32,
}

/// Live metrics fetched from the provider's telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMetrics {
    pub compute_nodes: u32,
}

/// Imperative operations against the underlying cloud provider.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Request a new cluster; returns the provider-assigned external id.
    async fn create_cluster(&self, spec: &ClusterSpec) -> CloudResult<String>;

    /// Request teardown of a cluster. Idempotent: deleting an unknown
    /// cluster succeeds.
    async fn delete_cluster(&self, external_id: &str) -> CloudResult<()>;

    /// Request a compute-node resize to the given target count.
    async fn resize_compute(&self, external_id: &str, target_nodes: u32) -> CloudResult<()>;

    /// Fetch the provider's current view of a cluster.
    async fn get_cluster(&self, external_id: &str) -> CloudResult<CloudClusterState>;

    /// Fetch live metrics for a cluster.
    async fn get_metrics(&self, external_id: &str) -> CloudResult<ClusterMetrics>;
}
