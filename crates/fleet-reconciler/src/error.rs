//! Error types for the reconciler.

use thiserror::Error;

use fleet_cloud::CloudError;
use fleet_lifecycle::TransitionError;
use fleet_registry::RegistryError;

/// Result type alias for reconciler operations.
pub type ReconcilerResult<T> = Result<T, ReconcilerError>;

/// Errors surfaced by report ingestion and orchestration.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// Report references a cluster id the registry does not know.
    /// Rejected at the boundary; no state change.
    #[error("unknown cluster: {0}")]
    UnknownCluster(String),

    /// Report is malformed or arrived for a cluster whose status does
    /// not accept reports.
    #[error("report rejected: {0}")]
    Validation(String),

    /// Concurrent writers kept invalidating our read; the caller (or
    /// the next pass) will retry with fresh state.
    #[error("update contention on cluster {0}")]
    Contention(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}
