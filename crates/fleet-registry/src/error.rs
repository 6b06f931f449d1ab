//! Error types for the cluster registry.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("cluster not found: {0}")]
    NotFound(String),

    #[error("cluster already registered: {0}")]
    AlreadyExists(String),

    #[error("stale write for cluster {id}: caller read version {read}, stored is {stored}")]
    VersionConflict { id: String, read: u64, stored: u64 },
}

impl RegistryError {
    /// True for conflicts a caller resolves by re-reading and re-deriving.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RegistryError::VersionConflict { .. })
    }
}
