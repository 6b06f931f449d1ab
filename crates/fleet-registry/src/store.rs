//! ClusterRegistry — redb-backed persistence for the fleet.
//!
//! Provides typed CRUD over cluster rows and workload references, plus
//! named monotonic sequences. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).
//!
//! Cluster rows carry an optimistic version: `update_cluster` commits
//! only when the caller's copy matches the stored version, so concurrent
//! read-modify-write cycles cannot silently lose updates.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `RegistryError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| RegistryError::$variant(e.to_string())
    };
}

/// Thread-safe cluster registry backed by redb.
#[derive(Clone)]
pub struct ClusterRegistry {
    db: Arc<Database>,
}

impl ClusterRegistry {
    /// Open (or create) a persistent registry at the given path.
    pub fn open(path: &Path) -> RegistryResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let registry = Self { db: Arc::new(db) };
        registry.ensure_tables()?;
        debug!(?path, "cluster registry opened");
        Ok(registry)
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> RegistryResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let registry = Self { db: Arc::new(db) };
        registry.ensure_tables()?;
        debug!("in-memory cluster registry opened");
        Ok(registry)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> RegistryResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Register a new cluster row.
    ///
    /// The stored row starts at version 1 regardless of the version on
    /// the input. Fails if the id is already registered.
    pub fn insert_cluster(&self, cluster: &Cluster) -> RegistryResult<Cluster> {
        let stored = Cluster {
            version: 1,
            ..cluster.clone()
        };
        let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let exists = table
                .get(stored.id.as_str())
                .map_err(map_err!(Read))?
                .is_some();
            if exists {
                return Err(RegistryError::AlreadyExists(stored.id.clone()));
            }
            table
                .insert(stored.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = %stored.id, status = %stored.status, "cluster registered");
        Ok(stored)
    }

    /// Get a cluster by internal id.
    pub fn get_cluster(&self, id: &str) -> RegistryResult<Option<Cluster>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let cluster: Cluster =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(cluster))
            }
            None => Ok(None),
        }
    }

    /// List all clusters.
    pub fn list_clusters(&self) -> RegistryResult<Vec<Cluster>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let cluster: Cluster =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(cluster);
        }
        Ok(results)
    }

    /// List clusters currently in the given status.
    pub fn list_clusters_in_status(&self, status: ClusterStatus) -> RegistryResult<Vec<Cluster>> {
        Ok(self
            .list_clusters()?
            .into_iter()
            .filter(|c| c.status == status)
            .collect())
    }

    /// Conditionally update a cluster row.
    ///
    /// Commits only if the stored version equals `cluster.version`; the
    /// stored row gets `version + 1`. Returns the row as persisted so the
    /// caller can chain further updates.
    pub fn update_cluster(&self, cluster: &Cluster) -> RegistryResult<Cluster> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let stored_version = match table.get(cluster.id.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let stored: Cluster =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    stored.version
                }
                None => return Err(RegistryError::NotFound(cluster.id.clone())),
            };
            if stored_version != cluster.version {
                return Err(RegistryError::VersionConflict {
                    id: cluster.id.clone(),
                    read: cluster.version,
                    stored: stored_version,
                });
            }
            updated = Cluster {
                version: cluster.version + 1,
                ..cluster.clone()
            };
            let value = serde_json::to_vec(&updated).map_err(map_err!(Serialize))?;
            table
                .insert(cluster.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = %updated.id, status = %updated.status, version = updated.version, "cluster updated");
        Ok(updated)
    }

    /// Remove a cluster row. Returns true if it existed.
    pub fn remove_cluster(&self, id: &str) -> RegistryResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = %id, existed, "cluster removed");
        Ok(existed)
    }

    // ── Workload references ────────────────────────────────────────

    /// Insert or update a workload reference.
    pub fn put_workload(&self, workload: &WorkloadRef) -> RegistryResult<()> {
        let key = workload.table_key();
        let value = serde_json::to_vec(workload).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List all workload references for a cluster.
    pub fn list_workloads_for_cluster(&self, cluster_id: &str) -> RegistryResult<Vec<WorkloadRef>> {
        let prefix = format!("{cluster_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let workload: WorkloadRef =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(workload);
            }
        }
        Ok(results)
    }

    /// Count active workloads placed on a cluster.
    pub fn count_active_workloads(&self, cluster_id: &str) -> RegistryResult<usize> {
        Ok(self
            .list_workloads_for_cluster(cluster_id)?
            .iter()
            .filter(|w| w.active)
            .count())
    }

    /// Remove a workload reference by its composite key. Returns true if
    /// it existed.
    pub fn remove_workload(&self, key: &str) -> RegistryResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Sequences ──────────────────────────────────────────────────

    /// Atomically increment and fetch the named sequence.
    ///
    /// The first call for a name returns 1. Increment and read happen in
    /// a single write transaction.
    pub fn next_sequence(&self, name: &str) -> RegistryResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next;
        {
            let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            let current = table
                .get(name)
                .map_err(map_err!(Read))?
                .map(|g| g.value())
                .unwrap_or(0);
            next = current + 1;
            table.insert(name, next).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(next)
    }
}
