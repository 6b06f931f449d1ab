//! redb table definitions for the cluster registry.
//!
//! Cluster rows use `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Workload references are keyed `{cluster_id}:{workload_id}`
//! so per-cluster lookups are prefix scans. Sequences are plain `u64`
//! counters keyed by name.

use redb::TableDefinition;

/// Cluster rows keyed by internal cluster id.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Workload references keyed by `{cluster_id}:{workload_id}`.
pub const WORKLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("workloads");

/// Monotonic sequences keyed by sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
