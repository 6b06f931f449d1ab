//! fleet-registry — durable registry for data-plane cluster records.
//!
//! Backed by [redb](https://docs.rs/redb), this crate is the source of
//! truth for cluster lifecycle state. Cluster rows are JSON-serialized
//! into redb's `&[u8]` value columns and mutated exclusively through
//! optimistic versioned writes: every update carries the version the
//! caller read, and the registry rejects the write if the stored row has
//! moved on (`RegistryError::VersionConflict`).
//!
//! # Architecture
//!
//! The `ClusterRegistry` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and is shared between the report-ingestion path and
//! the fleet orchestrator. Workload references are kept in a separate
//! table keyed `{cluster_id}:{workload_id}` so emptiness checks are a
//! prefix scan. Monotonic sequences (used for cluster id generation) are
//! a single atomic increment-and-fetch inside one write transaction.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use store::ClusterRegistry;
pub use types::*;
