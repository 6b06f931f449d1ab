//! fleet-reconciler — the fleet's control loops.
//!
//! Two independent paths share the cluster registry:
//!
//! - **`ingest`** — handles inbound agent status reports, one at a time
//!   per cluster (fully parallel across clusters), driving the
//!   per-cluster capacity/status machinery and compute-node resizes.
//! - **`orchestrator`** — a fixed-cadence loop over the whole registry
//!   that provisions a new cluster when the fleet is out of capacity and
//!   reclaims clusters that have sat empty past their dwell time.
//!
//! Both write through the registry's optimistic conditional update, so a
//! row touched concurrently is simply seen in its latest state on the
//! next report or pass.

pub mod error;
pub mod ingest;
pub mod orchestrator;

pub use error::{ReconcilerError, ReconcilerResult};
pub use ingest::ReportIngestor;
pub use orchestrator::{FleetOrchestrator, FleetSnapshot, OrchestratorConfig, PassSummary};
