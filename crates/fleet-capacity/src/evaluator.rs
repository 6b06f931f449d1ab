//! Capacity evaluator — one report in, one verdict out.
//!
//! A cluster is `Full` if *any* tracked dimension has no remaining
//! capacity. Zero counts as exhausted, and so do negative values (totals
//! can shrink between agent polls). A dimension the agent did not report
//! carries no information and is excluded from the check, so a sparse
//! report cannot force a `Full` verdict by itself.

use fleet_registry::StatusReport;

/// Capacity verdict for a single status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityVerdict {
    /// Every reported dimension has remaining capacity.
    HasCapacity,
    /// At least one reported dimension is exhausted.
    Full,
}

/// Evaluate a status report's remaining capacity.
pub fn evaluate(report: &StatusReport) -> CapacityVerdict {
    let any_exhausted = report
        .remaining
        .dimensions()
        .iter()
        .any(|(_, remaining)| matches!(remaining, Some(v) if *v <= 0));

    if any_exhausted {
        CapacityVerdict::Full
    } else {
        CapacityVerdict::HasCapacity
    }
}

/// Names of the dimensions that drove a `Full` verdict, for logging.
pub fn exhausted_dimensions(report: &StatusReport) -> Vec<&'static str> {
    report
        .remaining
        .dimensions()
        .iter()
        .filter_map(|(name, remaining)| match remaining {
            Some(v) if *v <= 0 => Some(*name),
            _ => None,
        })
        .collect()
}
