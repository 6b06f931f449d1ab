//! fleet-lifecycle — the cluster status state machine.
//!
//! Every persisted status change in the fleet goes through this crate:
//! the transition table is the single authority on which moves are
//! legal, and `status_after_report` is the single place where an agent
//! report is turned into the cluster's next status.

pub mod machine;

pub use machine::{TransitionError, allowed, status_after_report, transition};
