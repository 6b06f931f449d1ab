//! fleet-capacity — capacity verdicts and scaling decisions.
//!
//! Two pure components sit between report ingestion and the registry
//! write: the evaluator turns one `StatusReport` into a capacity verdict,
//! and the decision engine turns a verdict plus node-sizing info into a
//! concrete compute-node change. Neither touches storage or the network,
//! so both are trivially testable and cannot fail at runtime.

pub mod engine;
pub mod evaluator;

pub use engine::{DecisionEngine, EngineConfig, ScaleDecision, ScalingMode};
pub use evaluator::{CapacityVerdict, evaluate, exhausted_dimensions};
