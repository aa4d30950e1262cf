//! # polymult-engine
//!
//! The big-number engine contract consumed by the `polymult` crate, plus a
//! reference floating-point engine used by its tests and benchmarks.

pub mod dwt;
pub mod engine;
pub mod stats;

// Re-exports
pub use dwt::{DwtEngine, DwtNum};
pub use engine::FftEngine;
pub use stats::{AtomicEngineStats, EngineStats};
