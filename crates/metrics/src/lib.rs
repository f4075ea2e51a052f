//! Metric names for parlor, plus the `metrics` facade macros.
//!
//! ```rust,ignore
//! use parlor_metrics::{counter, histogram, labels, plugins};
//!
//! counter!(plugins::INVOCATIONS_TOTAL, labels::PLUGIN => "audit").increment(1);
//! histogram!(plugins::INVOCATION_DURATION_SECONDS).record(0.012);
//! ```
//!
//! Nothing is exported until the embedding binary installs a recorder.

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
