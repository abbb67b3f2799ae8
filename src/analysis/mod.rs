//! Analysis modules.
//!
//! Measure weighting before the model runs and score aggregation after it.

pub mod aggregator;
pub mod weights;

pub use aggregator::*;
pub use weights::measure_weights;
