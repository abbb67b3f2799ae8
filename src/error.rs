//! Error types for the rating engine.
//!
//! Optimizer non-convergence is not an error variant: it is reported
//! through [`crate::models::ConvergenceInfo`] and never aborts a run.

use thiserror::Error;

/// Errors raised by the estimation, summary and clustering stages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RatingError {
    /// The input cannot produce a meaningful result (no usable weights,
    /// too few distinct values to cluster, constant measure columns).
    #[error("degenerate input in {context}: {reason}")]
    DegenerateInput { context: String, reason: String },

    /// Missing-value alignment or value-domain contract between two inputs
    /// was broken (e.g. a weight present where the measure is missing).
    #[error("contract violation in {context}: {reason}")]
    ContractViolation { context: String, reason: String },

    /// Inputs whose dimensions do not line up.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// Invalid tunables.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A worker task for one unit of work died before returning a result.
    #[error("worker for {0} failed: {1}")]
    Worker(String, String),
}

impl RatingError {
    pub fn degenerate(context: impl Into<String>, reason: impl Into<String>) -> Self {
        RatingError::DegenerateInput {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn contract(context: impl Into<String>, reason: impl Into<String>) -> Self {
        RatingError::ContractViolation {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// True for the two conditions that abort only the affected unit of work.
    pub fn is_input_fault(&self) -> bool {
        matches!(
            self,
            RatingError::DegenerateInput { .. } | RatingError::ContractViolation { .. }
        )
    }
}

/// Convenience alias used across the library.
pub type Result<T> = std::result::Result<T, RatingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RatingError::degenerate("mortality", "no positive weights");
        assert_eq!(
            err.to_string(),
            "degenerate input in mortality: no positive weights"
        );
        assert!(err.is_input_fault());

        let err = RatingError::Shape("3 rows vs 4 rows".to_string());
        assert!(!err.is_input_fault());
    }
}
