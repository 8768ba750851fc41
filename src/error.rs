//! Error taxonomy for the simulation and forecasting engine
//!
//! - **EngineError**: every failure the library surfaces to its caller
//! - **Result**: alias for `Result<T, EngineError>`
//!
//! Numeric degeneracies (singular regression matrix, zero-variance series) are
//! normally recovered in place with a fallback and recorded as a
//! [`Diagnostic`](crate::diagnostics::Diagnostic). `NumericDegeneracy` only
//! escapes when no fallback exists.

use thiserror::Error;

use crate::models::ModelId;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Below the minimum sample size for the requested operation.
    #[error("insufficient data for {operation}: need at least {required} points, got {actual}")]
    InsufficientData {
        operation: &'static str,
        required: usize,
        actual: usize,
    },

    /// Model kind outside Linear / Polynomial / ExponentialSmoothing / Ensemble.
    #[error("unsupported model kind: {0}")]
    UnsupportedModel(String),

    /// Malformed scenario, settings, series or horizon.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(String),

    #[error("model not found: {0}")]
    ModelNotFound(ModelId),

    /// Run aborted through its cancellation token. No partial result exists.
    #[error("simulation run cancelled during {stage}")]
    Cancelled { stage: &'static str },

    /// Orchestrator asked to move between phases the run state machine forbids.
    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition { from: &'static str, to: &'static str },

    /// Blocking worker panicked or was aborted.
    #[error("worker task failed: {0}")]
    TaskFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn degeneracy(msg: impl Into<String>) -> Self {
        Self::NumericDegeneracy(msg.into())
    }

    pub fn insufficient(operation: &'static str, required: usize, actual: usize) -> Self {
        Self::InsufficientData {
            operation,
            required,
            actual,
        }
    }

    /// Whether the caller fed bad input (as opposed to the run failing).
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData { .. }
                | Self::UnsupportedModel(_)
                | Self::Validation(_)
                | Self::ModelNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message() {
        let err = EngineError::insufficient("linear regression", 6, 4);
        assert_eq!(
            err.to_string(),
            "insufficient data for linear regression: need at least 6 points, got 4"
        );
        assert!(err.is_input_error());
    }

    #[test]
    fn test_cancelled_is_not_input_error() {
        let err = EngineError::Cancelled { stage: "simulating" };
        assert!(!err.is_input_error());
        assert!(err.to_string().contains("simulating"));
    }
}
