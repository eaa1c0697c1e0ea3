use crate::domain::types::ModelState;
use thiserror::Error;

/// Hard failures of a prediction request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PredictionError {
    #[error("No price data for {ticker}")]
    NoData { ticker: String },
}

/// Errors reported by a training run.
///
/// `Clone` so a single in-flight run can hand its outcome to every waiter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrainingError {
    #[error("Insufficient training data: need {required} prices, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Insufficient valid sequences: need {required}, found {found}")]
    InsufficientValidSequences { required: usize, found: usize },

    #[error("Training cancelled before start")]
    Cancelled,

    #[error("Model fit failed: {0}")]
    Fit(String),

    #[error("Training task failed: {0}")]
    TaskFailed(String),
}

/// Errors raised by a single inference call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Model is not ready (state: {0})")]
    NotReady(ModelState),

    #[error("Expected a sequence of {expected} feature vectors, got {actual}")]
    SequenceLength { expected: usize, actual: usize },

    #[error("Inference cancelled")]
    Cancelled,

    #[error("Model produced a non-finite output: {0}")]
    NonFinite(f64),

    #[error("Inference failed: {0}")]
    Internal(String),
}

/// Errors from saving or loading the persisted model.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("No trained model to save")]
    NothingToSave,

    #[error("Failed to serialize model: {0}")]
    Serialize(String),

    #[error("Failed to deserialize model '{name}': {reason}")]
    Deserialize { name: String, reason: String },

    #[error("Model store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_error_formatting() {
        let err = TrainingError::InsufficientData {
            required: 50,
            available: 40,
        };
        let msg = err.to_string();
        assert!(msg.contains("50"));
        assert!(msg.contains("40"));
    }

    #[test]
    fn test_inference_error_reports_state() {
        let err = InferenceError::NotReady(ModelState::Training);
        assert!(err.to_string().contains("training"));
    }

    #[test]
    fn test_persistence_error_wraps_store_failures() {
        let err: PersistenceError = anyhow::anyhow!("disk full").into();
        assert!(err.to_string().contains("disk full"));
    }
}
