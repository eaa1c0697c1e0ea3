pub mod dataset;
pub mod lstm;
pub mod sequence_model;

use crate::application::cancellation::CancellationFlag;
use crate::domain::errors::{InferenceError, PersistenceError, TrainingError};
use crate::domain::types::{FeatureVector, ModelState, TrainingReport};
use async_trait::async_trait;

pub use sequence_model::SequenceModel;

/// Trainable next-value model as seen by the orchestrator.
///
/// Callers match on [`ModelState`] before calling `predict`; inference in
/// any state other than `Ready` is rejected with `InferenceError::NotReady`.
/// A `Ready` model stays `Ready` while it is being retrained.
#[async_trait]
pub trait ForecastModel: Send + Sync {
    fn name(&self) -> &str;

    /// Number of feature vectors `predict` expects.
    fn sequence_length(&self) -> usize;

    fn state(&self) -> ModelState;

    /// Whether a training run is in flight.
    fn is_training(&self) -> bool;

    async fn train(
        &self,
        prices: &[f64],
        epochs: usize,
        cancel: &CancellationFlag,
    ) -> Result<TrainingReport, TrainingError>;

    /// Normalized estimate in (0, 1) for the value following `sequence`.
    async fn predict(
        &self,
        sequence: &[FeatureVector],
        cancel: &CancellationFlag,
    ) -> Result<f64, InferenceError>;

    async fn save(&self) -> Result<(), PersistenceError>;

    /// `Ok(false)` when the store holds no model under this name.
    async fn load(&self) -> Result<bool, PersistenceError>;
}
