use super::ForecastModel;
use super::dataset::{build_training_examples, split_validation};
use super::lstm::{FitOptions, LstmNetwork};
use crate::application::cancellation::CancellationFlag;
use crate::config::ModelConfig;
use crate::domain::errors::{InferenceError, PersistenceError, TrainingError};
use crate::domain::ports::ModelStore;
use crate::domain::types::{FEATURE_COUNT, FeatureVector, ModelState, TrainingReport};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Valid windows required for a training run.
pub const MIN_VALID_SEQUENCES: usize = 10;

const MODEL_FORMAT_VERSION: u32 = 2;

type SharedTraining = Shared<BoxFuture<'static, Result<TrainingReport, TrainingError>>>;

/// On-store layout of a trained model.
#[derive(Serialize, Deserialize)]
struct PersistedModel {
    format_version: u32,
    sequence_length: usize,
    network: LstmNetwork,
}

/// LSTM-backed next-price model with an explicit lifecycle.
///
/// `Untrained -> Training -> Ready | Failed`. A failed model is recoverable
/// by a later successful `train`. Retraining a `Ready` model keeps it `Ready`
/// and serving the current network until the new one replaces it. At most
/// one training run is in flight; concurrent `train` calls await the same
/// outcome.
pub struct SequenceModel {
    name: String,
    config: ModelConfig,
    store: Arc<dyn ModelStore>,
    state: Arc<RwLock<ModelState>>,
    network: Arc<RwLock<Option<Arc<LstmNetwork>>>>,
    in_flight: Arc<Mutex<Option<SharedTraining>>>,
    training: Arc<AtomicBool>,
}

impl std::fmt::Debug for SequenceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceModel")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl SequenceModel {
    pub fn new(name: impl Into<String>, config: ModelConfig, store: Arc<dyn ModelStore>) -> Self {
        Self {
            name: name.into(),
            config,
            store,
            state: Arc::new(RwLock::new(ModelState::Untrained)),
            network: Arc::new(RwLock::new(None)),
            in_flight: Arc::new(Mutex::new(None)),
            training: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Prices needed before `train` will attempt a fit.
    pub fn min_training_points(&self) -> usize {
        self.config.min_training_points()
    }

    fn network_snapshot(&self) -> Option<Arc<LstmNetwork>> {
        match self.network.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn spawn_training(&self, prices: Vec<f64>, epochs: usize) -> SharedTraining {
        self.training.store(true, Ordering::SeqCst);
        {
            let mut state = match self.state.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !state.is_ready() {
                *state = ModelState::Training;
            }
        }

        let config = self.config.clone();
        let name = self.name.clone();
        let state = self.state.clone();
        let network = self.network.clone();
        let in_flight = self.in_flight.clone();
        let training = self.training.clone();
        let warm_start = self.network_snapshot();

        let handle = tokio::spawn(async move {
            let fitted = tokio::task::spawn_blocking(move || {
                fit_network(&prices, epochs, &config, warm_start.as_deref())
            })
            .await
            .unwrap_or_else(|e| Err(TrainingError::TaskFailed(e.to_string())));

            let outcome = match fitted {
                Ok((trained, report)) => {
                    write_lock(&network, Some(Arc::new(trained)));
                    write_lock(&state, ModelState::Ready);
                    info!(
                        "Model '{}' training complete: loss={:.4}, val_loss={:?}",
                        name, report.final_loss, report.final_validation_loss
                    );
                    Ok(report)
                }
                Err(e) => {
                    write_lock(&state, ModelState::Failed(e.to_string()));
                    warn!("Model '{}' training failed: {}", name, e);
                    Err(e)
                }
            };

            in_flight.lock().await.take();
            training.store(false, Ordering::SeqCst);
            outcome
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(TrainingError::TaskFailed(e.to_string())))
        }
        .boxed()
        .shared()
    }
}

#[async_trait]
impl ForecastModel for SequenceModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn sequence_length(&self) -> usize {
        self.config.sequence_length
    }

    fn state(&self) -> ModelState {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn is_training(&self) -> bool {
        self.training.load(Ordering::SeqCst)
    }

    async fn train(
        &self,
        prices: &[f64],
        epochs: usize,
        cancel: &CancellationFlag,
    ) -> Result<TrainingReport, TrainingError> {
        if cancel.is_cancelled() {
            return Err(TrainingError::Cancelled);
        }

        let run = {
            let mut guard = self.in_flight.lock().await;
            match guard.as_ref() {
                Some(existing) => {
                    info!("Model '{}': joining in-flight training run", self.name);
                    existing.clone()
                }
                None => {
                    info!(
                        "Model '{}': preparing training data from {} prices",
                        self.name,
                        prices.len()
                    );
                    let run = self.spawn_training(prices.to_vec(), epochs);
                    *guard = Some(run.clone());
                    run
                }
            }
        };

        run.await
    }

    async fn predict(
        &self,
        sequence: &[FeatureVector],
        cancel: &CancellationFlag,
    ) -> Result<f64, InferenceError> {
        if cancel.is_cancelled() {
            return Err(InferenceError::Cancelled);
        }

        let state = self.state();
        if !state.is_ready() {
            return Err(InferenceError::NotReady(state));
        }
        if sequence.len() != self.config.sequence_length {
            return Err(InferenceError::SequenceLength {
                expected: self.config.sequence_length,
                actual: sequence.len(),
            });
        }

        let network = self
            .network_snapshot()
            .ok_or_else(|| InferenceError::Internal("ready model has no network".to_string()))?;

        let value = network.predict(sequence);
        if !value.is_finite() {
            return Err(InferenceError::NonFinite(value));
        }
        Ok(value)
    }

    async fn save(&self) -> Result<(), PersistenceError> {
        let network = self
            .network_snapshot()
            .ok_or(PersistenceError::NothingToSave)?;

        let persisted = PersistedModel {
            format_version: MODEL_FORMAT_VERSION,
            sequence_length: self.config.sequence_length,
            network: (*network).clone(),
        };
        let blob = serde_json::to_vec(&persisted)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;

        if let Err(e) = self.store.save(&self.name, &blob).await {
            warn!("Error saving model '{}': {:#}", self.name, e);
            return Err(PersistenceError::Store(e));
        }
        info!("Model '{}' saved ({} bytes)", self.name, blob.len());
        Ok(())
    }

    async fn load(&self) -> Result<bool, PersistenceError> {
        if self.is_training() {
            warn!("Model '{}': load skipped while training", self.name);
            return Ok(false);
        }

        let blob = match self.store.load(&self.name).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                info!("No saved model '{}' found", self.name);
                return Ok(false);
            }
            Err(e) => {
                warn!("Could not load saved model '{}': {:#}", self.name, e);
                return Err(PersistenceError::Store(e));
            }
        };

        let persisted: PersistedModel =
            serde_json::from_slice(&blob).map_err(|e| PersistenceError::Deserialize {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

        if persisted.format_version != MODEL_FORMAT_VERSION
            || persisted.sequence_length != self.config.sequence_length
            || persisted.network.input_size() != FEATURE_COUNT
        {
            return Err(PersistenceError::Deserialize {
                name: self.name.clone(),
                reason: format!(
                    "incompatible model (format v{}, sequence length {})",
                    persisted.format_version, persisted.sequence_length
                ),
            });
        }

        write_lock(&self.network, Some(Arc::new(persisted.network)));
        write_lock(&self.state, ModelState::Ready);
        info!("Model '{}' loaded successfully", self.name);
        Ok(true)
    }
}

/// Synchronous training body, run on the blocking pool.
fn fit_network(
    prices: &[f64],
    epochs: usize,
    config: &ModelConfig,
    warm_start: Option<&LstmNetwork>,
) -> Result<(LstmNetwork, TrainingReport), TrainingError> {
    let required = config.min_training_points();
    if prices.len() < required {
        return Err(TrainingError::InsufficientData {
            required,
            available: prices.len(),
        });
    }

    let examples = build_training_examples(prices, config.sequence_length);
    if examples.len() < MIN_VALID_SEQUENCES {
        return Err(TrainingError::InsufficientValidSequences {
            required: MIN_VALID_SEQUENCES,
            found: examples.len(),
        });
    }

    let samples = examples.len();
    let (train, validation) = split_validation(examples, config.validation_split);
    info!(
        "Training with {} samples ({} train, {} validation)...",
        samples,
        train.len(),
        validation.len()
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut network = match warm_start {
        Some(existing)
            if existing.hidden_sizes() == config.hidden_units
                && existing.dense_size() == config.dense_units =>
        {
            existing.clone()
        }
        _ => LstmNetwork::new(
            FEATURE_COUNT,
            &config.hidden_units,
            config.dense_units,
            &mut rng,
        ),
    };

    let options = FitOptions {
        epochs,
        batch_size: config.batch_size,
        learning_rate: config.learning_rate,
        gradient_clip: config.gradient_clip(),
        dropout: config.dropout,
    };
    let history = network.fit(&train, &validation, &options, &mut rng)?;

    let (final_loss, final_mae) = match (history.loss.last(), history.mae.last()) {
        (Some(&loss), Some(&mae)) => (loss, mae),
        _ => network.evaluate(&train),
    };

    let report = TrainingReport {
        samples,
        train_samples: train.len(),
        validation_samples: validation.len(),
        epochs,
        final_loss,
        final_mae,
        final_validation_loss: history.val_loss.last().copied(),
    };
    Ok((network, report))
}

fn write_lock<T>(lock: &RwLock<T>, value: T) {
    match lock.write() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::features::{build_feature_sequence, price_bounds};
    use crate::infrastructure::model_store::InMemoryModelStore;
    use crate::infrastructure::price_history::random_walk;

    fn small_config() -> ModelConfig {
        ModelConfig {
            hidden_units: vec![6, 4],
            dense_units: 4,
            learning_rate: 0.005,
            ..ModelConfig::default()
        }
    }

    fn model_with_store(store: Arc<InMemoryModelStore>) -> SequenceModel {
        SequenceModel::new("test-model", small_config(), store)
    }

    fn model() -> SequenceModel {
        model_with_store(Arc::new(InMemoryModelStore::new()))
    }

    fn last_window_sequence(prices: &[f64]) -> Vec<FeatureVector> {
        let window = &prices[prices.len() - 30..];
        let (min, max) = price_bounds(window).unwrap();
        build_feature_sequence(window, min, max)
    }

    #[tokio::test]
    async fn test_new_model_is_untrained() {
        let model = model();
        assert_eq!(model.state(), ModelState::Untrained);
        assert_eq!(model.min_training_points(), 50);
    }

    #[tokio::test]
    async fn test_train_rejects_short_series() {
        let model = model();
        let prices = random_walk(1, 40, 100.0);

        let err = model
            .train(&prices, 2, &CancellationFlag::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            TrainingError::InsufficientData {
                required: 50,
                available: 40
            }
        );
        assert!(matches!(model.state(), ModelState::Failed(_)));
    }

    #[tokio::test]
    async fn test_train_rejects_flat_series() {
        let model = model();
        let prices = vec![100.0; 80];

        let err = model
            .train(&prices, 2, &CancellationFlag::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            TrainingError::InsufficientValidSequences {
                required: 10,
                found: 0
            }
        );
    }

    #[tokio::test]
    async fn test_train_succeeds_and_predicts() {
        let model = model();
        let prices = random_walk(9, 120, 100.0);

        let report = model
            .train(&prices, 3, &CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(model.state(), ModelState::Ready);
        assert_eq!(report.samples, 90);
        assert_eq!(report.train_samples, 72);
        assert_eq!(report.validation_samples, 18);
        assert!(report.final_loss.is_finite());
        assert!(report.final_validation_loss.is_some());

        let value = model
            .predict(&last_window_sequence(&prices), &CancellationFlag::new())
            .await
            .unwrap();
        assert!(value > 0.0 && value < 1.0);
    }

    #[tokio::test]
    async fn test_failed_model_recovers_on_successful_train() {
        let model = model();
        let cancel = CancellationFlag::new();

        assert!(model.train(&random_walk(2, 30, 50.0), 1, &cancel).await.is_err());
        assert!(matches!(model.state(), ModelState::Failed(_)));

        model
            .train(&random_walk(2, 80, 50.0), 1, &cancel)
            .await
            .unwrap();
        assert_eq!(model.state(), ModelState::Ready);
    }

    #[tokio::test]
    async fn test_predict_requires_ready_state() {
        let model = model();
        let sequence = vec![[0.5; FEATURE_COUNT]; 30];

        let err = model
            .predict(&sequence, &CancellationFlag::new())
            .await
            .unwrap_err();
        assert_eq!(err, InferenceError::NotReady(ModelState::Untrained));
    }

    #[tokio::test]
    async fn test_predict_checks_sequence_length() {
        let model = model();
        model
            .train(&random_walk(4, 70, 80.0), 1, &CancellationFlag::new())
            .await
            .unwrap();

        let err = model
            .predict(&vec![[0.5; FEATURE_COUNT]; 29], &CancellationFlag::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            InferenceError::SequenceLength {
                expected: 30,
                actual: 29
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_training_leaves_state_untouched() {
        let model = model();
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let err = model
            .train(&random_walk(5, 100, 100.0), 1, &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, TrainingError::Cancelled);
        assert_eq!(model.state(), ModelState::Untrained);
    }

    #[tokio::test]
    async fn test_cancelled_inference_is_rejected() {
        let model = model();
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let err = model
            .predict(&vec![[0.5; FEATURE_COUNT]; 30], &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, InferenceError::Cancelled);
    }

    #[tokio::test]
    async fn test_concurrent_train_calls_share_one_run() {
        let model = Arc::new(model());
        let prices = random_walk(6, 90, 100.0);
        let cancel = CancellationFlag::new();

        let (a, b) = tokio::join!(
            model.train(&prices, 2, &cancel),
            model.train(&prices, 2, &cancel)
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(model.state(), ModelState::Ready);
        assert!(model.in_flight.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_retrain_keeps_serving_ready_network() {
        let model = model();
        let cancel = CancellationFlag::new();
        let prices = random_walk(10, 120, 100.0);
        model.train(&prices, 1, &cancel).await.unwrap();
        let sequence = last_window_sequence(&prices);

        let series = random_walk(11, 300, 100.0);
        let retrain = model.train(&series, 20, &cancel);
        let during = async {
            while !model.is_training() {
                tokio::task::yield_now().await;
            }
            let state = model.state();
            let loaded = model.load().await.unwrap();
            let served = model.predict(&sequence, &cancel).await;
            (state, loaded, served)
        };
        let (report, (state, loaded, served)) = tokio::join!(retrain, during);

        assert_eq!(state, ModelState::Ready);
        assert!(!loaded);
        assert!(served.is_ok());
        assert_eq!(report.unwrap().samples, 270);
        assert_eq!(model.state(), ModelState::Ready);
        assert!(!model.is_training());
    }

    #[tokio::test]
    async fn test_first_training_reports_training_state() {
        let model = model();
        let cancel = CancellationFlag::new();

        let series = random_walk(12, 90, 40.0);
        let run = model.train(&series, 2, &cancel);
        let during = async {
            while !model.is_training() {
                tokio::task::yield_now().await;
            }
            model.state()
        };
        let (report, state) = tokio::join!(run, during);

        assert_eq!(state, ModelState::Training);
        assert!(report.is_ok());
        assert_eq!(model.state(), ModelState::Ready);
    }

    #[tokio::test]
    async fn test_save_without_network_fails() {
        let model = model();
        assert!(matches!(
            model.save().await,
            Err(PersistenceError::NothingToSave)
        ));
    }

    #[tokio::test]
    async fn test_save_then_load_restores_ready_model() {
        let store = Arc::new(InMemoryModelStore::new());
        let trained = model_with_store(store.clone());
        let prices = random_walk(8, 80, 120.0);
        trained
            .train(&prices, 2, &CancellationFlag::new())
            .await
            .unwrap();
        trained.save().await.unwrap();

        let restored = model_with_store(store);
        assert!(restored.load().await.unwrap());
        assert_eq!(restored.state(), ModelState::Ready);

        let sequence = last_window_sequence(&prices);
        let cancel = CancellationFlag::new();
        let before = trained.predict(&sequence, &cancel).await.unwrap();
        let after = restored.predict(&sequence, &cancel).await.unwrap();
        assert!((before - after).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_load_missing_model_keeps_state() {
        let model = model();
        assert!(!model.load().await.unwrap());
        assert_eq!(model.state(), ModelState::Untrained);
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_blob() {
        let store = Arc::new(InMemoryModelStore::new());
        store.save("test-model", b"not json").await.unwrap();
        let model = model_with_store(store);

        assert!(matches!(
            model.load().await,
            Err(PersistenceError::Deserialize { .. })
        ));
        assert_eq!(model.state(), ModelState::Untrained);
    }
}
