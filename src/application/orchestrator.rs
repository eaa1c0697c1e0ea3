use crate::application::cache::PredictionCache;
use crate::application::cancellation::CancellationFlag;
use crate::application::fallback::{MIN_CONFIDENCE, StatisticalFallbackPredictor};
use crate::application::features::{MIN_WINDOW_RANGE, build_feature_sequence, price_bounds};
use crate::application::indicators::calculate_indicators;
use crate::application::ml::ForecastModel;
use crate::config::PredictionConfig;
use crate::domain::errors::{InferenceError, PredictionError, TrainingError};
use crate::domain::ports::Clock;
use crate::domain::types::{
    Direction, ModelState, PredictionMethod, PredictionResult, TrainingReport, round_confidence,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const ML_BASE_CONFIDENCE: f64 = 85.0;
const ML_VOLATILITY_WEIGHT: f64 = 1000.0;
const ML_MIN_CONFIDENCE: f64 = 60.0;
const ML_MAX_CONFIDENCE: f64 = 95.0;
const EXTREME_MOVE_RATIO: f64 = 0.1;
const EXTREME_MOVE_PENALTY: f64 = 0.8;

/// Confidence of an ML forecast.
///
/// `clamp(85 - volatility/price * 1000, 60, 95)`, scaled by 0.8 when the
/// forecast moves more than 10% away from `current_price`, floored at 50 and
/// rounded to one decimal.
pub fn ml_confidence(volatility: f64, current_price: f64, predicted_price: f64) -> f64 {
    let volatility_ratio = if current_price != 0.0 {
        volatility / current_price
    } else {
        0.0
    };
    let mut confidence = (ML_BASE_CONFIDENCE - volatility_ratio * ML_VOLATILITY_WEIGHT)
        .clamp(ML_MIN_CONFIDENCE, ML_MAX_CONFIDENCE);

    if (predicted_price - current_price).abs() > current_price.abs() * EXTREME_MOVE_RATIO {
        confidence *= EXTREME_MOVE_PENALTY;
    }

    round_confidence(confidence.max(MIN_CONFIDENCE))
}

/// Train `model` and persist it on success. A failed save is logged only.
async fn train_and_persist(
    model: &dyn ForecastModel,
    prices: &[f64],
    epochs: usize,
    cancel: &CancellationFlag,
) -> Result<TrainingReport, TrainingError> {
    let report = model.train(prices, epochs, cancel).await?;

    if let Err(e) = model.save().await {
        warn!("Model '{}' trained but not persisted: {}", model.name(), e);
    }
    Ok(report)
}

/// Top-level prediction entry point.
///
/// Chooses between the sequence model and the statistical fallback, trains
/// the model on demand, and caches results per ticker. The only hard failure
/// is an empty price series.
pub struct PredictionOrchestrator {
    model: Arc<dyn ForecastModel>,
    fallback: StatisticalFallbackPredictor,
    cache: PredictionCache,
    auto_train: bool,
    min_training_points: usize,
    training_epochs: usize,
    training_timeout: Option<Duration>,
    cancel: CancellationFlag,
}

impl PredictionOrchestrator {
    pub fn new(
        model: Arc<dyn ForecastModel>,
        config: &PredictionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            model,
            fallback: StatisticalFallbackPredictor::new(),
            cache: PredictionCache::new(config.cache_ttl(), clock),
            auto_train: config.auto_train,
            min_training_points: config.min_training_points,
            training_epochs: config.training_epochs,
            training_timeout: config.training_timeout(),
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_training_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.training_timeout = timeout;
        self
    }

    pub fn model(&self) -> &Arc<dyn ForecastModel> {
        &self.model
    }

    pub fn model_state(&self) -> ModelState {
        self.model.state()
    }

    pub fn cache(&self) -> &PredictionCache {
        &self.cache
    }

    /// Stop starting new training runs and inference calls.
    ///
    /// Predictions keep working through the statistical fallback.
    pub fn cancel(&self) {
        info!("Prediction orchestrator cancelled; ML path disabled");
        self.cancel.cancel();
    }

    pub fn resume(&self) {
        self.cancel.reset();
    }

    /// Drop the cached result for `ticker`. Returns whether one existed.
    pub fn invalidate(&self, ticker: &str) -> bool {
        let removed = self.cache.invalidate(ticker);
        if removed {
            debug!("Invalidated cached prediction for {}", ticker);
        }
        removed
    }

    /// Restore a previously saved model. Failures are logged and reported
    /// as `false`.
    pub async fn load_model(&self) -> bool {
        match self.model.load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Model '{}' not restored: {}", self.model.name(), e);
                false
            }
        }
    }

    /// Train the model on `prices` and persist it on success.
    pub async fn train(
        &self,
        prices: &[f64],
        epochs: usize,
    ) -> Result<TrainingReport, TrainingError> {
        info!(
            "Training model '{}' on {} prices for {} epochs",
            self.model.name(),
            prices.len(),
            epochs
        );
        train_and_persist(self.model.as_ref(), prices, epochs, &self.cancel).await
    }

    pub async fn predict(
        &self,
        prices: &[f64],
        ticker: &str,
    ) -> Result<Arc<PredictionResult>, PredictionError> {
        if prices.is_empty() {
            warn!("No price data for {}", ticker);
            return Err(PredictionError::NoData {
                ticker: ticker.to_string(),
            });
        }

        if !ticker.is_empty()
            && let Some(cached) = self.cache.get(ticker)
        {
            debug!("Cache hit for {}", ticker);
            return Ok(cached);
        }

        if self.auto_train
            && !self.model.state().is_ready()
            && prices.len() >= self.min_training_points
        {
            if self.model.is_training() {
                debug!("Training already in flight; not waiting on it for {}", ticker);
            } else {
                self.auto_train_model(prices, ticker).await;
            }
        }

        let result = match self.predict_ml(prices, ticker).await {
            Ok(Some(result)) => result,
            Ok(None) => self.predict_fallback(prices),
            Err(e) => {
                warn!("ML prediction failed for {}: {}", ticker, e);
                self.predict_fallback(prices)
            }
        };

        let result = Arc::new(result);
        if !ticker.is_empty() {
            self.cache.set(ticker, result.clone());
        }
        Ok(result)
    }

    /// Runs training and persistence as a detached task so both complete
    /// even when the wait here times out.
    async fn auto_train_model(&self, prices: &[f64], ticker: &str) {
        let model = self.model.clone();
        let cancel = self.cancel.clone();
        let prices = prices.to_vec();
        let epochs = self.training_epochs;
        info!(
            "Auto-training model '{}' on {} prices for {}",
            model.name(),
            prices.len(),
            ticker
        );
        let run = tokio::spawn(async move {
            train_and_persist(model.as_ref(), &prices, epochs, &cancel).await
        });

        let joined = match self.training_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        "Training for {} exceeded {:?}; continuing with fallback",
                        ticker, limit
                    );
                    return;
                }
            },
            None => run.await,
        };

        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Auto-training for {} failed: {}", ticker, e),
            Err(e) => warn!("Auto-training task for {} aborted: {}", ticker, e),
        }
    }

    /// `Ok(None)` when the ML path does not apply to this series.
    async fn predict_ml(
        &self,
        prices: &[f64],
        ticker: &str,
    ) -> Result<Option<PredictionResult>, InferenceError> {
        let sequence_length = self.model.sequence_length();
        if !self.model.state().is_ready() || sequence_length == 0 || prices.len() < sequence_length
        {
            return Ok(None);
        }

        let window = &prices[prices.len() - sequence_length..];
        let Some((min_price, max_price)) = price_bounds(window) else {
            return Ok(None);
        };
        if max_price - min_price < MIN_WINDOW_RANGE {
            info!("Price range too small for {}, using statistical method", ticker);
            return Ok(None);
        }

        let sequence = build_feature_sequence(window, min_price, max_price);
        let normalized = self.model.predict(&sequence, &self.cancel).await?;
        let predicted_price = normalized * (max_price - min_price) + min_price;

        let current_price = prices[prices.len() - 1];
        let indicators = calculate_indicators(prices);

        Ok(Some(PredictionResult {
            predicted_price,
            confidence: ml_confidence(indicators.volatility, current_price, predicted_price),
            direction: Direction::of_move(predicted_price, current_price),
            volatility: indicators.volatility,
            indicators,
            method: PredictionMethod::Ml,
        }))
    }

    fn predict_fallback(&self, prices: &[f64]) -> PredictionResult {
        match self.fallback.predict(prices) {
            Some(result) => result,
            // prices is non-empty here, so the fallback always produces a result
            None => PredictionResult {
                predicted_price: prices[prices.len() - 1],
                confidence: MIN_CONFIDENCE,
                direction: Direction::Flat,
                volatility: 0.0,
                indicators: calculate_indicators(prices),
                method: PredictionMethod::StatisticalMinimal,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::PersistenceError;
    use crate::domain::types::FeatureVector;
    use crate::infrastructure::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Model double returning a fixed normalized output.
    struct StubModel {
        state: Mutex<ModelState>,
        output: f64,
        train_error: Option<TrainingError>,
        train_delay: Option<Duration>,
        training: AtomicBool,
        train_calls: AtomicUsize,
        predict_calls: AtomicUsize,
        save_calls: AtomicUsize,
    }

    impl StubModel {
        fn new(state: ModelState, output: f64) -> Self {
            Self {
                state: Mutex::new(state),
                output,
                train_error: None,
                train_delay: None,
                training: AtomicBool::new(false),
                train_calls: AtomicUsize::new(0),
                predict_calls: AtomicUsize::new(0),
                save_calls: AtomicUsize::new(0),
            }
        }

        fn ready(output: f64) -> Self {
            Self::new(ModelState::Ready, output)
        }
    }

    #[async_trait]
    impl ForecastModel for StubModel {
        fn name(&self) -> &str {
            "stub"
        }

        fn sequence_length(&self) -> usize {
            30
        }

        fn state(&self) -> ModelState {
            self.state.lock().unwrap().clone()
        }

        fn is_training(&self) -> bool {
            self.training.load(Ordering::SeqCst)
        }

        async fn train(
            &self,
            _prices: &[f64],
            epochs: usize,
            cancel: &CancellationFlag,
        ) -> Result<TrainingReport, TrainingError> {
            if cancel.is_cancelled() {
                return Err(TrainingError::Cancelled);
            }
            self.train_calls.fetch_add(1, Ordering::SeqCst);
            self.training.store(true, Ordering::SeqCst);
            if let Some(delay) = self.train_delay {
                tokio::time::sleep(delay).await;
            }
            self.training.store(false, Ordering::SeqCst);
            if let Some(e) = &self.train_error {
                *self.state.lock().unwrap() = ModelState::Failed(e.to_string());
                return Err(e.clone());
            }
            *self.state.lock().unwrap() = ModelState::Ready;
            Ok(TrainingReport {
                samples: 10,
                train_samples: 8,
                validation_samples: 2,
                epochs,
                final_loss: 0.01,
                final_mae: 0.05,
                final_validation_loss: Some(0.02),
            })
        }

        async fn predict(
            &self,
            sequence: &[FeatureVector],
            cancel: &CancellationFlag,
        ) -> Result<f64, InferenceError> {
            if cancel.is_cancelled() {
                return Err(InferenceError::Cancelled);
            }
            self.predict_calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(sequence.len(), 30);
            Ok(self.output)
        }

        async fn save(&self) -> Result<(), PersistenceError> {
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn load(&self) -> Result<bool, PersistenceError> {
            Ok(false)
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap(),
        ))
    }

    fn orchestrator_with(model: Arc<StubModel>, clock: Arc<ManualClock>) -> PredictionOrchestrator {
        PredictionOrchestrator::new(model, &PredictionConfig::default(), clock)
    }

    /// One spike followed by a flat tail: window range 100..120, zero recent volatility.
    fn spike_then_flat() -> Vec<f64> {
        let mut prices = vec![120.0];
        prices.extend(std::iter::repeat_n(100.0, 29));
        prices
    }

    fn uptrend(len: usize) -> Vec<f64> {
        (0..len).map(|i| 100.0 + i as f64 * 0.5).collect()
    }

    #[test]
    fn test_ml_confidence_ranges() {
        assert_eq!(ml_confidence(0.0, 100.0, 101.0), 85.0);
        // 85 - 0.05 * 1000 clamps to 60
        assert_eq!(ml_confidence(5.0, 100.0, 101.0), 60.0);
        // 60 * 0.8 = 48 is floored at 50
        assert_eq!(ml_confidence(5.0, 100.0, 120.0), 50.0);
        assert_eq!(ml_confidence(1.0, 100.0, 100.0), 75.0);
        assert_eq!(ml_confidence(0.0, 0.0, 0.0), 85.0);
    }

    #[tokio::test]
    async fn test_empty_series_is_no_data() {
        let orchestrator = orchestrator_with(Arc::new(StubModel::ready(0.5)), clock());

        let err = orchestrator.predict(&[], "AAPL").await.unwrap_err();
        assert_eq!(
            err,
            PredictionError::NoData {
                ticker: "AAPL".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_extreme_move_penalty() {
        let orchestrator = orchestrator_with(Arc::new(StubModel::ready(0.99)), clock());

        let result = orchestrator.predict(&spike_then_flat(), "").await.unwrap();

        assert_eq!(result.method, PredictionMethod::Ml);
        assert!((result.predicted_price - 119.8).abs() < 1e-9);
        assert_eq!(result.direction, Direction::Up);
        assert_eq!(result.confidence, round_confidence(85.0 * 0.8));
    }

    #[tokio::test]
    async fn test_moderate_move_keeps_full_confidence() {
        let orchestrator = orchestrator_with(Arc::new(StubModel::ready(0.02)), clock());

        let result = orchestrator.predict(&spike_then_flat(), "").await.unwrap();

        assert_eq!(result.method, PredictionMethod::Ml);
        assert!((result.predicted_price - 100.4).abs() < 1e-9);
        assert_eq!(result.confidence, 85.0);
    }

    #[tokio::test]
    async fn test_flat_window_uses_fallback() {
        let model = Arc::new(StubModel::ready(0.5));
        let orchestrator = orchestrator_with(model.clone(), clock());

        let result = orchestrator.predict(&[100.0; 40], "FLAT").await.unwrap();

        assert_eq!(result.method, PredictionMethod::Statistical);
        assert_eq!(model.predict_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_short_series_uses_fallback_without_training() {
        let model = Arc::new(StubModel::new(ModelState::Untrained, 0.5));
        let orchestrator = orchestrator_with(model.clone(), clock());

        let result = orchestrator.predict(&uptrend(40), "AAPL").await.unwrap();

        assert_eq!(result.method, PredictionMethod::Statistical);
        assert_eq!(model.train_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auto_train_then_ml_and_persist() {
        let model = Arc::new(StubModel::new(ModelState::Untrained, 0.5));
        let orchestrator = orchestrator_with(model.clone(), clock());

        let result = orchestrator.predict(&uptrend(60), "AAPL").await.unwrap();

        assert_eq!(result.method, PredictionMethod::Ml);
        assert_eq!(model.train_calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.save_calls.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.model_state(), ModelState::Ready);
    }

    #[tokio::test]
    async fn test_auto_train_disabled() {
        let model = Arc::new(StubModel::new(ModelState::Untrained, 0.5));
        let config = PredictionConfig {
            auto_train: false,
            ..PredictionConfig::default()
        };
        let orchestrator = PredictionOrchestrator::new(model.clone(), &config, clock());

        orchestrator.predict(&uptrend(60), "AAPL").await.unwrap();
        assert_eq!(model.train_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_training_failure_degrades_to_fallback() {
        let mut stub = StubModel::new(ModelState::Untrained, 0.5);
        stub.train_error = Some(TrainingError::InsufficientValidSequences {
            required: 10,
            found: 3,
        });
        let model = Arc::new(stub);
        let orchestrator = orchestrator_with(model.clone(), clock());

        let result = orchestrator.predict(&uptrend(60), "AAPL").await.unwrap();

        assert_eq!(result.method, PredictionMethod::Statistical);
        assert!(matches!(orchestrator.model_state(), ModelState::Failed(_)));
        assert_eq!(model.save_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_training_timeout_degrades_to_fallback() {
        let mut stub = StubModel::new(ModelState::Untrained, 0.5);
        stub.train_delay = Some(Duration::from_secs(30));
        let orchestrator = orchestrator_with(Arc::new(stub), clock())
            .with_training_timeout(Some(Duration::from_millis(20)));

        let result = orchestrator.predict(&uptrend(60), "AAPL").await.unwrap();

        assert_eq!(result.method, PredictionMethod::Statistical);
    }

    #[tokio::test]
    async fn test_timed_out_training_is_persisted_when_it_completes() {
        let mut stub = StubModel::new(ModelState::Untrained, 0.5);
        stub.train_delay = Some(Duration::from_millis(50));
        let model = Arc::new(stub);
        let orchestrator = orchestrator_with(model.clone(), clock())
            .with_training_timeout(Some(Duration::from_millis(5)));

        let result = orchestrator.predict(&uptrend(60), "AAPL").await.unwrap();
        assert_eq!(result.method, PredictionMethod::Statistical);
        assert_eq!(model.save_calls.load(Ordering::SeqCst), 0);

        tokio::time::timeout(Duration::from_secs(5), async {
            while model.save_calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("background training was never persisted");
        assert_eq!(orchestrator.model_state(), ModelState::Ready);
    }

    #[tokio::test]
    async fn test_in_flight_training_is_not_awaited() {
        let model = Arc::new(StubModel::new(ModelState::Training, 0.5));
        model.training.store(true, Ordering::SeqCst);
        let orchestrator = orchestrator_with(model.clone(), clock()).with_training_timeout(None);

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            orchestrator.predict(&uptrend(60), "MSFT"),
        )
        .await
        .expect("prediction waited on the in-flight run")
        .unwrap();

        assert_eq!(result.method, PredictionMethod::Statistical);
        assert_eq!(model.train_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_orchestrator_still_predicts() {
        let model = Arc::new(StubModel::ready(0.5));
        let orchestrator = orchestrator_with(model.clone(), clock());
        orchestrator.cancel();

        let result = orchestrator.predict(&uptrend(60), "AAPL").await.unwrap();
        assert_eq!(result.method, PredictionMethod::Statistical);

        orchestrator.resume();
        orchestrator.invalidate("AAPL");
        let result = orchestrator.predict(&uptrend(60), "AAPL").await.unwrap();
        assert_eq!(result.method, PredictionMethod::Ml);
    }

    #[tokio::test]
    async fn test_cache_returns_same_result_within_ttl() {
        let clock = clock();
        let model = Arc::new(StubModel::ready(0.6));
        let orchestrator = orchestrator_with(model.clone(), clock.clone());
        let prices = uptrend(60);

        let first = orchestrator.predict(&prices, "AAPL").await.unwrap();
        clock.advance(Duration::from_secs(299));
        let second = orchestrator.predict(&prices, "AAPL").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(model.predict_calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        let third = orchestrator.predict(&prices, "AAPL").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(model.predict_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let orchestrator = orchestrator_with(Arc::new(StubModel::ready(0.6)), clock());
        let prices = uptrend(60);

        let first = orchestrator.predict(&prices, "AAPL").await.unwrap();
        assert!(orchestrator.invalidate("AAPL"));
        assert!(!orchestrator.invalidate("AAPL"));

        let second = orchestrator.predict(&prices, "AAPL").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[tokio::test]
    async fn test_empty_ticker_is_not_cached() {
        let orchestrator = orchestrator_with(Arc::new(StubModel::ready(0.6)), clock());

        orchestrator.predict(&uptrend(60), "").await.unwrap();
        assert!(orchestrator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_confidence_bounds_for_assorted_series() {
        let orchestrator = orchestrator_with(Arc::new(StubModel::ready(0.999)), clock());
        let series: Vec<Vec<f64>> = vec![
            vec![42.0],
            vec![1.0, 2.0, 3.0, 4.0],
            uptrend(12),
            spike_then_flat(),
            (0..80).map(|i| 50.0 + ((i * 7) % 13) as f64 * 3.0).collect(),
        ];

        for prices in series {
            let result = orchestrator.predict(&prices, "").await.unwrap();
            assert!(
                (50.0..=95.0).contains(&result.confidence),
                "confidence {} out of range for {:?}",
                result.confidence,
                result.method
            );
        }
    }
}
