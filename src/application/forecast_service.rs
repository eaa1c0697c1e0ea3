use crate::application::ml::SequenceModel;
use crate::application::orchestrator::PredictionOrchestrator;
use crate::config::EngineConfig;
use crate::domain::ports::PriceHistoryProvider;
use crate::domain::types::{PredictionResult, TrainingReport};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::factory::ServiceFactory;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Ticker-level facade: fetches history, then forecasts or trains.
pub struct ForecastService {
    provider: Arc<dyn PriceHistoryProvider>,
    orchestrator: Arc<PredictionOrchestrator>,
    lookback: usize,
}

impl ForecastService {
    pub fn new(
        provider: Arc<dyn PriceHistoryProvider>,
        orchestrator: Arc<PredictionOrchestrator>,
        lookback: usize,
    ) -> Self {
        Self {
            provider,
            orchestrator,
            lookback,
        }
    }

    /// Wire the configured price source, model store and model.
    pub async fn build(config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let store = ServiceFactory::create_model_store(&config.storage).await?;
        let provider = ServiceFactory::create_price_history(&config.storage);
        let model = SequenceModel::new(
            config.prediction.model_name.clone(),
            config.model.clone(),
            store,
        );
        let orchestrator = PredictionOrchestrator::new(
            Arc::new(model),
            &config.prediction,
            Arc::new(SystemClock),
        );

        Ok(Self::new(
            provider,
            Arc::new(orchestrator),
            config.storage.price_lookback,
        ))
    }

    pub fn orchestrator(&self) -> &Arc<PredictionOrchestrator> {
        &self.orchestrator
    }

    /// Warm-start the model from the store. Returns whether a model was restored.
    pub async fn initialize(&self) -> bool {
        let loaded = self.orchestrator.load_model().await;
        info!(
            "Forecast service ready (model state: {})",
            self.orchestrator.model_state()
        );
        loaded
    }

    async fn history(&self, ticker: &str) -> Result<Vec<f64>> {
        self.provider
            .closing_prices(ticker, self.lookback)
            .await
            .with_context(|| format!("Failed to fetch price history for {}", ticker))
    }

    pub async fn forecast(&self, ticker: &str) -> Result<Arc<PredictionResult>> {
        let prices = self.history(ticker).await?;
        Ok(self.orchestrator.predict(&prices, ticker).await?)
    }

    /// Forecast from freshly fetched data, bypassing any cached result.
    pub async fn refresh(&self, ticker: &str) -> Result<Arc<PredictionResult>> {
        self.orchestrator.invalidate(ticker);
        self.forecast(ticker).await
    }

    pub async fn train(&self, ticker: &str, epochs: usize) -> Result<TrainingReport> {
        let prices = self.history(ticker).await?;
        let report = self
            .orchestrator
            .train(&prices, epochs)
            .await
            .with_context(|| format!("Training on {} failed", ticker))?;
        // Results computed by the previous model are stale now
        self.orchestrator.invalidate(ticker);
        Ok(report)
    }
}
