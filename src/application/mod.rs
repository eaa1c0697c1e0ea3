// Pure numeric building blocks
pub mod features;
pub mod indicators;

// Prediction methods
pub mod fallback;
pub mod ml;

// Orchestration
pub mod cache;
pub mod cancellation;
pub mod forecast_service;
pub mod orchestrator;

pub use forecast_service::ForecastService;
pub use orchestrator::PredictionOrchestrator;
