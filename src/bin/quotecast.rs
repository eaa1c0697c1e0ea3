//! Quotecast CLI - price forecasts from the command line
//!
//! # Usage
//! ```sh
//! PRICE_SOURCE=csv PRICE_DATA_DIR=data/prices cargo run -- predict AAPL
//! cargo run -- train AAPL --epochs 50
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use quotecast::application::ForecastService;
use quotecast::config::EngineConfig;
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about = "Short-horizon price forecasts", long_about = None)]
struct Args {
    /// TOML config file; environment variables are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Forecast the next price, serving a cached result when fresh
    Predict { tickers: Vec<String> },
    /// Forecast from fresh data, discarding any cached result
    Refresh { tickers: Vec<String> },
    /// Train the sequence model on one ticker's history and save it
    Train {
        ticker: String,
        #[arg(long)]
        epochs: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stderr_layer)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::from_env()?,
    };
    info!(
        "Quotecast {} (store={:?}, prices={:?})",
        env!("CARGO_PKG_VERSION"),
        config.storage.model_store,
        config.storage.price_source
    );

    let service = ForecastService::build(&config).await?;
    service.initialize().await;

    match args.command {
        Command::Predict { tickers } => {
            for ticker in tickers {
                let result = service.forecast(&ticker).await?;
                println!(
                    "{}",
                    serde_json::json!({ "ticker": ticker, "prediction": &*result })
                );
            }
        }
        Command::Refresh { tickers } => {
            for ticker in tickers {
                let result = service.refresh(&ticker).await?;
                println!(
                    "{}",
                    serde_json::json!({ "ticker": ticker, "prediction": &*result })
                );
            }
        }
        Command::Train { ticker, epochs } => {
            let epochs = epochs.unwrap_or(config.prediction.training_epochs);
            let report = service.train(&ticker, epochs).await?;
            println!(
                "{}",
                serde_json::json!({ "ticker": ticker, "training": report })
            );
        }
    }

    Ok(())
}
