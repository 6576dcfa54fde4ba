//! Headless pivot-ratio trading server.
//!
//! # Environment Variables
//! - `MARKET` - traded market pair, e.g. `KRW-BTC` (required)
//! - `PIVOT` - initial pivot price, used only the first time the pivot
//!   file is created (required)
//! - `UPBIT_ACCESS_KEY` / `UPBIT_SECRET_KEY` - exchange credentials (required)
//! - `UPBIT_BASE_URL` - defaults to `https://api.upbit.com`
//! - `DATABASE_URL` - defaults to `sqlite://pivot_ratio_engine.db`
//! - `PIVOT_PATH` - defaults to `pivot.json`

use anyhow::{Context, Result};
use pivot_ratio_engine::application::engine::TradingEngine;
use pivot_ratio_engine::config::Config;
use pivot_ratio_engine::infrastructure::persistence::{Database, JsonPivotStore, SqliteHistoryStore};
use pivot_ratio_engine::infrastructure::upbit::UpbitBroker;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "pivot-ratio-engine starting");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(market = %config.market, "configuration loaded");

    let database = Database::new(&config.database_url).await?;
    let history = Arc::new(SqliteHistoryStore::new(database.pool.clone()));

    let pivot_store = Arc::new(JsonPivotStore::new(config.pivot_path.clone()));
    if let Ok(initial) = std::env::var("PIVOT") {
        let initial = Decimal::from_str(&initial).context("PIVOT must be a decimal number")?;
        pivot_store.seed(initial).await?;
    }

    let broker = Arc::new(UpbitBroker::new(
        config.upbit.access_key.clone(),
        config.upbit.secret_key.clone(),
        config.upbit.base_url.clone(),
    ));

    let engine = Arc::new(TradingEngine::new(
        config.market.clone(),
        broker,
        history,
        pivot_store,
        None,
    ));

    info!("calibrating...");
    engine.initialize().await.context("initialize() failed")?;

    let run_handle = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };

    info!("engine running. press ctrl+c to shut down.");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping engine...");
    engine.stop().await;

    match run_handle.await {
        Ok(Ok(())) => info!("engine stopped cleanly"),
        Ok(Err(e)) => tracing::error!(error = %e, "engine stopped with an error"),
        Err(e) => tracing::error!(error = %e, "engine task panicked"),
    }

    Ok(())
}
