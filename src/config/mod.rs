//! Configuration loading from environment variables, composed from
//! per-concern sub-configs the way the upstream `Config` aggregates
//! `BrokerEnvConfig`/`StrategyEnvConfig`/`RiskEnvConfig`.

mod upbit_config;

pub use upbit_config::UpbitConfig;

use anyhow::{Context, Result};
use std::env;

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The traded market pair, e.g. `KRW-BTC`.
    pub market: String,
    pub upbit: UpbitConfig,
    pub database_url: String,
    pub pivot_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let market = env::var("MARKET").context("MARKET must be set, e.g. KRW-BTC")?;

        Ok(Self {
            market,
            upbit: UpbitConfig::from_env()?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://pivot_ratio_engine.db".to_string()),
            pivot_path: env::var("PIVOT_PATH").unwrap_or_else(|_| "pivot.json".to_string()),
        })
    }
}
