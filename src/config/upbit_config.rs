//! Upbit broker credentials and endpoint, parsed from environment variables.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct UpbitConfig {
    pub access_key: String,
    pub secret_key: String,
    pub base_url: String,
}

impl UpbitConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            access_key: env::var("UPBIT_ACCESS_KEY").context("UPBIT_ACCESS_KEY must be set")?,
            secret_key: env::var("UPBIT_SECRET_KEY").context("UPBIT_SECRET_KEY must be set")?,
            base_url: env::var("UPBIT_BASE_URL")
                .unwrap_or_else(|_| "https://api.upbit.com".to_string()),
        })
    }
}
