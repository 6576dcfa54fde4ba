//! File-backed `PivotStore`. The original `Config` singleton kept the pivot
//! inside a shared `config.json`; here it is its own file and an injected
//! handle rather than a module-level global.

use crate::domain::ports::PivotStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

#[derive(Serialize, Deserialize)]
struct PivotFile {
    pivot: Decimal,
}

pub struct JsonPivotStore {
    path: PathBuf,
    cached: Mutex<Option<Decimal>>,
}

impl JsonPivotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Seeds the backing file with `initial` if it does not already exist,
    /// matching the original's "only set PIVOT from env if absent" behavior.
    pub async fn seed(&self, initial: Decimal) -> Result<()> {
        if fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        self.write(initial).await
    }

    async fn write(&self, pivot: Decimal) -> Result<()> {
        let contents = serde_json::to_string_pretty(&PivotFile { pivot })?;
        fs::write(&self.path, contents)
            .await
            .with_context(|| format!("failed to write pivot file at {}", self.path.display()))?;
        *self.cached.lock().await = Some(pivot);
        Ok(())
    }

    async fn read(&self) -> Result<Decimal> {
        let contents = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read pivot file at {}", self.path.display()))?;
        let parsed: PivotFile = serde_json::from_str(&contents)?;
        Ok(parsed.pivot)
    }
}

#[async_trait]
impl PivotStore for JsonPivotStore {
    async fn get(&self) -> Result<Decimal> {
        if let Some(cached) = *self.cached.lock().await {
            return Ok(cached);
        }
        let pivot = self.read().await?;
        *self.cached.lock().await = Some(pivot);
        Ok(pivot)
    }

    async fn set(&self, pivot: Decimal) -> Result<()> {
        self.write(pivot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn seed_only_writes_when_file_is_absent() {
        let dir = std::env::temp_dir().join(format!("pivot-test-{}", uuid::Uuid::new_v4()));
        let store = JsonPivotStore::new(dir.clone());

        store.seed(dec!(1_000)).await.unwrap();
        assert_eq!(store.get().await.unwrap(), dec!(1_000));

        store.set(dec!(2_000)).await.unwrap();
        store.seed(dec!(1_000)).await.unwrap();
        assert_eq!(store.get().await.unwrap(), dec!(2_000));

        let _ = fs::remove_file(&dir).await;
    }
}
