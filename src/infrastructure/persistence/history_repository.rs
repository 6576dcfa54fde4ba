use crate::domain::ports::HistoryStore;
use crate::domain::types::TradeRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, record: TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_history (ts, balance, price, ratio)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(record.ts.timestamp())
        .bind(record.balance.to_string())
        .bind(record.price.to_string())
        .bind(record.ratio.to_string())
        .execute(&self.pool)
        .await
        .context("failed to append trade history")?;

        Ok(())
    }

    async fn range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            "SELECT ts, balance, price, ratio FROM trade_history WHERE ts >= ? AND ts <= ? ORDER BY ts ASC",
        )
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_all(&self.pool)
        .await
        .context("failed to query trade history range")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let ts: i64 = row.try_get("ts")?;
            let balance: String = row.try_get("balance")?;
            let price: String = row.try_get("price")?;
            let ratio: String = row.try_get("ratio")?;

            records.push(TradeRecord {
                ts: Utc.timestamp_opt(ts, 0).single().context("invalid stored timestamp")?,
                balance: Decimal::from_str(&balance)?,
                price: Decimal::from_str(&price)?,
                ratio: Decimal::from_str(&ratio)?,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn append_then_range_round_trips() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let store = SqliteHistoryStore::new(db.pool.clone());

        let now = Utc::now();
        let record = TradeRecord {
            ts: now,
            balance: dec!(600_000),
            price: dec!(1_000),
            ratio: dec!(0.5),
        };
        store.append(record.clone()).await.unwrap();

        let from = now - chrono::Duration::seconds(5);
        let to = now + chrono::Duration::seconds(5);
        let fetched = store.range(from, to).await.unwrap();

        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].balance, record.balance);
        assert_eq!(fetched[0].price, record.price);
    }

    #[tokio::test]
    async fn get_recent_defaults_to_ninety_day_window() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let store = SqliteHistoryStore::new(db.pool.clone());

        let old = TradeRecord {
            ts: Utc::now() - chrono::Duration::days(200),
            balance: dec!(1),
            price: dec!(1),
            ratio: dec!(0.5),
        };
        let recent = TradeRecord {
            ts: Utc::now(),
            balance: dec!(2),
            price: dec!(1),
            ratio: dec!(0.5),
        };
        store.append(old).await.unwrap();
        store.append(recent.clone()).await.unwrap();

        let recents = store.get_recent(90).await.unwrap();
        assert_eq!(recents.len(), 1);
        assert_eq!(recents[0].balance, recent.balance);
    }
}
