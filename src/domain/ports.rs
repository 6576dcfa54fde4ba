//! Interfaces the trading core depends on but does not implement: the
//! exchange (`Broker`), the trade-history sink (`HistoryStore`), the
//! persisted pivot scalar (`PivotStore`), and the read-only analytics
//! consumer (`Reporter`). Concrete implementations live under
//! `infrastructure`.

use crate::domain::errors::BrokerError;
use crate::domain::types::{Balance, Order, OrderId, OrderSide, TradeRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// The exchange the engine trades against. Implementations own retrying
/// transient failures internally (bounded attempts, rate-limit sleep); only
/// `BrokerError::Permanent` / `MissingOrder` are expected to surface here.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn current_price(&self, market: &str) -> Result<Decimal, BrokerError>;

    async fn balances(&self, market: &str) -> Result<Balance, BrokerError>;

    async fn place_limit(
        &self,
        market: &str,
        side: OrderSide,
        price: Decimal,
        volume: Decimal,
    ) -> Result<Order, BrokerError>;

    /// For `Bid`, `amount` is quote-currency notional; for `Ask`, base-asset
    /// volume.
    async fn place_market(
        &self,
        market: &str,
        side: OrderSide,
        amount: Decimal,
    ) -> Result<Order, BrokerError>;

    async fn get_order(&self, id: &OrderId) -> Result<Order, BrokerError>;

    /// Must return an entry for every requested id, or fail with
    /// `MissingOrder`.
    async fn get_orders(&self, ids: &[OrderId]) -> Result<HashMap<OrderId, Order>, BrokerError>;

    /// Idempotent: cancelling an already-closed order is success.
    async fn cancel(&self, id: &OrderId) -> Result<(), BrokerError>;

    async fn cancel_all(&self, market: &str) -> Result<(), BrokerError>;
}

/// Append-only time series of balance snapshots, written once per completed
/// trade cycle.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: TradeRecord) -> anyhow::Result<()>;

    async fn range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<TradeRecord>>;

    /// Convenience read path matching the original `Tracker`'s 90-day
    /// default retention window.
    async fn get_recent(&self, days: i64) -> anyhow::Result<Vec<TradeRecord>> {
        let to = Utc::now();
        let from = to - chrono::Duration::days(days);
        self.range(from, to).await
    }
}

/// The single persisted `PIVOT` scalar. Owned and exclusively written by the
/// `TradingEngine`; re-architected as an injected handle rather than the
/// module-level singleton the original source used.
#[async_trait]
pub trait PivotStore: Send + Sync {
    async fn get(&self) -> anyhow::Result<Decimal>;
    async fn set(&self, pivot: Decimal) -> anyhow::Result<()>;
}

/// Read-only consumer of the history stream. The concrete chat/dashboard
/// front-end is out of scope; this trait is the seam a reporter would
/// implement against.
pub trait Reporter: Send + Sync {
    fn on_trade(&self, record: &TradeRecord);
}
