//! End-to-end engine sessions driven against the in-memory mock broker.

use pivot_ratio_engine::application::engine::{EngineState, TradingEngine};
use pivot_ratio_engine::domain::ports::{HistoryStore, PivotStore};
use pivot_ratio_engine::domain::types::TradeRecord;
use pivot_ratio_engine::domain::{price_grid, ratio_model};
use pivot_ratio_engine::infrastructure::mock::MockBroker;
use pivot_ratio_engine::infrastructure::persistence::{Database, JsonPivotStore, SqliteHistoryStore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Mirrors the search `place_orders` performs: step outward from `anchor`
/// with `step` until the residual notional clears `MIN_NOTIONAL` and the
/// move is far enough from `anchor` to be worth the trip.
fn find_threshold_price(
    cash: Decimal,
    quantity: Decimal,
    anchor: Decimal,
    pivot: Decimal,
    step: fn(Decimal) -> Result<Decimal, price_grid::PriceGridError>,
) -> Decimal {
    let mut price = anchor;
    loop {
        price = step(price).expect("price grid should not run out of room in these tests");
        let v = ratio_model::volume(cash, quantity, price, pivot).abs();
        let profitable = ((anchor - price).abs() / anchor) >= ratio_model::PROFIT_THRESHOLD;
        if v >= ratio_model::MIN_NOTIONAL && profitable {
            return price;
        }
    }
}

async fn wait_for_anchor(engine: &TradingEngine, expected: Decimal, timeout: Duration) {
    let start = std::time::Instant::now();
    loop {
        if engine.anchor().await == expected {
            return;
        }
        if start.elapsed() > timeout {
            panic!("anchor did not reach {expected} within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

struct RecordingHistory {
    inner: Mutex<Vec<TradeRecord>>,
}

impl RecordingHistory {
    fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl HistoryStore for RecordingHistory {
    async fn append(&self, record: TradeRecord) -> anyhow::Result<()> {
        self.inner.lock().await.push(record);
        Ok(())
    }

    async fn range(
        &self,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<Vec<TradeRecord>> {
        let records = self.inner.lock().await;
        Ok(records
            .iter()
            .filter(|r| r.ts >= from && r.ts <= to)
            .cloned()
            .collect())
    }
}

struct FixedPivot {
    value: Mutex<Decimal>,
}

impl FixedPivot {
    fn new(initial: Decimal) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }
}

#[async_trait::async_trait]
impl PivotStore for FixedPivot {
    async fn get(&self) -> anyhow::Result<Decimal> {
        Ok(*self.value.lock().await)
    }

    async fn set(&self, pivot: Decimal) -> anyhow::Result<()> {
        *self.value.lock().await = pivot;
        Ok(())
    }
}

/// S1: a portfolio sitting entirely in cash at price == pivot calibrates to
/// the ratio curve via a single market buy.
#[tokio::test]
async fn initialize_calibrates_all_cash_portfolio() {
    let broker = Arc::new(MockBroker::new(dec!(1_000), dec!(600_000), Decimal::ZERO));
    let history = Arc::new(RecordingHistory::new());
    let pivot_store = Arc::new(FixedPivot::new(dec!(1_000)));

    let engine = TradingEngine::new(
        "KRW-BTC",
        broker.clone(),
        history.clone(),
        pivot_store,
        None,
    );

    engine.initialize().await.expect("initialize should succeed");
    assert_eq!(engine.state().await, EngineState::Initialized);

    let balance = broker.balances("KRW-BTC").await.unwrap();
    assert_eq!(balance.cash, dec!(300_000));
    assert_eq!(balance.quantity, dec!(300));
}

/// S2: a portfolio already on the ratio curve calibrates to a no-op.
#[tokio::test]
async fn initialize_is_a_no_op_when_already_on_the_curve() {
    let broker = Arc::new(MockBroker::new(dec!(1_000), dec!(300_000), dec!(300)));
    let history = Arc::new(RecordingHistory::new());
    let pivot_store = Arc::new(FixedPivot::new(dec!(1_000)));

    let engine = TradingEngine::new("KRW-BTC", broker.clone(), history, pivot_store, None);
    engine.initialize().await.expect("initialize should succeed");

    let balance = broker.balances("KRW-BTC").await.unwrap();
    assert_eq!(balance.cash, dec!(300_000));
    assert_eq!(balance.quantity, dec!(300));
}

/// S3/S4: pivot clamps to within one octave of the anchor, in both
/// directions, and is idempotent.
#[tokio::test]
async fn update_pivot_clamps_within_one_octave_and_is_idempotent() {
    let broker = Arc::new(MockBroker::new(dec!(3_000), dec!(300_000), dec!(300)));
    let history = Arc::new(RecordingHistory::new());
    let pivot_store = Arc::new(FixedPivot::new(dec!(1_000)));

    pivot_store.set(dec!(1_000)).await.unwrap();
    let engine = TradingEngine::new(
        "KRW-BTC",
        broker,
        history,
        pivot_store.clone(),
        None,
    );

    engine.initialize().await.expect("initialize should succeed");
    let pivot_after_first = pivot_store.get().await.unwrap();
    assert_eq!(pivot_after_first, dec!(1_500));

    let anchor = dec!(3_000);
    assert!(anchor / dec!(2) <= pivot_after_first && pivot_after_first <= anchor * dec!(2));

    // Re-applying the same clamp to its own output must be a no-op.
    let pivot_after_second = ratio_model::next_pivot(anchor, pivot_after_first);
    assert_eq!(
        pivot_after_second, pivot_after_first,
        "a second application of the octave clamp must not move an already-clamped pivot"
    );
}

/// Exercises `place_orders`/`run_iteration` to completion twice in one
/// session: a buy-side fill followed by a sell-side fill, checking the
/// threshold prices the engine actually searches for, the resulting anchor
/// after each fill, and that trade history timestamps never go backwards.
#[tokio::test]
async fn paired_orders_fill_round_trip_and_history_stays_ordered() {
    let broker = Arc::new(MockBroker::new(dec!(1_000), dec!(300_000), dec!(300)));
    let history = Arc::new(RecordingHistory::new());
    let pivot_store = Arc::new(FixedPivot::new(dec!(1_000)));

    let engine = Arc::new(TradingEngine::new(
        "KRW-BTC",
        broker.clone(),
        history.clone(),
        pivot_store.clone(),
        None,
    ));

    engine.initialize().await.expect("initialize should succeed");
    let anchor0 = engine.anchor().await;
    assert_eq!(anchor0, dec!(1_000), "already-on-curve portfolio calibrates to a no-op");

    let lower_price =
        find_threshold_price(dec!(300_000), dec!(300), anchor0, dec!(1_000), price_grid::prev);

    let run_engine = engine.clone();
    let handle = tokio::spawn(async move { run_engine.start().await });

    // Give run_iteration a moment to place the first resting pair.
    tokio::time::sleep(Duration::from_millis(200)).await;
    broker.set_price(lower_price).await;
    wait_for_anchor(&engine, lower_price, Duration::from_secs(5)).await;

    let balance_after_first = broker.balances("KRW-BTC").await.unwrap();
    let upper_price = find_threshold_price(
        balance_after_first.cash,
        balance_after_first.quantity,
        lower_price,
        dec!(1_000),
        price_grid::next,
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    broker.set_price(upper_price).await;
    wait_for_anchor(&engine, upper_price, Duration::from_secs(5)).await;

    engine.stop().await;
    handle
        .await
        .unwrap()
        .expect("start() should return Ok after a graceful stop");

    let records = history
        .range(chrono::DateTime::<chrono::Utc>::MIN_UTC, chrono::Utc::now())
        .await
        .unwrap();
    assert_eq!(records.len(), 2, "both fills should have been recorded");
    for window in records.windows(2) {
        assert!(
            window[0].ts <= window[1].ts,
            "trade history timestamps must be non-decreasing within a session"
        );
    }

    let final_pivot = pivot_store.get().await.unwrap();
    assert_eq!(final_pivot, dec!(1_000), "anchor never left one octave of the pivot");
}

/// S6: stop() issued mid-session transitions the engine to Terminated and
/// cancels outstanding orders within one polling interval.
#[tokio::test]
async fn stop_during_running_loop_is_graceful() {
    let broker = Arc::new(MockBroker::new(dec!(1_000), dec!(600_000), Decimal::ZERO));
    let history = Arc::new(RecordingHistory::new());
    let pivot_store = Arc::new(FixedPivot::new(dec!(1_000)));

    let engine = Arc::new(TradingEngine::new(
        "KRW-BTC",
        broker,
        history,
        pivot_store,
        None,
    ));

    engine.initialize().await.expect("initialize should succeed");

    let run_engine = engine.clone();
    let handle = tokio::spawn(async move { run_engine.start().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.is_running().await);

    engine.stop().await;
    assert!(engine.is_terminated().await);

    handle.await.unwrap().expect("start() should return Ok after a graceful stop");
}

/// start() refuses to run before a successful initialize().
#[tokio::test]
async fn start_before_initialize_fails() {
    let broker = Arc::new(MockBroker::new(dec!(1_000), dec!(600_000), Decimal::ZERO));
    let history = Arc::new(RecordingHistory::new());
    let pivot_store = Arc::new(FixedPivot::new(dec!(1_000)));

    let engine = TradingEngine::new("KRW-BTC", broker, history, pivot_store, None);
    let err = engine.start().await.unwrap_err();
    assert!(matches!(
        err,
        pivot_ratio_engine::domain::errors::StartError::NotInitialized
    ));
}

#[tokio::test]
async fn sqlite_history_store_persists_across_a_session() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let history = Arc::new(SqliteHistoryStore::new(db.pool.clone()));
    let broker = Arc::new(MockBroker::new(dec!(1_000), dec!(600_000), Decimal::ZERO));
    let pivot_store = Arc::new(FixedPivot::new(dec!(1_000)));

    let engine = TradingEngine::new("KRW-BTC", broker, history.clone(), pivot_store, None);
    engine.initialize().await.unwrap();

    let recents = history.get_recent(90).await.unwrap();
    assert_eq!(recents.len(), 1);
    assert_eq!(recents[0].balance, dec!(600_000));
}
