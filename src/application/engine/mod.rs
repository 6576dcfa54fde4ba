//! The trading state machine: initialization/calibration, anchor
//! optimization, paired-order placement, fill arbitration, and pivot
//! maintenance.

mod state;

pub use state::EngineState;

use crate::domain::errors::{BrokerError, InitError, StartError};
use crate::domain::ports::{Broker, HistoryStore, PivotStore, Reporter};
use crate::domain::price_grid;
use crate::domain::ratio_model::{self, MIN_NOTIONAL, PROFIT_THRESHOLD};
use crate::domain::types::{Balance, OrderId, OrderSide, TradeRecord};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

const POLL_PAIR_INTERVAL: Duration = Duration::from_secs(1);
const POLL_CALIBRATION_INTERVAL: Duration = Duration::from_millis(500);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);
const ITERATION_BACKOFF: Duration = Duration::from_secs(1);

/// The outcome of one fill-arbitration poll: which side closed first.
struct ClosedSide {
    bought: bool,
}

/// §3 Invariant #1 — cash and quantity never go negative.
fn check_balance_invariant(balance: &Balance) -> Result<(), String> {
    if balance.cash.is_sign_negative() || balance.quantity.is_sign_negative() {
        return Err(format!(
            "balance invariant violated: cash={}, quantity={}",
            balance.cash, balance.quantity
        ));
    }
    Ok(())
}

/// §3 Invariant #1 — pivot and anchor are always strictly positive prices.
fn check_positive_price(label: &str, value: Decimal) -> Result<(), String> {
    if value <= Decimal::ZERO {
        return Err(format!("{label} invariant violated: {label}={value}"));
    }
    Ok(())
}

pub struct TradingEngine {
    market: String,
    broker: Arc<dyn Broker>,
    history: Arc<dyn HistoryStore>,
    pivot_store: Arc<dyn PivotStore>,
    reporter: Option<Arc<dyn Reporter>>,
    state: RwLock<EngineState>,
    cancel_requested: AtomicBool,
    balance: Mutex<Balance>,
    anchor: Mutex<Decimal>,
}

impl TradingEngine {
    pub fn new(
        market: impl Into<String>,
        broker: Arc<dyn Broker>,
        history: Arc<dyn HistoryStore>,
        pivot_store: Arc<dyn PivotStore>,
        reporter: Option<Arc<dyn Reporter>>,
    ) -> Self {
        Self {
            market: market.into(),
            broker,
            history,
            pivot_store,
            reporter,
            state: RwLock::new(EngineState::Terminated),
            cancel_requested: AtomicBool::new(false),
            balance: Mutex::new(Balance {
                cash: Decimal::ZERO,
                quantity: Decimal::ZERO,
            }),
            anchor: Mutex::new(Decimal::ONE),
        }
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    pub async fn is_running(&self) -> bool {
        *self.state.read().await == EngineState::Running
    }

    pub async fn is_terminated(&self) -> bool {
        *self.state.read().await == EngineState::Terminated
    }

    pub async fn anchor(&self) -> Decimal {
        *self.anchor.lock().await
    }

    /// §4.5.1 — clean slate, calibrate onto the ratio curve, and find the
    /// anchor tick that locally minimizes rebalancing volume.
    pub async fn initialize(&self) -> Result<(), InitError> {
        self.cancel_requested.store(false, Ordering::SeqCst);

        self.broker
            .cancel_all(&self.market)
            .await
            .map_err(InitError::Broker)?;

        self.refresh_balances().await.map_err(InitError::Broker)?;
        check_balance_invariant(&*self.balance.lock().await).map_err(InitError::InvariantViolated)?;

        let price_now = self
            .broker
            .current_price(&self.market)
            .await
            .map_err(InitError::Broker)?;

        self.calibrate(price_now).await?;

        let pivot = self.update_pivot(price_now).await.map_err(|e| {
            InitError::InvariantViolated(format!("failed to persist pivot: {e}"))
        })?;

        let (cash, quantity) = {
            let b = self.balance.lock().await;
            (b.cash, b.quantity)
        };
        let optimal = self.optimize_anchor(cash, quantity, price_now, pivot);
        check_positive_price("anchor", optimal).map_err(InitError::InvariantViolated)?;
        *self.anchor.lock().await = optimal;

        *self.state.write().await = EngineState::Initialized;
        info!(market = %self.market, anchor = %optimal, pivot = %pivot, "engine initialized");
        Ok(())
    }

    /// §4.5.1 step 3 — one-shot market order to drive the portfolio onto the
    /// ratio curve, only if the residual notional clears `MIN_NOTIONAL`.
    async fn calibrate(&self, price_now: Decimal) -> Result<(), InitError> {
        let pivot = self
            .pivot_store
            .get()
            .await
            .map_err(|e| InitError::InvariantViolated(format!("pivot read failed: {e}")))?;

        let (cash, quantity) = {
            let b = self.balance.lock().await;
            (b.cash, b.quantity)
        };
        let v = ratio_model::volume(cash, quantity, price_now, pivot);

        if v.abs() < MIN_NOTIONAL {
            return Ok(());
        }

        let order = if v > Decimal::ZERO {
            self.broker
                .place_market(&self.market, OrderSide::Bid, v)
                .await
                .map_err(InitError::Broker)?
        } else {
            self.broker
                .place_market(&self.market, OrderSide::Ask, -v / price_now)
                .await
                .map_err(InitError::Broker)?
        };

        self.wait_order_closed(&order.id).await?;
        self.refresh_balances().await.map_err(InitError::Broker)?;
        check_balance_invariant(&*self.balance.lock().await).map_err(InitError::InvariantViolated)?;
        self.record_trade(price_now).await;
        Ok(())
    }

    async fn wait_order_closed(&self, id: &OrderId) -> Result<(), InitError> {
        loop {
            if self.cancel_requested.load(Ordering::SeqCst) {
                let _ = self.broker.cancel(id).await;
                return Err(InitError::Cancelled);
            }

            match self.broker.get_order(id).await {
                Ok(order) if order.state.is_closed() => return Ok(()),
                Ok(_) => {}
                Err(BrokerError::MissingOrder(_)) | Err(BrokerError::Transient(_)) => {}
                Err(e) => return Err(InitError::Broker(e)),
            }

            tokio::time::sleep(POLL_CALIBRATION_INTERVAL).await;
        }
    }

    /// §4.5.1 step 5 — step the price grid outward from `anchor` in each
    /// direction while the residual volume strictly decreases, returning the
    /// tick with the smallest residual found.
    fn optimize_anchor(
        &self,
        cash: Decimal,
        quantity: Decimal,
        anchor: Decimal,
        pivot: Decimal,
    ) -> Decimal {
        let mut optimal = anchor;
        let mut min_volume = ratio_model::volume(cash, quantity, anchor, pivot).abs();

        for step_fn in [price_grid::prev, price_grid::next] {
            let mut price = anchor;
            loop {
                price = match step_fn(price) {
                    Ok(p) => p,
                    Err(_) => break,
                };
                let v = ratio_model::volume(cash, quantity, price, pivot).abs();
                if v < min_volume {
                    min_volume = v;
                    optimal = price;
                } else {
                    break;
                }
            }
        }

        optimal
    }

    /// §4.5.2 — the `Running` loop: start() blocks until stop() completes.
    pub async fn start(&self) -> Result<(), StartError> {
        if *self.state.read().await != EngineState::Initialized {
            return Err(StartError::NotInitialized);
        }
        *self.state.write().await = EngineState::Running;

        let result = self.run().await;

        *self.state.write().await = EngineState::Terminated;
        if let Err(e) = self.broker.cancel_all(&self.market).await {
            warn!(market = %self.market, error = %e, "failed to cancel stray orders on loop exit");
        }

        result
    }

    async fn run(&self) -> Result<(), StartError> {
        while *self.state.read().await == EngineState::Running {
            match self.run_iteration().await {
                Ok(()) => {}
                Err(IterationError::InvariantViolated(msg)) => {
                    error!(market = %self.market, %msg, "invariant violated, terminating");
                    return Err(StartError::InvariantViolated(msg));
                }
                Err(IterationError::Permanent(e)) => {
                    error!(market = %self.market, error = %e, "permanent broker failure, backing off");
                    if let Err(cancel_err) = self.broker.cancel_all(&self.market).await {
                        warn!(market = %self.market, error = %cancel_err, "cancel_all failed during backoff");
                    }
                    tokio::time::sleep(ITERATION_BACKOFF).await;
                }
            }
        }
        Ok(())
    }

    async fn run_iteration(&self) -> Result<(), IterationError> {
        let (cash, quantity, anchor) = {
            let b = self.balance.lock().await;
            let a = self.anchor.lock().await;
            (b.cash, b.quantity, *a)
        };
        let pivot = self
            .pivot_store
            .get()
            .await
            .map_err(|e| IterationError::Permanent(BrokerError::Permanent(e.to_string())))?;

        let (buy_id, sell_id, lower_price, upper_price) = self
            .place_orders(cash, quantity, anchor, pivot)
            .await
            .map_err(IterationError::from)?;

        let closed = self
            .wait_any_closed(&buy_id, &sell_id)
            .await
            .map_err(IterationError::from)?;

        let Some(closed) = closed else {
            // state left Running mid-wait; exit without placing new orders.
            return Ok(());
        };

        let new_anchor = if closed.bought { lower_price } else { upper_price };
        check_positive_price("anchor", new_anchor).map_err(IterationError::InvariantViolated)?;
        *self.anchor.lock().await = new_anchor;

        self.update_pivot(new_anchor)
            .await
            .map_err(|e| IterationError::InvariantViolated(e.to_string()))?;

        self.refresh_balances()
            .await
            .map_err(IterationError::from)?;
        check_balance_invariant(&*self.balance.lock().await)
            .map_err(IterationError::InvariantViolated)?;

        self.record_trade(new_anchor).await;

        let other = if closed.bought { &sell_id } else { &buy_id };
        if let Err(e) = self.broker.cancel(other).await {
            warn!(market = %self.market, order = %other, error = %e, "failed to cancel losing side");
        }

        Ok(())
    }

    /// §4.5.2a — search outward from `anchor` for the nearest profitable,
    /// `MIN_NOTIONAL`-clearing bid and ask, and place both.
    async fn place_orders(
        &self,
        cash: Decimal,
        quantity: Decimal,
        anchor: Decimal,
        pivot: Decimal,
    ) -> Result<(OrderId, OrderId, Decimal, Decimal), BrokerError> {
        let mut lower_price = anchor;
        loop {
            lower_price = price_grid::prev(lower_price)
                .map_err(|e| BrokerError::Permanent(e.to_string()))?;
            let v = ratio_model::volume(cash, quantity, lower_price, pivot);
            if v >= MIN_NOTIONAL && Self::profitable(anchor, lower_price) {
                break;
            }
        }
        let lower_volume = ratio_model::volume(cash, quantity, lower_price, pivot);
        let buy_order = self
            .broker
            .place_limit(
                &self.market,
                OrderSide::Bid,
                lower_price,
                lower_volume / lower_price,
            )
            .await?;

        let mut upper_price = anchor;
        loop {
            upper_price = price_grid::next(upper_price)
                .map_err(|e| BrokerError::Permanent(e.to_string()))?;
            let v = -ratio_model::volume(cash, quantity, upper_price, pivot);
            if v >= MIN_NOTIONAL && Self::profitable(anchor, upper_price) {
                break;
            }
        }
        let upper_volume = -ratio_model::volume(cash, quantity, upper_price, pivot);
        let sell_order = self
            .broker
            .place_limit(
                &self.market,
                OrderSide::Ask,
                upper_price,
                upper_volume / upper_price,
            )
            .await?;

        Ok((buy_order.id, sell_order.id, lower_price, upper_price))
    }

    fn profitable(anchor: Decimal, price: Decimal) -> bool {
        ((anchor - price).abs() / anchor) >= PROFIT_THRESHOLD
    }

    /// §4.5.2b — poll both sides every second until one closes. Returns
    /// `None` if the state left `Running` while waiting (graceful stop).
    async fn wait_any_closed(
        &self,
        buy_id: &OrderId,
        sell_id: &OrderId,
    ) -> Result<Option<ClosedSide>, BrokerError> {
        while *self.state.read().await == EngineState::Running {
            match self.broker.get_orders(&[buy_id.clone(), sell_id.clone()]).await {
                Ok(orders) => {
                    let buy_closed = orders.get(buy_id).is_some_and(|o| o.state.is_closed());
                    let sell_closed = orders.get(sell_id).is_some_and(|o| o.state.is_closed());

                    // Buy wins on a simultaneous close (deterministic tie-break).
                    if buy_closed {
                        return Ok(Some(ClosedSide { bought: true }));
                    }
                    if sell_closed {
                        return Ok(Some(ClosedSide { bought: false }));
                    }
                }
                Err(BrokerError::MissingOrder(_)) | Err(BrokerError::Transient(_)) => {}
                Err(e) => return Err(e),
            }

            tokio::time::sleep(POLL_PAIR_INTERVAL).await;
        }
        Ok(None)
    }

    /// §4.5.4 — keep the pivot within one octave of `anchor`; returns the
    /// (possibly unchanged) pivot.
    async fn update_pivot(&self, anchor: Decimal) -> anyhow::Result<Decimal> {
        let pivot = self.pivot_store.get().await?;
        let new_pivot = ratio_model::next_pivot(anchor, pivot);

        if new_pivot <= Decimal::ZERO {
            anyhow::bail!("pivot invariant violated: pivot={new_pivot}");
        }

        if new_pivot != pivot {
            self.pivot_store.set(new_pivot).await?;
        }
        Ok(new_pivot)
    }

    async fn refresh_balances(&self) -> Result<(), BrokerError> {
        let balance = self.broker.balances(&self.market).await?;
        *self.balance.lock().await = balance;
        Ok(())
    }

    async fn record_trade(&self, price: Decimal) {
        let (cash, quantity) = {
            let b = self.balance.lock().await;
            (b.cash, b.quantity)
        };
        let total = cash + quantity * price;
        let ratio = if total.is_zero() {
            Decimal::ZERO
        } else {
            cash / total
        };

        let record = TradeRecord {
            ts: chrono::Utc::now(),
            balance: total,
            price,
            ratio,
        };

        if let Some(reporter) = &self.reporter {
            reporter.on_trade(&record);
        }

        if let Err(e) = self.history.append(record).await {
            warn!(market = %self.market, error = %e, "failed to append trade history");
        }
    }

    /// §4.5 — `stop()` is idempotent and non-destructive to open orders
    /// during the wait: it exits any in-flight wait, then cancels.
    pub async fn stop(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);

        let was_running = *self.state.read().await == EngineState::Running;
        if was_running {
            *self.state.write().await = EngineState::Stopping;
            while *self.state.read().await != EngineState::Terminated {
                tokio::time::sleep(STOP_POLL_INTERVAL).await;
            }
        } else {
            *self.state.write().await = EngineState::Terminated;
        }

        if let Err(e) = self.broker.cancel_all(&self.market).await {
            warn!(market = %self.market, error = %e, "cancel_all failed during stop()");
        }
    }
}

enum IterationError {
    Permanent(BrokerError),
    InvariantViolated(String),
}

impl From<BrokerError> for IterationError {
    fn from(e: BrokerError) -> Self {
        IterationError::Permanent(e)
    }
}
