//! An in-memory `Broker` for engine tests, parallel to the mock execution
//! services used elsewhere in this codebase: it fills marketable orders
//! immediately and lets the test drive price via `set_price`.

use crate::domain::errors::BrokerError;
use crate::domain::ports::Broker;
use crate::domain::types::{Balance, Order, OrderId, OrderKind, OrderSide, OrderState};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

struct MockState {
    price: Decimal,
    cash: Decimal,
    quantity: Decimal,
    orders: HashMap<OrderId, Order>,
}

pub struct MockBroker {
    state: Mutex<MockState>,
    next_id: AtomicU64,
}

impl MockBroker {
    pub fn new(price: Decimal, cash: Decimal, quantity: Decimal) -> Self {
        Self {
            state: Mutex::new(MockState {
                price,
                cash,
                quantity,
                orders: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_order_id(&self) -> OrderId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        OrderId::from(format!("mock-{n}"))
    }

    /// Moves the simulated market price and fills any resting order the new
    /// price crosses.
    pub async fn set_price(&self, price: Decimal) {
        let mut state = self.state.lock().await;
        state.price = price;

        let crossed: Vec<OrderId> = state
            .orders
            .iter()
            .filter(|(_, o)| o.state == OrderState::Open)
            .filter(|(_, o)| {
                let order_price = o.price.unwrap_or(price);
                match o.side {
                    OrderSide::Bid => price <= order_price,
                    OrderSide::Ask => price >= order_price,
                }
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in crossed {
            let order = state.orders.get(&id).cloned().unwrap();
            let fill_price = order.price.unwrap_or(price);
            let volume = order.volume.unwrap_or(Decimal::ZERO);
            match order.side {
                OrderSide::Bid => {
                    state.cash -= fill_price * volume;
                    state.quantity += volume;
                }
                OrderSide::Ask => {
                    state.cash += fill_price * volume;
                    state.quantity -= volume;
                }
            }
            state.orders.get_mut(&id).unwrap().state = OrderState::Done;
        }
    }

    pub async fn price(&self) -> Decimal {
        self.state.lock().await.price
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn current_price(&self, _market: &str) -> Result<Decimal, BrokerError> {
        Ok(self.state.lock().await.price)
    }

    async fn balances(&self, _market: &str) -> Result<Balance, BrokerError> {
        let state = self.state.lock().await;
        Ok(Balance {
            cash: state.cash,
            quantity: state.quantity,
        })
    }

    async fn place_limit(
        &self,
        _market: &str,
        side: OrderSide,
        price: Decimal,
        volume: Decimal,
    ) -> Result<Order, BrokerError> {
        let id = self.next_order_id();
        let order = Order {
            id: id.clone(),
            side,
            kind: OrderKind::Limit,
            price: Some(price),
            volume: Some(volume),
            state: OrderState::Open,
        };

        let mut state = self.state.lock().await;
        state.orders.insert(id, order.clone());
        let current = state.price;
        drop(state);

        // A limit order placed already-marketable against the current price
        // fills synchronously, matching an exchange accepting it as a taker.
        let marketable = match side {
            OrderSide::Bid => current <= price,
            OrderSide::Ask => current >= price,
        };
        if marketable {
            self.set_price(current).await;
            return self.get_order(&order.id).await;
        }

        Ok(order)
    }

    async fn place_market(
        &self,
        _market: &str,
        side: OrderSide,
        amount: Decimal,
    ) -> Result<Order, BrokerError> {
        let id = self.next_order_id();
        let mut state = self.state.lock().await;
        let price = state.price;

        let volume = match side {
            OrderSide::Bid => amount / price,
            OrderSide::Ask => amount,
        };

        match side {
            OrderSide::Bid => {
                state.cash -= amount;
                state.quantity += volume;
            }
            OrderSide::Ask => {
                state.cash += volume * price;
                state.quantity -= volume;
            }
        }

        let order = Order {
            id: id.clone(),
            side,
            kind: OrderKind::MarketByVolume,
            price: Some(price),
            volume: Some(volume),
            state: OrderState::Done,
        };
        state.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: &OrderId) -> Result<Order, BrokerError> {
        self.state
            .lock()
            .await
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| BrokerError::MissingOrder(id.clone()))
    }

    async fn get_orders(&self, ids: &[OrderId]) -> Result<HashMap<OrderId, Order>, BrokerError> {
        let state = self.state.lock().await;
        let mut out = HashMap::new();
        for id in ids {
            let order = state
                .orders
                .get(id)
                .cloned()
                .ok_or_else(|| BrokerError::MissingOrder(id.clone()))?;
            out.insert(id.clone(), order);
        }
        Ok(out)
    }

    async fn cancel(&self, id: &OrderId) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        if let Some(order) = state.orders.get_mut(id)
            && order.state == OrderState::Open
        {
            order.state = OrderState::Cancelled;
        }
        Ok(())
    }

    async fn cancel_all(&self, _market: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        for order in state.orders.values_mut() {
            if order.state == OrderState::Open {
                order.state = OrderState::Cancelled;
            }
        }
        Ok(())
    }
}
