//! Upbit REST broker: `/v1/ticker`, `/v1/accounts`, `/v1/orders`,
//! `/v1/order(s)`, `/v1/orders/open`, each wrapped by a circuit breaker and
//! an exponential-backoff retry middleware the same way the reference
//! brokers in this codebase wrap their exchange calls.

use crate::domain::errors::BrokerError;
use crate::domain::ports::Broker;
use crate::domain::types::{Balance, Order, OrderId, OrderKind, OrderSide, OrderState};
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::upbit::auth::UpbitSigner;
use crate::infrastructure::upbit::types::{AccountResponse, OrderResponse, TickerResponse, UpbitOrderState};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

pub struct UpbitBroker {
    client: ClientWithMiddleware,
    signer: UpbitSigner,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl UpbitBroker {
    pub fn new(access_key: String, secret_key: String, base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            signer: UpbitSigner::new(access_key, &secret_key),
            base_url,
            circuit_breaker: Arc::new(CircuitBreaker::new(
                "UpbitBroker",
                5,
                3,
                Duration::from_secs(60),
            )),
        }
    }

    fn permanent(e: impl std::fmt::Display) -> BrokerError {
        BrokerError::Permanent(e.to_string())
    }

    fn unwrap_circuit<T>(r: Result<T, CircuitBreakerError<BrokerError>>) -> Result<T, BrokerError> {
        r.map_err(|e| match e {
            CircuitBreakerError::Open(msg) => BrokerError::Transient(msg),
            CircuitBreakerError::Inner(inner) => inner,
        })
    }

    /// Upbit rate-limits with HTTP 429 without consuming the caller's retry
    /// budget; this loop absorbs 429s before handing the response to the
    /// caller, mirroring the original broker's `request()` wrapper.
    async fn send_with_rate_limit(
        &self,
        build: impl Fn() -> reqwest_middleware::RequestBuilder,
    ) -> Result<reqwest::Response, BrokerError> {
        loop {
            let response = build()
                .send()
                .await
                .map_err(|e| BrokerError::Transient(e.to_string()))?;

            if response.status().as_u16() == 429 {
                sleep(Duration::from_millis(500)).await;
                continue;
            }
            return Ok(response);
        }
    }

    fn parse_decimal(s: &str) -> Result<Decimal, BrokerError> {
        Decimal::from_str(s).map_err(Self::permanent)
    }

    fn to_order(market: &str, resp: OrderResponse) -> Result<Order, BrokerError> {
        let _ = market;
        let side = match resp.side.as_str() {
            "bid" => OrderSide::Bid,
            "ask" => OrderSide::Ask,
            other => return Err(BrokerError::Permanent(format!("unknown order side: {other}"))),
        };
        let state = match resp.state {
            UpbitOrderState::Wait | UpbitOrderState::Watch => OrderState::Open,
            UpbitOrderState::Done => OrderState::Done,
            UpbitOrderState::Cancel => OrderState::Cancelled,
        };
        let price = resp.price.as_deref().map(Self::parse_decimal).transpose()?;
        let volume = resp
            .volume
            .as_deref()
            .map(Self::parse_decimal)
            .transpose()?;
        let kind = if price.is_some() {
            OrderKind::Limit
        } else {
            OrderKind::MarketByVolume
        };

        Ok(Order {
            id: OrderId::from(resp.uuid),
            side,
            kind,
            price,
            volume,
            state,
        })
    }
}

#[async_trait]
impl Broker for UpbitBroker {
    async fn current_price(&self, market: &str) -> Result<Decimal, BrokerError> {
        let market = market.to_string();
        let result = self
            .circuit_breaker
            .call(async {
                let url = format!("{}/v1/ticker", self.base_url);
                let response = self
                    .send_with_rate_limit(|| self.client.get(&url).query(&[("markets", &market)]))
                    .await?;

                let tickers: Vec<TickerResponse> = response
                    .json()
                    .await
                    .map_err(|e| BrokerError::Permanent(e.to_string()))?;

                let ticker = tickers
                    .into_iter()
                    .next()
                    .ok_or_else(|| BrokerError::Permanent("empty ticker response".into()))?;

                Decimal::from_f64(ticker.trade_price)
                    .ok_or_else(|| BrokerError::Permanent("non-finite trade price".into()))
            })
            .await;

        Self::unwrap_circuit(result)
    }

    async fn balances(&self, market: &str) -> Result<Balance, BrokerError> {
        let quote = quote_currency(market);
        let base = base_currency(market);

        let result = self
            .circuit_breaker
            .call(async {
                let url = format!("{}/v1/accounts", self.base_url);
                let auth = self.signer.authorization(&[]).map_err(Self::permanent)?;
                let response = self
                    .send_with_rate_limit(|| self.client.get(&url).header("Authorization", &auth))
                    .await?;

                let accounts: Vec<AccountResponse> = response
                    .json()
                    .await
                    .map_err(|e| BrokerError::Permanent(e.to_string()))?;

                let mut cash = Decimal::ZERO;
                let mut quantity = Decimal::ZERO;
                for account in accounts {
                    if account.currency == quote {
                        cash = Self::parse_decimal(&account.balance)? + Self::parse_decimal(&account.locked)?;
                    } else if account.currency == base {
                        quantity = Self::parse_decimal(&account.balance)? + Self::parse_decimal(&account.locked)?;
                    }
                }

                Ok(Balance { cash, quantity })
            })
            .await;

        Self::unwrap_circuit(result)
    }

    async fn place_limit(
        &self,
        market: &str,
        side: OrderSide,
        price: Decimal,
        volume: Decimal,
    ) -> Result<Order, BrokerError> {
        let side_str = match side {
            OrderSide::Bid => "bid",
            OrderSide::Ask => "ask",
        };
        let params = vec![
            ("market".to_string(), market.to_string()),
            ("side".to_string(), side_str.to_string()),
            ("ord_type".to_string(), "limit".to_string()),
            ("price".to_string(), price.to_string()),
            ("volume".to_string(), volume.to_string()),
        ];

        let result = self
            .circuit_breaker
            .call(async {
                let url = format!("{}/v1/orders", self.base_url);
                let auth_params: Vec<(&str, String)> =
                    params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
                let auth = self
                    .signer
                    .authorization(&auth_params)
                    .map_err(Self::permanent)?;

                let response = self
                    .send_with_rate_limit(|| {
                        self.client
                            .post(&url)
                            .header("Authorization", &auth)
                            .json(&params.iter().cloned().collect::<HashMap<_, _>>())
                    })
                    .await?;

                let order: OrderResponse = response
                    .json()
                    .await
                    .map_err(|e| BrokerError::Permanent(e.to_string()))?;
                Self::to_order(market, order)
            })
            .await;

        Self::unwrap_circuit(result)
    }

    async fn place_market(
        &self,
        market: &str,
        side: OrderSide,
        amount: Decimal,
    ) -> Result<Order, BrokerError> {
        let (side_str, ord_type, amount_key) = match side {
            OrderSide::Bid => ("bid", "price", "price"),
            OrderSide::Ask => ("ask", "market", "volume"),
        };
        let params = vec![
            ("market".to_string(), market.to_string()),
            ("side".to_string(), side_str.to_string()),
            ("ord_type".to_string(), ord_type.to_string()),
            (amount_key.to_string(), amount.to_string()),
        ];

        let result = self
            .circuit_breaker
            .call(async {
                let url = format!("{}/v1/orders", self.base_url);
                let auth_params: Vec<(&str, String)> =
                    params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
                let auth = self
                    .signer
                    .authorization(&auth_params)
                    .map_err(Self::permanent)?;

                let response = self
                    .send_with_rate_limit(|| {
                        self.client
                            .post(&url)
                            .header("Authorization", &auth)
                            .json(&params.iter().cloned().collect::<HashMap<_, _>>())
                    })
                    .await?;

                let order: OrderResponse = response
                    .json()
                    .await
                    .map_err(|e| BrokerError::Permanent(e.to_string()))?;
                Self::to_order(market, order)
            })
            .await;

        Self::unwrap_circuit(result)
    }

    async fn get_order(&self, id: &OrderId) -> Result<Order, BrokerError> {
        let result = self
            .circuit_breaker
            .call(async {
                let url = format!("{}/v1/order", self.base_url);
                let params = [("uuid", id.0.clone())];
                let auth = self.signer.authorization(&params).map_err(Self::permanent)?;

                let response = self
                    .send_with_rate_limit(|| {
                        self.client
                            .get(&url)
                            .query(&params)
                            .header("Authorization", &auth)
                    })
                    .await?;

                if response.status().as_u16() == 404 {
                    return Err(BrokerError::MissingOrder(id.clone()));
                }

                let order: OrderResponse = response
                    .json()
                    .await
                    .map_err(|e| BrokerError::Permanent(e.to_string()))?;
                Self::to_order("", order)
            })
            .await;

        Self::unwrap_circuit(result)
    }

    async fn get_orders(&self, ids: &[OrderId]) -> Result<HashMap<OrderId, Order>, BrokerError> {
        let uuids: Vec<(&str, String)> = ids.iter().map(|id| ("uuids[]", id.0.clone())).collect();

        let result = self
            .circuit_breaker
            .call(async {
                let url = format!("{}/v1/orders/uuids", self.base_url);
                let auth = self.signer.authorization(&uuids).map_err(Self::permanent)?;

                let response = self
                    .send_with_rate_limit(|| {
                        self.client
                            .get(&url)
                            .query(&uuids)
                            .header("Authorization", &auth)
                    })
                    .await?;

                let orders: Vec<OrderResponse> = response
                    .json()
                    .await
                    .map_err(|e| BrokerError::Permanent(e.to_string()))?;

                let mut map = HashMap::new();
                for order in orders {
                    let id = OrderId::from(order.uuid.clone());
                    map.insert(id, Self::to_order("", order)?);
                }

                for id in ids {
                    if !map.contains_key(id) {
                        return Err(BrokerError::MissingOrder(id.clone()));
                    }
                }

                Ok(map)
            })
            .await;

        Self::unwrap_circuit(result)
    }

    async fn cancel(&self, id: &OrderId) -> Result<(), BrokerError> {
        let result = self
            .circuit_breaker
            .call(async {
                let url = format!("{}/v1/order", self.base_url);
                let params = [("uuid", id.0.clone())];
                let auth = self.signer.authorization(&params).map_err(Self::permanent)?;

                let response = self
                    .send_with_rate_limit(|| {
                        self.client
                            .delete(&url)
                            .query(&params)
                            .header("Authorization", &auth)
                    })
                    .await?;

                // Cancelling an already-closed order is not an error.
                if response.status().is_success() || response.status().as_u16() == 404 {
                    Ok(())
                } else {
                    Err(BrokerError::Permanent(format!(
                        "cancel failed with status {}",
                        response.status()
                    )))
                }
            })
            .await;

        Self::unwrap_circuit(result)
    }

    async fn cancel_all(&self, market: &str) -> Result<(), BrokerError> {
        let result = self
            .circuit_breaker
            .call(async {
                let url = format!("{}/v1/orders/open", self.base_url);
                let params = [("pairs", market.to_string())];
                let auth = self.signer.authorization(&params).map_err(Self::permanent)?;

                self.send_with_rate_limit(|| {
                    self.client
                        .delete(&url)
                        .query(&params)
                        .header("Authorization", &auth)
                })
                .await?;

                Ok(())
            })
            .await;

        Self::unwrap_circuit(result)
    }
}

fn quote_currency(market: &str) -> &str {
    market.split('-').next().unwrap_or(market)
}

fn base_currency(market: &str) -> &str {
    market.split('-').nth(1).unwrap_or(market)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_market_pair_into_quote_and_base() {
        assert_eq!(quote_currency("KRW-BTC"), "KRW");
        assert_eq!(base_currency("KRW-BTC"), "BTC");
    }
}
