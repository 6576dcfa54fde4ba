//! Wire types for the Upbit REST API. Upbit returns numeric fields as
//! JSON strings, so every price/volume field here is a `String` at the
//! transport boundary and gets parsed into `Decimal` by the caller.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TickerResponse {
    pub market: String,
    pub trade_price: f64,
}

#[derive(Debug, Deserialize)]
pub struct AccountResponse {
    pub currency: String,
    pub balance: String,
    pub locked: String,
    pub unit_currency: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub enum UpbitOrderState {
    Wait,
    Watch,
    Done,
    Cancel,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrderResponse {
    pub uuid: String,
    pub side: String,
    pub state: UpbitOrderState,
    pub price: Option<String>,
    pub volume: Option<String>,
    #[serde(default)]
    pub executed_volume: Option<String>,
}
