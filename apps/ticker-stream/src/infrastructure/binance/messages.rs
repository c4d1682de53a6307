//! Binance Wire Types
//!
//! Payloads of the public market streams and the REST ticker endpoints.
//! Field names follow Binance's single-letter JSON keys.
//!
//! # References
//!
//! - [WebSocket Streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams)
//! - [Market Data Endpoints](https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints)

use rust_decimal::Decimal;
use serde::Deserialize;

// =============================================================================
// Stream Payloads
// =============================================================================

/// Any market payload we subscribe to, discriminated by the `e` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "e")]
pub enum StreamPayload {
    /// `<symbol>@trade`
    #[serde(rename = "trade")]
    Trade(TradeMessage),
    /// `<symbol>@aggTrade`
    #[serde(rename = "aggTrade")]
    AggTrade(AggTradeMessage),
    /// `<symbol>@ticker`
    #[serde(rename = "24hrTicker")]
    Ticker(TickerMessage),
}

/// Individual trade.
///
/// ```json
/// {"e":"trade","E":1672515782136,"s":"BNBBTC","t":12345,"p":"0.001","q":"100","T":1672515782136,"m":true}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TradeMessage {
    /// Event time (ms).
    #[serde(rename = "E", default)]
    pub event_time: i64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Trade id.
    #[serde(rename = "t", default)]
    pub trade_id: u64,
    /// Price.
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Quantity.
    #[serde(rename = "q", default)]
    pub quantity: Decimal,
    /// Trade time (ms).
    #[serde(rename = "T")]
    pub trade_time: i64,
    /// Whether the buyer was the maker.
    #[serde(rename = "m", default)]
    pub buyer_is_maker: bool,
}

/// Aggregated trade.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AggTradeMessage {
    /// Event time (ms).
    #[serde(rename = "E", default)]
    pub event_time: i64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Aggregate trade id.
    #[serde(rename = "a", default)]
    pub aggregate_id: u64,
    /// Price.
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Quantity.
    #[serde(rename = "q", default)]
    pub quantity: Decimal,
    /// Trade time (ms).
    #[serde(rename = "T")]
    pub trade_time: i64,
}

/// Rolling 24h ticker. Only the fields used for price samples.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TickerMessage {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Last price.
    #[serde(rename = "c")]
    pub last_price: Decimal,
    /// 24h price change percent.
    #[serde(rename = "P", default)]
    pub price_change_percent: Decimal,
    /// Last trade id.
    #[serde(rename = "L", default)]
    pub last_trade_id: u64,
}

/// Combined-stream wrapper (`/stream?streams=...`).
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedEnvelope {
    /// Stream name, e.g. `btcusdt@trade`.
    pub stream: String,
    /// Inner payload.
    pub data: serde_json::Value,
}

// =============================================================================
// REST Payloads
// =============================================================================

/// One entry of `GET /ticker/24hr`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    /// Symbol.
    pub symbol: String,
    /// Last price.
    pub last_price: Decimal,
    /// 24h change percent.
    pub price_change_percent: Decimal,
    /// 24h base volume.
    pub volume: Decimal,
    /// 24h quote volume.
    #[serde(default)]
    pub quote_volume: Decimal,
    /// 24h high.
    pub high_price: Decimal,
    /// 24h low.
    pub low_price: Decimal,
    /// Trade count.
    #[serde(default)]
    pub count: u64,
}

/// Response of `GET /ticker/price?symbol=...`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TickerPrice {
    /// Symbol.
    pub symbol: String,
    /// Latest price.
    pub price: Decimal,
}
