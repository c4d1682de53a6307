//! Binance REST Snapshot Client
//!
//! One-shot market overview from `GET /ticker/24hr`: USDT pairs only,
//! stablecoin pairs and inactive markets removed, ranked by volume.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

use super::messages::{Ticker24h, TickerPrice};
use crate::application::ports::{SnapshotError, SnapshotPort};
use crate::domain::market::{Symbol, SymbolSummary};

/// Default REST endpoint.
pub const DEFAULT_REST_URL: &str = "https://api.binance.com/api/v3";

/// Quote asset kept in the summary table.
const QUOTE_ASSET: &str = "USDT";

/// Stablecoin pairs that carry no price signal.
const EXCLUDED_SYMBOLS: [&str; 4] = ["USDCUSDT", "BUSDUSDT", "TUSDUSDT", "USTCUSDT"];

/// Configuration for [`BinanceSnapshotClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotClientConfig {
    /// REST base URL.
    pub base_url: String,
    /// Summaries kept after ranking.
    pub limit: usize,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for SnapshotClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REST_URL.to_string(),
            limit: 50,
            timeout: Duration::from_secs(15),
        }
    }
}

/// REST client for summary snapshots and spot prices.
#[derive(Debug, Clone)]
pub struct BinanceSnapshotClient {
    client: Client,
    base_url: String,
    limit: usize,
}

impl BinanceSnapshotClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Request`] if the HTTP client cannot be built.
    pub fn new(config: &SnapshotClientConfig) -> Result<Self, SnapshotError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SnapshotError::Request {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limit: config.limit,
        })
    }

    /// Latest price for one symbol.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] on transport, status or decode failures.
    pub async fn fetch_price(&self, symbol: &Symbol) -> Result<Decimal, SnapshotError> {
        let ticker: TickerPrice = self
            .get(&format!("/ticker/price?symbol={}", symbol.as_str()))
            .await?;
        Ok(ticker.price)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SnapshotError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SnapshotError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SnapshotError::Status {
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|e| SnapshotError::Decode {
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl SnapshotPort for BinanceSnapshotClient {
    async fn fetch_summaries(&self) -> Result<Vec<SymbolSummary>, SnapshotError> {
        let tickers: Vec<Ticker24h> = self.get("/ticker/24hr").await?;
        let total = tickers.len();
        let summaries = rank(tickers, self.limit);
        tracing::debug!(total, kept = summaries.len(), "Ranked 24h tickers");
        Ok(summaries)
    }
}

/// Filter, sort by volume and rank raw tickers.
fn rank(tickers: Vec<Ticker24h>, limit: usize) -> Vec<SymbolSummary> {
    let mut kept: Vec<Ticker24h> = tickers
        .into_iter()
        .filter(|t| t.symbol.ends_with(QUOTE_ASSET) && t.symbol != QUOTE_ASSET)
        .filter(|t| !EXCLUDED_SYMBOLS.contains(&t.symbol.as_str()))
        .filter(|t| t.volume > Decimal::ZERO && t.last_price > Decimal::ZERO)
        .collect();
    kept.sort_by(|a, b| b.volume.cmp(&a.volume));

    kept.into_iter()
        .filter_map(|t| {
            let symbol = Symbol::new(&t.symbol).ok()?;
            Some((symbol, t))
        })
        .take(limit)
        .enumerate()
        .map(|(i, (symbol, t))| SymbolSummary {
            rank: i + 1,
            symbol,
            price: t.last_price,
            percent_change_24h: t.price_change_percent,
            volume: t.volume,
            quote_volume: t.quote_volume,
            trade_count: t.count,
            high_24h: t.high_price,
            low_24h: t.low_price,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ticker(symbol: &str, price: Decimal, volume: Decimal) -> Ticker24h {
        Ticker24h {
            symbol: symbol.to_string(),
            last_price: price,
            price_change_percent: dec!(1),
            volume,
            quote_volume: price * volume,
            high_price: price,
            low_price: price,
            count: 1,
        }
    }

    #[test]
    fn rank_filters_and_orders() {
        let tickers = vec![
            ticker("ETHUSDT", dec!(2000), dec!(50)),
            ticker("BTCUSDT", dec!(40000), dec!(100)),
            ticker("USDCUSDT", dec!(1), dec!(1000)),
            ticker("ETHBTC", dec!(0.05), dec!(500)),
            ticker("DEADUSDT", dec!(1), dec!(0)),
            ticker("FREEUSDT", dec!(0), dec!(10)),
            ticker("SOLUSDT", dec!(100), dec!(75)),
        ];

        let ranked = rank(tickers, 10);
        let symbols: Vec<_> = ranked.iter().map(|s| s.symbol.as_str().to_string()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "SOLUSDT", "ETHUSDT"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[2].rank, 3);
    }

    #[test]
    fn rank_truncates_to_limit() {
        let tickers = vec![
            ticker("AUSDT", dec!(1), dec!(3)),
            ticker("BUSDT", dec!(1), dec!(2)),
            ticker("CUSDT", dec!(1), dec!(1)),
        ];
        assert_eq!(rank(tickers, 2).len(), 2);
    }
}
