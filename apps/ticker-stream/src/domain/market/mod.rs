//! Market Data Types
//!
//! Canonical internal representation of the data flowing through the
//! streaming core: symbols, price samples and 24h symbol summaries.
//! These types are codec-agnostic; wire formats live in the
//! infrastructure layer.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

/// Longest symbol accepted by [`Symbol::new`].
const MAX_SYMBOL_LEN: usize = 20;

// =============================================================================
// Symbol
// =============================================================================

/// Errors produced when parsing a [`Symbol`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// The symbol was empty after trimming.
    #[error("symbol cannot be empty")]
    Empty,
    /// The symbol exceeded the maximum length.
    #[error("symbol {0:?} is longer than 20 characters")]
    TooLong(String),
    /// The symbol contained a non-alphanumeric character.
    #[error("symbol {0:?} must be ASCII alphanumeric")]
    InvalidCharacter(String),
}

/// Uppercase instrument identifier, e.g. `BTCUSDT`.
///
/// Cheap to clone: every sample carries its symbol, so the text is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Parse and normalize a symbol.
    ///
    /// Input is trimmed and uppercased; only ASCII letters and digits are
    /// accepted.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError`] if the input is empty, too long or contains
    /// anything other than ASCII alphanumerics.
    pub fn new(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }
        if trimmed.len() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong(trimmed.to_string()));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SymbolError::InvalidCharacter(trimmed.to_string()));
        }
        Ok(Self(Arc::from(trimmed.to_ascii_uppercase())))
    }

    /// The symbol text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used in stream names (`btcusdt@trade`).
    #[must_use]
    pub fn stream_name(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

impl std::str::FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

// =============================================================================
// Price Samples
// =============================================================================

/// Which feed payload a sample was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Individual trade.
    Trade,
    /// Aggregated trade.
    AggTrade,
    /// Rolling 24h ticker.
    Ticker,
}

impl SourceKind {
    /// Stream suffix for this kind (`trade`, `aggTrade`, `ticker`).
    #[must_use]
    pub const fn stream_suffix(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::AggTrade => "aggTrade",
            Self::Ticker => "ticker",
        }
    }

    /// Parse a stream kind name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trade" => Some(Self::Trade),
            "aggtrade" | "agg_trade" => Some(Self::AggTrade),
            "ticker" | "24hrticker" => Some(Self::Ticker),
            _ => None,
        }
    }
}

/// Sequence source tag: the payload kind plus its feed-assigned sequence id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleSource {
    /// Payload kind.
    pub kind: SourceKind,
    /// Trade id, aggregate trade id or last trade id.
    pub sequence: u64,
}

/// One price observation for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceSample {
    /// Instrument the price belongs to.
    pub symbol: Symbol,
    /// Last traded price.
    pub price: Decimal,
    /// Event time reported by the feed.
    pub timestamp: DateTime<Utc>,
    /// Where the sample came from.
    pub source: SampleSource,
}

impl PriceSample {
    /// Create a new sample.
    #[must_use]
    pub const fn new(
        symbol: Symbol,
        price: Decimal,
        timestamp: DateTime<Utc>,
        source: SampleSource,
    ) -> Self {
        Self {
            symbol,
            price,
            timestamp,
            source,
        }
    }
}

// =============================================================================
// Symbol Summaries
// =============================================================================

/// One row of the 24h summary table returned by the snapshot client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolSummary {
    /// 1-based rank by volume.
    pub rank: usize,
    /// Instrument.
    pub symbol: Symbol,
    /// Last price.
    pub price: Decimal,
    /// 24h price change in percent.
    pub percent_change_24h: Decimal,
    /// 24h base-asset volume.
    pub volume: Decimal,
    /// 24h quote-asset volume.
    pub quote_volume: Decimal,
    /// Number of trades in the last 24h.
    pub trade_count: u64,
    /// 24h high.
    pub high_24h: Decimal,
    /// 24h low.
    pub low_24h: Decimal,
}

impl SymbolSummary {
    /// Intraday range as a percentage of the low, `None` when the low is zero.
    #[must_use]
    pub fn volatility(&self) -> Option<Decimal> {
        if self.low_24h.is_zero() {
            return None;
        }
        Some((self.high_24h - self.low_24h) / self.low_24h * Decimal::ONE_HUNDRED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn symbol_is_normalized() {
        let symbol = Symbol::new("  btcUsdt ").unwrap();
        assert_eq!(symbol.as_str(), "BTCUSDT");
        assert_eq!(symbol.stream_name(), "btcusdt");
        assert_eq!(symbol.to_string(), "BTCUSDT");
    }

    #[test]
    fn symbol_rejects_bad_input() {
        assert_eq!(Symbol::new("   "), Err(SymbolError::Empty));
        assert!(matches!(
            Symbol::new("BTC/USDT"),
            Err(SymbolError::InvalidCharacter(_))
        ));
        assert!(matches!(
            Symbol::new("ABCDEFGHIJKLMNOPQRSTUVWXYZ"),
            Err(SymbolError::TooLong(_))
        ));
    }

    #[test]
    fn symbol_equality_ignores_input_case() {
        assert_eq!(Symbol::new("ethusdt").unwrap(), Symbol::new("ETHUSDT").unwrap());
    }

    #[test]
    fn symbol_serializes_as_plain_string() {
        let json = serde_json::to_string(&Symbol::new("SOLUSDT").unwrap()).unwrap();
        assert_eq!(json, "\"SOLUSDT\"");
    }

    #[test]
    fn source_kind_parsing() {
        assert_eq!(SourceKind::parse("trade"), Some(SourceKind::Trade));
        assert_eq!(SourceKind::parse("aggTrade"), Some(SourceKind::AggTrade));
        assert_eq!(SourceKind::parse("TICKER"), Some(SourceKind::Ticker));
        assert_eq!(SourceKind::parse("depth"), None);
        assert_eq!(SourceKind::AggTrade.stream_suffix(), "aggTrade");
    }

    #[test]
    fn summary_volatility() {
        let summary = SymbolSummary {
            rank: 1,
            symbol: Symbol::new("BTCUSDT").unwrap(),
            price: dec!(105),
            percent_change_24h: dec!(2.5),
            volume: dec!(1000),
            quote_volume: dec!(105000),
            trade_count: 42,
            high_24h: dec!(110),
            low_24h: dec!(100),
        };
        assert_eq!(summary.volatility(), Some(dec!(10)));

        let flat = SymbolSummary {
            low_24h: Decimal::ZERO,
            ..summary
        };
        assert_eq!(flat.volatility(), None);
    }
}
