//! Stream Codec
//!
//! Turns one websocket text frame into a [`PriceSample`]. Control frames
//! (subscription acks such as `{"result":null,"id":1}`) decode to `None`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::messages::{CombinedEnvelope, StreamPayload};
use crate::domain::market::{PriceSample, SampleSource, SourceKind, Symbol, SymbolError};

/// Codec errors. Each one makes a single message malformed.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Not JSON, or not a known payload shape.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload symbol is not a valid symbol.
    #[error(transparent)]
    Symbol(#[from] SymbolError),

    /// Payload is for another symbol than the subscription.
    #[error("payload for {actual} on the {expected} stream")]
    SymbolMismatch {
        /// Subscribed symbol.
        expected: Symbol,
        /// Payload symbol.
        actual: Symbol,
    },

    /// Price is zero or negative.
    #[error("non-positive price {0}")]
    NonPositivePrice(Decimal),

    /// Timestamp is outside the representable range.
    #[error("invalid timestamp {0}ms")]
    InvalidTimestamp(i64),
}

/// Decode one text frame for the stream of `expected`.
///
/// # Errors
///
/// Returns [`CodecError`] if the frame is not a valid market payload for
/// `expected`.
pub fn decode(text: &str, expected: &Symbol) -> Result<Option<PriceSample>, CodecError> {
    let mut value: serde_json::Value = serde_json::from_str(text)?;

    if value.get("result").is_some() && value.get("id").is_some() {
        return Ok(None);
    }
    if value.get("stream").is_some() && value.get("data").is_some() {
        let envelope: CombinedEnvelope = serde_json::from_value(value)?;
        value = envelope.data;
    }

    let payload: StreamPayload = serde_json::from_value(value)?;
    let (symbol, price, millis, source) = match payload {
        StreamPayload::Trade(m) => (
            m.symbol,
            m.price,
            m.trade_time,
            SampleSource {
                kind: SourceKind::Trade,
                sequence: m.trade_id,
            },
        ),
        StreamPayload::AggTrade(m) => (
            m.symbol,
            m.price,
            m.trade_time,
            SampleSource {
                kind: SourceKind::AggTrade,
                sequence: m.aggregate_id,
            },
        ),
        StreamPayload::Ticker(m) => (
            m.symbol,
            m.last_price,
            m.event_time,
            SampleSource {
                kind: SourceKind::Ticker,
                sequence: m.last_trade_id,
            },
        ),
    };

    let symbol = Symbol::new(&symbol)?;
    if &symbol != expected {
        return Err(CodecError::SymbolMismatch {
            expected: expected.clone(),
            actual: symbol,
        });
    }
    if price <= Decimal::ZERO {
        return Err(CodecError::NonPositivePrice(price));
    }
    let timestamp: DateTime<Utc> =
        DateTime::from_timestamp_millis(millis).ok_or(CodecError::InvalidTimestamp(millis))?;

    Ok(Some(PriceSample::new(symbol, price, timestamp, source)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT").unwrap()
    }

    #[test]
    fn decodes_trade() {
        let text = r#"{"e":"trade","E":1700000000100,"s":"BTCUSDT","t":42,"p":"37000.50","q":"0.01","T":1700000000000,"m":true,"M":true}"#;
        let sample = decode(text, &btc()).unwrap().unwrap();
        assert_eq!(sample.price, dec!(37000.50));
        assert_eq!(sample.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(sample.source.kind, SourceKind::Trade);
        assert_eq!(sample.source.sequence, 42);
    }

    #[test]
    fn decodes_agg_trade() {
        let text = r#"{"e":"aggTrade","E":1700000000100,"s":"BTCUSDT","a":7,"p":"1.5","q":"2","f":1,"l":2,"T":1700000000000,"m":false}"#;
        let sample = decode(text, &btc()).unwrap().unwrap();
        assert_eq!(sample.source.kind, SourceKind::AggTrade);
        assert_eq!(sample.source.sequence, 7);
    }

    #[test]
    fn decodes_ticker_using_last_price() {
        let text = r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","p":"-12.0","P":"-0.5","c":"2400.10","L":99,"n":10}"#;
        let sample = decode(text, &btc()).unwrap().unwrap();
        assert_eq!(sample.price, dec!(2400.10));
        assert_eq!(sample.source.sequence, 99);
    }

    #[test]
    fn unwraps_combined_envelope() {
        let text = r#"{"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT","t":1,"p":"10","T":1700000000000}}"#;
        assert!(decode(text, &btc()).unwrap().is_some());
    }

    #[test]
    fn subscription_ack_is_not_a_sample() {
        assert!(decode(r#"{"result":null,"id":1}"#, &btc()).unwrap().is_none());
    }

    #[test]
    fn foreign_symbol_is_rejected() {
        let text = r#"{"e":"trade","s":"ETHUSDT","t":1,"p":"10","T":1700000000000}"#;
        assert!(matches!(
            decode(text, &btc()),
            Err(CodecError::SymbolMismatch { .. })
        ));
    }

    #[test_case("not json" ; "not json")]
    #[test_case(r#"{"e":"trade","s":"BTCUSDT","t":1,"T":1700000000000}"# ; "missing price")]
    #[test_case(r#"{"e":"trade","s":"BTCUSDT","t":1,"p":"10"}"# ; "missing time")]
    #[test_case(r#"{"e":"trade","s":"BTCUSDT","t":1,"p":"abc","T":1}"# ; "bad price")]
    #[test_case(r#"{"e":"trade","s":"BTCUSDT","t":1,"p":"0","T":1700000000000}"# ; "zero price")]
    #[test_case(r#"{"e":"depthUpdate","s":"BTCUSDT"}"# ; "unknown event")]
    fn malformed_payloads(text: &str) {
        assert!(decode(text, &btc()).is_err());
    }
}
