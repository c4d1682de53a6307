//! Binance WebSocket Feed
//!
//! Opens `<base>/<symbol>@<kind>` on Binance's public market stream.
//! No authentication or subscribe message is needed; the stream name in
//! the URL is the subscription.
//!
//! # Stream URL
//!
//! - Production: `wss://stream.binance.com:9443/ws`
//! - Alternative: `wss://data-stream.binance.vision/ws`

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::codec;
use crate::application::ports::{FeedError, FeedEvent, FeedPort, FeedSubscription};
use crate::domain::market::{SourceKind, Symbol};

/// Default public stream endpoint.
pub const DEFAULT_WS_URL: &str = "wss://stream.binance.com:9443/ws";

/// Configuration for [`BinanceFeed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinanceFeedConfig {
    /// Base websocket URL, without the stream name.
    pub base_url: String,
    /// Payload kind to subscribe to.
    pub kind: SourceKind,
}

impl Default for BinanceFeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WS_URL.to_string(),
            kind: SourceKind::Trade,
        }
    }
}

impl BinanceFeedConfig {
    /// Full URL of the stream for `symbol`.
    #[must_use]
    pub fn stream_url(&self, symbol: &Symbol) -> String {
        format!(
            "{}/{}@{}",
            self.base_url.trim_end_matches('/'),
            symbol.stream_name(),
            self.kind.stream_suffix()
        )
    }
}

/// Public market stream adapter.
#[derive(Debug, Clone, Default)]
pub struct BinanceFeed {
    config: BinanceFeedConfig,
}

impl BinanceFeed {
    /// Create a feed adapter.
    #[must_use]
    pub const fn new(config: BinanceFeedConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl FeedPort for BinanceFeed {
    async fn subscribe(&self, symbol: &Symbol) -> Result<Box<dyn FeedSubscription>, FeedError> {
        let url = self.config.stream_url(symbol);
        tracing::info!(%url, "Connecting to Binance stream");

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| FeedError::Connect {
                message: e.to_string(),
            })?;

        Ok(Box::new(BinanceSubscription {
            ws,
            symbol: symbol.clone(),
            closed: false,
        }))
    }
}

struct BinanceSubscription {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    symbol: Symbol,
    closed: bool,
}

#[async_trait]
impl FeedSubscription for BinanceSubscription {
    async fn next_event(&mut self) -> Option<Result<FeedEvent, FeedError>> {
        loop {
            let message = match self.ws.next().await? {
                Ok(message) => message,
                Err(e) => {
                    return Some(Err(FeedError::Transport {
                        message: e.to_string(),
                    }));
                }
            };

            match message {
                Message::Text(text) => {
                    return match codec::decode(text.as_str(), &self.symbol) {
                        Ok(Some(sample)) => Some(Ok(FeedEvent::Sample(sample))),
                        Ok(None) => continue,
                        Err(e) => Some(Ok(FeedEvent::Malformed {
                            reason: e.to_string(),
                        })),
                    };
                }
                Message::Binary(_) => {
                    return Some(Ok(FeedEvent::Malformed {
                        reason: "unexpected binary frame".to_string(),
                    }));
                }
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason))
                        .unwrap_or_else(|| "no close frame".to_string());
                    return Some(Err(FeedError::Closed { reason }));
                }
                // Pongs are queued by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!(symbol = %self.symbol, error = %e, "WebSocket close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_uses_lowercase_symbol_and_kind() {
        let symbol = Symbol::new("BTCUSDT").unwrap();
        let config = BinanceFeedConfig::default();
        assert_eq!(
            config.stream_url(&symbol),
            "wss://stream.binance.com:9443/ws/btcusdt@trade"
        );

        let config = BinanceFeedConfig {
            base_url: "ws://127.0.0.1:9000/ws/".to_string(),
            kind: SourceKind::AggTrade,
        };
        assert_eq!(
            config.stream_url(&symbol),
            "ws://127.0.0.1:9000/ws/btcusdt@aggTrade"
        );
    }
}
