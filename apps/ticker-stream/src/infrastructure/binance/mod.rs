//! Binance Adapters
//!
//! - **Stream**: public trade / aggTrade / ticker websocket feed
//! - **REST**: 24h summary snapshot and spot price

pub mod codec;
pub mod messages;
pub mod rest;
pub mod stream;

pub use codec::CodecError;
pub use rest::{BinanceSnapshotClient, DEFAULT_REST_URL, SnapshotClientConfig};
pub use stream::{BinanceFeed, BinanceFeedConfig, DEFAULT_WS_URL};
