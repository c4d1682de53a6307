//! Stream Lifecycle Types
//!
//! Generation tokens, per-connection states and the status record the
//! supervisor exposes for the currently watched symbol.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::alert::AlertEvent;
use crate::domain::market::{PriceSample, Symbol};

/// Monotonically increasing id of one connection instance.
///
/// Generation 0 is never handed to a connection; it marks "nothing
/// streaming" on the supervisor side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Generation(u64);

impl Generation {
    /// The generation that matches no connection.
    pub const NONE: Self = Self(0);

    /// Wrap a raw generation id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Lifecycle state of a single stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created, not started.
    #[default]
    Idle,
    /// Opening the subscription (first attempt or after backoff).
    Connecting,
    /// Receiving messages.
    Streaming,
    /// Stop requested; the socket is being closed.
    Draining,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether the connection is still working towards delivering samples.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }

    /// State name used in logs, metrics and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }

    /// Numeric gauge value for metrics.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Idle => 0.0,
            Self::Connecting => 1.0,
            Self::Streaming => 2.0,
            Self::Draining => 3.0,
            Self::Closed => 4.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-visible status of the current stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct StreamStatus {
    /// Watched symbol, `None` when stopped.
    pub symbol: Option<Symbol>,
    /// Generation of the current connection.
    pub generation: Option<Generation>,
    /// Connection state.
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last healthy connection.
    pub reconnect_attempts: u32,
    /// Samples accepted into the buffer for this generation.
    pub samples_received: u64,
    /// Price of the newest accepted sample.
    pub latest_price: Option<Decimal>,
    /// Wall-clock time the newest sample was accepted.
    pub last_sample_at: Option<DateTime<Utc>>,
    /// When this generation was started.
    pub started_at: Option<DateTime<Utc>>,
    /// Set once the retry budget is exhausted.
    pub fatal: Option<String>,
}

impl StreamStatus {
    /// Fresh status for a newly started generation.
    #[must_use]
    pub fn starting(symbol: Symbol, generation: Generation, now: DateTime<Utc>) -> Self {
        Self {
            symbol: Some(symbol),
            generation: Some(generation),
            state: ConnectionState::Idle,
            started_at: Some(now),
            ..Self::default()
        }
    }

    /// Whether the stream gave up after exhausting its retry budget.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        self.fatal.is_some()
    }

    /// Seconds since the generation started.
    #[must_use]
    pub fn uptime_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.started_at.map(|t| (now - t).num_seconds())
    }
}

/// Notification published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The current connection changed state.
    StateChanged {
        /// Watched symbol.
        symbol: Symbol,
        /// Connection generation.
        generation: Generation,
        /// New state.
        state: ConnectionState,
        /// Consecutive failed attempts.
        attempts: u32,
    },
    /// A sample was appended to the buffer.
    SampleAccepted(PriceSample),
    /// An alert rule fired.
    AlertFired(AlertEvent),
    /// The stream gave up after exhausting its retry budget.
    Unavailable {
        /// Watched symbol.
        symbol: Symbol,
        /// Connection generation.
        generation: Generation,
        /// Final error.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_ordering_and_display() {
        assert!(Generation::new(2) > Generation::new(1));
        assert_eq!(Generation::NONE.get(), 0);
        assert_eq!(Generation::new(7).to_string(), "g7");
    }

    #[test]
    fn live_states() {
        assert!(ConnectionState::Connecting.is_live());
        assert!(ConnectionState::Streaming.is_live());
        assert!(!ConnectionState::Idle.is_live());
        assert!(!ConnectionState::Draining.is_live());
        assert!(!ConnectionState::Closed.is_live());
    }

    #[test]
    fn state_serialization() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Streaming).unwrap(),
            "\"streaming\""
        );
    }

    #[test]
    fn starting_status() {
        let now = Utc::now();
        let status = StreamStatus::starting(Symbol::new("BTCUSDT").unwrap(), Generation::new(3), now);
        assert_eq!(status.state, ConnectionState::Idle);
        assert_eq!(status.generation, Some(Generation::new(3)));
        assert!(!status.is_unavailable());
        assert_eq!(status.uptime_secs(now), Some(0));
    }
}
