#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Ticker Stream - Single-Symbol Market Data Client
//!
//! Keeps exactly one live price subscription for the watched symbol,
//! appends its samples to a bounded history and evaluates price alerts
//! against that history. Switching symbols retires the old connection
//! before the new one may deliver anything.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and logic
//!   - `market`: symbols, price samples, 24h summaries
//!   - `buffer`: bounded, time-ordered sample history
//!   - `alert`: rules, evaluation and the alert log
//!   - `stream`: generations, connection states, status
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: feed, sample sink and snapshot interfaces
//!   - `services`: supervisor, connection task, backoff, snapshot retry
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: websocket feed and REST snapshot client
//!   - `mock`: scripted feed for tests
//!   - `config`, `telemetry`, `metrics`, `health`
//!
//! # Data Flow
//!
//! ```text
//! Binance WS ──► StreamConnection ──► StreamSupervisor ──► SampleBuffer
//!   (gen N)      (receive loop)       (generation check)       │
//!                                            │                 ▼
//!                                            │           AlertBook
//!                                            ▼                 │
//!                                    broadcast<StreamEvent> ◄──┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::alert::{
    AlertBook, AlertError, AlertEvaluator, AlertEvent, AlertKind, AlertRule, Direction,
    NewAlertRule, RuleId,
};
pub use domain::buffer::{BufferError, BufferSnapshot, BufferView, SampleBuffer};
pub use domain::market::{PriceSample, SampleSource, SourceKind, Symbol, SymbolSummary};
pub use domain::stream::{ConnectionState, Generation, StreamEvent, StreamStatus};

// Application
pub use application::ports::{FeedError, FeedEvent, FeedPort, FeedSubscription, SnapshotPort};
pub use application::services::{
    StreamSupervisor, SupervisorConfig, SupervisorError, WatchOutcome, fetch_with_retry,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, StreamConfig};

// Adapters
pub use infrastructure::binance::{BinanceFeed, BinanceFeedConfig, BinanceSnapshotClient};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
