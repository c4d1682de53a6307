//! Prometheus Metrics Module
//!
//! Exposes stream metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Samples**: accepted, dropped by reason, malformed
//! - **Connection**: state gauge, reconnect attempts
//! - **Alerts**: fired alerts
//! - **Buffer**: current buffer length
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! without an installed recorder is a no-op, so library code and tests can
//! call the recording functions unconditionally.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::stream::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, once per process.
///
/// Later calls return the handle from the first successful call.
///
/// # Errors
///
/// Returns [`BuildError`] if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Prometheus handle for rendering, `None` before [`init_metrics`].
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "ticker_stream_samples_received_total",
        "Samples accepted into the price buffer"
    );
    describe_counter!(
        "ticker_stream_samples_dropped_total",
        "Samples discarded before reaching the buffer, by reason"
    );
    describe_counter!(
        "ticker_stream_malformed_messages_total",
        "Inbound feed messages that could not be decoded"
    );
    describe_counter!(
        "ticker_stream_reconnects_total",
        "Reconnection attempts after a dropped or failed connection"
    );
    describe_gauge!(
        "ticker_stream_connection_state",
        "Current connection state (0 idle, 1 connecting, 2 streaming, 3 draining, 4 closed)"
    );
    describe_counter!("ticker_stream_alerts_fired_total", "Alerts fired");
    describe_gauge!(
        "ticker_stream_buffer_samples",
        "Samples currently held in the price buffer"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a sample never reached the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Came from a superseded generation.
    Stale,
    /// Older than the newest buffered sample.
    OutOfOrder,
    /// Symbol did not match the buffer.
    SymbolMismatch,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::OutOfOrder => "out_of_order",
            Self::SymbolMismatch => "symbol_mismatch",
        }
    }
}

/// Record a sample accepted into the buffer.
pub fn record_sample_received(symbol: &str) {
    counter!(
        "ticker_stream_samples_received_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Record a dropped sample.
pub fn record_sample_dropped(reason: DropReason) {
    counter!(
        "ticker_stream_samples_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a malformed inbound message.
pub fn record_malformed_message() {
    counter!("ticker_stream_malformed_messages_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(symbol: &str) {
    counter!(
        "ticker_stream_reconnects_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("ticker_stream_connection_state").set(state.as_gauge());
}

/// Record a fired alert.
pub fn record_alert_fired(symbol: &str) {
    counter!(
        "ticker_stream_alerts_fired_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Update the buffer length gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_buffer_len(len: usize) {
    gauge!("ticker_stream_buffer_samples").set(len as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_labels() {
        assert_eq!(DropReason::Stale.as_str(), "stale");
        assert_eq!(DropReason::OutOfOrder.as_str(), "out_of_order");
        assert_eq!(DropReason::SymbolMismatch.as_str(), "symbol_mismatch");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_sample_received("BTCUSDT");
        record_sample_dropped(DropReason::Stale);
        set_connection_state(ConnectionState::Streaming);
        set_buffer_len(3);
    }
}
