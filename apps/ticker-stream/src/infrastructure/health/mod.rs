//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for stream status reporting and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status of the watched stream
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (200 while streaming)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::StreamSupervisor;
use crate::domain::stream::{ConnectionState, StreamStatus};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Crate version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Status of the watched stream.
    pub stream: StreamStatus,
    /// Registered alert rules.
    pub alert_rules: usize,
    /// Alerts in the history log.
    pub alerts_logged: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Receiving samples.
    Healthy,
    /// Connecting or between reconnect attempts.
    Degraded,
    /// Stopped or out of retries.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    supervisor: Arc<StreamSupervisor>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, supervisor: Arc<StreamSupervisor>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            supervisor,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Routes served by the health server.
    #[must_use]
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::ServerFailed` if the HTTP server fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HealthServerError> {
        let port = listener.local_addr().map_or(self.port, |a| a.port());
        tracing::info!(port, "Health server listening");

        axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.supervisor.status().state == ConnectionState::Streaming {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let stream = state.supervisor.status();
    HealthResponse {
        status: determine_health_status(&stream),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        alert_rules: state.supervisor.rules().len(),
        alerts_logged: state.supervisor.alert_history().len(),
        stream,
    }
}

fn determine_health_status(stream: &StreamStatus) -> HealthStatus {
    if stream.is_unavailable() || stream.symbol.is_none() {
        return HealthStatus::Unhealthy;
    }
    match stream.state {
        ConnectionState::Streaming => HealthStatus::Healthy,
        ConnectionState::Idle | ConnectionState::Connecting => HealthStatus::Degraded,
        ConnectionState::Draining | ConnectionState::Closed => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Symbol;
    use crate::domain::stream::Generation;
    use test_case::test_case;

    fn status(state: ConnectionState) -> StreamStatus {
        let mut status =
            StreamStatus::starting(Symbol::new("BTCUSDT").unwrap(), Generation::new(1), Utc::now());
        status.state = state;
        status
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(ConnectionState::Streaming, HealthStatus::Healthy)]
    #[test_case(ConnectionState::Connecting, HealthStatus::Degraded)]
    #[test_case(ConnectionState::Idle, HealthStatus::Degraded)]
    #[test_case(ConnectionState::Draining, HealthStatus::Unhealthy)]
    #[test_case(ConnectionState::Closed, HealthStatus::Unhealthy)]
    fn status_follows_connection_state(state: ConnectionState, expected: HealthStatus) {
        assert_eq!(determine_health_status(&status(state)), expected);
    }

    #[test]
    fn stopped_or_exhausted_is_unhealthy() {
        assert_eq!(
            determine_health_status(&StreamStatus::default()),
            HealthStatus::Unhealthy
        );

        let mut exhausted = status(ConnectionState::Connecting);
        exhausted.fatal = Some("connect failed".to_string());
        assert_eq!(determine_health_status(&exhausted), HealthStatus::Unhealthy);
    }
}
