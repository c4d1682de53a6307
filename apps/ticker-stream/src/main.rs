//! Ticker Stream Binary
//!
//! Streams one symbol's prices, keeps the recent history and logs alerts.
//!
//! # Usage
//!
//! ```bash
//! TICKER_SYMBOL=ETHUSDT TICKER_ALERTS=ETHUSDT:above:4000 cargo run -p ticker-stream
//! ```
//!
//! # Environment Variables
//!
//! - `TICKER_SYMBOL`: symbol to watch (default: BTCUSDT)
//! - `TICKER_STREAM_KIND`: trade | aggTrade | ticker (default: trade)
//! - `TICKER_ALERTS`: comma-separated rule specs, e.g. `BTCUSDT:change:2:60`
//! - `TICKER_HEALTH_PORT`: health and metrics HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: export spans over OTLP (default: false)
//! - `RUST_LOG`: log filter (default: ticker_stream=info)
//!
//! The full table lives on [`ticker_stream::StreamConfig`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ticker_stream::application::services::fetch_with_retry;
use ticker_stream::infrastructure::health::{HealthServer, HealthServerState};
use ticker_stream::infrastructure::telemetry;
use ticker_stream::{
    BinanceFeed, BinanceSnapshotClient, StreamConfig, StreamEvent, StreamSupervisor,
    SymbolSummary, init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Delay between snapshot attempts.
const SNAPSHOT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Summaries logged at start-up.
const SUMMARY_LOG_ROWS: usize = 10;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting ticker stream");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = StreamConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Market overview
    let snapshot_client = BinanceSnapshotClient::new(&config.snapshot_client_config())
        .context("failed to build REST client")?;
    match fetch_with_retry(&snapshot_client, config.snapshot.retries, SNAPSHOT_RETRY_DELAY).await {
        Ok(summaries) => log_summaries(&summaries),
        Err(e) => tracing::warn!(error = %e, "Market overview unavailable"),
    }

    // Stream supervisor
    let feed = Arc::new(BinanceFeed::new(config.feed_config()));
    let supervisor = Arc::new(StreamSupervisor::new(feed, config.supervisor_config()));

    for rule in config.alerts.iter().cloned() {
        let symbol = rule.symbol.clone();
        let id = supervisor
            .add_rule(rule)
            .with_context(|| format!("failed to register alert rule for {symbol}"))?;
        tracing::debug!(%symbol, rule = %id, "Registered configured alert rule");
    }

    let events = supervisor.subscribe();
    let event_task = tokio::spawn(log_events(events, shutdown_token.clone()));

    let health_task = spawn_health_server(&config, &supervisor, &shutdown_token);

    let outcome = supervisor
        .watch(config.feed.symbol.clone())
        .context("failed to start stream")?;
    tracing::info!(
        symbol = %config.feed.symbol,
        generation = %outcome.generation(),
        "Ticker stream ready"
    );

    await_shutdown(shutdown_token.clone()).await;

    supervisor.stop();

    let drain = async {
        let _ = event_task.await;
        if let Some(task) = health_task {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out waiting for background tasks"
        );
    }

    tracing::info!("Ticker stream stopped");
    Ok(())
}

/// Start the health server unless disabled.
fn spawn_health_server(
    config: &StreamConfig,
    supervisor: &Arc<StreamSupervisor>,
    shutdown_token: &CancellationToken,
) -> Option<JoinHandle<()>> {
    if config.server.health_port == 0 {
        tracing::info!("Health server disabled");
        return None;
    }

    let state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(supervisor),
    ));
    let server = HealthServer::new(config.server.health_port, state, shutdown_token.clone());
    Some(tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    }))
}

/// Log alerts and stream lifecycle events until shutdown.
async fn log_events(mut events: broadcast::Receiver<StreamEvent>, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => return,
            event = events.recv() => event,
        };

        match event {
            Ok(StreamEvent::AlertFired(alert)) => {
                tracing::info!(
                    symbol = %alert.rule.symbol,
                    rule = %alert.rule.id,
                    price = %alert.sample.price,
                    "{}",
                    alert.message()
                );
            }
            Ok(StreamEvent::Unavailable {
                symbol,
                generation,
                reason,
            }) => {
                tracing::error!(%symbol, %generation, %reason, "Stream unavailable");
            }
            Ok(StreamEvent::StateChanged {
                symbol,
                generation,
                state,
                attempts,
            }) => {
                tracing::debug!(%symbol, %generation, %state, attempts, "Stream state changed");
            }
            Ok(StreamEvent::SampleAccepted(_)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Log the top of the market overview.
fn log_summaries(summaries: &[SymbolSummary]) {
    tracing::info!(count = summaries.len(), "Market overview loaded");
    for summary in summaries.iter().take(SUMMARY_LOG_ROWS) {
        tracing::info!(
            rank = summary.rank,
            symbol = %summary.symbol,
            price = %summary.price,
            change_pct = %summary.percent_change_24h,
            volume = %summary.volume,
            "24h summary"
        );
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        symbol = %config.feed.symbol,
        kind = config.feed.kind.stream_suffix(),
        buffer_capacity = config.stream.buffer_capacity.get(),
        alert_rules = config.alerts.len(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        ws_url = %config.feed.ws_url,
        rest_url = %config.feed.rest_url,
        max_reconnect_attempts = config.stream.max_reconnect_attempts.get(),
        "Endpoints"
    );
}

/// Load .env file from the current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
