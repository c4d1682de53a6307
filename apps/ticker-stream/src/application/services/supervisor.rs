//! Stream Supervisor
//!
//! Single authority over which symbol is streamed. Holds at most one live
//! [`StreamConnection`], the price buffer for the watched symbol and the
//! alert book.
//!
//! # Generations
//!
//! Every `watch` creates a connection with a fresh generation id and makes
//! it current in the same critical section that swaps in the new buffer.
//! Connections tag every delivery with their generation; deliveries from a
//! generation that is no longer current are dropped. Superseded connections
//! are signalled to stop and left to close on their own task.
//!
//! # Locking
//!
//! `connection` serializes `watch`/`stop`. `active` guards buffer and status
//! and is always taken before `alerts`.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use super::connection::{ConnectionConfig, StreamConnection};
use crate::application::ports::{Delivery, FeedPort, SampleSink};
use crate::domain::alert::{
    AlertBook, AlertError, AlertEvent, AlertRule, DEFAULT_HISTORY_LIMIT, NewAlertRule, RuleId,
};
use crate::domain::buffer::{self, BufferError, BufferSnapshot, SampleBuffer};
use crate::domain::market::{PriceSample, Symbol};
use crate::domain::stream::{ConnectionState, Generation, StreamEvent, StreamStatus};
use crate::infrastructure::metrics;

/// Default capacity of the event channel.
const DEFAULT_EVENT_CAPACITY: usize = 1024;

// =============================================================================
// Configuration & Errors
// =============================================================================

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Samples kept per symbol.
    pub buffer_capacity: NonZeroUsize,
    /// Alert events kept in the log.
    pub alert_history_limit: NonZeroUsize,
    /// Settings handed to each connection.
    pub connection: ConnectionConfig,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: buffer::DEFAULT_CAPACITY,
            alert_history_limit: DEFAULT_HISTORY_LIMIT,
            connection: ConnectionConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SupervisorConfig {
    /// Default settings with a custom buffer capacity.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::ZeroCapacity`] for a capacity of zero.
    pub fn with_buffer_capacity(capacity: usize) -> Result<Self, BufferError> {
        let buffer_capacity = NonZeroUsize::new(capacity).ok_or(BufferError::ZeroCapacity)?;
        Ok(Self {
            buffer_capacity,
            ..Self::default()
        })
    }
}

/// Supervisor errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    /// `watch` was called outside a Tokio runtime.
    #[error("watch requires a running Tokio runtime")]
    NoRuntime,
}

/// Result of [`StreamSupervisor::watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The symbol was already streaming or connecting; nothing changed.
    AlreadyWatching(Generation),
    /// A new connection was started.
    Started(Generation),
}

impl WatchOutcome {
    /// Generation of the connection now current.
    #[must_use]
    pub const fn generation(self) -> Generation {
        match self {
            Self::AlreadyWatching(g) | Self::Started(g) => g,
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug)]
struct Active {
    generation: Generation,
    buffer: SampleBuffer,
    status: StreamStatus,
}

/// State shared between the supervisor and its connection tasks.
struct Shared {
    current: AtomicU64,
    active: RwLock<Option<Active>>,
    alerts: RwLock<AlertBook>,
    events: broadcast::Sender<StreamEvent>,
}

impl Shared {
    fn publish(&self, event: StreamEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl SampleSink for Shared {
    fn is_current(&self, generation: Generation) -> bool {
        self.current.load(Ordering::Acquire) == generation.get()
    }

    fn deliver(&self, generation: Generation, sample: PriceSample) -> Delivery {
        let fired = {
            let mut guard = self.active.write();
            let Some(active) = guard.as_mut().filter(|a| a.generation == generation) else {
                return Delivery::Stale;
            };
            if let Err(e) = active.buffer.append(sample.clone()) {
                return Delivery::Rejected(e);
            }

            let now = Utc::now();
            active.status.samples_received += 1;
            active.status.latest_price = Some(sample.price);
            active.status.last_sample_at = Some(now);
            metrics::record_sample_received(sample.symbol.as_str());
            metrics::set_buffer_len(active.buffer.len());

            self.alerts.write().evaluate(&active.buffer.view(), now)
        };

        self.publish(StreamEvent::SampleAccepted(sample));
        for event in fired {
            tracing::info!(rule = %event.rule.id, message = %event.message(), "Alert fired");
            metrics::record_alert_fired(event.rule.symbol.as_str());
            self.publish(StreamEvent::AlertFired(event));
        }
        Delivery::Accepted
    }

    fn state_changed(&self, generation: Generation, state: ConnectionState, attempts: u32) {
        let event = {
            let mut guard = self.active.write();
            let Some(active) = guard.as_mut().filter(|a| a.generation == generation) else {
                return;
            };
            let changed = active.status.state != state;
            active.status.state = state;
            active.status.reconnect_attempts = attempts;
            metrics::set_connection_state(state);
            changed.then(|| StreamEvent::StateChanged {
                symbol: active.buffer.symbol().clone(),
                generation,
                state,
                attempts,
            })
        };
        if let Some(event) = event {
            self.publish(event);
        }
    }

    fn unavailable(&self, generation: Generation, reason: &str) {
        let symbol = {
            let mut guard = self.active.write();
            let Some(active) = guard.as_mut().filter(|a| a.generation == generation) else {
                return;
            };
            active.status.fatal = Some(reason.to_string());
            active.buffer.symbol().clone()
        };
        self.publish(StreamEvent::Unavailable {
            symbol,
            generation,
            reason: reason.to_string(),
        });
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Owns the single live stream, its buffer and the alert book.
pub struct StreamSupervisor {
    feed: Arc<dyn FeedPort>,
    config: SupervisorConfig,
    shared: Arc<Shared>,
    connection: Mutex<Option<StreamConnection>>,
    next_generation: AtomicU64,
}

impl StreamSupervisor {
    /// Create a supervisor that opens subscriptions through `feed`.
    #[must_use]
    pub fn new(feed: Arc<dyn FeedPort>, config: SupervisorConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let shared = Arc::new(Shared {
            current: AtomicU64::new(Generation::NONE.get()),
            active: RwLock::new(None),
            alerts: RwLock::new(AlertBook::new(config.alert_history_limit)),
            events,
        });
        Self {
            feed,
            config,
            shared,
            connection: Mutex::new(None),
            next_generation: AtomicU64::new(Generation::NONE.get()),
        }
    }

    /// Stream `symbol`, replacing whatever was streaming before.
    ///
    /// Returns without waiting for any network I/O. Watching the symbol that
    /// is already connecting or streaming is a no-op; watching it after its
    /// connection closed starts a new one.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::NoRuntime`] outside a Tokio runtime.
    pub fn watch(&self, symbol: Symbol) -> Result<WatchOutcome, SupervisorError> {
        let mut slot = self.connection.lock();

        if let Some(current) = slot.as_ref()
            && current.symbol() == &symbol
            && current.state().is_live()
            && self.shared.is_current(current.generation())
        {
            tracing::debug!(%symbol, generation = %current.generation(), "Already watching");
            return Ok(WatchOutcome::AlreadyWatching(current.generation()));
        }

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(SupervisorError::NoRuntime);
        }

        let generation = Generation::new(self.next_generation.fetch_add(1, Ordering::AcqRel) + 1);
        {
            let mut active = self.shared.active.write();
            self.shared.current.store(generation.get(), Ordering::Release);
            *active = Some(Active {
                generation,
                buffer: SampleBuffer::with_capacity(symbol.clone(), self.config.buffer_capacity),
                status: StreamStatus::starting(symbol.clone(), generation, Utc::now()),
            });
        }
        metrics::set_buffer_len(0);

        if let Some(previous) = slot.take() {
            tracing::info!(
                from = %previous.symbol(),
                to = %symbol,
                superseded = %previous.generation(),
                "Switching stream"
            );
            previous.stop();
        } else {
            tracing::info!(%symbol, %generation, "Starting stream");
        }

        let mut connection = StreamConnection::new(symbol, generation);
        let sink: Arc<dyn SampleSink> = self.shared.clone();
        connection.start(self.feed.clone(), sink, self.config.connection.clone());
        *slot = Some(connection);

        Ok(WatchOutcome::Started(generation))
    }

    /// Stop streaming. Returns immediately; safe to call when already stopped.
    pub fn stop(&self) {
        let mut slot = self.connection.lock();
        {
            let mut active = self.shared.active.write();
            self.shared.current.store(Generation::NONE.get(), Ordering::Release);
            *active = None;
        }
        if let Some(previous) = slot.take() {
            tracing::info!(symbol = %previous.symbol(), generation = %previous.generation(), "Stream stopped");
            previous.stop();
            metrics::set_connection_state(ConnectionState::Closed);
            metrics::set_buffer_len(0);
        }
    }

    /// Copy of the current buffer, `None` when nothing is watched.
    #[must_use]
    pub fn current_snapshot(&self) -> Option<BufferSnapshot> {
        self.shared
            .active
            .read()
            .as_ref()
            .map(|a| a.buffer.snapshot())
    }

    /// Status of the current stream (default status when stopped).
    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.shared
            .active
            .read()
            .as_ref()
            .map(|a| a.status.clone())
            .unwrap_or_default()
    }

    /// Currently watched symbol.
    #[must_use]
    pub fn current_symbol(&self) -> Option<Symbol> {
        self.shared
            .active
            .read()
            .as_ref()
            .map(|a| a.buffer.symbol().clone())
    }

    /// Generation whose samples are currently accepted.
    #[must_use]
    pub fn current_generation(&self) -> Generation {
        Generation::new(self.shared.current.load(Ordering::Acquire))
    }

    /// Receive supervisor events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.events.subscribe()
    }

    // -------------------------------------------------------------------------
    // Alerts
    // -------------------------------------------------------------------------

    /// Register an alert rule.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError`] for invalid thresholds, percentages or windows.
    pub fn add_rule(&self, rule: NewAlertRule) -> Result<RuleId, AlertError> {
        let id = self.shared.alerts.write().add_rule(rule)?;
        tracing::info!(rule = %id, "Alert rule added");
        Ok(id)
    }

    /// Remove an alert rule.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::UnknownRule`] if the id is not registered.
    pub fn clear_rule(&self, id: RuleId) -> Result<(), AlertError> {
        self.shared.alerts.write().clear_rule(id)?;
        tracing::info!(rule = %id, "Alert rule cleared");
        Ok(())
    }

    /// Re-arm a fired rule.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::UnknownRule`] if the id is not registered.
    pub fn reset_rule(&self, id: RuleId) -> Result<(), AlertError> {
        self.shared.alerts.write().reset_rule(id)
    }

    /// Registered rules in insertion order.
    #[must_use]
    pub fn rules(&self) -> Vec<AlertRule> {
        self.shared.alerts.read().rules().to_vec()
    }

    /// Fired alerts, oldest first.
    #[must_use]
    pub fn alert_history(&self) -> Vec<AlertEvent> {
        self.shared.alerts.read().history()
    }

    /// Forget all fired alerts.
    pub fn clear_alert_history(&self) {
        self.shared.alerts.write().clear_history();
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockFeed;
    use rust_decimal_macros::dec;

    fn supervisor(feed: &MockFeed) -> StreamSupervisor {
        StreamSupervisor::new(Arc::new(feed.clone()), SupervisorConfig::default())
    }

    #[test]
    fn watch_outside_runtime_fails() {
        let feed = MockFeed::new();
        let supervisor = supervisor(&feed);
        assert_eq!(
            supervisor.watch(Symbol::new("BTCUSDT").unwrap()),
            Err(SupervisorError::NoRuntime)
        );
        assert!(supervisor.current_snapshot().is_none());
    }

    #[test]
    fn zero_buffer_capacity_is_rejected() {
        assert_eq!(
            SupervisorConfig::with_buffer_capacity(0).unwrap_err(),
            BufferError::ZeroCapacity
        );
    }

    #[tokio::test]
    async fn stale_generation_is_dropped() {
        let feed = MockFeed::new();
        let supervisor = supervisor(&feed);
        let btc = Symbol::new("BTCUSDT").unwrap();
        let first = supervisor.watch(btc.clone()).unwrap().generation();
        let second = supervisor
            .watch(Symbol::new("ETHUSDT").unwrap())
            .unwrap()
            .generation();
        assert!(second > first);

        let sample = PriceSample::new(
            btc,
            dec!(1),
            Utc::now(),
            crate::domain::market::SampleSource {
                kind: crate::domain::market::SourceKind::Trade,
                sequence: 1,
            },
        );
        assert_eq!(supervisor.shared.deliver(first, sample), Delivery::Stale);
        assert!(supervisor.current_snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn alerts_evaluate_across_buffer_wraparound() {
        use crate::domain::market::{SampleSource, SourceKind};
        use chrono::TimeZone;
        use std::time::Duration;

        let feed = MockFeed::new();
        let supervisor = StreamSupervisor::new(
            Arc::new(feed.clone()),
            SupervisorConfig::with_buffer_capacity(3).unwrap(),
        );
        let btc = Symbol::new("BTCUSDT").unwrap();
        supervisor
            .add_rule(NewAlertRule::percent_change(
                btc.clone(),
                dec!(5),
                Duration::from_secs(25),
            ))
            .unwrap();
        let generation = supervisor.watch(btc.clone()).unwrap().generation();

        let prices = [dec!(100), dec!(100), dec!(100), dec!(100), dec!(102), dec!(106)];
        for (i, price) in prices.into_iter().enumerate() {
            let secs = i64::try_from(i).unwrap() * 10;
            let sample = PriceSample::new(
                btc.clone(),
                price,
                Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
                SampleSource {
                    kind: SourceKind::Trade,
                    sequence: u64::try_from(i).unwrap(),
                },
            );
            assert_eq!(supervisor.shared.deliver(generation, sample), Delivery::Accepted);
        }

        // Buffer holds t=30..50; the window reference is the 100 at t=30.
        let history = supervisor.alert_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_pct, Some(dec!(6)));
        assert_eq!(supervisor.current_snapshot().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let feed = MockFeed::new();
        let supervisor = supervisor(&feed);
        supervisor.watch(Symbol::new("BTCUSDT").unwrap()).unwrap();
        supervisor.stop();
        supervisor.stop();
        assert!(supervisor.current_snapshot().is_none());
        assert_eq!(supervisor.current_generation(), Generation::NONE);
        assert_eq!(supervisor.status(), StreamStatus::default());
    }
}
