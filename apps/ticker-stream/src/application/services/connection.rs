//! Stream Connection
//!
//! One subscription for one symbol and one generation. The connection runs
//! on its own task: connect with a timeout, receive until the stream drops,
//! back off and retry, until it is stopped, superseded or out of attempts.
//!
//! Stopping is a signal, not a wait. The supervisor invalidates the
//! generation first, so nothing the task still receives while closing its
//! socket can reach the buffer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use crate::application::ports::{
    Delivery, FeedError, FeedEvent, FeedPort, FeedSubscription, SampleSink,
};
use crate::domain::buffer::BufferError;
use crate::domain::market::Symbol;
use crate::domain::stream::{ConnectionState, Generation};
use crate::infrastructure::metrics::{self, DropReason};

/// Per-connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Bound on establishing one subscription.
    pub connect_timeout: Duration,
    /// Backoff between failed attempts.
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Handle to one running connection.
#[derive(Debug)]
pub struct StreamConnection {
    symbol: Symbol,
    generation: Generation,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamConnection {
    /// Create an idle connection for `symbol` tagged with `generation`.
    #[must_use]
    pub fn new(symbol: Symbol, generation: Generation) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            symbol,
            generation,
            state,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Symbol this connection was created for.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Generation this connection reports under.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawn the connection task. Must be called inside a Tokio runtime.
    ///
    /// Starting twice, or starting after a stop, does nothing.
    pub fn start(
        &mut self,
        feed: Arc<dyn FeedPort>,
        sink: Arc<dyn SampleSink>,
        config: ConnectionConfig,
    ) {
        if self.task.is_some() || self.cancel.is_cancelled() {
            return;
        }
        let worker = Worker {
            symbol: self.symbol.clone(),
            generation: self.generation,
            feed,
            sink,
            config,
            cancel: self.cancel.clone(),
            state: self.state.clone(),
        };
        worker.set_state(ConnectionState::Connecting, 0);
        self.task = Some(tokio::spawn(worker.run()));
    }

    /// Signal the task to stop. Returns immediately; safe to call repeatedly.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(symbol = %self.symbol, generation = %self.generation, "Stopping stream connection");
            self.cancel.cancel();
        }
    }

    /// Wait until the connection reaches [`ConnectionState::Closed`].
    ///
    /// Returns immediately for a connection that was never started.
    pub async fn closed(&self) {
        if self.task.is_none() {
            return;
        }
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Connection Task
// =============================================================================

/// How the task ended.
enum Exit {
    Stopped,
    Superseded,
    Exhausted(ReconnectError),
}

enum Attempt {
    Connected(Box<dyn FeedSubscription>),
    Failed(FeedError),
    Cancelled,
}

struct Worker {
    symbol: Symbol,
    generation: Generation,
    feed: Arc<dyn FeedPort>,
    sink: Arc<dyn SampleSink>,
    config: ConnectionConfig,
    cancel: CancellationToken,
    state: watch::Sender<ConnectionState>,
}

impl Worker {
    fn set_state(&self, state: ConnectionState, attempts: u32) {
        self.state.send_replace(state);
        self.sink.state_changed(self.generation, state, attempts);
    }

    /// Why the loop must end before doing more work, if it must.
    fn interrupted(&self) -> Option<Exit> {
        if self.cancel.is_cancelled() {
            Some(Exit::Stopped)
        } else if !self.sink.is_current(self.generation) {
            Some(Exit::Superseded)
        } else {
            None
        }
    }

    async fn run(self) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        let exit = loop {
            if let Some(exit) = self.interrupted() {
                break exit;
            }

            let failure = match self.connect().await {
                Attempt::Cancelled => break Exit::Stopped,
                Attempt::Failed(e) => e,
                Attempt::Connected(mut subscription) => {
                    tracing::info!(
                        symbol = %self.symbol,
                        generation = %self.generation,
                        "Stream connected"
                    );
                    self.set_state(ConnectionState::Streaming, policy.attempt_count());
                    let result = self.receive(subscription.as_mut(), &mut policy).await;
                    if matches!(result, Ok(Exit::Stopped)) {
                        self.set_state(ConnectionState::Draining, 0);
                    }
                    subscription.close().await;
                    match result {
                        Ok(exit) => break exit,
                        Err(e) => e,
                    }
                }
            };

            if let Some(exit) = self.interrupted() {
                break exit;
            }

            let Some(delay) = policy.next_delay() else {
                break Exit::Exhausted(ReconnectError::MaxAttemptsExceeded {
                    attempts: policy.attempt_count(),
                    last_error: failure.to_string(),
                });
            };
            let attempt = policy.attempt_count();
            tracing::warn!(
                symbol = %self.symbol,
                generation = %self.generation,
                error = %failure,
                attempt,
                max_attempts = policy.max_attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Stream connection lost, reconnecting"
            );
            metrics::record_reconnect(self.symbol.as_str());
            self.set_state(ConnectionState::Connecting, attempt);

            tokio::select! {
                () = self.cancel.cancelled() => break Exit::Stopped,
                () = tokio::time::sleep(delay) => {}
            }
        };

        let attempts = match exit {
            Exit::Stopped => {
                tracing::info!(symbol = %self.symbol, generation = %self.generation, "Stream stopped");
                0
            }
            Exit::Superseded => {
                tracing::debug!(symbol = %self.symbol, generation = %self.generation, "Stream superseded");
                0
            }
            Exit::Exhausted(e) => {
                tracing::error!(
                    symbol = %self.symbol,
                    generation = %self.generation,
                    error = %e,
                    "Stream unavailable"
                );
                self.sink.unavailable(self.generation, &e.to_string());
                policy.attempt_count()
            }
        };
        self.set_state(ConnectionState::Closed, attempts);
    }

    async fn connect(&self) -> Attempt {
        let timeout = self.config.connect_timeout;
        tokio::select! {
            () = self.cancel.cancelled() => Attempt::Cancelled,
            result = tokio::time::timeout(timeout, self.feed.subscribe(&self.symbol)) => match result {
                Ok(Ok(subscription)) => Attempt::Connected(subscription),
                Ok(Err(e)) => Attempt::Failed(e),
                Err(_) => Attempt::Failed(FeedError::Timeout { secs: timeout.as_secs() }),
            },
        }
    }

    /// Receive until the stream fails (`Err`) or the loop must end (`Ok`).
    async fn receive(
        &self,
        subscription: &mut dyn FeedSubscription,
        policy: &mut ReconnectPolicy,
    ) -> Result<Exit, FeedError> {
        let mut accepted: u64 = 0;
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(Exit::Stopped),
                next = subscription.next_event() => next,
            };

            if let Some(exit) = self.interrupted() {
                if matches!(next, Some(Ok(FeedEvent::Sample(_)))) {
                    metrics::record_sample_dropped(DropReason::Stale);
                }
                return Ok(exit);
            }

            let event = match next {
                None => {
                    return Err(FeedError::Closed {
                        reason: "stream ended".to_string(),
                    });
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(event)) => event,
            };

            if policy.attempt_count() > 0 {
                policy.reset();
                self.set_state(ConnectionState::Streaming, 0);
            }

            match event {
                FeedEvent::Malformed { reason } => {
                    tracing::warn!(symbol = %self.symbol, %reason, "Skipping malformed message");
                    metrics::record_malformed_message();
                }
                FeedEvent::Sample(sample) => {
                    let price = sample.price;
                    match self.sink.deliver(self.generation, sample) {
                        Delivery::Accepted => {
                            accepted += 1;
                            if accepted == 1 || accepted % 100 == 0 {
                                tracing::info!(symbol = %self.symbol, %price, accepted, "Price update");
                            } else {
                                tracing::trace!(symbol = %self.symbol, %price, "Price update");
                            }
                        }
                        Delivery::Stale => {
                            metrics::record_sample_dropped(DropReason::Stale);
                            return Ok(Exit::Superseded);
                        }
                        Delivery::Rejected(e) => {
                            let reason = match e {
                                BufferError::OutOfOrder { .. } => DropReason::OutOfOrder,
                                _ => DropReason::SymbolMismatch,
                            };
                            metrics::record_sample_dropped(reason);
                            tracing::warn!(symbol = %self.symbol, error = %e, "Sample rejected by buffer");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicU64, Ordering};

    use chrono::Utc;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::market::PriceSample;
    use crate::infrastructure::mock::{ConnectOutcome, MockFeed};

    /// Sink that accepts everything for one generation and records calls.
    #[derive(Default)]
    struct RecordingSink {
        current: AtomicU64,
        samples: Mutex<Vec<PriceSample>>,
        states: Mutex<Vec<(ConnectionState, u32)>>,
        unavailable: Mutex<Option<String>>,
    }

    impl SampleSink for RecordingSink {
        fn is_current(&self, generation: Generation) -> bool {
            self.current.load(Ordering::Acquire) == generation.get()
        }

        fn deliver(&self, generation: Generation, sample: PriceSample) -> Delivery {
            if !self.is_current(generation) {
                return Delivery::Stale;
            }
            self.samples.lock().push(sample);
            Delivery::Accepted
        }

        fn state_changed(&self, _: Generation, state: ConnectionState, attempts: u32) {
            self.states.lock().push((state, attempts));
        }

        fn unavailable(&self, _: Generation, reason: &str) {
            *self.unavailable.lock() = Some(reason.to_string());
        }
    }

    fn setup() -> (MockFeed, Arc<RecordingSink>, StreamConnection) {
        let sink = Arc::new(RecordingSink::default());
        sink.current.store(1, Ordering::Release);
        let connection = StreamConnection::new(Symbol::new("BTCUSDT").unwrap(), Generation::new(1));
        (MockFeed::new(), sink, connection)
    }

    fn config(max_attempts: u32) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(1),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(400),
                multiplier: 2.0,
                jitter_factor: 0.0,
                max_attempts: NonZeroU32::new(max_attempts).unwrap(),
            },
        }
    }

    #[tokio::test]
    async fn closed_returns_at_once_when_never_started() {
        let (_, _, connection) = setup();
        connection.closed().await;
        assert_eq!(connection.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn stop_drains_and_closes() {
        let (feed, sink, mut connection) = setup();
        connection.start(Arc::new(feed.clone()), sink.clone(), config(3));
        let mock = feed.connection(0).await;
        mock.send_price(dec!(10), Utc::now());

        let mut state = connection.watch_state();
        state
            .wait_for(|s| *s == ConnectionState::Streaming)
            .await
            .unwrap();
        while sink.samples.lock().is_empty() {
            tokio::task::yield_now().await;
        }

        connection.stop();
        connection.stop();
        connection.closed().await;

        assert!(connection.is_stopped());
        assert!(mock.is_closed());
        let states: Vec<_> = sink.states.lock().iter().map(|(s, _)| *s).collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Streaming,
                ConnectionState::Draining,
                ConnectionState::Closed,
            ]
        );
        assert!(sink.unavailable.lock().is_none());
    }

    #[tokio::test]
    async fn superseded_connection_exits_on_next_sample() {
        let (feed, sink, mut connection) = setup();
        connection.start(Arc::new(feed.clone()), sink.clone(), config(3));
        let mock = feed.connection(0).await;

        sink.current.store(2, Ordering::Release);
        mock.send_price(dec!(10), Utc::now());
        connection.closed().await;

        assert!(sink.samples.lock().is_empty());
        assert!(mock.is_closed());
        assert!(!connection.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_stay_bounded_until_exhaustion() {
        let (feed, sink, mut connection) = setup();
        feed.set_default(ConnectOutcome::Fail("refused".to_string()));

        let started = tokio::time::Instant::now();
        connection.start(Arc::new(feed.clone()), sink.clone(), config(4));
        connection.closed().await;

        // 100 + 200 + 400 between four attempts
        assert_eq!(started.elapsed(), Duration::from_millis(700));
        assert_eq!(feed.connect_count(), 4);
        let reason = sink.unavailable.lock().clone().unwrap();
        assert!(reason.contains("refused"));
        assert!(reason.contains("4 consecutive"));
        assert_eq!(
            sink.states.lock().last(),
            Some(&(ConnectionState::Closed, 4))
        );

        let attempts: Vec<_> = sink
            .states
            .lock()
            .iter()
            .filter(|(s, _)| *s == ConnectionState::Connecting)
            .map(|(_, a)| *a)
            .collect();
        assert_eq!(attempts, vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_clamp_at_max_with_longer_budget() {
        let (feed, sink, mut connection) = setup();
        feed.set_default(ConnectOutcome::Fail("refused".to_string()));

        let started = tokio::time::Instant::now();
        connection.start(Arc::new(feed.clone()), sink.clone(), config(5));
        connection.closed().await;

        // 100 + 200 + 400 + 400 (clamped)
        assert_eq!(started.elapsed(), Duration::from_millis(1100));
        assert_eq!(feed.connect_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_counts_as_failure() {
        let (feed, sink, mut connection) = setup();
        feed.push_outcome(ConnectOutcome::Hang);

        connection.start(Arc::new(feed.clone()), sink.clone(), config(3));
        let mock = feed.connection(0).await;
        mock.send_price(dec!(1), Utc::now());
        while sink.samples.lock().is_empty() {
            tokio::task::yield_now().await;
        }

        assert_eq!(feed.connect_count(), 2);
        assert!(
            sink.states
                .lock()
                .contains(&(ConnectionState::Connecting, 1))
        );
        connection.stop();
        connection.closed().await;
    }
}
