//! Mock price feed for testing.
//!
//! Each `subscribe` call consumes the next scripted [`ConnectOutcome`]
//! (or the default when the script is empty). Accepted subscriptions hand
//! a [`MockConnection`] to the test, which pushes samples, malformed
//! messages and drops into the stream.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{Notify, mpsc};

use crate::application::ports::{FeedError, FeedEvent, FeedPort, FeedSubscription};
use crate::domain::market::{PriceSample, SampleSource, SourceKind, Symbol};

/// What a `subscribe` call does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Open a subscription.
    Accept,
    /// Fail with [`FeedError::Connect`].
    Fail(String),
    /// Never complete (exercises the connect timeout).
    Hang,
}

enum Message {
    Event(FeedEvent),
    Error(FeedError),
}

#[derive(Default)]
struct Inner {
    script: Mutex<VecDeque<ConnectOutcome>>,
    default: Mutex<Option<ConnectOutcome>>,
    subscribed: Mutex<Vec<Symbol>>,
    connections: Mutex<Vec<MockConnection>>,
    connected: Notify,
}

/// Scripted in-memory feed.
#[derive(Clone, Default)]
pub struct MockFeed {
    inner: Arc<Inner>,
}

impl MockFeed {
    /// Feed that accepts every subscription.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of a future `subscribe` call.
    pub fn push_outcome(&self, outcome: ConnectOutcome) {
        self.inner.script.lock().push_back(outcome);
    }

    /// Outcome used once the script is empty.
    pub fn set_default(&self, outcome: ConnectOutcome) {
        *self.inner.default.lock() = Some(outcome);
    }

    /// Number of `subscribe` calls so far, whatever their outcome.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.inner.subscribed.lock().len()
    }

    /// Symbols passed to `subscribe`, in call order.
    #[must_use]
    pub fn subscribed_symbols(&self) -> Vec<Symbol> {
        self.inner.subscribed.lock().clone()
    }

    /// Accepted connections so far.
    #[must_use]
    pub fn connections(&self) -> Vec<MockConnection> {
        self.inner.connections.lock().clone()
    }

    /// Wait for the `index`-th accepted connection (0-based).
    pub async fn connection(&self, index: usize) -> MockConnection {
        loop {
            let notified = self.inner.connected.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(connection) = self.inner.connections.lock().get(index) {
                return connection.clone();
            }
            notified.await;
        }
    }

    fn next_outcome(&self) -> ConnectOutcome {
        self.inner
            .script
            .lock()
            .pop_front()
            .or_else(|| self.inner.default.lock().clone())
            .unwrap_or(ConnectOutcome::Accept)
    }
}

#[async_trait]
impl FeedPort for MockFeed {
    async fn subscribe(&self, symbol: &Symbol) -> Result<Box<dyn FeedSubscription>, FeedError> {
        self.inner.subscribed.lock().push(symbol.clone());

        match self.next_outcome() {
            ConnectOutcome::Accept => {
                let (tx, rx) = mpsc::unbounded_channel();
                let closed = Arc::new(AtomicBool::new(false));
                let connection = MockConnection {
                    symbol: symbol.clone(),
                    tx,
                    closed: closed.clone(),
                    sequence: Arc::new(AtomicU64::new(0)),
                };
                self.inner.connections.lock().push(connection);
                self.inner.connected.notify_waiters();
                Ok(Box::new(MockSubscription { rx, closed }))
            }
            ConnectOutcome::Fail(message) => Err(FeedError::Connect { message }),
            ConnectOutcome::Hang => std::future::pending().await,
        }
    }
}

/// Test-side handle of an accepted subscription.
#[derive(Clone)]
pub struct MockConnection {
    symbol: Symbol,
    tx: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
}

impl MockConnection {
    /// Symbol this subscription was opened for.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Push a prepared sample. Returns `false` once the subscription is gone.
    pub fn send_sample(&self, sample: PriceSample) -> bool {
        self.send(Message::Event(FeedEvent::Sample(sample)))
    }

    /// Push a trade sample for this subscription's symbol.
    pub fn send_price(&self, price: Decimal, timestamp: DateTime<Utc>) -> bool {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.send_sample(PriceSample::new(
            self.symbol.clone(),
            price,
            timestamp,
            SampleSource {
                kind: SourceKind::Trade,
                sequence,
            },
        ))
    }

    /// Push a malformed message.
    pub fn send_malformed(&self, reason: &str) -> bool {
        self.send(Message::Event(FeedEvent::Malformed {
            reason: reason.to_string(),
        }))
    }

    /// Simulate a transport failure.
    pub fn drop_connection(&self) -> bool {
        self.send(Message::Error(FeedError::Transport {
            message: "connection reset by peer".to_string(),
        }))
    }

    /// Whether the consumer closed the subscription.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn send(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }
}

struct MockSubscription {
    rx: mpsc::UnboundedReceiver<Message>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FeedSubscription for MockSubscription {
    async fn next_event(&mut self) -> Option<Result<FeedEvent, FeedError>> {
        match self.rx.recv().await? {
            Message::Event(event) => Some(Ok(event)),
            Message::Error(error) => Some(Err(error)),
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.rx.close();
    }
}
