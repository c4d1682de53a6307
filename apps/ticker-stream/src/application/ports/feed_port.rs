//! Feed Port (Driven Port)
//!
//! Interface for opening a live per-symbol price stream.

use async_trait::async_trait;

use crate::domain::market::{PriceSample, Symbol};

/// Feed errors. All of them are transient from the connection's view and
/// count against its retry budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// Could not establish the subscription.
    #[error("feed connection failed: {message}")]
    Connect {
        /// Error details.
        message: String,
    },

    /// Connection establishment took too long.
    #[error("feed connection timed out after {secs}s")]
    Timeout {
        /// Timeout that elapsed.
        secs: u64,
    },

    /// The remote closed the stream.
    #[error("feed closed by remote: {reason}")]
    Closed {
        /// Close reason, if any was given.
        reason: String,
    },

    /// Transport error while receiving.
    #[error("feed transport error: {message}")]
    Transport {
        /// Error details.
        message: String,
    },
}

/// One inbound message, already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A valid price sample.
    Sample(PriceSample),
    /// A message that could not be turned into a sample.
    Malformed {
        /// Why it was rejected.
        reason: String,
    },
}

/// Port for opening live price subscriptions.
#[async_trait]
pub trait FeedPort: Send + Sync {
    /// Open a subscription for `symbol`.
    async fn subscribe(&self, symbol: &Symbol) -> Result<Box<dyn FeedSubscription>, FeedError>;
}

/// An open subscription.
#[async_trait]
pub trait FeedSubscription: Send {
    /// Wait for the next inbound message.
    ///
    /// `None` means the stream ended without an error frame; callers treat
    /// both `None` and `Some(Err(_))` as a dropped connection.
    async fn next_event(&mut self) -> Option<Result<FeedEvent, FeedError>>;

    /// Close the underlying connection. Safe to call more than once.
    async fn close(&mut self);
}
