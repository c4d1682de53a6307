//! Snapshot Port (Driven Port)
//!
//! One-shot fetch of the symbol universe with 24h statistics.

use async_trait::async_trait;

use crate::domain::market::SymbolSummary;

/// Snapshot fetch errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// Request could not be sent or completed.
    #[error("snapshot request failed: {message}")]
    Request {
        /// Error details.
        message: String,
    },

    /// Non-success HTTP status.
    #[error("snapshot request returned HTTP {status}")]
    Status {
        /// Status code.
        status: u16,
    },

    /// Response body did not match the expected shape.
    #[error("snapshot response could not be decoded: {message}")]
    Decode {
        /// Error details.
        message: String,
    },
}

/// Port for the 24h summary table. Side-effect free.
#[async_trait]
pub trait SnapshotPort: Send + Sync {
    /// Fetch summaries ordered by volume, highest first.
    async fn fetch_summaries(&self) -> Result<Vec<SymbolSummary>, SnapshotError>;
}
