//! Port Interfaces
//!
//! Contracts between the streaming core and the outside world, following
//! the hexagonal layout.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedPort` / `FeedSubscription`: one live per-symbol price stream
//! - `SnapshotPort`: one-shot 24h summary fetch
//!
//! ## Internal Seam
//!
//! - `SampleSink`: where a connection hands its samples and state changes

mod feed_port;
mod sample_sink;
mod snapshot_port;

pub use feed_port::{FeedError, FeedEvent, FeedPort, FeedSubscription};
pub use sample_sink::{Delivery, SampleSink};
pub use snapshot_port::{SnapshotError, SnapshotPort};
