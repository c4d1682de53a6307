//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `StreamSupervisor`: owns the single live stream, buffer and alerts
//! - `StreamConnection`: one subscription's connect/receive/reconnect task
//! - `ReconnectPolicy`: exponential backoff with jitter
//! - `fetch_with_retry`: bounded retries for the summary snapshot

mod connection;
mod reconnect;
mod snapshot;
mod supervisor;

pub use connection::{ConnectionConfig, StreamConnection};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use snapshot::fetch_with_retry;
pub use supervisor::{StreamSupervisor, SupervisorConfig, SupervisorError, WatchOutcome};
