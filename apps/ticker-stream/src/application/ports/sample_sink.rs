//! Sample Sink
//!
//! The supervisor side of a stream connection. A connection never touches
//! the buffer or alert book directly; it reports through this trait and
//! tags every call with its generation.

use crate::domain::buffer::BufferError;
use crate::domain::market::PriceSample;
use crate::domain::stream::{ConnectionState, Generation};

/// Outcome of handing a sample to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Appended to the buffer.
    Accepted,
    /// The generation is no longer current; the sample was dropped.
    Stale,
    /// The buffer refused the sample.
    Rejected(BufferError),
}

/// Receiver for one connection's output.
pub trait SampleSink: Send + Sync {
    /// Whether `generation` is still the one the supervisor accepts data from.
    fn is_current(&self, generation: Generation) -> bool;

    /// Append a sample and evaluate alerts, if `generation` is current.
    fn deliver(&self, generation: Generation, sample: PriceSample) -> Delivery;

    /// Record a state transition. Ignored for stale generations.
    fn state_changed(&self, generation: Generation, state: ConnectionState, attempts: u32);

    /// Report that the retry budget is exhausted. Ignored for stale generations.
    fn unavailable(&self, generation: Generation, reason: &str);
}
