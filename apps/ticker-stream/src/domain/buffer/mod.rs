//! Bounded Price History
//!
//! [`SampleBuffer`] holds the most recent samples for exactly one symbol.
//! Readers never touch the buffer itself; they get a [`BufferSnapshot`],
//! an independent copy taken under the owner's lock. The owner evaluates
//! against a [`BufferView`], which borrows the samples in place.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::market::{PriceSample, Symbol};

/// Default buffer depth, matching the chart history.
pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(300) {
    Some(n) => n,
    None => unreachable!(),
};

/// Errors raised by [`SampleBuffer`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// Capacity of zero was requested.
    #[error("buffer capacity must be greater than zero")]
    ZeroCapacity,

    /// Sample belongs to another symbol.
    #[error("sample for {actual} does not belong in the {expected} buffer")]
    SymbolMismatch {
        /// Buffer symbol.
        expected: Symbol,
        /// Sample symbol.
        actual: Symbol,
    },

    /// Sample is older than the newest buffered sample.
    #[error("sample at {timestamp} is older than the newest buffered sample at {newest}")]
    OutOfOrder {
        /// Rejected sample time.
        timestamp: DateTime<Utc>,
        /// Newest buffered time.
        newest: DateTime<Utc>,
    },
}

/// Fixed-capacity FIFO of samples for one symbol.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    symbol: Symbol,
    capacity: NonZeroUsize,
    samples: VecDeque<PriceSample>,
}

impl SampleBuffer {
    /// Create an empty buffer.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::ZeroCapacity`] if `capacity` is zero.
    pub fn new(symbol: Symbol, capacity: usize) -> Result<Self, BufferError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(BufferError::ZeroCapacity)?;
        Ok(Self::with_capacity(symbol, capacity))
    }

    /// Create an empty buffer with an already validated capacity.
    #[must_use]
    pub fn with_capacity(symbol: Symbol, capacity: NonZeroUsize) -> Self {
        Self {
            symbol,
            capacity,
            samples: VecDeque::with_capacity(capacity.get()),
        }
    }

    /// Symbol this buffer is scoped to.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Maximum number of retained samples.
    #[must_use]
    pub const fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    /// Number of buffered samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append a sample, evicting the oldest one when full.
    ///
    /// Returns the evicted sample, if any.
    ///
    /// # Errors
    ///
    /// Rejects samples for another symbol and samples older than the newest
    /// buffered one. Equal timestamps are accepted.
    pub fn append(&mut self, sample: PriceSample) -> Result<Option<PriceSample>, BufferError> {
        if sample.symbol != self.symbol {
            return Err(BufferError::SymbolMismatch {
                expected: self.symbol.clone(),
                actual: sample.symbol,
            });
        }
        if let Some(newest) = self.samples.back()
            && sample.timestamp < newest.timestamp
        {
            return Err(BufferError::OutOfOrder {
                timestamp: sample.timestamp,
                newest: newest.timestamp,
            });
        }

        let evicted = if self.samples.len() == self.capacity.get() {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        Ok(evicted)
    }

    /// Independent ordered copy of the buffer contents.
    #[must_use]
    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            symbol: self.symbol.clone(),
            samples: self.samples.iter().cloned().collect(),
        }
    }

    /// Borrowed view of the buffer contents, without copying.
    #[must_use]
    pub fn view(&self) -> BufferView<'_> {
        let (head, tail) = self.samples.as_slices();
        BufferView {
            symbol: &self.symbol,
            head,
            tail,
        }
    }
}

// =============================================================================
// View
// =============================================================================

/// Read-only view over ordered samples, oldest first.
///
/// The samples may be split in two contiguous runs (a ring buffer's
/// `as_slices`); `head` always precedes `tail`.
#[derive(Debug, Clone, Copy)]
pub struct BufferView<'a> {
    symbol: &'a Symbol,
    head: &'a [PriceSample],
    tail: &'a [PriceSample],
}

impl<'a> BufferView<'a> {
    /// Symbol the samples belong to.
    #[must_use]
    pub const fn symbol(&self) -> &'a Symbol {
        self.symbol
    }

    /// Number of samples.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    /// Whether there are no samples.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample at `index`, oldest first.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&'a PriceSample> {
        match index.checked_sub(self.head.len()) {
            None => self.head.get(index),
            Some(i) => self.tail.get(i),
        }
    }

    /// Samples, oldest first.
    pub fn iter(self) -> impl DoubleEndedIterator<Item = &'a PriceSample> + 'a {
        self.head.iter().chain(self.tail.iter())
    }

    /// Newest sample.
    #[must_use]
    pub fn latest(&self) -> Option<&'a PriceSample> {
        self.tail.last().or_else(|| self.head.last())
    }

    /// Sample just before the newest one.
    #[must_use]
    pub fn previous(&self) -> Option<&'a PriceSample> {
        self.len().checked_sub(2).and_then(|i| self.get(i))
    }

    /// Index of the first sample for which `pred` is false.
    fn partition_point(&self, pred: impl Fn(&PriceSample) -> bool) -> usize {
        match self.head.last() {
            Some(last) if pred(last) => self.head.len() + self.tail.partition_point(pred),
            _ => self.head.partition_point(pred),
        }
    }

    /// Reference sample for a lookback of `window` ending at the newest sample.
    ///
    /// This is the oldest sample whose timestamp is at or after
    /// `latest.timestamp - window`. Returns `None` when that sample is the
    /// newest one itself, i.e. there is no history inside the window.
    #[must_use]
    pub fn window_reference(&self, window: Duration) -> Option<&'a PriceSample> {
        let latest = self.latest()?;
        let window = chrono::Duration::from_std(window).ok()?;
        let start = latest.timestamp.checked_sub_signed(window)?;
        let index = self.partition_point(|s| s.timestamp < start);
        if index + 1 >= self.len() {
            return None;
        }
        self.get(index)
    }

    /// Percent change of the newest price against the window reference.
    ///
    /// `None` when there is not enough history or the reference price is zero.
    #[must_use]
    pub fn percent_change(&self, window: Duration) -> Option<Decimal> {
        let latest = self.latest()?;
        let reference = self.window_reference(window)?;
        if reference.price.is_zero() {
            return None;
        }
        Some((latest.price - reference.price) / reference.price * Decimal::ONE_HUNDRED)
    }

    /// Simple moving average of the newest `period` prices.
    ///
    /// `None` until `period` samples are buffered.
    #[must_use]
    pub fn sma(&self, period: NonZeroUsize) -> Option<Decimal> {
        let period = period.get();
        if self.len() < period {
            return None;
        }
        let sum: Decimal = self.iter().rev().take(period).map(|s| s.price).sum();
        Some(sum / Decimal::from(period))
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable point-in-time copy of a [`SampleBuffer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferSnapshot {
    /// Symbol the samples belong to.
    pub symbol: Symbol,
    /// Samples, oldest first.
    pub samples: Vec<PriceSample>,
}

impl BufferSnapshot {
    /// Empty snapshot for `symbol`.
    #[must_use]
    pub const fn empty(symbol: Symbol) -> Self {
        Self {
            symbol,
            samples: Vec::new(),
        }
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether there are no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Borrowed view of the snapshot.
    #[must_use]
    pub fn view(&self) -> BufferView<'_> {
        BufferView {
            symbol: &self.symbol,
            head: &self.samples,
            tail: &[],
        }
    }

    /// Newest sample.
    #[must_use]
    pub fn latest(&self) -> Option<&PriceSample> {
        self.samples.last()
    }

    /// Sample just before the newest one.
    #[must_use]
    pub fn previous(&self) -> Option<&PriceSample> {
        self.view().previous()
    }

    /// Price of the newest sample.
    #[must_use]
    pub fn latest_price(&self) -> Option<Decimal> {
        self.latest().map(|s| s.price)
    }

    /// See [`BufferView::window_reference`].
    #[must_use]
    pub fn window_reference(&self, window: Duration) -> Option<&PriceSample> {
        self.view().window_reference(window)
    }

    /// See [`BufferView::percent_change`].
    #[must_use]
    pub fn percent_change(&self, window: Duration) -> Option<Decimal> {
        self.view().percent_change(window)
    }

    /// See [`BufferView::sma`].
    #[must_use]
    pub fn sma(&self, period: NonZeroUsize) -> Option<Decimal> {
        self.view().sma(period)
    }
}
