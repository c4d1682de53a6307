//! Domain Layer - Core market data types and business logic.
//!
//! This layer contains the core types for single-symbol price streaming
//! with no I/O. Everything here is synchronous and deterministic.

/// Market data types (symbols, price samples, summaries).
pub mod market;

/// Bounded price history buffer.
pub mod buffer;

/// Alert rules, evaluation and the alert log.
pub mod alert;

/// Stream lifecycle types (generations, connection states, status).
pub mod stream;
