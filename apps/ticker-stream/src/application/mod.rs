//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the streaming services and the port interfaces
//! that define how the core talks to feeds and snapshot sources.

/// Port interfaces for the price feed and the summary snapshot.
pub mod ports;

/// Supervisor, connection lifecycle and retry services.
pub mod services;
