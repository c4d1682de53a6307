//! Configuration Module
//!
//! Environment-driven configuration for the ticker stream.

mod settings;

pub use settings::{
    ConfigError, FeedSettings, ServerSettings, SnapshotSettings, StreamConfig, StreamSettings,
};
