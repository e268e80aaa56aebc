// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod enrich;
pub mod export;
pub mod feed;
pub mod metrics;
pub mod monitor;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::{GroupStore, Settings};
pub use crate::monitor::{
    ChannelDispatch, MonitorRegistry, MonitoredSource, PollTimings, RegistryError, SourceId,
    SourceStatus,
};
