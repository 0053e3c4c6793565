//! Alertpull Core
//!
//! This crate drives pull cycles against Alertmanager-compatible upstreams:
//! upstream configuration, the shared response cache, the per-upstream
//! puller and the snapshots it produces.

pub mod cache;
pub mod config;
pub mod error;
pub mod puller;
pub mod snapshot;
pub mod upstream;

pub use cache::{CacheKey, CacheStats, Payload, ResponseCache, spawn_cleanup_task};
pub use config::{
    InMemoryConfigProvider, MAX_UPSTREAM_NAME_LEN, UpstreamConfig, UpstreamConfigProvider,
    validate_upstream_name,
};
pub use error::CoreError;
pub use puller::{PullState, Puller};
pub use snapshot::{CycleStatus, Endpoint, EndpointResult, FatalStage, PulledSnapshot};
pub use upstream::{
    DEFAULT_REPROBE_AFTER, HealthState, UpstreamHealth, UpstreamInstance, UpstreamManager,
};
