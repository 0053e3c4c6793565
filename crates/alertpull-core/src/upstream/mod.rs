//! Upstream management
//!
//! This module provides:
//! - UpstreamInstance, the resolved view of one configured upstream
//! - UpstreamManager, which owns one Puller per upstream and tracks health

mod instance;
mod manager;

pub use instance::UpstreamInstance;
pub use manager::{DEFAULT_REPROBE_AFTER, HealthState, UpstreamHealth, UpstreamManager};
