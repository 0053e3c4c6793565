//! Response cache module

mod store;

pub use store::{CacheKey, CacheStats, Payload, ResponseCache, spawn_cleanup_task};
