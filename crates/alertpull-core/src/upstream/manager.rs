//! Upstream manager for handling multiple Alertmanager pullers
//!
//! The UpstreamManager is responsible for:
//! - Creating a Puller for each configured upstream
//! - Health tracking from pull outcomes
//! - Dynamic upstream configuration updates

use std::collections::HashMap;
use std::sync::Arc;

use alertpull_client::{ApiVersion, CancellationToken};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::UpstreamInstance;
use crate::cache::ResponseCache;
use crate::config::{UpstreamConfig, UpstreamConfigProvider};
use crate::error::CoreError;
use crate::puller::Puller;
use crate::snapshot::{CycleStatus, PulledSnapshot};

/// Consecutive fatal cycles after which the API version is probed again
pub const DEFAULT_REPROBE_AFTER: u32 = 3;

/// Coarse health derived from the last pull outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Not pulled yet
    Unknown,
    Healthy,
    /// Reachable, but some best-effort endpoints failed
    Degraded,
    Down,
}

/// Health status for an upstream
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamHealth {
    pub upstream_name: String,
    pub state: HealthState,
    pub version: ApiVersion,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl UpstreamHealth {
    fn new(name: &str) -> Self {
        Self {
            upstream_name: name.to_string(),
            state: HealthState::Unknown,
            version: ApiVersion::Unknown,
            last_check: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

/// Internal state for each upstream
#[derive(Clone)]
struct UpstreamState {
    config: UpstreamConfig,
    puller: Arc<Puller>,
    health: UpstreamHealth,
}

/// Manages the set of pulled upstreams
pub struct UpstreamManager {
    config_provider: Arc<dyn UpstreamConfigProvider>,
    cache: Arc<ResponseCache>,
    /// Map of upstream name to state
    upstreams: RwLock<HashMap<String, UpstreamState>>,
    reprobe_after: u32,
}

impl UpstreamManager {
    /// Create a manager and load the provider's upstreams
    pub fn new(
        config_provider: Arc<dyn UpstreamConfigProvider>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        let manager = Self {
            config_provider,
            cache,
            upstreams: RwLock::new(HashMap::new()),
            reprobe_after: DEFAULT_REPROBE_AFTER,
        };

        manager.reload();
        manager
    }

    /// Set how many consecutive fatal cycles trigger a version re-probe.
    /// Zero disables re-probing.
    pub fn with_reprobe_after(mut self, reprobe_after: u32) -> Self {
        self.reprobe_after = reprobe_after;
        self
    }

    /// Reload upstream configuration from the config provider.
    ///
    /// Upstreams whose config did not change keep their puller, detected
    /// version and health. Invalid entries are logged and skipped.
    pub fn reload(&self) {
        info!("Reloading upstream configuration from config provider");

        let upstream_configs = self.config_provider.get_upstreams();
        let current: HashMap<String, UpstreamState> = self.upstreams.read().clone();
        let mut new_upstreams = HashMap::new();

        for upstream_config in upstream_configs {
            if !upstream_config.enabled {
                debug!("Skipping disabled upstream: {}", upstream_config.name);
                continue;
            }

            if new_upstreams.contains_key(&upstream_config.name) {
                warn!("Duplicate upstream {} ignored", upstream_config.name);
                continue;
            }

            if let Some(state) = current.get(&upstream_config.name)
                && state.config == upstream_config
            {
                new_upstreams.insert(upstream_config.name.clone(), state.clone());
                continue;
            }

            match self.create_state(upstream_config.clone()) {
                Ok(state) => {
                    info!(
                        "Loaded upstream: {} -> {}",
                        upstream_config.name,
                        state.puller.instance().uri()
                    );
                    new_upstreams.insert(upstream_config.name, state);
                }
                Err(e) => {
                    error!(
                        "Failed to create puller for upstream {}: {}",
                        upstream_config.name, e
                    );
                }
            }
        }

        // Removed or reconfigured upstreams must not serve stale payloads
        for (name, state) in &current {
            let kept = new_upstreams
                .get(name)
                .is_some_and(|new: &UpstreamState| Arc::ptr_eq(&new.puller, &state.puller));
            if !kept {
                self.cache.invalidate_upstream(name);
            }
        }

        let count = new_upstreams.len();
        *self.upstreams.write() = new_upstreams;

        info!("Upstream configuration reloaded ({} upstreams)", count);
    }

    fn create_state(&self, config: UpstreamConfig) -> Result<UpstreamState, CoreError> {
        let instance = UpstreamInstance::from_config(&config)?;
        let puller = Puller::new(instance, self.cache.clone())?;

        Ok(UpstreamState {
            health: UpstreamHealth::new(&config.name),
            config,
            puller: Arc::new(puller),
        })
    }

    /// Register a single upstream outside of the provider
    pub fn register(&self, config: UpstreamConfig) -> Result<Arc<Puller>, CoreError> {
        if self.upstreams.read().contains_key(&config.name) {
            return Err(CoreError::AlreadyExists(config.name));
        }

        let name = config.name.clone();
        let state = self.create_state(config)?;
        let puller = state.puller.clone();

        let mut upstreams = self.upstreams.write();
        if upstreams.contains_key(&name) {
            return Err(CoreError::AlreadyExists(name));
        }
        upstreams.insert(name.clone(), state);

        info!("Registered upstream {}", name);
        Ok(puller)
    }

    /// Remove an upstream and drop its cached payloads
    pub fn remove(&self, name: &str) -> Result<(), CoreError> {
        self.upstreams
            .write()
            .remove(name)
            .ok_or_else(|| CoreError::NotFound(format!("Upstream {}", name)))?;

        let dropped = self.cache.invalidate_upstream(name);
        info!("Removed upstream {} ({} cache entries dropped)", name, dropped);
        Ok(())
    }

    /// Get the puller of an upstream
    pub fn get(&self, name: &str) -> Option<Arc<Puller>> {
        self.upstreams.read().get(name).map(|s| s.puller.clone())
    }

    /// Names of all registered upstreams, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.upstreams.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Configs of all registered upstreams, sorted by name
    pub fn list(&self) -> Vec<UpstreamConfig> {
        let mut configs: Vec<UpstreamConfig> = self
            .upstreams
            .read()
            .values()
            .map(|s| s.config.clone())
            .collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }

    /// Get the number of registered upstreams
    pub fn upstream_count(&self) -> usize {
        self.upstreams.read().len()
    }

    /// Get health status for all upstreams, sorted by name
    pub fn health(&self) -> Vec<UpstreamHealth> {
        let mut health: Vec<UpstreamHealth> = self
            .upstreams
            .read()
            .values()
            .map(|s| s.health.clone())
            .collect();
        health.sort_by(|a, b| a.upstream_name.cmp(&b.upstream_name));
        health
    }

    /// Get health status for a specific upstream
    pub fn upstream_health(&self, name: &str) -> Option<UpstreamHealth> {
        self.upstreams.read().get(name).map(|s| s.health.clone())
    }

    /// Run one pull cycle for `name` and record its outcome
    pub async fn pull(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<PulledSnapshot, CoreError> {
        let puller = self
            .get(name)
            .ok_or_else(|| CoreError::NotFound(format!("Upstream {}", name)))?;

        let snapshot = puller.pull(cancel).await;
        self.record(&puller, &snapshot);

        Ok(snapshot)
    }

    /// Pull every upstream concurrently
    pub async fn pull_all(&self, cancel: &CancellationToken) -> Vec<PulledSnapshot> {
        let names = self.names();
        let results = join_all(names.iter().map(|name| self.pull(name, cancel))).await;

        results
            .into_iter()
            .filter_map(|result| match result {
                Ok(snapshot) => Some(snapshot),
                // Removed while the batch was running
                Err(e) => {
                    debug!("Skipping pull: {}", e);
                    None
                }
            })
            .collect()
    }

    fn record(&self, puller: &Puller, snapshot: &PulledSnapshot) {
        let mut upstreams = self.upstreams.write();
        let Some(state) = upstreams.get_mut(puller.name()) else {
            return;
        };
        // Replaced by a reload while the cycle ran
        if !std::ptr::eq(Arc::as_ptr(&state.puller), puller) {
            return;
        }

        let health = &mut state.health;
        // An interrupted cycle says nothing about the upstream
        if snapshot.was_cancelled() {
            debug!("Pull from {} cancelled", health.upstream_name);
            return;
        }
        health.last_check = Some(snapshot.fetched_at);
        health.version = puller.version();

        match &snapshot.status {
            CycleStatus::Done => {
                if health.state == HealthState::Down {
                    info!("Upstream {} recovered", health.upstream_name);
                }
                health.state = HealthState::Healthy;
                health.last_error = None;
                health.consecutive_failures = 0;
            }
            CycleStatus::PartialFailure { failed } => {
                health.state = HealthState::Degraded;
                health.last_error = failed.first().and_then(|endpoint| {
                    snapshot
                        .error(*endpoint)
                        .map(|e| format!("{}: {}", endpoint, e))
                });
                health.consecutive_failures = 0;
            }
            CycleStatus::Fatal { cause, .. } => {
                health.state = HealthState::Down;
                health.last_error = Some(cause.to_string());
                health.consecutive_failures += 1;

                if self.reprobe_after > 0
                    && health.consecutive_failures % self.reprobe_after == 0
                {
                    warn!(
                        "Upstream {} failed {} times in a row, re-probing API version",
                        health.upstream_name, health.consecutive_failures
                    );
                    puller.invalidate_version();
                    health.version = ApiVersion::Unknown;
                }
            }
        }
    }
}
