//! Pull cycle orchestration for one upstream
//!
//! A cycle walks `Idle -> Probing -> Fetching` and ends in one of `Done`,
//! `PartialFailure` or `Fatal`, reported through the returned snapshot.
//! Cycles for the same upstream never overlap.

use std::collections::BTreeMap;
use std::sync::Arc;

use alertpull_client::{ApiVersion, CancellationToken, HttpTransport, VersionProbe};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, ResponseCache};
use crate::error::CoreError;
use crate::snapshot::{CycleStatus, Endpoint, EndpointResult, PulledSnapshot};
use crate::upstream::UpstreamInstance;

/// Where a puller currently is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PullState {
    Idle,
    Probing,
    Fetching,
}

/// Pulls status, silences and alert groups from one upstream
pub struct Puller {
    instance: Arc<UpstreamInstance>,
    transport: HttpTransport,
    probe: VersionProbe,
    cache: Arc<ResponseCache>,
    /// Held for the whole cycle
    cycle: Mutex<()>,
    state: RwLock<PullState>,
    last_snapshot: RwLock<Option<Arc<PulledSnapshot>>>,
}

impl Puller {
    /// Create a puller sharing `cache` with the other upstreams
    pub fn new(instance: UpstreamInstance, cache: Arc<ResponseCache>) -> Result<Self, CoreError> {
        let transport = HttpTransport::new(instance.transport_config())?;

        Ok(Self {
            instance: Arc::new(instance),
            transport,
            probe: VersionProbe::new(),
            cache,
            cycle: Mutex::new(()),
            state: RwLock::new(PullState::Idle),
            last_snapshot: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        self.instance.name()
    }

    pub fn instance(&self) -> &UpstreamInstance {
        &self.instance
    }

    pub fn state(&self) -> PullState {
        *self.state.read()
    }

    /// Cached API version, `Unknown` until the first successful probe
    pub fn version(&self) -> ApiVersion {
        self.probe.cached()
    }

    /// Forget the detected version; the next cycle probes again
    pub fn invalidate_version(&self) {
        self.probe.invalidate();
    }

    /// Result of the most recent completed cycle
    pub fn last_snapshot(&self) -> Option<Arc<PulledSnapshot>> {
        self.last_snapshot.read().clone()
    }

    /// Run one pull cycle, waiting for any cycle already in flight.
    ///
    /// Never fails as a whole: failures are reported in the snapshot's
    /// status and per-endpoint results.
    pub async fn pull(&self, cancel: &CancellationToken) -> PulledSnapshot {
        let _cycle = self.cycle.lock().await;

        let snapshot = {
            let _idle = IdleOnDrop(&self.state);
            self.run_cycle(cancel).await
        };

        match &snapshot.status {
            CycleStatus::Done => {
                debug!("Pull from {} complete", self.name());
            }
            CycleStatus::PartialFailure { failed } => {
                warn!(
                    "Pull from {} degraded, failed endpoints: {:?}",
                    self.name(),
                    failed
                );
            }
            CycleStatus::Fatal { stage, cause } => {
                error!(
                    "Pull from {} failed at {:?}: {}",
                    self.name(),
                    stage,
                    cause
                );
            }
        }

        metrics::counter!(
            "alertpull_pull_cycles_total",
            "upstream" => self.name().to_string(),
            "outcome" => snapshot.status.as_str()
        )
        .increment(1);

        *self.last_snapshot.write() = Some(Arc::new(snapshot.clone()));
        snapshot
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> PulledSnapshot {
        let fetched_at = Utc::now();

        self.set_state(PullState::Probing);
        let detection = match self.probe.detect_with_status(&self.transport, cancel).await {
            Ok(detection) => detection,
            Err(cause) => return PulledSnapshot::probe_failed(self.name(), fetched_at, cause),
        };
        let version = detection.version;

        self.set_state(PullState::Fetching);
        let mut endpoints = BTreeMap::new();

        let status = match detection.status {
            Some(body) => self.adopt_status(body, version),
            None => self.fetch(Endpoint::Status, version, cancel).await,
        };
        let status_failed = status.error().is_some();
        endpoints.insert(Endpoint::Status, status);

        if status_failed {
            for endpoint in Endpoint::ALL.into_iter().filter(|e| !e.is_mandatory()) {
                endpoints.insert(endpoint, EndpointResult::Skipped);
            }
        } else {
            let (silences, alert_groups) = tokio::join!(
                self.fetch(Endpoint::Silences, version, cancel),
                self.fetch(Endpoint::AlertGroups, version, cancel),
            );
            endpoints.insert(Endpoint::Silences, silences);
            endpoints.insert(Endpoint::AlertGroups, alert_groups);
        }

        PulledSnapshot::assemble(self.name(), version, fetched_at, endpoints)
    }

    /// Serve an endpoint from cache, or fetch and cache it
    async fn fetch(
        &self,
        endpoint: Endpoint,
        version: ApiVersion,
        cancel: &CancellationToken,
    ) -> EndpointResult {
        let Some(path) = endpoint.path(version) else {
            return EndpointResult::Failed {
                error: alertpull_client::ClientError::UnsupportedVersion {
                    upstream: self.name().to_string(),
                },
            };
        };

        let key = CacheKey::new(self.name(), path.as_str());
        if let Some(payload) = self.cache.get(&key) {
            debug!("Cache hit for {}/{}", self.name(), path);
            return EndpointResult::Fetched {
                payload,
                from_cache: true,
            };
        }

        match self.transport.get_json::<Value>(&path, cancel).await {
            Ok(value) => {
                let payload = Arc::new(value);
                self.cache
                    .set(key, payload.clone(), self.instance.cache_ttl());
                EndpointResult::Fetched {
                    payload,
                    from_cache: false,
                }
            }
            Err(error) => {
                info!("Fetching {} from {} failed: {}", endpoint, self.name(), error);
                EndpointResult::Failed { error }
            }
        }
    }

    /// Use the status document the version probe already downloaded
    fn adopt_status(&self, body: Value, version: ApiVersion) -> EndpointResult {
        let payload = Arc::new(body);
        if let Some(path) = Endpoint::Status.path(version) {
            self.cache.set(
                CacheKey::new(self.name(), path.as_str()),
                payload.clone(),
                self.instance.cache_ttl(),
            );
        }
        EndpointResult::Fetched {
            payload,
            from_cache: false,
        }
    }

    fn set_state(&self, state: PullState) {
        *self.state.write() = state;
    }
}

/// Puts the puller back to `Idle` however the cycle ends, including when
/// the pull future is dropped mid-flight.
struct IdleOnDrop<'a>(&'a RwLock<PullState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.write() = PullState::Idle;
    }
}

impl std::fmt::Debug for Puller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Puller")
            .field("upstream", &self.instance.name())
            .field("state", &self.state())
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}
