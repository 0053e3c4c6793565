//! Pull cycle results

use std::collections::BTreeMap;
use std::fmt;

use alertpull_client::{ApiVersion, ClientError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Payload;

/// Endpoints fetched during a pull cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Status,
    Silences,
    AlertGroups,
}

impl Endpoint {
    /// Every endpoint, in fetch order
    pub const ALL: [Endpoint; 3] = [Endpoint::Status, Endpoint::Silences, Endpoint::AlertGroups];

    /// Only the status endpoint is mandatory; it doubles as the liveness check
    pub fn is_mandatory(&self) -> bool {
        matches!(self, Endpoint::Status)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Status => "status",
            Endpoint::Silences => "silences",
            Endpoint::AlertGroups => "alert_groups",
        }
    }

    /// Path relative to the upstream base URI for the given API version
    pub fn path(&self, version: ApiVersion) -> Option<String> {
        let suffix = match self {
            Endpoint::Status => "status",
            Endpoint::Silences => "silences",
            Endpoint::AlertGroups => "alerts/groups",
        };
        version
            .api_prefix()
            .map(|prefix| format!("{}/{}", prefix, suffix))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for a single endpoint within a cycle
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EndpointResult {
    Fetched { payload: Payload, from_cache: bool },
    Failed { error: ClientError },
    /// Not attempted because the cycle was already fatal
    Skipped,
}

impl EndpointResult {
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            EndpointResult::Fetched { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ClientError> {
        match self {
            EndpointResult::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Which step made a cycle fatal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalStage {
    /// Version detection failed
    Probe,
    /// The mandatory status endpoint failed
    Status,
}

/// Overall result of a pull cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleStatus {
    /// Every endpoint fetched
    Done,
    /// Upstream is up but some best-effort endpoints failed
    PartialFailure { failed: Vec<Endpoint> },
    /// Upstream is down or unusable for this cycle
    Fatal { stage: FatalStage, cause: ClientError },
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Done => "done",
            CycleStatus::PartialFailure { .. } => "partial_failure",
            CycleStatus::Fatal { .. } => "fatal",
        }
    }
}

/// Everything one pull cycle produced for one upstream
#[derive(Debug, Clone, Serialize)]
pub struct PulledSnapshot {
    pub upstream: String,
    pub version: ApiVersion,
    pub fetched_at: DateTime<Utc>,
    pub status: CycleStatus,
    pub endpoints: BTreeMap<Endpoint, EndpointResult>,
}

impl PulledSnapshot {
    /// Build a snapshot from per-endpoint results, deriving the status.
    ///
    /// A failed status endpoint makes the cycle fatal; any other failure
    /// makes it partial.
    pub fn assemble(
        upstream: impl Into<String>,
        version: ApiVersion,
        fetched_at: DateTime<Utc>,
        endpoints: BTreeMap<Endpoint, EndpointResult>,
    ) -> Self {
        let status = match endpoints.get(&Endpoint::Status).and_then(EndpointResult::error) {
            Some(cause) => CycleStatus::Fatal {
                stage: FatalStage::Status,
                cause: cause.clone(),
            },
            None => {
                let failed: Vec<Endpoint> = endpoints
                    .iter()
                    .filter(|(_, result)| result.error().is_some())
                    .map(|(endpoint, _)| *endpoint)
                    .collect();

                if failed.is_empty() {
                    CycleStatus::Done
                } else {
                    CycleStatus::PartialFailure { failed }
                }
            }
        };

        Self {
            upstream: upstream.into(),
            version,
            fetched_at,
            status,
            endpoints,
        }
    }

    /// Snapshot of a cycle whose version probe failed
    pub fn probe_failed(
        upstream: impl Into<String>,
        fetched_at: DateTime<Utc>,
        cause: ClientError,
    ) -> Self {
        Self {
            upstream: upstream.into(),
            version: ApiVersion::Unknown,
            fetched_at,
            status: CycleStatus::Fatal {
                stage: FatalStage::Probe,
                cause,
            },
            endpoints: Endpoint::ALL
                .into_iter()
                .map(|endpoint| (endpoint, EndpointResult::Skipped))
                .collect(),
        }
    }

    pub fn result(&self, endpoint: Endpoint) -> Option<&EndpointResult> {
        self.endpoints.get(&endpoint)
    }

    pub fn payload(&self, endpoint: Endpoint) -> Option<&Payload> {
        self.result(endpoint).and_then(EndpointResult::payload)
    }

    pub fn error(&self, endpoint: Endpoint) -> Option<&ClientError> {
        self.result(endpoint).and_then(EndpointResult::error)
    }

    /// Endpoints that failed in this cycle
    pub fn failed_endpoints(&self) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .filter(|(_, result)| result.error().is_some())
            .map(|(endpoint, _)| *endpoint)
            .collect()
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, CycleStatus::Done)
    }

    /// Upstream answered but some best-effort data is missing
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, CycleStatus::PartialFailure { .. })
    }

    /// Upstream could not be used at all
    pub fn is_down(&self) -> bool {
        matches!(self.status, CycleStatus::Fatal { .. })
    }

    /// Whether any part of the cycle was cut short by cancellation
    pub fn was_cancelled(&self) -> bool {
        let cancelled = |e: &ClientError| *e == ClientError::Cancelled;
        matches!(&self.status, CycleStatus::Fatal { cause, .. } if cancelled(cause))
            || self
                .endpoints
                .values()
                .filter_map(EndpointResult::error)
                .any(cancelled)
    }
}
