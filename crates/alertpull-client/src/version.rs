//! API version detection
//!
//! Alertmanager-compatible upstreams expose either the v1 or the v2 API.
//! The probe walks a fixed list of well-known endpoints, status first, and
//! remembers the first version it recognizes until told to forget it.

use std::fmt;

use parking_lot::RwLock;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ClientError;
use crate::transport::{HttpTransport, TransportResponse};

/// API surface exposed by an upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    V1,
    V2,
    /// Not detected yet
    #[default]
    Unknown,
}

impl ApiVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1",
            ApiVersion::V2 => "v2",
            ApiVersion::Unknown => "unknown",
        }
    }

    /// Path prefix of the API, `None` while unknown
    pub fn api_prefix(&self) -> Option<&'static str> {
        match self {
            ApiVersion::V1 => Some("api/v1"),
            ApiVersion::V2 => Some("api/v2"),
            ApiVersion::Unknown => None,
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate endpoints in probe order
const PROBE_ORDER: [(&str, Recognizer); 3] = [
    ("api/v2/status", recognize_v2_status),
    ("api/v1/status", recognize_v1_status),
    ("metrics", recognize_build_info),
];

type Recognizer = fn(&TransportResponse) -> Option<ApiVersion>;

/// Detects and memoizes the API version of one upstream
#[derive(Debug, Default)]
pub struct VersionProbe {
    detected: RwLock<Option<ApiVersion>>,
}

impl VersionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// The memoized version, `Unknown` until a probe succeeds
    pub fn cached(&self) -> ApiVersion {
        self.detected.read().unwrap_or_default()
    }

    /// Forget the memoized version so the next `detect` probes again
    pub fn invalidate(&self) {
        if self.detected.write().take().is_some() {
            debug!("API version invalidated");
        }
    }

    /// Return the memoized version or probe the upstream for it.
    ///
    /// Candidates answering 404/405 or with an unrecognized body are skipped;
    /// any other failure aborts the probe.
    pub async fn detect(
        &self,
        transport: &HttpTransport,
        cancel: &CancellationToken,
    ) -> Result<ApiVersion, ClientError> {
        self.detect_with_status(transport, cancel)
            .await
            .map(|detection| detection.version)
    }

    /// Like [`detect`](Self::detect), also handing back the decoded status
    /// document when a fresh probe recognized the version from it.
    pub async fn detect_with_status(
        &self,
        transport: &HttpTransport,
        cancel: &CancellationToken,
    ) -> Result<Detection, ClientError> {
        let cached = *self.detected.read();
        if let Some(version) = cached {
            return Ok(Detection {
                version,
                status: None,
            });
        }

        for (path, recognize) in PROBE_ORDER {
            match transport.send(Method::GET, path, cancel).await {
                Ok(response) => match recognize(&response) {
                    Some(version) => {
                        info!(
                            "Detected API {} on upstream {} via /{}",
                            version,
                            transport.upstream(),
                            path
                        );
                        *self.detected.write() = Some(version);

                        let status = path
                            .ends_with("/status")
                            .then(|| response.json::<Value>().ok())
                            .flatten();
                        return Ok(Detection { version, status });
                    }
                    None => debug!("Unrecognized response from /{}, trying next", path),
                },
                Err(ClientError::HttpStatus { status: 404 | 405 }) => {
                    debug!("/{} not available on {}, trying next", path, transport.upstream());
                }
                Err(e) => return Err(e),
            }
        }

        Err(ClientError::UnsupportedVersion {
            upstream: transport.upstream().to_string(),
        })
    }
}

/// Outcome of [`VersionProbe::detect_with_status`]
#[derive(Debug, Clone)]
pub struct Detection {
    pub version: ApiVersion,
    /// Body of `<api prefix>/status` when that is what identified the version;
    /// `None` for memoized versions and build-info matches
    pub status: Option<Value>,
}

fn recognize_v2_status(response: &TransportResponse) -> Option<ApiVersion> {
    let body: Value = response.json().ok()?;
    let obj = body.as_object()?;

    let recognized = obj.contains_key("versionInfo")
        || (obj.contains_key("cluster") && obj.contains_key("uptime"));
    recognized.then_some(ApiVersion::V2)
}

fn recognize_v1_status(response: &TransportResponse) -> Option<ApiVersion> {
    let body: Value = response.json().ok()?;

    let recognized = body.get("status").and_then(Value::as_str) == Some("success")
        && body.get("data").is_some_and(Value::is_object);
    recognized.then_some(ApiVersion::V1)
}

fn recognize_build_info(response: &TransportResponse) -> Option<ApiVersion> {
    version_from_metrics(&response.text())
}

/// Map the `alertmanager_build_info` version label to an API version.
/// Releases before 0.16 only serve the v1 API.
fn version_from_metrics(text: &str) -> Option<ApiVersion> {
    let line = text
        .lines()
        .find(|l| l.starts_with("alertmanager_build_info{"))?;

    let labels = line
        .strip_prefix("alertmanager_build_info{")?
        .split_once('}')?
        .0;
    let version = labels
        .split(',')
        .filter_map(|label| label.split_once('='))
        .find(|(key, _)| key.trim() == "version")?
        .1
        .trim()
        .trim_matches('"')
        .trim_start_matches('v');

    let mut parts = version.split('.');
    let major: u64 = parts.next()?.parse().ok()?;
    let minor: u64 = parts.next()?.parse().ok()?;

    if major == 0 && minor < 16 {
        Some(ApiVersion::V1)
    } else {
        Some(ApiVersion::V2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn response(body: &str) -> TransportResponse {
        TransportResponse {
            status: 200,
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_recognize_v2_status() {
        let body = r#"{"cluster":{"status":"ready"},"uptime":"2020-01-01T00:00:00Z","versionInfo":{"version":"0.21.0"}}"#;
        assert_eq!(recognize_v2_status(&response(body)), Some(ApiVersion::V2));

        assert_eq!(recognize_v2_status(&response(r#"{"foo":1}"#)), None);
        assert_eq!(recognize_v2_status(&response("[]")), None);
        assert_eq!(recognize_v2_status(&response("<html>")), None);
    }

    #[test]
    fn test_recognize_v1_status() {
        let body = r#"{"status":"success","data":{"versionInfo":{"version":"0.15.3"}}}"#;
        assert_eq!(recognize_v1_status(&response(body)), Some(ApiVersion::V1));

        let error = r#"{"status":"error","data":{}}"#;
        assert_eq!(recognize_v1_status(&response(error)), None);
    }

    #[test]
    fn test_version_from_metrics() {
        let text = "# HELP alertmanager_build_info build info\n\
                    # TYPE alertmanager_build_info gauge\n\
                    alertmanager_build_info{branch=\"HEAD\",goversion=\"go1.14\",revision=\"abc\",version=\"0.21.0\"} 1\n";
        assert_eq!(version_from_metrics(text), Some(ApiVersion::V2));

        let old = "alertmanager_build_info{version=\"0.15.3\"} 1";
        assert_eq!(version_from_metrics(old), Some(ApiVersion::V1));

        let prefixed = "alertmanager_build_info{version=\"v1.0.0\"} 1";
        assert_eq!(version_from_metrics(prefixed), Some(ApiVersion::V2));

        // goversion sorts before version and must not be mistaken for it
        let go_only = "alertmanager_build_info{goversion=\"go1.14\"} 1";
        assert_eq!(version_from_metrics(go_only), None);

        assert_eq!(version_from_metrics("go_goroutines 12"), None);
        assert_eq!(version_from_metrics("alertmanager_build_info{version=\"dev\"} 1"), None);
    }

    #[test]
    fn test_probe_starts_unknown() {
        let probe = VersionProbe::new();
        assert_eq!(probe.cached(), ApiVersion::Unknown);

        probe.invalidate();
        assert_eq!(probe.cached(), ApiVersion::Unknown);
    }

    #[test]
    fn test_api_prefix() {
        assert_eq!(ApiVersion::V2.api_prefix(), Some("api/v2"));
        assert_eq!(ApiVersion::V1.api_prefix(), Some("api/v1"));
        assert_eq!(ApiVersion::Unknown.api_prefix(), None);
    }
}
