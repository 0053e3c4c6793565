//! Resolved, immutable view of one configured upstream

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use alertpull_client::{Credentials, TransportConfig, resolve};
use url::Url;

use crate::config::{UpstreamConfig, validate_upstream_name};
use crate::error::CoreError;

/// One Alertmanager upstream with its credentials already split off the URI.
///
/// Built once at registration; credentials are never resolved again.
#[derive(Debug, Clone)]
pub struct UpstreamInstance {
    name: String,
    uri: Url,
    credentials: Option<Credentials>,
    headers: HashMap<String, String>,
    timeout: Duration,
    cache_ttl: Duration,
    skip_tls_verify: bool,
    resolve: HashMap<String, SocketAddr>,
}

impl UpstreamInstance {
    /// Validate a config entry and resolve its connection URI
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, CoreError> {
        validate_upstream_name(&config.name).map_err(CoreError::InvalidConfig)?;

        if config.timeout_secs == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "Upstream {}: timeout_secs must be greater than zero",
                config.name
            )));
        }

        let resolved = resolve(&config.uri)?;

        Ok(Self {
            name: config.name.clone(),
            uri: resolved.uri,
            credentials: resolved.credentials,
            headers: config.headers.clone(),
            timeout: config.timeout(),
            cache_ttl: config.cache_ttl(),
            skip_tls_verify: config.skip_tls_verify,
            resolve: config.resolve.clone(),
        })
    }

    /// Override the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the cache TTL
    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base URI without userinfo
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Transport settings for this upstream
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            upstream: self.name.clone(),
            uri: self.uri.clone(),
            credentials: self.credentials.clone(),
            headers: self.headers.clone(),
            timeout: self.timeout,
            skip_tls_verify: self.skip_tls_verify,
            resolve: self.resolve.clone(),
        }
    }
}
