//! Alertpull upstream client
//!
//! This crate provides everything needed to talk to a single
//! Alertmanager-compatible upstream: connection URI and credential
//! resolution, an authenticated HTTP transport, and API version detection.

pub mod credentials;
pub mod error;
pub mod transport;
pub mod version;

pub use credentials::{Credentials, ResolvedUri, redact_uri, resolve};
pub use error::ClientError;
pub use transport::{HttpTransport, TransportConfig, TransportResponse};
pub use version::{ApiVersion, Detection, VersionProbe};

pub use reqwest::Method;
pub use tokio_util::sync::CancellationToken;
