//! Client error types

use serde::Serialize;
use thiserror::Error;

/// Errors raised while talking to a single upstream.
///
/// Variants only carry owned strings and numbers so that a failure can be
/// stored in a snapshot, cloned, and serialized. Messages never include
/// credentials: every URL that reaches an error is the credential-free one.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ClientError {
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("No supported API version detected on {upstream}")]
    UnsupportedVersion { upstream: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Upstream returned HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl ClientError {
    /// Status code carried by an `HttpStatus` error
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::HttpStatus { status } => Some(*status),
            _ => None,
        }
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::InvalidUri(_) => "invalid_uri",
            ClientError::InvalidHeader { .. } => "invalid_header",
            ClientError::UnsupportedVersion { .. } => "unsupported_version",
            ClientError::Connection(_) => "connection",
            ClientError::Timeout { .. } => "timeout",
            ClientError::HttpStatus { .. } => "http_status",
            ClientError::Decode(_) => "decode",
            ClientError::Cancelled => "cancelled",
        }
    }
}
