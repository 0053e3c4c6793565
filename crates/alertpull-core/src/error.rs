//! Core error types

use alertpull_client::ClientError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Upstream already registered: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
