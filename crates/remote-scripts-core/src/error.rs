//! Session and configuration errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a session ended up in an error state.
///
/// A retryable drop is not an error; it only surfaces as a status value.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SessionError {
    #[error("Unauthorized")]
    AuthenticationRequired,
    #[error("Access denied")]
    AccessDenied,
    #[error("Not found")]
    NotFound,
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Malformed message: {0}")]
    ProtocolDecode(String),
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::ProtocolDecode(err.to_string())
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported URL scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}
