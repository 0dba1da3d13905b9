//! Client error types

use thiserror::Error;

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure before a response was obtained
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The request did not complete within the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// Server returned a non-success status other than 401
    #[error("Request failed with status {status}: {message}")]
    RequestFailed { status: u16, message: String },

    /// Token refresh failed or returned an unusable response
    #[error("Failed to refresh token: {0}")]
    RefreshFailed(String),

    /// The request still failed after a successful refresh
    #[error("Retry after token refresh failed with status {status}")]
    RetryFailed { status: u16 },

    /// No credentials are available for this session
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Durable storage could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Create a `RequestFailed` error from an HTTP status and body text
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        Self::RequestFailed {
            status: status.as_u16(),
            message,
        }
    }

    /// Returns true when the session is gone and the user has to log in again
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::RefreshFailed(_) | Self::NotAuthenticated)
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status, .. } | Self::RetryFailed { status } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Serialization(serde::de::Error::custom(err))
        } else {
            Self::Network(err)
        }
    }
}

impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Standard result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
