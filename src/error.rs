//! Error types shared across the crate.
//!
//! Sidecar lifecycle failures live in [`crate::sidecar::SidecarError`]; this
//! module covers configuration, the remote API client and the server
//! distribution download.

use thiserror::Error;

/// Errors raised while resolving configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set but its value cannot be used.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Environment variable name.
        key: String,
        /// What is wrong with it.
        message: String,
    },

    /// A required variable is missing.
    #[error("Missing required configuration {key}: {hint}")]
    MissingRequired {
        /// Environment variable name.
        key: String,
        /// How to fix it.
        hint: String,
    },
}

/// Errors raised by [`crate::client::SimpleJdbcClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server base URL could not be parsed.
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidBaseUrl {
        /// URL as given.
        url: String,
        /// Parse failure.
        reason: String,
    },

    /// The request never produced a response (connection refused, timeout, ...).
    #[error("Request to {endpoint} failed: {reason}")]
    Request {
        /// Endpoint path that was called.
        endpoint: String,
        /// Transport-level reason.
        reason: String,
    },

    /// The server answered with a non-success status.
    #[error("Request to {endpoint} returned status {status}: {body}")]
    Status {
        /// Endpoint path that was called.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The response body did not match the expected shape.
    #[error("Invalid response from {endpoint}: {reason}")]
    Decode {
        /// Endpoint path that was called.
        endpoint: String,
        /// Decoding failure.
        reason: String,
    },
}

impl ClientError {
    /// Whether the failure happened before any response was received.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Request { .. })
    }
}

/// Errors raised while installing the server distribution.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Fetching or extracting the archive failed.
    #[error("Failed downloading server distribution from {url}: {reason}")]
    Failed {
        /// Archive URL.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
