//! Error types for Warden.
//!
//! This module defines `WardenError`, the unified error type for talking to
//! the manager API, and its classification into retryable rate-limit
//! failures versus everything else.
//!
//! # Security
//!
//! Error messages are sanitized so the API secret never ends up in logs
//! or tool responses. Use `sanitize_message()` when building messages from
//! external sources.

use std::time::Duration;
use thiserror::Error;

use crate::batch::{Classify, FailureKind};

/// Unified error type for all manager API operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Configuration error - missing or invalid environment variables.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP request failed during transmission.
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    /// HTTP client initialization failed.
    #[error("HTTP client error: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// HTTP response returned a non-success status code without a usable
    /// error message.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// The HTTP status code returned.
        status: reqwest::StatusCode,
        /// The (truncated) response body.
        body: String,
    },

    /// Request timed out.
    #[error("request timed out after {duration:?} ({operation})")]
    Timeout {
        /// How long we waited before timing out.
        duration: Duration,
        /// The operation that timed out.
        operation: String,
    },

    /// Rate limited by the manager (HTTP 429).
    #[error("too many API requests")]
    RateLimited {
        /// Suggested retry delay from the `Retry-After` header, if any.
        retry_after: Option<Duration>,
    },

    /// Manager temporarily unavailable (HTTP 502/503/504).
    #[error("service temporarily unavailable ({status})")]
    ServiceUnavailable {
        /// The specific status code.
        status: reqwest::StatusCode,
    },

    /// The manager rejected the request and explained why.
    #[error("manager API error {status}: {message}")]
    ManagerApi {
        /// The HTTP status code returned.
        status: reqwest::StatusCode,
        /// The `message` field of the manager's error body.
        message: String,
    },

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Requested resource was not found.
    #[error("resource not found: {id}")]
    NotFound {
        /// Description of the resource that was not found.
        id: String,
    },

    /// Authentication failed - likely an invalid or disabled API key.
    #[error("authentication failed - check WARDEN_API_SECRET")]
    Authentication,

    /// Input validation failed.
    #[error("validation error: {0}")]
    Validation(String),

    /// Connection test failed.
    #[error("connection test failed: {message}")]
    ConnectionTest {
        /// Details about why the connection test failed.
        message: String,
    },
}

impl WardenError {
    /// Creates a configuration error for a missing environment variable.
    pub fn missing_env(var_name: &str) -> Self {
        WardenError::Config(format!(
            "missing required environment variable: {}",
            var_name
        ))
    }

    /// Creates a configuration error for an invalid value.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        WardenError::Config(message.into())
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        WardenError::Validation(message.into())
    }

    /// Creates a not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        WardenError::NotFound { id: id.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(duration: Duration, operation: impl Into<String>) -> Self {
        WardenError::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Creates a connection test error.
    pub fn connection_test(message: impl Into<String>) -> Self {
        WardenError::ConnectionTest {
            message: message.into(),
        }
    }

    /// Returns the HTTP status carried by this error, if it has one.
    #[must_use]
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            WardenError::HttpStatus { status, .. }
            | WardenError::ServiceUnavailable { status }
            | WardenError::ManagerApi { status, .. } => Some(*status),
            WardenError::RateLimited { .. } => Some(reqwest::StatusCode::TOO_MANY_REQUESTS),
            WardenError::NotFound { .. } => Some(reqwest::StatusCode::NOT_FOUND),
            WardenError::Http(e) => e.status(),
            _ => None,
        }
    }

    /// Returns true if this is a rate limit error.
    ///
    /// Only HTTP 429 counts. Server errors and timeouts are fatal for a
    /// batch run.
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        self.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS)
    }

    /// Returns the delay suggested by the manager, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            WardenError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Replaces every occurrence of the API secret with `[REDACTED]`.
    #[must_use]
    pub fn sanitize_message(message: &str, api_secret: &str) -> String {
        if api_secret.is_empty() {
            return message.to_string();
        }
        message.replace(api_secret, "[REDACTED]")
    }

    /// Display message of this error with the API secret scrubbed.
    #[must_use]
    pub fn sanitized_display(&self, api_secret: &str) -> String {
        Self::sanitize_message(&self.to_string(), api_secret)
    }
}

impl Classify for WardenError {
    fn kind(&self) -> FailureKind {
        if self.is_rate_limit() {
            FailureKind::RateLimited {
                retry_after: self.retry_after(),
            }
        } else {
            FailureKind::Other
        }
    }
}
