//! Error types for Atlas API operations.
//!
//! Errors are categorized to enable retry logic and to decide whether a
//! failure stays local to one resource or aborts the whole run.

use serde::Deserialize;
use std::fmt;
use std::io;

/// Result type alias for Atlas operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of Atlas errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Credentials rejected (401/403)
    Unauthorized,
    /// Resource does not exist (404)
    NotFound,
    /// Too many requests (429), retryable
    RateLimited,
    /// Request conflicts with current state, e.g. duplicate name (409)
    Conflict,
    /// Timeouts, connection failures and 5xx responses, retryable
    Transient,
    /// Any other rejected request
    Fatal,
    /// The caller stopped waiting
    Cancelled,
    /// Malformed input or response
    Invalid,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }

    /// Short machine-friendly name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
            Self::Cancelled => "cancelled",
            Self::Invalid => "invalid",
        }
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Authentication failed",
            Self::NotFound => "Resource not found",
            Self::RateLimited => "Rate limited by Atlas",
            Self::Conflict => "Conflicting resource state",
            Self::Transient => "Temporary API failure",
            Self::Fatal => "Request rejected",
            Self::Cancelled => "Cancelled",
            Self::Invalid => "Invalid data",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Unauthorized => {
                "Check the API username/key and that the key has access to the group"
            }
            Self::NotFound => "Verify the group id and resource name",
            Self::RateLimited => "Lower the number of parallel jobs and try again",
            Self::Conflict => "Another operation may be in progress, or the name is taken",
            Self::Transient => "Check your internet connection and try again",
            Self::Fatal => "Check the error details returned by Atlas",
            Self::Cancelled => "The operation may still complete on the Atlas side",
            Self::Invalid => "Fix the input and run again",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while talking to Atlas.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Credentials were rejected.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Details from the server
        message: String,
    },

    /// Resource does not exist.
    #[error("not found: {resource}")]
    NotFound {
        /// Path or name of the missing resource
        resource: String,
    },

    /// Too many requests.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Details from the server
        message: String,
    },

    /// Request conflicts with the current state.
    #[error("conflict: {message}")]
    Conflict {
        /// Details from the server
        message: String,
    },

    /// Temporary failure (network, timeout, 5xx).
    #[error("transient error: {message}")]
    Transient {
        /// Error message
        message: String,
        /// HTTP status code if available
        status: Option<u16>,
    },

    /// Request rejected for another reason.
    #[error("request failed: {message}")]
    Fatal {
        /// Error message
        message: String,
        /// HTTP status code if available
        status: Option<u16>,
    },

    /// Response could not be understood.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    /// Malformed input.
    #[error("{0}")]
    Invalid(String),

    /// A wait was interrupted by cancellation.
    #[error("cancelled")]
    Cancelled,
}

/// Error body returned by the Atlas API.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    detail: Option<String>,
    error_code: Option<String>,
    reason: Option<String>,
}

impl Error {
    /// Build an error from an HTTP status and response body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = describe_body(status, body);
        match status {
            401 | 403 => Self::Unauthorized { message },
            404 => Self::NotFound { resource: message },
            409 => Self::Conflict { message },
            429 => Self::RateLimited { message },
            500..=599 => Self::Transient {
                message,
                status: Some(status),
            },
            _ => Self::Fatal {
                message,
                status: Some(status),
            },
        }
    }

    /// Create a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            status: None,
        }
    }

    /// Get the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Unauthorized { .. } => ErrorCategory::Unauthorized,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::RateLimited { .. } => ErrorCategory::RateLimited,
            Error::Conflict { .. } => ErrorCategory::Conflict,
            Error::Transient { .. } => ErrorCategory::Transient,
            Error::Fatal { .. } => ErrorCategory::Fatal,
            Error::InvalidResponse(_) | Error::Invalid(_) => ErrorCategory::Invalid,
            Error::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Authentication failures stop the whole run.
    #[must_use]
    pub fn is_fatal_for_run(&self) -> bool {
        self.category() == ErrorCategory::Unauthorized
    }
}

fn describe_body(status: u16, body: &str) -> String {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    let mut parts = vec![format!("HTTP {status}")];
    if let Some(code) = parsed.error_code {
        parts.push(code);
    }
    if let Some(detail) = parsed.detail.or(parsed.reason) {
        parts.push(detail);
    }
    parts.join(": ")
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::from_status(code, ""),
            ureq::Error::Timeout(t) => Self::transient(format!("timed out ({t:?})")),
            ureq::Error::Io(e) => Self::transient(e.to_string()),
            ureq::Error::HostNotFound => Self::transient("host not found"),
            ureq::Error::ConnectionFailed => Self::transient("connection failed"),
            other => Self::Fatal {
                message: other.to_string(),
                status: None,
            },
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::transient(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}
