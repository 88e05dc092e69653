//! Common error types and classification shared across rampart crates
//!
//! Two pieces live here:
//!
//! 1. **`CommonError`**: ready-made error variants for calls to downstream
//!    dependencies (timeouts, backend failures, connection errors,
//!    validation problems). Hosts that have no error type of their own can
//!    return it directly from protected operations.
//!
//! 2. **`ErrorClassification`**: the trait the resilience engine uses to
//!    decide whether a failure is transient. Retries only ever happen for
//!    errors whose `is_retryable()` returns `true`.
//!
//! ## Retryability at a glance
//!
//! | Variant | Retryable | Severity |
//! |---------|-----------|----------|
//! | `Timeout` | yes | Warning |
//! | `Connection` | yes | Warning |
//! | `Backend` | per `is_retryable` (5xx, 408, 429) | Error |
//! | `Validation` | no | Error |
//! | `Config` | no | Error |
//! | `Serialization` | no | Error |
//! | `Internal` | no | Critical |
//!
//! ## Implementing the trait for a host error
//!
//! ```rust
//! use std::time::Duration;
//!
//! use rampart_common::error::{ErrorClassification, ErrorSeverity};
//!
//! #[derive(Debug)]
//! enum PaymentError {
//!     GatewayUnavailable,
//!     CardDeclined,
//! }
//!
//! impl ErrorClassification for PaymentError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, Self::GatewayUnavailable)
//!     }
//!
//!     fn severity(&self) -> ErrorSeverity {
//!         match self {
//!             Self::GatewayUnavailable => ErrorSeverity::Warning,
//!             Self::CardDeclined => ErrorSeverity::Info,
//!         }
//!     }
//!
//!     fn is_critical(&self) -> bool {
//!         false
//!     }
//!
//!     fn retry_after(&self) -> Option<Duration> {
//!         None
//!     }
//! }
//!
//! assert!(PaymentError::GatewayUnavailable.is_retryable());
//! assert!(!PaymentError::CardDeclined.is_retryable());
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Common error variants for dependency calls and shared infrastructure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommonError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config {
        /// Human readable description
        message: String,
    },

    /// Serialization or deserialization errors
    #[error("Serialization error ({format}): {message}")]
    Serialization {
        /// Format being processed
        format: String,
        /// Parser message
        message: String,
    },

    /// Operation exceeded its deadline
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Deadline that was exceeded
        duration: Duration,
    },

    /// Downstream service returned an error response
    #[error("Backend error from '{service}': {message}")]
    Backend {
        /// Service that failed
        service: String,
        /// Error description
        message: String,
        /// Whether repeating the call may succeed
        is_retryable: bool,
        /// Suggested delay from the backend, if any
        retry_after: Option<Duration>,
    },

    /// Downstream service could not be reached
    #[error("Connection to '{service}' failed: {message}")]
    Connection {
        /// Service that was unreachable
        service: String,
        /// Error description
        message: String,
    },

    /// Input validation errors
    #[error("Validation error for field '{field}': {message}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation message
        message: String,
    },

    /// Internal errors that shouldn't normally occur
    #[error("Internal error: {message}")]
    Internal {
        /// Error description
        message: String,
    },
}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connection { .. } => true,
            Self::Backend { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Timeout { .. } | Self::Connection { .. } => ErrorSeverity::Warning,
            Self::Config { .. }
            | Self::Serialization { .. }
            | Self::Backend { .. }
            | Self::Validation { .. } => ErrorSeverity::Error,
            Self::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Backend { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl CommonError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a serialization error for the given format
    pub fn serialization<F: Into<String>, S: Into<String>>(format: F, message: S) -> Self {
        Self::Serialization { format: format.into(), message: message.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    /// Create a backend error with explicit retryability
    pub fn backend<S: Into<String>, M: Into<String>>(
        service: S,
        message: M,
        is_retryable: bool,
    ) -> Self {
        Self::Backend {
            service: service.into(),
            message: message.into(),
            is_retryable,
            retry_after: None,
        }
    }

    /// Classify a backend failure from an HTTP-style status code.
    ///
    /// 5xx, 408 and 429 are transient; every other status is treated as a
    /// caller error and never retried.
    pub fn from_status<S: Into<String>, M: Into<String>>(
        service: S,
        status: u16,
        message: M,
    ) -> Self {
        let is_retryable = status >= 500 || status == 408 || status == 429;
        Self::Backend {
            service: service.into(),
            message: format!("status {status}: {}", message.into()),
            is_retryable,
            retry_after: None,
        }
    }

    /// Create a connection error
    pub fn connection<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::Connection { service: service.into(), message: message.into() }
    }

    /// Create a validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Attach a backend-supplied retry delay. No-op for other variants.
    #[must_use]
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        if let Self::Backend { retry_after, .. } = &mut self {
            *retry_after = Some(delay);
        }
        self
    }

    /// Stable snake_case name for log fields and metrics labels
    #[must_use]
    pub const fn error_type_name(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Serialization { .. } => "serialization",
            Self::Timeout { .. } => "timeout",
            Self::Backend { .. } => "backend",
            Self::Connection { .. } => "connection",
            Self::Validation { .. } => "validation",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Error classification trait for consistent retry and alerting decisions
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient: timeouts, 5xx-equivalent responses
    /// and connection failures. Caller errors (4xx-equivalent, validation)
    /// must return `false`.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization("TOML", err.to_string())
    }
}
