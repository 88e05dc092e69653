//! Error taxonomy for the resilience engine
//!
//! Every guard rejects with its own variant so callers can tell exactly
//! which policy refused a call. The user operation's own error passes
//! through untouched as [`ResilienceError::Operation`].

use std::path::PathBuf;
use std::time::Duration;

use rampart_common::error::{ErrorClassification, ErrorSeverity};
use rampart_common::impl_label_conversions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type-erased error used by fallback handlers and health probes
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for protected calls
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Component families managed by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Three-state failure gate
    CircuitBreaker,
    /// Retry manager and its budget
    Retry,
    /// Concurrency isolation
    Bulkhead,
    /// Admission control
    RateLimiter,
    /// Latency-derived timeout recommendations
    AdaptiveTimeout,
    /// Liveness, readiness and deep probes
    HealthCheck,
    /// Degrading handler chain
    Fallback,
}

impl_label_conversions!(ComponentKind {
    CircuitBreaker => "circuit_breaker",
    Retry => "retry",
    Bulkhead => "bulkhead",
    RateLimiter => "rate_limiter",
    AdaptiveTimeout => "adaptive_timeout",
    HealthCheck => "health_check",
    Fallback => "fallback",
});

/// Configuration errors, raised when a config object is built or loaded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A value violates a component's constraints
    #[error("invalid {component} configuration: {message}")]
    Invalid {
        /// Component the value belongs to
        component: ComponentKind,
        /// What is wrong
        message: String,
    },

    /// An engine-wide setting is invalid
    #[error("invalid engine configuration: {message}")]
    Engine {
        /// What is wrong
        message: String,
    },

    /// The configuration document could not be parsed
    #[error("failed to parse configuration: {message}")]
    Parse {
        /// Parser message
        message: String,
    },

    /// The configuration file could not be read
    #[error("failed to read configuration from {}: {message}", path.display())]
    Io {
        /// File that was requested
        path: PathBuf,
        /// I/O message
        message: String,
    },
}

impl ConfigError {
    /// Create an invalid-value error for a component
    pub fn invalid(component: ComponentKind, message: impl Into<String>) -> Self {
        Self::Invalid { component, message: message.into() }
    }
}

/// Errors returned by protected calls
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The circuit is open; the operation was not invoked
    #[error("circuit breaker '{name}' is open (retry in {retry_after:?})")]
    CircuitOpen {
        /// Dependency name
        name: String,
        /// Remaining cooldown before a trial call is allowed
        retry_after: Duration,
    },

    /// Every execution slot and queue position is taken
    #[error("bulkhead '{name}' is full ({max_concurrent} active, {max_queue} queued)")]
    BulkheadFull {
        /// Dependency name
        name: String,
        /// Configured execution slots
        max_concurrent: usize,
        /// Configured queue positions
        max_queue: usize,
    },

    /// A retry would push the retried/total ratio past the budget
    #[error("retry budget for '{name}' exhausted after {attempts} attempt(s)")]
    RetryBudgetExceeded {
        /// Dependency name
        name: String,
        /// Attempts made before the budget refused another
        attempts: u32,
    },

    /// Admission denied before any resource was consumed
    #[error("rate limit exceeded for '{name}'")]
    RateLimitExceeded {
        /// Dependency name
        name: String,
    },

    /// A component deadline elapsed
    #[error("{component} '{name}' timed out after {elapsed:?}")]
    Timeout {
        /// Component whose deadline elapsed
        component: ComponentKind,
        /// Dependency name
        name: String,
        /// Deadline that was exceeded
        elapsed: Duration,
    },

    /// The protected operation failed
    #[error("operation failed: {0}")]
    Operation(#[source] E),

    /// A supplied config object is invalid
    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl<E> ResilienceError<E> {
    /// `true` when a guard refused the call without invoking the operation
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. }
                | Self::BulkheadFull { .. }
                | Self::RetryBudgetExceeded { .. }
                | Self::RateLimitExceeded { .. }
        )
    }

    /// Consume and return the operation's own error, if that is what failed
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }

    /// Component that produced this error, `None` for operation failures
    #[must_use]
    pub const fn component(&self) -> Option<ComponentKind> {
        match self {
            Self::CircuitOpen { .. } => Some(ComponentKind::CircuitBreaker),
            Self::BulkheadFull { .. } => Some(ComponentKind::Bulkhead),
            Self::RetryBudgetExceeded { .. } => Some(ComponentKind::Retry),
            Self::RateLimitExceeded { .. } => Some(ComponentKind::RateLimiter),
            Self::Timeout { component, .. } => Some(*component),
            Self::Operation(_) | Self::Configuration(_) => None,
        }
    }

    /// Stable snake_case name for log fields and metrics labels
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::BulkheadFull { .. } => "bulkhead_full",
            Self::RetryBudgetExceeded { .. } => "retry_budget_exceeded",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Timeout { .. } => "timeout",
            Self::Operation(_) => "operation",
            Self::Configuration(_) => "configuration",
        }
    }
}

impl<E: ErrorClassification> ErrorClassification for ResilienceError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Operation(err) => err.is_retryable(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Operation(err) => err.severity(),
            Self::Configuration(_) => ErrorSeverity::Error,
            _ => ErrorSeverity::Warning,
        }
    }

    fn is_critical(&self) -> bool {
        match self {
            Self::Operation(err) => err.is_critical(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            Self::Operation(err) => err.retry_after(),
            _ => None,
        }
    }
}
