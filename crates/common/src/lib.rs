//! Shared foundations for the rampart resilience workspace.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: errors and classification, bounded collections, the clock
//!   abstraction, serde helpers
//! - `runtime`: thread-safe runtime structures (TTL cache)
//! - `observability`: tracing subscriber setup

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod collections;
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod time;
#[cfg(feature = "foundation")]
#[macro_use]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod cache;

// Observability tier
// --------------------------------------------------------------
#[cfg(feature = "observability")]
pub mod observability;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use cache::Cache;
#[cfg(feature = "foundation")]
pub use collections::RingBuffer;
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "observability")]
pub use observability::{init_tracing, LogFormat, TracingConfig};
#[cfg(feature = "foundation")]
pub use time::{Clock, MockClock, SharedClock, SystemClock};
#[cfg(feature = "foundation")]
pub use utils::serde::{duration_millis, duration_secs_f64, option_duration_millis};
