//! Time abstractions
//!
//! - **[`clock`]**: the [`Clock`] trait with real and mock implementations

pub mod clock;

pub use clock::{Clock, MockClock, SharedClock, SystemClock};
