//! Common utility functions and helper macros
//!
//! - **[`macros`]**: label enum conversions
//! - **[`serde`]**: duration helpers for config documents

#[macro_use]
pub mod macros;
pub mod serde;

pub use self::serde::{duration_millis, duration_secs_f64, option_duration_millis};
