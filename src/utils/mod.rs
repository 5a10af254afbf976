//! The `utils` module provides shared pieces used across `stompchat`:
//! the crate-wide error type and logging initialization.

pub mod error;
pub mod logging;

pub use error::{ClientError, Result};
