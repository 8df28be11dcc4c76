//! pinup-core: shared task types, config schema, and error types

pub mod config;
pub mod error;
pub mod types;

pub use error::{PinupError, PinupResult};
