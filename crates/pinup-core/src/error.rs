use thiserror::Error;

pub type PinupResult<T> = Result<T, PinupError>;

/// Errors raised while checking a loaded configuration. Runtime failures
/// have their own types next to the code that raises them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PinupError {
    #[error("config error: {0}")]
    Config(String),
}
