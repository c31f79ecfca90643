//! Errors raised by the simulators

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    /// Rejected before any state change or scheduling.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type SimResult<T> = Result<T, SimError>;
