//! Signal error types.

use thiserror::Error;

/// Errors raised while emitting a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignalError {
    /// Nested emission on one signal went deeper than its configured limit.
    #[error("signal recursion limit of {limit} exceeded")]
    RecursionLimit { limit: u32 },
}

/// Result type for signal operations.
pub type SignalResult<T> = Result<T, SignalError>;
