//! Error types for the execution-context pool

use core::fmt;
use std::io;

use thiserror::Error;

use crate::wait_mode::WaitMode;

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Invalid configuration. Always fatal, always raised before any context
/// or thread exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Text is not one of the five wait-mode literals.
    #[error("unknown value for WaitMode: {0:?}")]
    UnknownWaitMode(String),

    /// An environment variable is set but does not parse.
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },

    /// A value is out of its allowed range.
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),
}

/// Errors raised by the context pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A pool must own at least one context.
    #[error("pool size is 0")]
    ZeroPoolSize,

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Lifecycle operation not allowed in the current state.
    #[error("cannot {op} a pool in state {state}")]
    InvalidState {
        op: &'static str,
        state: &'static str,
    },

    /// The OS refused to create a worker (or completion helper) thread.
    #[error("failed to spawn thread for context[{index}]: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    /// A worker thread unwound instead of returning.
    #[error("worker thread for context[{index}] panicked")]
    WorkerPanicked { index: usize },

    /// A cooperative loop was asked to run without a wait strategy.
    #[error("no wait strategy for mode {0}")]
    NoWaitStrategy(WaitMode),
}

/// Errors from the completion queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue was shut down; the completion was dropped.
    #[error("completion queue is shut down")]
    Shutdown,
}

/// Status code of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Drained during shutdown before the reply was delivered.
    Cancelled,
    /// Transport could not accept the call.
    Unavailable,
    /// The backend has no handler for the request.
    Unimplemented,
    /// The backend rejected the arguments.
    InvalidArgument,
    /// Malformed or mismatched reply.
    Internal,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// Failure of a remote call, delivered to the proxy callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RpcStatus {
    pub code: StatusCode,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(StatusCode::Cancelled, "call drained during shutdown")
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(PoolError::ZeroPoolSize.to_string(), "pool size is 0");

        let e = PoolError::InvalidState { op: "start", state: "Started" };
        assert_eq!(e.to_string(), "cannot start a pool in state Started");

        let e = RpcStatus::cancelled();
        assert!(e.to_string().starts_with("CANCELLED: "));
    }

    #[test]
    fn test_error_conversion() {
        let cfg = ConfigError::UnknownWaitMode("fast".into());
        let pool: PoolError = cfg.clone().into();
        assert!(matches!(pool, PoolError::Config(ref c) if *c == cfg));
        assert_eq!(pool.to_string(), "unknown value for WaitMode: \"fast\"");
    }
}
