//! Completion delivery abstraction.
//!
//! A transport finishes an asynchronous call by pushing a `Completion` into
//! a `CompletionSink`. The sink belongs to exactly one execution context,
//! whose event loop later runs the handler on that context's thread.
//!
//! # Implementors
//!
//! - `CompletionQueue` (ctxpool-runtime): lock-free MPSC queue with a
//!   blocking `next()` for the two-thread discipline and a non-blocking
//!   `try_next()` for the cooperative one.

use core::fmt;

use crate::error::QueueError;

/// The handler of a finished asynchronous operation.
///
/// `ok` is `true` when the operation completed normally and `false` when the
/// completion was drained during queue shutdown.
pub struct Completion {
    handler: Box<dyn FnOnce(bool) + Send + 'static>,
}

impl Completion {
    pub fn new<F>(handler: F) -> Self
    where
        F: FnOnce(bool) + Send + 'static,
    {
        Self {
            handler: Box::new(handler),
        }
    }

    /// Run the handler, consuming the completion.
    #[inline]
    pub fn complete(self, ok: bool) {
        (self.handler)(ok)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion { .. }")
    }
}

/// Accepts completions from any thread.
///
/// **Contract:**
/// - `push()` must NEVER block.
/// - After shutdown, `push()` returns `Err(QueueError::Shutdown)` and the
///   completion is dropped without running. Whatever it owns is dropped
///   with it; `CallTag` relies on that to cancel the reply.
pub trait CompletionSink: Send + Sync {
    fn push(&self, completion: Completion) -> Result<(), QueueError>;
}
