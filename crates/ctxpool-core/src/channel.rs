//! Transport abstraction between the proxies and the execution backend.
//!
//! A `Channel` starts unary calls. It never runs the caller's callback
//! itself: it finishes the call through the `CallTag`, which pushes a
//! completion into the completion queue of the context that issued it.
//! That keeps every callback on its own context's thread regardless of
//! which thread the transport completes on.

use std::sync::Arc;

use crate::completion::{Completion, CompletionSink};
use crate::error::{QueueError, RpcStatus};
use crate::message::{Reply, Request};

/// Callback receiving the outcome of a unary call.
pub type ReplyHandler = Box<dyn FnOnce(Result<Reply, RpcStatus>) + Send + 'static>;

/// Zero-argument factory producing a channel to the backend.
/// Invoked once per execution context at construction.
pub type ChannelFactory = Arc<dyn Fn() -> Arc<dyn Channel> + Send + Sync>;

/// Handle to a communication channel with the remote execution backend.
///
/// **Contract:** for every `start_call`, the implementation must call
/// `tag.finish(..)` exactly once, from any thread, at any later time.
pub trait Channel: Send + Sync {
    /// Address of the backend this channel talks to.
    fn target(&self) -> &str;

    /// Start an asynchronous unary call.
    fn start_call(&self, request: Request, tag: CallTag);
}

/// Server side of a channel: answers one request synchronously.
pub trait BackendService: Send + Sync {
    fn handle(&self, request: Request) -> Result<Reply, RpcStatus>;
}

/// Binding between an in-flight call and the completion queue it must
/// finish into.
///
/// The reply handler runs exactly once. If the completion is refused by a
/// shut-down sink, or the tag is dropped without `finish`, it runs with
/// `RpcStatus::cancelled()`.
pub struct CallTag {
    sink: Arc<dyn CompletionSink>,
    reply: PendingReply,
}

/// Reply handler not yet run; runs cancelled when dropped.
struct PendingReply(Option<ReplyHandler>);

impl PendingReply {
    fn deliver(mut self, result: Result<Reply, RpcStatus>) {
        if let Some(on_done) = self.0.take() {
            on_done(result);
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(on_done) = self.0.take() {
            on_done(Err(RpcStatus::cancelled()));
        }
    }
}

impl CallTag {
    pub fn new(sink: Arc<dyn CompletionSink>, on_done: ReplyHandler) -> Self {
        Self {
            sink,
            reply: PendingReply(Some(on_done)),
        }
    }

    /// Deliver the outcome. The callback runs later, when the owning
    /// context drains its queue; a completion drained at shutdown turns
    /// the outcome into `RpcStatus::cancelled()`.
    ///
    /// On `Err` the handler has already run, cancelled, on this thread.
    pub fn finish(self, result: Result<Reply, RpcStatus>) -> Result<(), QueueError> {
        let reply = self.reply;
        self.sink.push(Completion::new(move |ok| {
            if ok {
                reply.deliver(result)
            } else {
                reply.deliver(Err(RpcStatus::cancelled()))
            }
        }))
    }
}
