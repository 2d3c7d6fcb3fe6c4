//! In-process transport to a `BackendService`.
//!
//! Calls run either inline on the caller's thread or on a shared
//! [`FixedPool`]. Either way the result goes back through `CallTag::finish`,
//! so the caller sees exactly what a networked channel would produce: a
//! completion in its own queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ctxpool_core::{
    BackendService, CallTag, Channel, ChannelFactory, Reply, Request, RpcStatus,
};
use tracing::warn;

use crate::fixed_pool::{EnqueueError, FixedPool};

enum Execution {
    Inline,
    Pool(Arc<FixedPool>),
}

pub struct InProcessChannel {
    target: String,
    backend: Arc<dyn BackendService>,
    execution: Execution,
    calls: AtomicU64,
}

impl InProcessChannel {
    /// Handle every call on the thread that starts it.
    pub fn inline(target: impl Into<String>, backend: Arc<dyn BackendService>) -> Self {
        Self {
            target: target.into(),
            backend,
            execution: Execution::Inline,
            calls: AtomicU64::new(0),
        }
    }

    /// Handle calls on `pool`'s worker threads.
    pub fn pooled(
        target: impl Into<String>,
        backend: Arc<dyn BackendService>,
        pool: Arc<FixedPool>,
    ) -> Self {
        Self {
            target: target.into(),
            backend,
            execution: Execution::Pool(pool),
            calls: AtomicU64::new(0),
        }
    }

    /// Factory handing the same channel to every context.
    pub fn into_factory(self) -> ChannelFactory {
        let channel: Arc<dyn Channel> = Arc::new(self);
        Arc::new(move || Arc::clone(&channel))
    }

    /// Calls started so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

fn finish(target: &str, method: &'static str, tag: CallTag, result: Result<Reply, RpcStatus>) {
    if let Err(e) = tag.finish(result) {
        warn!(channel = target, method, error = %e, "completion refused, call cancelled");
    }
}

impl Channel for InProcessChannel {
    fn target(&self) -> &str {
        &self.target
    }

    fn start_call(&self, request: Request, tag: CallTag) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let method = request.method();

        match &self.execution {
            Execution::Inline => {
                let result = self.backend.handle(request);
                finish(&self.target, method, tag, result);
            }
            Execution::Pool(pool) => {
                // The job owns the call until a worker takes it; on refusal
                // the call is taken back and failed here.
                let slot = Arc::new(Mutex::new(Some((request, tag))));
                let job_slot = Arc::clone(&slot);
                let backend = Arc::clone(&self.backend);
                let target = self.target.clone();

                let enqueued = pool.enqueue(move || {
                    let call = job_slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                    if let Some((request, tag)) = call {
                        let result = backend.handle(request);
                        finish(&target, method, tag, result);
                    }
                });

                if let Err(reason) = enqueued {
                    let call = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                    if let Some((_, tag)) = call {
                        let message = match reason {
                            EnqueueError::Shutdown => "backend pool is shut down",
                            EnqueueError::Full => "backend pool queue is full",
                        };
                        finish(&self.target, method, tag, Err(RpcStatus::unavailable(message)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use ctxpool_core::{Completion, CompletionSink, QueueError, StatusCode};
    use std::sync::mpsc;
    use std::time::Duration;

    /// Runs every completion immediately with `ok = true`.
    struct ImmediateSink;

    impl CompletionSink for ImmediateSink {
        fn push(&self, completion: Completion) -> Result<(), QueueError> {
            completion.complete(true);
            Ok(())
        }
    }

    fn call(channel: &InProcessChannel, request: Request) -> Result<Reply, RpcStatus> {
        let (tx, rx) = mpsc::channel();
        let tag = CallTag::new(
            Arc::new(ImmediateSink),
            Box::new(move |r| {
                let _ = tx.send(r);
            }),
        );
        channel.start_call(request, tag);
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_inline_call() {
        let channel = InProcessChannel::inline("mem", Arc::new(MemoryBackend::default()));
        assert_eq!(call(&channel, Request::NetVersion).unwrap(), Reply::Version(1));
        assert_eq!(channel.target(), "mem");
        assert_eq!(channel.calls(), 1);
    }

    #[test]
    fn test_pooled_call() {
        let pool = Arc::new(FixedPool::new(2, 16).unwrap());
        let channel = InProcessChannel::pooled(
            "mem",
            Arc::new(MemoryBackend::default()),
            Arc::clone(&pool),
        );
        assert_eq!(call(&channel, Request::GetMining).unwrap(), Reply::Bool(false));
        pool.shutdown();
        pool.join();
    }

    #[test]
    fn test_shut_down_pool_fails_call_unavailable() {
        let pool = Arc::new(FixedPool::new(1, 16).unwrap());
        pool.shutdown();
        let channel = InProcessChannel::pooled(
            "mem",
            Arc::new(MemoryBackend::default()),
            Arc::clone(&pool),
        );

        let err = call(&channel, Request::ClientVersion).unwrap_err();
        assert_eq!(err.code, StatusCode::Unavailable);
        pool.join();
    }
}
