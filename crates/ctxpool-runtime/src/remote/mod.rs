//! Remote service proxies bound to one execution context
//!
//! Every proxy is built from the context's reactor, its channel and its
//! completion queue. A call travels:
//!
//! ```text
//! proxy ──start_call──▶ channel ──finish──▶ completion queue
//!                                                │ end point runs handler
//!                                                ▼
//!                      user callback ◀──post── reactor
//! ```
//!
//! so user callbacks always run on the owning context's reactor thread.
//!
//! Every callback runs exactly once. A call that cannot finish normally
//! (drained at shutdown, refused by a closed queue, or posted to a reactor
//! that stopped before running it) reaches its callback inline, on
//! whichever thread gave up on it, as `StatusCode::Cancelled`.

mod backend;
mod database;
mod miner;
mod txpool;

pub use backend::RemoteBackEnd;
pub use database::RemoteDatabase;
pub use miner::Miner;
pub use txpool::TransactionPool;

use std::marker::PhantomData;
use std::sync::Arc;

use ctxpool_core::{CallTag, Channel, CompletionSink, Reply, ReplyHandler, Request, RpcStatus};

use crate::completion::CompletionQueue;
use crate::reactor::Reactor;

/// Shared plumbing of the four proxies: one unary call in flight per request.
#[derive(Clone)]
pub(crate) struct UnaryClient {
    reactor: Reactor,
    channel: Arc<dyn Channel>,
    queue: Arc<CompletionQueue>,
}

impl UnaryClient {
    pub(crate) fn new(
        reactor: &Reactor,
        channel: Arc<dyn Channel>,
        queue: Arc<CompletionQueue>,
    ) -> Self {
        Self {
            reactor: reactor.clone(),
            channel,
            queue,
        }
    }

    /// Start `request`; `extract` narrows the reply, `callback` receives it.
    pub(crate) fn call<T, E, F>(&self, request: Request, extract: E, callback: F)
    where
        T: Send + 'static,
        E: FnOnce(Reply) -> Result<T, RpcStatus> + Send + 'static,
        F: FnOnce(Result<T, RpcStatus>) + Send + 'static,
    {
        let reactor = self.reactor.clone();
        let callback = Callback::new(callback);
        let on_done: ReplyHandler = Box::new(move |reply| {
            let result = reply.and_then(extract);
            if reactor.stopped() {
                callback.invoke(result);
            } else {
                reactor.post(move || callback.invoke(result));
            }
        });
        let sink: Arc<dyn CompletionSink> = self.queue.clone();
        self.channel.start_call(request, CallTag::new(sink, on_done));
    }

    pub(crate) fn target(&self) -> &str {
        self.channel.target()
    }
}

/// User callback that runs exactly once: with the result when invoked, or
/// with `RpcStatus::cancelled()` when dropped first.
pub(crate) struct Callback<T, F>
where
    F: FnOnce(Result<T, RpcStatus>),
{
    callback: Option<F>,
    _result: PhantomData<fn(T)>,
}

impl<T, F> Callback<T, F>
where
    F: FnOnce(Result<T, RpcStatus>),
{
    pub(crate) fn new(callback: F) -> Self {
        Self {
            callback: Some(callback),
            _result: PhantomData,
        }
    }

    pub(crate) fn invoke(mut self, result: Result<T, RpcStatus>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl<T, F> Drop for Callback<T, F>
where
    F: FnOnce(Result<T, RpcStatus>),
{
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(RpcStatus::cancelled()));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{capture, Harness};
    use super::*;
    use crate::backend::MemoryBackend;
    use ctxpool_core::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_callback_runs_on_reactor_pass() {
        let h = Harness::new(MemoryBackend::default());
        let client = UnaryClient::new(&h.reactor, h.channel.clone(), h.queue.clone());
        let (out, cb) = capture();

        client.call(Request::NetVersion, Reply::into_version, cb);
        // Inline channel queued the completion; nothing ran yet
        assert!(out.lock().unwrap().is_none());
        assert_eq!(h.end_point.poll_one(), 1);
        assert!(out.lock().unwrap().is_none());
        assert_eq!(h.reactor.poll_one(), 1);
        assert_eq!(out.lock().unwrap().take(), Some(Ok(1)));
        assert_eq!(client.target(), "memory");
    }

    #[test]
    fn test_drained_call_reaches_callback_cancelled() {
        let h = Harness::new(MemoryBackend::default());
        let client = UnaryClient::new(&h.reactor, h.channel.clone(), h.queue.clone());
        let (out, cb) = capture();

        client.call(Request::GetMining, Reply::into_bool, cb);
        h.reactor.stop();
        h.end_point.shutdown();

        let got = out.lock().unwrap().take().unwrap();
        assert_eq!(got.unwrap_err().code, StatusCode::Cancelled);
    }

    #[test]
    fn test_call_after_shutdown_is_cancelled() {
        let h = Harness::new(MemoryBackend::default());
        let client = UnaryClient::new(&h.reactor, h.channel.clone(), h.queue.clone());
        h.end_point.shutdown();

        let (out, cb) = capture::<Result<u64, RpcStatus>>();
        client.call(Request::NetVersion, Reply::into_version, cb);
        h.pump();
        let got = out.lock().unwrap().take().unwrap();
        assert_eq!(got.unwrap_err().code, StatusCode::Cancelled);
    }

    #[test]
    fn test_stop_between_completion_and_callback_cancels() {
        let h = Harness::new(MemoryBackend::default());
        let client = UnaryClient::new(&h.reactor, h.channel.clone(), h.queue.clone());
        let (out, cb) = capture::<Result<u64, RpcStatus>>();

        client.call(Request::NetVersion, Reply::into_version, cb);
        // Completion ran and posted the callback; the reactor stops first
        assert_eq!(h.end_point.poll_one(), 1);
        h.reactor.stop();
        assert_eq!(h.reactor.poll_one(), 0);
        h.end_point.shutdown();

        let got = out.lock().unwrap().take().unwrap();
        assert_eq!(got.unwrap_err().code, StatusCode::Cancelled);
    }

    #[test]
    fn test_callback_runs_once() {
        let (out, cb) = capture::<Result<u64, RpcStatus>>();
        let callback = Callback::new(cb);
        callback.invoke(Ok(7));
        assert_eq!(out.lock().unwrap().take(), Some(Ok(7)));

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let callback = Callback::new(move |r: Result<u64, RpcStatus>| {
            assert_eq!(r.unwrap_err().code, StatusCode::Cancelled);
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        drop(callback);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
