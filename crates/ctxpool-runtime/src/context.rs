//! ExecutionContext - one reactor, one completion queue, one loop
//!
//! A context multiplexes two event sources on its own thread(s):
//!
//! - the reactor: posted handlers and timers, including every user
//!   callback of the four remote proxies
//! - the completion queue: finished remote calls pushed by the channel
//!
//! # Loop disciplines
//!
//! ```text
//! cooperative (sleeping, yielding, spin_wait, busy_spin), one thread:
//!
//!   while !reactor.stopped() {
//!       n  = end_point.poll_one()     // at most one completion
//!       n += reactor.poll_one()       // at most one handler
//!       wait_strategy.wait_once(n)
//!   }
//!   end_point.shutdown()
//!
//! blocking, two threads:
//!
//!   helper:  while !end_point.post_one(reactor) {}
//!   primary: reactor.run(); end_point.shutdown(); join(helper)
//! ```
//!
//! Stopping the reactor is the only way to end either loop.

use core::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use ctxpool_core::{Block, ChannelFactory, PoolError, PoolResult, RpcStatus, WaitMode, H256};
use tracing::{debug, info};

use crate::cache::BlockCache;
use crate::completion::{CompletionEndPoint, CompletionQueue};
use crate::reactor::{Reactor, WorkGuard};
use crate::remote::{Callback, Miner, RemoteBackEnd, RemoteDatabase, TransactionPool};
use crate::wait::{make_wait_strategy, WaitStrategy};

pub struct ExecutionContext {
    index: usize,
    wait_mode: WaitMode,
    reactor: Reactor,
    _work_guard: WorkGuard,
    queue: Arc<CompletionQueue>,
    end_point: CompletionEndPoint,
    cache: Arc<BlockCache>,
    database: RemoteDatabase,
    backend: RemoteBackEnd,
    tx_pool: TransactionPool,
    miner: Miner,
    /// Taken by the loop thread when the loop starts.
    wait_strategy: Mutex<Option<Box<dyn WaitStrategy>>>,
}

/// Closes the end point on every exit path, unwinding included, so a
/// blocked helper thread is always released.
struct ShutdownOnExit<'a>(&'a CompletionEndPoint);

impl Drop for ShutdownOnExit<'_> {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

impl ExecutionContext {
    /// Build a context. Invokes `channel_factory` exactly once.
    pub fn new(
        index: usize,
        channel_factory: &ChannelFactory,
        cache: Arc<BlockCache>,
        wait_mode: WaitMode,
    ) -> Self {
        let reactor = Reactor::new();
        let work_guard = reactor.work_guard();
        let queue = Arc::new(CompletionQueue::new());
        let end_point = CompletionEndPoint::new(Arc::clone(&queue));
        let channel = channel_factory();

        let database = RemoteDatabase::new(&reactor, Arc::clone(&channel), Arc::clone(&queue));
        let backend = RemoteBackEnd::new(&reactor, Arc::clone(&channel), Arc::clone(&queue));
        let tx_pool = TransactionPool::new(&reactor, Arc::clone(&channel), Arc::clone(&queue));
        let miner = Miner::new(&reactor, channel, Arc::clone(&queue));

        debug!(context = index, mode = %wait_mode, "context created");
        Self {
            index,
            wait_mode,
            reactor,
            _work_guard: work_guard,
            queue,
            end_point,
            cache,
            database,
            backend,
            tx_pool,
            miner,
            wait_strategy: Mutex::new(make_wait_strategy(wait_mode)),
        }
    }

    /// Replace the strategy picked from the wait mode. Only the cooperative
    /// loop consults it; a `blocking` context ignores it.
    pub fn with_wait_strategy(mut self, strategy: Box<dyn WaitStrategy>) -> Self {
        *self
            .wait_strategy
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = Some(strategy);
        self
    }

    /// Run the combined event loop until the reactor is stopped.
    ///
    /// Called once, on the context's worker thread.
    pub fn execute_loop(&self) -> PoolResult<()> {
        info!(context = self.index, mode = %self.wait_mode, "execution loop start");
        let result = if self.wait_mode.is_cooperative() {
            self.execute_cooperative()
        } else {
            self.execute_blocking()
        };
        info!(context = self.index, "execution loop end");
        result
    }

    fn execute_cooperative(&self) -> PoolResult<()> {
        let mut strategy = self
            .wait_strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(PoolError::NoWaitStrategy(self.wait_mode))?;
        let _shutdown = ShutdownOnExit(&self.end_point);

        while !self.reactor.stopped() {
            let mut executed = self.end_point.poll_one();
            executed += self.reactor.poll_one();
            strategy.wait_once(executed as u32);
        }
        Ok(())
    }

    fn execute_blocking(&self) -> PoolResult<()> {
        let index = self.index;
        let _shutdown = ShutdownOnExit(&self.end_point);

        thread::scope(|scope| {
            let helper = thread::Builder::new()
                .name(format!("ctxpool-cq-{}", index))
                .spawn_scoped(scope, || {
                    debug!(context = index, "completion helper start");
                    while !self.end_point.post_one(&self.reactor) {}
                    debug!(context = index, "completion helper end");
                })
                .map_err(|source| PoolError::Spawn { index, source })?;

            self.reactor.run();
            self.end_point.shutdown();
            helper.join().map_err(|_| PoolError::WorkerPanicked { index })
        })
    }

    /// Stop the reactor. Idempotent, callable from any thread.
    pub fn stop(&self) {
        if !self.reactor.stopped() {
            debug!(context = self.index, "stopping context");
        }
        self.reactor.stop();
    }

    /// Look up a block by hash: shared cache first, then the database proxy.
    ///
    /// Blocks found remotely are inserted into the cache. The callback runs
    /// on this context's reactor either way.
    pub fn read_block_by_hash<F>(&self, hash: H256, callback: F)
    where
        F: FnOnce(Result<Option<Arc<Block>>, RpcStatus>) + Send + 'static,
    {
        if let Some(block) = self.cache.get(&hash) {
            let callback = Callback::new(callback);
            self.reactor.post(move || callback.invoke(Ok(Some(block))));
            return;
        }
        let cache = Arc::clone(&self.cache);
        self.database.block_by_hash(hash, move |result| {
            callback(result.map(|found| found.map(|block| cache.insert(block))))
        });
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn wait_mode(&self) -> WaitMode {
        self.wait_mode
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    pub fn completion_queue(&self) -> &Arc<CompletionQueue> {
        &self.queue
    }

    pub fn end_point(&self) -> &CompletionEndPoint {
        &self.end_point
    }

    pub fn block_cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    pub fn database(&self) -> &RemoteDatabase {
        &self.database
    }

    pub fn backend(&self) -> &RemoteBackEnd {
        &self.backend
    }

    pub fn tx_pool(&self) -> &TransactionPool {
        &self.tx_pool
    }

    pub fn miner(&self) -> &Miner {
        &self.miner
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "context[{}] {} {} {}",
            self.index, self.reactor, self.queue, self.end_point
        )
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("index", &self.index)
            .field("wait_mode", &self.wait_mode)
            .field("stopped", &self.reactor.stopped())
            .finish()
    }
}
