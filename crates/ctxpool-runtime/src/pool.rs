//! ContextPool - N execution contexts, one worker thread each
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start()──▶ Started ──stop()──▶ Stopped ──join()──▶ Joined
//!    │                    │                                ▲
//!    └──stop()──▶ Stopped └────────────join()──────────────┘
//! ```
//!
//! Misuse (double start, start after stop, join before start, double join)
//! returns `PoolError::InvalidState` instead of corrupting thread handles.
//!
//! `stop()` never blocks and never fails, so it is safe from any thread,
//! including a callback running on one of the pool's own workers.
//!
//! # Dispatch
//!
//! `next_context()` hands out contexts round-robin through an atomic
//! cursor and may be called concurrently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use ctxpool_core::{ChannelFactory, PoolError, PoolResult, WaitMode};
use tracing::{debug, info, trace};

use crate::cache::{BlockCache, DEFAULT_BLOCK_CACHE_CAPACITY};
use crate::config::PoolConfig;
use crate::context::ExecutionContext;
use crate::reactor::Reactor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Started,
    Stopped,
    Joined,
}

impl PoolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolState::Created => "Created",
            PoolState::Started => "Started",
            PoolState::Stopped => "Stopped",
            PoolState::Joined => "Joined",
        }
    }
}

struct Lifecycle {
    state: PoolState,
    /// Worker threads were spawned at some point.
    started: bool,
    /// A `join()` has taken the handles.
    join_claimed: bool,
    handles: Vec<JoinHandle<PoolResult<()>>>,
}

pub struct ContextPool {
    contexts: Vec<Arc<ExecutionContext>>,
    next_index: AtomicUsize,
    block_cache: Arc<BlockCache>,
    wait_mode: WaitMode,
    lifecycle: Mutex<Lifecycle>,
}

impl ContextPool {
    /// Build `size` contexts sharing one block cache.
    ///
    /// Fails with `ZeroPoolSize` before building anything.
    pub fn new(size: usize, channel_factory: ChannelFactory, wait_mode: WaitMode) -> PoolResult<Self> {
        Self::build(size, channel_factory, wait_mode, DEFAULT_BLOCK_CACHE_CAPACITY)
    }

    /// Validate `config`, then build the pool it describes.
    pub fn from_config(config: &PoolConfig, channel_factory: ChannelFactory) -> PoolResult<Self> {
        config.validate()?;
        Self::build(
            config.num_contexts,
            channel_factory,
            config.wait_mode,
            config.block_cache_capacity,
        )
    }

    fn build(
        size: usize,
        channel_factory: ChannelFactory,
        wait_mode: WaitMode,
        cache_capacity: usize,
    ) -> PoolResult<Self> {
        if size == 0 {
            return Err(PoolError::ZeroPoolSize);
        }
        info!(size, mode = %wait_mode, "creating context pool");

        let block_cache = Arc::new(BlockCache::new(cache_capacity));
        let contexts = (0..size)
            .map(|i| {
                let context = Arc::new(ExecutionContext::new(
                    i,
                    &channel_factory,
                    Arc::clone(&block_cache),
                    wait_mode,
                ));
                debug!("context[{}] {}", i, context);
                context
            })
            .collect();

        Ok(Self {
            contexts,
            next_index: AtomicUsize::new(0),
            block_cache,
            wait_mode,
            lifecycle: Mutex::new(Lifecycle {
                state: PoolState::Created,
                started: false,
                join_claimed: false,
                handles: Vec::new(),
            }),
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn one worker thread per context.
    pub fn start(&self) -> PoolResult<()> {
        trace!("pool start started");
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != PoolState::Created {
            return Err(PoolError::InvalidState {
                op: "start",
                state: lifecycle.state.as_str(),
            });
        }
        lifecycle.started = true;
        lifecycle.state = PoolState::Started;

        for (i, context) in self.contexts.iter().enumerate() {
            let context = Arc::clone(context);
            let spawned = thread::Builder::new()
                .name(format!("ctxpool-ctx-{}", i))
                .spawn(move || {
                    debug!(context = i, thread = ?thread::current().id(), "thread start");
                    let result = context.execute_loop();
                    debug!(context = i, thread = ?thread::current().id(), "thread end");
                    result
                });

            match spawned {
                Ok(handle) => {
                    lifecycle.handles.push(handle);
                    debug!(context = i, "context started");
                }
                Err(source) => {
                    // Workers already running exit once stopped; join() reaps them
                    lifecycle.state = PoolState::Stopped;
                    drop(lifecycle);
                    self.stop_contexts();
                    return Err(PoolError::Spawn { index: i, source });
                }
            }
        }

        trace!("pool start completed");
        Ok(())
    }

    /// Block until every worker thread has exited.
    ///
    /// Reports the first failure in context order, after joining all workers.
    pub fn join(&self) -> PoolResult<()> {
        trace!("pool join started");
        let handles = {
            let mut lifecycle = self.lifecycle();
            let invalid = !lifecycle.started
                || lifecycle.join_claimed
                || lifecycle.state == PoolState::Joined;
            if invalid {
                return Err(PoolError::InvalidState {
                    op: "join",
                    state: lifecycle.state.as_str(),
                });
            }
            lifecycle.join_claimed = true;
            std::mem::take(&mut lifecycle.handles)
        };

        // Lock released: workers may call stop() while we wait
        debug!("pool joining...");
        let mut outcome = Ok(());
        for (index, handle) in handles.into_iter().enumerate() {
            let result = match handle.join() {
                Ok(result) => result,
                Err(_) => Err(PoolError::WorkerPanicked { index }),
            };
            if let Err(e) = result {
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }

        self.lifecycle().state = PoolState::Joined;
        trace!("pool join completed");
        outcome
    }

    /// Stop every context in index order. Non-blocking, idempotent.
    pub fn stop(&self) {
        trace!("pool stop started");
        self.stop_contexts();
        let mut lifecycle = self.lifecycle();
        if matches!(lifecycle.state, PoolState::Created | PoolState::Started) {
            lifecycle.state = PoolState::Stopped;
        }
        trace!("pool stop completed");
    }

    fn stop_contexts(&self) {
        for (i, context) in self.contexts.iter().enumerate() {
            context.stop();
            debug!(context = i, reactor = %context.reactor(), "context stopped");
        }
    }

    /// `start()` then `join()`.
    pub fn run(&self) -> PoolResult<()> {
        self.start()?;
        self.join()
    }

    /// The context at the cursor; advances the cursor modulo the pool size.
    pub fn next_context(&self) -> &Arc<ExecutionContext> {
        let size = self.contexts.len();
        let index = self
            .next_index
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| Some((i + 1) % size))
            .unwrap_or_else(|i| i);
        &self.contexts[index]
    }

    /// Reactor of `next_context()`.
    pub fn next_reactor(&self) -> &Reactor {
        self.next_context().reactor()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.contexts.len()
    }

    pub fn context(&self, index: usize) -> Option<&Arc<ExecutionContext>> {
        self.contexts.get(index)
    }

    pub fn contexts(&self) -> impl Iterator<Item = &Arc<ExecutionContext>> {
        self.contexts.iter()
    }

    pub fn wait_mode(&self) -> WaitMode {
        self.wait_mode
    }

    pub fn block_cache(&self) -> &Arc<BlockCache> {
        &self.block_cache
    }

    pub fn state(&self) -> PoolState {
        self.lifecycle().state
    }
}

impl Drop for ContextPool {
    fn drop(&mut self) {
        trace!(pool = ?(self as *const Self), "pool drop started");
        self.stop();
        trace!(pool = ?(self as *const Self), "pool drop completed");
    }
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("size", &self.size())
            .field("wait_mode", &self.wait_mode)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::channel::InProcessChannel;
    use std::time::Duration;

    fn factory() -> ChannelFactory {
        InProcessChannel::inline("memory", Arc::new(MemoryBackend::default())).into_factory()
    }

    #[test]
    fn test_zero_size_rejected() {
        let err = ContextPool::new(0, factory(), WaitMode::Yielding).unwrap_err();
        assert!(matches!(err, PoolError::ZeroPoolSize));
    }

    #[test]
    fn test_round_robin_wraps() {
        let pool = ContextPool::new(3, factory(), WaitMode::Yielding).unwrap();
        let order: Vec<usize> = (0..7).map(|_| pool.next_context().index()).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0]);

        let single = ContextPool::new(1, factory(), WaitMode::Blocking).unwrap();
        assert_eq!(single.next_context().index(), 0);
        assert_eq!(single.next_context().index(), 0);
    }

    #[test]
    fn test_next_reactor_follows_cursor() {
        let pool = ContextPool::new(2, factory(), WaitMode::Sleeping).unwrap();
        let first = pool.next_reactor().to_string();
        let second = pool.next_reactor().to_string();
        assert_ne!(first, second);
        assert_eq!(pool.next_context().index(), 0);
    }

    #[test]
    fn test_contexts_share_cache() {
        let pool = ContextPool::new(4, factory(), WaitMode::Yielding).unwrap();
        for context in pool.contexts() {
            assert!(Arc::ptr_eq(context.block_cache(), pool.block_cache()));
        }
    }

    #[test]
    fn test_lifecycle_misuse() {
        let pool = ContextPool::new(1, factory(), WaitMode::Yielding).unwrap();
        assert!(matches!(
            pool.join(),
            Err(PoolError::InvalidState { op: "join", state: "Created" })
        ));

        pool.start().unwrap();
        assert!(matches!(
            pool.start(),
            Err(PoolError::InvalidState { op: "start", state: "Started" })
        ));

        pool.stop();
        assert_eq!(pool.state(), PoolState::Stopped);
        pool.join().unwrap();
        assert_eq!(pool.state(), PoolState::Joined);
        assert!(matches!(
            pool.join(),
            Err(PoolError::InvalidState { op: "join", state: "Joined" })
        ));
        assert!(pool.start().is_err());
    }

    #[test]
    fn test_start_after_stop_rejected() {
        let pool = ContextPool::new(2, factory(), WaitMode::Blocking).unwrap();
        pool.stop();
        assert!(matches!(
            pool.start(),
            Err(PoolError::InvalidState { op: "start", state: "Stopped" })
        ));
        assert!(pool.join().is_err());
    }

    #[test]
    fn test_stop_from_worker_callback() {
        let pool = Arc::new(ContextPool::new(2, factory(), WaitMode::Yielding).unwrap());
        pool.start().unwrap();

        let stopper = Arc::clone(&pool);
        pool.next_context().reactor().post_after(Duration::from_millis(10), move || {
            stopper.stop();
        });
        pool.join().unwrap();
        assert_eq!(pool.state(), PoolState::Joined);
    }

    #[test]
    fn test_worker_panic_reported() {
        let pool = ContextPool::new(2, factory(), WaitMode::BusySpin).unwrap();
        pool.start().unwrap();
        pool.context(1)
            .unwrap()
            .reactor()
            .post(|| panic!("handler failure"));
        // Context 1 died with its reactor running; stop the rest
        thread::sleep(Duration::from_millis(50));
        pool.stop();
        assert!(matches!(pool.join(), Err(PoolError::WorkerPanicked { index: 1 })));
    }
}
