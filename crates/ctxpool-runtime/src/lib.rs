//! # ctxpool-runtime
//!
//! Execution-context pool for the RPC layer.
//!
//! This crate provides:
//! - `Reactor`: per-context executor for posted handlers and timers
//! - `CompletionQueue` / `CompletionEndPoint`: finished remote calls
//! - Wait strategies for the cooperative loop disciplines
//! - `ExecutionContext`: the combined event loop plus the four remote proxies
//! - `ContextPool`: N contexts, worker threads, round-robin dispatch
//! - `InProcessChannel` / `MemoryBackend`: an in-process execution backend
//!
//! ```rust,ignore
//! use ctxpool_runtime::{ContextPool, InProcessChannel, MemoryBackend, PoolConfig};
//!
//! let factory = InProcessChannel::inline("memory", Arc::new(MemoryBackend::default()))
//!     .into_factory();
//! let pool = ContextPool::from_config(&PoolConfig::from_env()?, factory)?;
//! pool.start()?;
//! pool.next_context().backend().client_version(|v| println!("{v:?}"));
//! pool.stop();
//! pool.join()?;
//! ```

pub mod parking;
pub mod wait;
pub mod reactor;
pub mod completion;
pub mod cache;
pub mod fixed_pool;
pub mod channel;
pub mod backend;
pub mod remote;
pub mod context;
pub mod config;
pub mod pool;

// Re-exports
pub use backend::{MemoryBackend, NodeInfo};
pub use cache::BlockCache;
pub use channel::InProcessChannel;
pub use completion::{CompletionEndPoint, CompletionQueue};
pub use config::PoolConfig;
pub use context::ExecutionContext;
pub use fixed_pool::{EnqueueError, FixedPool};
pub use pool::{ContextPool, PoolState};
pub use reactor::{Reactor, WorkGuard};
pub use remote::{Miner, RemoteBackEnd, RemoteDatabase, TransactionPool};
pub use wait::{make_wait_strategy, IdleAction, WaitStrategy};
