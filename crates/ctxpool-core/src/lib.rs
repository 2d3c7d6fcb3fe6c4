//! # ctxpool-core
//!
//! Core types and traits for the RPC execution-context pool.
//!
//! This crate is platform-agnostic and spawns no threads.
//! The pool, reactor and completion queue live in `ctxpool-runtime`.
//!
//! ## Modules
//!
//! - `wait_mode` - Backoff discipline selected once per pool
//! - `types` - Hashes, addresses, blocks and mining work
//! - `message` - Unary requests/replies of the four remote services
//! - `completion` - Completion handlers and the sink they are pushed into
//! - `channel` - Transport to the remote execution backend
//! - `error` - Error types
//! - `env` - Environment variable utilities

pub mod wait_mode;
pub mod types;
pub mod message;
pub mod completion;
pub mod channel;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use wait_mode::WaitMode;
pub use types::{Address, Block, H256, WorkPackage};
pub use message::{Reply, Request, Service};
pub use completion::{Completion, CompletionSink};
pub use channel::{BackendService, CallTag, Channel, ChannelFactory, ReplyHandler};
pub use error::{ConfigError, PoolError, PoolResult, QueueError, RpcStatus, StatusCode};
pub use env::{env_get, env_parse};
