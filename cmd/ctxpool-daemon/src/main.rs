//! ctxpool daemon
//!
//! Runs a context pool against an in-memory execution backend until SIGINT
//! or SIGTERM:
//!
//!   1. configuration: `CTXPOOL_*` environment, then CLI flags on top
//!   2. backend: `MemoryBackend` behind an `InProcessChannel` whose calls
//!      run on a `FixedPool` of worker threads
//!   3. pool: start, optional demo calls, wait for a signal, stop, join
//!
//! Run: RUST_LOG=debug ./target/release/ctxpool-daemon --contexts 4 --wait-mode yielding

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ctxpool_core::env::env_get;
use ctxpool_core::{Block, WaitMode, WorkPackage, H256};
use ctxpool_runtime::{ContextPool, FixedPool, InProcessChannel, MemoryBackend, NodeInfo, PoolConfig};
use nix::sys::signal::{SigSet, Signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const ENV_BACKEND_QUEUE_DEPTH: &str = "CTXPOOL_BACKEND_QUEUE_DEPTH";
const DEFAULT_BACKEND_QUEUE_DEPTH: usize = 4096;
const DEMO_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Execution-context pool daemon
#[derive(Parser, Debug)]
#[command(name = "ctxpool-daemon")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Number of execution contexts [default: CTXPOOL_NUM_CONTEXTS, else nproc/3]
    #[arg(long)]
    contexts: Option<usize>,

    /// Loop discipline: blocking, sleeping, yielding, spin_wait, busy_spin
    #[arg(long)]
    wait_mode: Option<WaitMode>,

    /// Number of backend worker threads
    #[arg(long, env = "CTXPOOL_BACKEND_THREADS", default_value_t = 16)]
    threads: usize,

    /// Engine address of the form <address>:<port>
    #[arg(long, default_value = "127.0.0.1:8080")]
    engine_port: String,

    /// Entries in the shared block cache
    #[arg(long)]
    block_cache_capacity: Option<usize>,

    /// Network id reported by the backend
    #[arg(long, default_value_t = 1)]
    network_id: u64,

    /// Round-robin demo calls issued after startup
    #[arg(long, default_value_t = 0)]
    demo_calls: usize,

    /// Stop once the demo calls have completed instead of waiting for a signal
    #[arg(long)]
    oneshot: bool,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_thread_names(true)
        .init();
}

fn pool_config(cli: &Cli) -> Result<PoolConfig> {
    let mut config = PoolConfig::from_env().context("invalid CTXPOOL_* environment")?;
    if let Some(n) = cli.contexts {
        config = config.num_contexts(n);
    }
    if let Some(mode) = cli.wait_mode {
        config = config.wait_mode(mode);
    }
    if let Some(capacity) = cli.block_cache_capacity {
        config = config.block_cache_capacity(capacity);
    }
    config.validate()?;
    Ok(config)
}

/// Genesis block and a first work package so every service has data.
fn seed_backend(backend: &MemoryBackend) -> H256 {
    let genesis = Block {
        number: 0,
        hash: H256::repeat_byte(0xd4),
        body: Vec::new(),
    };
    let hash = genesis.hash;
    backend.put("CanonicalHeader", &0u64.to_be_bytes(), hash.as_bytes().to_vec());
    backend.put_block(genesis);
    backend.set_work(WorkPackage {
        header_hash: H256::repeat_byte(0x01),
        seed_hash: H256::ZERO,
        target: H256::repeat_byte(0xff),
        block_number: 1,
    });
    hash
}

/// Issue `count` calls round-robin and wait for every reply.
fn run_demo(pool: &ContextPool, count: usize, genesis: H256) {
    let (tx, rx) = mpsc::channel();
    for i in 0..count {
        let context = pool.next_context();
        let index = context.index();
        let tx = tx.clone();
        if i % 2 == 0 {
            context.read_block_by_hash(genesis, move |result| {
                let _ = tx.send((index, result.map(|b| format!("{:?}", b.map(|b| b.number)))));
            });
        } else {
            context.backend().client_version(move |result| {
                let _ = tx.send((index, result));
            });
        }
    }
    drop(tx);

    for _ in 0..count {
        match rx.recv_timeout(DEMO_REPLY_TIMEOUT) {
            Ok((context, Ok(reply))) => info!(context, %reply, "demo call"),
            Ok((context, Err(status))) => warn!(context, %status, "demo call failed"),
            Err(e) => {
                warn!(error = %e, "demo calls incomplete");
                break;
            }
        }
    }
    let cache = pool.block_cache();
    info!(hits = cache.hits(), misses = cache.misses(), "block cache");
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = pool_config(&cli)?;
    info!(%config, threads = cli.threads, engine = %cli.engine_port, "initializing");

    // Block before spawning anything so every thread inherits the mask
    // and only the signal thread receives them.
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block().context("failed to block SIGINT/SIGTERM")?;

    let backend = Arc::new(MemoryBackend::new(NodeInfo {
        net_version: cli.network_id,
        ..NodeInfo::default()
    }));
    let genesis = seed_backend(&backend);

    let queue_depth = env_get(ENV_BACKEND_QUEUE_DEPTH, DEFAULT_BACKEND_QUEUE_DEPTH);
    let workers = Arc::new(FixedPool::new(cli.threads, queue_depth)?);
    let factory =
        InProcessChannel::pooled(cli.engine_port.clone(), backend.clone(), Arc::clone(&workers))
            .into_factory();

    let pool = Arc::new(ContextPool::from_config(&config, factory)?);
    pool.start()?;
    info!(contexts = pool.size(), mode = %pool.wait_mode(), "started engine server");

    {
        let pool = Arc::clone(&pool);
        thread::Builder::new()
            .name("ctxpool-signals".to_string())
            .spawn(move || {
                match signals.wait() {
                    Ok(signal) => info!(?signal, "shutdown requested"),
                    Err(e) => error!(error = %e, "sigwait failed, shutting down"),
                }
                pool.stop();
            })
            .context("failed to spawn signal thread")?;
    }

    if cli.demo_calls > 0 {
        run_demo(&pool, cli.demo_calls, genesis);
        if cli.oneshot {
            pool.stop();
        }
    }

    let joined = pool.join();
    workers.shutdown();
    workers.join();
    info!(calls = backend.calls(), "stopped engine server");
    joined?;
    Ok(())
}
