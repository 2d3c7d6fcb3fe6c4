//! End-to-end pool scenarios: start/stop/join across loop disciplines,
//! dispatch fairness and calls flowing through every context.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ctxpool_core::{
    BackendService, Channel, ChannelFactory, PoolError, Reply, Request, RpcStatus, StatusCode,
    WaitMode,
};
use ctxpool_runtime::{
    BlockCache, ContextPool, ExecutionContext, FixedPool, IdleAction, InProcessChannel,
    MemoryBackend, PoolConfig, PoolState, Reactor, WaitStrategy,
};

fn memory_factory() -> ChannelFactory {
    InProcessChannel::inline("memory", Arc::new(MemoryBackend::default())).into_factory()
}

/// Fail the test instead of hanging if `join()` never returns.
fn join_within(pool: Arc<ContextPool>, limit: Duration) -> Result<(), PoolError> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(pool.join());
    });
    rx.recv_timeout(limit).expect("join did not return in time")
}

#[test]
fn test_yielding_pool_start_stop_join() {
    let pool = Arc::new(ContextPool::new(3, memory_factory(), WaitMode::Yielding).unwrap());
    pool.start().unwrap();
    thread::sleep(Duration::from_millis(20));

    pool.stop();
    join_within(Arc::clone(&pool), Duration::from_secs(5)).unwrap();
    assert_eq!(pool.state(), PoolState::Joined);
    for context in pool.contexts() {
        assert!(context.reactor().stopped());
        assert!(context.end_point().is_closed());
    }
}

#[test]
fn test_blocking_pool_stop_after_delay() {
    let pool = Arc::new(ContextPool::new(1, memory_factory(), WaitMode::Blocking).unwrap());
    pool.start().unwrap();

    let stopper = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            pool.stop();
        })
    };
    join_within(Arc::clone(&pool), Duration::from_secs(5)).unwrap();
    stopper.join().unwrap();
}

#[test]
fn test_run_returns_after_concurrent_stop() {
    for mode in WaitMode::ALL {
        let pool = Arc::new(ContextPool::new(2, memory_factory(), mode).unwrap());
        let runner = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.run())
        };

        // run() may not have reached start() yet; wait for it
        let start = Instant::now();
        while pool.state() == PoolState::Created {
            assert!(start.elapsed() < Duration::from_secs(5));
            thread::yield_now();
        }
        pool.stop();
        runner.join().unwrap().unwrap();
    }
}

#[test]
fn test_zero_size_fails_before_building() {
    let built = Arc::new(AtomicUsize::new(0));
    let built2 = Arc::clone(&built);
    let channel: Arc<dyn Channel> =
        Arc::new(InProcessChannel::inline("memory", Arc::new(MemoryBackend::default())));
    let factory: ChannelFactory = Arc::new(move || {
        built2.fetch_add(1, Ordering::SeqCst);
        Arc::clone(&channel)
    });

    let err = ContextPool::new(0, factory.clone(), WaitMode::Yielding).unwrap_err();
    assert!(matches!(err, PoolError::ZeroPoolSize));
    assert_eq!(built.load(Ordering::SeqCst), 0);

    let pool = ContextPool::new(4, factory, WaitMode::Yielding).unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 4);
    assert_eq!(pool.size(), 4);
}

#[test]
fn test_from_config_validates_first() {
    let config = PoolConfig::new().num_contexts(0);
    assert!(matches!(
        ContextPool::from_config(&config, memory_factory()),
        Err(PoolError::Config(_))
    ));

    let config = PoolConfig::new()
        .num_contexts(2)
        .wait_mode(WaitMode::Sleeping)
        .block_cache_capacity(32);
    let pool = ContextPool::from_config(&config, memory_factory()).unwrap();
    assert_eq!(pool.size(), 2);
    assert_eq!(pool.wait_mode(), WaitMode::Sleeping);
    assert_eq!(pool.block_cache().capacity(), 32);
}

#[test]
fn test_round_robin_order() {
    for size in [1usize, 2, 5] {
        let pool = ContextPool::new(size, memory_factory(), WaitMode::BusySpin).unwrap();
        for k in 0..3 * size {
            assert_eq!(pool.next_context().index(), k % size);
        }
    }
}

#[test]
fn test_concurrent_dispatch_is_fair() {
    let pool = Arc::new(ContextPool::new(4, memory_factory(), WaitMode::Yielding).unwrap());
    let counts: Arc<Vec<AtomicUsize>> = Arc::new((0..4).map(|_| AtomicUsize::new(0)).collect());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let counts = Arc::clone(&counts);
            thread::spawn(move || {
                for _ in 0..1000 {
                    let index = pool.next_context().index();
                    counts[index].fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    for count in counts.iter() {
        assert_eq!(count.load(Ordering::Relaxed), 1000);
    }
}

/// Records the count handed to every `wait_once` and stops the reactor
/// after a fixed number of passes.
struct CountRecorder {
    counts: Arc<Mutex<Vec<u32>>>,
    reactor: Reactor,
    passes: usize,
}

impl WaitStrategy for CountRecorder {
    fn next_action(&mut self, executed_count: u32) -> IdleAction {
        let mut counts = self.counts.lock().unwrap();
        counts.push(executed_count);
        if counts.len() == self.passes {
            self.reactor.stop();
        }
        IdleAction::None
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[test]
fn test_cooperative_pass_runs_at_most_one_per_source() {
    let backend = Arc::new(MemoryBackend::default());
    let factory = InProcessChannel::inline("memory", backend).into_factory();
    let context =
        ExecutionContext::new(0, &factory, Arc::new(BlockCache::new(8)), WaitMode::BusySpin);

    // Five queued completions and five posted handlers
    let callbacks = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        let callbacks = Arc::clone(&callbacks);
        context.backend().net_version(move |r| {
            assert_eq!(r, Ok(1));
            callbacks.fetch_add(1, Ordering::SeqCst);
        });
        context.reactor().post(|| {});
    }
    assert_eq!(context.completion_queue().len(), 5);

    let counts = Arc::new(Mutex::new(Vec::new()));
    let recorder = CountRecorder {
        counts: Arc::clone(&counts),
        reactor: context.reactor().clone(),
        passes: 20,
    };
    let context = context.with_wait_strategy(Box::new(recorder));
    context.execute_loop().unwrap();

    let counts = counts.lock().unwrap();
    assert_eq!(counts.len(), 20);
    assert!(counts.iter().all(|&n| n <= 2));
    // Both sources served in the first pass, neither drained ahead
    assert_eq!(counts[0], 2);
    assert_eq!(counts[1], 2);
    // 5 completions + 5 handlers + 5 callbacks posted by the completions
    assert_eq!(counts.iter().sum::<u32>(), 15);
    assert_eq!(callbacks.load(Ordering::SeqCst), 5);
    assert!(context.end_point().is_closed());
}

#[test]
fn test_busy_spin_never_sleeps() {
    let mut strategy = ctxpool_runtime::make_wait_strategy(WaitMode::BusySpin).unwrap();
    for i in 0..1000u32 {
        assert_eq!(strategy.next_action(i % 3), IdleAction::None);
    }
}

#[test]
fn test_calls_through_every_context() {
    let backend = Arc::new(MemoryBackend::default());
    let workers = Arc::new(FixedPool::new(2, 256).unwrap());
    let backend_service: Arc<dyn BackendService> = backend.clone();
    let factory =
        InProcessChannel::pooled("memory", backend_service, Arc::clone(&workers)).into_factory();

    for mode in [WaitMode::Blocking, WaitMode::Sleeping, WaitMode::SpinWait] {
        let pool = Arc::new(ContextPool::new(3, factory.clone(), mode).unwrap());
        pool.start().unwrap();

        let (tx, rx) = mpsc::channel::<Result<u64, RpcStatus>>();
        for _ in 0..30 {
            let tx = tx.clone();
            pool.next_context().backend().protocol_version(move |r| {
                let _ = tx.send(r);
            });
        }
        for _ in 0..30 {
            let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(got, Ok(66));
        }

        pool.stop();
        join_within(Arc::clone(&pool), Duration::from_secs(5)).unwrap();
    }

    assert_eq!(backend.handle(Request::ProtocolVersion).unwrap(), Reply::Version(66));
    workers.shutdown();
    workers.join();
}

#[test]
fn test_every_callback_runs_once_across_stop() {
    for mode in WaitMode::ALL {
        let backend: Arc<dyn BackendService> = Arc::new(MemoryBackend::default());
        let workers = Arc::new(FixedPool::new(2, 4096).unwrap());
        let factory =
            InProcessChannel::pooled("memory", backend, Arc::clone(&workers)).into_factory();
        let pool = Arc::new(ContextPool::new(2, factory, mode).unwrap());
        pool.start().unwrap();

        let (tx, rx) = mpsc::channel::<Result<u64, RpcStatus>>();
        for i in 0..400 {
            if i == 200 {
                pool.stop();
            }
            let tx = tx.clone();
            pool.next_context().backend().net_version(move |r| {
                let _ = tx.send(r);
            });
        }
        drop(tx);

        join_within(Arc::clone(&pool), Duration::from_secs(5)).unwrap();
        workers.shutdown();
        workers.join();

        // Answered or cancelled, never lost and never twice
        let mut replies = Vec::new();
        while let Ok(reply) = rx.recv_timeout(Duration::from_secs(5)) {
            replies.push(reply);
        }
        assert_eq!(replies.len(), 400, "mode {}", mode);
        for reply in replies {
            match reply {
                Ok(version) => assert_eq!(version, 1),
                Err(status) => assert_eq!(status.code, StatusCode::Cancelled),
            }
        }
    }
}
