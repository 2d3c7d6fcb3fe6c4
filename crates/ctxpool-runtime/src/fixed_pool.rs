//! `FixedPool` - worker threads serving the in-process backend
//!
//! Spawns N OS threads at creation. Workers dequeue boxed jobs from a
//! bounded lock-free queue and park when it is empty. Used by
//! `InProcessChannel` to answer calls off the caller's thread, the way a
//! remote backend would.
//!
//! No dynamic scaling. `shutdown()` stops intake and wakes every worker;
//! `join()` waits for them after the queue drains.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crossbeam_queue::ArrayQueue;
use ctxpool_core::PoolError;
use tracing::{debug, warn};

use crate::parking::{new_parking, Parking};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Why a job was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// `shutdown()` was called.
    Shutdown,
    /// The queue holds `queue_depth` jobs already.
    Full,
}

/// Shared state between producers and workers.
struct PoolInner {
    jobs: ArrayQueue<Job>,
    /// Number of workers currently running a job.
    active: AtomicUsize,
    /// Enqueues that passed the `shutdown` check but have not pushed yet.
    enqueuing: AtomicUsize,
    shutdown: AtomicBool,
    parking: Box<dyn Parking>,
    total: usize,
}

pub struct FixedPool {
    inner: Arc<PoolInner>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl FixedPool {
    /// Create a pool with `n` workers (clamped to 1..=64).
    ///
    /// `queue_depth`: max pending jobs before enqueue fails.
    pub fn new(n: usize, queue_depth: usize) -> Result<Self, PoolError> {
        let n = n.clamp(1, 64);
        let inner = Arc::new(PoolInner {
            jobs: ArrayQueue::new(queue_depth.max(1)),
            active: AtomicUsize::new(0),
            enqueuing: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            parking: new_parking(),
            total: n,
        });

        let mut handles = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker_inner = Arc::clone(&inner);
            let spawned = thread::Builder::new()
                .name(format!("backend-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_inner, worker_id));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    // Release the workers already running
                    inner.shutdown.store(true, Ordering::SeqCst);
                    inner.parking.unpark_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn { index: worker_id, source });
                }
            }
        }

        debug!(workers = n, queue_depth, "backend pool started");
        Ok(FixedPool {
            inner,
            handles: Mutex::new(handles),
        })
    }

    /// Default sizing: min(8, nproc/2), at least 2.
    pub fn auto_sized(queue_depth: usize) -> Result<Self, PoolError> {
        let cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new((cpus / 2).clamp(2, 8), queue_depth)
    }

    /// Queue `job`. A job accepted here always runs, even if `shutdown()`
    /// races with this call.
    pub fn enqueue<F>(&self, job: F) -> Result<(), EnqueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.enqueuing.fetch_add(1, Ordering::SeqCst);
        let pushed = if self.inner.shutdown.load(Ordering::SeqCst) {
            Err(EnqueueError::Shutdown)
        } else {
            self.inner
                .jobs
                .push(Box::new(job))
                .map_err(|_| EnqueueError::Full)
        };
        self.inner.enqueuing.fetch_sub(1, Ordering::SeqCst);
        pushed?;
        self.inner.parking.unpark_one();
        Ok(())
    }

    pub fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    pub fn total_workers(&self) -> usize {
        self.inner.total
    }

    pub fn pending(&self) -> usize {
        self.inner.jobs.len()
    }

    /// Stop intake and wake idle workers. Queued jobs still run.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.parking.unpark_all();
    }

    /// Wait for every worker to exit. Call after `shutdown()`.
    pub fn join(&self) {
        let handles = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if handle.join().is_err() {
                warn!("backend worker panicked");
            }
        }
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        // Workers exit after draining. Not joined here: call
        // shutdown() + join() explicitly to wait for them.
        self.shutdown();
    }
}

/// Worker thread main loop.
fn worker_loop(inner: Arc<PoolInner>, worker_id: usize) {
    loop {
        if let Some(job) = inner.jobs.pop() {
            inner.active.fetch_add(1, Ordering::Relaxed);
            job();
            inner.active.fetch_sub(1, Ordering::Relaxed);
            continue;
        }

        let token = inner.parking.prepare();
        if inner.shutdown.load(Ordering::SeqCst) {
            // An enqueue in flight may still land a job
            if inner.enqueuing.load(Ordering::SeqCst) == 0 && inner.jobs.is_empty() {
                break;
            }
            thread::yield_now();
            continue;
        }
        if !inner.jobs.is_empty() {
            continue;
        }
        inner.parking.park(token, None);
    }
    debug!(worker_id, "backend worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::{Duration, Instant};

    #[test]
    fn test_jobs_run_on_workers() {
        let pool = FixedPool::new(2, 64).unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        for _ in 0..32 {
            let hits = Arc::clone(&hits);
            pool.enqueue(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        let start = Instant::now();
        while hits.load(Ordering::SeqCst) < 32 {
            assert!(start.elapsed() < Duration::from_secs(5));
            thread::sleep(Duration::from_millis(1));
        }
        pool.shutdown();
        pool.join();
    }

    #[test]
    fn test_enqueue_after_shutdown() {
        let pool = FixedPool::new(1, 4).unwrap();
        pool.shutdown();
        assert_eq!(pool.enqueue(|| {}), Err(EnqueueError::Shutdown));
        pool.join();
    }

    #[test]
    fn test_accepted_jobs_run_despite_racing_shutdown() {
        let pool = Arc::new(FixedPool::new(2, 1 << 16).unwrap());
        let accepted = Arc::new(AtomicU32::new(0));
        let ran = Arc::new(AtomicU32::new(0));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let (pool, accepted, ran) =
                    (Arc::clone(&pool), Arc::clone(&accepted), Arc::clone(&ran));
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let ran = Arc::clone(&ran);
                        let job = move || {
                            ran.fetch_add(1, Ordering::SeqCst);
                        };
                        match pool.enqueue(job) {
                            Ok(()) => {
                                accepted.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(EnqueueError::Shutdown) => break,
                            Err(EnqueueError::Full) => panic!("queue sized for every job"),
                        }
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(1));
        pool.shutdown();
        pool.join();
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(ran.load(Ordering::SeqCst), accepted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_full_queue_rejects() {
        let pool = FixedPool::new(1, 1).unwrap();
        let gate = Arc::new(AtomicBool::new(false));
        let started = Arc::new(AtomicBool::new(false));
        {
            let (gate, started) = (Arc::clone(&gate), Arc::clone(&started));
            pool.enqueue(move || {
                started.store(true, Ordering::SeqCst);
                while !gate.load(Ordering::SeqCst) {
                    thread::yield_now();
                }
            })
            .unwrap();
        }
        while !started.load(Ordering::SeqCst) {
            thread::yield_now();
        }

        pool.enqueue(|| {}).unwrap();
        assert_eq!(pool.enqueue(|| {}), Err(EnqueueError::Full));

        gate.store(true, Ordering::SeqCst);
        pool.shutdown();
        pool.join();
        assert_eq!(pool.pending(), 0);
    }
}
