//! Reactor - per-context executor for posted handlers and timers
//!
//! Each execution context owns one reactor. Handlers are posted from any
//! thread and always run on the thread driving the reactor, either through
//! [`Reactor::poll_one`] (cooperative loops) or [`Reactor::run`] (blocking
//! loop).
//!
//! # Outstanding work
//!
//! The reactor counts queued handlers, pending timers and live
//! [`WorkGuard`]s. When the count drops to zero the reactor stops itself,
//! so a context keeps a guard for its whole lifetime.
//!
//! # Stop
//!
//! `stop()` is monotonic: once stopped, `poll_one` and `run` return
//! immediately. Handlers and timers still queued are dropped by the first
//! `stop()`, and anything posted afterwards is dropped on arrival. A handler
//! that owns a callback can therefore observe the stop through `Drop`.

use core::fmt;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;

use crate::parking::{new_parking, Parking};

/// A unit of work posted to a reactor.
pub type Handler = Box<dyn FnOnce() + Send + 'static>;

/// Timer entry, ordered as a min-heap by deadline then insertion order.
struct Timer {
    deadline: Instant,
    seq: u64,
    handler: Handler,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct ReactorInner {
    ready: SegQueue<Handler>,
    timers: Mutex<BinaryHeap<Timer>>,
    timer_seq: AtomicU64,
    outstanding: AtomicUsize,
    stopped: AtomicBool,
    parking: Box<dyn Parking>,
}

impl ReactorInner {
    fn timers(&self) -> MutexGuard<'_, BinaryHeap<Timer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Expired timers first, then posted handlers.
    fn pop_ready(&self) -> Option<Handler> {
        {
            let mut timers = self.timers();
            if timers
                .peek()
                .is_some_and(|t| t.deadline <= Instant::now())
            {
                return timers.pop().map(|t| t.handler);
            }
        }
        self.ready.pop()
    }

    fn has_ready(&self) -> bool {
        if !self.ready.is_empty() {
            return true;
        }
        self.timers()
            .peek()
            .is_some_and(|t| t.deadline <= Instant::now())
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers().peek().map(|t| t.deadline)
    }

    fn work_started(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    fn work_finished(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.stop();
        }
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.parking.unpark_all();
            self.discard();
        }
    }

    /// Drop every queued handler and timer. Only called once stopped, when
    /// no loop pops any more.
    fn discard(&self) -> usize {
        // Taken under the lock, dropped outside it: a dropped handler may post
        let timers = std::mem::take(&mut *self.timers());
        let mut dropped = timers.len();
        drop(timers);
        while let Some(handler) = self.ready.pop() {
            drop(handler);
            dropped += 1;
        }
        if dropped > 0 {
            self.outstanding.fetch_sub(dropped, Ordering::SeqCst);
        }
        dropped
    }
}

/// Deadline `delay` from now, saturating at roughly a century out.
fn far_deadline(delay: Duration) -> Instant {
    const NEVER: Duration = Duration::from_secs(100 * 365 * 24 * 3600);
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(NEVER))
        .unwrap_or(now)
}

/// Cheaply cloneable handle to one reactor.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<ReactorInner>,
}

impl Reactor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ReactorInner {
                ready: SegQueue::new(),
                timers: Mutex::new(BinaryHeap::new()),
                timer_seq: AtomicU64::new(0),
                outstanding: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
                parking: new_parking(),
            }),
        }
    }

    /// Queue `handler` to run on the reactor thread.
    pub fn post<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.work_started();
        self.inner.ready.push(Box::new(handler));
        if self.stopped() {
            self.inner.discard();
            return;
        }
        self.inner.parking.unpark_one();
    }

    /// Run `handler` on the reactor thread once `delay` has elapsed.
    ///
    /// A delay past the end of `Instant`'s range never fires; the timer only
    /// keeps the reactor busy until it is stopped.
    pub fn post_after<F>(&self, delay: Duration, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.work_started();
        let timer = Timer {
            deadline: far_deadline(delay),
            seq: self.inner.timer_seq.fetch_add(1, Ordering::Relaxed),
            handler: Box::new(handler),
        };
        self.inner.timers().push(timer);
        if self.stopped() {
            self.inner.discard();
            return;
        }
        // The new deadline may be earlier than the one a parked run() sleeps on
        self.inner.parking.unpark_one();
    }

    /// Run at most one ready handler. Returns the number run (0 or 1).
    ///
    /// Stops the reactor if it has no outstanding work at all.
    pub fn poll_one(&self) -> usize {
        if self.stopped() {
            return 0;
        }
        if let Some(handler) = self.inner.pop_ready() {
            handler();
            self.inner.work_finished();
            return 1;
        }
        if self.inner.outstanding.load(Ordering::SeqCst) == 0 {
            self.inner.stop();
        }
        0
    }

    /// Run handlers until the reactor is stopped or runs out of work.
    ///
    /// Parks between passes until a post, the next timer deadline or a stop.
    /// Returns the number of handlers run.
    pub fn run(&self) -> usize {
        let mut executed = 0;
        loop {
            if self.stopped() {
                break;
            }
            if let Some(handler) = self.inner.pop_ready() {
                handler();
                self.inner.work_finished();
                executed += 1;
                continue;
            }
            if self.inner.outstanding.load(Ordering::SeqCst) == 0 {
                self.inner.stop();
                break;
            }

            let token = self.inner.parking.prepare();
            if self.stopped() || self.inner.has_ready() {
                continue;
            }
            let timeout = self
                .inner
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()));
            self.inner.parking.park(token, timeout);
        }
        executed
    }

    /// Stop the reactor. Wakes a parked `run()` and drops every handler and
    /// timer still queued, on the calling thread. Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    #[inline]
    pub fn stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Keep the reactor alive while the returned guard exists.
    pub fn work_guard(&self) -> WorkGuard {
        self.inner.work_started();
        WorkGuard {
            reactor: self.clone(),
        }
    }

    /// Queued handlers plus pending timers plus live guards.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Relaxed)
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reactor({:p}, outstanding={}, stopped={})",
            Arc::as_ptr(&self.inner),
            self.outstanding(),
            self.stopped()
        )
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Keep-alive token: while held, the reactor never runs out of work.
#[must_use = "the reactor stops itself once the guard is dropped and no work is left"]
pub struct WorkGuard {
    reactor: Reactor,
}

impl WorkGuard {
    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.reactor.inner.work_finished();
    }
}

impl fmt::Debug for WorkGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkGuard({})", self.reactor)
    }
}
