//! Completion queue and the per-context end point draining it
//!
//! Transports finish remote calls by pushing a [`Completion`] into the queue
//! bound at call time. The owning context drains the queue:
//!
//! - cooperative loops call [`CompletionEndPoint::poll_one`] once per pass
//! - the blocking loop dedicates a helper thread to
//!   [`CompletionEndPoint::post_one`], which hands each completion to the
//!   reactor so handlers still run on the reactor thread
//!
//! Shutdown closes the queue, wakes every blocked consumer and runs the
//! leftovers with `ok = false`.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_queue::SegQueue;
use ctxpool_core::{Completion, CompletionSink, QueueError};
use tracing::trace;

use crate::parking::{new_parking, Parking};
use crate::reactor::Reactor;

/// MPSC queue of completions with a blocking pop.
pub struct CompletionQueue {
    queue: SegQueue<Completion>,
    closed: AtomicBool,
    /// Pushes that passed the `closed` check but have not landed yet.
    pushing: AtomicUsize,
    parking: Box<dyn Parking>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            closed: AtomicBool::new(false),
            pushing: AtomicUsize::new(0),
            parking: new_parking(),
        }
    }

    /// Pop without blocking. `None` if empty or shut down.
    pub fn try_next(&self) -> Option<Completion> {
        if self.is_shutdown() {
            return None;
        }
        self.queue.pop()
    }

    /// Pop, blocking until a completion arrives.
    ///
    /// Returns `None` once the queue is shut down. Completions still queued
    /// at that point belong to the shutdown drain.
    pub fn next(&self) -> Option<Completion> {
        loop {
            if let Some(completion) = self.try_next() {
                return Some(completion);
            }
            let token = self.parking.prepare();
            if self.is_shutdown() {
                return None;
            }
            if let Some(completion) = self.queue.pop() {
                return Some(completion);
            }
            self.parking.park(token, None);
        }
    }

    /// Close the queue and return everything still queued.
    ///
    /// Waits out pushes racing with the close, so nothing lands after the
    /// returned batch. Wakes every thread blocked in `next()`.
    pub fn shutdown(&self) -> Vec<Completion> {
        self.closed.store(true, Ordering::SeqCst);
        while self.pushing.load(Ordering::SeqCst) != 0 {
            thread::yield_now();
        }
        self.parking.unpark_all();

        let mut leftovers = Vec::new();
        while let Some(completion) = self.queue.pop() {
            leftovers.push(completion);
        }
        leftovers
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSink for CompletionQueue {
    fn push(&self, completion: Completion) -> Result<(), QueueError> {
        self.pushing.fetch_add(1, Ordering::SeqCst);
        if self.is_shutdown() {
            self.pushing.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Shutdown);
        }
        self.queue.push(completion);
        self.pushing.fetch_sub(1, Ordering::SeqCst);
        self.parking.unpark_one();
        Ok(())
    }
}

impl fmt::Display for CompletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "completion_queue({:p}, pending={}, shutdown={})",
            self,
            self.len(),
            self.is_shutdown()
        )
    }
}

/// Adapter between one context loop and its completion queue.
pub struct CompletionEndPoint {
    queue: Arc<CompletionQueue>,
    drained: AtomicUsize,
}

impl CompletionEndPoint {
    pub fn new(queue: Arc<CompletionQueue>) -> Self {
        Self {
            queue,
            drained: AtomicUsize::new(0),
        }
    }

    pub fn queue(&self) -> &Arc<CompletionQueue> {
        &self.queue
    }

    /// Run at most one ready completion with `ok = true`. Never blocks.
    pub fn poll_one(&self) -> usize {
        match self.queue.try_next() {
            Some(completion) => {
                completion.complete(true);
                1
            }
            None => 0,
        }
    }

    /// Block for one completion and post it onto `reactor`.
    ///
    /// Returns `true` once the queue is closed and the caller should exit.
    /// If the reactor already stopped, the completion runs here with
    /// `ok = false` instead of being posted to a reactor nobody drives.
    pub fn post_one(&self, reactor: &Reactor) -> bool {
        match self.queue.next() {
            Some(completion) => {
                if reactor.stopped() {
                    completion.complete(false);
                } else {
                    reactor.post(move || completion.complete(true));
                }
                false
            }
            None => true,
        }
    }

    /// Close the queue and run leftovers with `ok = false`. Idempotent.
    pub fn shutdown(&self) {
        let leftovers = self.queue.shutdown();
        if leftovers.is_empty() {
            return;
        }
        trace!(count = leftovers.len(), "draining completions");
        self.drained.fetch_add(leftovers.len(), Ordering::Relaxed);
        for completion in leftovers {
            completion.complete(false);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_shutdown()
    }

    /// Completions run with `ok = false` by `shutdown()` so far.
    pub fn drained(&self) -> usize {
        self.drained.load(Ordering::Relaxed)
    }
}

impl fmt::Display for CompletionEndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "end_point({:p}, closed={}, drained={})",
            self,
            self.is_closed(),
            self.drained()
        )
    }
}
