//! Fallback parking using std::sync::Condvar
//!
//! Used on platforms without futex support.
//! Same event-count protocol, with the epoch guarded by the condvar mutex.

use super::Parking;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub struct CondvarParking {
    epoch: Mutex<u32>,
    condvar: Condvar,
    waiters: AtomicUsize,
}

impl CondvarParking {
    pub fn new() -> Self {
        Self {
            epoch: Mutex::new(0),
            condvar: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    fn bump(&self) {
        let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        *epoch = epoch.wrapping_add(1);
    }
}

impl Default for CondvarParking {
    fn default() -> Self {
        Self::new()
    }
}

impl Parking for CondvarParking {
    fn prepare(&self) -> u32 {
        *self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn park(&self, token: u32, timeout: Option<Duration>) -> bool {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        // A timeout past Instant's range waits without a deadline
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        while *epoch == token {
            epoch = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    self.condvar
                        .wait_timeout(epoch, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .condvar
                    .wait(epoch)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
        let woken = *epoch != token;
        drop(epoch);

        self.waiters.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn unpark_one(&self) {
        self.bump();
        self.condvar.notify_one();
    }

    fn unpark_all(&self) {
        self.bump();
        self.condvar.notify_all();
    }

    fn parked_count(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }
}
