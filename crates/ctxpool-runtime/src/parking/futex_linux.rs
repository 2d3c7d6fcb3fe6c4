//! Linux futex-based parking
//!
//! Futex word = wake epoch. Parkers `FUTEX_WAIT` on the epoch they observed;
//! unparkers bump the epoch and `FUTEX_WAKE`. The kernel compares the word
//! atomically with the sleep, so a bump between `prepare` and `park` turns
//! the wait into an immediate `EAGAIN` return.
//!
//! `waiters` lets unparkers skip the syscall when nobody sleeps. Both sides
//! use SeqCst so that either the unparker sees the waiter or the waiter's
//! futex check sees the new epoch.

use super::Parking;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

pub struct FutexParking {
    epoch: AtomicU32,
    waiters: AtomicUsize,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            epoch: AtomicU32::new(0),
            waiters: AtomicUsize::new(0),
        }
    }

    fn wake(&self, count: i32) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.epoch.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl Parking for FutexParking {
    fn prepare(&self) -> u32 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn park(&self, token: u32, timeout: Option<Duration>) -> bool {
        self.waiters.fetch_add(1, Ordering::SeqCst);

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: libc::time_t::try_from(d.as_secs()).unwrap_or(libc::time_t::MAX),
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // Sleeps only while epoch == token.
        let result = unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.epoch.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                token,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            )
        };

        self.waiters.fetch_sub(1, Ordering::SeqCst);

        // EAGAIN means the epoch already moved: that is a wake, not a timeout.
        result == 0 || self.epoch.load(Ordering::SeqCst) != token
    }

    fn unpark_one(&self) {
        self.wake(1);
    }

    fn unpark_all(&self) {
        self.wake(i32::MAX);
    }

    fn parked_count(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }
}
