//! Thread parking for idle event loops
//!
//! Used wherever a context thread must block: `Reactor::run` waiting for
//! handlers or timers, and `CompletionQueue::next` waiting for completions.
//!
//! The protocol is an event count, so wakeups are never lost:
//!
//! ```text
//! consumer                          producer
//! --------                          --------
//! token = parking.prepare()
//! if work available { return }      publish work
//! parking.park(token, timeout)      parking.unpark_one()
//! ```
//!
//! `park` returns immediately if any `unpark_*` happened after `prepare`.

use std::time::Duration;

/// Platform-specific parking primitive.
pub trait Parking: Send + Sync {
    /// Snapshot the wake epoch. Call before re-checking the wait condition.
    fn prepare(&self) -> u32;

    /// Sleep until the epoch moves past `token` or the timeout elapses.
    ///
    /// Returns `true` if woken by an unpark, `false` on timeout or spurious
    /// wakeup. Callers must re-check their condition either way.
    fn park(&self, token: u32, timeout: Option<Duration>) -> bool;

    /// Advance the epoch and wake one parked thread.
    fn unpark_one(&self);

    /// Advance the epoch and wake every parked thread.
    fn unpark_all(&self);

    /// Number of currently parked threads (hint, may be stale)
    fn parked_count(&self) -> usize;
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::CondvarParking as PlatformParking;
    }
}

/// Create a new platform-appropriate parking instance
pub fn new_parking() -> Box<dyn Parking> {
    Box::new(PlatformParking::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_park_timeout() {
        let parking = new_parking();
        let token = parking.prepare();
        let start = Instant::now();
        let woken = parking.park(token, Some(Duration::from_millis(50)));
        let elapsed = start.elapsed();

        assert!(!woken || elapsed < Duration::from_millis(100));
        assert!(elapsed >= Duration::from_millis(40));
    }

    #[test]
    fn test_unpark_before_park_is_not_lost() {
        let parking = new_parking();
        let token = parking.prepare();
        parking.unpark_one();

        let start = Instant::now();
        parking.park(token, Some(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_unpark_one_wakes_parked_thread() {
        let parking = Arc::new(PlatformParking::new());
        let parking2 = Arc::clone(&parking);

        let handle = thread::spawn(move || {
            let token = parking2.prepare();
            parking2.park(token, Some(Duration::from_secs(10)))
        });

        // Give thread time to park
        while parking.parked_count() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        parking.unpark_one();

        let start = Instant::now();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_unbounded_timeout_still_wakes() {
        let parking = Arc::new(PlatformParking::new());
        let parking2 = Arc::clone(&parking);

        let handle = thread::spawn(move || {
            let token = parking2.prepare();
            parking2.park(token, Some(Duration::MAX))
        });

        while parking.parked_count() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        parking.unpark_all();
        assert!(handle.join().unwrap());
    }
}
