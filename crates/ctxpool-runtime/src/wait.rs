//! Idle backoff for cooperative context loops
//!
//! After every pass the loop reports how many units of work it executed.
//! A strategy turns that count into an [`IdleAction`], then performs it.
//! Splitting the decision from the action keeps the policies testable
//! without timing anything.
//!
//! | Mode        | Empty passes                                          |
//! |-------------|-------------------------------------------------------|
//! | `sleeping`  | spin 100, yield 100, then sleep 100µs doubling to 1ms |
//! | `yielding`  | spin 100, then yield forever                          |
//! | `spin_wait` | spin `4 << n` pauses for n < 10, then yield           |
//! | `busy_spin` | nothing                                               |
//!
//! `blocking` has no strategy: its loop parks in the reactor instead.

use std::thread;
use std::time::Duration;

use ctxpool_core::WaitMode;

/// What a strategy decided to do after one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// Return immediately.
    None,
    /// Execute `n` pause instructions.
    Spin(u32),
    /// Give up the remainder of the time slice.
    Yield,
    /// Sleep the thread.
    Sleep(Duration),
}

impl IdleAction {
    /// Perform the action on the calling thread.
    #[inline]
    pub fn perform(self) {
        match self {
            IdleAction::None => {}
            IdleAction::Spin(n) => {
                for _ in 0..n {
                    std::hint::spin_loop();
                }
            }
            IdleAction::Yield => thread::yield_now(),
            IdleAction::Sleep(d) => thread::sleep(d),
        }
    }
}

/// Backoff policy owned by exactly one context.
pub trait WaitStrategy: Send {
    /// Update the internal counters for a pass that executed
    /// `executed_count` units and return the chosen action.
    fn next_action(&mut self, executed_count: u32) -> IdleAction;

    /// Decide and perform in one call.
    #[inline]
    fn wait_once(&mut self, executed_count: u32) {
        self.next_action(executed_count).perform();
    }

    fn name(&self) -> &'static str;
}

/// Spin, then yield, then sleep with capped exponential growth.
#[derive(Debug)]
pub struct SleepingWaitStrategy {
    spin_budget: u32,
    yield_budget: u32,
    sleep: Duration,
}

impl SleepingWaitStrategy {
    pub const SPIN_PASSES: u32 = 100;
    pub const YIELD_PASSES: u32 = 100;
    pub const MIN_SLEEP: Duration = Duration::from_micros(100);
    pub const MAX_SLEEP: Duration = Duration::from_millis(1);

    pub fn new() -> Self {
        Self {
            spin_budget: Self::SPIN_PASSES,
            yield_budget: Self::YIELD_PASSES,
            sleep: Self::MIN_SLEEP,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn next_action(&mut self, executed_count: u32) -> IdleAction {
        if executed_count > 0 {
            self.reset();
            return IdleAction::None;
        }
        if self.spin_budget > 0 {
            self.spin_budget -= 1;
            return IdleAction::Spin(1);
        }
        if self.yield_budget > 0 {
            self.yield_budget -= 1;
            return IdleAction::Yield;
        }
        let sleep = self.sleep;
        self.sleep = (sleep * 2).min(Self::MAX_SLEEP);
        IdleAction::Sleep(sleep)
    }

    fn name(&self) -> &'static str {
        "sleeping"
    }
}

/// Spin through a budget of empty passes, then yield on every one.
#[derive(Debug)]
pub struct YieldingWaitStrategy {
    spin_budget: u32,
}

impl YieldingWaitStrategy {
    pub const SPIN_PASSES: u32 = 100;

    pub fn new() -> Self {
        Self {
            spin_budget: Self::SPIN_PASSES,
        }
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn next_action(&mut self, executed_count: u32) -> IdleAction {
        if executed_count > 0 {
            self.spin_budget = Self::SPIN_PASSES;
            return IdleAction::None;
        }
        if self.spin_budget > 0 {
            self.spin_budget -= 1;
            IdleAction::Spin(1)
        } else {
            IdleAction::Yield
        }
    }

    fn name(&self) -> &'static str {
        "yielding"
    }
}

/// Exponentially longer spin bursts, then yield.
#[derive(Debug, Default)]
pub struct SpinWaitWaitStrategy {
    count: u32,
}

impl SpinWaitWaitStrategy {
    /// Empty passes that still spin before falling back to yielding.
    pub const YIELD_THRESHOLD: u32 = 10;

    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for SpinWaitWaitStrategy {
    fn next_action(&mut self, executed_count: u32) -> IdleAction {
        if executed_count > 0 {
            self.count = 0;
            return IdleAction::None;
        }
        if self.count < Self::YIELD_THRESHOLD {
            let spins = 4u32 << self.count;
            self.count += 1;
            IdleAction::Spin(spins)
        } else {
            IdleAction::Yield
        }
    }

    fn name(&self) -> &'static str {
        "spin_wait"
    }
}

/// Never backs off. Burns one core per context.
#[derive(Debug, Default)]
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    #[inline]
    fn next_action(&mut self, _executed_count: u32) -> IdleAction {
        IdleAction::None
    }

    fn name(&self) -> &'static str {
        "busy_spin"
    }
}

/// Build the strategy for `mode`; `None` for [`WaitMode::Blocking`].
pub fn make_wait_strategy(mode: WaitMode) -> Option<Box<dyn WaitStrategy>> {
    match mode {
        WaitMode::Blocking => None,
        WaitMode::Sleeping => Some(Box::new(SleepingWaitStrategy::new())),
        WaitMode::Yielding => Some(Box::new(YieldingWaitStrategy::new())),
        WaitMode::SpinWait => Some(Box::new(SpinWaitWaitStrategy::new())),
        WaitMode::BusySpin => Some(Box::new(BusySpinWaitStrategy::new())),
    }
}
