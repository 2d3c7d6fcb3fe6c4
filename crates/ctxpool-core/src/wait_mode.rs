//! Wait mode: the backoff discipline of every execution context in a pool.
//!
//! Parsed once from configuration with a case-sensitive literal match.
//! Unknown text is a configuration error, never a silent default.

use core::fmt;
use core::str::FromStr;

use crate::error::ConfigError;

/// How an execution context behaves when it finds no ready work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WaitMode {
    /// Two threads per context, both blocking on their event source.
    #[default]
    Blocking,
    /// Spin, then yield, then sleep with capped backoff.
    Sleeping,
    /// Spin briefly, then yield the processor on every empty pass.
    Yielding,
    /// Bounded exponential spinning before falling back to yielding.
    SpinWait,
    /// Never yield or sleep. Pins one core per context.
    BusySpin,
}

impl WaitMode {
    /// Every mode, in declaration order.
    pub const ALL: [WaitMode; 5] = [
        WaitMode::Blocking,
        WaitMode::Sleeping,
        WaitMode::Yielding,
        WaitMode::SpinWait,
        WaitMode::BusySpin,
    ];

    /// The literal accepted by `FromStr` for this mode.
    pub const fn as_str(&self) -> &'static str {
        match self {
            WaitMode::Blocking => "blocking",
            WaitMode::Sleeping => "sleeping",
            WaitMode::Yielding => "yielding",
            WaitMode::SpinWait => "spin_wait",
            WaitMode::BusySpin => "busy_spin",
        }
    }

    /// True if this mode runs the cooperative single-thread loop.
    #[inline]
    pub const fn is_cooperative(&self) -> bool {
        !matches!(self, WaitMode::Blocking)
    }
}

impl FromStr for WaitMode {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "blocking" => Ok(WaitMode::Blocking),
            "sleeping" => Ok(WaitMode::Sleeping),
            "yielding" => Ok(WaitMode::Yielding),
            "spin_wait" => Ok(WaitMode::SpinWait),
            "busy_spin" => Ok(WaitMode::BusySpin),
            other => Err(ConfigError::UnknownWaitMode(other.to_string())),
        }
    }
}

impl fmt::Display for WaitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
