//! Environment variable utilities
//!
//! Two flavours:
//!
//! - `env_parse` fails loudly: a variable that is set but does not parse is
//!   a `ConfigError`. Used for everything that shapes the pool.
//! - `env_get` is lenient: unset or unparsable falls back to the default.
//!   Only for knobs where a typo must not keep the process from starting.
//!
//! ```ignore
//! use ctxpool_core::env::{env_get, env_parse};
//!
//! let contexts: Option<usize> = env_parse("CTXPOOL_NUM_CONTEXTS")?;
//! let mode: Option<WaitMode> = env_parse("CTXPOOL_WAIT_MODE")?;
//! let verbose: bool = env_get("CTXPOOL_VERBOSE", false);
//! ```

use std::str::FromStr;

use crate::error::ConfigError;

/// Parse an environment variable.
///
/// Returns `Ok(None)` when unset, `Ok(Some(v))` when set and parsable,
/// `Err(ConfigError::InvalidEnv)` otherwise. Surrounding whitespace is kept:
/// `" 4"` is not a number.
pub fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(raw)) => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: raw.to_string_lossy().into_owned(),
        }),
    }
}

/// Parse an environment variable, falling back to `default` when it is
/// unset or does not parse.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_parse(key).ok().flatten().unwrap_or(default)
}

// ============================================================================
// Tests
// ============================================================================
