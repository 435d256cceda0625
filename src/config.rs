//! Loop configuration
//!
//! Library defaults, with optional environment overrides:
//!
//! ```no_run
//! use crosscall::{DrainPolicy, EventLoop, LoopConfig};
//! use std::time::Duration;
//!
//! let config = LoopConfig::from_env()
//!     .drain(DrainPolicy::WholeQueue)
//!     .max_wait(Duration::from_secs(5));
//! let mut lp = EventLoop::with_config(config);
//! lp.run();
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Library defaults
pub mod defaults {
    use super::DrainPolicy;

    /// Queued deliveries per loop pass
    pub const DRAIN: DrainPolicy = DrainPolicy::OnePerTick;

    /// Longest single blocking wait in `EventLoop::run`
    pub const MAX_WAIT_MS: u64 = 60_000;
}

/// How a loop's dispatcher drains its call queue
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DrainPolicy {
    /// Deliver one queued call per wake, then re-arm an idle task to
    /// deliver the next one on the following loop pass.  A flood of
    /// queued calls can't starve the rest of the loop.
    OnePerTick,

    /// Deliver every queued call in one go each time the dispatcher
    /// is woken.  Lower latency for bursts, but a long queue holds
    /// the loop until it is empty.
    WholeQueue,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        defaults::DRAIN
    }
}

impl FromStr for DrainPolicy {
    type Err = ();

    /// Accepts `one` or `all` (case-insensitive), plus the variant
    /// names themselves
    fn from_str(s: &str) -> Result<Self, ()> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("one") || s.eq_ignore_ascii_case("OnePerTick") {
            Ok(Self::OnePerTick)
        } else if s.eq_ignore_ascii_case("all") || s.eq_ignore_ascii_case("WholeQueue") {
            Ok(Self::WholeQueue)
        } else {
            Err(())
        }
    }
}

/// Per-loop configuration, builder style
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Drain strategy for the loop's queued-callback dispatcher
    pub drain: DrainPolicy,
    /// Upper bound on one blocking wait inside `EventLoop::run`
    pub max_wait: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopConfig {
    /// Library defaults, ignoring the environment
    pub fn new() -> Self {
        Self {
            drain: defaults::DRAIN,
            max_wait: Duration::from_millis(defaults::MAX_WAIT_MS),
        }
    }

    /// Library defaults with environment overrides applied.
    ///
    /// Environment variables (all optional):
    /// - `CROSSCALL_DRAIN` - `one` or `all`
    /// - `CROSSCALL_MAX_WAIT_MS` - longest blocking wait in milliseconds
    ///
    /// Values that don't parse are ignored.
    pub fn from_env() -> Self {
        Self::new()
            .drain(env_get("CROSSCALL_DRAIN", defaults::DRAIN))
            .max_wait(Duration::from_millis(env_get(
                "CROSSCALL_MAX_WAIT_MS",
                defaults::MAX_WAIT_MS,
            )))
    }

    /// Set the drain policy
    pub fn drain(mut self, drain: DrainPolicy) -> Self {
        self.drain = drain;
        self
    }

    /// Set the longest single blocking wait.  Zero is raised to 1ms
    /// so that `run` can't spin.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait.max(Duration::from_millis(1));
        self
    }
}

fn env_get<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
