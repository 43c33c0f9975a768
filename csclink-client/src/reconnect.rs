//! Reconnection pacing
//!
//! When a ready connection drops unexpectedly, the connection retries on its
//! own. The strategy decides how long to wait before each attempt:
//!
//! - **TieredBackoff** (default): fast at first, then progressively calmer,
//!   never giving up
//! - **FixedDelay**: a constant delay, optionally bounded
//!
//! The same strategy paces the retries of a connect attempt whose socket
//! closes before it finished opening.
//!
//! # Examples
//!
//! ```rust
//! use csclink_client::{ReconnectionStrategy, TieredBackoff};
//! use std::time::Duration;
//!
//! let schedule = TieredBackoff::default();
//! assert_eq!(schedule.next_delay(1), Some(Duration::from_millis(50)));
//! assert_eq!(schedule.next_delay(100), Some(Duration::from_secs(10)));
//! ```

use std::time::Duration;

/// Decides the delay before a reconnection attempt
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before attempt number `attempt` (1-based)
    ///
    /// Returning `None` abandons reconnection.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Tiered schedule tuned for a validating node restart
///
/// | attempts | rate | covers |
/// |---|---|---|
/// | 1..=39 | 20 per second | about 2 seconds |
/// | 40..=99 | 1 per second | about a minute |
/// | 100..=159 | 1 per 10 seconds | about 10 minutes |
/// | 160.. | 1 per 30 seconds | indefinitely |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TieredBackoff {
    tiers: [(u32, Duration); 3],
    tail: Duration,
}

impl Default for TieredBackoff {
    fn default() -> Self {
        Self {
            tiers: [
                (40, Duration::from_millis(1000 / 20)),
                (40 + 60, Duration::from_secs(1)),
                (40 + 60 + 60, Duration::from_secs(10)),
            ],
            tail: Duration::from_secs(30),
        }
    }
}

impl TieredBackoff {
    /// The delay for an attempt; never gives up
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.tiers
            .iter()
            .find(|(below, _)| attempt < *below)
            .map(|(_, delay)| *delay)
            .unwrap_or(self.tail)
    }
}

impl ReconnectionStrategy for TieredBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        Some(self.delay_for(attempt))
    }
}

/// Constant delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Retry every `delay`, forever
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Give up after `max_attempts` attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt > max => None,
            _ => Some(self.delay),
        }
    }
}
