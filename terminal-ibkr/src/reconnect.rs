//! Reconnect policy for the tick stream
//!
//! Exponential backoff: `base_delay * 2^(attempt - 1)`, capped at
//! `max_delay`. With jitter enabled the delay is drawn uniformly from the
//! upper half of that window so that many dashboards restarted together do
//! not reconnect in lockstep.

use std::time::Duration;

use rand::Rng;

/// Reconnect delay base
const RECONNECT_DELAY_BASE: Duration = Duration::from_secs(1);

/// Reconnect delay ceiling
const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(30);

/// Max reconnect attempts
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// When and how often the feed session retries a lost connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay: RECONNECT_DELAY_BASE,
            max_delay: RECONNECT_DELAY_MAX,
            max_attempts: Some(MAX_RECONNECT_ATTEMPTS),
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect; the caller decides what to do after a disconnect
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-based)
    ///
    /// `None` once the policy has given up.
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled || attempt == 0 {
            return None;
        }
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }

        let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }

    /// Delay before retry number `attempt`, jittered if configured
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Option<Duration> {
        let ceiling = self.backoff(attempt)?;
        if !self.jitter {
            return Some(ceiling);
        }

        let ceiling_ms = ceiling.as_millis() as u64;
        let floor_ms = ceiling_ms / 2;
        Some(Duration::from_millis(rng.random_range(floor_ms..=ceiling_ms)))
    }
}
