//! Reconnect backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::{duration_ms, RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY, RECONNECT_MAX_JITTER};

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay.
    #[serde(with = "duration_ms")]
    pub base: Duration,
    /// Delay ceiling, before jitter.
    #[serde(with = "duration_ms")]
    pub max: Duration,
    /// Upper bound of the random jitter added to each delay.
    #[serde(with = "duration_ms")]
    pub max_jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: RECONNECT_BASE_DELAY,
            max: RECONNECT_MAX_DELAY,
            max_jitter: RECONNECT_MAX_JITTER,
        }
    }
}

/// Exponential backoff: base, 2×base, 4×base, … capped at `max`, plus jitter.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ReconnectBackoff {
    /// Create a backoff at attempt zero.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay for `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.config
            .base
            .checked_mul(factor)
            .map_or(self.config.max, |delay| delay.min(self.config.max))
    }

    /// Delay before the next attempt, with random jitter.
    pub fn next_delay(&mut self) -> Duration {
        let max_jitter = u64::try_from(self.config.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter));
        self.next_delay_with_jitter(jitter)
    }

    /// Delay before the next attempt, with the given jitter (clamped to the
    /// configured bound).
    pub fn next_delay_with_jitter(&mut self, jitter: Duration) -> Duration {
        let delay = self.base_delay(self.attempt) + jitter.min(self.config.max_jitter);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Back to attempt zero. Called after every successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
