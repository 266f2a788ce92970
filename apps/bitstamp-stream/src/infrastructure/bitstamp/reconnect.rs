//! Reconnect Backoff
//!
//! Exponential backoff with jitter, used by the supervisor between failed
//! connection attempts. A reconnect requested by the server skips the
//! backoff entirely; only handshake failures are delayed.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::StreamSettings;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay (before jitter).
    pub max_delay: Duration,
    /// Growth factor per attempt. Values below 1.0 are treated as 1.0.
    pub multiplier: f64,
    /// Random spread as a fraction of the delay (0.2 = ±20%).
    pub jitter: f64,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 0,
        }
    }
}

impl BackoffConfig {
    /// Backoff parameters from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect.delay_initial,
            max_delay: settings.reconnect.delay_max,
            multiplier: settings.reconnect.delay_multiplier,
            max_attempts: settings.reconnect.max_attempts,
            ..Self::default()
        }
    }

    /// Disable jitter. Delays become deterministic.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }
}

/// Tracks consecutive failed attempts and yields the wait before the next.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    /// Start a fresh backoff sequence.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Register a failed attempt and return how long to wait.
    ///
    /// Returns `None` once `max_attempts` failures have been registered.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        let base = self.base_delay(self.attempts);
        self.attempts += 1;
        Some(self.jittered(base))
    }

    /// Forget previous failures after a successful connection.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Failures registered since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the attempt budget is used up.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.config.max_attempts != 0 && self.attempts >= self.config.max_attempts
    }

    /// Configured attempt budget (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let initial_ms = self.config.initial_delay.as_millis() as f64;
        #[allow(clippy::cast_precision_loss)]
        let cap_ms = self.config.max_delay.as_millis() as f64;
        let factor = self.config.multiplier.max(1.0);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);

        let millis = (initial_ms * factor.powi(exponent)).round();
        if millis.is_finite() && millis < cap_ms {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let millis = millis as u64;
            Duration::from_millis(millis)
        } else {
            self.config.max_delay
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let spread = self.config.jitter.clamp(0.0, 1.0);
        if spread <= 0.0 || delay.is_zero() {
            return delay;
        }
        let offset = rand::rng().random_range(-spread..=spread);
        delay.mul_f64(1.0 + offset)
    }
}
