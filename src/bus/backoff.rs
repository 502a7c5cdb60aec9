//! Exponential backoff for bus reconnection loops

use std::time::Duration;

use rand::Rng;

/// Tuning knobs for [`ExponentialBackoff`].
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Ceiling applied after exponential growth, in milliseconds
    pub max_delay_ms: u64,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Random spread around the computed delay (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Grows the retry delay exponentially between reconnect attempts.
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt: `initial * multiplier^attempt`,
    /// capped at the max, with jitter so a fleet of reconnecting
    /// processes does not stampede.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(16);
        self.attempt += 1;

        let base = self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent as i32);
        let capped = base.min(self.config.max_delay_ms as f64);

        let final_delay = if self.config.jitter_factor > 0.0 {
            let spread = capped * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-spread..=spread);
            (capped + jitter).max(1.0) as u64
        } else {
            capped.max(1.0) as u64
        };

        Duration::from_millis(final_delay)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
