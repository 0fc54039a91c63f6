use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Parameters for [`ExponentialBackoff`].
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay unit; attempt `n` waits `base * 2^n` before jitter.
    pub base: Duration,
    /// Upper bound of the uniform jitter added to each delay.
    pub max_jitter: Duration,
    /// The attempt counter returns to zero once it exceeds this value.
    pub ceiling: u32,
    /// Fixed jitter seed. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
            ceiling: 6,
            seed: None,
        }
    }
}

/// Exponential backoff with jitter for reconnection attempts.
///
/// Formula: base * 2^attempt + uniform(0, max_jitter), where `attempt` is
/// incremented before the delay is computed. The counter wraps back to zero
/// after passing `ceiling` rather than on a successful connection.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_jitter: Duration,
    ceiling: u32,
    attempt: u32,
    rng: StdRng,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl ExponentialBackoff {
    /// Create a new ExponentialBackoff.
    pub fn new(config: BackoffConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            base: config.base,
            max_jitter: config.max_jitter,
            ceiling: config.ceiling,
            attempt: 0,
            rng,
        }
    }

    /// Increment the attempt counter and calculate the delay for it.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);

        let exp_delay = self.base.saturating_mul(2u32.saturating_pow(self.attempt));
        let jitter_range = self.max_jitter.as_secs_f64();
        let jitter = if jitter_range > 0.0 {
            self.rng.gen_range(0.0..=jitter_range)
        } else {
            0.0
        };
        let delay = exp_delay.saturating_add(Duration::from_secs_f64(jitter));

        if self.attempt > self.ceiling {
            self.attempt = 0;
        }

        delay
    }

    /// Get current attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
