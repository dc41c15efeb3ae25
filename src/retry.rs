//! Exponential backoff with jitter for polling loops.
//!
//! The certificate validator polls an external authority for DNS confirmation.
//! Fixed-interval polling either hammers the authority or wastes minutes of
//! wall clock; this module produces a bounded exponential delay sequence with
//! jitter so concurrent validations do not synchronize.
//!
//! # Example
//!
//! ```
//! use strata::retry::{Backoff, BackoffConfig};
//!
//! let mut backoff = Backoff::new(&BackoffConfig::default());
//! let first = backoff.next_delay();
//! let second = backoff.next_delay();
//! assert!(second >= first / 2); // jitter aside, delays grow
//! ```

use std::time::Duration;

use rand::Rng;

/// Configuration for an exponential backoff sequence.
///
/// Delays start at `initial_delay`, multiply by `multiplier` each step, and
/// never exceed `max_delay`. Each emitted delay is jittered to 0.5x-1.5x of
/// its nominal value.
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// First delay in the sequence
    pub initial_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
    /// Multiplier applied between steps
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Create a config starting at the given initial delay
    pub fn starting_at(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            ..Default::default()
        }
    }
}

/// A bounded exponential delay sequence with jitter.
///
/// Each call to [`next_delay`](Backoff::next_delay) returns the next jittered
/// delay and advances the sequence. The nominal (un-jittered) delay doubles
/// per step and is capped at the configured maximum.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    delay: Duration,
}

impl Backoff {
    /// Start a fresh sequence from the given configuration
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            config: config.clone(),
            delay: config.initial_delay,
        }
    }

    /// Return the next jittered delay and advance the sequence
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.delay;

        // Jitter: 0.5x to 1.5x of the nominal delay
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = Duration::from_secs_f64(nominal.as_secs_f64() * jitter);

        // Exponential growth, capped at max_delay
        self.delay = Duration::from_secs_f64(
            (nominal.as_secs_f64() * self.config.multiplier)
                .min(self.config.max_delay.as_secs_f64()),
        );

        jittered
    }

    /// Reset the sequence back to the initial delay
    pub fn reset(&mut self) {
        self.delay = self.config.initial_delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delay_is_jittered_initial() {
        let config = BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        };
        let mut backoff = Backoff::new(&config);

        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_millis(50));
        assert!(delay <= Duration::from_millis(150));
    }

    #[test]
    fn test_delays_grow_exponentially() {
        let config = BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        };
        let mut backoff = Backoff::new(&config);

        // Skip past the first few steps; the 4th nominal delay is 800ms,
        // so even with maximum downward jitter it exceeds 400ms.
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        let fourth = backoff.next_delay();
        assert!(fourth >= Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(200),
            multiplier: 10.0,
        };
        let mut backoff = Backoff::new(&config);

        for _ in 0..10 {
            let delay = backoff.next_delay();
            // 1.5x jitter over the 200ms cap
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_reset_returns_to_initial() {
        let config = BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        };
        let mut backoff = Backoff::new(&config);

        for _ in 0..8 {
            backoff.next_delay();
        }
        backoff.reset();

        let delay = backoff.next_delay();
        assert!(delay <= Duration::from_millis(15));
    }
}
