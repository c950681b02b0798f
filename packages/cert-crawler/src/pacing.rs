//! Suspension points: breaker cooldown, inter-iteration pacing and periodic
//! breaks. All waits go through [`Sleeper`] so tests can observe them.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{BreakerConfig, PacingConfig};

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real waits on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Counts consecutive fetch failures and trips once the threshold is hit.
///
/// This de-escalates sustained upstream throttling. It is not a per-job
/// retry: the failed job is still marked `error`.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            threshold: config.threshold.max(1),
            cooldown: config.cooldown,
            consecutive_failures: 0,
        }
    }

    /// Record a failure. Returns `true` when the breaker has tripped.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.consecutive_failures >= self.threshold
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

/// Randomized delay between run-loop iterations.
#[derive(Debug, Clone)]
pub struct Pacer {
    config: PacingConfig,
    iterations: u64,
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            iterations: 0,
        }
    }

    /// Delay to apply after the next iteration: uniform jitter in
    /// `[min, max]`, plus the long break every `break_every` iterations.
    pub fn next_delay(&mut self, rng: &mut fastrand::Rng) -> Duration {
        self.iterations += 1;

        let min = self.config.min.as_millis() as u64;
        let max = self.config.max.as_millis() as u64;
        let mut delay = Duration::from_millis(rng.u64(min..=max.max(min)));

        if self.config.break_every > 0 && self.iterations % self.config.break_every == 0 {
            info!(
                iterations = self.iterations,
                break_secs = self.config.break_duration.as_secs(),
                "periodic break"
            );
            delay += self.config.break_duration;
        }

        delay
    }

    pub async fn pause(&mut self, rng: &mut fastrand::Rng, sleeper: &dyn Sleeper) {
        let delay = self.next_delay(rng);
        debug!(delay_ms = delay.as_millis() as u64, "pacing");
        sleeper.sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_trips_at_threshold() {
        let mut breaker = CircuitBreaker::new(BreakerConfig {
            threshold: 3,
            cooldown: Duration::from_secs(600),
        });

        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(breaker.record_failure());
        assert_eq!(breaker.consecutive_failures(), 3);

        breaker.reset();
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_success_clears_failures() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert!(!breaker.record_failure());
    }

    #[test]
    fn test_pacing_stays_in_range() {
        let mut pacer = Pacer::new(PacingConfig {
            min: Duration::from_secs(20),
            max: Duration::from_secs(30),
            break_every: 0,
            break_duration: Duration::from_secs(60),
        });
        let mut rng = fastrand::Rng::with_seed(7);

        for _ in 0..100 {
            let delay = pacer.next_delay(&mut rng);
            assert!(delay >= Duration::from_secs(20));
            assert!(delay <= Duration::from_secs(30));
        }
    }

    #[test]
    fn test_periodic_break() {
        let mut pacer = Pacer::new(PacingConfig {
            min: Duration::ZERO,
            max: Duration::ZERO,
            break_every: 3,
            break_duration: Duration::from_secs(60),
        });
        let mut rng = fastrand::Rng::with_seed(1);

        let delays: Vec<Duration> = (0..6).map(|_| pacer.next_delay(&mut rng)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::ZERO,
                Duration::from_secs(60),
                Duration::ZERO,
                Duration::ZERO,
                Duration::from_secs(60),
            ]
        );
    }
}
