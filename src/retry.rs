// src/retry.rs

//! Retry decisions and backoff delays.
//!
//! The policy is stateless: the delay depends only on the task id, the
//! retry count and the configured base delay. Jitter is derived from a
//! hash of `(task id, retry count)` rather than a random source, so a given
//! task always backs off the same way and tests can assert exact bounds.

use std::time::Duration;

use crate::config::EngineConfig;
use crate::model::{Task, TaskId};

/// Largest exponent applied to the base delay.
const MAX_EXPONENT: u32 = 20;

/// Jitter spread around the nominal delay (±20%).
const JITTER_SPREAD: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    /// Double the delay for every retry already made.
    pub exponential: bool,
    /// Apply deterministic ±20% jitter.
    pub jitter: bool,
    /// Upper bound on a single delay, applied after jitter.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            exponential: true,
            jitter: true,
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            base_delay: cfg.retry_delay,
            exponential: cfg.exponential_backoff,
            jitter: cfg.retry_jitter,
            max_delay: cfg.max_retry_delay,
        }
    }

    pub fn should_retry(&self, task: &Task) -> bool {
        task.retry_count < task.max_retries
    }

    /// Delay before the next attempt of `task`, given the retries made so far.
    pub fn next_delay(&self, task: &Task) -> Duration {
        self.delay_for(&task.id, task.retry_count)
    }

    /// `base_delay * 2^retry_count`, jittered and capped.
    pub fn delay_for(&self, id: &TaskId, retry_count: u32) -> Duration {
        let nominal = if self.exponential {
            let factor = 1u32 << retry_count.min(MAX_EXPONENT);
            self.base_delay
                .checked_mul(factor)
                .unwrap_or(Duration::MAX)
        } else {
            self.base_delay
        };

        let jittered = if self.jitter {
            Duration::try_from_secs_f64(nominal.as_secs_f64() * jitter_factor(id, retry_count))
                .unwrap_or(Duration::MAX)
        } else {
            nominal
        };

        match self.max_delay {
            Some(cap) => jittered.min(cap),
            None => jittered,
        }
    }
}

/// Factor in `[0.8, 1.2]` derived from the task id and retry count.
fn jitter_factor(id: &TaskId, retry_count: u32) -> f64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(id.as_str().as_bytes());
    hasher.update(&retry_count.to_le_bytes());
    let hash = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    let unit = u64::from_le_bytes(bytes) as f64 / u64::MAX as f64;

    (1.0 - JITTER_SPREAD) + 2.0 * JITTER_SPREAD * unit
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(100),
            exponential: true,
            jitter,
            max_delay: None,
        }
    }

    #[test]
    fn exponential_without_jitter_doubles() {
        let p = policy(false);
        let id = TaskId::from("t");
        assert_eq!(p.delay_for(&id, 0), Duration::from_millis(100));
        assert_eq!(p.delay_for(&id, 1), Duration::from_millis(200));
        assert_eq!(p.delay_for(&id, 3), Duration::from_millis(800));
    }

    #[test]
    fn jitter_stays_within_twenty_percent_and_is_stable() {
        let p = policy(true);
        for name in ["a", "b", "build", "deploy-prod"] {
            let id = TaskId::from(name);
            for retry in 0..6 {
                let nominal = 100.0 * f64::from(1u32 << retry);
                let got = p.delay_for(&id, retry).as_secs_f64() * 1000.0;
                assert!(got >= nominal * 0.8 - 1e-3 && got <= nominal * 1.2 + 1e-3);
                assert_eq!(p.delay_for(&id, retry), p.delay_for(&id, retry));
            }
        }
    }

    #[test]
    fn jittered_delays_never_decrease() {
        let p = policy(true);
        let id = TaskId::from("flaky");
        let delays: Vec<Duration> = (0..8).map(|r| p.delay_for(&id, r)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn cap_and_linear_mode() {
        let mut p = policy(false);
        p.max_delay = Some(Duration::from_millis(250));
        let id = TaskId::from("t");
        assert_eq!(p.delay_for(&id, 5), Duration::from_millis(250));

        p.exponential = false;
        p.max_delay = None;
        assert_eq!(p.delay_for(&id, 5), Duration::from_millis(100));
    }

    #[test]
    fn huge_retry_counts_do_not_overflow() {
        let p = RetryPolicy {
            base_delay: Duration::from_secs(u64::MAX / 2),
            ..policy(false)
        };
        assert_eq!(p.delay_for(&TaskId::from("t"), 40), Duration::MAX);
    }
}
