//! Retry Policies - backoff for transient node failures
//!
//! A [`RetryPolicy`] pairs a maximum attempt count with a [`BackoffStrategy`].
//! The orchestrator consults it only when a node returns a failure with
//! `is_transient = true`; permanent failures never retry, whatever the policy.
//!
//! # Backoff Strategies
//!
//! ```text
//! attempt n          0    1     2     3     4
//! Constant(1s)       0    1s    1s    1s    1s
//! Linear(1s)         0    1s    2s    3s    4s
//! Exponential(1s,2x,max 10s)
//!                    0    2s    4s    8s    10s
//! JitteredExponential: Exponential * uniform[0.5, 1.5]
//! ```
//!
//! `get_delay(0)` is always zero: there is no wait before the first attempt.
//! Attempt `n` is the wait *before* the `(n+1)`-th invocation.
//!
//! # Example
//!
//! ```rust
//! use flowgraph_core::retry::{BackoffStrategy, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(5, BackoffStrategy::Exponential {
//!     delay: Duration::from_secs(1),
//!     multiplier: 2.0,
//!     max_delay: Duration::from_secs(10),
//! });
//!
//! assert_eq!(policy.get_delay(0), Duration::ZERO);
//! assert_eq!(policy.get_delay(2), Duration::from_secs(4));
//! assert_eq!(policy.get_delay(4), Duration::from_secs(10));
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long to wait between attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Every retry waits `delay`
    Constant {
        /// Fixed delay
        delay: Duration,
    },
    /// Retry `n` waits `n * delay`
    Linear {
        /// Delay step
        delay: Duration,
    },
    /// Retry `n` waits `min(delay * multiplier^n, max_delay)`
    Exponential {
        /// Base delay
        delay: Duration,
        /// Growth factor
        multiplier: f64,
        /// Upper bound
        max_delay: Duration,
    },
    /// Exponential, scaled by a uniform random factor in `[0.5, 1.5]`
    JitteredExponential {
        /// Base delay
        delay: Duration,
        /// Growth factor
        multiplier: f64,
        /// Upper bound applied before jitter
        max_delay: Duration,
    },
}

fn exponential(delay: Duration, multiplier: f64, max_delay: Duration, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = delay.as_secs_f64() * multiplier.powi(exponent);
    // NaN and negative products come from a non-positive multiplier
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs)
        .map(|d| d.min(max_delay))
        .unwrap_or(max_delay)
}

impl BackoffStrategy {
    /// Delay to wait before attempt index `attempt` (0 = first invocation)
    pub fn get_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self {
            BackoffStrategy::Constant { delay } => *delay,
            BackoffStrategy::Linear { delay } => delay.saturating_mul(attempt),
            BackoffStrategy::Exponential {
                delay,
                multiplier,
                max_delay,
            } => exponential(*delay, *multiplier, *max_delay, attempt),
            BackoffStrategy::JitteredExponential {
                delay,
                multiplier,
                max_delay,
            } => {
                let capped = exponential(*delay, *multiplier, *max_delay, attempt);
                let factor = rand::thread_rng().gen_range(0.5..=1.5);
                Duration::try_from_secs_f64(capped.as_secs_f64() * factor).unwrap_or(capped)
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::JitteredExponential {
            delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(128),
        }
    }
}

/// Configuration for retrying transient node failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Wait between attempts
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    /// Create a retry policy
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Retry immediately, up to `max_attempts` total attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(
            max_attempts,
            BackoffStrategy::Constant {
                delay: Duration::ZERO,
            },
        )
    }

    /// Delay to wait before attempt index `attempt`
    pub fn get_delay(&self, attempt: u32) -> Duration {
        self.backoff.get_delay(attempt)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, BackoffStrategy::default())
    }
}

/// Retry bookkeeping for a single node execution
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Number of attempts made so far
    pub attempts: u32,

    /// Last error message
    pub last_error: Option<String>,

    /// Total time spent waiting in backoff
    pub total_delay: Duration,
}

impl RetryState {
    /// Create a new retry state
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt
    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempts += 1;
        self.last_error = error;
    }

    /// Record time spent in backoff
    pub fn record_delay(&mut self, delay: Duration) {
        self.total_delay += delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_first_attempt_never_waits() {
        let strategies = [
            BackoffStrategy::Constant { delay: secs(3) },
            BackoffStrategy::Linear { delay: secs(3) },
            BackoffStrategy::default(),
        ];
        for strategy in strategies {
            assert_eq!(strategy.get_delay(0), Duration::ZERO);
        }
    }

    #[test]
    fn test_constant_and_linear() {
        let constant = BackoffStrategy::Constant { delay: secs(2) };
        assert_eq!(constant.get_delay(1), secs(2));
        assert_eq!(constant.get_delay(7), secs(2));

        let linear = BackoffStrategy::Linear { delay: secs(2) };
        assert_eq!(linear.get_delay(1), secs(2));
        assert_eq!(linear.get_delay(3), secs(6));
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::new(
            5,
            BackoffStrategy::Exponential {
                delay: secs(1),
                multiplier: 2.0,
                max_delay: secs(10),
            },
        );

        assert_eq!(policy.get_delay(0), Duration::ZERO);
        assert_eq!(policy.get_delay(1), secs(2));
        assert_eq!(policy.get_delay(2), secs(4));
        assert_eq!(policy.get_delay(3), secs(8));
        assert_eq!(policy.get_delay(4), secs(10));
    }

    #[test]
    fn test_degenerate_exponential_settings_do_not_panic() {
        let negative = BackoffStrategy::Exponential {
            delay: secs(1),
            multiplier: -2.0,
            max_delay: secs(10),
        };
        assert_eq!(negative.get_delay(1), Duration::ZERO);
        assert_eq!(negative.get_delay(2), secs(4));

        let unbounded = BackoffStrategy::Exponential {
            delay: secs(1),
            multiplier: 1e300,
            max_delay: Duration::MAX,
        };
        assert_eq!(unbounded.get_delay(5), Duration::MAX);

        let jittered = BackoffStrategy::JitteredExponential {
            delay: secs(1),
            multiplier: f64::NAN,
            max_delay: secs(10),
        };
        assert_eq!(jittered.get_delay(3), Duration::ZERO);
    }

    #[test]
    fn test_jitter_within_bounds() {
        let strategy = BackoffStrategy::JitteredExponential {
            delay: secs(1),
            multiplier: 2.0,
            max_delay: secs(100),
        };

        let delays: Vec<f64> = (0..20).map(|_| strategy.get_delay(2).as_secs_f64()).collect();
        for delay in &delays {
            assert!(*delay >= 4.0 * 0.5 - 1e-9);
            assert!(*delay <= 4.0 * 1.5 + 1e-9);
        }
        let first = delays[0];
        assert!(delays.iter().any(|d| (d - first).abs() > 1e-6));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::immediate(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_retry_state() {
        let mut state = RetryState::new();
        state.record_attempt(Some("boom".into()));
        state.record_delay(secs(1));
        state.record_attempt(None);
        assert_eq!(state.attempts, 2);
        assert!(state.last_error.is_none());
        assert_eq!(state.total_delay, secs(1));
    }

    #[test]
    fn test_policy_yaml() {
        let yaml = "max_attempts: 4\nbackoff:\n  kind: linear\n  delay:\n    secs: 1\n    nanos: 0\n";
        let policy: RetryPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.get_delay(2), secs(2));
    }
}
