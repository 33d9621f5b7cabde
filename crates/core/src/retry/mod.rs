//! Retry/backoff policy for failed generation attempts.
//!
//! The policy is pure: given how many retries a job has already consumed and
//! whether the failure is transient, it says whether to try again and after
//! how long. Jitter is a separate step so the delay schedule itself stays
//! deterministic.

mod config;

use std::time::Duration;

use rand::Rng;

pub use config::RetryConfig;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

/// Decision for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt after the delay (before jitter).
    RetryAfter(Duration),
    /// Mark the job failed.
    GiveUp,
}

/// Exponential backoff with a retry ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap for a single delay; `None` means uncapped.
    pub max_delay: Option<Duration>,
    /// Fraction of the delay used as the jitter window (0.0-1.0).
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Some(Duration::from_millis(config.max_delay_ms)),
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// Decide what to do after a failed attempt.
    ///
    /// `retries_so_far` is the number of retries already consumed, i.e.
    /// `attempt_count - 1` for the attempt that just failed.
    pub fn decide(&self, retries_so_far: u32, class: FailureClass) -> RetryDecision {
        match class {
            FailureClass::Permanent => RetryDecision::GiveUp,
            FailureClass::Transient if retries_so_far < self.max_attempts => {
                RetryDecision::RetryAfter(self.base_delay_for(retries_so_far))
            }
            FailureClass::Transient => RetryDecision::GiveUp,
        }
    }

    /// Un-jittered delay before retry number `retries_so_far + 1`:
    /// `base_delay * 2^retries_so_far`, capped at `max_delay`.
    pub fn base_delay_for(&self, retries_so_far: u32) -> Duration {
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let factor = 1u64.checked_shl(retries_so_far).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(base_ms.saturating_mul(factor));

        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Apply this policy's jitter to `delay` using the thread-local RNG.
    pub fn jittered(&self, delay: Duration) -> Duration {
        let jittered = apply_jitter(delay, self.jitter_ratio, &mut rand::thread_rng());
        match self.max_delay {
            Some(max) => jittered.min(max),
            None => jittered,
        }
    }
}

/// Spread `delay` uniformly over `[delay * (1 - ratio), delay * (1 + ratio)]`.
pub fn apply_jitter<R: Rng + ?Sized>(delay: Duration, ratio: f64, rng: &mut R) -> Duration {
    let ratio = ratio.clamp(0.0, 1.0);
    if ratio == 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = 1.0 + rng.gen_range(-ratio..=ratio);
    delay.mul_f64(factor.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Some(Duration::from_secs(600)),
            jitter_ratio: 0.0,
        }
    }

    #[test]
    fn test_permanent_always_gives_up() {
        let policy = policy();
        for retries in 0..5 {
            assert_eq!(
                policy.decide(retries, FailureClass::Permanent),
                RetryDecision::GiveUp
            );
        }
    }

    #[test]
    fn test_transient_retries_until_ceiling() {
        let policy = policy();
        assert_eq!(
            policy.decide(0, FailureClass::Transient),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            policy.decide(1, FailureClass::Transient),
            RetryDecision::RetryAfter(Duration::from_secs(4))
        );
        assert_eq!(
            policy.decide(2, FailureClass::Transient),
            RetryDecision::RetryAfter(Duration::from_secs(8))
        );
        assert_eq!(
            policy.decide(3, FailureClass::Transient),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_zero_max_attempts_never_retries() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..policy()
        };
        assert_eq!(
            policy.decide(0, FailureClass::Transient),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_delay_is_monotonic_until_cap() {
        let policy = RetryPolicy {
            max_attempts: 100,
            max_delay: Some(Duration::from_secs(60)),
            ..policy()
        };

        let delays: Vec<Duration> = (0..80).map(|r| policy.base_delay_for(r)).collect();
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
            if pair[1] < Duration::from_secs(60) {
                assert!(pair[1] > pair[0]);
            }
        }
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn test_uncapped_delay_saturates() {
        let policy = RetryPolicy {
            max_delay: None,
            ..policy()
        };
        assert_eq!(policy.base_delay_for(10), Duration::from_millis(2_000 * 1024));
        assert!(policy.base_delay_for(200) > Duration::from_secs(1_000_000));
    }

    #[test]
    fn test_jitter_stays_within_window() {
        let mut rng = StdRng::seed_from_u64(7);
        let delay = Duration::from_secs(10);
        for _ in 0..200 {
            let jittered = apply_jitter(delay, 0.2, &mut rng);
            assert!(jittered >= Duration::from_secs(8));
            assert!(jittered <= Duration::from_secs(12));
        }
    }

    #[test]
    fn test_zero_jitter_is_identity() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            apply_jitter(Duration::from_secs(3), 0.0, &mut rng),
            Duration::from_secs(3)
        );
        assert_eq!(policy().jittered(Duration::from_secs(3)), Duration::from_secs(3));
    }

    #[test]
    fn test_from_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Some(Duration::from_secs(600)));
        assert_eq!(policy.jitter_ratio, 0.2);
    }
}
