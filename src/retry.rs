//! Bounded retry policies
//!
//! Both the page retriever and the sink uploader retry transient failures.
//! The policy is a plain value: how many attempts, and how long to wait
//! between them.

use rand::Rng;
use std::time::Duration;

/// How long to wait between attempts
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed(Duration),
    /// 2^attempt seconds plus a random fraction of a second
    ExponentialWithJitter,
}

/// A bounded retry policy: max attempts plus a backoff function
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed-delay policy, used for page fetches
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Exponential-with-jitter policy, used for sink uploads
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::ExponentialWithJitter,
        }
    }

    /// Delay to sleep after a failed attempt (0-based), if any remain
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }
        let delay = match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::ExponentialWithJitter => {
                let base = 2u64.saturating_pow(attempt);
                let jitter_ms = rand::thread_rng().gen_range(0..1000);
                Duration::from_secs(base) + Duration::from_millis(jitter_ms)
            }
        };
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_returns_constant_delay() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5));
        assert_eq!(policy.delay_for(0), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(5)));
    }

    #[test]
    fn no_delay_after_last_attempt() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), None);
        assert_eq!(policy.delay_for(10), None);
    }

    #[test]
    fn exponential_delay_grows_with_attempt() {
        let policy = RetryPolicy::exponential(5);

        let first = policy.delay_for(0).unwrap();
        assert!(first >= Duration::from_secs(1));
        assert!(first < Duration::from_secs(2));

        let third = policy.delay_for(2).unwrap();
        assert!(third >= Duration::from_secs(4));
        assert!(third < Duration::from_secs(5));
    }

    #[test]
    fn single_attempt_policy_never_sleeps() {
        let policy = RetryPolicy::fixed(1, Duration::from_secs(5));
        assert_eq!(policy.delay_for(0), None);
    }
}
