use std::time::Duration;

use rand::Rng;

use crate::error::{Error, SessionError};

/// How often, and how patiently, a Sender redials an unreachable Receiver.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A fixed pause between a bounded number of redials.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.backoff_multiplier < 1.0 {
            return Err(SessionError::InvalidConfig(
                "retry backoff_multiplier must be >= 1.0".into(),
            )
            .into());
        }
        if self.initial_delay > self.max_delay {
            return Err(SessionError::InvalidConfig(
                "retry initial_delay must not exceed max_delay".into(),
            )
            .into());
        }
        Ok(())
    }

    /// The pauses to take between failed attempts, one per retry.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            retry: 0,
        }
    }
}

/// Jittered exponential delays, in [0.5x, 1.0x] of the nominal value and
/// never above `max_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    retry: u32,
}

impl Backoff {
    /// Retries handed out so far.
    pub fn retries(&self) -> u32 {
        self.retry
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retry >= self.policy.max_retries {
            return None;
        }
        let nominal = self.policy.initial_delay.as_secs_f64()
            * self.policy.backoff_multiplier.powi(self.retry as i32);
        let capped = nominal.min(self.policy.max_delay.as_secs_f64());
        self.retry += 1;
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        Some(Duration::from_secs_f64(capped * jitter))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.policy.max_retries - self.retry) as usize;
        (left, Some(left))
    }
}
