//! Session-level reconnect policy.
//!
//! Stateless: the session owns the counters and asks the policy what to do
//! whenever the engine reports an error or the end of the stream.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What made the session consult the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectTrigger {
    /// The engine reported a decode or network failure.
    Error,
    /// The server closed the stream.
    EndOfStream,
}

/// Decision returned by [`ReconnectPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Reopen the stream after `delay`. `attempt` is 1-based.
    Retry { attempt: u32, delay: Duration },
    /// The budget is used up; the session must stop.
    Exhausted { attempts: u32 },
    /// Nothing to do (end of a stream that never played).
    Ignore,
}

/// Bounded reconnect policy.
///
/// Defaults to a fixed 2 s delay and 3 attempts. Setting
/// `backoff_multiplier` above 1.0 turns the delay exponential, capped at
/// `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Maximum reconnect attempts per budget.
    pub max_retries: u32,
    /// Delay before the first attempt in milliseconds.
    pub delay_ms: u64,
    /// Multiplier applied per attempt. 1.0 keeps the delay fixed.
    pub backoff_multiplier: f64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Add up to 25% random jitter to each delay.
    pub use_jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 2000,
            backoff_multiplier: 1.0,
            max_delay_ms: 30000,
            use_jitter: false,
        }
    }
}

impl ReconnectPolicy {
    /// A fixed-delay policy.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay_ms: delay.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Delay before the given 1-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.delay_ms as f64
            * self
                .backoff_multiplier
                .max(1.0)
                .powi(attempt.saturating_sub(1) as i32);

        let delay_ms = base_delay.min(self.max_delay_ms as f64) as u64;

        let final_delay = if self.use_jitter {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    /// Decide how to react to `trigger`.
    ///
    /// `retry_count` is the number of attempts already made since the session
    /// last reached `Playing`. An end of stream only reconnects when the
    /// session had actually been playing before it.
    pub fn decide(
        &self,
        trigger: ReconnectTrigger,
        retry_count: u32,
        reached_playing: bool,
    ) -> ReconnectDecision {
        if trigger == ReconnectTrigger::EndOfStream && !reached_playing {
            return ReconnectDecision::Ignore;
        }

        if retry_count >= self.max_retries {
            return ReconnectDecision::Exhausted {
                attempts: retry_count,
            };
        }

        let attempt = retry_count + 1;
        ReconnectDecision::Retry {
            attempt,
            delay: self.delay_for_attempt(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_two_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = ReconnectPolicy {
            delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 5000,
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = ReconnectPolicy {
            use_jitter: true,
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(2500));
        }
    }

    #[test]
    fn test_error_retries_up_to_budget() {
        let policy = ReconnectPolicy::default();
        for count in 0..3 {
            assert_eq!(
                policy.decide(ReconnectTrigger::Error, count, false),
                ReconnectDecision::Retry {
                    attempt: count + 1,
                    delay: Duration::from_secs(2),
                }
            );
        }
        assert_eq!(
            policy.decide(ReconnectTrigger::Error, 3, false),
            ReconnectDecision::Exhausted { attempts: 3 }
        );
    }

    #[test]
    fn test_end_of_stream_requires_prior_playing() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.decide(ReconnectTrigger::EndOfStream, 0, false),
            ReconnectDecision::Ignore
        );
        assert!(matches!(
            policy.decide(ReconnectTrigger::EndOfStream, 0, true),
            ReconnectDecision::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_zero_budget_exhausts_immediately() {
        let policy = ReconnectPolicy::fixed(0, Duration::from_millis(10));
        assert_eq!(
            policy.decide(ReconnectTrigger::Error, 0, true),
            ReconnectDecision::Exhausted { attempts: 0 }
        );
    }
}
