//! Reconnection policy for a dropped room stream.
//!
//! Pure, deterministic state machine: the caller reports `connected` and
//! `error` observations and receives a [`ReconnectDecision`]. Scheduling
//! and cancelling the actual timer is the connection manager's job.

use serde::{Deserialize, Serialize};

/// Exponential backoff with a hard attempt cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt (default 1000).
    pub initial_backoff_ms: u64,
    /// Backoff multiplier per attempt (default 2.0).
    pub multiplier: f64,
    /// Upper bound on any single delay (default 30000).
    pub max_backoff_ms: u64,
    /// Consecutive errors tolerated before giving up (default 5).
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay for a zero-based attempt: `min(initial * multiplier^attempt, max)`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = (self.initial_backoff_ms as f64) * self.multiplier.powi(exponent);
        if !raw.is_finite() || raw >= self.max_backoff_ms as f64 {
            return self.max_backoff_ms;
        }
        (raw as u64).min(self.max_backoff_ms)
    }
}

/// What to do after a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Reopen after `after_ms`. `attempt` is 1-based.
    Retry { attempt: u32, after_ms: u64 },
    /// Attempts exhausted; stay closed until an explicit restart.
    GiveUp { attempts: u32 },
}

/// Attempt counter for one room link.
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// A `connected` event arrived: the counter starts over.
    pub fn record_connected(&mut self) {
        self.attempts = 0;
    }

    /// A transport error arrived.
    pub fn record_error(&mut self) -> ReconnectDecision {
        if self.attempts >= self.policy.max_attempts {
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        let after_ms = self.policy.backoff_ms(self.attempts);
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            after_ms,
        }
    }

    /// Consecutive errors since the last `connected`.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_values() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.initial_backoff_ms, 1_000);
        assert!((p.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(p.max_backoff_ms, 30_000);
        assert_eq!(p.max_attempts, 5);
    }

    #[test]
    fn five_errors_follow_doubling_schedule_then_give_up() {
        let mut tracker = ReconnectTracker::new(ReconnectPolicy::default());
        let delays: Vec<u64> = (0..5)
            .map(|_| match tracker.record_error() {
                ReconnectDecision::Retry { after_ms, .. } => after_ms,
                other => panic!("expected retry, got {other:?}"),
            })
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
        assert_eq!(
            tracker.record_error(),
            ReconnectDecision::GiveUp { attempts: 5 }
        );
        // Still gives up until something resets it.
        assert!(matches!(
            tracker.record_error(),
            ReconnectDecision::GiveUp { .. }
        ));
    }

    #[test]
    fn attempts_are_one_based() {
        let mut tracker = ReconnectTracker::new(ReconnectPolicy::default());
        assert_eq!(
            tracker.record_error(),
            ReconnectDecision::Retry {
                attempt: 1,
                after_ms: 1_000
            }
        );
        assert_eq!(tracker.attempts(), 1);
    }

    #[test]
    fn connected_resets_counter() {
        let mut tracker = ReconnectTracker::new(ReconnectPolicy::default());
        tracker.record_error();
        tracker.record_error();
        tracker.record_error();
        tracker.record_connected();
        assert_eq!(tracker.attempts(), 0);
        assert_eq!(
            tracker.record_error(),
            ReconnectDecision::Retry {
                attempt: 1,
                after_ms: 1_000
            }
        );
    }

    #[test]
    fn backoff_capped_at_max() {
        let policy = ReconnectPolicy {
            max_attempts: 20,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.backoff_ms(4), 16_000);
        assert_eq!(policy.backoff_ms(5), 30_000);
        assert_eq!(policy.backoff_ms(19), 30_000);
        assert_eq!(policy.backoff_ms(u32::MAX), 30_000);
    }

    #[test]
    fn zero_attempts_gives_up_immediately() {
        let mut tracker = ReconnectTracker::new(ReconnectPolicy {
            max_attempts: 0,
            ..ReconnectPolicy::default()
        });
        assert_eq!(
            tracker.record_error(),
            ReconnectDecision::GiveUp { attempts: 0 }
        );
    }
}
