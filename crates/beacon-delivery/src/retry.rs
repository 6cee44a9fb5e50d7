//! Retry and polling policies for the delivery lanes.
//!
//! Delivery favors eventual success over bounded retry: connectivity
//! failures requeue forever, retryable transport failures requeue until a
//! very high attempt ceiling, and only errors that cannot resolve on retry
//! end delivery early. Lanes poll on a simple two-speed interval rather
//! than an exponential schedule.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Attempt ceiling applied when none is configured.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1000;

/// Longest pause a collector's `Retry-After` can impose on a lane.
pub const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Retry policy for failed delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts (including initial attempt).
    ///
    /// Only retryable transport errors count toward it. Connectivity
    /// failures requeue regardless of attempt count.
    pub max_attempts: u32,

    /// Cap on the lane pause honoured for HTTP 429 responses.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, max_retry_after: DEFAULT_MAX_RETRY_AFTER }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt ceiling.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }
}

/// Retry decision context for a failed delivery attempt.
#[derive(Debug, Clone)]
pub struct RetryContext<'a> {
    /// Attempt that just failed (1-based).
    pub attempt_number: u32,
    /// Error that caused the failure.
    pub error: &'a DeliveryError,
    /// Retry policy to apply.
    pub policy: &'a RetryPolicy,
}

/// Result of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the job back at the head of its lane.
    Requeue {
        /// Minimum pause before the lane dispatches again, if the
        /// collector asked for one.
        pause: Option<Duration>,
    },
    /// Drop the job; delivery permanently failed.
    GiveUp {
        /// Reason why the delivery should not be retried
        reason: String,
    },
}

impl<'a> RetryContext<'a> {
    /// Creates a new retry context for a failed attempt.
    pub fn new(attempt_number: u32, error: &'a DeliveryError, policy: &'a RetryPolicy) -> Self {
        Self { attempt_number, error, policy }
    }

    /// Decides whether the failed job goes back into its lane.
    pub fn decide(&self) -> RetryDecision {
        if self.error.is_connectivity() {
            return RetryDecision::Requeue { pause: None };
        }

        if !self.error.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {}", self.error),
            };
        }

        if self.attempt_number >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.policy.max_attempts),
            };
        }

        let pause = match self.error {
            DeliveryError::RateLimited { retry_after_seconds } => {
                Some(Duration::from_secs(*retry_after_seconds).min(self.policy.max_retry_after))
            },
            _ => None,
        };
        RetryDecision::Requeue { pause }
    }
}

/// Adaptive polling interval for the lane workers.
///
/// Short while connected with work pending, long otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalPolicy {
    /// Interval while connected with jobs pending.
    pub active: Duration,
    /// Interval while offline or idle.
    pub idle: Duration,
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self { active: Duration::from_millis(500), idle: Duration::from_secs(3) }
    }
}

impl IntervalPolicy {
    /// Creates a policy from the two intervals.
    pub fn new(active: Duration, idle: Duration) -> Self {
        Self { active, idle }
    }

    /// Delay before the next dispatch cycle.
    pub fn interval(&self, connected: bool, pending: usize) -> Duration {
        if connected && pending > 0 {
            self.active
        } else {
            self.idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(attempt_number: u32, error: &DeliveryError) -> RetryDecision {
        RetryContext::new(attempt_number, error, &RetryPolicy::with_max_attempts(5)).decide()
    }

    #[test]
    fn connectivity_errors_requeue_past_ceiling() {
        let error = DeliveryError::network("connection reset");
        assert_eq!(decide(1, &error), RetryDecision::Requeue { pause: None });
        assert_eq!(decide(5_000, &error), RetryDecision::Requeue { pause: None });
    }

    #[test]
    fn retryable_transport_errors_stop_at_ceiling() {
        let error = DeliveryError::server_error(503, "unavailable");
        assert_eq!(decide(4, &error), RetryDecision::Requeue { pause: None });
        assert!(matches!(decide(5, &error), RetryDecision::GiveUp { .. }));
    }

    #[test]
    fn timeouts_are_retried_like_transport_failures() {
        let error = DeliveryError::timeout(Duration::from_secs(10));
        assert_eq!(decide(1, &error), RetryDecision::Requeue { pause: None });
        assert!(matches!(decide(5, &error), RetryDecision::GiveUp { .. }));
    }

    #[test]
    fn client_errors_give_up_immediately() {
        let decision = decide(1, &DeliveryError::client_error(400, "bad request"));
        let RetryDecision::GiveUp { reason } = decision else {
            panic!("expected give up, got {decision:?}");
        };
        assert!(reason.contains("non-retryable"));
    }

    #[test]
    fn rate_limits_pause_the_lane() {
        let error = DeliveryError::rate_limited(30);
        assert_eq!(
            decide(1, &error),
            RetryDecision::Requeue { pause: Some(Duration::from_secs(30)) }
        );

        let error = DeliveryError::rate_limited(86_400);
        assert_eq!(
            decide(1, &error),
            RetryDecision::Requeue { pause: Some(DEFAULT_MAX_RETRY_AFTER) }
        );
    }

    #[test]
    fn default_policy_favors_eventual_delivery() {
        assert_eq!(RetryPolicy::default().max_attempts, 1000);
    }

    #[test]
    fn interval_is_short_only_when_connected_with_work() {
        let policy = IntervalPolicy::default();
        assert_eq!(policy.interval(true, 3), Duration::from_millis(500));
        assert_eq!(policy.interval(true, 0), Duration::from_secs(3));
        assert_eq!(policy.interval(false, 3), Duration::from_secs(3));
    }
}
