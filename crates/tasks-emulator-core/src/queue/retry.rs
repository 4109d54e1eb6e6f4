//! Retry policy evaluation: backoff delays and the stop rule.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{RetryPolicy, TaskAttemptState};

const MAX_EFFECTIVE_DOUBLINGS: u32 = 1024;

/// Backoff to wait after the `attempt`-th failed delivery.
///
/// Doubles for the first `max_doublings` attempts, then grows linearly by
/// `2^max_doublings * min_backoff` per attempt, capped at `max_backoff`:
///
/// `multiplier = 2^min(n-1, d) + max(0, n-1-d) * 2^d`
///
/// With min=2s, doublings=2: 2s, 4s, 8s, 16s, 24s, 32s, ...
pub fn backoff_for_attempt(attempt: u32, policy: &RetryPolicy) -> Duration {
    if policy.min_backoff.is_zero() {
        return Duration::ZERO;
    }
    let n = attempt.max(1) - 1;
    // 2^1024 already overflows f64; more doublings change nothing.
    let d = policy.max_doublings.min(MAX_EFFECTIVE_DOUBLINGS);

    let doubling = 2f64.powi(n.min(d) as i32);
    let linear = f64::from(n.saturating_sub(d)) * 2f64.powi(d as i32);
    let secs = (doubling + linear) * policy.min_backoff.as_secs_f64();

    let max = policy.max_backoff.as_secs_f64();
    if !secs.is_finite() || secs >= max {
        policy.max_backoff
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// Whether the retry budget is exhausted.
///
/// The attempt count must be exceeded; if a time budget is configured, it must be
/// exceeded as well.
pub fn should_stop_retrying(
    state: &TaskAttemptState,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> bool {
    if state.attempt <= policy.max_attempts {
        return false;
    }
    match policy.max_retry_duration {
        None => true,
        Some(budget) if budget.is_zero() => true,
        Some(budget) => (now - state.started_at).to_std().unwrap_or_default() > budget,
    }
}
