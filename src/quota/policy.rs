use super::models::{Consumption, LimitCheckResult, Subscription};

// key: quota-policy -> ordered admission evaluation
/// Podcasts are checked before minutes so the reported reason is stable when
/// both limits are exhausted. A zero request on a resource only fails when the
/// counter has already reached its limit; a positive request fails when it
/// would push the counter past the limit.
pub fn evaluate(subscription: &Subscription, request: &Consumption) -> LimitCheckResult {
    let current = subscription.usage();
    let limits = subscription.limits();

    let reason = if exceeds(current.podcasts, request.podcasts, limits.podcasts) {
        Some(format!("Monthly podcast limit reached ({})", limits.podcasts))
    } else if exceeds(current.minutes, request.minutes, limits.minutes) {
        Some(format!("Monthly minutes limit reached ({})", limits.minutes))
    } else {
        None
    };

    LimitCheckResult {
        allowed: reason.is_none(),
        reason,
        current,
        limits,
    }
}

/// Pre-flight check with nothing requested.
pub fn check(subscription: &Subscription) -> LimitCheckResult {
    evaluate(
        subscription,
        &Consumption {
            podcasts: 0,
            minutes: 0,
            podcast_id: None,
        },
    )
}

fn exceeds(used: i32, requested: i32, limit: i32) -> bool {
    if requested <= 0 {
        used >= limit
    } else {
        i64::from(used) + i64::from(requested) > i64::from(limit)
    }
}
