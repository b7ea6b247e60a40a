//! Expiration policy.
//!
//! Pure functions over explicit values. A duration that is not a positive
//! day count fails closed: the expiry collapses onto the registration time,
//! so the account reads as expired instead of never expiring.

use chrono::{Days, NaiveDateTime};

/// Upper bound for `access.duration_days` (about a century).
pub const MAX_DURATION_DAYS: i64 = 36_500;

/// Returns the duration as a day count if it is usable.
pub fn valid_duration(duration_days: i64) -> Option<u64> {
    if (1..=MAX_DURATION_DAYS).contains(&duration_days) {
        Some(duration_days as u64)
    } else {
        None
    }
}

/// `registered_at + duration_days` in calendar days.
pub fn compute_expiry(registered_at: NaiveDateTime, duration_days: i64) -> NaiveDateTime {
    valid_duration(duration_days)
        .and_then(|days| registered_at.checked_add_days(Days::new(days)))
        .unwrap_or(registered_at)
}

/// Access ends at `expire_at` itself.
pub fn is_expired(expire_at: NaiveDateTime, now: NaiveDateTime) -> bool {
    now >= expire_at
}

/// Whole days until `expire_at`, floored at zero.
pub fn days_left(expire_at: NaiveDateTime, now: NaiveDateTime) -> i64 {
    (expire_at - now).num_days().max(0)
}
