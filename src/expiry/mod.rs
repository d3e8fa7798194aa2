//! Safe re-poll time estimation from origin cache signals.
//!
//! An origin's `Expires` header may be wildly inaccurate if its server
//! does not synchronize its clock. The origin's `Date` header tells us
//! what time the origin *believed* it was responding, so the difference
//! `Expires - Date` is the intended validity window, immune to absolute
//! clock error. That window is re-anchored at the local receive time and
//! then bounded, so that a single misconfigured origin can neither induce
//! excessive polling load nor hold the cache stale.

use chrono::{DateTime, Duration, Utc};

/// Interval bounds applied to an adjusted expiry.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryBounds {
    /// Floor on the computed interval; controls load on the origin.
    pub min_interval_seconds: u64,
    /// Ceiling used when the origin gives no recommended poll interval.
    pub max_interval_seconds: u64,
}

/// Headroom multiplier applied to the ceiling, so a proxy that has drifted
/// slightly behind the origin's cadence can catch back up.
const MAX_INTERVAL_HEADROOM: f64 = 1.5;

/// Derives a skew-corrected, bounded expiry instant from origin signals.
///
/// Returns `None` when either origin timestamp is absent (no usable
/// caching signal) or when the adjusted expiry is already in the past.
pub fn adjust_and_validate_expires(
    expires: Option<DateTime<Utc>>,
    origin_date: Option<DateTime<Utc>>,
    recommended_interval_seconds: Option<u32>,
    now: DateTime<Utc>,
    bounds: &ExpiryBounds,
) -> Option<DateTime<Utc>> {
    let (origin_expires, origin_date) = match (expires, origin_date) {
        (Some(e), Some(d)) => (e, d),
        _ => return None,
    };

    // The origin's intended validity window, re-anchored at local time.
    let window = origin_expires - origin_date;
    let adjusted = now + window;

    let seconds_from_now = (adjusted - now).num_seconds();
    let max_interval = recommended_interval_seconds
        .map(u64::from)
        .unwrap_or(bounds.max_interval_seconds);
    let ceiling = (max_interval as f64 * MAX_INTERVAL_HEADROOM) as i64;
    let floor = bounds.min_interval_seconds as i64;

    if seconds_from_now < 0 {
        // Expired before it arrived, even after adjustment.
        None
    } else if seconds_from_now > ceiling {
        Some(now + Duration::seconds(ceiling))
    } else if seconds_from_now < floor {
        Some(now + Duration::seconds(floor))
    } else {
        Some(adjusted)
    }
}

/// Projects a passed expiry forward to the next interval boundary:
/// `expiry + ceil((now - expiry) / interval) * interval`.
///
/// Used when serving cached pages whose expiry has lapsed while the
/// origin's poll cadence is known.
pub fn project_expiry_forward(
    expires: DateTime<Utc>,
    now: DateTime<Utc>,
    interval_seconds: u32,
) -> DateTime<Utc> {
    let lapsed = (now - expires).num_seconds();
    if lapsed <= 0 || interval_seconds == 0 {
        return expires;
    }
    let interval = i64::from(interval_seconds);
    let intervals = (lapsed + interval - 1) / interval;
    expires + Duration::seconds(intervals * interval)
}
