//! Sync timing policy.
//!
//! Decides whether a sync is due without running a scheduler. Callers check
//! on app start, on resume, or after local edits.

use std::time::Duration;
use tidesync_core::Timestamp;

/// Default minimum time between successful syncs (five minutes).
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(300_000);

/// Returns true if a sync is due now.
///
/// See [`is_due_at`].
pub fn is_due(last_success: Option<Timestamp>, interval: Duration) -> bool {
    is_due_at(last_success, interval, Timestamp::now())
}

/// Returns true when there was never a successful sync, or when strictly
/// more than `interval` has elapsed between `last_success` and `now`.
///
/// A `last_success` in the future (clock moved back) is not due.
pub fn is_due_at(last_success: Option<Timestamp>, interval: Duration, now: Timestamp) -> bool {
    let Some(last) = last_success else {
        return true;
    };
    let elapsed = now.as_millis().saturating_sub(last.as_millis());
    u128::try_from(elapsed).map_or(false, |elapsed| elapsed > interval.as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Timestamp = Timestamp::from_millis(1_700_000_000_000);

    fn ago(ms: i64) -> Option<Timestamp> {
        Some(Timestamp::from_millis(NOW.as_millis() - ms))
    }

    #[test]
    fn never_synced_is_due() {
        assert!(is_due_at(None, DEFAULT_SYNC_INTERVAL, NOW));
        assert!(is_due(None, DEFAULT_SYNC_INTERVAL));
    }

    #[test]
    fn recent_sync_is_not_due() {
        assert!(!is_due_at(ago(100_000), DEFAULT_SYNC_INTERVAL, NOW));
    }

    #[test]
    fn stale_sync_is_due() {
        assert!(is_due_at(ago(400_000), DEFAULT_SYNC_INTERVAL, NOW));
    }

    #[test]
    fn boundary_is_exclusive() {
        assert!(!is_due_at(ago(300_000), DEFAULT_SYNC_INTERVAL, NOW));
        assert!(is_due_at(ago(300_001), DEFAULT_SYNC_INTERVAL, NOW));
    }

    #[test]
    fn future_timestamp_is_not_due() {
        assert!(!is_due_at(ago(-5_000), Duration::ZERO, NOW));
    }

    #[test]
    fn wall_clock_variant() {
        let recent = Some(Timestamp::from_millis(Timestamp::now().as_millis() - 100_000));
        assert!(!is_due(recent, DEFAULT_SYNC_INTERVAL));
        let stale = Some(Timestamp::from_millis(Timestamp::now().as_millis() - 400_000));
        assert!(is_due(stale, DEFAULT_SYNC_INTERVAL));
    }
}
