//! Utility functions for the matchmaking service

use chrono::Utc;
use uuid::Uuid;

/// Timestamps above this are taken to be unix milliseconds
const MILLISECOND_THRESHOLD: i64 = 100_000_000_000;

/// Furthest a producer timestamp may lie before arrival
pub const MAX_BACKDATE_SECONDS: i64 = 300;

/// Generate a new unique match ID
pub fn generate_match_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current time as unix seconds
pub fn current_unix_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Normalize a producer timestamp to unix seconds
///
/// Producers send either seconds or milliseconds. Zero or negative values are
/// replaced by `now`, and anything older than `MAX_BACKDATE_SECONDS` before
/// `now` is clamped to that limit.
pub fn normalize_unix_seconds(timestamp: i64, now: i64) -> i64 {
    let seconds = if timestamp <= 0 {
        now
    } else if timestamp > MILLISECOND_THRESHOLD {
        timestamp / 1000
    } else {
        timestamp
    };
    seconds.max(now.saturating_sub(MAX_BACKDATE_SECONDS))
}

/// Seconds an entry enqueued at `enqueued_at` has been waiting at `now`
pub fn wait_seconds(enqueued_at: i64, now: i64) -> u64 {
    now.saturating_sub(enqueued_at).max(0) as u64
}

/// Calculate the absolute difference between two skill ratings
pub fn skill_gap(skill1: i64, skill2: i64) -> u64 {
    skill1.abs_diff(skill2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        assert_ne!(generate_match_id(), generate_match_id());
    }

    #[test]
    fn test_normalize_unix_seconds() {
        let now = 1_700_000_100;
        assert_eq!(normalize_unix_seconds(1_700_000_000, now), 1_700_000_000);
        assert_eq!(normalize_unix_seconds(1_700_000_000_123, now), 1_700_000_000);
        assert_eq!(normalize_unix_seconds(0, now), now);
        assert_eq!(normalize_unix_seconds(-5, now), now);
    }

    #[test]
    fn test_stale_timestamps_are_clamped() {
        let now = 1_700_000_000;
        let limit = now - MAX_BACKDATE_SECONDS;
        assert_eq!(normalize_unix_seconds(1, now), limit);
        assert_eq!(normalize_unix_seconds((now - 86_400) * 1000, now), limit);
        assert_eq!(normalize_unix_seconds(limit + 1, now), limit + 1);
        // future timestamps are kept and simply wait zero seconds
        assert_eq!(normalize_unix_seconds(now + 60, now), now + 60);
        assert_eq!(wait_seconds(normalize_unix_seconds(1, now), now), 300);
    }

    #[test]
    fn test_wait_seconds_never_negative() {
        assert_eq!(wait_seconds(100, 130), 30);
        assert_eq!(wait_seconds(200, 130), 0);
    }

    #[test]
    fn test_skill_gap() {
        assert_eq!(skill_gap(1500, 1400), 100);
        assert_eq!(skill_gap(1400, 1500), 100);
        assert_eq!(skill_gap(-10, 10), 20);
        assert_eq!(skill_gap(i64::MIN, i64::MAX), u64::MAX);
    }
}
