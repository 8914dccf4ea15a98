//! Time utilities for epochsync
//!
//! All instants are UTC wall-clock timestamps with millisecond resolution,
//! matching what the authoritative time endpoint reports. Local time is read
//! through the [`LocalClock`] trait so tests can drive it by hand.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `EPOCHSYNC_MOCK_TIME` environment variable shifts the
//! local clock so that it starts at the given UTC instant and advances in real
//! time. This is useful for rehearsing epoch boundaries without waiting for
//! them.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)
//!
//! Example:
//! ```bash
//! EPOCHSYNC_MOCK_TIME="2025-12-25 14:29:30" epochsyncd --epoch round.json
//! ```

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "EPOCHSYNC_MOCK_TIME";

/// Expected format of [`MOCK_TIME_ENV_VAR`]
pub const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Offset between mock time and real time, computed once per process.
static MOCK_TIME_OFFSET: OnceLock<Option<TimeDelta>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // This is the internal implementation that wraps Utc::now()
fn get_mock_time_offset() -> Option<TimeDelta> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match NaiveDateTime::parse_from_str(&mock_time_str, MOCK_TIME_FORMAT) {
                    Ok(naive_dt) => {
                        let offset = naive_dt.and_utc().signed_duration_since(Utc::now());
                        tracing::info!(
                            mock_time = %mock_time_str,
                            offset_secs = offset.num_seconds(),
                            "Mock time enabled"
                        );
                        return Some(offset);
                    }
                    Err(_) => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            expected_format = MOCK_TIME_FORMAT,
                            "Invalid mock time format"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current local time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // This is the wrapper that provides mock time support
pub fn now() -> DateTime<Utc> {
    let real_now = Utc::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Source of local (unsynchronized) wall-clock time.
pub trait LocalClock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The process clock, honouring `EPOCHSYNC_MOCK_TIME` in debug builds
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl LocalClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        now()
    }
}

/// Hand-driven clock for tests. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Start at the given Unix timestamp in milliseconds
    pub fn at_millis(millis: i64) -> Self {
        Self::new(from_unix_millis(millis).unwrap_or_default())
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }

    pub fn advance(&self, by: Duration) {
        self.advance_millis(duration_millis(by));
    }

    /// Move the clock by a signed number of milliseconds (negative steps simulate a clock jump back)
    pub fn advance_millis(&self, millis: i64) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = add_millis(*current, millis);
    }
}

impl LocalClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Convert Unix milliseconds to a UTC instant. `None` when out of range.
pub fn from_unix_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

/// Shift an instant by signed milliseconds, saturating at the representable range
pub fn add_millis(instant: DateTime<Utc>, millis: i64) -> DateTime<Utc> {
    let delta = TimeDelta::try_milliseconds(millis).unwrap_or(if millis < 0 {
        TimeDelta::MIN
    } else {
        TimeDelta::MAX
    });
    instant.checked_add_signed(delta).unwrap_or(if millis < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Signed milliseconds from `earlier` to `later`
pub fn millis_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    later.signed_duration_since(earlier).num_milliseconds()
}

/// Duration from `from` until `target`, or zero if `target` is not in the future
pub fn saturating_duration_until(target: DateTime<Utc>, from: DateTime<Utc>) -> Duration {
    let millis = millis_between(from, target);
    if millis > 0 {
        Duration::from_millis(millis as u64)
    } else {
        Duration::ZERO
    }
}

/// Whole milliseconds in a std duration, saturating at `i64::MAX`
pub fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Format a timestamp for logs and status output
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string()
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    const T: i64 = 1_767_225_600_000; // 2026-01-01 00:00:00 UTC

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_millis(T);
        assert_eq!(clock.now().timestamp_millis(), T);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now().timestamp_millis(), T + 1500);

        clock.advance_millis(-500);
        assert_eq!(clock.now().timestamp_millis(), T + 1000);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::at_millis(T);
        let other = clock.clone();
        clock.advance(Duration::from_secs(5));
        assert_eq!(other.now().timestamp_millis(), T + 5000);
    }

    #[test]
    fn test_add_millis_and_between() {
        let base = from_unix_millis(T).unwrap();
        let later = add_millis(base, 3_600_000);
        assert_eq!(millis_between(base, later), 3_600_000);
        assert_eq!(millis_between(later, base), -3_600_000);
    }

    #[test]
    fn test_add_millis_saturates() {
        let base = from_unix_millis(T).unwrap();
        assert_eq!(add_millis(base, i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(add_millis(base, i64::MIN), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_saturating_duration_until() {
        let base = from_unix_millis(T).unwrap();
        let target = add_millis(base, 5000);
        assert_eq!(
            saturating_duration_until(target, base),
            Duration::from_millis(5000)
        );
        assert_eq!(saturating_duration_until(base, target), Duration::ZERO);
        assert_eq!(saturating_duration_until(base, base), Duration::ZERO);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_format_timestamp() {
        let dt = Utc.with_ymd_and_hms(2025, 12, 25, 14, 30, 45).unwrap();
        assert_eq!(format_timestamp(&dt), "2025-12-25 14:30:45.000 UTC");
    }

    #[test]
    fn test_now_returns_time() {
        let t = now();
        assert!(t.year() >= 2020);
        assert!(t.year() <= 2100);
    }

    #[test]
    fn test_parse_mock_time_format() {
        let valid = ["2025-12-25 14:30:00", "2025-01-01 00:00:00", "2025-12-31 23:59:59"];
        for s in &valid {
            assert!(
                NaiveDateTime::parse_from_str(s, MOCK_TIME_FORMAT).is_ok(),
                "Expected '{}' to parse",
                s
            );
        }

        let invalid = ["2025-12-25", "14:30:00", "2025-12-25T14:30:00", "", "not a date"];
        for s in &invalid {
            assert!(
                NaiveDateTime::parse_from_str(s, MOCK_TIME_FORMAT).is_err(),
                "Expected '{}' to be rejected",
                s
            );
        }
    }

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(20));
        let t2 = clock.now();
        assert!(t2 > t1, "Time should advance forward");
    }
}
