//! Funding settlement schedule arithmetic.
//!
//! Bybit's funding history reports the *previous* settlement instant. The next
//! settlement is derived from it and the configured interval; the exchange is
//! never asked for it on the hot path.

use chrono::{DateTime, Duration, Utc};

/// Derives upcoming settlement instants from the last observed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingSchedule {
    last_funding: DateTime<Utc>,
    interval: Duration,
}

impl FundingSchedule {
    /// Create a schedule from the last settlement instant and the interval.
    ///
    /// Panics if the interval is not positive; callers go through config
    /// validation first.
    pub fn new(last_funding: DateTime<Utc>, interval: Duration) -> Self {
        assert!(
            interval > Duration::zero(),
            "funding interval must be positive"
        );
        Self {
            last_funding,
            interval,
        }
    }

    /// Schedule with an interval given in (possibly fractional) hours.
    pub fn from_hours(last_funding: DateTime<Utc>, hours: f64) -> Self {
        let millis = (hours * 3_600_000.0).round() as i64;
        Self::new(last_funding, Duration::milliseconds(millis))
    }

    /// The settlement instant this schedule is anchored on.
    pub fn last_funding(&self) -> DateTime<Utc> {
        self.last_funding
    }

    /// The next settlement strictly after `now`.
    ///
    /// `next = last + ceil((now - last) / interval) * interval`, bumped one
    /// more interval when `now` lands exactly on a settlement boundary so the
    /// result is always in the future. Clock skew (`now < last`) clamps
    /// elapsed time at zero.
    pub fn next_funding(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let interval_ms = self.interval.num_milliseconds();
        let elapsed_ms = (now - self.last_funding).num_milliseconds().max(0);

        // At least one interval out, so a skewed clock still lands in the future
        let intervals = ((elapsed_ms + interval_ms - 1) / interval_ms).max(1);
        let mut next = self.last_funding + Duration::milliseconds(intervals * interval_ms);
        if next <= now {
            next += self.interval;
        }
        next
    }

    /// Time remaining until the next settlement. Always positive.
    pub fn countdown(&self, now: DateTime<Utc>) -> Duration {
        self.next_funding(now) - now
    }

    /// Countdown in fractional seconds, for window comparisons.
    pub fn countdown_secs(&self, now: DateTime<Utc>) -> f64 {
        self.countdown(now).num_milliseconds() as f64 / 1000.0
    }
}

/// Format a countdown as `HH:MM:SS`. The hours field grows past 24 without
/// wrapping; negative durations render as zero.
pub fn format_countdown(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_next_funding_mid_interval() {
        let schedule = FundingSchedule::from_hours(at(0), 1.0);
        // 10 minutes in, next settlement is at the hour mark
        assert_eq!(schedule.next_funding(at(600)), at(3600));
        assert_eq!(schedule.countdown(at(600)), Duration::seconds(3000));
    }

    #[test]
    fn test_next_funding_is_strictly_future_on_boundary() {
        let schedule = FundingSchedule::from_hours(at(0), 1.0);
        // Exactly on the anchor and exactly on a later boundary
        assert_eq!(schedule.next_funding(at(0)), at(3600));
        assert_eq!(schedule.next_funding(at(3600)), at(7200));
    }

    #[test]
    fn test_next_funding_many_intervals_elapsed() {
        let schedule = FundingSchedule::from_hours(at(0), 8.0);
        // 20 hours after the anchor, next 8h boundary is at 24h
        assert_eq!(schedule.next_funding(at(20 * 3600)), at(24 * 3600));
    }

    #[test]
    fn test_clock_skew_clamps_to_one_interval() {
        let schedule = FundingSchedule::from_hours(at(0), 4.0);
        // Snapshot from the "future": countdown never exceeds one interval
        assert_eq!(schedule.next_funding(at(-30)), at(4 * 3600));
    }

    #[test]
    fn test_fractional_hour_interval() {
        let schedule = FundingSchedule::from_hours(at(0), 0.5);
        assert_eq!(schedule.next_funding(at(1)), at(1800));
    }

    #[test]
    fn test_countdown_secs_is_fractional() {
        let schedule = FundingSchedule::from_hours(at(0), 1.0);
        let now = at(3599) + Duration::milliseconds(500);
        let secs = schedule.countdown_secs(now);
        assert!((secs - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(Duration::seconds(0)), "00:00:00");
        assert_eq!(format_countdown(Duration::seconds(3723)), "01:02:03");
        assert_eq!(format_countdown(Duration::seconds(27 * 3600 + 59)), "27:00:59");
        assert_eq!(format_countdown(Duration::seconds(-5)), "00:00:00");
        // Sub-second remainder truncates
        assert_eq!(
            format_countdown(Duration::milliseconds(1999)),
            "00:00:01"
        );
    }
}
