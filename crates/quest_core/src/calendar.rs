//! crates/quest_core/src/calendar.rs
//!
//! Clocks and the calendar-day boundary shared by streaks and daily achievements.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use std::sync::Mutex;

use crate::ports::Clock;

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Maps instants to calendar days at a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl Calendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// Parses `Z`, `UTC`, `+HH:MM`, `-HH:MM` or `+HHMM`.
    pub fn parse_offset(raw: &str) -> Option<FixedOffset> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
            return Some(Utc.fix());
        }
        let (sign, rest) = match raw.as_bytes().first()? {
            b'+' => (1, &raw[1..]),
            b'-' => (-1, &raw[1..]),
            _ => return None,
        };
        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let hours: i32 = digits[..2].parse().ok()?;
        let minutes: i32 = digits[2..].parse().ok()?;
        if hours > 23 || minutes > 59 {
            return None;
        }
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// The instant the given local day begins.
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let local_midnight = date.and_time(NaiveTime::MIN);
        let utc = local_midnight - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc)
    }

    /// `[start, end)` of the local day containing `at`.
    pub fn day_bounds(&self, at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start_of_day(self.local_date(at));
        (start, start + Duration::days(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn parses_offsets() {
        assert_eq!(Calendar::parse_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(Calendar::parse_offset("+09:00").unwrap().local_minus_utc(), 9 * 3600);
        assert_eq!(Calendar::parse_offset("-0530").unwrap().local_minus_utc(), -(5 * 3600 + 1800));
        assert!(Calendar::parse_offset("09:00").is_none());
        assert!(Calendar::parse_offset("+25:00").is_none());
    }

    #[test]
    fn local_day_follows_offset() {
        let seoul = Calendar::new(Calendar::parse_offset("+09:00").unwrap());
        let instant = at("2024-03-10T16:30:00Z");
        assert_eq!(seoul.local_date(instant).day(), 11);

        let (start, end) = seoul.day_bounds(instant);
        assert_eq!(start, at("2024-03-10T15:00:00Z"));
        assert_eq!(end, at("2024-03-11T15:00:00Z"));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(at("2024-01-01T00:00:00Z"));
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), at("2024-01-01T00:00:30Z"));
    }
}
