//! Timezone-aware calendar-day arithmetic.
//!
//! "Today" is always the calendar date of an instant viewed through an IANA
//! time zone. An optional simulated instant replaces the real clock entirely
//! (deterministic tests, admin time travel); it is threaded through as an
//! explicit parameter, never read from global state.
//!
//! Day differences and day offsets work on civil dates only, so a DST
//! transition can never add or lose a day.

use jiff::civil::Date;
use jiff::tz::TimeZone;
use jiff::{Span, Timestamp, Unit};

use crate::error::{EngineError, Result};

/// Resolves calendar days for one time zone and an optional simulated instant.
#[derive(Clone, Debug)]
pub struct DateResolver {
    tz_name: String,
    tz: TimeZone,
    simulated: Option<Timestamp>,
}

impl DateResolver {
    pub fn new(tz_name: &str, simulated: Option<Timestamp>) -> Result<Self> {
        Ok(Self {
            tz_name: tz_name.to_string(),
            tz: time_zone(tz_name)?,
            simulated,
        })
    }

    pub fn tz_name(&self) -> &str {
        &self.tz_name
    }

    pub fn time_zone(&self) -> &TimeZone {
        &self.tz
    }

    pub fn simulated(&self) -> Option<Timestamp> {
        self.simulated
    }

    /// The instant all calendar computations are based on.
    pub fn now(&self) -> Timestamp {
        self.simulated.unwrap_or_else(Timestamp::now)
    }

    pub fn today(&self) -> Date {
        self.now().to_zoned(self.tz.clone()).date()
    }

    /// First instant of the current local day.
    pub fn start_of_day(&self) -> Result<Timestamp> {
        day_start(self.today(), &self.tz)
    }
}

/// Look up an IANA time zone by name.
pub fn time_zone(name: &str) -> Result<TimeZone> {
    TimeZone::get(name).map_err(|e| EngineError::UnknownTimeZone(format!("{name}: {e}")))
}

/// Local calendar date of `override_instant` (or the real clock) in `tz_name`.
pub fn today(tz_name: &str, override_instant: Option<Timestamp>) -> Result<Date> {
    Ok(DateResolver::new(tz_name, override_instant)?.today())
}

/// First instant of the local day containing `override_instant` (or now).
pub fn start_of_day(tz_name: &str, override_instant: Option<Timestamp>) -> Result<Timestamp> {
    DateResolver::new(tz_name, override_instant)?.start_of_day()
}

/// First instant of `date` in `tz`. When midnight is skipped by a DST gap
/// this is the first wall-clock time that exists on that day.
pub fn day_start(date: Date, tz: &TimeZone) -> Result<Timestamp> {
    date.to_zoned(tz.clone())
        .map(|z| z.timestamp())
        .map_err(|e| EngineError::InvalidDate(format!("no start of day for {date}: {e}")))
}

/// Whole calendar days from `a` to `b` (positive when `b` is later).
pub fn diff_in_days(a: Date, b: Date) -> Result<i64> {
    a.until((Unit::Day, b))
        .map(|span| i64::from(span.get_days()))
        .map_err(|e| EngineError::InvalidDate(format!("cannot diff {a} and {b}: {e}")))
}

pub fn add_days(date: Date, n: i64) -> Result<Date> {
    let span = Span::new()
        .try_days(n)
        .map_err(|e| EngineError::InvalidDate(format!("day offset {n} out of range: {e}")))?;
    date.checked_add(span)
        .map_err(|e| EngineError::InvalidDate(format!("{date} + {n} days: {e}")))
}

pub fn month_start(date: Date) -> Date {
    date.first_of_month()
}

pub fn previous_month_start(date: Date) -> Result<Date> {
    date.first_of_month()
        .checked_sub(Span::new().months(1))
        .map_err(|e| EngineError::InvalidDate(format!("no month before {date}: {e}")))
}

pub fn parse_date(s: &str) -> Result<Date> {
    s.trim()
        .parse::<Date>()
        .map_err(|e| EngineError::InvalidDate(format!("'{s}': {e}")))
}

/// Parse a time-travel target: either a full RFC 3339 instant or a bare
/// `YYYY-MM-DD`, which maps to the start of that day in `tz`.
pub fn parse_simulated_instant(s: &str, tz: &TimeZone) -> Result<Timestamp> {
    let s = s.trim();
    if let Ok(ts) = s.parse::<Timestamp>() {
        return Ok(ts);
    }
    day_start(parse_date(s)?, tz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::civil::date;

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    #[test]
    fn test_today_uses_override_exclusively() {
        let at = ts("2024-06-15T12:00:00Z");
        assert_eq!(today("UTC", Some(at)).unwrap(), date(2024, 6, 15));
        assert_eq!(
            today("Pacific/Kiritimati", Some(at)).unwrap(),
            date(2024, 6, 16)
        );
        assert_eq!(
            today("America/Los_Angeles", Some(ts("2024-06-15T06:59:59Z"))).unwrap(),
            date(2024, 6, 14)
        );
    }

    #[test]
    fn test_today_without_override_is_recent() {
        let d = today("UTC", None).unwrap();
        assert!(d.year() >= 2024, "clock should be in the present: {d}");
    }

    #[test]
    fn test_day_boundary_follows_dst_not_fixed_offset() {
        // 00:30 EDT on the day after spring-forward; a fixed EST offset would say 23:30 the day before.
        let at = ts("2024-03-11T04:30:00Z");
        assert_eq!(today("America/New_York", Some(at)).unwrap(), date(2024, 3, 11));
        assert_eq!(
            start_of_day("America/New_York", Some(at)).unwrap(),
            ts("2024-03-11T04:00:00Z")
        );

        let before = ts("2024-03-10T03:30:00Z");
        assert_eq!(
            today("America/New_York", Some(before)).unwrap(),
            date(2024, 3, 9)
        );
        assert_eq!(
            start_of_day("America/New_York", Some(ts("2024-11-03T12:00:00Z"))).unwrap(),
            ts("2024-11-03T04:00:00Z")
        );
    }

    #[test]
    fn test_unknown_time_zone() {
        let err = today("Mars/Olympus_Mons", None).unwrap_err();
        assert!(matches!(err, EngineError::UnknownTimeZone(_)));
        assert!(err.is_data_integrity());
    }

    #[test]
    fn test_diff_in_days_across_dst_and_months() {
        assert_eq!(diff_in_days(date(2024, 3, 9), date(2024, 3, 11)).unwrap(), 2);
        assert_eq!(diff_in_days(date(2024, 1, 31), date(2024, 3, 1)).unwrap(), 30);
        assert_eq!(diff_in_days(date(2024, 3, 1), date(2024, 2, 28)).unwrap(), -2);
        assert_eq!(diff_in_days(date(2024, 5, 5), date(2024, 5, 5)).unwrap(), 0);
    }

    #[test]
    fn test_add_days() {
        assert_eq!(add_days(date(2024, 2, 28), 1).unwrap(), date(2024, 2, 29));
        assert_eq!(add_days(date(2024, 3, 1), -1).unwrap(), date(2024, 2, 29));
        assert_eq!(add_days(date(2023, 12, 31), 1).unwrap(), date(2024, 1, 1));
        assert!(add_days(date(9999, 12, 31), 1).is_err());
    }

    #[test]
    fn test_month_starts() {
        assert_eq!(month_start(date(2024, 3, 17)), date(2024, 3, 1));
        assert_eq!(
            previous_month_start(date(2024, 3, 17)).unwrap(),
            date(2024, 2, 1)
        );
        assert_eq!(
            previous_month_start(date(2024, 1, 1)).unwrap(),
            date(2023, 12, 1)
        );
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert_eq!(parse_date("2024-07-04").unwrap(), date(2024, 7, 4));
        assert!(matches!(
            parse_date("2024-13-40"),
            Err(EngineError::InvalidDate(_))
        ));
        assert!(parse_date("").is_err());
    }

    #[test]
    fn test_parse_simulated_instant() {
        let tz = time_zone("Europe/Berlin").unwrap();
        assert_eq!(
            parse_simulated_instant("2024-01-10T08:00:00Z", &tz).unwrap(),
            ts("2024-01-10T08:00:00Z")
        );
        // Bare date: local midnight, CET is UTC+1 in January.
        assert_eq!(
            parse_simulated_instant("2024-01-10", &tz).unwrap(),
            ts("2024-01-09T23:00:00Z")
        );
        assert!(parse_simulated_instant("next tuesday", &tz).is_err());
    }

    #[test]
    fn test_resolver_start_of_day_matches_today() {
        let r = DateResolver::new("Asia/Tokyo", Some(ts("2024-08-01T20:00:00Z"))).unwrap();
        assert_eq!(r.today(), date(2024, 8, 2));
        assert_eq!(r.start_of_day().unwrap(), ts("2024-08-01T15:00:00Z"));
        assert_eq!(r.tz_name(), "Asia/Tokyo");
    }
}
