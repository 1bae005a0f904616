//! Recurrence specifications: fixed interval or five-field cron.
//!
//! See SPEC_FULL.md §4.2. The interval grammar is tried first; anything that
//! doesn't match it is handed to the cron parser, matching spec.md's
//! "MUST accept both forms transparently" requirement.

use std::fmt;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::LazyLock;

use crate::error::ScheduleError;

static INTERVAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*every\s+([0-9]+(?:\.[0-9]+)?)\s+seconds?\s*$").unwrap()
});

/// A week-long horizon would catch almost every realistic schedule; four
/// years covers leap-day-only schedules (`0 0 29 2 *`) without looping
/// forever on genuinely unsatisfiable fields (e.g. day-of-month 31 crossed
/// with month February).
const SEARCH_HORIZON_MINUTES: i64 = 4 * 366 * 24 * 60;

#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    /// Every `N` seconds, `N` a positive float.
    Interval(f64),
    Cron(CronSpec),
}

impl Schedule {
    /// Parses either grammar, interval first.
    pub fn parse(s: &str) -> Result<Self, ScheduleError> {
        if let Some(caps) = INTERVAL_RE.captures(s) {
            let n: f64 = caps[1]
                .parse()
                .map_err(|_| ScheduleError::Parse(s.to_string()))?;
            if n <= 0.0 {
                return Err(ScheduleError::FieldOutOfRange(
                    "interval seconds must be positive".into(),
                ));
            }
            return Ok(Schedule::Interval(n));
        }
        CronSpec::parse(s).map(Schedule::Cron)
    }

    /// The first instant strictly after `t` (UTC) that this schedule fires,
    /// evaluating cron fields in `tz`.
    pub fn next_after(&self, t: DateTime<Utc>, tz: Tz) -> Result<DateTime<Utc>, ScheduleError> {
        match self {
            Schedule::Interval(n) => {
                let millis = (n * 1000.0).round() as i64;
                Ok(t + chrono::TimeDelta::milliseconds(millis))
            }
            Schedule::Cron(spec) => spec.next_after(t, tz),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Interval(n) => write!(f, "every {n} seconds"),
            Schedule::Cron(spec) => write!(f, "{spec}"),
        }
    }
}

/// Five whitespace-separated fields: minute, hour, day-of-month, month,
/// day-of-week. Day-of-week follows the conventional cron numbering,
/// `0` = Sunday .. `6` = Saturday (spec.md does not pin a numbering; this is
/// a documented decision, see DESIGN.md).
#[derive(Debug, Clone, PartialEq)]
pub struct CronSpec {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
    raw: String,
}

impl CronSpec {
    pub fn parse(s: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::Parse(s.to_string()));
        }
        Ok(CronSpec {
            minute: CronField::parse(fields[0], 0, 59)?,
            hour: CronField::parse(fields[1], 0, 23)?,
            day_of_month: CronField::parse(fields[2], 1, 31)?,
            month: CronField::parse(fields[3], 1, 12)?,
            day_of_week: CronField::parse(fields[4], 0, 6)?,
            raw: s.trim().to_string(),
        })
    }

    /// First instant strictly after `t`, searched minute-by-minute in `tz`.
    fn next_after(&self, t: DateTime<Utc>, tz: Tz) -> Result<DateTime<Utc>, ScheduleError> {
        let local = t.with_timezone(&tz);
        let mut candidate = local
            .date_naive()
            .and_hms_opt(local.hour(), local.minute(), 0)
            .expect("valid hms")
            + chrono::TimeDelta::minutes(1);

        for _ in 0..SEARCH_HORIZON_MINUTES {
            if self.matches(&candidate) {
                let zoned = tz
                    .from_local_datetime(&candidate)
                    .earliest()
                    .unwrap_or_else(|| tz.from_utc_datetime(&candidate));
                return Ok(zoned.with_timezone(&Utc));
            }
            candidate += chrono::TimeDelta::minutes(1);
        }
        Err(ScheduleError::Unsatisfiable)
    }

    fn matches(&self, naive: &chrono::NaiveDateTime) -> bool {
        if !self.minute.matches(naive.minute()) {
            return false;
        }
        if !self.hour.matches(naive.hour()) {
            return false;
        }
        if !self.month.matches(naive.month()) {
            return false;
        }
        // Vixie-cron rule: when both day-of-month and day-of-week are
        // restricted, a day matches if EITHER restriction matches.
        let dom_restricted = !self.day_of_month.is_wildcard();
        let dow_restricted = !self.day_of_week.is_wildcard();
        let weekday_num = naive.weekday().num_days_from_sunday();
        match (dom_restricted, dow_restricted) {
            (true, true) => {
                self.day_of_month.matches(naive.day()) || self.day_of_week.matches(weekday_num)
            }
            (true, false) => self.day_of_month.matches(naive.day()),
            (false, true) => self.day_of_week.matches(weekday_num),
            (false, false) => true,
        }
    }
}

impl fmt::Display for CronSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CronField {
    items: Vec<CronItem>,
}

#[derive(Debug, Clone, PartialEq)]
enum CronItem {
    Star,
    StarStep(u32),
    Single(u32),
    Range(u32, u32),
    RangeStep(u32, u32, u32),
}

impl CronField {
    fn parse(s: &str, min: u32, max: u32) -> Result<Self, ScheduleError> {
        let items = s
            .split(',')
            .map(|part| Self::parse_item(part, min, max))
            .collect::<Result<Vec<_>, _>>()?;
        if items.is_empty() {
            return Err(ScheduleError::Parse(s.to_string()));
        }
        Ok(CronField { items })
    }

    fn parse_item(part: &str, min: u32, max: u32) -> Result<CronItem, ScheduleError> {
        if let Some((base, step)) = part.split_once('/') {
            let step: u32 = step
                .parse()
                .map_err(|_| ScheduleError::Parse(part.to_string()))?;
            if step == 0 {
                return Err(ScheduleError::FieldOutOfRange(format!(
                    "step must be positive: {part}"
                )));
            }
            if base == "*" {
                return Ok(CronItem::StarStep(step));
            }
            let (lo, hi) = Self::parse_range(base, min, max)?;
            return Ok(CronItem::RangeStep(lo, hi, step));
        }
        if part == "*" {
            return Ok(CronItem::Star);
        }
        if part.contains('-') {
            let (lo, hi) = Self::parse_range(part, min, max)?;
            return Ok(CronItem::Range(lo, hi));
        }
        let v: u32 = part
            .parse()
            .map_err(|_| ScheduleError::Parse(part.to_string()))?;
        Self::check_bounds(v, min, max)?;
        Ok(CronItem::Single(v))
    }

    fn parse_range(s: &str, min: u32, max: u32) -> Result<(u32, u32), ScheduleError> {
        let (lo, hi) = s
            .split_once('-')
            .ok_or_else(|| ScheduleError::Parse(s.to_string()))?;
        let lo: u32 = lo.parse().map_err(|_| ScheduleError::Parse(s.to_string()))?;
        let hi: u32 = hi.parse().map_err(|_| ScheduleError::Parse(s.to_string()))?;
        Self::check_bounds(lo, min, max)?;
        Self::check_bounds(hi, min, max)?;
        if lo > hi {
            return Err(ScheduleError::FieldOutOfRange(format!(
                "range start after end: {s}"
            )));
        }
        Ok((lo, hi))
    }

    fn check_bounds(v: u32, min: u32, max: u32) -> Result<(), ScheduleError> {
        if v < min || v > max {
            return Err(ScheduleError::FieldOutOfRange(format!(
                "{v} out of range [{min}, {max}]"
            )));
        }
        Ok(())
    }

    fn matches(&self, value: u32) -> bool {
        self.items.iter().any(|item| match item {
            CronItem::Star => true,
            CronItem::StarStep(step) => value % step == 0,
            CronItem::Single(v) => *v == value,
            CronItem::Range(lo, hi) => (*lo..=*hi).contains(&value),
            CronItem::RangeStep(lo, hi, step) => {
                (*lo..=*hi).contains(&value) && (value - lo) % step == 0
            }
        })
    }

    fn is_wildcard(&self) -> bool {
        matches!(self.items.as_slice(), [CronItem::Star])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_interval() {
        assert_eq!(Schedule::parse("every 30 seconds"), Ok(Schedule::Interval(30.0)));
        assert_eq!(
            Schedule::parse("every 1.5 seconds"),
            Ok(Schedule::Interval(1.5))
        );
    }

    #[test]
    fn interval_round_trips() {
        let s = Schedule::Interval(45.0);
        let again = Schedule::parse(&s.to_string()).unwrap();
        assert_eq!(s, again);
    }

    #[test]
    fn parses_complex_cron() {
        let s = Schedule::parse("*/10 1,2-10 * * *").unwrap();
        assert!(matches!(s, Schedule::Cron(_)));
        assert_eq!(s.to_string(), "*/10 1,2-10 * * *");
    }

    #[test]
    fn rejects_malformed_cron() {
        assert!(Schedule::parse("not a schedule").is_err());
        assert!(Schedule::parse("* * * *").is_err());
    }

    #[test]
    fn cron_next_after_daily_midnight() {
        let spec = CronSpec::parse("0 0 * * *").unwrap();
        let t = Utc.with_ymd_and_hms(2026, 7, 27, 13, 0, 0).unwrap();
        let next = spec.next_after(t, chrono_tz::UTC).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap());
    }

    #[test]
    fn cron_day_of_month_or_day_of_week() {
        // Fires on the 1st OR on Monday - a classic Vixie-cron OR case.
        let spec = CronSpec::parse("0 0 1 * 1").unwrap();
        let t = Utc.with_ymd_and_hms(2026, 7, 27, 0, 0, 0).unwrap(); // a Monday
        let next = spec.next_after(t, chrono_tz::UTC).unwrap();
        assert!(next.weekday() == chrono::Weekday::Mon || next.day() == 1);
    }

    #[test]
    fn unsatisfiable_cron_errors_instead_of_looping() {
        // Not truly unsatisfiable (leap years exist), but exercises the
        // sparse-field path without hanging.
        let spec = CronSpec::parse("0 0 29 2 *").unwrap();
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let next = spec.next_after(t, chrono_tz::UTC).unwrap();
        assert_eq!(next.month(), 2);
        assert_eq!(next.day(), 29);
    }
}
