//! Time utilities: fixed-offset wall clock, local dates, next occurrences.

use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};

use crate::error::{DoseError, Result};

/// Source of "now". Everything date-dependent asks the clock at fire time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Handy for driving the engine in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Parse a fixed UTC offset like "+03:00", "-05:30" or "Z".
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| DoseError::config("invalid offset"));
    }

    let (sign, rest) = match s.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(DoseError::config(format!("invalid utc offset '{s}' (expected +HH:MM)"))),
    };

    let (h, m) = rest
        .split_once(':')
        .ok_or_else(|| DoseError::config(format!("invalid utc offset '{s}' (expected +HH:MM)")))?;
    let h: i32 = h
        .parse()
        .map_err(|_| DoseError::config(format!("invalid offset hours in '{s}'")))?;
    let m: i32 = m
        .parse()
        .map_err(|_| DoseError::config(format!("invalid offset minutes in '{s}'")))?;
    if !(0..=14).contains(&h) || !(0..60).contains(&m) {
        return Err(DoseError::config(format!("utc offset out of range: {s}")));
    }

    FixedOffset::east_opt(sign * (h * 3600 + m * 60))
        .ok_or_else(|| DoseError::config(format!("utc offset out of range: {s}")))
}

/// Parse a wall-clock time "HH:MM".
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| DoseError::config(format!("invalid time of day '{s}': {e}")))
}

/// Parse a weekday name ("Sun", "sunday", ...).
pub fn parse_weekday(s: &str) -> Result<Weekday> {
    s.trim()
        .parse::<Weekday>()
        .map_err(|_| DoseError::config(format!("invalid weekday '{s}'")))
}

/// Calendar date of `at` in the configured offset.
pub fn local_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

/// Date of the latest occurrence of the daily `time` at or before `at`.
/// Just after midnight that is still yesterday's occurrence.
pub fn last_occurrence_date(at: DateTime<Utc>, offset: FixedOffset, time: NaiveTime) -> NaiveDate {
    let local = at.with_timezone(&offset);
    let today = local.date_naive();
    if local.time() >= time {
        today
    } else {
        today.pred_opt().unwrap_or(today)
    }
}

/// Convert a local wall-clock moment on `date` to UTC.
pub fn local_to_utc(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(time);
    (local - Duration::seconds(offset.local_minus_utc().into())).and_utc()
}

/// First instant strictly after `after` that falls on `time` in `offset`,
/// restricted to `days` when non-empty.
///
/// Occurrences at or before `after` are never returned, so a restarted process
/// does not replay triggers it slept through.
pub fn next_occurrence(
    after: DateTime<Utc>,
    offset: FixedOffset,
    time: NaiveTime,
    days: &[Weekday],
) -> Option<DateTime<Utc>> {
    let start = local_date(after, offset);
    (0..=7)
        .filter_map(|i| start.checked_add_signed(Duration::days(i)))
        .filter(|d| days.is_empty() || days.contains(&d.weekday()))
        .map(|d| local_to_utc(d, time, offset))
        .find(|candidate| *candidate > after)
}
