//! CF-convention time units ("hours since 1900-01-01 00:00:00.0") and
//! conversions between numeric time values and datetimes.
use std::fmt::Display;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::TimeError;

/// Reference time units of the standardized output.
pub const CMOR_TIME_UNITS: &str = "days since 1850-1-1 00:00:00.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TimeStep {
    #[strum(serialize = "seconds")]
    Seconds,
    #[strum(serialize = "minutes")]
    Minutes,
    #[strum(serialize = "hours")]
    Hours,
    #[strum(serialize = "days")]
    Days,
}

impl TimeStep {
    pub fn seconds(&self) -> f64 {
        match self {
            TimeStep::Seconds => 1.0,
            TimeStep::Minutes => 60.0,
            TimeStep::Hours => 3600.0,
            TimeStep::Days => 86400.0,
        }
    }

    fn from_units_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "second" | "seconds" | "sec" | "secs" | "s" => Some(Self::Seconds),
            "minute" | "minutes" | "min" | "mins" => Some(Self::Minutes),
            "hour" | "hours" | "hr" | "hrs" | "h" => Some(Self::Hours),
            "day" | "days" | "d" => Some(Self::Days),
            _ => None,
        }
    }
}

/// Parsed time units of a time coordinate.
///
/// Only calendars equivalent to the proleptic Gregorian calendar are supported.
/// The "standard" calendar differs from it only before 1582, which no observational
/// dataset handled here reaches.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeUnits {
    pub step: TimeStep,
    pub reference: NaiveDateTime,
}

impl TimeUnits {
    pub fn new(step: TimeStep, reference: NaiveDateTime) -> Self {
        Self { step, reference }
    }

    /// Parse units like `days since 1850-1-1`, `hours since 1900-01-01 00:00:00.0`
    /// or `seconds since 1970-01-01T00:00:00Z`.
    pub fn parse(units: &str) -> Result<Self, TimeError> {
        let mut parts = units.split_whitespace();
        let step_word = parts
            .next()
            .ok_or_else(|| TimeError::BadUnitsFormat(units.to_string()))?;
        if parts.next().map(|w| w.to_ascii_lowercase()) != Some("since".to_string()) {
            return Err(TimeError::BadUnitsFormat(units.to_string()));
        }
        let step = TimeStep::from_units_word(step_word).ok_or_else(|| TimeError::UnknownStep {
            step: step_word.to_string(),
            units: units.to_string(),
        })?;

        let rest: Vec<&str> = parts.collect();
        let reference = parse_reference_time(&rest.join(" "))?;
        Ok(Self { step, reference })
    }

    /// Check that a `calendar` attribute value is one we can represent.
    pub fn check_calendar(calendar: &str) -> Result<(), TimeError> {
        match calendar.to_ascii_lowercase().as_str() {
            "standard" | "gregorian" | "proleptic_gregorian" => Ok(()),
            _ => Err(TimeError::UnsupportedCalendar(calendar.to_string())),
        }
    }

    pub fn to_datetime(&self, value: f64) -> Result<NaiveDateTime, TimeError> {
        let micros = value * self.step.seconds() * 1e6;
        if !micros.is_finite() || micros.abs() > i64::MAX as f64 {
            return Err(TimeError::OutOfRange(value));
        }
        self.reference
            .checked_add_signed(Duration::microseconds(micros.round() as i64))
            .ok_or(TimeError::OutOfRange(value))
    }

    pub fn from_datetime(&self, datetime: NaiveDateTime) -> f64 {
        let delta = datetime - self.reference;
        let seconds = delta.num_seconds() as f64
            + (delta - Duration::seconds(delta.num_seconds()))
                .num_microseconds()
                .unwrap_or(0) as f64
                / 1e6;
        seconds / self.step.seconds()
    }

    /// Convert a numeric value in these units into the equivalent value in `target`.
    pub fn convert_value(&self, value: f64, target: &TimeUnits) -> f64 {
        let offset_seconds = (self.reference - target.reference).num_seconds() as f64;
        (value * self.step.seconds() + offset_seconds) / target.step.seconds()
    }
}

impl Display for TimeUnits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} since {}",
            self.step,
            self.reference.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

fn parse_reference_time(s: &str) -> Result<NaiveDateTime, TimeError> {
    let bad = || TimeError::BadReferenceTime(s.to_string());
    let s = s.trim().trim_end_matches('Z').trim_end_matches(" UTC");
    let (date_str, time_str) = match s.split_once(|c: char| c == ' ' || c == 'T') {
        Some((d, t)) => (d, Some(t.trim())),
        None => (s, None),
    };

    // Dates in time units are often not zero padded ("1850-1-1"), so split them by hand.
    let mut date_parts = date_str.split('-');
    let year: i32 = date_parts.next().and_then(|v| v.parse().ok()).ok_or_else(bad)?;
    let month: u32 = date_parts.next().and_then(|v| v.parse().ok()).unwrap_or(1);
    let day: u32 = date_parts.next().and_then(|v| v.parse().ok()).unwrap_or(1);
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(bad)?;

    let time = if let Some(time_str) = time_str.filter(|t| !t.is_empty()) {
        let mut time_parts = time_str.split(':');
        let hour: u32 = time_parts.next().and_then(|v| v.parse().ok()).ok_or_else(bad)?;
        let minute: u32 = time_parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        let second: f64 = time_parts.next().and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let whole = second.trunc() as u32;
        let micro = ((second - second.trunc()) * 1e6).round() as u32;
        NaiveTime::from_hms_micro_opt(hour, minute, whole, micro).ok_or_else(bad)?
    } else {
        NaiveTime::MIN
    };

    Ok(NaiveDateTime::new(date, time))
}
