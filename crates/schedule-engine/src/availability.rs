//! Weekly availability evaluation.
//!
//! Decides whether a concrete UTC interval, read in a participant's timezone,
//! fits inside one of that participant's windows for the local weekday of the
//! interval's start.
//!
//! All comparisons are offsets from local midnight of the *start's* local date.
//! Window boundaries are anchored to that same date, which keeps DST-transition
//! days correct: on a spring-forward day 07:00 local is still 07:00 local even
//! though only 6 hours have elapsed since midnight. An interval ending on the
//! next local day gets an end offset past 24h and so never fits a window.
//!
//! The evaluation fails closed: a day with no entry, a window that does not
//! parse, or a window whose start is not before its end all mean "unavailable".

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};
use chrono_tz::Tz;
use tracing::debug;

use crate::interval::TimeInterval;
use crate::model::{WeeklyAvailability, WindowSpec};
use crate::zone::{self, DstPolicy};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// A parsed window as seconds from local midnight, `start < end <= 86400`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start_seconds: i64,
    pub end_seconds: i64,
}

impl DayWindow {
    /// Inclusive on both boundaries: a slot may start exactly at the window
    /// start and end exactly at the window end.
    pub fn contains(&self, start_seconds: i64, end_seconds: i64) -> bool {
        start_seconds >= self.start_seconds && end_seconds <= self.end_seconds
    }
}

/// Outcome of evaluating one participant for one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityCheck {
    /// Fits entirely inside one window.
    Within,
    /// The weekday has windows but none contains the interval.
    OutsideWindows(Weekday),
    /// The weekday has no usable window at all.
    NoWindows(Weekday),
}

impl AvailabilityCheck {
    pub fn is_within(self) -> bool {
        matches!(self, AvailabilityCheck::Within)
    }
}

/// `true` iff `interval` fits inside a single availability window.
pub fn is_within_availability(interval: &TimeInterval, tz: Tz, weekly: &WeeklyAvailability) -> bool {
    evaluate(interval, tz, weekly).is_within()
}

/// Like [`is_within_availability`] but reports why an interval was rejected.
pub fn evaluate(interval: &TimeInterval, tz: Tz, weekly: &WeeklyAvailability) -> AvailabilityCheck {
    let local_start = zone::localize(interval.start(), tz);
    let local_end = zone::localize(interval.end(), tz);
    let weekday = local_start.weekday();

    let windows = windows_for(weekly, weekday);
    if windows.is_empty() {
        return AvailabilityCheck::NoWindows(weekday);
    }

    let midnight = local_start.date().and_time(NaiveTime::MIN);
    let start_seconds = (local_start - midnight).num_seconds();
    let end_seconds = (local_end - midnight).num_seconds();

    if windows
        .iter()
        .any(|window| window.contains(start_seconds, end_seconds))
    {
        AvailabilityCheck::Within
    } else {
        AvailabilityCheck::OutsideWindows(weekday)
    }
}

/// The valid windows configured for `weekday`, in configuration order.
pub fn windows_for(weekly: &WeeklyAvailability, weekday: Weekday) -> Vec<DayWindow> {
    let Some(schedule) = weekly.day(weekday) else {
        return Vec::new();
    };
    schedule
        .windows()
        .iter()
        .filter_map(|spec| {
            let parsed = parse_window(spec);
            if parsed.is_none() {
                debug!(?weekday, ?spec, "ignoring unusable availability window");
            }
            parsed
        })
        .collect()
}

/// Parse a window spec; `None` when either boundary is missing or malformed,
/// or when the window is empty.
pub fn parse_window(spec: &WindowSpec) -> Option<DayWindow> {
    let start_seconds = parse_time_of_day(spec.start.as_deref()?)?;
    let end_seconds = parse_time_of_day(spec.end.as_deref()?)?;
    (start_seconds < end_seconds).then_some(DayWindow {
        start_seconds,
        end_seconds,
    })
}

/// `"HH:MM"` or `"HH:MM:SS"` as seconds from midnight. `"24:00"` is end of day.
fn parse_time_of_day(value: &str) -> Option<i64> {
    let value = value.trim();
    if value == "24:00" || value == "24:00:00" {
        return Some(SECONDS_PER_DAY);
    }
    let time = NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()?;
    Some(time.num_seconds_from_midnight() as i64)
}

/// The absolute interval `window` covers on local `date` in `tz`.
///
/// Boundaries inside a DST gap are moved to the first valid instant after it.
pub fn window_interval(date: NaiveDate, window: DayWindow, tz: Tz) -> Option<TimeInterval> {
    let midnight = date.and_time(NaiveTime::MIN);
    let start = zone::resolve_local(
        midnight + chrono::Duration::seconds(window.start_seconds),
        tz,
        DstPolicy::ShiftForward,
    )?;
    let end = zone::resolve_local(
        midnight + chrono::Duration::seconds(window.end_seconds),
        tz,
        DstPolicy::ShiftForward,
    )?;
    TimeInterval::new(start, end).ok()
}

/// Full English weekday name, e.g. `"Monday"`.
pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}
