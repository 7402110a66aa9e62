//! The local-time ⇄ instant boundary.
//!
//! Every conversion between wall-clock time in a participant's timezone and an
//! absolute UTC instant goes through this module. Nothing else in the crate
//! slices timestamp strings or applies offsets by hand, so DST transitions are
//! resolved in exactly one place.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SchedulingError};

/// Policy for local times that fall during DST transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DstPolicy {
    /// Drop local times that fall in the DST gap (e.g., 2:30 AM during spring forward).
    Skip,
    /// Move to the first valid instant after the gap.
    ShiftForward,
    /// Keep the wall-clock reading and apply the offset in force before the
    /// gap, so 02:30 on a spring-forward night resolves to 03:30.
    #[default]
    WallClock,
}

/// Longest DST gap searched across when shifting forward.
const MAX_GAP_MINUTES: i64 = 180;

/// Parse an IANA timezone identifier (e.g. `"America/New_York"`).
pub fn parse_timezone(name: &str) -> Result<Tz> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SchedulingError::InvalidTimezone("empty timezone".to_string()));
    }
    trimmed
        .parse()
        .map_err(|_| SchedulingError::InvalidTimezone(trimmed.to_string()))
}

/// Wall-clock reading of `instant` in `tz`.
pub fn localize(instant: DateTime<Utc>, tz: Tz) -> NaiveDateTime {
    instant.with_timezone(&tz).naive_local()
}

/// Resolve a wall-clock reading in `tz` to an absolute instant.
///
/// Ambiguous readings (the repeated hour when clocks fall back) resolve to the
/// earlier instant. Readings inside a spring-forward gap follow `policy`;
/// `None` is only returned under [`DstPolicy::Skip`].
pub fn resolve_local(naive: NaiveDateTime, tz: Tz, policy: DstPolicy) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => match policy {
            DstPolicy::Skip => None,
            DstPolicy::ShiftForward => first_valid_after(naive, tz),
            DstPolicy::WallClock => with_offset_before_gap(naive, tz),
        },
    }
}

fn first_valid_after(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    (1..=MAX_GAP_MINUTES).find_map(|step| {
        tz.from_local_datetime(&naive.checked_add_signed(Duration::minutes(step))?)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn with_offset_before_gap(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    let before = tz
        .from_local_datetime(&naive.checked_sub_signed(Duration::minutes(MAX_GAP_MINUTES))?)
        .earliest()?;
    let offset_seconds = before.offset().fix().local_minus_utc();
    naive
        .checked_sub_signed(Duration::seconds(offset_seconds as i64))
        .map(|utc| utc.and_utc())
}

/// UTC offset of `tz` at `instant`, in minutes east of UTC.
pub fn offset_minutes(instant: DateTime<Utc>, tz: Tz) -> i32 {
    instant.with_timezone(&tz).offset().fix().local_minus_utc() / 60
}

/// Clock reading like `"1:30 PM"`, used in user-facing conflict messages.
pub fn format_clock(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%-I:%M %p").to_string()
}
