//! Busy-period merging for the suggester.
//!
//! Clips intervals to a window, sorts them by start time, then merges
//! overlapping or adjacent periods.

use chrono::{DateTime, Utc};

use crate::interval::TimeInterval;

/// Merge overlapping or adjacent busy periods, clipped to `window`.
///
/// Returns a sorted, non-overlapping list of intervals.
pub fn merge_busy_periods(busy: &[TimeInterval], window: &TimeInterval) -> Vec<TimeInterval> {
    // Clip to the window, discarding intervals entirely outside.
    let mut clipped: Vec<(DateTime<Utc>, DateTime<Utc>)> = busy
        .iter()
        .filter(|b| b.overlaps(window))
        .map(|b| (b.start().max(window.start()), b.end().min(window.end())))
        .collect();

    clipped.sort_by_key(|&(start, end)| (start, end));

    let mut merged: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();
    for (start, end) in clipped {
        if let Some(last) = merged.last_mut() {
            if start <= last.1 {
                last.1 = last.1.max(end);
                continue;
            }
        }
        merged.push((start, end));
    }

    merged
        .into_iter()
        .filter_map(|(start, end)| TimeInterval::new(start, end).ok())
        .collect()
}
