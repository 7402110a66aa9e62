//! Alternative slot search for a rejected session request.
//!
//! Candidates are generated inside the intersection of the therapist's and the
//! client's windows, on the rejected day first and then on the surrounding
//! days. A candidate that is not inside both participants' availability, or
//! that overlaps an active session of either of them, is dropped outright.
//! Survivors are scored:
//!
//! ```text
//! score = 0.7 * proximity + 0.3 * breathing_room
//! proximity      = 1 - |candidate.start - rejected.start| / search span
//! breathing_room = min(gap to nearest session, 60 min) / 60 min
//! ```
//!
//! and returned best first, ties broken by the earlier start.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::availability::{self, DayWindow};
use crate::freebusy::merge_busy_periods;
use crate::interval::TimeInterval;
use crate::model::{Conflict, ExistingSession, Participant};
use crate::zone::{self, DstPolicy};

const PROXIMITY_WEIGHT: f64 = 0.7;
const BREATHING_ROOM_WEIGHT: f64 = 0.3;
const COMFORTABLE_GAP_MINUTES: f64 = 60.0;

/// Widest search on each side of the rejected day.
pub const MAX_SEARCH_DAYS: i64 = 31;
/// Coarsest candidate spacing: one candidate per day.
pub const MAX_STEP_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeTime {
    pub interval: TimeInterval,
    /// Fit in `[0, 1]`; higher is better.
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct SuggestOptions {
    pub time_zone: Tz,
    /// Days searched on each side of the rejected day, at most
    /// [`MAX_SEARCH_DAYS`].
    pub search_days: i64,
    /// Spacing between candidate start times, at most [`MAX_STEP_MINUTES`].
    pub step_minutes: i64,
    pub max_results: usize,
    /// Session being edited in place; it does not block candidates.
    pub exclude_session_id: Option<String>,
}

impl Default for SuggestOptions {
    fn default() -> Self {
        Self {
            time_zone: Tz::UTC,
            search_days: 3,
            step_minutes: 15,
            max_results: 5,
            exclude_session_id: None,
        }
    }
}

/// Rank alternative slots for a rejected interval.
///
/// Returns an empty list when nothing viable exists in the search window.
pub fn suggest(
    rejected: &TimeInterval,
    conflicts: &[Conflict],
    therapist: &Participant,
    client: &Participant,
    existing: &[ExistingSession],
    options: &SuggestOptions,
) -> Vec<AlternativeTime> {
    let tz = options.time_zone;
    let duration = rejected.duration();
    let step = Duration::minutes(options.step_minutes.clamp(1, MAX_STEP_MINUTES));
    let search_days = options.search_days.clamp(0, MAX_SEARCH_DAYS);
    let span_seconds = ((search_days + 1) * 24 * 60 * 60) as f64;

    let sessions: Vec<TimeInterval> = existing
        .iter()
        .filter(|s| s.status.is_active())
        .filter(|s| options.exclude_session_id.as_deref() != Some(s.id.as_str()))
        .filter(|s| s.involves(&therapist.id, &client.id))
        .map(|s| s.interval)
        .collect();
    let reach = Duration::days(search_days + 2);
    let window = rejected
        .start()
        .checked_sub_signed(reach)
        .zip(rejected.end().checked_add_signed(reach))
        .and_then(|(start, end)| TimeInterval::new(start, end).ok());
    let busy = match window {
        Some(window) => merge_busy_periods(&sessions, &window),
        None => sessions,
    };

    let base_date = zone::localize(rejected.start(), tz).date();
    let mut seen = BTreeSet::new();
    let mut scored = Vec::new();

    for day_offset in day_order(search_days) {
        let Some(date) = base_date.checked_add_signed(Duration::days(day_offset)) else {
            continue;
        };
        let weekday = date.weekday();
        let shared = shared_windows(
            &availability::windows_for(&therapist.availability, weekday),
            &availability::windows_for(&client.availability, weekday),
        );

        for window in shared {
            let midnight = date.and_time(NaiveTime::MIN);
            let bounds = midnight
                .checked_add_signed(Duration::seconds(window.start_seconds))
                .zip(
                    midnight
                        .checked_add_signed(Duration::seconds(window.end_seconds))
                        .and_then(|end| end.checked_sub_signed(duration)),
                );
            let Some((mut local, last_start)) = bounds else {
                continue;
            };

            while local <= last_start {
                let candidate = zone::resolve_local(local, tz, DstPolicy::Skip).and_then(|start| {
                    let end = start.checked_add_signed(duration)?;
                    TimeInterval::new(start, end).ok()
                });
                let Some(next) = local.checked_add_signed(step) else {
                    break;
                };
                local = next;

                let Some(candidate) = candidate else { continue };
                if !conflicts.is_empty() && candidate == *rejected {
                    continue;
                }
                if !seen.insert(candidate.start()) {
                    continue;
                }
                if !availability::is_within_availability(&candidate, tz, &therapist.availability)
                    || !availability::is_within_availability(&candidate, tz, &client.availability)
                {
                    continue;
                }
                if busy.iter().any(|b| b.overlaps(&candidate)) {
                    continue;
                }

                let distance = (candidate.start() - rejected.start()).num_seconds().abs() as f64;
                let proximity = (1.0 - distance / span_seconds).clamp(0.0, 1.0);
                let gap = nearest_gap_minutes(&candidate, &busy);
                let room = gap.map_or(1.0, |m| (m as f64 / COMFORTABLE_GAP_MINUTES).min(1.0));
                let score = round3(PROXIMITY_WEIGHT * proximity + BREATHING_ROOM_WEIGHT * room);

                scored.push(AlternativeTime {
                    interval: candidate,
                    score,
                    reason: describe(day_offset, candidate.start(), tz, gap),
                });
            }
        }
    }

    debug!(candidates = scored.len(), "scored alternative slots");
    rank(scored, options.max_results)
}

/// 0, -1, 1, -2, 2, ... up to `search_days` on each side.
fn day_order(search_days: i64) -> impl Iterator<Item = i64> {
    std::iter::once(0).chain((1..=search_days).flat_map(|d| [-d, d]))
}

/// Pairwise intersections of two window lists.
fn shared_windows(a: &[DayWindow], b: &[DayWindow]) -> Vec<DayWindow> {
    a.iter()
        .flat_map(|x| {
            b.iter().filter_map(move |y| {
                let start_seconds = x.start_seconds.max(y.start_seconds);
                let end_seconds = x.end_seconds.min(y.end_seconds);
                (start_seconds < end_seconds).then_some(DayWindow {
                    start_seconds,
                    end_seconds,
                })
            })
        })
        .collect()
}

/// Minutes between `candidate` and the closest busy interval, if any.
fn nearest_gap_minutes(candidate: &TimeInterval, busy: &[TimeInterval]) -> Option<i64> {
    busy.iter()
        .map(|b| {
            if b.end() <= candidate.start() {
                (candidate.start() - b.end()).num_minutes()
            } else {
                (b.start() - candidate.end()).num_minutes()
            }
        })
        .min()
}

fn describe(day_offset: i64, start: DateTime<Utc>, tz: Tz, gap: Option<i64>) -> String {
    let day = match day_offset {
        0 => "Same day".to_string(),
        1 => "Next day".to_string(),
        -1 => "Previous day".to_string(),
        n if n > 0 => format!("{} days later", n),
        n => format!("{} days earlier", -n),
    };
    let spacing = match gap {
        None => "no other sessions nearby".to_string(),
        Some(0) => "back-to-back with another session".to_string(),
        Some(m) => format!("{} min from the nearest session", m),
    };
    format!(
        "{} at {}; both participants available, {}",
        day,
        zone::format_clock(start, tz),
        spacing
    )
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Sort best first (earlier start on ties), clamp scores, keep `max_results`.
pub fn rank(mut alternatives: Vec<AlternativeTime>, max_results: usize) -> Vec<AlternativeTime> {
    alternatives.retain(|alt| alt.score.is_finite());
    for alt in &mut alternatives {
        alt.score = alt.score.clamp(0.0, 1.0);
    }
    alternatives.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.interval.start().cmp(&b.interval.start()))
    });
    alternatives.truncate(max_results);
    alternatives
}

// ── Scorer seam ─────────────────────────────────────────────────────────────

/// Everything a scorer needs to propose alternatives.
#[derive(Debug, Clone)]
pub struct SuggestionRequest {
    pub rejected: TimeInterval,
    pub conflicts: Vec<Conflict>,
    pub therapist: Participant,
    pub client: Participant,
    pub existing: Vec<ExistingSession>,
    pub options: SuggestOptions,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScorerError {
    #[error("scorer unavailable: {0}")]
    Unavailable(String),

    #[error("scorer rejected the request: {0}")]
    Rejected(String),
}

/// Produces ranked alternatives; may live in another process.
#[async_trait]
pub trait SlotScorer: Send + Sync {
    async fn score(&self, request: &SuggestionRequest) -> Result<Vec<AlternativeTime>, ScorerError>;
}

/// Scores with [`suggest`] in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSlotScorer;

#[async_trait]
impl SlotScorer for LocalSlotScorer {
    async fn score(&self, request: &SuggestionRequest) -> Result<Vec<AlternativeTime>, ScorerError> {
        Ok(suggest(
            &request.rejected,
            &request.conflicts,
            &request.therapist,
            &request.client,
            &request.existing,
            &request.options,
        ))
    }
}

/// Ask `scorer` for alternatives, failing open.
///
/// Scorer failures are logged and produce an empty list; this never errors.
pub async fn suggest_alternatives(
    scorer: &dyn SlotScorer,
    request: &SuggestionRequest,
) -> Vec<AlternativeTime> {
    match scorer.score(request).await {
        Ok(alternatives) => rank(alternatives, request.options.max_results),
        Err(error) => {
            warn!(%error, "alternative-time scorer failed; returning no suggestions");
            Vec::new()
        }
    }
}
