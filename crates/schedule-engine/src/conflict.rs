//! Conflict detection for a requested session interval.
//!
//! Checks run in a fixed priority order and stop at the first blocking
//! condition:
//!
//! 1. therapist availability → `TherapistUnavailable`
//! 2. client availability → `ClientUnavailable`
//! 3. overlap with an active session of either participant → `SessionOverlap`
//!
//! At most one conflict is ever returned, so a caller never sees an
//! availability conflict and an overlap together. Adjacent sessions (one ends
//! exactly when the other starts) are NOT conflicts.

use chrono_tz::Tz;

use crate::availability::{self, weekday_name, AvailabilityCheck};
use crate::interval::TimeInterval;
use crate::model::{Conflict, ExistingSession, Participant, ParticipantRole};
use crate::zone;

/// Options for [`check_conflicts`].
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Session being edited in place; it never conflicts with itself.
    pub exclude_session_id: Option<String>,
    /// Zone for reading availability windows and formatting messages.
    pub time_zone: Tz,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            exclude_session_id: None,
            time_zone: Tz::UTC,
        }
    }
}

impl CheckOptions {
    pub fn in_zone(time_zone: Tz) -> Self {
        Self {
            time_zone,
            ..Self::default()
        }
    }

    pub fn excluding(mut self, session_id: impl Into<String>) -> Self {
        self.exclude_session_id = Some(session_id.into());
        self
    }
}

/// Classify `interval` for the therapist/client pair against `existing`.
///
/// Recurring sessions must already be expanded into one row per occurrence.
pub fn check_conflicts(
    interval: &TimeInterval,
    therapist: &Participant,
    client: &Participant,
    existing: &[ExistingSession],
    options: &CheckOptions,
) -> Vec<Conflict> {
    let tz = options.time_zone;

    if let Some(conflict) = availability_conflict(interval, therapist, ParticipantRole::Therapist, tz) {
        return vec![conflict];
    }
    if let Some(conflict) = availability_conflict(interval, client, ParticipantRole::Client, tz) {
        return vec![conflict];
    }

    first_overlap(
        interval,
        &therapist.id,
        &client.id,
        existing,
        options.exclude_session_id.as_deref(),
    )
    .map(|session| Conflict::SessionOverlap {
        message: format!(
            "Overlaps with existing session from {} to {}",
            zone::format_clock(session.interval.start(), tz),
            zone::format_clock(session.interval.end(), tz)
        ),
        session_id: session.id.clone(),
        interval: session.interval,
    })
    .into_iter()
    .collect()
}

fn availability_conflict(
    interval: &TimeInterval,
    participant: &Participant,
    role: ParticipantRole,
    tz: Tz,
) -> Option<Conflict> {
    let message = match availability::evaluate(interval, tz, &participant.availability) {
        AvailabilityCheck::Within => return None,
        AvailabilityCheck::OutsideWindows(_) => format!(
            "{} {} is not available during this time",
            role.label(),
            participant.display_name
        ),
        AvailabilityCheck::NoWindows(weekday) => format!(
            "{} {} is not available on {}s",
            role.label(),
            participant.display_name,
            weekday_name(weekday)
        ),
    };
    Some(Conflict::unavailable(role, message))
}

/// First active session, in input order, that shares the therapist or the
/// client and intersects `interval`.
pub fn first_overlap<'a>(
    interval: &TimeInterval,
    therapist_id: &str,
    client_id: &str,
    existing: &'a [ExistingSession],
    exclude_session_id: Option<&str>,
) -> Option<&'a ExistingSession> {
    existing.iter().find(|session| {
        session.status.is_active()
            && exclude_session_id != Some(session.id.as_str())
            && session.involves(therapist_id, client_id)
            && session.interval.overlaps(interval)
    })
}
