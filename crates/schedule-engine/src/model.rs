//! Participants, weekly availability, sessions and conflicts.

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::interval::TimeInterval;

// ── Availability ────────────────────────────────────────────────────────────

/// One local time-of-day window as supplied by the participant record.
///
/// Boundaries stay as strings (`"09:00"`, `"17:30:00"`, `"24:00"`) until
/// evaluation so a malformed record makes that day unavailable instead of
/// failing the whole request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowSpec {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

impl WindowSpec {
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            start: Some(start.to_string()),
            end: Some(end.to_string()),
        }
    }
}

/// A weekday entry: one window, or several for a split shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DaySchedule {
    Single(WindowSpec),
    Split(Vec<WindowSpec>),
}

impl DaySchedule {
    pub fn windows(&self) -> &[WindowSpec] {
        match self {
            DaySchedule::Single(window) => std::slice::from_ref(window),
            DaySchedule::Split(windows) => windows,
        }
    }
}

/// Per-weekday availability. A missing or null day means unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeeklyAvailability {
    #[serde(default)]
    pub monday: Option<DaySchedule>,
    #[serde(default)]
    pub tuesday: Option<DaySchedule>,
    #[serde(default)]
    pub wednesday: Option<DaySchedule>,
    #[serde(default)]
    pub thursday: Option<DaySchedule>,
    #[serde(default)]
    pub friday: Option<DaySchedule>,
    #[serde(default)]
    pub saturday: Option<DaySchedule>,
    #[serde(default)]
    pub sunday: Option<DaySchedule>,
}

impl WeeklyAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the windows for `day`. An empty slice clears the day.
    pub fn with_day(mut self, day: Weekday, windows: &[(&str, &str)]) -> Self {
        let schedule = match windows {
            [] => None,
            [(start, end)] => Some(DaySchedule::Single(WindowSpec::new(start, end))),
            many => Some(DaySchedule::Split(
                many.iter()
                    .map(|(start, end)| WindowSpec::new(start, end))
                    .collect(),
            )),
        };
        *self.slot_mut(day) = schedule;
        self
    }

    /// Builder: the same windows Monday through Friday.
    pub fn weekdays(self, windows: &[(&str, &str)]) -> Self {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ]
        .into_iter()
        .fold(self, |acc, day| acc.with_day(day, windows))
    }

    pub fn day(&self, day: Weekday) -> Option<&DaySchedule> {
        match day {
            Weekday::Mon => self.monday.as_ref(),
            Weekday::Tue => self.tuesday.as_ref(),
            Weekday::Wed => self.wednesday.as_ref(),
            Weekday::Thu => self.thursday.as_ref(),
            Weekday::Fri => self.friday.as_ref(),
            Weekday::Sat => self.saturday.as_ref(),
            Weekday::Sun => self.sunday.as_ref(),
        }
    }

    fn slot_mut(&mut self, day: Weekday) -> &mut Option<DaySchedule> {
        match day {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        }
    }
}

// ── Participants ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub availability: WeeklyAvailability,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            availability: WeeklyAvailability::default(),
        }
    }

    pub fn with_availability(mut self, availability: WeeklyAvailability) -> Self {
        self.availability = availability;
        self
    }
}

/// Which side of a session a participant is on. Only affects wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Therapist,
    Client,
}

impl ParticipantRole {
    pub fn label(self) -> &'static str {
        match self {
            ParticipantRole::Therapist => "Therapist",
            ParticipantRole::Client => "Client",
        }
    }
}

/// The therapist/client pair a session or hold belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPair {
    pub therapist_id: String,
    pub client_id: String,
}

impl ParticipantPair {
    pub fn new(therapist_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            therapist_id: therapist_id.into(),
            client_id: client_id.into(),
        }
    }

    /// Stable textual key, e.g. `"t-1:c-2"`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.therapist_id, self.client_id)
    }

    /// True when either side is the same person.
    pub fn shares_participant(&self, other: &ParticipantPair) -> bool {
        self.therapist_id == other.therapist_id || self.client_id == other.client_id
    }
}

// ── Sessions ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl SessionStatus {
    /// Cancelled sessions free their slot; every other status occupies it.
    pub fn is_active(self) -> bool {
        !matches!(self, SessionStatus::Cancelled)
    }
}

/// The minimal session view used for overlap checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingSession {
    pub id: String,
    pub therapist_id: String,
    pub client_id: String,
    pub interval: TimeInterval,
    #[serde(default)]
    pub status: SessionStatus,
}

impl ExistingSession {
    pub fn involves(&self, therapist_id: &str, client_id: &str) -> bool {
        self.therapist_id == therapist_id || self.client_id == client_id
    }
}

/// A committed session as returned by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub therapist_id: String,
    pub client_id: String,
    pub interval: TimeInterval,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn as_existing(&self) -> ExistingSession {
        ExistingSession {
            id: self.id.clone(),
            therapist_id: self.therapist_id.clone(),
            client_id: self.client_id.clone(),
            interval: self.interval,
            status: self.status,
        }
    }
}

/// A session about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub therapist_id: String,
    pub client_id: String,
    pub interval: TimeInterval,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

// ── Conflicts ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    TherapistUnavailable,
    ClientUnavailable,
    SessionOverlap,
}

/// Why a requested interval cannot be booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Conflict {
    TherapistUnavailable {
        message: String,
    },
    ClientUnavailable {
        message: String,
    },
    SessionOverlap {
        message: String,
        session_id: String,
        interval: TimeInterval,
    },
}

impl Conflict {
    pub fn kind(&self) -> ConflictKind {
        match self {
            Conflict::TherapistUnavailable { .. } => ConflictKind::TherapistUnavailable,
            Conflict::ClientUnavailable { .. } => ConflictKind::ClientUnavailable,
            Conflict::SessionOverlap { .. } => ConflictKind::SessionOverlap,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Conflict::TherapistUnavailable { message }
            | Conflict::ClientUnavailable { message }
            | Conflict::SessionOverlap { message, .. } => message,
        }
    }

    pub(crate) fn unavailable(role: ParticipantRole, message: String) -> Self {
        match role {
            ParticipantRole::Therapist => Conflict::TherapistUnavailable { message },
            ParticipantRole::Client => Conflict::ClientUnavailable { message },
        }
    }

    pub fn is_availability(&self) -> bool {
        !matches!(self, Conflict::SessionOverlap { .. })
    }
}
