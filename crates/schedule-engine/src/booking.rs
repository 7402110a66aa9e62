//! Booking coordination: hold, re-check, persist, confirm.
//!
//! For every occurrence of a request (one, or each expansion of a recurring
//! series) the coordinator
//!
//! 1. loads the participants' current sessions and runs the conflict check,
//! 2. acquires a hold on the slot under the occurrence's idempotency key,
//! 3. reloads and re-checks, releasing the hold on a new conflict,
//! 4. persists the session, releasing the hold if persistence fails,
//! 5. confirms the hold.
//!
//! Series occurrences are attempted independently and never rolled back, so a
//! series can come back `partial`. Completed results are cached per key and
//! replayed verbatim for a retry with the same key and slot; the same key with
//! a different participant pair or different occurrences is rejected.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::SchedulingConfig;
use crate::conflict::{check_conflicts, CheckOptions};
use crate::error::SchedulingError;
use crate::expander::{expand_from, RecurrenceSpec};
use crate::hold::{Hold, HoldError, HoldReceipt, HoldStore, MAX_HOLD_SECONDS};
use crate::interval::TimeInterval;
use crate::model::{
    Conflict, ExistingSession, NewSession, Participant, ParticipantPair, Session, SessionStatus,
};
use crate::ports::{Clock, ParticipantDirectory, RepositoryError, SessionRepository};
use crate::zone;

/// Largest UTC offset accepted on a request, in minutes.
const MAX_OFFSET_MINUTES: i32 = 16 * 60;
/// Largest start/end offset difference accepted (one DST shift plus slack).
const MAX_OFFSET_DRIFT_MINUTES: i32 = 120;

const SLOT_HELD_MESSAGE: &str = "The requested time slot is currently held by another booking";
const SLOT_HELD_HINT: &str = "Another booking is in progress for this time.";
const UPSTREAM_HINT: &str = "Session storage is temporarily unavailable. Retry shortly.";

// ── Request / result types ──────────────────────────────────────────────────

/// The session part of a booking request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDraft {
    /// Set when rescheduling: the session being moved never conflicts with itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub therapist_id: String,
    pub client_id: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl SessionDraft {
    pub fn new(
        therapist_id: impl Into<String>,
        client_id: impl Into<String>,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
    ) -> Self {
        Self {
            therapist_id: therapist_id.into(),
            client_id: client_id.into(),
            start_time: start_time.into(),
            end_time: end_time.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub session: SessionDraft,
    pub start_time_offset_minutes: i32,
    pub end_time_offset_minutes: i32,
    pub time_zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceSpec>,
    #[serde(default)]
    pub idempotency_key: String,
}

impl BookingRequest {
    /// A single-occurrence request; offsets are derived from `time_zone` when
    /// it parses, otherwise left at zero for validation to reject.
    pub fn new(session: SessionDraft, time_zone: &str, idempotency_key: impl Into<String>) -> Self {
        let (start_offset, end_offset) = match (
            zone::parse_timezone(time_zone),
            TimeInterval::parse(&session.start_time, &session.end_time),
        ) {
            (Ok(tz), Ok(interval)) => (
                zone::offset_minutes(interval.start(), tz),
                zone::offset_minutes(interval.end(), tz),
            ),
            _ => (0, 0),
        };
        Self {
            session,
            start_time_offset_minutes: start_offset,
            end_time_offset_minutes: end_offset,
            time_zone: time_zone.to_string(),
            hold_seconds: None,
            recurrence: None,
            idempotency_key: idempotency_key.into(),
        }
    }

    pub fn with_recurrence(mut self, recurrence: RecurrenceSpec) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    pub fn with_hold_seconds(mut self, seconds: i64) -> Self {
        self.hold_seconds = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Complete,
    Partial,
}

/// What happened to one occurrence of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OccurrenceReport {
    Booked {
        index: usize,
        interval: TimeInterval,
        session: Session,
        hold: HoldReceipt,
    },
    Failed {
        index: usize,
        interval: TimeInterval,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        conflicts: Vec<Conflict>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl OccurrenceReport {
    pub fn is_booked(&self) -> bool {
        matches!(self, OccurrenceReport::Booked { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResult {
    pub idempotency_key: String,
    pub status: BookingStatus,
    pub sessions: Vec<Session>,
    pub holds: Vec<HoldReceipt>,
    pub occurrences: Vec<OccurrenceReport>,
}

impl BookingResult {
    /// The first booked session.
    pub fn primary_session(&self) -> Option<&Session> {
        self.sessions.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Booked(BookingResult),
    Conflicted { conflicts: Vec<Conflict> },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidRecurrence(String),

    #[error("{message}")]
    SlotConflict { message: String, hint: String },

    #[error("{message}")]
    Upstream { message: String, hint: String },

    #[error(transparent)]
    Hold(#[from] HoldError),
}

impl BookingError {
    /// Whether the same request may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BookingError::SlotConflict { .. } | BookingError::Upstream { .. }
        )
    }

    /// HTTP status this error maps to at the boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            BookingError::Validation(_) | BookingError::InvalidRecurrence(_) => 400,
            BookingError::Hold(HoldError::InvalidTtl { .. }) => 400,
            BookingError::SlotConflict { .. } | BookingError::Hold(_) => 409,
            BookingError::Upstream { .. } => 503,
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            BookingError::SlotConflict { hint, .. } | BookingError::Upstream { hint, .. } => {
                Some(hint)
            }
            _ => None,
        }
    }
}

impl From<SchedulingError> for BookingError {
    fn from(error: SchedulingError) -> Self {
        match error {
            SchedulingError::InvalidRecurrence(message) => BookingError::InvalidRecurrence(message),
            other => BookingError::Validation(other.to_string()),
        }
    }
}

fn upstream(error: RepositoryError) -> BookingError {
    BookingError::Upstream {
        message: error.to_string(),
        hint: UPSTREAM_HINT.to_string(),
    }
}

/// Append "Retry in about N seconds/minutes." to `base` when `retry_after`
/// lies in the future. The wait is capped at one hour.
pub fn retry_hint(base: &str, retry_after: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let wait = retry_after
        .map(|at| (at - now).num_milliseconds() as f64 / 1000.0)
        .map(|secs| secs.round().clamp(0.0, 3600.0) as i64)
        .unwrap_or(0);
    if wait <= 0 {
        return base.to_string();
    }
    let amount = if wait < 60 {
        plural(wait, "second")
    } else {
        plural((wait as f64 / 60.0).round() as i64, "minute")
    };
    format!("{} Retry in about {}.", base, amount)
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{} {}", n, unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

// ── Coordinator ─────────────────────────────────────────────────────────────

struct ValidatedBooking {
    key: String,
    pair: ParticipantPair,
    therapist: Participant,
    client: Participant,
    occurrences: Vec<TimeInterval>,
    series: bool,
    time_zone: Tz,
    ttl: Duration,
    status: SessionStatus,
    notes: Option<String>,
    exclude_session_id: Option<String>,
}

enum Attempt {
    Booked { session: Session, hold: Hold },
    Conflicted(Vec<Conflict>),
}

/// What a key was used for: the pair and every occurrence it covered.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    pair: ParticipantPair,
    occurrences: Vec<TimeInterval>,
}

impl ValidatedBooking {
    fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            pair: self.pair.clone(),
            occurrences: self.occurrences.clone(),
        }
    }
}

struct CompletedBooking {
    result: BookingResult,
    fingerprint: Fingerprint,
    expires_at: DateTime<Utc>,
}

pub struct BookingCoordinator {
    sessions: Arc<dyn SessionRepository>,
    directory: Arc<dyn ParticipantDirectory>,
    holds: Arc<dyn HoldStore>,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
    completed: Mutex<HashMap<String, CompletedBooking>>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BookingCoordinator {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        directory: Arc<dyn ParticipantDirectory>,
        holds: Arc<dyn HoldStore>,
        clock: Arc<dyn Clock>,
        config: SchedulingConfig,
    ) -> Self {
        Self {
            sessions,
            directory,
            holds,
            clock,
            config,
            completed: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    /// Book a single session or a recurring series.
    ///
    /// # Errors
    /// Validation and recurrence problems, a slot held by someone else (single
    /// bookings), or an unavailable session store.
    #[instrument(
        skip(self, request),
        fields(
            key = %request.idempotency_key,
            therapist = %request.session.therapist_id,
            client = %request.session.client_id,
        )
    )]
    pub async fn book(&self, request: BookingRequest) -> Result<BookingOutcome, BookingError> {
        let booking = self.validate(&request).await?;

        // Same-key requests run one at a time so a retry racing the original
        // cannot persist twice.
        let key_lock = self.key_lock(&booking.key).await;
        let guard = key_lock.lock().await;

        let fingerprint = booking.fingerprint();
        let outcome = match self.replay(&booking.key, &fingerprint).await {
            Ok(Some(result)) => {
                info!("replaying completed booking");
                Ok(BookingOutcome::Booked(result))
            }
            Ok(None) => {
                let outcome = self.run(&booking).await;
                if let Ok(BookingOutcome::Booked(result)) = &outcome {
                    self.remember(result.clone(), fingerprint).await;
                }
                outcome
            }
            Err(error) => {
                warn!(%error, "idempotency key reused for a different booking");
                Err(error)
            }
        };

        drop(guard);
        self.forget_key_lock(&booking.key, key_lock).await;
        outcome
    }

    async fn validate(&self, request: &BookingRequest) -> Result<ValidatedBooking, BookingError> {
        let draft = &request.session;
        let key = request.idempotency_key.trim();
        if key.is_empty() {
            return Err(BookingError::Validation("idempotency key is required".to_string()));
        }
        for (field, value) in [
            ("therapistId", &draft.therapist_id),
            ("clientId", &draft.client_id),
            ("startTime", &draft.start_time),
            ("endTime", &draft.end_time),
        ] {
            if value.trim().is_empty() {
                return Err(BookingError::Validation(format!(
                    "Missing required session field: {}",
                    field
                )));
            }
        }

        let interval = TimeInterval::parse(&draft.start_time, &draft.end_time)?;
        let time_zone = zone::parse_timezone(&request.time_zone)?;
        validate_offsets(request, &interval, time_zone)?;

        let ttl_seconds = request
            .hold_seconds
            .unwrap_or(self.config.default_hold_seconds);
        if !(1..=MAX_HOLD_SECONDS).contains(&ttl_seconds) {
            return Err(BookingError::Validation(format!(
                "holdSeconds must be between 1 and {}, got {}",
                MAX_HOLD_SECONDS, ttl_seconds
            )));
        }

        let (occurrences, series) = match &request.recurrence {
            None => (vec![interval], false),
            Some(spec) => {
                let rule = spec.to_rule(time_zone)?;
                let expansion = expand_from(&rule, &interval, &self.config.expansion)?;
                let occurrences = expansion.to_vec();
                if occurrences.is_empty() {
                    return Err(BookingError::InvalidRecurrence(
                        "recurrence produced no occurrences".to_string(),
                    ));
                }
                debug!(rule = %rule, count = occurrences.len(), "expanded series");
                (occurrences, true)
            }
        };

        let therapist = self
            .directory
            .therapist(&draft.therapist_id)
            .await
            .map_err(upstream)?
            .ok_or_else(|| {
                BookingError::Validation(format!("Unknown therapist: {}", draft.therapist_id))
            })?;
        let client = self
            .directory
            .client(&draft.client_id)
            .await
            .map_err(upstream)?
            .ok_or_else(|| BookingError::Validation(format!("Unknown client: {}", draft.client_id)))?;

        Ok(ValidatedBooking {
            key: key.to_string(),
            pair: ParticipantPair::new(&draft.therapist_id, &draft.client_id),
            therapist,
            client,
            occurrences,
            series,
            time_zone,
            ttl: Duration::seconds(ttl_seconds),
            status: draft.status.unwrap_or_default(),
            notes: draft.notes.clone(),
            exclude_session_id: draft.id.clone(),
        })
    }

    async fn run(&self, booking: &ValidatedBooking) -> Result<BookingOutcome, BookingError> {
        let mut reports = Vec::with_capacity(booking.occurrences.len());
        let mut sessions = Vec::new();
        let mut holds = Vec::new();
        let mut first_error: Option<BookingError> = None;

        for (index, interval) in booking.occurrences.iter().enumerate() {
            let hold_key = if booking.series {
                format!("{}#{}", booking.key, index)
            } else {
                booking.key.clone()
            };

            match self.book_occurrence(booking, interval, &hold_key).await {
                Ok(Attempt::Booked { session, hold }) => {
                    let receipt = hold.receipt();
                    sessions.push(session.clone());
                    holds.push(receipt.clone());
                    reports.push(OccurrenceReport::Booked {
                        index,
                        interval: *interval,
                        session,
                        hold: receipt,
                    });
                }
                Ok(Attempt::Conflicted(conflicts)) => {
                    if !booking.series {
                        info!(conflicts = conflicts.len(), "booking rejected by conflict check");
                        return Ok(BookingOutcome::Conflicted { conflicts });
                    }
                    debug!(index, "occurrence conflicted");
                    reports.push(OccurrenceReport::Failed {
                        index,
                        interval: *interval,
                        conflicts,
                        error: None,
                    });
                }
                Err(error) => {
                    if !booking.series {
                        return Err(error);
                    }
                    warn!(index, %error, "occurrence failed");
                    reports.push(OccurrenceReport::Failed {
                        index,
                        interval: *interval,
                        conflicts: Vec::new(),
                        error: Some(error.to_string()),
                    });
                    first_error.get_or_insert(error);
                }
            }
        }

        if sessions.is_empty() {
            if let Some(OccurrenceReport::Failed { conflicts, .. }) = reports.first() {
                if !conflicts.is_empty() {
                    return Ok(BookingOutcome::Conflicted {
                        conflicts: conflicts.clone(),
                    });
                }
            }
            if let Some(error) = first_error {
                return Err(error);
            }
        }

        let status = if reports.iter().all(OccurrenceReport::is_booked) {
            BookingStatus::Complete
        } else {
            BookingStatus::Partial
        };
        info!(booked = sessions.len(), total = reports.len(), ?status, "booking finished");

        Ok(BookingOutcome::Booked(BookingResult {
            idempotency_key: booking.key.clone(),
            status,
            sessions,
            holds,
            occurrences: reports,
        }))
    }

    async fn book_occurrence(
        &self,
        booking: &ValidatedBooking,
        interval: &TimeInterval,
        hold_key: &str,
    ) -> Result<Attempt, BookingError> {
        let existing = self.snapshot(booking, interval).await?;
        let conflicts = self.conflicts(booking, interval, &existing);
        if !conflicts.is_empty() {
            return Ok(Attempt::Conflicted(conflicts));
        }

        let hold = match self
            .holds
            .acquire_hold(&booking.pair, interval, hold_key, booking.ttl)
            .await
        {
            Ok(hold) => hold,
            Err(HoldError::SlotConflict { retry_after }) => {
                return Err(BookingError::SlotConflict {
                    message: SLOT_HELD_MESSAGE.to_string(),
                    hint: retry_hint(SLOT_HELD_HINT, Some(retry_after), self.clock.now()),
                });
            }
            Err(other) => return Err(other.into()),
        };

        let existing = match self.snapshot(booking, interval).await {
            Ok(existing) => existing,
            Err(error) => {
                self.release(&hold).await;
                return Err(error);
            }
        };
        let conflicts = self.conflicts(booking, interval, &existing);
        if !conflicts.is_empty() {
            debug!(hold_id = %hold.hold_id, "slot taken between check and hold");
            self.release(&hold).await;
            return Ok(Attempt::Conflicted(conflicts));
        }

        let new_session = NewSession {
            therapist_id: booking.pair.therapist_id.clone(),
            client_id: booking.pair.client_id.clone(),
            interval: *interval,
            status: booking.status,
            notes: booking.notes.clone(),
            idempotency_key: Some(hold_key.to_string()),
        };
        let session = match self.sessions.insert(new_session).await {
            Ok(session) => session,
            Err(error) => {
                warn!(%error, hold_id = %hold.hold_id, "persisting session failed; releasing hold");
                self.release(&hold).await;
                return Err(upstream(error));
            }
        };

        let hold = match self.holds.confirm_hold(hold.hold_id).await {
            Ok(confirmed) => confirmed,
            Err(error) => {
                warn!(%error, session_id = %session.id, "session persisted but hold was not confirmed");
                hold
            }
        };
        info!(session_id = %session.id, start = %interval.start(), "session booked");
        Ok(Attempt::Booked { session, hold })
    }

    async fn snapshot(
        &self,
        booking: &ValidatedBooking,
        interval: &TimeInterval,
    ) -> Result<Vec<ExistingSession>, BookingError> {
        self.sessions
            .sessions_for(&booking.pair.therapist_id, &booking.pair.client_id, interval)
            .await
            .map_err(upstream)
    }

    fn conflicts(
        &self,
        booking: &ValidatedBooking,
        interval: &TimeInterval,
        existing: &[ExistingSession],
    ) -> Vec<Conflict> {
        let mut options = CheckOptions::in_zone(booking.time_zone);
        options.exclude_session_id = booking.exclude_session_id.clone();
        check_conflicts(interval, &booking.therapist, &booking.client, existing, &options)
    }

    async fn release(&self, hold: &Hold) {
        if let Err(error) = self.holds.release_hold(hold.hold_id).await {
            warn!(%error, hold_id = %hold.hold_id, "failed to release hold");
        }
    }

    /// The cached result for `key`, provided it was produced for the same
    /// pair and occurrences.
    async fn replay(
        &self,
        key: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<BookingResult>, BookingError> {
        let now = self.clock.now();
        let mut completed = self.completed.lock().await;
        completed.retain(|_, entry| entry.expires_at > now);
        match completed.get(key) {
            None => Ok(None),
            Some(entry) if entry.fingerprint == *fingerprint => Ok(Some(entry.result.clone())),
            Some(_) => Err(BookingError::Hold(HoldError::KeyReused(key.to_string()))),
        }
    }

    async fn remember(&self, result: BookingResult, fingerprint: Fingerprint) {
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.config.replay_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.completed.lock().await.insert(
            result.idempotency_key.clone(),
            CompletedBooking {
                result,
                fingerprint,
                expires_at,
            },
        );
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.in_flight
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    async fn forget_key_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().await;
        // Map entry plus ours: nobody else is waiting on this key.
        if Arc::strong_count(&lock) <= 2 {
            in_flight.remove(key);
        }
    }
}

fn validate_offsets(
    request: &BookingRequest,
    interval: &TimeInterval,
    tz: Tz,
) -> Result<(), BookingError> {
    let start = request.start_time_offset_minutes;
    let end = request.end_time_offset_minutes;
    if start.abs() > MAX_OFFSET_MINUTES {
        return Err(BookingError::Validation("Invalid startTimeOffsetMinutes".to_string()));
    }
    if end.abs() > MAX_OFFSET_MINUTES {
        return Err(BookingError::Validation("Invalid endTimeOffsetMinutes".to_string()));
    }
    if start != zone::offset_minutes(interval.start(), tz) {
        return Err(BookingError::Validation("startTimeOffsetMinutes mismatch".to_string()));
    }
    if end != zone::offset_minutes(interval.end(), tz) {
        return Err(BookingError::Validation("endTimeOffsetMinutes mismatch".to_string()));
    }
    if (start - end).abs() > MAX_OFFSET_DRIFT_MINUTES {
        return Err(BookingError::Validation("Offset difference too large".to_string()));
    }
    Ok(())
}
