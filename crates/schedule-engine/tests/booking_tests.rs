//! Booking coordination end to end over the in-memory adapters.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use schedule_engine::booking::{
    BookingCoordinator, BookingError, BookingOutcome, BookingRequest, BookingResult, BookingStatus,
    OccurrenceReport, SessionDraft,
};
use schedule_engine::config::SchedulingConfig;
use schedule_engine::expander::RecurrenceSpec;
use schedule_engine::hold::{HoldError, HoldState, HoldStore, InMemoryHoldStore};
use schedule_engine::memory::{InMemoryDirectory, InMemorySessionRepository};
use schedule_engine::model::{
    ConflictKind, ExistingSession, NewSession, Participant, ParticipantPair, Session, SessionStatus,
    WeeklyAvailability,
};
use schedule_engine::ports::{ManualClock, RepositoryError, SessionRepository};
use schedule_engine::TimeInterval;

// ── Harness ─────────────────────────────────────────────────────────────────

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 19, 12, 0, 0).unwrap()
}

struct Harness {
    clock: Arc<ManualClock>,
    sessions: Arc<InMemorySessionRepository>,
    holds: Arc<InMemoryHoldStore>,
    coordinator: Arc<BookingCoordinator>,
}

async fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let sessions = Arc::new(InMemorySessionRepository::new(clock.clone()));
    harness_with(clock, sessions.clone(), sessions).await
}

async fn harness_with(
    clock: Arc<ManualClock>,
    sessions: Arc<InMemorySessionRepository>,
    repository: Arc<dyn SessionRepository>,
) -> Harness {
    let directory = Arc::new(InMemoryDirectory::new());
    let office_hours = WeeklyAvailability::new().weekdays(&[("08:00", "18:00")]);
    directory
        .add_therapist(Participant::new("t-1", "Dr. Rivera").with_availability(office_hours.clone()))
        .await;
    directory
        .add_client(Participant::new("c-1", "Sam").with_availability(office_hours.clone()))
        .await;
    directory
        .add_client(Participant::new("c-2", "Alex").with_availability(office_hours))
        .await;

    let holds = Arc::new(InMemoryHoldStore::new(clock.clone()));
    let coordinator = Arc::new(BookingCoordinator::new(
        repository,
        directory,
        holds.clone(),
        clock.clone(),
        SchedulingConfig::default(),
    ));
    Harness {
        clock,
        sessions,
        holds,
        coordinator,
    }
}

/// Tuesday 2025-05-20, `start`-`end` UTC.
fn tuesday(start: &str, end: &str) -> (String, String) {
    (format!("2025-05-20T{}:00Z", start), format!("2025-05-20T{}:00Z", end))
}

fn request(client_id: &str, start: &str, end: &str, key: &str) -> BookingRequest {
    let (start, end) = tuesday(start, end);
    BookingRequest::new(SessionDraft::new("t-1", client_id, start, end), "UTC", key)
}

fn committed(id: &str, client_id: &str, start: &str, end: &str) -> Session {
    let (start, end) = tuesday(start, end);
    Session {
        id: id.to_string(),
        therapist_id: "t-1".to_string(),
        client_id: client_id.to_string(),
        interval: TimeInterval::parse(&start, &end).unwrap(),
        status: SessionStatus::Scheduled,
        notes: None,
        idempotency_key: None,
        created_at: t0() - Duration::days(7),
    }
}

fn booked(outcome: BookingOutcome) -> BookingResult {
    match outcome {
        BookingOutcome::Booked(result) => result,
        BookingOutcome::Conflicted { conflicts } => panic!("expected a booking, got {conflicts:?}"),
    }
}

fn validation_message(error: BookingError) -> String {
    match error {
        BookingError::Validation(message) => message,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

// ── Single bookings ─────────────────────────────────────────────────────────

#[tokio::test]
async fn books_a_free_slot_and_confirms_its_hold() {
    let h = harness().await;

    let result = booked(h.coordinator.book(request("c-1", "14:00", "15:00", "req-1")).await.unwrap());

    assert_eq!(result.status, BookingStatus::Complete);
    assert_eq!(result.idempotency_key, "req-1");
    let session = result.primary_session().unwrap();
    assert_eq!(session.status, SessionStatus::Scheduled);
    assert_eq!(session.idempotency_key.as_deref(), Some("req-1"));
    assert_eq!(result.holds[0].hold_key, "req-1");

    let holds = h.holds.active().await;
    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0].state, HoldState::Confirmed);
    assert_eq!(h.sessions.all().await.len(), 1);
}

#[tokio::test]
async fn overlapping_request_is_conflicted_and_nothing_is_held() {
    let h = harness().await;
    h.sessions.seed([committed("s-9", "c-2", "14:30", "15:30")]).await;

    let outcome = h.coordinator.book(request("c-1", "14:00", "15:00", "req-1")).await.unwrap();

    let BookingOutcome::Conflicted { conflicts } = outcome else {
        panic!("expected a conflict");
    };
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].kind(), ConflictKind::SessionOverlap);
    assert!(h.holds.active().await.is_empty());
    assert_eq!(h.sessions.all().await.len(), 1);
}

#[tokio::test]
async fn outside_availability_is_conflicted() {
    let h = harness().await;

    let outcome = h.coordinator.book(request("c-1", "18:00", "19:00", "req-1")).await.unwrap();

    let BookingOutcome::Conflicted { conflicts } = outcome else {
        panic!("expected a conflict");
    };
    assert_eq!(conflicts[0].kind(), ConflictKind::TherapistUnavailable);
}

#[tokio::test]
async fn back_to_back_sessions_both_book() {
    let h = harness().await;
    h.sessions.seed([committed("s-9", "c-2", "13:00", "14:00")]).await;

    let result = booked(h.coordinator.book(request("c-1", "14:00", "15:00", "req-1")).await.unwrap());

    assert_eq!(result.sessions.len(), 1);
}

#[tokio::test]
async fn rescheduling_ignores_the_session_being_moved() {
    let h = harness().await;
    h.sessions.seed([committed("s-1", "c-1", "14:00", "15:00")]).await;

    let mut moved = request("c-1", "14:30", "15:30", "req-move");
    moved.session.id = Some("s-1".to_string());

    let result = booked(h.coordinator.book(moved).await.unwrap());
    assert_eq!(result.status, BookingStatus::Complete);
}

#[tokio::test]
async fn zone_offsets_are_checked_against_the_zone() {
    let h = harness().await;
    let draft = SessionDraft::new("t-1", "c-1", "2025-05-20T14:00:00Z", "2025-05-20T15:00:00Z");
    let request = BookingRequest::new(draft, "America/New_York", "req-ny");
    assert_eq!(request.start_time_offset_minutes, -240);

    let result = booked(h.coordinator.book(request).await.unwrap());
    assert_eq!(result.sessions.len(), 1);
}

// ── Idempotency ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn retry_with_the_same_key_replays_the_result() {
    let h = harness().await;

    let first = booked(h.coordinator.book(request("c-1", "14:00", "15:00", "req-1")).await.unwrap());
    h.clock.advance(Duration::minutes(10));
    let second = booked(h.coordinator.book(request("c-1", "14:00", "15:00", "req-1")).await.unwrap());

    assert_eq!(first, second);
    assert_eq!(h.sessions.all().await.len(), 1);
}

#[tokio::test]
async fn same_key_for_a_different_slot_is_rejected() {
    let h = harness().await;

    let first = booked(h.coordinator.book(request("c-1", "13:00", "14:00", "k-same")).await.unwrap());
    let error = h
        .coordinator
        .book(request("c-1", "15:00", "16:00", "k-same"))
        .await
        .unwrap_err();

    assert_eq!(error, BookingError::Hold(HoldError::KeyReused("k-same".to_string())));
    assert_eq!(error.status_code(), 409);
    assert!(!error.is_retryable());
    let stored = h.sessions.all().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, first.sessions[0].id);

    // The original request still replays.
    let again = booked(h.coordinator.book(request("c-1", "13:00", "14:00", "k-same")).await.unwrap());
    assert_eq!(again, first);
}

#[tokio::test]
async fn same_key_for_another_client_or_series_length_is_rejected() {
    let h = harness().await;
    booked(
        h.coordinator
            .book(request("c-1", "14:00", "15:00", "k-series").with_recurrence(weekly(2)))
            .await
            .unwrap(),
    );

    let other_client = h
        .coordinator
        .book(request("c-2", "14:00", "15:00", "k-series").with_recurrence(weekly(2)))
        .await
        .unwrap_err();
    assert!(matches!(other_client, BookingError::Hold(HoldError::KeyReused(_))));

    let longer = h
        .coordinator
        .book(request("c-1", "14:00", "15:00", "k-series").with_recurrence(weekly(3)))
        .await
        .unwrap_err();
    assert!(matches!(longer, BookingError::Hold(HoldError::KeyReused(_))));
    assert_eq!(h.sessions.all().await.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_retries_persist_once() {
    let h = harness().await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move { coordinator.book(request("c-1", "14:00", "15:00", "req-1")).await })
        })
        .collect();

    let mut results = Vec::new();
    for task in tasks {
        results.push(booked(task.await.unwrap().unwrap()));
    }

    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(h.sessions.all().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_keys_for_one_slot_book_it_once() {
    let h = harness().await;

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let coordinator = Arc::clone(&h.coordinator);
            let key = format!("req-{}", i);
            tokio::spawn(async move { coordinator.book(request("c-1", "14:00", "15:00", &key)).await })
        })
        .collect();

    let mut booked_count = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(BookingOutcome::Booked(_)) => booked_count += 1,
            Ok(BookingOutcome::Conflicted { .. }) | Err(BookingError::SlotConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(booked_count, 1);
    assert_eq!(h.sessions.all().await.len(), 1);
}

// ── Holds and upstream failures ─────────────────────────────────────────────

#[tokio::test]
async fn slot_held_elsewhere_is_a_retryable_conflict_with_a_hint() {
    let h = harness().await;
    let (start, end) = tuesday("14:00", "15:00");
    h.holds
        .acquire_hold(
            &ParticipantPair::new("t-1", "c-2"),
            &TimeInterval::parse(&start, &end).unwrap(),
            "someone-else",
            Duration::seconds(300),
        )
        .await
        .unwrap();

    let error = h
        .coordinator
        .book(request("c-1", "14:00", "15:00", "req-1"))
        .await
        .unwrap_err();

    assert_eq!(error.status_code(), 409);
    assert!(error.is_retryable());
    assert_eq!(
        error.hint(),
        Some("Another booking is in progress for this time. Retry in about 5 minutes.")
    );
    assert!(h.sessions.all().await.is_empty());
}

#[tokio::test]
async fn offline_store_is_upstream_and_takes_no_hold() {
    let h = harness().await;
    h.sessions.set_offline(true);

    let error = h
        .coordinator
        .book(request("c-1", "14:00", "15:00", "req-1"))
        .await
        .unwrap_err();

    assert!(matches!(error, BookingError::Upstream { .. }));
    assert_eq!(error.status_code(), 503);
    assert!(h.holds.active().await.is_empty());
}

/// Reads from the in-memory store but refuses every write.
struct ReadOnlyRepository(Arc<InMemorySessionRepository>);

#[async_trait]
impl SessionRepository for ReadOnlyRepository {
    async fn sessions_for(
        &self,
        therapist_id: &str,
        client_id: &str,
        window: &TimeInterval,
    ) -> Result<Vec<ExistingSession>, RepositoryError> {
        self.0.sessions_for(therapist_id, client_id, window).await
    }

    async fn insert(&self, _session: NewSession) -> Result<Session, RepositoryError> {
        Err(RepositoryError::Backend("write rejected".to_string()))
    }
}

#[tokio::test]
async fn failed_persist_releases_the_hold() {
    let clock = Arc::new(ManualClock::new(t0()));
    let sessions = Arc::new(InMemorySessionRepository::new(clock.clone()));
    let h = harness_with(clock, sessions.clone(), Arc::new(ReadOnlyRepository(sessions))).await;

    let error = h
        .coordinator
        .book(request("c-1", "14:00", "15:00", "req-1"))
        .await
        .unwrap_err();

    assert!(matches!(error, BookingError::Upstream { .. }));
    assert!(h.holds.active().await.is_empty());

    // Nothing was remembered, so the slot is free for a later attempt.
    assert!(h
        .holds
        .acquire_hold(
            &ParticipantPair::new("t-1", "c-1"),
            &TimeInterval::parse("2025-05-20T14:00:00Z", "2025-05-20T15:00:00Z").unwrap(),
            "req-2",
            Duration::seconds(60),
        )
        .await
        .is_ok());
}

// ── Series ──────────────────────────────────────────────────────────────────

fn weekly(count: u32) -> RecurrenceSpec {
    RecurrenceSpec {
        rule: "FREQ=WEEKLY;INTERVAL=1".to_string(),
        count: Some(count),
        ..RecurrenceSpec::default()
    }
}

#[tokio::test]
async fn series_books_each_occurrence_under_its_own_key() {
    let h = harness().await;

    let result = booked(
        h.coordinator
            .book(request("c-1", "14:00", "15:00", "series").with_recurrence(weekly(3)))
            .await
            .unwrap(),
    );

    assert_eq!(result.status, BookingStatus::Complete);
    let keys: Vec<_> = result.holds.iter().map(|r| r.hold_key.as_str()).collect();
    assert_eq!(keys, ["series#0", "series#1", "series#2"]);
    let starts: Vec<_> = result.sessions.iter().map(|s| s.interval.start()).collect();
    assert_eq!(
        starts,
        [
            Utc.with_ymd_and_hms(2025, 5, 20, 14, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 5, 27, 14, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 3, 14, 0, 0).unwrap(),
        ]
    );
}

#[tokio::test]
async fn series_with_a_blocked_week_is_partial() {
    let h = harness().await;
    let mut blocked = committed("s-9", "c-2", "14:00", "15:00");
    blocked.interval = blocked.interval.shifted(Duration::days(7));
    h.sessions.seed([blocked]).await;

    let result = booked(
        h.coordinator
            .book(request("c-1", "14:00", "15:00", "series").with_recurrence(weekly(3)))
            .await
            .unwrap(),
    );

    assert_eq!(result.status, BookingStatus::Partial);
    assert_eq!(result.sessions.len(), 2);
    assert_eq!(result.occurrences.len(), 3);
    match &result.occurrences[1] {
        OccurrenceReport::Failed { index, conflicts, .. } => {
            assert_eq!(*index, 1);
            assert_eq!(conflicts[0].kind(), ConflictKind::SessionOverlap);
        }
        other => panic!("expected the second week to fail, got {other:?}"),
    }
    let keys: Vec<_> = result.holds.iter().map(|r| r.hold_key.as_str()).collect();
    assert_eq!(keys, ["series#0", "series#2"]);
}

#[tokio::test]
async fn series_with_every_week_blocked_is_conflicted() {
    let h = harness().await;
    h.sessions
        .seed((0..2).map(|week| {
            let mut s = committed(&format!("s-{}", week), "c-2", "14:00", "15:00");
            s.interval = s.interval.shifted(Duration::days(7 * week));
            s
        }))
        .await;

    let outcome = h
        .coordinator
        .book(request("c-1", "14:00", "15:00", "series").with_recurrence(weekly(2)))
        .await
        .unwrap();

    assert!(matches!(outcome, BookingOutcome::Conflicted { .. }));
    assert!(h.holds.active().await.is_empty());
}

#[tokio::test]
async fn malformed_rule_is_invalid_recurrence() {
    let h = harness().await;
    let spec = RecurrenceSpec {
        rule: "FREQ=SOMETIMES".to_string(),
        ..RecurrenceSpec::default()
    };

    let error = h
        .coordinator
        .book(request("c-1", "14:00", "15:00", "series").with_recurrence(spec))
        .await
        .unwrap_err();

    assert!(matches!(error, BookingError::InvalidRecurrence(_)));
    assert_eq!(error.status_code(), 400);
}

// ── Validation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn offset_mismatch_is_rejected() {
    let h = harness().await;
    let mut bad = request("c-1", "14:00", "15:00", "req-1");
    bad.start_time_offset_minutes = -240;
    bad.end_time_offset_minutes = -240;

    let error = h.coordinator.book(bad).await.unwrap_err();

    assert_eq!(validation_message(error), "startTimeOffsetMinutes mismatch");
}

#[tokio::test]
async fn out_of_range_offset_is_rejected() {
    let h = harness().await;
    let mut bad = request("c-1", "14:00", "15:00", "req-1");
    bad.end_time_offset_minutes = 1000;

    let error = h.coordinator.book(bad).await.unwrap_err();

    assert_eq!(validation_message(error), "Invalid endTimeOffsetMinutes");
}

#[tokio::test]
async fn unknown_participants_and_bad_fields_are_rejected() {
    let h = harness().await;

    let unknown = h.coordinator.book(request("c-404", "14:00", "15:00", "req-1")).await;
    assert_eq!(
        validation_message(unknown.unwrap_err()),
        "Unknown client: c-404"
    );

    let mut missing = request("c-1", "14:00", "15:00", "req-2");
    missing.session.therapist_id = String::new();
    assert_eq!(
        validation_message(h.coordinator.book(missing).await.unwrap_err()),
        "Missing required session field: therapistId"
    );

    let keyless = request("c-1", "14:00", "15:00", "  ");
    assert!(matches!(
        h.coordinator.book(keyless).await,
        Err(BookingError::Validation(_))
    ));

    let inverted = request("c-1", "15:00", "14:00", "req-3");
    assert!(matches!(
        h.coordinator.book(inverted).await,
        Err(BookingError::Validation(_))
    ));

    let mut bad_zone = request("c-1", "14:00", "15:00", "req-4");
    bad_zone.time_zone = "Mars/Olympus_Mons".to_string();
    assert!(matches!(
        h.coordinator.book(bad_zone).await,
        Err(BookingError::Validation(_))
    ));
}

#[tokio::test]
async fn hold_seconds_must_be_in_range() {
    let h = harness().await;

    for seconds in [0, 3601] {
        let error = h
            .coordinator
            .book(request("c-1", "14:00", "15:00", "req-1").with_hold_seconds(seconds))
            .await
            .unwrap_err();
        assert_eq!(error.status_code(), 400);
    }

    let result = h
        .coordinator
        .book(request("c-1", "14:00", "15:00", "req-1").with_hold_seconds(30))
        .await
        .unwrap();
    let result = booked(result);
    assert_eq!(result.holds[0].expires_at, t0() + Duration::seconds(30));
}

// ── Wire shape ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn result_serializes_with_tagged_occurrences() {
    let h = harness().await;
    let result = booked(h.coordinator.book(request("c-1", "14:00", "15:00", "req-1")).await.unwrap());

    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["status"], "complete");
    assert_eq!(value["idempotencyKey"], "req-1");
    assert_eq!(value["occurrences"][0]["outcome"], "booked");
    assert_eq!(value["occurrences"][0]["hold"]["holdKey"], "req-1");
}
