//! Conflict detection: ordering, short-circuiting and overlap semantics.

use chrono::{TimeZone, Utc, Weekday};
use schedule_engine::conflict::{check_conflicts, CheckOptions};
use schedule_engine::model::{
    Conflict, ConflictKind, ExistingSession, Participant, SessionStatus, WeeklyAvailability,
};
use schedule_engine::zone::parse_timezone;
use schedule_engine::TimeInterval;

// ── Helpers ─────────────────────────────────────────────────────────────────

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn span(y: i32, mo: u32, d: u32, (sh, sm): (u32, u32), (eh, em): (u32, u32)) -> TimeInterval {
    TimeInterval::new(utc(y, mo, d, sh, sm), utc(y, mo, d, eh, em)).unwrap()
}

fn therapist(availability: WeeklyAvailability) -> Participant {
    Participant::new("t-1", "Dr. Rivera").with_availability(availability)
}

fn client(id: &str, availability: WeeklyAvailability) -> Participant {
    Participant::new(id, "Sam").with_availability(availability)
}

fn all_week() -> WeeklyAvailability {
    WeeklyAvailability::new()
        .weekdays(&[("00:00", "24:00")])
        .with_day(Weekday::Sat, &[("00:00", "24:00")])
        .with_day(Weekday::Sun, &[("00:00", "24:00")])
}

fn session(id: &str, therapist_id: &str, client_id: &str, interval: TimeInterval) -> ExistingSession {
    ExistingSession {
        id: id.to_string(),
        therapist_id: therapist_id.to_string(),
        client_id: client_id.to_string(),
        interval,
        status: SessionStatus::Scheduled,
    }
}

// ── End-to-end scenarios ────────────────────────────────────────────────────

#[test]
fn therapist_unavailable_short_circuits_before_client() {
    // Monday 2025-05-19. Therapist 09-17, client 10-16, request 08-09.
    let t = therapist(WeeklyAvailability::new().with_day(Weekday::Mon, &[("09:00", "17:00")]));
    let c = client("c-1", WeeklyAvailability::new().with_day(Weekday::Mon, &[("10:00", "16:00")]));
    let request = span(2025, 5, 19, (8, 0), (9, 0));

    let conflicts = check_conflicts(&request, &t, &c, &[], &CheckOptions::default());

    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].kind(), ConflictKind::TherapistUnavailable);
    assert_eq!(
        conflicts[0].message(),
        "Therapist Dr. Rivera is not available during this time"
    );
}

#[test]
fn overlap_with_session_of_shared_therapist() {
    let existing = vec![session("s-1", "t-1", "c-2", span(2025, 5, 20, (13, 0), (14, 0)))];
    let request = span(2025, 5, 20, (13, 30), (14, 30));

    let conflicts = check_conflicts(
        &request,
        &therapist(all_week()),
        &client("c-1", all_week()),
        &existing,
        &CheckOptions::default(),
    );

    assert_eq!(conflicts.len(), 1);
    match &conflicts[0] {
        Conflict::SessionOverlap {
            message,
            session_id,
            interval,
        } => {
            assert_eq!(message, "Overlaps with existing session from 1:00 PM to 2:00 PM");
            assert_eq!(session_id, "s-1");
            assert_eq!(*interval, span(2025, 5, 20, (13, 0), (14, 0)));
        }
        other => panic!("expected overlap, got {:?}", other),
    }
}

#[test]
fn dst_day_local_time_is_derived_from_the_zone() {
    // 2025-03-10 07:00 in New York is 11:00Z (EDT, the day after spring forward).
    let tz = parse_timezone("America/New_York").unwrap();
    let t = therapist(WeeklyAvailability::new().with_day(Weekday::Mon, &[("09:00", "17:00")]));
    let c = client("c-1", all_week());
    let request = span(2025, 3, 10, (11, 0), (12, 0));

    let conflicts = check_conflicts(&request, &t, &c, &[], &CheckOptions::in_zone(tz));

    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].kind(), ConflictKind::TherapistUnavailable);

    // 13:00Z is 09:00 local: boundary-touching, accepted.
    let opening = span(2025, 3, 10, (13, 0), (14, 0));
    assert!(check_conflicts(&opening, &t, &c, &[], &CheckOptions::in_zone(tz)).is_empty());
}

// ── Ordering and wording ────────────────────────────────────────────────────

#[test]
fn client_checked_after_therapist_passes() {
    let c = client("c-1", WeeklyAvailability::new().with_day(Weekday::Tue, &[("10:00", "12:00")]));
    let request = span(2025, 5, 19, (10, 0), (11, 0)); // Monday

    let conflicts = check_conflicts(&request, &therapist(all_week()), &c, &[], &CheckOptions::default());

    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].kind(), ConflictKind::ClientUnavailable);
    assert_eq!(conflicts[0].message(), "Client Sam is not available on Mondays");
}

#[test]
fn availability_conflict_hides_overlap() {
    let t = therapist(WeeklyAvailability::new().with_day(Weekday::Tue, &[("09:00", "12:00")]));
    let existing = vec![session("s-1", "t-1", "c-1", span(2025, 5, 20, (13, 0), (14, 0)))];
    let request = span(2025, 5, 20, (13, 0), (14, 0));

    let conflicts = check_conflicts(&request, &t, &client("c-1", all_week()), &existing, &CheckOptions::default());

    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].is_availability());
}

#[test]
fn only_first_overlap_reported() {
    let existing = vec![
        session("s-1", "t-1", "c-9", span(2025, 5, 20, (13, 0), (14, 0))),
        session("s-2", "t-9", "c-1", span(2025, 5, 20, (13, 30), (14, 30))),
    ];
    let request = span(2025, 5, 20, (13, 0), (15, 0));

    let conflicts = check_conflicts(
        &request,
        &therapist(all_week()),
        &client("c-1", all_week()),
        &existing,
        &CheckOptions::default(),
    );

    assert_eq!(conflicts.len(), 1);
    assert!(matches!(&conflicts[0], Conflict::SessionOverlap { session_id, .. } if session_id == "s-1"));
}

#[test]
fn overlap_message_uses_requested_zone() {
    let tz = parse_timezone("America/New_York").unwrap();
    let existing = vec![session("s-1", "t-1", "c-2", span(2025, 5, 20, (17, 0), (18, 0)))];
    let request = span(2025, 5, 20, (17, 30), (18, 30));

    let conflicts = check_conflicts(
        &request,
        &therapist(all_week()),
        &client("c-1", all_week()),
        &existing,
        &CheckOptions::in_zone(tz),
    );

    assert_eq!(
        conflicts[0].message(),
        "Overlaps with existing session from 1:00 PM to 2:00 PM"
    );
}

// ── Session filtering ───────────────────────────────────────────────────────

#[test]
fn editing_a_session_in_place_does_not_conflict_with_itself() {
    let slot = span(2025, 5, 20, (13, 0), (14, 0));
    let existing = vec![session("s-1", "t-1", "c-1", slot)];

    let options = CheckOptions::default().excluding("s-1");
    let conflicts = check_conflicts(
        &slot.shifted(chrono::Duration::minutes(15)),
        &therapist(all_week()),
        &client("c-1", all_week()),
        &existing,
        &options,
    );

    assert!(conflicts.is_empty());
}

#[test]
fn cancelled_and_unrelated_sessions_ignored() {
    let slot = span(2025, 5, 20, (13, 0), (14, 0));
    let mut cancelled = session("s-1", "t-1", "c-1", slot);
    cancelled.status = SessionStatus::Cancelled;
    let unrelated = session("s-2", "t-2", "c-2", slot);

    let conflicts = check_conflicts(
        &slot,
        &therapist(all_week()),
        &client("c-1", all_week()),
        &[cancelled, unrelated],
        &CheckOptions::default(),
    );

    assert!(conflicts.is_empty());
}

#[test]
fn back_to_back_sessions_do_not_conflict() {
    let existing = vec![session("s-1", "t-1", "c-1", span(2025, 5, 20, (13, 0), (14, 0)))];
    let request = span(2025, 5, 20, (14, 0), (15, 0));

    let conflicts = check_conflicts(
        &request,
        &therapist(all_week()),
        &client("c-1", all_week()),
        &existing,
        &CheckOptions::default(),
    );

    assert!(conflicts.is_empty());
}
