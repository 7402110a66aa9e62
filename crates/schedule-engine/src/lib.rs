//! # schedule-engine
//!
//! Timezone-correct scheduling of therapy sessions between a therapist and a
//! client.
//!
//! The pure half of the crate answers "can this interval be booked?" and
//! "what else could be booked instead?": weekly availability windows are read
//! in the participant's timezone, recurring series are expanded with the
//! `rrule` crate, and conflicts are reported in a fixed, short-circuiting
//! order. The async half books sessions safely under concurrency with a
//! hold → re-check → persist → confirm protocol keyed by idempotency key.
//!
//! ## Modules
//!
//! - [`zone`]: the single local-time ⇄ instant boundary and DST policies
//! - [`interval`]: half-open UTC time intervals
//! - [`model`]: participants, weekly availability, sessions, conflicts
//! - [`availability`]: does an interval fit a participant's windows?
//! - [`conflict`]: ordered conflict detection for a requested interval
//! - [`expander`]: RRULE + exceptions → concrete occurrences
//! - [`freebusy`]: busy-period merging
//! - [`suggest`]: alternative slot search and scoring
//! - [`hold`]: short-lived exclusive slot claims
//! - [`booking`]: the booking coordinator
//! - [`ports`] / [`memory`]: collaborator traits and in-memory adapters
//! - [`config`]: tunables and environment overrides
//! - [`error`]: error types

pub mod availability;
pub mod booking;
pub mod config;
pub mod conflict;
pub mod error;
pub mod expander;
pub mod freebusy;
pub mod hold;
pub mod interval;
pub mod memory;
pub mod model;
pub mod ports;
pub mod suggest;
pub mod zone;

pub use availability::is_within_availability;
pub use booking::{
    BookingCoordinator, BookingError, BookingOutcome, BookingRequest, BookingResult,
    BookingStatus, OccurrenceReport, SessionDraft,
};
pub use config::SchedulingConfig;
pub use conflict::{check_conflicts, CheckOptions};
pub use error::SchedulingError;
pub use expander::{expand, expand_from, Expansion, ExpansionLimits, RecurrenceRule, RecurrenceSpec};
pub use freebusy::merge_busy_periods;
pub use hold::{Hold, HoldError, HoldStore, InMemoryHoldStore};
pub use interval::TimeInterval;
pub use model::{
    Conflict, ConflictKind, ExistingSession, Participant, ParticipantPair, Session, SessionStatus,
    WeeklyAvailability,
};
pub use suggest::{suggest, suggest_alternatives, AlternativeTime, SlotScorer, SuggestOptions};
