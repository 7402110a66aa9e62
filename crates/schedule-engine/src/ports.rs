//! Ports describe what the booking core needs from the outside world.
//!
//! The coordinator codes against these traits only; persistence and
//! participant lookup live behind them. In-memory implementations for tests and
//! local runs are in `memory`.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::interval::TimeInterval;
use crate::model::{ExistingSession, NewSession, Participant, Session};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Sessions of either participant that intersect `window`, any status.
    async fn sessions_for(
        &self,
        therapist_id: &str,
        client_id: &str,
        window: &TimeInterval,
    ) -> Result<Vec<ExistingSession>, RepositoryError>;

    async fn insert(&self, session: NewSession) -> Result<Session, RepositoryError>;
}

#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    async fn therapist(&self, id: &str) -> Result<Option<Participant>, RepositoryError>;

    async fn client(&self, id: &str) -> Result<Option<Participant>, RepositoryError>;
}

/// Source of "now" for hold expiry and replay bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}
