//! Short-lived exclusive claims on a participant/time slot.
//!
//! A hold moves `Held -> Confirmed`, or disappears when released or when its
//! TTL runs out. While unexpired it blocks every other hold whose interval
//! overlaps and which shares the therapist or the client, whatever its state.
//! The idempotency key identifies the claim: acquiring again with the same key
//! and slot returns the original hold instead of creating a second one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::interval::TimeInterval;
use crate::model::ParticipantPair;
use crate::ports::Clock;

/// Default hold lifetime.
pub const DEFAULT_HOLD_SECONDS: i64 = 300;
/// Longest hold a caller may ask for.
pub const MAX_HOLD_SECONDS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    Held,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hold {
    pub hold_id: Uuid,
    /// The idempotency key the hold was acquired under.
    pub hold_key: String,
    pub participants: ParticipantPair,
    pub interval: TimeInterval,
    pub state: HoldState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn claims(&self, participants: &ParticipantPair, interval: &TimeInterval) -> bool {
        self.participants.shares_participant(participants) && self.interval.overlaps(interval)
    }

    pub fn receipt(&self) -> HoldReceipt {
        HoldReceipt {
            hold_key: self.hold_key.clone(),
            hold_id: self.hold_id,
            expires_at: self.expires_at,
        }
    }
}

/// What a caller gets back about the hold used for a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldReceipt {
    pub hold_key: String,
    pub hold_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HoldError {
    #[error("slot is held by another booking until {retry_after}")]
    SlotConflict { retry_after: DateTime<Utc> },

    #[error("idempotency key '{0}' is already in use for a different slot")]
    KeyReused(String),

    #[error("hold {0} not found")]
    NotFound(Uuid),

    #[error("hold {0} has expired")]
    Expired(Uuid),

    #[error("hold duration must be between 1 and {max} seconds, got {requested}")]
    InvalidTtl { requested: i64, max: i64 },
}

#[async_trait]
pub trait HoldStore: Send + Sync {
    async fn acquire_hold(
        &self,
        participants: &ParticipantPair,
        interval: &TimeInterval,
        idempotency_key: &str,
        ttl: Duration,
    ) -> Result<Hold, HoldError>;

    /// `Held -> Confirmed`. Confirming an already confirmed hold is a no-op.
    async fn confirm_hold(&self, hold_id: Uuid) -> Result<Hold, HoldError>;

    /// Drop the claim. Releasing an unknown or expired hold succeeds.
    async fn release_hold(&self, hold_id: Uuid) -> Result<(), HoldError>;

    /// Remove expired holds, returning how many were dropped.
    async fn purge_expired(&self) -> usize;
}

/// Process-local hold table. One mutex guards the whole table, so the
/// check-then-insert in `acquire_hold` is atomic across concurrent callers.
pub struct InMemoryHoldStore {
    clock: Arc<dyn Clock>,
    holds: Mutex<HashMap<Uuid, Hold>>,
}

impl InMemoryHoldStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            holds: Mutex::new(HashMap::new()),
        }
    }

    /// Unexpired holds currently in the table.
    pub async fn active(&self) -> Vec<Hold> {
        let now = self.clock.now();
        let holds = self.holds.lock().await;
        let mut active: Vec<Hold> = holds
            .values()
            .filter(|hold| !hold.is_expired(now))
            .cloned()
            .collect();
        active.sort_by_key(|hold| (hold.interval.start(), hold.created_at));
        active
    }
}

#[async_trait]
impl HoldStore for InMemoryHoldStore {
    async fn acquire_hold(
        &self,
        participants: &ParticipantPair,
        interval: &TimeInterval,
        idempotency_key: &str,
        ttl: Duration,
    ) -> Result<Hold, HoldError> {
        let seconds = ttl.num_seconds();
        if !(1..=MAX_HOLD_SECONDS).contains(&seconds) {
            return Err(HoldError::InvalidTtl {
                requested: seconds,
                max: MAX_HOLD_SECONDS,
            });
        }

        let now = self.clock.now();
        let mut holds = self.holds.lock().await;
        holds.retain(|_, hold| !hold.is_expired(now));

        if let Some(existing) = holds.values().find(|hold| hold.hold_key == idempotency_key) {
            if existing.participants == *participants && existing.interval == *interval {
                debug!(hold_id = %existing.hold_id, key = idempotency_key, "replaying existing hold");
                return Ok(existing.clone());
            }
            return Err(HoldError::KeyReused(idempotency_key.to_string()));
        }

        if let Some(blocking) = holds
            .values()
            .filter(|hold| hold.claims(participants, interval))
            .min_by_key(|hold| hold.expires_at)
        {
            debug!(
                blocking = %blocking.hold_id,
                pair = %participants.key(),
                "slot already held"
            );
            return Err(HoldError::SlotConflict {
                retry_after: blocking.expires_at,
            });
        }

        let hold = Hold {
            hold_id: Uuid::new_v4(),
            hold_key: idempotency_key.to_string(),
            participants: participants.clone(),
            interval: *interval,
            state: HoldState::Held,
            created_at: now,
            expires_at: now + ttl,
        };
        info!(
            hold_id = %hold.hold_id,
            pair = %participants.key(),
            start = %interval.start(),
            expires_at = %hold.expires_at,
            "hold acquired"
        );
        holds.insert(hold.hold_id, hold.clone());
        Ok(hold)
    }

    async fn confirm_hold(&self, hold_id: Uuid) -> Result<Hold, HoldError> {
        let now = self.clock.now();
        let mut holds = self.holds.lock().await;
        let hold = holds.get_mut(&hold_id).ok_or(HoldError::NotFound(hold_id))?;
        if hold.is_expired(now) {
            holds.remove(&hold_id);
            return Err(HoldError::Expired(hold_id));
        }
        hold.state = HoldState::Confirmed;
        info!(%hold_id, "hold confirmed");
        Ok(hold.clone())
    }

    async fn release_hold(&self, hold_id: Uuid) -> Result<(), HoldError> {
        if self.holds.lock().await.remove(&hold_id).is_some() {
            info!(%hold_id, "hold released");
        }
        Ok(())
    }

    async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut holds = self.holds.lock().await;
        let before = holds.len();
        holds.retain(|_, hold| !hold.is_expired(now));
        before - holds.len()
    }
}
