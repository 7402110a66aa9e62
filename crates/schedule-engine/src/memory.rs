//! In-memory implementations of the ports.
//!
//! Used by tests, the CLI and the demo server. The session repository can be
//! switched offline to exercise the persistence-failure path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::interval::TimeInterval;
use crate::model::{ExistingSession, NewSession, Participant, Session};
use crate::ports::{Clock, ParticipantDirectory, RepositoryError, SessionRepository};

pub struct InMemorySessionRepository {
    clock: Arc<dyn Clock>,
    sessions: RwLock<Vec<Session>>,
    offline: AtomicBool,
}

impl InMemorySessionRepository {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sessions: RwLock::new(Vec::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Seed already-committed sessions.
    pub async fn seed(&self, existing: impl IntoIterator<Item = Session>) {
        self.sessions.write().await.extend(existing);
    }

    pub async fn all(&self) -> Vec<Session> {
        self.sessions.read().await.clone()
    }

    /// Make every call fail with `RepositoryError::Unavailable` until toggled back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), RepositoryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("session store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn sessions_for(
        &self,
        therapist_id: &str,
        client_id: &str,
        window: &TimeInterval,
    ) -> Result<Vec<ExistingSession>, RepositoryError> {
        self.ensure_online()?;
        let sessions = self.sessions.read().await;
        Ok(sessions
            .iter()
            .filter(|s| s.therapist_id == therapist_id || s.client_id == client_id)
            .filter(|s| s.interval.overlaps(window))
            .map(Session::as_existing)
            .collect())
    }

    async fn insert(&self, new: NewSession) -> Result<Session, RepositoryError> {
        self.ensure_online()?;
        let session = Session {
            id: Uuid::now_v7().to_string(),
            therapist_id: new.therapist_id,
            client_id: new.client_id,
            interval: new.interval,
            status: new.status,
            notes: new.notes,
            idempotency_key: new.idempotency_key,
            created_at: self.clock.now(),
        };
        self.sessions.write().await.push(session.clone());
        Ok(session)
    }
}

#[derive(Default)]
pub struct InMemoryDirectory {
    therapists: RwLock<HashMap<String, Participant>>,
    clients: RwLock<HashMap<String, Participant>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_therapist(&self, therapist: Participant) {
        self.therapists
            .write()
            .await
            .insert(therapist.id.clone(), therapist);
    }

    pub async fn add_client(&self, client: Participant) {
        self.clients.write().await.insert(client.id.clone(), client);
    }
}

#[async_trait]
impl ParticipantDirectory for InMemoryDirectory {
    async fn therapist(&self, id: &str) -> Result<Option<Participant>, RepositoryError> {
        Ok(self.therapists.read().await.get(id).cloned())
    }

    async fn client(&self, id: &str) -> Result<Option<Participant>, RepositoryError> {
        Ok(self.clients.read().await.get(id).cloned())
    }
}
