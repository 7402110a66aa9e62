use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use schedule_engine::hold::{HoldStore, InMemoryHoldStore};
use schedule_engine::memory::{InMemoryDirectory, InMemorySessionRepository};
use schedule_engine::ports::{Clock, ParticipantDirectory, SessionRepository, SystemClock};
use schedule_engine::suggest::{LocalSlotScorer, SlotScorer};
use schedule_engine::{BookingCoordinator, Participant, SchedulingConfig, Session};
use serde::Deserialize;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<BookingCoordinator>,
    pub holds: Arc<dyn HoldStore>,
    pub directory: Arc<dyn ParticipantDirectory>,
    pub sessions: Arc<dyn SessionRepository>,
    pub scorer: Arc<dyn SlotScorer>,
    pub config: Arc<SchedulingConfig>,
}

impl AppState {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        directory: Arc<dyn ParticipantDirectory>,
        scorer: Arc<dyn SlotScorer>,
        clock: Arc<dyn Clock>,
        config: SchedulingConfig,
    ) -> Self {
        let holds: Arc<dyn HoldStore> = Arc::new(InMemoryHoldStore::new(clock.clone()));
        let coordinator = Arc::new(BookingCoordinator::new(
            sessions.clone(),
            directory.clone(),
            holds.clone(),
            clock,
            config.clone(),
        ));
        Self {
            coordinator,
            holds,
            directory,
            sessions,
            scorer,
            config: Arc::new(config),
        }
    }

    /// In-memory stores preloaded with `seed`, scored in-process.
    pub async fn in_memory(config: SchedulingConfig, seed: Seed) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let sessions = Arc::new(InMemorySessionRepository::new(clock.clone()));
        let directory = Arc::new(InMemoryDirectory::new());

        info!(
            therapists = seed.therapists.len(),
            clients = seed.clients.len(),
            sessions = seed.sessions.len(),
            "loading seed data"
        );
        for therapist in seed.therapists {
            directory.add_therapist(therapist).await;
        }
        for client in seed.clients {
            directory.add_client(client).await;
        }
        sessions.seed(seed.sessions).await;

        Self::new(sessions, directory, Arc::new(LocalSlotScorer), clock, config)
    }
}

/// Startup data for the in-memory stores.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub therapists: Vec<Participant>,
    pub clients: Vec<Participant>,
    pub sessions: Vec<Session>,
}

impl Seed {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse seed file: {}", path.display()))
    }
}
