// Mission persistence: save/load contract plus in-memory and file backends

pub mod file_store;

pub use file_store::FileMissionStore;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::mission::MissionSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PersistenceError> for crate::types::AppError {
    fn from(err: PersistenceError) -> Self {
        crate::types::AppError::Persistence(err.to_string())
    }
}

/// Durable storage collaborator. Checkpoints go through here.
#[async_trait]
pub trait MissionStore: Send + Sync {
    async fn save(&self, snapshot: &MissionSnapshot) -> Result<(), PersistenceError>;

    async fn load(&self, mission_id: &str) -> Result<Option<MissionSnapshot>, PersistenceError>;

    async fn list_ids(&self) -> Result<Vec<String>, PersistenceError>;
}

/// Process-local store, used by tests and the `run` command.
#[derive(Default)]
pub struct MemoryMissionStore {
    snapshots: RwLock<HashMap<String, MissionSnapshot>>,
}

impl MemoryMissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MissionStore for MemoryMissionStore {
    async fn save(&self, snapshot: &MissionSnapshot) -> Result<(), PersistenceError> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.mission.id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, mission_id: &str) -> Result<Option<MissionSnapshot>, PersistenceError> {
        Ok(self.snapshots.read().await.get(mission_id).cloned())
    }

    async fn list_ids(&self) -> Result<Vec<String>, PersistenceError> {
        let mut ids: Vec<String> = self.snapshots.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
