use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{MissionStore, PersistenceError};
use crate::mission::MissionSnapshot;

/// One pretty-printed JSON file per mission under `data_dir`.
pub struct FileMissionStore {
    data_dir: PathBuf,
}

impl FileMissionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, mission_id: &str) -> PathBuf {
        // ids are generated internally, but never let one escape the directory
        let safe: String = mission_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        self.data_dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl MissionStore for FileMissionStore {
    async fn save(&self, snapshot: &MissionSnapshot) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.data_dir).await?;
        let path = self.path_for(&snapshot.mission.id);
        let tmp = path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(snapshot)?;
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;

        debug!(mission_id = %snapshot.mission.id, path = %path.display(), "Snapshot saved");
        Ok(())
    }

    async fn load(&self, mission_id: &str) -> Result<Option<MissionSnapshot>, PersistenceError> {
        let path = self.path_for(mission_id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_ids(&self) -> Result<Vec<String>, PersistenceError> {
        let mut entries = match fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
