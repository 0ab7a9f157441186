//! Story persistence.
//!
//! The engine treats storage as an opaque key-value snapshot store: one
//! JSON document per story id. Every snapshot field is optional on load so
//! older saves keep working. [`FileStore`] is the bundled implementation;
//! anything implementing [`SnapshotStore`] can stand in.

use crate::memory::MemoryWindow;
use crate::narrator::HistoryEntry;
use crate::schema::{Dossier, ResponderId, Scene, StoryConfig, StoryOutline, TurnRecord, WorldState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;

/// Errors from snapshot operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No snapshot found for story {story_id}")]
    Missing { story_id: String },
}

/// Persisted state for one responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderSnapshot {
    pub dossier: Dossier,
    #[serde(default)]
    pub memory: MemoryWindow,
}

/// The full session snapshot for one story.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorySnapshot {
    #[serde(default)]
    pub story_id: String,

    #[serde(default)]
    pub saved_at: String,

    #[serde(default)]
    pub config: Option<StoryConfig>,

    #[serde(default)]
    pub outline: Option<StoryOutline>,

    #[serde(default)]
    pub scene: Option<Scene>,

    #[serde(default)]
    pub responders: HashMap<ResponderId, ResponderSnapshot>,

    #[serde(default)]
    pub turn_history: Vec<TurnRecord>,

    #[serde(default)]
    pub world_state: WorldState,

    #[serde(default)]
    pub narrator_history: Vec<HistoryEntry>,

    #[serde(default)]
    pub narrator_world_context: Option<serde_json::Value>,
}

/// Keyed snapshot storage.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Write (or overwrite) the snapshot for a story.
    async fn put(&self, story_id: &str, snapshot: &StorySnapshot) -> Result<(), PersistError>;

    /// Read the snapshot for a story, if one exists.
    async fn get(&self, story_id: &str) -> Result<Option<StorySnapshot>, PersistError>;
}

/// Snapshot store backed by one pretty-printed JSON file per story.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, story_id: &str) -> PathBuf {
        let sanitized: String = story_id
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{sanitized}.json"))
    }

    /// List the story ids with snapshots in this store's directory.
    pub async fn list(&self) -> Result<Vec<String>, PersistError> {
        let mut ids = Vec::new();

        if !self.dir.exists() {
            return Ok(ids);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Ok(content) = fs::read_to_string(&path).await {
                    if let Ok(snapshot) = serde_json::from_str::<StorySnapshot>(&content) {
                        if !snapshot.story_id.is_empty() {
                            ids.push(snapshot.story_id);
                        }
                    }
                }
            }
        }

        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn put(&self, story_id: &str, snapshot: &StorySnapshot) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).await?;
        let content = serde_json::to_string_pretty(snapshot)?;
        fs::write(self.path_for(story_id), content).await?;
        Ok(())
    }

    async fn get(&self, story_id: &str) -> Result<Option<StorySnapshot>, PersistError> {
        let path = self.path_for(story_id);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Current timestamp for snapshot metadata.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (FileStore, TempDir) {
        let tmp = TempDir::new().expect("Failed to create temp dir");
        let store = FileStore::new(tmp.path().join("saves"));
        (store, tmp)
    }

    #[tokio::test]
    async fn test_put_then_get_round_trips() {
        let (store, _tmp) = store();

        let snapshot = StorySnapshot {
            story_id: "lyra_ab12cd34".to_string(),
            saved_at: now_rfc3339(),
            turn_history: vec![TurnRecord {
                turn: 1,
                input: "I enter the hall".to_string(),
                narrative: "The hall falls quiet.".to_string(),
                summary: "Player: I enter the hall".to_string(),
            }],
            ..Default::default()
        };

        store.put("lyra_ab12cd34", &snapshot).await.unwrap();
        let loaded = store.get("lyra_ab12cd34").await.unwrap().unwrap();

        assert_eq!(loaded.story_id, "lyra_ab12cd34");
        assert_eq!(loaded.turn_history.len(), 1);
        assert_eq!(loaded.turn_history[0].narrative, "The hall falls quiet.");
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (store, _tmp) = store();
        assert!(store.get("nobody_00000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_older_snapshot_with_missing_fields_loads() {
        let (store, _tmp) = store();

        // A minimal save from an earlier format: only id and history.
        let content = serde_json::json!({
            "story_id": "old_save",
            "turn_history": []
        });
        fs::create_dir_all(store.dir.clone()).await.unwrap();
        fs::write(store.path_for("old_save"), content.to_string())
            .await
            .unwrap();

        let loaded = store.get("old_save").await.unwrap().unwrap();
        assert!(loaded.config.is_none());
        assert!(loaded.scene.is_none());
        assert!(loaded.responders.is_empty());
        assert!(loaded.narrator_history.is_empty());
    }

    #[tokio::test]
    async fn test_list_returns_saved_ids() {
        let (store, _tmp) = store();

        for id in ["beta_11111111", "alpha_22222222"] {
            let snapshot = StorySnapshot {
                story_id: id.to_string(),
                ..Default::default()
            };
            store.put(id, &snapshot).await.unwrap();
        }

        let ids = store.list().await.unwrap();
        assert_eq!(ids, vec!["alpha_22222222", "beta_11111111"]);
    }

    #[tokio::test]
    async fn test_list_on_missing_dir_is_empty() {
        let (store, _tmp) = store();
        assert!(store.list().await.unwrap().is_empty());
    }
}
