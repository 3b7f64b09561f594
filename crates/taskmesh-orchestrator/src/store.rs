use crate::reputation::ReputationTable;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use taskmesh_core::{TaskmeshError, TaskmeshResult};

/// Durable home of the reputation table.
#[async_trait]
pub trait ReputationStore: Send + Sync {
    /// Loads the last saved table, `None` if nothing was saved yet.
    async fn load(&self) -> TaskmeshResult<Option<ReputationTable>>;
    /// Overwrites the saved table.
    async fn save(&self, table: &ReputationTable) -> TaskmeshResult<()>;
}

/// Reputation table kept as one pretty-printed JSON file.
pub struct JsonFileReputationStore {
    path: PathBuf,
}

impl JsonFileReputationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReputationStore for JsonFileReputationStore {
    async fn load(&self) -> TaskmeshResult<Option<ReputationTable>> {
        read_json_opt(&self.path).await
    }

    async fn save(&self, table: &ReputationTable) -> TaskmeshResult<()> {
        write_json_atomic(&self.path, table).await
    }
}

/// Store that keeps the last saved table in memory. Used for dry runs and tests.
#[derive(Default)]
pub struct MemoryReputationStore {
    saved: Mutex<Option<ReputationTable>>,
    saves: Mutex<usize>,
}

impl MemoryReputationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }

    pub fn snapshot(&self) -> Option<ReputationTable> {
        self.saved.lock().clone()
    }
}

#[async_trait]
impl ReputationStore for MemoryReputationStore {
    async fn load(&self) -> TaskmeshResult<Option<ReputationTable>> {
        Ok(self.saved.lock().clone())
    }

    async fn save(&self, table: &ReputationTable) -> TaskmeshResult<()> {
        *self.saved.lock() = Some(table.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}

/// Serializes `value` next to `path` and renames it into place.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> TaskmeshResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Reads and parses `path`, `None` if it does not exist.
pub async fn read_json_opt<T: DeserializeOwned>(path: &Path) -> TaskmeshResult<Option<T>> {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value = serde_json::from_str(&data).map_err(|e| {
        TaskmeshError::Store(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    Ok(Some(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileReputationStore::new(dir.path().join("nested/reputation.json"));
        assert!(store.load().await.unwrap().is_none());

        let mut table = ReputationTable::with_channels(["code"]);
        table.seed("code", "code_agent_1", 0.6);
        store.save(&table).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.score("code", "code_agent_1"), Some(0.6));
        assert!(!dir.path().join("nested/reputation.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reputation.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        let err = JsonFileReputationStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, TaskmeshError::Store(_)));
    }

    #[tokio::test]
    async fn test_memory_store_counts_saves() {
        let store = MemoryReputationStore::new();
        store.save(&ReputationTable::default()).await.unwrap();
        store.save(&ReputationTable::default()).await.unwrap();
        assert_eq!(store.save_count(), 2);
        assert!(store.snapshot().is_some());
    }
}
