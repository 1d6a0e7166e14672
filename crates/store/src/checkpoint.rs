//! `CheckpointStore` — save/load/delete the whole `Trace` aggregate,
//! keyed by `trace_id`. Grounded in the teacher's `RunStore`
//! (`RwLock<HashMap<..>>` in-memory ring + JSONL durability,
//! `gateway/runtime/runs.rs`), generalized from per-field run updates to
//! whole-aggregate snapshot/restore.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ao_domain::aggregate::Trace;
use ao_domain::error::{Error, Result};
use parking_lot::RwLock;
use uuid::Uuid;

/// Pluggable persistence for `Trace` aggregates. Readers get a deep copy;
/// writers of the same `trace_id` must be serialized by the caller (the
/// Executor holds a per-trace lock for this — see `ao_engine::lock`).
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, trace: &Trace) -> Result<()>;
    async fn load(&self, trace_id: Uuid) -> Result<Trace>;
    async fn delete(&self, trace_id: Uuid) -> Result<()>;
    /// List every trace id with a checkpoint, for admin/debug surfaces.
    async fn list_ids(&self) -> Result<Vec<Uuid>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory default
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The default `CheckpointStore`: a map from `trace_id` to a deep-copied
/// `Trace`. Matches §4.7's "in-memory default uses a map ... deep-copied
/// Trace" contract exactly.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    traces: RwLock<HashMap<Uuid, Trace>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, trace: &Trace) -> Result<()> {
        self.traces.write().insert(trace.trace_id, trace.clone());
        Ok(())
    }

    async fn load(&self, trace_id: Uuid) -> Result<Trace> {
        self.traces
            .read()
            .get(&trace_id)
            .cloned()
            .ok_or_else(|| Error::TraceNotFound(trace_id.to_string()))
    }

    async fn delete(&self, trace_id: Uuid) -> Result<()> {
        self.traces.write().remove(&trace_id);
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<Uuid>> {
        Ok(self.traces.read().keys().copied().collect())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File-backed store (durability is pluggable, per §1 Non-goals)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persists one JSON file per trace under `root`, writing to a `.tmp`
/// sibling and renaming over the target so a concurrent reader never
/// observes a partially-written checkpoint (the corpus's
/// `rewrite_jsonl`/`tmp`+`rename` pattern, applied per-trace instead of
/// to one append-only file).
pub struct FileCheckpointStore {
    root: PathBuf,
    /// In-memory mirror kept alongside the files so `load` after a `save`
    /// in the same process never pays a disk round-trip, and so `list_ids`
    /// stays cheap.
    cache: RwLock<HashMap<Uuid, Trace>>,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(Error::Io)?;
        let mut cache = HashMap::new();
        if let Ok(entries) = std::fs::read_dir(&root) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Ok(content) = std::fs::read_to_string(&path) {
                    if let Ok(trace) = serde_json::from_str::<Trace>(&content) {
                        cache.insert(trace.trace_id, trace);
                    }
                }
            }
        }
        Ok(Self {
            root,
            cache: RwLock::new(cache),
        })
    }

    fn path_for(&self, trace_id: Uuid) -> PathBuf {
        self.root.join(format!("{trace_id}.json"))
    }

    fn write_atomic(path: &Path, json: &str) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, path).map_err(Error::Io)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, trace: &Trace) -> Result<()> {
        let json = serde_json::to_string_pretty(trace).map_err(Error::Json)?;
        Self::write_atomic(&self.path_for(trace.trace_id), &json)?;
        self.cache.write().insert(trace.trace_id, trace.clone());
        Ok(())
    }

    async fn load(&self, trace_id: Uuid) -> Result<Trace> {
        if let Some(trace) = self.cache.read().get(&trace_id).cloned() {
            return Ok(trace);
        }
        let content = std::fs::read_to_string(self.path_for(trace_id))
            .map_err(|_| Error::TraceNotFound(trace_id.to_string()))?;
        serde_json::from_str(&content).map_err(Error::Json)
    }

    async fn delete(&self, trace_id: Uuid) -> Result<()> {
        self.cache.write().remove(&trace_id);
        let path = self.path_for(trace_id);
        if path.exists() {
            std::fs::remove_file(path).map_err(Error::Io)?;
        }
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<Uuid>> {
        Ok(self.cache.read().keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_trace() -> Trace {
        Trace::new("client-1", 100, Utc::now())
    }

    #[tokio::test]
    async fn in_memory_round_trips() {
        let store = InMemoryCheckpointStore::new();
        let trace = sample_trace();
        let id = trace.trace_id;
        store.save(&trace).await.unwrap();
        let loaded = store.load(id).await.unwrap();
        assert_eq!(loaded.trace_id, trace.trace_id);
        assert_eq!(loaded.client_id, trace.client_id);
    }

    #[tokio::test]
    async fn in_memory_load_missing_errors() {
        let store = InMemoryCheckpointStore::new();
        let result = store.load(Uuid::new_v4()).await;
        assert!(matches!(result, Err(Error::TraceNotFound(_))));
    }

    #[tokio::test]
    async fn in_memory_delete_then_load_errors() {
        let store = InMemoryCheckpointStore::new();
        let trace = sample_trace();
        let id = trace.trace_id;
        store.save(&trace).await.unwrap();
        store.delete(id).await.unwrap();
        assert!(store.load(id).await.is_err());
    }

    #[tokio::test]
    async fn in_memory_save_is_a_deep_copy() {
        let store = InMemoryCheckpointStore::new();
        let mut trace = sample_trace();
        let id = trace.trace_id;
        store.save(&trace).await.unwrap();

        trace.push_turn("hello", Utc::now());
        let loaded = store.load(id).await.unwrap();
        assert!(loaded.turns.is_empty(), "mutating the caller's copy must not affect the stored snapshot");
    }

    #[tokio::test]
    async fn file_store_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let trace = sample_trace();
        let id = trace.trace_id;

        {
            let store = FileCheckpointStore::new(dir.path()).unwrap();
            store.save(&trace).await.unwrap();
        }

        let reopened = FileCheckpointStore::new(dir.path()).unwrap();
        let loaded = reopened.load(id).await.unwrap();
        assert_eq!(loaded.trace_id, id);
    }

    #[tokio::test]
    async fn file_store_list_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let t1 = sample_trace();
        let t2 = sample_trace();
        store.save(&t1).await.unwrap();
        store.save(&t2).await.unwrap();
        let mut ids = store.list_ids().await.unwrap();
        ids.sort();
        let mut expected = vec![t1.trace_id, t2.trace_id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn file_store_delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let trace = sample_trace();
        store.save(&trace).await.unwrap();
        store.delete(trace.trace_id).await.unwrap();
        assert!(store.load(trace.trace_id).await.is_err());
        assert!(!dir.path().join(format!("{}.json", trace.trace_id)).exists());
    }
}
