//! Opaque document/key-value store the rest of the crate persists mobile
//! session records and provider metadata through.
//!
//! The actual database adapter is an external collaborator out of scope
//! for this crate; [`MemoryStore`] is the one concrete implementation we
//! ship, backing the store with an in-process map and optional
//! write-through to a JSON file, the same persistence shape the teacher's
//! `State::try_new`/`on_change` uses for its own JSON snapshotting.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ephyr_log::log;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A mobile session's persisted record.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MobileRecord {
    /// Database-assigned session id (24-char hex, mirroring the source's
    /// `ObjectId`).
    pub id: String,
    /// Wall-clock time the session started.
    pub start: DateTime<Utc>,
    /// Whether the session is still active.
    pub active: bool,
    /// Position history reported by `coord` user actions.
    pub position: Vec<PositionSample>,
}

/// One `{time, coord}` sample appended by the mobile data processor.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PositionSample {
    /// Timestamp the sample was recorded at.
    pub time: DateTime<Utc>,
    /// Arbitrary coordinate payload (`{latitude, longitude}`).
    pub coord: Value,
}

/// Generates a fresh 24-char hex id, the same shape as a Mongo
/// `ObjectId`'s string form.
#[must_use]
pub fn new_object_id() -> String {
    Uuid::new_v4().simple().to_string()[..24].to_string()
}

/// Opaque collection/key-value store. The concrete backend (document
/// database, flat file, in-memory map, ...) is not this crate's concern;
/// callers only see `insert`/`find`/`update`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Looks up a mobile session record by id.
    async fn find_mobile(&self, id: &str) -> Option<MobileRecord>;

    /// Inserts or updates (by id) a mobile session record, returning the
    /// id the record was actually stored under (may differ from a
    /// requested id that didn't exist, mirroring an upsert).
    async fn upsert_mobile(&self, id: Option<&str>) -> MobileRecord;

    /// Marks a mobile session record inactive.
    async fn deactivate_mobile(&self, id: &str);

    /// Appends one position sample to a mobile session's history.
    async fn push_position(&self, id: &str, sample: PositionSample);

    /// Lists every currently-active mobile session record, for the
    /// WebSocket snapshot sent on connect.
    async fn active_mobiles(&self) -> Vec<MobileRecord>;
}

/// In-process [`Store`] backed by a mutex-guarded map, with optional
/// write-through to a JSON file on every mutation.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, MobileRecord>>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Creates a store with no persistence; state lives only in memory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            snapshot_path: None,
        }
    }

    /// Creates a store that writes its full map to `path` as JSON after
    /// every mutation, best-effort.
    #[must_use]
    pub fn with_snapshot(path: PathBuf) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            snapshot_path: Some(path),
        }
    }

    async fn persist(&self, records: &HashMap<String, MobileRecord>) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        match serde_json::to_vec_pretty(records) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(path, bytes).await {
                    log::warn!("Failed to persist store snapshot: {}", e);
                }
            }
            Err(e) => log::warn!("Failed to serialize store snapshot: {}", e),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_mobile(&self, id: &str) -> Option<MobileRecord> {
        self.inner.lock().await.get(id).cloned()
    }

    async fn upsert_mobile(&self, id: Option<&str>) -> MobileRecord {
        let mut map = self.inner.lock().await;

        let resolved_id = match id {
            Some(candidate) if map.contains_key(candidate) => {
                candidate.to_string()
            }
            _ => new_object_id(),
        };

        let record = map
            .entry(resolved_id.clone())
            .and_modify(|r| {
                r.start = Utc::now();
                r.active = true;
            })
            .or_insert_with(|| MobileRecord {
                id: resolved_id.clone(),
                start: Utc::now(),
                active: true,
                position: Vec::new(),
            })
            .clone();

        self.persist(&map).await;
        record
    }

    async fn deactivate_mobile(&self, id: &str) {
        let mut map = self.inner.lock().await;
        if let Some(r) = map.get_mut(id) {
            r.active = false;
        }
        self.persist(&map).await;
    }

    async fn push_position(&self, id: &str, sample: PositionSample) {
        let mut map = self.inner.lock().await;
        if let Some(r) = map.get_mut(id) {
            r.position.push(sample);
        }
        self.persist(&map).await;
    }

    async fn active_mobiles(&self) -> Vec<MobileRecord> {
        self.inner
            .lock()
            .await
            .values()
            .filter(|r| r.active)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod storage_spec {
    use super::*;

    #[tokio::test]
    async fn upsert_with_unknown_id_allocates_fresh_one() {
        let store = MemoryStore::new();
        let record = store.upsert_mobile(Some("deadbeefdeadbeefdeadbeef")).await;
        assert_ne!(record.id, "deadbeefdeadbeefdeadbeef");
        assert!(record.active);
    }

    #[tokio::test]
    async fn upsert_with_known_id_resumes_session() {
        let store = MemoryStore::new();
        let first = store.upsert_mobile(None).await;
        store.deactivate_mobile(&first.id).await;
        let resumed = store.upsert_mobile(Some(&first.id)).await;
        assert_eq!(resumed.id, first.id);
        assert!(resumed.active);
    }

    #[tokio::test]
    async fn deactivate_marks_record_inactive() {
        let store = MemoryStore::new();
        let record = store.upsert_mobile(None).await;
        store.deactivate_mobile(&record.id).await;
        let found = store.find_mobile(&record.id).await.unwrap();
        assert!(!found.active);
    }

    #[tokio::test]
    async fn active_mobiles_excludes_deactivated_records() {
        let store = MemoryStore::new();
        let running = store.upsert_mobile(None).await;
        let finished = store.upsert_mobile(None).await;
        store.deactivate_mobile(&finished.id).await;

        let active = store.active_mobiles().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, running.id);
    }
}
