//! In-memory settings document with a write-through persistence boundary.
//!
//! The document is loaded once when the store opens. Every mutation runs
//! under one async mutex, is applied to a copy, written to SQLite and only
//! then swapped in, so a failed write leaves memory and disk in agreement.
//! Concurrent writers are serialized; none of them can lose another's change.

use std::path::Path;

use jarvis_shared::models::{Event, FaceModel, Settings};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};

struct Inner {
    db: Database,
    /// `None` until the first write materializes the record.
    document: Option<Settings>,
}

pub struct DocumentStore {
    inner: Mutex<Inner>,
}

impl DocumentStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_database(Database::open_at(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_database(Database::open_in_memory()?)
    }

    fn from_database(db: Database) -> Result<Self> {
        let document = db.load_settings()?;
        info!(
            path = ?db.path(),
            materialized = document.is_some(),
            "settings document loaded"
        );
        Ok(Self {
            inner: Mutex::new(Inner { db, document }),
        })
    }

    /// Apply `f` to a copy of the document and persist it. The copy replaces
    /// the live document only if both `f` and the write succeed.
    async fn mutate<T>(&self, f: impl FnOnce(&mut Settings) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.lock().await;
        let mut next = inner.document.clone().unwrap_or_default();
        let out = f(&mut next)?;
        inner.db.write_settings(&next)?;
        inner.document = Some(next);
        Ok(out)
    }

    async fn read<T>(&self, f: impl FnOnce(&Settings) -> T) -> T {
        let inner = self.inner.lock().await;
        match &inner.document {
            Some(document) => f(document),
            None => f(&Settings::default()),
        }
    }

    /// Whether a write has ever materialized the record.
    pub async fn is_materialized(&self) -> bool {
        self.inner.lock().await.document.is_some()
    }

    // -- settings ----------------------------------------------------------

    pub async fn settings(&self) -> Settings {
        self.read(Settings::clone).await
    }

    pub async fn save_settings(&self, patch: &Map<String, Value>) -> Result<()> {
        self.mutate(|doc| doc.merge(patch).map_err(StoreError::from))
            .await?;
        debug!(keys = patch.len(), "settings merged");
        Ok(())
    }

    // -- events ------------------------------------------------------------

    pub async fn events(&self) -> Vec<Event> {
        self.read(|doc| doc.events.clone()).await
    }

    /// Append an event built from a client payload. Returns the stored form.
    pub async fn save_event(&self, payload: Map<String, Value>) -> Result<Event> {
        let event = Event::from_payload(payload)?;
        let stored = event.clone();
        self.mutate(move |doc| {
            if doc.events.iter().any(|e| e.id == event.id) {
                return Err(StoreError::Duplicate {
                    kind: "event",
                    id: event.id,
                });
            }
            doc.events.push(event);
            Ok(())
        })
        .await?;
        debug!(id = %stored.id, "event saved");
        Ok(stored)
    }

    /// Replace the event whose id matches the payload's. Never inserts.
    pub async fn update_event(&self, payload: Map<String, Value>) -> Result<Event> {
        let event = Event::from_payload(payload)?;
        let stored = event.clone();
        self.mutate(move |doc| {
            let slot = doc
                .events
                .iter_mut()
                .find(|e| e.id == event.id)
                .ok_or_else(|| StoreError::NotFound {
                    kind: "event",
                    id: event.id.clone(),
                })?;
            *slot = event;
            Ok(())
        })
        .await?;
        debug!(id = %stored.id, "event updated");
        Ok(stored)
    }

    pub async fn delete_event(&self, id: &str) -> Result<()> {
        self.mutate(|doc| {
            let before = doc.events.len();
            doc.events.retain(|e| e.id != id);
            if doc.events.len() == before {
                return Err(StoreError::NotFound {
                    kind: "event",
                    id: id.to_string(),
                });
            }
            Ok(())
        })
        .await?;
        debug!(id, "event deleted");
        Ok(())
    }

    // -- face models -------------------------------------------------------

    pub async fn face_models(&self) -> Vec<FaceModel> {
        self.read(|doc| doc.face_models.clone()).await
    }

    pub async fn add_face_model(&self, model: FaceModel) -> Result<()> {
        let id = model.id;
        self.mutate(move |doc| {
            doc.face_models.push(model);
            Ok(())
        })
        .await?;
        debug!(id = %id, "face model recorded");
        Ok(())
    }

    /// Remove a face model record and return it so the caller can clean up
    /// the image it owns.
    pub async fn remove_face_model(&self, id: &str) -> Result<FaceModel> {
        let removed = self
            .mutate(|doc| {
                let position = Uuid::parse_str(id)
                    .ok()
                    .and_then(|uuid| doc.face_models.iter().position(|m| m.id == uuid))
                    .ok_or_else(|| StoreError::NotFound {
                        kind: "face model",
                        id: id.to_string(),
                    })?;
                Ok(doc.face_models.remove(position))
            })
            .await?;
        debug!(id, "face model record removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn model(name: &str) -> FaceModel {
        let id = Uuid::new_v4();
        FaceModel::new(
            id,
            format!("{id}.png"),
            format!("faces/{id}.png"),
            object(json!({ "name": name, "extension": ".png" })),
        )
    }

    #[tokio::test]
    async fn test_reads_default_without_materializing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.db");
        let store = DocumentStore::open(&path).unwrap();

        assert_eq!(store.settings().await, Settings::default());
        assert!(store.events().await.is_empty());
        assert!(!store.is_materialized().await);

        drop(store);
        let db = Database::open_at(&path).unwrap();
        assert!(db.load_settings().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_write_materializes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.db");

        {
            let store = DocumentStore::open(&path).unwrap();
            store
                .save_settings(&object(json!({ "city": "Nairobi" })))
                .await
                .unwrap();
            assert!(store.is_materialized().await);
        }

        let reopened = DocumentStore::open(&path).unwrap();
        let settings = reopened.settings().await;
        assert_eq!(settings.city, "Nairobi");
        assert!(settings.use_video);
    }

    #[tokio::test]
    async fn test_invalid_settings_leave_document_unchanged() {
        let store = DocumentStore::open_in_memory().unwrap();
        let err = store
            .save_settings(&object(json!({ "theme": "neon" })))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert!(!store.is_materialized().await);
    }

    /// Make every later document write fail at the SQLite layer.
    async fn break_storage(store: &DocumentStore) {
        store
            .inner
            .lock()
            .await
            .db
            .conn()
            .execute_batch("DROP TABLE settings_document")
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_first_write_leaves_record_absent() {
        let store = DocumentStore::open_in_memory().unwrap();
        break_storage(&store).await;

        let err = store
            .save_event(object(json!({ "id": "e1" })))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
        assert!(store.events().await.is_empty());
        assert!(!store.is_materialized().await);
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back_memory() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.save_event(object(json!({ "id": "e1" }))).await.unwrap();
        store
            .save_settings(&object(json!({ "city": "Oslo" })))
            .await
            .unwrap();
        break_storage(&store).await;

        assert!(store.save_event(object(json!({ "id": "e2" }))).await.is_err());
        assert!(store.delete_event("e1").await.is_err());
        assert!(store
            .save_settings(&object(json!({ "city": "Rome" })))
            .await
            .is_err());

        let ids: Vec<String> = store.events().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["e1".to_string()]);
        assert_eq!(store.settings().await.city, "Oslo");
        assert!(store.is_materialized().await);
    }

    #[tokio::test]
    async fn test_event_round_trip_normalizes_time() {
        let store = DocumentStore::open_in_memory().unwrap();
        store
            .save_event(object(json!({ "id": "e1", "dateTime": "2024-01-01T10:00" })))
            .await
            .unwrap();

        let events = store.events().await;
        assert_eq!(events.len(), 1);
        let value = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(value["id"], json!("e1"));
        assert_eq!(value["time"], json!("2024-01-01T10:00"));
        assert!(value.get("dateTime").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_event_id_rejected() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.save_event(object(json!({ "id": "e1" }))).await.unwrap();
        let err = store
            .save_event(object(json!({ "id": "e1" })))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
        assert_eq!(store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_event_is_not_an_upsert() {
        let store = DocumentStore::open_in_memory().unwrap();
        store
            .save_event(object(json!({ "id": "e1", "name": "a" })))
            .await
            .unwrap();
        let before = store.events().await;

        let err = store
            .update_event(object(json!({ "id": "missing", "name": "b" })))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(store.events().await, before);
    }

    #[tokio::test]
    async fn test_update_replaces_matching_event() {
        let store = DocumentStore::open_in_memory().unwrap();
        store
            .save_event(object(json!({ "id": "e1", "name": "a", "location": "here" })))
            .await
            .unwrap();
        store
            .update_event(object(json!({ "id": "e1", "name": "b", "dateTime": "t2" })))
            .await
            .unwrap();

        let events = store.events().await;
        assert_eq!(events[0].fields.get("name"), Some(&json!("b")));
        assert_eq!(events[0].time.as_deref(), Some("t2"));
        assert!(events[0].fields.get("location").is_none());
    }

    #[tokio::test]
    async fn test_delete_event() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.save_event(object(json!({ "id": "e1" }))).await.unwrap();
        store.save_event(object(json!({ "id": "e2" }))).await.unwrap();

        store.delete_event("e1").await.unwrap();
        let ids: Vec<String> = store.events().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["e2".to_string()]);

        assert!(matches!(
            store.delete_event("e1").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_settings_merge_keeps_collections() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.save_event(object(json!({ "id": "e1" }))).await.unwrap();
        store
            .save_settings(&object(json!({ "notifications": false, "events": [] })))
            .await
            .unwrap();

        let settings = store.settings().await;
        assert!(!settings.notifications);
        assert_eq!(settings.events.len(), 1);
    }

    #[tokio::test]
    async fn test_face_model_add_and_remove() {
        let store = DocumentStore::open_in_memory().unwrap();
        let ada = model("Ada");
        let id = ada.id.to_string();
        store.add_face_model(ada.clone()).await.unwrap();
        store.add_face_model(model("Grace")).await.unwrap();

        let removed = store.remove_face_model(&id).await.unwrap();
        assert_eq!(removed, ada);
        assert_eq!(store.face_models().await.len(), 1);

        assert!(store.remove_face_model(&id).await.is_err());
        assert!(store.remove_face_model("not-a-uuid").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_saves_are_all_kept() {
        let store = Arc::new(DocumentStore::open_in_memory().unwrap());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .save_event(object(json!({ "id": format!("e{i}") })))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.events().await.len(), 16);
    }
}
