//! History Writer
//!
//! Appends immutable, full-body copies of entity records to the history log.
//! Each event lands at a fresh path keyed by a generated identifier and is
//! written with a create-only precondition; history is never overwritten.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::ids::UlidGenerator;
use crate::paths::history_path;
use crate::storage::{ObjectStore, Preconditions, StoreError};
use crate::types::{Document, Envelope, EnvelopeError};
use crate::validation::SchemaValidator;

pub type HistoryResult<T> = Result<T, HistoryError>;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("schema validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A generated history path was already occupied. Identifiers are unique
    /// per process, so this is a generator defect and must not be retried.
    #[error("history path already exists: {0}")]
    IdentifierCollision(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where an event was written
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub path: String,
    pub event_id: String,
    pub id: String,
    pub generation: u64,
}

pub struct HistoryWriter {
    store: Arc<dyn ObjectStore>,
    ids: Arc<UlidGenerator>,
    validator: Arc<dyn SchemaValidator>,
}

impl HistoryWriter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ids: Arc<UlidGenerator>,
        validator: Arc<dyn SchemaValidator>,
    ) -> Self {
        Self {
            store,
            ids,
            validator,
        }
    }

    /// Validate and append a mutated entity body
    pub async fn append(&self, body: Document) -> HistoryResult<HistoryRecord> {
        self.append_at(body, Utc::now()).await
    }

    pub async fn append_at(&self, body: Document, now: DateTime<Utc>) -> HistoryResult<HistoryRecord> {
        let envelope = Envelope::from_document(&body)?;

        let value = Value::Object(body);
        self.validator
            .validate(envelope.entity, &value)
            .map_err(HistoryError::Validation)?;

        let event_id = self.ids.generate_at(now.timestamp_millis().max(0) as u64);
        let path = history_path(envelope.env, envelope.entity, &envelope.id, &now, &event_id);
        let bytes = serde_json::to_vec(&value)?;

        let written = match self
            .store
            .write(&path, bytes, Preconditions::does_not_exist())
            .await
        {
            Ok(w) => w,
            Err(StoreError::PreconditionFailed(_)) => {
                tracing::error!(path = %path, "History identifier collision");
                return Err(HistoryError::IdentifierCollision(path));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            path = %path,
            env = %envelope.env,
            entity = %envelope.entity,
            id = %envelope.id,
            "Appended history event"
        );

        Ok(HistoryRecord {
            path,
            event_id,
            id: envelope.id,
            generation: written.generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::parse_history_path;
    use crate::storage::{MemoryStore, ObjectStat, StoreResult, WriteResult};
    use crate::validation::JsonSchemaRegistry;
    use serde_json::json;

    fn writer(store: Arc<MemoryStore>) -> HistoryWriter {
        HistoryWriter::new(
            store,
            Arc::new(UlidGenerator::new()),
            Arc::new(JsonSchemaRegistry::new().unwrap()),
        )
    }

    fn body() -> Document {
        json!({
            "id": "v-1",
            "entity": "venture",
            "env": "dev",
            "schema_version": "1",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-05T00:00:00Z",
            "title": "Acme"
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[tokio::test]
    async fn test_append_writes_full_body_at_history_path() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(store.clone());

        let record = writer.append(body()).await.unwrap();
        let parsed = parse_history_path(&record.path).unwrap();
        assert_eq!(parsed.id, "v-1");
        assert!(record.path.contains(&record.event_id));

        let stored: Value = serde_json::from_slice(&store.read(&record.path).await.unwrap()).unwrap();
        assert_eq!(stored["title"], "Acme");
    }

    #[tokio::test]
    async fn test_rapid_appends_never_collide() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(store.clone());
        let now: DateTime<Utc> = "2026-01-05T00:00:00Z".parse().unwrap();

        let mut paths = Vec::new();
        for _ in 0..20 {
            paths.push(writer.append_at(body(), now).await.unwrap().path);
        }
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
        assert_eq!(store.len(), 20);
    }

    #[tokio::test]
    async fn test_invalid_envelope_rejected_without_write() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(store.clone());
        let mut b = body();
        b.remove("schema_version");

        let err = writer.append(b).await.unwrap_err();
        assert!(matches!(err, HistoryError::Envelope(_)));
        assert!(store.is_empty());
    }

    /// Store whose every write finds the path occupied
    struct OccupiedStore;

    #[async_trait::async_trait]
    impl ObjectStore for OccupiedStore {
        fn backend(&self) -> &'static str {
            "occupied"
        }
        async fn write(
            &self,
            path: &str,
            _: Vec<u8>,
            _: Preconditions,
        ) -> StoreResult<WriteResult> {
            Err(StoreError::PreconditionFailed(path.to_string()))
        }
        async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
            Err(StoreError::NotFound(path.to_string()))
        }
        async fn stat(&self, path: &str) -> StoreResult<ObjectStat> {
            Err(StoreError::NotFound(path.to_string()))
        }
        async fn list(&self, _: &str) -> StoreResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn delete(&self, _: &str, _: Preconditions) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_occupied_path_is_identifier_collision() {
        let writer = HistoryWriter::new(
            Arc::new(OccupiedStore),
            Arc::new(UlidGenerator::new()),
            Arc::new(JsonSchemaRegistry::new().unwrap()),
        );
        let err = writer.append(body()).await.unwrap_err();
        assert!(matches!(err, HistoryError::IdentifierCollision(_)));
    }
}
