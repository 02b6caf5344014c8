//! Object Store Adapter
//!
//! A uniform interface over conditional-write-capable blob stores. All
//! concurrency control in the engine goes through the preconditions here:
//!
//! ```text
//! if_generation_match = Some(0)   -> path must not exist (write-once)
//! if_generation_match = Some(g)   -> current generation must be g
//! if_metageneration_match = Some(m) -> current metageneration must be m
//! ```
//!
//! Backends:
//! - [`LocalStore`]: filesystem, create-only precondition enforced
//! - [`MemoryStore`]: in-process, every precondition enforced
//! - [`GcsStore`]: Cloud Storage JSON API over HTTP

mod error;
mod gcs;
mod local;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Document;

pub use error::{StoreError, StoreResult};
pub use gcs::{GcsConfig, GcsStore};
pub use local::LocalStore;
pub use memory::MemoryStore;

/// Write/delete preconditions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub if_generation_match: Option<u64>,
    pub if_metageneration_match: Option<u64>,
}

impl Preconditions {
    /// No preconditions: unconditional overwrite
    pub fn none() -> Self {
        Self::default()
    }

    /// The path must not currently exist
    pub fn does_not_exist() -> Self {
        Self {
            if_generation_match: Some(0),
            if_metageneration_match: None,
        }
    }

    /// Compare-and-swap against an observed object
    pub fn matches(stat: &ObjectStat) -> Self {
        Self {
            if_generation_match: Some(stat.generation),
            if_metageneration_match: Some(stat.metageneration),
        }
    }

    pub fn generation(generation: u64) -> Self {
        Self {
            if_generation_match: Some(generation),
            if_metageneration_match: None,
        }
    }
}

/// Published version of a successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    pub generation: u64,
    pub metageneration: u64,
}

/// Object metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    pub generation: u64,
    pub metageneration: u64,
    pub size: u64,
    pub updated_at: DateTime<Utc>,
}

/// Blob store with optimistic-concurrency preconditions
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &'static str;

    async fn write(
        &self,
        path: &str,
        body: Vec<u8>,
        preconditions: Preconditions,
    ) -> StoreResult<WriteResult>;

    async fn read(&self, path: &str) -> StoreResult<Vec<u8>>;

    async fn stat(&self, path: &str) -> StoreResult<ObjectStat>;

    /// Object names starting with `prefix`, sorted ascending
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Deleting a missing object succeeds
    async fn delete(&self, path: &str, preconditions: Preconditions) -> StoreResult<()>;
}

/// Read an object and parse it as a JSON object
pub async fn read_document(store: &dyn ObjectStore, path: &str) -> StoreResult<Document> {
    let bytes = store.read(path).await?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Malformed(format!("{}: {}", path, e)))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(StoreError::Malformed(format!("{}: not a JSON object", path))),
    }
}

/// Serialize a value as JSON and write it
pub async fn write_json<T: Serialize + ?Sized>(
    store: &dyn ObjectStore,
    path: &str,
    value: &T,
    preconditions: Preconditions,
) -> StoreResult<WriteResult> {
    let body = serde_json::to_vec(value)?;
    store.write(path, body, preconditions).await
}

/// `stat` that maps `NotFound` to `None`
pub async fn stat_optional(store: &dyn ObjectStore, path: &str) -> StoreResult<Option<ObjectStat>> {
    match store.stat(path).await {
        Ok(stat) => Ok(Some(stat)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
