//! Reader / Lister
//!
//! Reconstructs an entity listing from sharded NDJSON manifests, falling back
//! to per-id manifest objects when no shard file exists for the kind.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::paths::{manifest_prefix, shard_prefix};
use crate::storage::{read_document, ObjectStore, StoreError, StoreResult};
use crate::types::{EntityKind, Environment, ManifestRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Only records with `updated_at >= since`
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingSource {
    Shards,
    Manifests,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    pub source: ListingSource,
    pub records: Vec<ManifestRecord>,
    /// Lines or objects that could not be read
    pub skipped: usize,
}

/// List the manifests of one entity kind, newest first
pub async fn list_manifests(
    store: &dyn ObjectStore,
    env: Environment,
    kind: EntityKind,
    options: &ListOptions,
) -> StoreResult<Listing> {
    let shards: Vec<String> = store
        .list(&shard_prefix(env, kind))
        .await?
        .into_iter()
        .filter(|name| name.ends_with(".ndjson"))
        .collect();

    let (source, records, skipped) = if shards.is_empty() {
        let (records, skipped) = read_manifests(store, env, kind).await?;
        (ListingSource::Manifests, records, skipped)
    } else {
        let (records, skipped) = read_shards(store, &shards).await?;
        (ListingSource::Shards, records, skipped)
    };

    let mut records: Vec<ManifestRecord> = records
        .into_iter()
        .filter(|r| options.since.map_or(true, |since| r.updated_at >= since))
        .collect();
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    if let Some(limit) = options.limit {
        records.truncate(limit);
    }

    debug!(
        env = %env,
        entity = %kind,
        source = ?source,
        count = records.len(),
        skipped,
        "Listed manifests"
    );

    Ok(Listing {
        source,
        records,
        skipped,
    })
}

/// Parse every shard line; the newest line per id wins
async fn read_shards(store: &dyn ObjectStore, shards: &[String]) -> StoreResult<(Vec<ManifestRecord>, usize)> {
    let mut latest: HashMap<String, ManifestRecord> = HashMap::new();
    let mut skipped = 0;

    for shard in shards {
        let bytes = match store.read(shard).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        };

        for line in String::from_utf8_lossy(&bytes).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ManifestRecord>(line) {
                Ok(record) => {
                    let newer = latest
                        .get(&record.id)
                        .map_or(true, |current| record.updated_at >= current.updated_at);
                    if newer {
                        latest.insert(record.id.clone(), record);
                    }
                }
                Err(e) => {
                    warn!(shard = %shard, error = %e, "Skipping malformed shard line");
                    skipped += 1;
                }
            }
        }
    }

    Ok((latest.into_values().collect(), skipped))
}

async fn read_manifests(
    store: &dyn ObjectStore,
    env: Environment,
    kind: EntityKind,
) -> StoreResult<(Vec<ManifestRecord>, usize)> {
    let mut records = Vec::new();
    let mut skipped = 0;

    for name in store.list(&manifest_prefix(env, kind)).await? {
        if !name.ends_with(".json") {
            continue;
        }
        let parsed = read_document(store, &name).await.and_then(|doc| {
            serde_json::from_value::<ManifestRecord>(Value::Object(doc)).map_err(StoreError::from)
        });
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(path = %name, error = %e, "Skipping unreadable manifest");
                skipped += 1;
            }
        }
    }

    Ok((records, skipped))
}
