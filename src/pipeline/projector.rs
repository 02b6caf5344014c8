//! Manifest & Index Projector
//!
//! Recomputes the listing record and every secondary-index pointer of one
//! entity from its snapshot. Order of effects for one projection:
//!
//! ```text
//! read snapshot ─► read previous manifest (+ generation)
//!              ─► write manifest if generation unchanged (indexPaths = fresh set)
//!              ─► delete stale pointers ─► write pointers
//!              ─► reconcile if the manifest was superseded meanwhile
//!              ─► append shard line (optional)
//! ```
//!
//! Pointers are only written after a manifest listing them, so the previous
//! manifest's `indexPaths` always covers every pointer this id can own.
//! A pointer newer than the snapshot being projected is never deleted.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::stats::PipelineStats;
use super::{PipelineResult, SkipReason};
use crate::paths::{
    index_family_prefix, index_path, is_path_segment, parse_snapshot_path, shard_key, shard_path,
    shared_index_path, slugify, EntityRef,
};
use crate::storage::{
    read_document, stat_optional, write_json, ObjectStat, ObjectStore, Preconditions, StoreError,
};
use crate::types::{
    parse_timestamp, string_field, Document, EntityKind, Envelope, IndexPointer, ManifestRecord,
};

pub const DEFAULT_SHARD_COUNT: u32 = 256;

/// Sharded manifest settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSettings {
    pub count: u32,
    /// Append a manifest line to the id's shard on every projection
    pub write: bool,
}

impl Default for ShardSettings {
    fn default() -> Self {
        Self {
            count: DEFAULT_SHARD_COUNT,
            write: false,
        }
    }
}

/// One `by-<attribute>` index family of an entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFamily {
    pub attribute: &'static str,
    /// Single pointer per value instead of one per id
    pub shared: bool,
}

const fn family(attribute: &'static str) -> IndexFamily {
    IndexFamily {
        attribute,
        shared: false,
    }
}

const VENTURE_FAMILIES: &[IndexFamily] = &[family("status"), family("lead"), family("next-due")];
const ROUND_FAMILIES: &[IndexFamily] = &[family("venture")];
const CAP_TABLE_FAMILIES: &[IndexFamily] = &[IndexFamily {
    attribute: "venture",
    shared: true,
}];
const PERSON_FAMILIES: &[IndexFamily] = &[family("role")];
const STATUS_FAMILIES: &[IndexFamily] = &[family("status")];

pub fn index_families(kind: EntityKind) -> &'static [IndexFamily] {
    match kind {
        EntityKind::Venture => VENTURE_FAMILIES,
        EntityKind::Round => ROUND_FAMILIES,
        EntityKind::CapTable => CAP_TABLE_FAMILIES,
        EntityKind::Person => PERSON_FAMILIES,
        EntityKind::Idea | EntityKind::Playbook | EntityKind::Experiment => STATUS_FAMILIES,
    }
}

/// Derive the listing record for a snapshot. `index_paths` is left empty.
pub fn manifest_from_snapshot(envelope: &Envelope, doc: &Document) -> ManifestRecord {
    ManifestRecord {
        id: envelope.id.clone(),
        entity: envelope.entity,
        env: envelope.env,
        schema_version: envelope.schema_version.clone(),
        created_at: envelope.created_at,
        updated_at: envelope.updated_at,
        title: string_field(doc, &["title", "name"]),
        status: string_field(doc, &["status"]),
        owner: string_field(doc, &["owner"]),
        lead: string_field(doc, &["lead"]),
        stage: string_field(doc, &["stage"]),
        venture_id: string_field(doc, &["ventureId", "venture_id"]),
        as_of: string_field(doc, &["asOf", "as_of"]),
        ptr: EntityRef::new(envelope.env, envelope.entity, envelope.id.as_str()).snapshot_path(),
        index_paths: Vec::new(),
    }
}

/// Compute the full pointer set for a snapshot
pub fn index_pointers(envelope: &Envelope, doc: &Document) -> Vec<IndexPointer> {
    let (env, kind, id) = (envelope.env, envelope.entity, envelope.id.as_str());

    index_families(kind)
        .iter()
        .filter_map(|fam| {
            let value = attribute_value(fam.attribute, doc)?;
            let path = if fam.shared {
                shared_index_path(env, kind, fam.attribute, &value)
            } else {
                index_path(env, kind, fam.attribute, &value, id)
            };
            Some(IndexPointer {
                attribute: fam.attribute,
                value,
                path,
                shared: fam.shared,
            })
        })
        .collect()
}

fn attribute_value(attribute: &str, doc: &Document) -> Option<String> {
    match attribute {
        "next-due" => next_due_month(doc),
        "venture" => string_field(doc, &["ventureId", "venture_id"]).filter(|v| is_path_segment(v)),
        attr => string_field(doc, &[attr]).map(|v| slugify(&v)).filter(|v| !v.is_empty()),
    }
}

/// `YYYY-MM` of the earliest milestone that is not completed
fn next_due_month(doc: &Document) -> Option<String> {
    doc.get("milestones")?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .filter(|m| !is_completed(m))
        .filter_map(|m| m.get("due").and_then(Value::as_str).and_then(parse_due))
        .min()
        .map(|date| date.format("%Y-%m").to_string())
}

fn parse_due(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(raw).map(|ts| ts.date_naive()))
}

fn is_completed(milestone: &Document) -> bool {
    if milestone.get("done").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    if milestone.get("completed_at").is_some_and(|v| !v.is_null()) {
        return true;
    }
    matches!(
        milestone
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .as_deref(),
        Some("done" | "complete" | "completed")
    )
}

/// Result of one projection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionOutcome {
    pub manifest_path: String,
    /// Index pointers written
    pub written: usize,
    /// Stale pointers removed
    pub removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl ProjectionOutcome {
    fn skipped(manifest_path: String, reason: SkipReason) -> Self {
        Self {
            manifest_path,
            written: 0,
            removed: 0,
            skipped: Some(reason),
        }
    }
}

/// What the previous projection left behind
enum Previous {
    None,
    Record(ManifestRecord),
    Unreadable,
}

pub struct Projector {
    store: Arc<dyn ObjectStore>,
    stats: Arc<PipelineStats>,
    shards: ShardSettings,
}

impl Projector {
    pub fn new(store: Arc<dyn ObjectStore>, stats: Arc<PipelineStats>, shards: ShardSettings) -> Self {
        Self {
            store,
            stats,
            shards,
        }
    }

    /// Handle a snapshot-write notification naming `object_name`
    pub async fn handle(&self, object_name: &str) -> PipelineResult<ProjectionOutcome> {
        let Some(entity) = parse_snapshot_path(object_name) else {
            debug!(object = object_name, "Not a snapshot object");
            self.stats.record_skip(SkipReason::NotApplicable);
            return Ok(ProjectionOutcome::skipped(String::new(), SkipReason::NotApplicable));
        };

        let result = self.project(&entity).await;
        match &result {
            Ok(outcome) => match outcome.skipped {
                Some(reason) => self.stats.record_skip(reason),
                None => self.stats.record_projection(outcome.written, outcome.removed),
            },
            Err(e) => {
                warn!(object = object_name, error = %e, "Projection failed; awaiting redelivery");
                self.stats.record_transient_failure();
            }
        }
        result
    }

    /// Recompute the manifest and index pointers of one entity
    pub async fn project(&self, entity: &EntityRef) -> PipelineResult<ProjectionOutcome> {
        let store = self.store.as_ref();
        let manifest_path = entity.manifest_path();
        let snapshot_path = entity.snapshot_path();

        let snapshot = match read_document(store, &snapshot_path).await {
            Ok(doc) => doc,
            Err(StoreError::Malformed(reason)) => {
                warn!(path = %snapshot_path, %reason, "Unparsable snapshot");
                return Ok(ProjectionOutcome::skipped(manifest_path, SkipReason::Malformed));
            }
            Err(e) => return Err(e.into()),
        };

        let envelope = match Envelope::from_document(&snapshot) {
            Ok(e) if e.env == entity.env && e.entity == entity.kind && e.id == entity.id => e,
            Ok(_) | Err(_) => {
                warn!(path = %snapshot_path, "Snapshot envelope is invalid or does not match its path");
                return Ok(ProjectionOutcome::skipped(manifest_path, SkipReason::Malformed));
            }
        };

        let (previous, observed) = self.previous_manifest(&manifest_path).await?;
        if let Previous::Record(prev) = &previous {
            if prev.updated_at > envelope.updated_at {
                info!(
                    id = %entity.id,
                    stored = %prev.updated_at,
                    snapshot = %envelope.updated_at,
                    "Manifest already reflects a newer snapshot"
                );
                return Ok(ProjectionOutcome::skipped(manifest_path, SkipReason::StaleProjection));
            }
        }

        let pointers = index_pointers(&envelope, &snapshot);
        let fresh: HashSet<&str> = pointers.iter().map(|p| p.path.as_str()).collect();

        let mut record = manifest_from_snapshot(&envelope, &snapshot);
        let pointer_body = record.clone();
        record.index_paths = pointers.iter().map(|p| p.path.clone()).collect();

        let preconditions = match &observed {
            Some(stat) => Preconditions::generation(stat.generation),
            None => Preconditions::does_not_exist(),
        };
        let committed = match write_json(store, &manifest_path, &record, preconditions).await {
            Ok(result) => result,
            Err(StoreError::PreconditionFailed(_)) => {
                warn!(path = %manifest_path, "Manifest changed since it was read; awaiting redelivery");
                return Ok(ProjectionOutcome::skipped(manifest_path, SkipReason::Conflict));
            }
            Err(e) => return Err(e.into()),
        };

        let mut removed = match &previous {
            Previous::None => 0,
            Previous::Record(prev) => {
                let stale: Vec<&str> = prev
                    .index_paths
                    .iter()
                    .map(String::as_str)
                    .filter(|p| !fresh.contains(p))
                    .collect();
                self.remove_owned(&stale, &pointer_body).await?
            }
            Previous::Unreadable => self.sweep_stale_pointers(entity, &fresh, &pointer_body).await?,
        };

        let mut written = 0;
        let mut conflict = false;
        for pointer in &pointers {
            if pointer.shared {
                match self.write_shared_pointer(pointer, &pointer_body).await? {
                    Some(true) => written += 1,
                    Some(false) => {}
                    None => {
                        conflict = true;
                        break;
                    }
                }
            } else {
                write_json(store, &pointer.path, &pointer_body, Preconditions::none()).await?;
                written += 1;
            }
        }

        // A projection that committed after our manifest never saw the
        // pointers written above, so drop the ones it does not list.
        if let Some(orphaned) = self
            .reconcile_superseded(&manifest_path, committed.generation, &record, &pointer_body)
            .await?
        {
            removed += orphaned;
            return Ok(ProjectionOutcome {
                manifest_path,
                written,
                removed,
                skipped: Some(SkipReason::Conflict),
            });
        }

        if !conflict && self.shards.write && !self.append_shard_line(entity, &pointer_body).await? {
            conflict = true;
        }
        if conflict {
            return Ok(ProjectionOutcome {
                manifest_path,
                written,
                removed,
                skipped: Some(SkipReason::Conflict),
            });
        }

        info!(
            id = %entity.id,
            entity = %entity.kind,
            written,
            removed,
            "Projected manifest and indices"
        );

        Ok(ProjectionOutcome {
            manifest_path,
            written,
            removed,
            skipped: None,
        })
    }

    /// The stored manifest together with the stat its write precondition
    /// is taken from
    async fn previous_manifest(&self, path: &str) -> PipelineResult<(Previous, Option<ObjectStat>)> {
        let store = self.store.as_ref();
        let Some(stat) = stat_optional(store, path).await? else {
            return Ok((Previous::None, None));
        };

        let previous = match read_document(store, path).await {
            Ok(doc) => match serde_json::from_value::<ManifestRecord>(Value::Object(doc)) {
                Ok(record) => Previous::Record(record),
                Err(e) => {
                    warn!(path, error = %e, "Previous manifest is unreadable; sweeping index families");
                    Previous::Unreadable
                }
            },
            Err(StoreError::NotFound(_)) => return Ok((Previous::None, None)),
            Err(StoreError::Malformed(reason)) => {
                warn!(path, %reason, "Previous manifest is unreadable; sweeping index families");
                Previous::Unreadable
            }
            Err(e) => return Err(e.into()),
        };
        Ok((previous, Some(stat)))
    }

    /// If the manifest moved past `generation`, remove the pointers of
    /// `record` that the newer manifest does not list. `None` when the
    /// manifest is still ours.
    async fn reconcile_superseded(
        &self,
        manifest_path: &str,
        generation: u64,
        record: &ManifestRecord,
        body: &ManifestRecord,
    ) -> PipelineResult<Option<usize>> {
        let store = self.store.as_ref();
        let current = match stat_optional(store, manifest_path).await? {
            Some(stat) if stat.generation == generation => return Ok(None),
            Some(_) => match read_document(store, manifest_path).await {
                Ok(doc) => serde_json::from_value::<ManifestRecord>(Value::Object(doc))
                    .map(|m| m.index_paths)
                    .unwrap_or_default(),
                Err(StoreError::NotFound(_)) | Err(StoreError::Malformed(_)) => Vec::new(),
                Err(e) => return Err(e.into()),
            },
            None => Vec::new(),
        };

        warn!(path = manifest_path, "Manifest superseded during projection; reconciling pointers");
        let orphaned: Vec<&str> = record
            .index_paths
            .iter()
            .map(String::as_str)
            .filter(|p| !current.iter().any(|c| c == p))
            .collect();
        Ok(Some(self.remove_owned(&orphaned, body).await?))
    }

    /// List every index family of the entity's kind and remove pointers owned
    /// by this id that are not in `fresh`
    pub async fn sweep_stale_pointers(
        &self,
        entity: &EntityRef,
        fresh: &HashSet<&str>,
        body: &ManifestRecord,
    ) -> PipelineResult<usize> {
        let suffix = format!("/{}.json", entity.id);
        let mut candidates = Vec::new();

        for fam in index_families(entity.kind) {
            let prefix = index_family_prefix(entity.env, entity.kind, fam.attribute);
            for name in self.store.list(&prefix).await? {
                if fresh.contains(name.as_str()) {
                    continue;
                }
                if fam.shared || name.ends_with(&suffix) {
                    candidates.push(name);
                }
            }
        }

        let candidates: Vec<&str> = candidates.iter().map(String::as_str).collect();
        self.remove_owned(&candidates, body).await
    }

    /// Delete each path whose stored pointer still names `body.id` and is
    /// not newer than `body`
    async fn remove_owned(&self, paths: &[&str], body: &ManifestRecord) -> PipelineResult<usize> {
        let store = self.store.as_ref();
        let id = body.id.as_str();
        let suffix = format!("/{}.json", id);
        let mut removed = 0;

        for path in paths {
            let Some(stat) = stat_optional(store, path).await? else {
                continue;
            };

            let owned = match read_document(store, path).await {
                Ok(doc) => {
                    let newer = doc
                        .get("updated_at")
                        .and_then(Value::as_str)
                        .and_then(parse_timestamp)
                        .map_or(false, |at| at > body.updated_at);
                    doc.get("id").and_then(Value::as_str) == Some(id) && !newer
                }
                Err(StoreError::NotFound(_)) => continue,
                Err(StoreError::Malformed(_)) => path.ends_with(&suffix),
                Err(e) => return Err(e.into()),
            };
            if !owned {
                debug!(path, id, "Pointer now belongs to another id or a newer version; leaving it");
                continue;
            }

            match store.delete(path, Preconditions::generation(stat.generation)).await {
                Ok(()) => {
                    debug!(path, "Removed stale index pointer");
                    removed += 1;
                }
                Err(StoreError::PreconditionFailed(_)) => {
                    debug!(path, "Pointer rewritten concurrently; leaving it");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(removed)
    }

    /// Write a shared pointer unless a newer record of another id holds it.
    ///
    /// `Some(true)` written, `Some(false)` held by a newer id, `None` lost race.
    async fn write_shared_pointer(
        &self,
        pointer: &IndexPointer,
        body: &ManifestRecord,
    ) -> PipelineResult<Option<bool>> {
        let store = self.store.as_ref();
        let stat = stat_optional(store, &pointer.path).await?;

        let preconditions = match &stat {
            Some(stat) => {
                let holder = match read_document(store, &pointer.path).await {
                    Ok(doc) => serde_json::from_value::<ManifestRecord>(Value::Object(doc)).ok(),
                    Err(StoreError::NotFound(_)) | Err(StoreError::Malformed(_)) => None,
                    Err(e) => return Err(e.into()),
                };
                if let Some(holder) = holder {
                    if holder.id != body.id && holder.updated_at > body.updated_at {
                        debug!(
                            path = %pointer.path,
                            holder = %holder.id,
                            "Shared pointer held by a newer record"
                        );
                        return Ok(Some(false));
                    }
                }
                Preconditions::generation(stat.generation)
            }
            None => Preconditions::does_not_exist(),
        };

        match write_json(store, &pointer.path, body, preconditions).await {
            Ok(_) => Ok(Some(true)),
            Err(StoreError::PreconditionFailed(_)) => {
                warn!(path = %pointer.path, "Shared pointer write lost a concurrent race");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Append one NDJSON line to the id's shard unless its last line for
    /// this id already carries the same `updated_at`. `false` on a lost race.
    async fn append_shard_line(&self, entity: &EntityRef, record: &ManifestRecord) -> PipelineResult<bool> {
        let store = self.store.as_ref();
        let path = shard_path(entity.env, entity.kind, &shard_key(&entity.id, self.shards.count));

        let (mut body, preconditions) = match stat_optional(store, &path).await? {
            Some(stat) => match store.read(&path).await {
                Ok(bytes) => (bytes, Preconditions::generation(stat.generation)),
                Err(StoreError::NotFound(_)) => return Ok(false),
                Err(e) => return Err(e.into()),
            },
            None => (Vec::new(), Preconditions::does_not_exist()),
        };

        if last_shard_line_matches(&body, record) {
            debug!(path = %path, id = %record.id, "Shard already holds this version");
            return Ok(true);
        }

        if !body.is_empty() && !body.ends_with(b"\n") {
            body.push(b'\n');
        }
        serde_json::to_writer(&mut body, record).map_err(StoreError::from)?;
        body.push(b'\n');

        match store.write(&path, body, preconditions).await {
            Ok(_) => Ok(true),
            Err(StoreError::PreconditionFailed(_)) => {
                warn!(path = %path, "Shard append lost a concurrent race");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn last_shard_line_matches(body: &[u8], record: &ManifestRecord) -> bool {
    body.split(|&b| b == b'\n')
        .rev()
        .filter_map(|line| serde_json::from_slice::<Value>(line).ok())
        .find(|v| v.get("id").and_then(Value::as_str) == Some(record.id.as_str()))
        .and_then(|v| v.get("updated_at").and_then(Value::as_str).and_then(parse_timestamp))
        .map_or(false, |at| at == record.updated_at)
}
