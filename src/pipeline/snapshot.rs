//! Snapshot Builder
//!
//! Folds one history event into the entity's snapshot:
//!
//! 1. parse the notification path (anything else is not applicable)
//! 2. read the event body as the candidate snapshot
//! 3. migrate and compact the candidate
//! 4. stat and read the current snapshot, if any
//! 5. skip when the current `updated_at` is not older than the candidate's
//! 6. compare-and-swap write against the observed generation/metageneration
//!
//! A lost compare-and-swap is reported as [`SkipReason::Conflict`]; the
//! notification is redelivered and step 4 then sees the winner's state.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::migration::migrate;
use super::stats::PipelineStats;
use super::{PipelineError, PipelineResult, SkipReason, SnapshotOutcome};
use crate::paths::{parse_history_path, EntityRef};
use crate::storage::{
    read_document, stat_optional, write_json, ObjectStore, Preconditions, StoreError,
};
use crate::types::{Document, Envelope};

pub struct SnapshotBuilder {
    store: Arc<dyn ObjectStore>,
    stats: Arc<PipelineStats>,
}

impl SnapshotBuilder {
    pub fn new(store: Arc<dyn ObjectStore>, stats: Arc<PipelineStats>) -> Self {
        Self { store, stats }
    }

    /// Handle a history-write notification naming `object_name`
    pub async fn handle(&self, object_name: &str) -> PipelineResult<SnapshotOutcome> {
        let result = self.build(object_name).await;

        match &result {
            Ok(SnapshotOutcome::Written(_)) => self.stats.record_snapshot_written(),
            Ok(SnapshotOutcome::Skipped(reason)) => self.stats.record_skip(*reason),
            Err(e) => {
                warn!(object = object_name, error = %e, "Snapshot build failed; awaiting redelivery");
                self.stats.record_transient_failure();
            }
        }

        result
    }

    async fn build(&self, object_name: &str) -> PipelineResult<SnapshotOutcome> {
        let Some(entity) = parse_history_path(object_name) else {
            debug!(object = object_name, "Not a history object");
            return Ok(SnapshotOutcome::Skipped(SkipReason::NotApplicable));
        };

        let mut candidate = match read_document(self.store.as_ref(), object_name).await {
            Ok(doc) => doc,
            Err(StoreError::Malformed(reason)) => {
                warn!(object = object_name, %reason, "Unparsable history event");
                return Ok(SnapshotOutcome::Skipped(SkipReason::Malformed));
            }
            Err(e) => return Err(e.into()),
        };

        let envelope = match Envelope::from_document(&candidate) {
            Ok(envelope) if matches_path(&envelope, &entity) => envelope,
            Ok(envelope) => {
                warn!(
                    object = object_name,
                    id = %envelope.id,
                    entity = %envelope.entity,
                    env = %envelope.env,
                    "History event envelope does not match its path"
                );
                return Ok(SnapshotOutcome::Skipped(SkipReason::Malformed));
            }
            Err(e) => {
                warn!(object = object_name, error = %e, "History event has an invalid envelope");
                return Ok(SnapshotOutcome::Skipped(SkipReason::Malformed));
            }
        };

        let report = migrate(envelope.entity, &mut candidate);
        if !report.is_noop() {
            debug!(
                id = %envelope.id,
                fields_added = ?report.fields_added,
                items_merged = report.items_merged,
                "Migrated candidate snapshot"
            );
        }

        let snapshot_path = entity.snapshot_path();
        let current = stat_optional(self.store.as_ref(), &snapshot_path).await?;

        let preconditions = match &current {
            Some(stat) => {
                let body = match read_document(self.store.as_ref(), &snapshot_path).await {
                    Ok(doc) => Some(doc),
                    Err(StoreError::NotFound(_)) => {
                        return Err(PipelineError::Vanished(snapshot_path));
                    }
                    Err(StoreError::Malformed(reason)) => {
                        warn!(path = %snapshot_path, %reason, "Current snapshot is unreadable; replacing it");
                        None
                    }
                    Err(e) => return Err(e.into()),
                };

                if let Some(current_updated_at) = body.as_ref().and_then(updated_at) {
                    if current_updated_at >= envelope.updated_at {
                        info!(
                            id = %envelope.id,
                            current = %current_updated_at,
                            candidate = %envelope.updated_at,
                            "Skipping stale update"
                        );
                        return Ok(SnapshotOutcome::Skipped(SkipReason::StaleUpdate));
                    }
                }

                Preconditions::matches(stat)
            }
            None => Preconditions::does_not_exist(),
        };

        match write_json(self.store.as_ref(), &snapshot_path, &candidate, preconditions).await {
            Ok(result) => {
                info!(
                    path = %snapshot_path,
                    generation = result.generation,
                    metageneration = result.metageneration,
                    "Snapshot written"
                );
                Ok(SnapshotOutcome::Written(result))
            }
            Err(StoreError::PreconditionFailed(_)) => {
                warn!(path = %snapshot_path, id = %envelope.id, "Snapshot write lost a concurrent race");
                Ok(SnapshotOutcome::Skipped(SkipReason::Conflict))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn matches_path(envelope: &Envelope, entity: &EntityRef) -> bool {
    envelope.env == entity.env && envelope.entity == entity.kind && envelope.id == entity.id
}

/// `updated_at` of a stored snapshot; `None` when absent or unparsable
fn updated_at(doc: &Document) -> Option<chrono::DateTime<chrono::Utc>> {
    Envelope::from_document(doc).ok().map(|e| e.updated_at)
}
