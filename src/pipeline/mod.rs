//! Materialization pipeline
//!
//! ```text
//! history write ──► SnapshotBuilder ──► snapshot write ──► Projector ──► manifests + indices
//!   (notification)     (CAS on                 (notification)      └──► shard lines
//!                       metageneration)                    └──► rules engine + search feed
//! ```
//!
//! Every stage is stateless and idempotent. Concurrency safety comes from
//! object store preconditions; a lost race is reported as a conflict and
//! recovered by redelivery, never by an in-process retry.

mod migration;
mod projector;
mod snapshot;
mod stats;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::storage::{StoreError, WriteResult};

pub use migration::{migrate, MigrationReport};
pub use projector::{
    index_families, index_pointers, manifest_from_snapshot, IndexFamily, ProjectionOutcome,
    Projector, ShardSettings, DEFAULT_SHARD_COUNT,
};
pub use snapshot::SnapshotBuilder;
pub use stats::{PipelineStats, StatsSnapshot};

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures that should be redelivered
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient store failure: {0}")]
    Transient(#[from] StoreError),

    /// `stat` succeeded but the object was gone by the time it was read
    #[error("object disappeared between stat and read: {0}")]
    Vanished(String),
}

/// Why a stage did not write anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The notification names an object this stage does not handle
    NotApplicable,
    /// The candidate is not newer than the current snapshot
    StaleUpdate,
    /// A compare-and-swap write lost to a concurrent writer
    Conflict,
    /// The triggering object could not be parsed as an entity record
    Malformed,
    /// The stored manifest was produced from a newer snapshot
    StaleProjection,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotApplicable => "not_applicable",
            SkipReason::StaleUpdate => "stale_update",
            SkipReason::Conflict => "conflict",
            SkipReason::Malformed => "malformed",
            SkipReason::StaleProjection => "stale_projection",
        }
    }
}

/// Result of one snapshot-builder invocation.
///
/// Serializes as `{"skipped": true, "reason": ...}` or
/// `{"skipped": false, "result": {"generation": .., "metageneration": ..}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Written(WriteResult),
    Skipped(SkipReason),
}

impl SnapshotOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, SnapshotOutcome::Skipped(SkipReason::Conflict))
    }
}

impl Serialize for SnapshotOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            SnapshotOutcome::Written(result) => {
                map.serialize_entry("skipped", &false)?;
                map.serialize_entry("result", result)?;
            }
            SnapshotOutcome::Skipped(reason) => {
                map.serialize_entry("skipped", &true)?;
                map.serialize_entry("reason", reason)?;
            }
        }
        map.end()
    }
}
