//! Event-Sourced Materialization Engine
//!
//! An append-only history log of entity mutations, folded into snapshots,
//! projected into listing manifests and secondary indices, and fanned out to
//! rules/alerts and a search feed. All coordination goes through object store
//! generation/metageneration preconditions; no component holds a lock across
//! a request.
//!
//! # Modules
//!
//! - `storage`: object store adapter (local filesystem, in-memory, Cloud Storage)
//! - `ids`: monotonic, lexicographically sortable event identifiers
//! - `paths`: canonical path scheme for every stored object
//! - `history`: append-only history writer
//! - `pipeline`: snapshot builder, migration, manifest & index projector
//! - `rules`: rule evaluation and alert emission
//! - `access`: role-based access decisions
//! - `reader`: manifest listings from shards or per-id objects
//! - `validation`: JSON Schema validation boundary
//! - `api`: HTTP handlers for push notifications and the entity API
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use materializer::{create_router, AppState, EngineConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = EngineConfig::from_env()?;
//! let state = Arc::new(AppState::from_config(&config)?);
//! let listener = tokio::net::TcpListener::bind(config.bind).await?;
//! axum::serve(listener, create_router(state)).await?;
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod api;
pub mod config;
pub mod feed;
pub mod history;
pub mod ids;
pub mod notification;
pub mod paths;
pub mod pipeline;
pub mod reader;
pub mod rules;
pub mod storage;
pub mod types;
pub mod validation;

// Re-export commonly used items at crate root
pub use access::{enforce_rbac, AccessDecision, DenyReason, Role};
pub use api::{create_router, AppState};
pub use config::{ConfigError, EngineConfig};
pub use history::{HistoryError, HistoryRecord, HistoryWriter};
pub use ids::UlidGenerator;
pub use paths::EntityRef;
pub use pipeline::{
    PipelineError, PipelineStats, ProjectionOutcome, Projector, SkipReason, SnapshotBuilder,
    SnapshotOutcome,
};
pub use reader::{list_manifests, ListOptions, Listing};
pub use rules::{AlertOutcome, RulesEngine};
pub use storage::{LocalStore, MemoryStore, ObjectStore, Preconditions, StoreError};
pub use types::{Document, EntityKind, Envelope, Environment, ManifestRecord, RuleDefinition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
