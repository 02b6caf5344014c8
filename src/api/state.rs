//! Shared application state

use std::sync::Arc;

use crate::config::{ConfigError, EngineConfig};
use crate::feed::SearchFeed;
use crate::history::HistoryWriter;
use crate::ids::UlidGenerator;
use crate::pipeline::{PipelineStats, Projector, ShardSettings, SnapshotBuilder};
use crate::rules::RulesEngine;
use crate::storage::ObjectStore;
use crate::validation::SchemaValidator;

/// Every pipeline stage wired to one store
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub history: HistoryWriter,
    pub snapshots: SnapshotBuilder,
    pub projector: Projector,
    pub rules: RulesEngine,
    pub stats: Arc<PipelineStats>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        validator: Arc<dyn SchemaValidator>,
        feed: Arc<dyn SearchFeed>,
        shards: ShardSettings,
    ) -> Self {
        let stats = Arc::new(PipelineStats::new());
        // One generator per process keeps ids monotonic across requests
        let ids = Arc::new(UlidGenerator::new());

        Self {
            history: HistoryWriter::new(store.clone(), ids, validator),
            snapshots: SnapshotBuilder::new(store.clone(), stats.clone()),
            projector: Projector::new(store.clone(), stats.clone(), shards),
            rules: RulesEngine::new(store.clone(), stats.clone(), feed),
            store,
            stats,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.build_store()?,
            Arc::new(config.build_validator()?),
            config.build_feed()?,
            config.shards,
        ))
    }
}
