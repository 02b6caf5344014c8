//! Rules Engine
//!
//! Loads the rule definitions of an environment, evaluates them against a
//! freshly written snapshot and emits an alert record per passing rule.
//! Each snapshot is also forwarded to the search feed.
//!
//! Alerts are write-once at a path keyed by rule, entity and the snapshot's
//! `updated_at`, so a redelivered notification cannot duplicate an alert.

mod evaluate;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::feed::SearchFeed;
use crate::paths::{alert_path, is_path_segment, parse_snapshot_path, rules_prefix, EntityRef};
use crate::pipeline::{manifest_from_snapshot, PipelineResult, PipelineStats, SkipReason};
use crate::storage::{read_document, write_json, ObjectStore, Preconditions, StoreError, StoreResult};
use crate::types::{Document, Envelope, Environment, RuleDefinition};

pub use evaluate::{build_alert, condition_holds, evaluate};

/// Result of running the rule set against one snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertOutcome {
    pub evaluated: usize,
    /// Paths of alerts written by this invocation
    pub emitted: Vec<String>,
    /// Alerts already present from an earlier delivery
    pub duplicates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl AlertOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

pub struct RulesEngine {
    store: Arc<dyn ObjectStore>,
    stats: Arc<PipelineStats>,
    feed: Arc<dyn SearchFeed>,
}

impl RulesEngine {
    pub fn new(store: Arc<dyn ObjectStore>, stats: Arc<PipelineStats>, feed: Arc<dyn SearchFeed>) -> Self {
        Self { store, stats, feed }
    }

    /// Rule definitions of `env`; unreadable definitions and ids that do not
    /// fit in one alert path segment are skipped
    pub async fn load_rules(&self, env: Environment) -> StoreResult<Vec<RuleDefinition>> {
        let mut rules = Vec::new();

        for name in self.store.list(&rules_prefix(env)).await? {
            if !name.ends_with(".json") {
                continue;
            }
            let doc = match read_document(self.store.as_ref(), &name).await {
                Ok(doc) => doc,
                Err(StoreError::NotFound(_)) => continue,
                Err(StoreError::Malformed(reason)) => {
                    warn!(path = %name, %reason, "Skipping unreadable rule");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match serde_json::from_value::<RuleDefinition>(Value::Object(doc)) {
                Ok(rule) if !is_path_segment(&rule.id) => {
                    warn!(path = %name, id = %rule.id, "Skipping rule whose id is not a single path segment");
                }
                Ok(rule) => rules.push(rule),
                Err(e) => warn!(path = %name, error = %e, "Skipping invalid rule definition"),
            }
        }

        Ok(rules)
    }

    /// Handle a snapshot-write notification naming `object_name`
    pub async fn handle(&self, object_name: &str) -> PipelineResult<AlertOutcome> {
        let Some(entity) = parse_snapshot_path(object_name) else {
            self.stats.record_skip(SkipReason::NotApplicable);
            return Ok(AlertOutcome::skipped(SkipReason::NotApplicable));
        };

        let result = self.run(&entity).await;
        match &result {
            Ok(outcome) => match outcome.skipped {
                Some(reason) => self.stats.record_skip(reason),
                None => self.stats.record_alerts(outcome.emitted.len()),
            },
            Err(e) => {
                warn!(object = object_name, error = %e, "Rule evaluation failed; awaiting redelivery");
                self.stats.record_transient_failure();
            }
        }
        result
    }

    async fn run(&self, entity: &EntityRef) -> PipelineResult<AlertOutcome> {
        let snapshot_path = entity.snapshot_path();
        let snapshot = match read_document(self.store.as_ref(), &snapshot_path).await {
            Ok(doc) => doc,
            Err(StoreError::Malformed(reason)) => {
                warn!(path = %snapshot_path, %reason, "Unparsable snapshot");
                return Ok(AlertOutcome::skipped(SkipReason::Malformed));
            }
            Err(e) => return Err(e.into()),
        };

        let envelope = match Envelope::from_document(&snapshot) {
            Ok(e) if e.env == entity.env && e.entity == entity.kind && e.id == entity.id => e,
            _ => return Ok(AlertOutcome::skipped(SkipReason::Malformed)),
        };

        self.feed.publish(&manifest_from_snapshot(&envelope, &snapshot));

        let rules = self.load_rules(envelope.env).await?;
        self.emit(&rules, &envelope, &snapshot).await
    }

    /// Evaluate `rules` against one snapshot and write an alert per pass
    pub async fn emit(
        &self,
        rules: &[RuleDefinition],
        envelope: &Envelope,
        snapshot: &Document,
    ) -> PipelineResult<AlertOutcome> {
        let mut outcome = AlertOutcome::default();

        for rule in rules.iter().filter(|r| r.target == envelope.entity) {
            if !is_path_segment(&rule.id) {
                warn!(rule = %rule.id, "Rule id is not a single path segment; skipping");
                continue;
            }
            outcome.evaluated += 1;
            let evaluation = evaluate(rule, snapshot, envelope.entity);
            if !evaluation.passed {
                debug!(rule = %rule.id, id = %envelope.id, failed = evaluation.failed.len(), "Rule did not pass");
                continue;
            }

            let alert = build_alert(rule, envelope, &evaluation, Utc::now());
            let path = alert_path(envelope.env, &rule.id, envelope.entity, &envelope.id, &envelope.updated_at);

            match write_json(self.store.as_ref(), &path, &alert, Preconditions::does_not_exist()).await {
                Ok(_) => {
                    info!(rule = %rule.id, id = %envelope.id, severity = ?alert.severity, "Alert emitted");
                    outcome.emitted.push(path);
                }
                Err(StoreError::PreconditionFailed(_)) => {
                    debug!(path = %path, "Alert already emitted");
                    outcome.duplicates += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::feed::NoopFeed;
    use crate::storage::{LocalStore, MemoryStore};
    use tempfile::TempDir;

    async fn seed(store: &dyn ObjectStore) {
        let rule = json!({
            "id": "low-mrr",
            "target": "venture",
            "conditions": [
                {"path": "kpis.MRR", "op": "<", "value": 10000},
                {"path": "status", "op": "==", "value": "Pilot"}
            ]
        });
        write_json(store, "env/prod/rules/low-mrr.json", &rule, Preconditions::none())
            .await
            .unwrap();
        store
            .write("env/prod/rules/broken.json", b"{".to_vec(), Preconditions::none())
            .await
            .unwrap();
        for (file, id) in [("escape.json", "../snapshots/ventures/x"), ("nested.json", "a/b"), ("empty.json", "")] {
            let mut bad = rule.clone();
            bad["id"] = json!(id);
            write_json(store, &format!("env/prod/rules/{}", file), &bad, Preconditions::none())
                .await
                .unwrap();
        }

        let snapshot = json!({
            "id": "v-1", "entity": "venture", "env": "prod", "schema_version": "1",
            "created_at": "2026-01-01T00:00:00Z", "updated_at": "2026-01-02T03:04:05Z",
            "status": "Pilot", "kpis": {"MRR": 8000}
        });
        write_json(store, "env/prod/snapshots/ventures/v-1.json", &snapshot, Preconditions::none())
            .await
            .unwrap();
    }

    fn engine(store: Arc<MemoryStore>) -> RulesEngine {
        RulesEngine::new(store, Arc::new(PipelineStats::new()), Arc::new(NoopFeed))
    }

    #[tokio::test]
    async fn test_malformed_rules_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        seed(store.as_ref()).await;
        let rules = engine(store).load_rules(Environment::Prod).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "low-mrr");
    }

    #[tokio::test]
    async fn test_unsafe_rule_ids_do_not_block_alerts_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::open(dir.path()).unwrap());
        seed(store.as_ref()).await;

        let engine = RulesEngine::new(store, Arc::new(PipelineStats::new()), Arc::new(NoopFeed));
        let outcome = engine.handle("env/prod/snapshots/ventures/v-1.json").await.unwrap();
        assert_eq!(outcome.evaluated, 1);
        assert_eq!(outcome.emitted.len(), 1);
    }

    #[tokio::test]
    async fn test_alert_emitted_once_per_snapshot_version() {
        let store = Arc::new(MemoryStore::new());
        seed(store.as_ref()).await;
        let engine = engine(store.clone());

        let first = engine.handle("env/prod/snapshots/ventures/v-1.json").await.unwrap();
        assert_eq!(
            first.emitted,
            vec!["env/prod/alerts/low-mrr/ventures/v-1/20260102T030405000Z.json"]
        );

        let again = engine.handle("env/prod/snapshots/ventures/v-1.json").await.unwrap();
        assert!(again.emitted.is_empty());
        assert_eq!(again.duplicates, 1);

        let alert = read_document(store.as_ref(), &first.emitted[0]).await.unwrap();
        assert_eq!(alert["ptr"], "env/prod/snapshots/ventures/v-1.json");
        assert_eq!(alert["severity"], "info");
    }

    #[tokio::test]
    async fn test_non_snapshot_objects_are_not_applicable() {
        let outcome = engine(Arc::new(MemoryStore::new()))
            .handle("env/prod/rules/low-mrr.json")
            .await
            .unwrap();
        assert_eq!(outcome.skipped, Some(SkipReason::NotApplicable));
    }
}
