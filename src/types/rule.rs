//! Rule definitions and the alert records they produce

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entity::{EntityKind, Environment};

/// Comparison operators available to rule conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[serde(alias = "==", alias = "equals")]
    Eq,
    #[serde(alias = "!=", alias = "not_equals")]
    Neq,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    Contains,
    NotContains,
    Exists,
    Missing,
}

/// One field-path condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-separated path into the snapshot
    #[serde(alias = "field")]
    pub path: String,
    pub op: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Condition {
    pub fn new(path: impl Into<String>, op: Operator, value: Option<Value>) -> Self {
        Self {
            path: path.into(),
            op,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertAction {
    #[serde(default)]
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// A named, versioned rule over one entity kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    #[serde(default = "default_rule_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Entity kind the rule applies to
    #[serde(alias = "entity")]
    pub target: EntityKind,
    /// All conditions must hold
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub action: AlertAction,
}

fn default_rule_version() -> u32 {
    1
}

impl RuleDefinition {
    pub fn severity(&self) -> Severity {
        self.action.severity.unwrap_or_default()
    }
}

/// Outcome of evaluating one rule against one snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleEvaluation {
    pub rule_id: String,
    pub passed: bool,
    pub kind_matched: bool,
    pub matched: Vec<Condition>,
    pub failed: Vec<Condition>,
}

/// Alert emitted when a rule passes; references the snapshot by pointer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub rule_id: String,
    pub rule_version: u32,
    pub entity: EntityKind,
    pub entity_id: String,
    pub env: Environment,
    pub ptr: String,
    pub matched: Vec<Condition>,
    pub failed: Vec<Condition>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    pub snapshot_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
