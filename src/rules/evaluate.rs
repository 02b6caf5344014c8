//! Pure rule evaluation

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::paths::snapshot_path;
use crate::types::{
    resolve_path, AlertRecord, Condition, Document, EntityKind, Envelope, Operator,
    RuleDefinition, RuleEvaluation,
};

/// Evaluate every condition of `rule` against a snapshot of kind `kind`.
///
/// The rule passes only when the kind matches and no condition failed.
pub fn evaluate(rule: &RuleDefinition, doc: &Document, kind: EntityKind) -> RuleEvaluation {
    let (matched, failed): (Vec<Condition>, Vec<Condition>) = rule
        .conditions
        .iter()
        .cloned()
        .partition(|condition| condition_holds(condition, doc));

    let kind_matched = rule.target == kind;

    RuleEvaluation {
        rule_id: rule.id.clone(),
        passed: kind_matched && failed.is_empty(),
        kind_matched,
        matched,
        failed,
    }
}

/// Alert for a passed evaluation; points at the snapshot instead of copying it
pub fn build_alert(
    rule: &RuleDefinition,
    envelope: &Envelope,
    evaluation: &RuleEvaluation,
    now: DateTime<Utc>,
) -> AlertRecord {
    AlertRecord {
        rule_id: rule.id.clone(),
        rule_version: rule.version,
        entity: envelope.entity,
        entity_id: envelope.id.clone(),
        env: envelope.env,
        ptr: snapshot_path(envelope.env, envelope.entity, &envelope.id),
        matched: evaluation.matched.clone(),
        failed: evaluation.failed.clone(),
        severity: rule.severity(),
        channel: rule.action.channel.clone(),
        snapshot_updated_at: envelope.updated_at,
        created_at: now,
    }
}

/// `null` counts as undefined
pub fn condition_holds(condition: &Condition, doc: &Document) -> bool {
    let actual = resolve_path(doc, &condition.path).filter(|v| !v.is_null());
    let expected = condition.value.as_ref();

    match condition.op {
        Operator::Exists => actual.is_some(),
        Operator::Missing => actual.is_none(),
        Operator::Eq => match (actual, expected) {
            (Some(a), Some(e)) => loosely_equal(a, e),
            _ => false,
        },
        Operator::Neq => match (actual, expected) {
            (Some(a), Some(e)) => !loosely_equal(a, e),
            (None, _) => true,
            (Some(_), None) => false,
        },
        Operator::Lt => ordered(actual, expected, |o| o == Ordering::Less),
        Operator::Lte => ordered(actual, expected, |o| o != Ordering::Greater),
        Operator::Gt => ordered(actual, expected, |o| o == Ordering::Greater),
        Operator::Gte => ordered(actual, expected, |o| o != Ordering::Less),
        Operator::Contains => match (actual, expected) {
            (Some(a), Some(e)) => contains(a, e).unwrap_or(false),
            _ => false,
        },
        Operator::NotContains => match (actual, expected) {
            (None, _) => true,
            (Some(a), Some(e)) => contains(a, e).map(|c| !c).unwrap_or(false),
            (Some(_), None) => false,
        },
    }
}

fn ordered(actual: Option<&Value>, expected: Option<&Value>, accept: impl Fn(Ordering) -> bool) -> bool {
    match (actual, expected) {
        (Some(a), Some(e)) => compare(a, e).is_some_and(accept),
        _ => false,
    }
}

/// Numbers numerically, strings lexically, anything else is incomparable
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Substring for strings, membership for arrays; `None` on a type mismatch
fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => Some(h.contains(n.as_str())),
        (Value::Array(items), n) => Some(items.iter().any(|item| loosely_equal(item, n))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn cond(path: &str, op: Operator, value: Value) -> Condition {
        Condition::new(path, op, Some(value))
    }

    fn low_mrr_pilot() -> RuleDefinition {
        serde_json::from_value(json!({
            "id": "low-mrr-pilot",
            "version": 2,
            "target": "venture",
            "conditions": [
                {"path": "kpis.MRR", "op": "lt", "value": 10000},
                {"path": "status", "op": "eq", "value": "Pilot"}
            ],
            "action": {"channel": "ops", "severity": "warning"}
        }))
        .unwrap()
    }

    fn snapshot(mrr: i64) -> Document {
        doc(json!({
            "id": "v-1",
            "entity": "venture",
            "env": "prod",
            "schema_version": "1",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-02T00:00:00Z",
            "status": "Pilot",
            "kpis": {"MRR": mrr},
            "tags": ["b2b", "saas"]
        }))
    }

    #[test]
    fn test_passing_rule_builds_alert_with_pointer() {
        let rule = low_mrr_pilot();
        let snap = snapshot(8000);
        let evaluation = evaluate(&rule, &snap, EntityKind::Venture);

        assert!(evaluation.passed);
        assert_eq!(evaluation.matched.len(), 2);
        assert!(evaluation.failed.is_empty());

        let envelope = Envelope::from_document(&snap).unwrap();
        let alert = build_alert(&rule, &envelope, &evaluation, Utc::now());
        assert_eq!(alert.ptr, "env/prod/snapshots/ventures/v-1.json");
        assert_eq!(alert.rule_version, 2);
        assert_eq!(alert.severity, crate::types::Severity::Warning);
    }

    #[test]
    fn test_failed_condition_is_reported() {
        let evaluation = evaluate(&low_mrr_pilot(), &snapshot(12000), EntityKind::Venture);
        assert!(!evaluation.passed);
        assert_eq!(evaluation.failed.len(), 1);
        assert_eq!(evaluation.failed[0].path, "kpis.MRR");
    }

    #[test]
    fn test_kind_mismatch_never_passes() {
        let evaluation = evaluate(&low_mrr_pilot(), &snapshot(8000), EntityKind::Idea);
        assert!(!evaluation.passed);
        assert!(!evaluation.kind_matched);
        assert!(evaluation.failed.is_empty());
    }

    #[test]
    fn test_undefined_fields() {
        let d = snapshot(1);
        assert!(!condition_holds(&cond("kpis.ARR.value", Operator::Eq, json!(1)), &d));
        assert!(!condition_holds(&cond("kpis.ARR", Operator::Lt, json!(1)), &d));
        assert!(condition_holds(&cond("kpis.ARR", Operator::Neq, json!(1)), &d));
        assert!(condition_holds(&cond("owner", Operator::NotContains, json!("x")), &d));
        assert!(condition_holds(&Condition::new("owner", Operator::Missing, None), &d));
        assert!(!condition_holds(&Condition::new("owner", Operator::Exists, None), &d));
    }

    #[test]
    fn test_type_mismatch_fails() {
        let d = snapshot(8000);
        assert!(!condition_holds(&cond("kpis.MRR", Operator::Lt, json!("9000")), &d));
        assert!(!condition_holds(&cond("status", Operator::Gt, json!(3)), &d));
        assert!(!condition_holds(&cond("kpis.MRR", Operator::NotContains, json!("8")), &d));
    }

    #[test]
    fn test_contains_on_strings_and_arrays() {
        let d = snapshot(8000);
        assert!(condition_holds(&cond("status", Operator::Contains, json!("Pil")), &d));
        assert!(condition_holds(&cond("tags", Operator::Contains, json!("saas")), &d));
        assert!(condition_holds(&cond("tags", Operator::NotContains, json!("b2c")), &d));
        assert!(condition_holds(&cond("kpis.MRR", Operator::Gte, json!(8000.0)), &d));
        assert!(condition_holds(&cond("status", Operator::Lte, json!("Pilot")), &d));
    }
}
