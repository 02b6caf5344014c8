//! Minor-additive schema migration and entity compaction
//!
//! Migration only inserts defaults for optional fields introduced after a
//! record was first written; it never removes or renames a field.
//! Compaction merges duplicate line items that share a natural key.

use serde_json::{json, Number, Value};

use crate::types::{Document, EntityKind};

/// What [`migrate`] changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub fields_added: Vec<String>,
    pub items_merged: usize,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.fields_added.is_empty() && self.items_merged == 0
    }
}

struct LineItems {
    field: &'static str,
    key: &'static [&'static str],
    quantity: &'static str,
}

fn defaults(kind: EntityKind) -> Vec<(&'static str, Value)> {
    match kind {
        EntityKind::Venture => vec![
            ("milestones", json!([])),
            ("kpis", json!({})),
            ("tags", json!([])),
        ],
        EntityKind::Round => vec![("investors", json!([]))],
        EntityKind::CapTable => vec![("entries", json!([]))],
        EntityKind::Playbook => vec![("steps", json!([]))],
        EntityKind::Idea => vec![("tags", json!([]))],
        EntityKind::Person | EntityKind::Experiment => Vec::new(),
    }
}

fn line_items(kind: EntityKind) -> Option<LineItems> {
    match kind {
        EntityKind::CapTable => Some(LineItems {
            field: "entries",
            key: &["holder", "class"],
            quantity: "shares",
        }),
        EntityKind::Round => Some(LineItems {
            field: "investors",
            key: &["name"],
            quantity: "amount",
        }),
        _ => None,
    }
}

/// Apply additive defaults then compaction to a candidate snapshot
pub fn migrate(kind: EntityKind, doc: &mut Document) -> MigrationReport {
    let mut report = MigrationReport::default();

    for (field, default) in defaults(kind) {
        if !doc.contains_key(field) {
            doc.insert(field.to_string(), default);
            report.fields_added.push(field.to_string());
        }
    }

    if let Some(layout) = line_items(kind) {
        if let Some(Value::Array(items)) = doc.get_mut(layout.field) {
            report.items_merged = compact(items, &layout);
        }
    }

    report
}

/// Merge items with equal natural keys, summing quantities into the first
/// occurrence. Items missing a key field are left untouched.
fn compact(items: &mut Vec<Value>, layout: &LineItems) -> usize {
    let mut merged: Vec<Value> = Vec::with_capacity(items.len());
    let mut keys: Vec<Option<Vec<String>>> = Vec::with_capacity(items.len());
    let mut count = 0;

    for item in items.drain(..) {
        let key = natural_key(&item, layout.key);
        let existing = key
            .as_ref()
            .and_then(|k| keys.iter().position(|other| other.as_ref() == Some(k)));

        match existing {
            Some(idx) => {
                let add = item.get(layout.quantity).cloned().unwrap_or(json!(0));
                if let Some(target) = merged[idx].as_object_mut() {
                    let current = target.get(layout.quantity).cloned().unwrap_or(json!(0));
                    target.insert(layout.quantity.to_string(), sum(&current, &add));
                }
                count += 1;
            }
            None => {
                merged.push(item);
                keys.push(key);
            }
        }
    }

    *items = merged;
    count
}

fn natural_key(item: &Value, fields: &[&str]) -> Option<Vec<String>> {
    let obj = item.as_object()?;
    fields
        .iter()
        .map(|f| match obj.get(*f)? {
            Value::String(s) => Some(s.trim().to_lowercase()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

/// Integer sum when both sides are integers, float sum otherwise.
/// Non-numeric quantities count as zero.
fn sum(a: &Value, b: &Value) -> Value {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(total) = x.checked_add(y) {
            return Value::Number(total.into());
        }
    }
    let total = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Number::from_f64(total).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_defaults_added_only_when_absent() {
        let mut d = doc(json!({"id": "v", "kpis": {"MRR": 10}}));
        let report = migrate(EntityKind::Venture, &mut d);

        assert_eq!(report.fields_added, vec!["milestones", "tags"]);
        assert_eq!(d["kpis"], json!({"MRR": 10}));
        assert_eq!(d["milestones"], json!([]));
    }

    #[test]
    fn test_migration_never_removes_fields() {
        let mut d = doc(json!({"id": "c", "legacy_field": 1, "entries": []}));
        migrate(EntityKind::CapTable, &mut d);
        assert_eq!(d["legacy_field"], json!(1));
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn test_cap_table_entries_merged_by_holder_and_class() {
        let mut d = doc(json!({
            "entries": [
                {"holder": "Alice", "class": "common", "shares": 100},
                {"holder": "Bob", "class": "common", "shares": 50},
                {"holder": "alice", "class": "common", "shares": 25},
                {"holder": "Alice", "class": "preferred", "shares": 10},
                {"note": "no key"}
            ]
        }));

        let report = migrate(EntityKind::CapTable, &mut d);
        assert_eq!(report.items_merged, 1);

        let entries = d["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0], json!({"holder": "Alice", "class": "common", "shares": 125}));
        assert_eq!(entries[3], json!({"note": "no key"}));
    }

    #[test]
    fn test_round_investors_merged_with_float_amounts() {
        let mut d = doc(json!({
            "investors": [
                {"name": "Fund A", "amount": 1.5},
                {"name": "Fund A", "amount": 2}
            ]
        }));
        migrate(EntityKind::Round, &mut d);
        assert_eq!(d["investors"], json!([{"name": "Fund A", "amount": 3.5}]));
    }

    #[test]
    fn test_noop_for_complete_document() {
        let mut d = doc(json!({"steps": []}));
        assert!(migrate(EntityKind::Playbook, &mut d).is_noop());
        assert!(migrate(EntityKind::Person, &mut doc(json!({}))).is_noop());
    }
}
