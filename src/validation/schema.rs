//! JSON Schema validation of entity bodies
//!
//! Every body is checked against an embedded envelope schema. Kinds with a
//! `<segment>.schema.json` file in the schema directory are additionally
//! checked against that document (Draft 7).

use std::collections::HashMap;
use std::path::Path;

use jsonschema::{Draft, JSONSchema};
use serde_json::{json, Value};
use thiserror::Error;

use super::SchemaValidator;
use crate::types::{EntityKind, Environment};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },

    #[error("failed to compile schema for {kind}: {message}")]
    Compile { kind: String, message: String },
}

/// Compiled schemas keyed by entity kind
pub struct JsonSchemaRegistry {
    envelope: JSONSchema,
    kinds: HashMap<EntityKind, JSONSchema>,
}

impl JsonSchemaRegistry {
    /// Registry with only the envelope schema
    pub fn new() -> Result<Self, SchemaError> {
        Ok(Self {
            envelope: compile("envelope", &Self::envelope_schema())?,
            kinds: HashMap::new(),
        })
    }

    /// Load `<segment>.schema.json` for every kind present in `dir`
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, SchemaError> {
        let mut registry = Self::new()?;
        let dir = dir.as_ref();

        for kind in EntityKind::ALL {
            let path = dir.join(format!("{}.schema.json", kind.segment()));
            if !path.exists() {
                continue;
            }
            let shown = path.display().to_string();
            let content = std::fs::read_to_string(&path).map_err(|source| SchemaError::Io {
                path: shown.clone(),
                source,
            })?;
            let schema: Value = serde_json::from_str(&content).map_err(|source| {
                SchemaError::Json {
                    path: shown.clone(),
                    source,
                }
            })?;
            registry.register(kind, &schema)?;
            tracing::info!(kind = %kind, path = %shown, "Loaded entity schema");
        }

        Ok(registry)
    }

    pub fn register(&mut self, kind: EntityKind, schema: &Value) -> Result<(), SchemaError> {
        self.kinds.insert(kind, compile(kind.as_str(), schema)?);
        Ok(())
    }

    pub fn has_schema(&self, kind: EntityKind) -> bool {
        self.kinds.contains_key(&kind)
    }

    fn envelope_schema() -> Value {
        let kinds: Vec<&str> = EntityKind::ALL.iter().map(|k| k.as_str()).collect();
        let envs: Vec<&str> = Environment::ALL.iter().map(|e| e.as_str()).collect();
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "required": ["id", "entity", "env", "schema_version", "created_at", "updated_at"],
            "properties": {
                "id": {"type": "string", "minLength": 1},
                "entity": {"type": "string", "enum": kinds},
                "env": {"type": "string", "enum": envs},
                "schema_version": {"type": "string", "minLength": 1},
                "created_at": {"type": "string", "minLength": 1},
                "updated_at": {"type": "string", "minLength": 1}
            }
        })
    }
}

fn compile(kind: &str, schema: &Value) -> Result<JSONSchema, SchemaError> {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|e| SchemaError::Compile {
            kind: kind.to_string(),
            message: e.to_string(),
        })
}

fn collect_errors(schema: &JSONSchema, body: &Value, out: &mut Vec<String>) {
    if let Err(errors) = schema.validate(body) {
        out.extend(errors.map(|e| {
            let at = e.instance_path.to_string();
            if at.is_empty() {
                e.to_string()
            } else {
                format!("{} at {}", e, at)
            }
        }));
    }
}

impl SchemaValidator for JsonSchemaRegistry {
    fn validate(&self, kind: EntityKind, body: &Value) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        collect_errors(&self.envelope, body, &mut errors);
        if let Some(schema) = self.kinds.get(&kind) {
            collect_errors(schema, body, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn venture() -> Value {
        json!({
            "id": "v-1",
            "entity": "venture",
            "env": "prod",
            "schema_version": "1",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z",
            "status": "Pilot"
        })
    }

    #[test]
    fn test_envelope_schema_accepts_valid_body() {
        let registry = JsonSchemaRegistry::new().unwrap();
        assert!(registry.validate(EntityKind::Venture, &venture()).is_ok());
    }

    #[test]
    fn test_envelope_schema_reports_missing_fields() {
        let registry = JsonSchemaRegistry::new().unwrap();
        let errors = registry
            .validate(EntityKind::Venture, &json!({"id": "v-1"}))
            .unwrap_err();
        assert!(errors.iter().any(|e| e.contains("entity")));
        assert!(errors.iter().any(|e| e.contains("updated_at")));
    }

    #[test]
    fn test_kind_schema_from_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("ventures.schema.json"),
            r#"{
                "type": "object",
                "required": ["status"],
                "properties": {
                    "status": {"enum": ["Idea", "Pilot", "Scale"]},
                    "kpis": {"type": "object", "properties": {"MRR": {"type": "number", "minimum": 0}}}
                }
            }"#,
        )
        .unwrap();

        let registry = JsonSchemaRegistry::from_dir(dir.path()).unwrap();
        assert!(registry.has_schema(EntityKind::Venture));
        assert!(!registry.has_schema(EntityKind::Round));
        assert!(registry.validate(EntityKind::Venture, &venture()).is_ok());

        let mut bad = venture();
        bad["status"] = json!("Unknown");
        bad["kpis"] = json!({"MRR": -5});
        let errors = registry.validate(EntityKind::Venture, &bad).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("/kpis/MRR")));
    }

    #[test]
    fn test_invalid_schema_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("rounds.schema.json"), "{not json").unwrap();
        assert!(matches!(
            JsonSchemaRegistry::from_dir(dir.path()),
            Err(SchemaError::Json { .. })
        ));
    }
}
