//! Schema validation boundary
//!
//! Candidate payloads are validated before they enter the history log. The
//! pipeline only depends on the [`SchemaValidator`] trait; the production
//! implementation is [`JsonSchemaRegistry`].

mod schema;

use serde_json::Value;

use crate::types::EntityKind;

pub use schema::{JsonSchemaRegistry, SchemaError};

/// Pass/fail-with-error-list validation of an entity body
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, kind: EntityKind, body: &Value) -> Result<(), Vec<String>>;
}
