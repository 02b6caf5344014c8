//! The envelope embedded in every entity record

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::Document;
use super::entity::{EntityKind, Environment};

pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

/// Reasons an entity body fails minimal envelope validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("missing envelope field '{0}'")]
    MissingField(&'static str),

    #[error("invalid envelope field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("updated_at ({updated_at}) is earlier than created_at ({created_at})")]
    UpdatedBeforeCreated {
        created_at: String,
        updated_at: String,
    },
}

/// Envelope fields the engine depends on.
///
/// Everything else in an entity body is opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub entity: EntityKind,
    pub env: Environment,
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Envelope {
    /// Extract and validate the envelope from a document
    pub fn from_document(doc: &Document) -> EnvelopeResult<Self> {
        let id = required_str(doc, "id")?;
        if id.contains('/') || id == "." || id == ".." {
            return Err(EnvelopeError::InvalidField {
                field: "id",
                reason: "must be a single path segment".to_string(),
            });
        }

        let entity = required_str(doc, "entity")?
            .parse::<EntityKind>()
            .map_err(|e| EnvelopeError::InvalidField {
                field: "entity",
                reason: e.to_string(),
            })?;

        let env = required_str(doc, "env")?
            .parse::<Environment>()
            .map_err(|e| EnvelopeError::InvalidField {
                field: "env",
                reason: e.to_string(),
            })?;

        let schema_version = required_str(doc, "schema_version")?.to_string();
        let created_at = required_timestamp(doc, "created_at")?;
        let updated_at = required_timestamp(doc, "updated_at")?;

        if updated_at < created_at {
            return Err(EnvelopeError::UpdatedBeforeCreated {
                created_at: format_timestamp(&created_at),
                updated_at: format_timestamp(&updated_at),
            });
        }

        Ok(Self {
            id: id.to_string(),
            entity,
            env,
            schema_version,
            created_at,
            updated_at,
        })
    }
}

/// Parse an ISO-8601 / RFC 3339 timestamp into UTC
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn required_str<'a>(doc: &'a Document, field: &'static str) -> EnvelopeResult<&'a str> {
    match doc.get(field) {
        None | Some(Value::Null) => Err(EnvelopeError::MissingField(field)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(EnvelopeError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(EnvelopeError::InvalidField {
            field,
            reason: "expected a string".to_string(),
        }),
    }
}

fn required_timestamp(doc: &Document, field: &'static str) -> EnvelopeResult<DateTime<Utc>> {
    let raw = required_str(doc, field)?;
    parse_timestamp(raw).ok_or_else(|| EnvelopeError::InvalidField {
        field,
        reason: format!("'{}' is not an ISO-8601 timestamp", raw),
    })
}
