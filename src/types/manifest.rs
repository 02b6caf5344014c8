//! Listing records derived from snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{EntityKind, Environment};

/// Reduced projection of a snapshot used for listings.
///
/// Always recomputed from the full snapshot, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub id: String,
    pub entity: EntityKind,
    pub env: Environment,
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(rename = "ventureId", default, skip_serializing_if = "Option::is_none")]
    pub venture_id: Option<String>,
    #[serde(rename = "asOf", default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<String>,

    /// Canonical snapshot path
    pub ptr: String,

    /// Index pointer paths written by the projection that produced this record
    #[serde(rename = "indexPaths", default, skip_serializing_if = "Vec::is_empty")]
    pub index_paths: Vec<String>,
}

/// A manifest-shaped record stored under a secondary-index path
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPointer {
    /// Attribute family, e.g. `status` for `by-status`
    pub attribute: &'static str,
    /// Normalized attribute value used in the path
    pub value: String,
    pub path: String,
    /// One pointer per attribute value shared by many ids (latest wins)
    pub shared: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_field_names() {
        let record = ManifestRecord {
            id: "r-1".to_string(),
            entity: EntityKind::Round,
            env: Environment::Dev,
            schema_version: "1".to_string(),
            created_at: "2026-01-01T00:00:00Z".parse().unwrap(),
            updated_at: "2026-01-01T00:00:00Z".parse().unwrap(),
            title: None,
            status: Some("open".to_string()),
            owner: None,
            lead: None,
            stage: None,
            venture_id: Some("v-1".to_string()),
            as_of: None,
            ptr: "env/dev/snapshots/rounds/r-1.json".to_string(),
            index_paths: vec![],
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["ventureId"], "v-1");
        assert_eq!(json["entity"], "round");
        assert_eq!(json["created_at"], "2026-01-01T00:00:00Z");
        assert!(json.get("title").is_none());
        assert!(json.get("indexPaths").is_none());
    }
}
