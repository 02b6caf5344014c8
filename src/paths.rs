//! Envelope & path scheme
//!
//! Every storage location is a pure function of its inputs:
//!
//! ```text
//! env/E/S/I/history/Y/M/D/<timestamp>_<G>.json        history event
//! env/E/snapshots/S/I.json                            snapshot
//! env/E/manifests/S/by-id/I.json                      per-id manifest
//! env/E/manifests/S/_index_shard=<key>.ndjson         sharded manifest lines
//! env/E/indices/S/by-<attribute>/<value>/I.json       secondary index pointer
//! env/E/rules/<rule>.json                             rule definition
//! env/E/alerts/<rule>/S/I/<timestamp>.json            alert record
//! ```

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::types::{EntityKind, Environment};

/// The logical identity of one entity instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub env: Environment,
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(env: Environment, kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            env,
            kind,
            id: id.into(),
        }
    }

    pub fn snapshot_path(&self) -> String {
        snapshot_path(self.env, self.kind, &self.id)
    }

    pub fn manifest_path(&self) -> String {
        manifest_path(self.env, self.kind, &self.id)
    }
}

/// `YYYYMMDDTHHMMSSmmmZ`
pub fn compact_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

pub fn history_path(
    env: Environment,
    kind: EntityKind,
    id: &str,
    at: &DateTime<Utc>,
    generated_id: &str,
) -> String {
    format!(
        "env/{}/{}/{}/history/{}/{}_{}.json",
        env,
        kind.segment(),
        id,
        at.format("%Y/%m/%d"),
        compact_timestamp(at),
        generated_id
    )
}

pub fn snapshot_path(env: Environment, kind: EntityKind, id: &str) -> String {
    format!("env/{}/snapshots/{}/{}.json", env, kind.segment(), id)
}

pub fn manifest_prefix(env: Environment, kind: EntityKind) -> String {
    format!("env/{}/manifests/{}/by-id/", env, kind.segment())
}

pub fn manifest_path(env: Environment, kind: EntityKind, id: &str) -> String {
    format!("{}{}.json", manifest_prefix(env, kind), id)
}

pub fn shard_prefix(env: Environment, kind: EntityKind) -> String {
    format!("env/{}/manifests/{}/_index_shard=", env, kind.segment())
}

pub fn shard_path(env: Environment, kind: EntityKind, shard: &str) -> String {
    format!("{}{}.ndjson", shard_prefix(env, kind), shard)
}

/// Prefix shared by every pointer of one index family (`by-<attribute>/`)
pub fn index_family_prefix(env: Environment, kind: EntityKind, attribute: &str) -> String {
    format!("env/{}/indices/{}/by-{}/", env, kind.segment(), attribute)
}

pub fn index_path(
    env: Environment,
    kind: EntityKind,
    attribute: &str,
    value: &str,
    id: &str,
) -> String {
    format!("{}{}/{}.json", index_family_prefix(env, kind, attribute), value, id)
}

/// A single pointer per attribute value, overwritten by whichever id is latest
pub fn shared_index_path(env: Environment, kind: EntityKind, attribute: &str, value: &str) -> String {
    format!("{}{}.json", index_family_prefix(env, kind, attribute), value)
}

pub fn rules_prefix(env: Environment) -> String {
    format!("env/{}/rules/", env)
}

pub fn alert_path(
    env: Environment,
    rule_id: &str,
    kind: EntityKind,
    id: &str,
    snapshot_updated_at: &DateTime<Utc>,
) -> String {
    format!(
        "env/{}/alerts/{}/{}/{}/{}.json",
        env,
        rule_id,
        kind.segment(),
        id,
        compact_timestamp(snapshot_updated_at)
    )
}

/// Parse `env/E/S/I/history/Y/M/D/<file>.json`
pub fn parse_history_path(path: &str) -> Option<EntityRef> {
    let parts: Vec<&str> = path.split('/').collect();
    match parts.as_slice() {
        ["env", env, segment, id, "history", y, m, d, file]
            if is_digits(y, 4) && is_digits(m, 2) && is_digits(d, 2) && is_json_file(file) =>
        {
            entity_ref(env, segment, id)
        }
        _ => None,
    }
}

/// Parse `env/E/snapshots/S/I.json`
pub fn parse_snapshot_path(path: &str) -> Option<EntityRef> {
    let parts: Vec<&str> = path.split('/').collect();
    match parts.as_slice() {
        ["env", env, "snapshots", segment, file] if is_json_file(file) => {
            entity_ref(env, segment, file.strip_suffix(".json")?)
        }
        _ => None,
    }
}

fn entity_ref(env: &str, segment: &str, id: &str) -> Option<EntityRef> {
    if id.is_empty() {
        return None;
    }
    Some(EntityRef {
        env: env.parse().ok()?,
        kind: EntityKind::from_segment(segment).ok()?,
        id: id.to_string(),
    })
}

fn is_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_json_file(file: &str) -> bool {
    file.len() > ".json".len() && file.ends_with(".json")
}

/// Lowercase, collapse every run of non-alphanumerics into `-`, trim dashes
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;

    for c in value.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Shard key for an id: first byte of its SHA-256.
///
/// Two hex digits when `shard_count >= 256`, otherwise the byte modulo
/// `shard_count` in decimal.
pub fn shard_key(id: &str, shard_count: u32) -> String {
    let digest = Sha256::digest(id.as_bytes());
    let first = digest[0];
    if shard_count >= 256 {
        format!("{:02x}", first)
    } else {
        (u32::from(first) % shard_count.max(1)).to_string()
    }
}

/// Whether `value` can stand as exactly one path segment
pub fn is_path_segment(value: &str) -> bool {
    !value.is_empty() && !value.contains('/') && value != "." && value != ".."
}
