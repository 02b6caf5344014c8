//! Entity kinds and deployment environments

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when an entity kind, environment or segment is not in the closed set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what} '{value}'")]
pub struct ParseKindError {
    pub what: &'static str,
    pub value: String,
}

/// The closed set of entity kinds the engine materializes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Venture,
    Idea,
    Playbook,
    Round,
    CapTable,
    Person,
    Experiment,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Venture,
        EntityKind::Idea,
        EntityKind::Playbook,
        EntityKind::Round,
        EntityKind::CapTable,
        EntityKind::Person,
        EntityKind::Experiment,
    ];

    /// Tag used in the `entity` envelope field
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Venture => "venture",
            EntityKind::Idea => "idea",
            EntityKind::Playbook => "playbook",
            EntityKind::Round => "round",
            EntityKind::CapTable => "cap_table",
            EntityKind::Person => "person",
            EntityKind::Experiment => "experiment",
        }
    }

    /// Stable path segment (pluralized or aliased)
    pub fn segment(&self) -> &'static str {
        match self {
            EntityKind::Venture => "ventures",
            EntityKind::Idea => "ideas",
            EntityKind::Playbook => "playbooks",
            EntityKind::Round => "rounds",
            EntityKind::CapTable => "cap-tables",
            EntityKind::Person => "people",
            EntityKind::Experiment => "experiments",
        }
    }

    pub fn from_segment(segment: &str) -> Result<Self, ParseKindError> {
        Self::ALL
            .into_iter()
            .find(|k| k.segment() == segment)
            .ok_or_else(|| ParseKindError {
                what: "entity segment",
                value: segment.to_string(),
            })
    }

    /// Accepts either the envelope tag or the path segment
    pub fn from_tag_or_segment(value: &str) -> Result<Self, ParseKindError> {
        value.parse().or_else(|_| Self::from_segment(value))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ParseKindError {
                what: "entity kind",
                value: s.to_string(),
            })
    }
}

/// Deployment environments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Prod,
    Staging,
    Dev,
}

impl Environment {
    pub const ALL: [Environment; 3] = [Environment::Prod, Environment::Staging, Environment::Dev];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Staging => "staging",
            Environment::Dev => "dev",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Prod)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| ParseKindError {
                what: "environment",
                value: s.to_string(),
            })
    }
}
