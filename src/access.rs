//! Access Policy Evaluator
//!
//! Pure role-based decision: `(roles, entity?, method, env?) -> {allowed, reason?}`.
//! Callers enforce the decision at the request boundary.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::types::{EntityKind, Environment, ParseKindError};

/// Entity kinds restricted roles may read
pub const RESTRICTED_ALLOW_LIST: [EntityKind; 4] = [
    EntityKind::Venture,
    EntityKind::Idea,
    EntityKind::Playbook,
    EntityKind::Round,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Ops,
    Owner,
    Viewer,
    Investor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Ops => "ops",
            Role::Owner => "owner",
            Role::Viewer => "viewer",
            Role::Investor => "investor",
        }
    }

    pub fn has_full_access(&self) -> bool {
        matches!(self, Role::Admin | Role::Ops | Role::Owner)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "ops" => Ok(Role::Ops),
            "owner" => Ok(Role::Owner),
            "viewer" => Ok(Role::Viewer),
            "investor" => Ok(Role::Investor),
            _ => Err(ParseKindError {
                what: "role",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    ReadOnly,
    EnvRestricted,
    EntityRestricted,
    Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
}

impl AccessDecision {
    pub const ALLOW: Self = Self {
        allowed: true,
        reason: None,
    };

    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

pub fn is_read_method(method: &str) -> bool {
    ["GET", "HEAD", "OPTIONS"]
        .iter()
        .any(|m| m.eq_ignore_ascii_case(method.trim()))
}

/// Decide whether any of `roles` may perform `method`.
///
/// Unknown role names are ignored; with no known role left the request is
/// `unauthorized`. Restricted roles are checked in order: method, then
/// environment, then entity kind.
pub fn enforce_rbac<S: AsRef<str>>(
    roles: &[S],
    entity: Option<EntityKind>,
    method: &str,
    env: Option<Environment>,
) -> AccessDecision {
    let known: Vec<Role> = roles.iter().filter_map(|r| r.as_ref().parse().ok()).collect();

    if known.is_empty() {
        return AccessDecision::deny(DenyReason::Unauthorized);
    }
    if known.iter().any(Role::has_full_access) {
        return AccessDecision::ALLOW;
    }
    if !is_read_method(method) {
        return AccessDecision::deny(DenyReason::ReadOnly);
    }
    if !env.is_some_and(|e| e.is_production()) {
        return AccessDecision::deny(DenyReason::EnvRestricted);
    }
    if !entity.is_some_and(|k| RESTRICTED_ALLOW_LIST.contains(&k)) {
        return AccessDecision::deny(DenyReason::EntityRestricted);
    }

    AccessDecision::ALLOW
}

/// Split a comma-separated role header value
pub fn parse_roles_header(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}
