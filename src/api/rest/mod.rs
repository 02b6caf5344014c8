//! REST API module for entity endpoints
//!
//! - `POST /api/:env/:entity` - submit a mutated entity body to the history log
//! - `GET /api/:env/:entity` - list manifests (`since`, `limit`)
//! - `GET /api/:env/:entity/:id` - read a snapshot

pub mod entities;

use serde::{Deserialize, Serialize};

/// Query parameters for listings
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// RFC 3339 lower bound on `updated_at`
    pub since: Option<String>,
    /// Maximum number of records to return (max: 1000)
    pub limit: Option<usize>,
}

pub const MAX_LIMIT: usize = 1000;

impl ListParams {
    pub fn normalized_limit(&self) -> usize {
        self.limit.unwrap_or(MAX_LIMIT).min(MAX_LIMIT)
    }
}

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    /// Total count (for listings)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data, total: None }
    }

    pub fn with_total(data: T, total: usize) -> Self {
        Self {
            data,
            total: Some(total),
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl ApiError {
    fn with_code(message: impl Into<String>, code: &str) -> Self {
        Self {
            error: message.into(),
            code: code.to_string(),
            details: Vec::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_code(message, "NOT_FOUND")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code(message, "BAD_REQUEST")
    }

    pub fn validation(message: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            details,
            ..Self::with_code(message, "VALIDATION_FAILED")
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_code(message, "UNAVAILABLE")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_code(message, "INTERNAL_ERROR")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_capped() {
        assert_eq!(ListParams::default().normalized_limit(), MAX_LIMIT);
        let params = ListParams {
            since: None,
            limit: Some(5000),
        };
        assert_eq!(params.normalized_limit(), MAX_LIMIT);
    }

    #[test]
    fn test_error_details_omitted_when_empty() {
        let json = serde_json::to_value(ApiError::not_found("gone")).unwrap();
        assert!(json.get("details").is_none());
        let json = serde_json::to_value(ApiError::validation("bad", vec!["x".into()])).unwrap();
        assert_eq!(json["details"][0], "x");
    }
}
