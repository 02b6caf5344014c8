//! HTTP boundary
//!
//! - `POST /pipeline/{snapshot,project,alerts}` - push notification handlers
//! - `/api/:env/:entity[/:id]` - mutation submission and reads, behind RBAC
//! - `GET /health`, `GET /stats`

pub mod http;
pub mod pipeline;
pub mod rest;
pub mod state;

pub use http::create_router;
pub use state::AppState;

/// Header carrying the caller's comma-separated roles
pub const ROLES_HEADER: &str = "x-roles";
