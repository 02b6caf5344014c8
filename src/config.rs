//! Runtime configuration from `MATERIALIZER_*` environment variables
//!
//! | Variable | Default |
//! |---|---|
//! | `MATERIALIZER_BIND` | `0.0.0.0:8080` |
//! | `MATERIALIZER_BACKEND` | `local` (`local`, `memory`, `gcs`) |
//! | `MATERIALIZER_DATA_DIR` | `data` |
//! | `MATERIALIZER_GCS_BUCKET` | required for `gcs` |
//! | `MATERIALIZER_GCS_ENDPOINT` | Cloud Storage |
//! | `MATERIALIZER_GCS_TOKEN` | none |
//! | `MATERIALIZER_SHARD_COUNT` | `256` |
//! | `MATERIALIZER_WRITE_SHARDS` | `false` |
//! | `MATERIALIZER_SCHEMA_DIR` | none (envelope schema only) |
//! | `MATERIALIZER_FEED_URL` | none (feed disabled) |

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::feed::{NoopFeed, SearchFeed, WebhookFeed};
use crate::pipeline::{ShardSettings, DEFAULT_SHARD_COUNT};
use crate::storage::{GcsConfig, GcsStore, LocalStore, MemoryStore, ObjectStore, StoreError};
use crate::validation::{JsonSchemaRegistry, SchemaError};

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to load schemas: {0}")]
    Schema(#[from] SchemaError),

    #[error("failed to build search feed client: {0}")]
    Feed(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Local,
    Memory,
    Gcs,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Local => "local",
            Backend::Memory => "memory",
            Backend::Gcs => "gcs",
        })
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" => Ok(Backend::Local),
            "memory" | "mem" => Ok(Backend::Memory),
            "gcs" => Ok(Backend::Gcs),
            _ => Err("expected local, memory or gcs".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind: SocketAddr,
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub gcs: Option<GcsConfig>,
    pub shards: ShardSettings,
    pub schema_dir: Option<PathBuf>,
    pub feed_url: Option<String>,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_raw = get("MATERIALIZER_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "MATERIALIZER_BIND",
                value: bind_raw.clone(),
                reason: e.to_string(),
            })?;

        let backend = match get("MATERIALIZER_BACKEND") {
            Some(raw) => raw.parse::<Backend>().map_err(|reason| ConfigError::InvalidValue {
                key: "MATERIALIZER_BACKEND",
                value: raw.clone(),
                reason,
            })?,
            None => Backend::Local,
        };

        let gcs = match get("MATERIALIZER_GCS_BUCKET") {
            Some(bucket) => {
                let mut gcs = GcsConfig::new(bucket);
                if let Some(endpoint) = get("MATERIALIZER_GCS_ENDPOINT") {
                    gcs.endpoint = endpoint;
                }
                gcs.token = get("MATERIALIZER_GCS_TOKEN");
                Some(gcs)
            }
            None if backend == Backend::Gcs => return Err(ConfigError::Missing("MATERIALIZER_GCS_BUCKET")),
            None => None,
        };

        let shards = ShardSettings {
            count: parse_or_default("MATERIALIZER_SHARD_COUNT", get("MATERIALIZER_SHARD_COUNT"), DEFAULT_SHARD_COUNT)
                .max(1),
            write: parse_bool_or_default("MATERIALIZER_WRITE_SHARDS", get("MATERIALIZER_WRITE_SHARDS"), false),
        };

        Ok(Self {
            bind,
            backend,
            data_dir: PathBuf::from(get("MATERIALIZER_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())),
            gcs,
            shards,
            schema_dir: get("MATERIALIZER_SCHEMA_DIR").map(PathBuf::from),
            feed_url: get("MATERIALIZER_FEED_URL"),
        })
    }

    pub fn build_store(&self) -> Result<Arc<dyn ObjectStore>, ConfigError> {
        let store: Arc<dyn ObjectStore> = match self.backend {
            Backend::Local => Arc::new(LocalStore::open(&self.data_dir)?),
            Backend::Memory => Arc::new(MemoryStore::new()),
            Backend::Gcs => {
                let gcs = self
                    .gcs
                    .clone()
                    .ok_or(ConfigError::Missing("MATERIALIZER_GCS_BUCKET"))?;
                Arc::new(GcsStore::new(gcs))
            }
        };
        info!(backend = store.backend(), "Object store ready");
        Ok(store)
    }

    pub fn build_validator(&self) -> Result<JsonSchemaRegistry, ConfigError> {
        Ok(match &self.schema_dir {
            Some(dir) => JsonSchemaRegistry::from_dir(dir)?,
            None => JsonSchemaRegistry::new()?,
        })
    }

    pub fn build_feed(&self) -> Result<Arc<dyn SearchFeed>, ConfigError> {
        Ok(match &self.feed_url {
            Some(url) => Arc::new(WebhookFeed::new(url.as_str())?),
            None => Arc::new(NoopFeed),
        })
    }
}

fn parse_or_default<T: FromStr + fmt::Display + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "Ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

fn parse_bool_or_default(key: &str, raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => default,
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        Some(other) => {
            warn!(key, value = other, default, "Ignoring unparsable setting");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind, DEFAULT_BIND.parse().unwrap());
        assert_eq!(cfg.backend, Backend::Local);
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.shards, ShardSettings::default());
        assert!(cfg.gcs.is_none());
        assert!(cfg.feed_url.is_none());
    }

    #[test]
    fn test_gcs_requires_bucket() {
        assert!(matches!(
            config(&[("MATERIALIZER_BACKEND", "gcs")]),
            Err(ConfigError::Missing("MATERIALIZER_GCS_BUCKET"))
        ));

        let cfg = config(&[
            ("MATERIALIZER_BACKEND", "GCS"),
            ("MATERIALIZER_GCS_BUCKET", "ventures-data"),
            ("MATERIALIZER_GCS_ENDPOINT", "http://localhost:4443"),
        ])
        .unwrap();
        let gcs = cfg.gcs.unwrap();
        assert_eq!(gcs.bucket, "ventures-data");
        assert_eq!(gcs.endpoint, "http://localhost:4443");
    }

    #[test]
    fn test_invalid_backend_and_bind_rejected() {
        assert!(matches!(
            config(&[("MATERIALIZER_BACKEND", "s3")]),
            Err(ConfigError::InvalidValue { key: "MATERIALIZER_BACKEND", .. })
        ));
        assert!(matches!(
            config(&[("MATERIALIZER_BIND", "nowhere")]),
            Err(ConfigError::InvalidValue { key: "MATERIALIZER_BIND", .. })
        ));
    }

    #[test]
    fn test_bad_numbers_fall_back_to_defaults() {
        let cfg = config(&[
            ("MATERIALIZER_SHARD_COUNT", "many"),
            ("MATERIALIZER_WRITE_SHARDS", "TRUE"),
        ])
        .unwrap();
        assert_eq!(cfg.shards.count, 256);
        assert!(cfg.shards.write);

        let cfg = config(&[("MATERIALIZER_SHARD_COUNT", "16"), ("MATERIALIZER_WRITE_SHARDS", "maybe")]).unwrap();
        assert_eq!(cfg.shards.count, 16);
        assert!(!cfg.shards.write);
    }

    #[test]
    fn test_memory_backend_builds() {
        let cfg = config(&[("MATERIALIZER_BACKEND", "memory")]).unwrap();
        assert_eq!(cfg.build_store().unwrap().backend(), "memory");
        assert!(cfg.build_validator().is_ok());
    }
}
