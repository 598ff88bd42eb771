//! Index service configuration.
//!
//! Loaded from `ANCHORSHARE_INDEX_CONFIG` (or `./anchorshare-index.toml`).
//! A missing file means defaults. `ANCHORSHARE_INDEX_BIND` overrides `bind`.
//!
//! ```toml
//! bind = "0.0.0.0:8080"
//!
//! [storage]
//! backend = "sqlite"
//! path = "/var/lib/anchorshare/anchor-cache.db"
//! table = "AnchorCache"
//! partition_key = "anchors"
//! page_size = 1000
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::table::validate_table_name;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexServiceConfig {
    /// Socket address the HTTP endpoint binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file for the sqlite backend.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_table")]
    pub table: String,

    /// Every entry is stored under this single partition. Fine for small
    /// deployments; a real one would partition by grouping key.
    #[serde(default = "default_partition_key")]
    pub partition_key: String,

    /// Rows per query segment.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("anchor-cache.db")
}

fn default_table() -> String {
    "AnchorCache".to_string()
}

fn default_partition_key() -> String {
    "anchors".to_string()
}

fn default_page_size() -> usize {
    1000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_db_path(),
            table: default_table(),
            partition_key: default_partition_key(),
            page_size: default_page_size(),
        }
    }
}

impl Default for IndexServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            storage: StorageConfig::default(),
        }
    }
}

impl IndexServiceConfig {
    pub const ENV_CONFIG_PATH: &'static str = "ANCHORSHARE_INDEX_CONFIG";
    pub const ENV_BIND: &'static str = "ANCHORSHARE_INDEX_BIND";
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "anchorshare-index.toml";

    /// Load from `path`, or from the env/default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map_or_else(Self::resolve_config_path, Path::to_path_buf);

        let mut cfg = if path.exists() {
            let contents =
                std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
            Self::parse(&contents)?
        } else {
            tracing::info!(path = %path.display(), "index config not found, using defaults");
            Self::default()
        };

        if let Ok(bind) = std::env::var(Self::ENV_BIND) {
            cfg.bind = bind;
            cfg.validate()?;
        }
        Ok(cfg)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bind {:?}: {e}", self.bind)))
    }

    fn resolve_config_path() -> PathBuf {
        std::env::var(Self::ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.storage.page_size == 0 {
            return Err(ConfigError::Invalid(
                "storage.page_size must be at least 1".to_string(),
            ));
        }
        if self.storage.partition_key.is_empty() {
            return Err(ConfigError::Invalid(
                "storage.partition_key must not be empty".to_string(),
            ));
        }
        validate_table_name(&self.storage.table)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}
