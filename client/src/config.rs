//! Client configuration.
//!
//! Loaded from `ANCHORSHARE_CLIENT_CONFIG` (or `./anchorshare-client.toml`).
//! Unlike the service config there is no usable default: the sharing
//! service URL must be given.
//!
//! ```toml
//! sharing_service_url = "https://example.net/api/anchors"
//! grouping_key = "helloworld"
//! readiness_threshold = 1.0
//! max_watcher_ids = 10
//! pending_readiness_timeout_ms = 60000
//! request_timeout_ms = 15000
//!
//! [cloud]
//! account_id = "..."
//! account_key = "..."
//! ```

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anchorshare_protocol::MAX_WATCHER_IDS;
use anchorshare_protocol::validate_grouping_key;
use anchorshare_utils_readiness::DEFAULT_READY_THRESHOLD;
use serde::Deserialize;

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
pub struct ClientConfig {
    /// Base URL of the index endpoint, e.g. `https://host/api/anchors`.
    pub sharing_service_url: String,

    /// Key under which this device saves and discovers anchors.
    #[serde(default = "default_grouping_key")]
    pub grouping_key: String,

    #[serde(default)]
    pub cloud: CloudAccount,

    /// Progress must be strictly above this before a save is attempted.
    #[serde(default = "default_readiness_threshold")]
    pub readiness_threshold: f32,

    /// Identifiers submitted to one watcher; extra ids are skipped.
    #[serde(default = "default_max_watcher_ids")]
    pub max_watcher_ids: usize,

    /// Give up on a mark that has waited this long for readiness. Unset
    /// means wait for as long as the session lasts.
    #[serde(default)]
    pub pending_readiness_timeout_ms: Option<u64>,

    /// Bound on each cloud and index call. Unset means no bound.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

/// Credentials handed to the cloud anchor service.
#[derive(Deserialize, Clone, Default)]
pub struct CloudAccount {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub account_key: String,
}

impl fmt::Debug for CloudAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudAccount")
            .field("account_id", &self.account_id)
            .field("account_key", &"<redacted>")
            .finish()
    }
}

fn default_grouping_key() -> String {
    "helloworld".to_string()
}

fn default_readiness_threshold() -> f32 {
    DEFAULT_READY_THRESHOLD
}

fn default_max_watcher_ids() -> usize {
    MAX_WATCHER_IDS
}

impl ClientConfig {
    pub const ENV_CONFIG_PATH: &'static str = "ANCHORSHARE_CLIENT_CONFIG";
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "anchorshare-client.toml";

    /// Defaults for everything except the service URL.
    pub fn new(sharing_service_url: impl Into<String>) -> Self {
        Self {
            sharing_service_url: sharing_service_url.into(),
            grouping_key: default_grouping_key(),
            cloud: CloudAccount::default(),
            readiness_threshold: default_readiness_threshold(),
            max_watcher_ids: default_max_watcher_ids(),
            pending_readiness_timeout_ms: None,
            request_timeout_ms: None,
        }
    }

    /// Load from `path`, or from the env/default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map_or_else(Self::resolve_config_path, Path::to_path_buf);
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn pending_readiness_timeout(&self) -> Option<Duration> {
        self.pending_readiness_timeout_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.sharing_service_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "sharing_service_url must be an http(s) URL, got {:?}",
                self.sharing_service_url
            )));
        }
        validate_grouping_key(&self.grouping_key)
            .map_err(|e| ConfigError::Invalid(format!("grouping_key: {e}")))?;
        if !self.readiness_threshold.is_finite() {
            return Err(ConfigError::Invalid(
                "readiness_threshold must be finite".to_string(),
            ));
        }
        if self.max_watcher_ids == 0 || self.max_watcher_ids > MAX_WATCHER_IDS {
            return Err(ConfigError::Invalid(format!(
                "max_watcher_ids must be between 1 and {MAX_WATCHER_IDS}"
            )));
        }
        if self.pending_readiness_timeout_ms == Some(0) || self.request_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "timeouts must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve_config_path() -> PathBuf {
        std::env::var(Self::ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }
}
