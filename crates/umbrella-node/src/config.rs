//! Node configuration.
//!
//! Read from a TOML file (missing file means defaults), then overridden by
//! environment variables:
//!
//! - `UMBRELLA_LISTEN`: HTTP listen address
//! - `UMBRELLA_DATA_DIR`: key, certificate and data blob directory
//! - `UMBRELLA_ROOT_DIR`: directory holding `root_key.pub`
//! - `UMBRELLA_USER_ID`: this node's user id, hex

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Configuration for one Umbrella node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP listen address. Port 0 picks a free port.
    pub listen: SocketAddr,

    /// Directory for `keys/`, certificates, `data.json` and `id`.
    pub data_dir: PathBuf,

    /// Directory containing the trust anchor `root_key.pub`.
    pub root_dir: PathBuf,

    /// This node's user id (hex). Falls back to `<data_dir>/id`.
    pub user_id: Option<String>,

    /// On `serve`, check the node's own certificate against the root key.
    pub check_own_certificate: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 0)),
            data_dir: PathBuf::from("data"),
            root_dir: PathBuf::from("."),
            user_id: None,
            check_own_certificate: true,
        }
    }
}

impl NodeConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `UMBRELLA_*` overrides from the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|var| std::env::var(var).ok())
    }

    /// Apply `UMBRELLA_*` overrides from `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("UMBRELLA_LISTEN") {
            self.listen = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "UMBRELLA_LISTEN",
                value,
            })?;
        }
        if let Some(value) = lookup("UMBRELLA_DATA_DIR") {
            self.data_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("UMBRELLA_ROOT_DIR") {
            self.root_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("UMBRELLA_USER_ID") {
            if umbrella_core::encoding::parse_user_id(&value).is_err() {
                return Err(ConfigError::InvalidEnv {
                    var: "UMBRELLA_USER_ID",
                    value,
                });
            }
            self.user_id = Some(value);
        }
        Ok(())
    }

    /// The configured user id, if set.
    pub fn user_id(&self) -> umbrella_core::Result<Option<u64>> {
        self.user_id
            .as_deref()
            .map(umbrella_core::encoding::parse_user_id)
            .transpose()
    }
}
