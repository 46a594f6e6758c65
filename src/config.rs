//! Bridge configuration.
//!
//! Loaded from a TOML file; every key is optional:
//!
//! ```toml
//! timeout_secs = 60
//! match_policy = "strict"        # or "sender-scoped"
//! log_level = "info"
//!
//! [peers.echo]
//! command = ["nakadachi-echo"]
//! ```
//!
//! Command-line flags override file values.

pub mod user;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridge::{DEFAULT_TIMEOUT, MatchPolicy};
use crate::transport::{PeerAddress, PeerCommand};

pub use user::user_config_path;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeSettings {
    /// Reply budget per forwarded request, in seconds.
    pub timeout_secs: u64,
    pub match_policy: MatchPolicy,
    /// `env_logger` filter used when `RUST_LOG` is unset.
    pub log_level: Option<String>,
    pub peers: HashMap<PeerAddress, PeerCommand>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            match_policy: MatchPolicy::default(),
            log_level: None,
            peers: HashMap::new(),
        }
    }
}

impl BridgeSettings {
    /// Parse settings from TOML text and validate them.
    pub fn from_toml(text: &str, origin: &Path) -> ConfigResult<Self> {
        let settings: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".to_string()));
        }
        for (peer, command) in &self.peers {
            if command.program().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "peer {} has an empty command",
                    peer
                )));
            }
        }
        Ok(())
    }
}

/// Load settings.
///
/// An explicit `path` must exist. Without one, the user config file is read
/// if present, and defaults are used otherwise.
pub fn load_settings(path: Option<&Path>) -> ConfigResult<BridgeSettings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match user_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                log::debug!(
                    target: "nakadachi::config",
                    "No user config found, using defaults"
                );
                return Ok(BridgeSettings::default());
            }
        },
    };

    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let settings = BridgeSettings::from_toml(&text, &path)?;
    log::info!(
        target: "nakadachi::config",
        "Loaded config from {} ({} peers)",
        path.display(),
        settings.peers.len()
    );
    Ok(settings)
}
