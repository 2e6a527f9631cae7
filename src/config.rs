//! Declarative session configuration.
//!
//! A YAML file maps mount URLs to worker images and pool tuning, so a
//! whole session can be stood up without code:
//!
//! ```yaml
//! network_cidr: "192.168.0.0/24"
//! mounts:
//!   "http://calculator":
//!     image: "calculator:latest"
//!     channel: tunnel
//!     initial_size: 2
//!     max_size: 5
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelKind, ScriptChannelConfig};
use crate::error::SessionError;
use crate::pool::PoolConfig;
use crate::provider::LaunchSpec;

fn default_network_cidr() -> String {
    "192.168.0.0/24".to_string()
}

fn default_initial_size() -> usize {
    1
}

fn default_max_size() -> usize {
    5
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_channel() -> ChannelKind {
    ChannelKind::Tunnel
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_network_cidr")]
    pub network_cidr: String,
    /// Pools keyed by mount URL.
    #[serde(default)]
    pub mounts: BTreeMap<String, MountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub image: String,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default = "default_channel")]
    pub channel: ChannelKind,
    #[serde(default = "default_initial_size")]
    pub initial_size: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub reconcile_interval_ms: u64,
    #[serde(default)]
    pub script: ScriptChannelConfig,
}

impl SessionConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SessionError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }
}

impl MountConfig {
    pub fn to_pool_config(&self) -> Result<PoolConfig, SessionError> {
        if self.image.trim().is_empty() {
            return Err(SessionError::InvalidConfig(
                "mount image must not be empty".to_string(),
            ));
        }
        if self.max_size == 0 {
            return Err(SessionError::InvalidConfig(
                "max_size must be at least 1".to_string(),
            ));
        }
        let mut launch = LaunchSpec::new(&self.image);
        launch.entrypoint = self.entrypoint.clone();
        launch.env = self.env.clone();
        Ok(PoolConfig::new(launch)
            .with_channel(self.channel)
            .with_initial_size(self.initial_size)
            .with_max_size(self.max_size)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_reconcile_interval(Duration::from_millis(self.reconcile_interval_ms))
            .with_script(self.script.clone()))
    }
}
