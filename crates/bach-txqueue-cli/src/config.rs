//! Configuration file

use bach_txqueue::{Address, ExecutorConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runner configuration, `[queue]` holds the executor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    /// RPC endpoint URL
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Account the node signs for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
    /// Executor settings
    #[serde(default)]
    pub queue: ExecutorConfig,
}

fn default_rpc_url() -> String {
    "http://localhost:8545".to_string()
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            sender: None,
            queue: ExecutorConfig::default(),
        }
    }
}

impl FileConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Apply command line overrides
    pub fn with_overrides(mut self, rpc_url: Option<String>, sender: Option<Address>) -> Self {
        if let Some(url) = rpc_url {
            self.rpc_url = url;
        }
        if sender.is_some() {
            self.sender = sender;
        }
        self
    }

    /// Render as TOML
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
