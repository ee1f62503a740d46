//! nodeslot.toml configuration parser.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSection,
    #[serde(default)]
    pub accelerators: AcceleratorConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Host name used to pick per-host task counts out of each req.
    pub hostname: String,
    /// Path to the topology facts JSON written by discovery.
    pub topology: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceleratorBackend {
    #[default]
    None,
    /// Devices listed in the topology facts file.
    Static,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcceleratorConfig {
    #[serde(default)]
    pub backend: AcceleratorBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: Some("info".to_string()),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: NodeConfig = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        // A relative topology path is relative to the config file.
        if config.node.topology.is_relative() {
            if let Some(dir) = path.parent() {
                config.node.topology = dir.join(&config.node.topology);
            }
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal nodeslot.toml for the given host.
    pub fn scaffold(hostname: &str, topology: &Path) -> Self {
        NodeConfig {
            node: NodeSection {
                hostname: hostname.to_string(),
                topology: topology.to_path_buf(),
            },
            accelerators: AcceleratorConfig::default(),
            log: LogConfig::default(),
        }
    }
}
