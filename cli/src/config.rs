//! Config file loading. Schema validation of upstream entries lives in the
//! `UpstreamConfig` deserializer; this module only finds and parses the
//! file.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use muster_core::GatewayConfig;
use muster_core::UpstreamConfig;
use serde::Deserialize;

pub const MUSTER_HOME_ENV: &str = "MUSTER_HOME";

#[derive(Debug, Default, Deserialize)]
pub struct MusterConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Ordered by name; reconciliation is order-insensitive but the
    /// deterministic order keeps catalog collision handling stable.
    #[serde(default)]
    pub upstreams: BTreeMap<String, UpstreamConfig>,
}

impl MusterConfig {
    pub fn desired_upstreams(&self) -> Vec<(String, UpstreamConfig)> {
        self.upstreams
            .iter()
            .map(|(name, config)| (name.clone(), config.clone()))
            .collect()
    }
}

/// `$MUSTER_HOME` or `~/.muster`. Holds `config.toml` and `tokens/`.
pub fn muster_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(MUSTER_HOME_ENV) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".muster"))
        .context("could not determine a home directory; set MUSTER_HOME")
}

pub fn token_store_dir() -> Result<PathBuf> {
    Ok(muster_home()?.join("tokens"))
}

pub fn load_config(path: Option<&Path>) -> Result<MusterConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => muster_home()?.join("config.toml"),
    };
    if !path.exists() {
        return Ok(MusterConfig::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}
