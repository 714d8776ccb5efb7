use crate::cache::CacheConfig;
use crate::core::Scnl;
use crate::engine::GulperConfig;
use crate::error::{WaveError, WaveResult};
use crate::seedlink::SeedLinkConfig;
use crate::source::FdsnConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level settings; every section falls back to its defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuakewaveConfig {
    pub cache: CacheConfig,
    pub gulper: GulperConfig,
    pub seedlink: SeedLinkConfig,
    pub fdsn: Option<FdsnConfig>,

    /// Channels to stream, `STA CHA NET [LOC]`
    pub channels: Vec<String>,
}

impl QuakewaveConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse configuration")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .context(format!("Failed to read configuration from {:?}", path))?;
        Self::from_json(&json).context(format!("Failed to load {:?}", path))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize configuration")
    }

    pub fn validate(&self) -> WaveResult<()> {
        self.cache.validate()?;
        self.gulper.validate()?;
        self.seedlink.validate()?;
        if let Some(fdsn) = &self.fdsn {
            fdsn.validate()?;
        }
        self.channel_list().map(|_| ())
    }

    pub fn channel_list(&self) -> WaveResult<Vec<Scnl>> {
        self.channels
            .iter()
            .map(|c| {
                Scnl::parse(c).map_err(|_| WaveError::config(format!("Invalid channel '{}'", c)))
            })
            .collect()
    }
}
