//! Monitoring configuration (TOML)

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::present::OutputMode;
use crate::sort::SortKey;
use crate::types::{EngineMap, EngineView};

/// Default sampling period in milliseconds
pub const DEFAULT_PERIOD_MS: u64 = 2000;

/// Settings for a monitoring session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Time between scans in milliseconds
    pub period_ms: u64,
    /// Dashboard or structured output
    pub mode: OutputMode,
    /// Order of clients within a device
    pub sort: SortKey,
    /// Aggregated or physical engine utilisation
    pub view: EngineView,
    /// List clients which never used an engine
    pub show_idle: bool,
    /// Overlay percentages on the dashboard bars
    pub numbers: bool,
    /// Fold all clients of a process into one row
    pub aggregate_pid: bool,
    /// Only track clients of devices matching this driver, PCI address or node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Fixed engine map; engine names are detected per client when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engines: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            period_ms: DEFAULT_PERIOD_MS,
            mode: OutputMode::default(),
            sort: SortKey::default(),
            view: EngineView::default(),
            show_idle: false,
            numbers: false,
            aggregate_pid: false,
            device: None,
            engines: None,
        }
    }
}

impl Config {
    /// Read a configuration file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::invalid_config(e.to_string()))
    }

    /// Reject settings that could never produce a sample
    pub fn validate(&self) -> Result<()> {
        if self.period_ms == 0 {
            return Err(Error::invalid_config("sampling period must be non-zero"));
        }
        if let Some(engines) = &self.engines {
            if engines.is_empty() {
                return Err(Error::NoEngines);
            }
            if engines.iter().any(|e| e.is_empty()) {
                return Err(Error::invalid_config("engine names must not be empty"));
            }
        }
        Ok(())
    }

    /// Sampling period as a duration
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Engine map shared by all clients, if one was configured
    pub fn engine_map(&self) -> Option<EngineMap> {
        self.engines.as_ref().map(EngineMap::new)
    }
}
