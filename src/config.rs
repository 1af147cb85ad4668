//! Editor configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::constants::{config, editing};

/// Settings for the editor itself (not the edited settings)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Delay before an edit is written to the draft store
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Used when `LOG_LEVEL` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Settings store used when `--store` is not given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

fn default_debounce_ms() -> u64 {
    editing::DEBOUNCE_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            log_level: default_log_level(),
            store_path: None,
        }
    }
}

impl EditorConfig {
    fn config_dir() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(config::APP_DIR);
        path
    }

    pub fn path() -> PathBuf {
        Self::config_dir().join(config::FILENAME)
    }

    /// Load from the default location, creating it with defaults if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Config file not found, creating default config at {:?}", path);
            let config = EditorConfig::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let mut config: EditorConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse JSON from {:?}", path))?;
        config.validate_and_clamp();

        info!(debounce_ms = config.debounce_ms, log_level = %config.log_level, "Loaded config");
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize config to JSON")?;
        fs::write(path, json).with_context(|| format!("Failed to write config to {:?}", path))?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    fn validate_and_clamp(&mut self) {
        if self.debounce_ms > editing::MAX_DEBOUNCE_MS {
            warn!(
                debounce_ms = self.debounce_ms,
                max = editing::MAX_DEBOUNCE_MS,
                "debounce_ms exceeds maximum, clamping"
            );
            self.debounce_ms = editing::MAX_DEBOUNCE_MS;
        }

        if self.log_level.trim().is_empty() {
            warn!(using = %default_log_level(), "log_level is empty, using default");
            self.log_level = default_log_level();
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Configured store, or `settings.json` next to the config file
    pub fn store_path_or_default(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join(config::STORE_FILENAME))
    }
}
