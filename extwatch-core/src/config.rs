//! Watch configuration
//!
//! Every key is optional; anything missing from the TOML file falls back
//! to [`WatchConfig::default`].

use crate::error::{Result, WatchError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Configuration for a watch session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiescence window before a batch is flushed
    pub debounce_ms: u64,
    /// App configuration file name at the project root
    pub app_config_file: String,
    /// Filename suffix that marks an extension manifest
    pub manifest_suffix: String,
    /// Lock file written by scaffolding tooling while an extension is generated
    pub lock_file: String,
    /// Per-extension ignore file
    pub ignore_file: String,
    /// Glob patterns dropped before any classification happens
    pub excluded: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            app_config_file: "shopify.app.toml".to_string(),
            manifest_suffix: ".extension.toml".to_string(),
            lock_file: ".shopify.lock".to_string(),
            ignore_file: ".gitignore".to_string(),
            excluded: vec![
                "**/node_modules/**".to_string(),
                "**/.git/**".to_string(),
                "**/*.test.*".to_string(),
                "**/dist/**".to_string(),
                "**/*.swp".to_string(),
                "**/generated/**".to_string(),
            ],
        }
    }
}

impl WatchConfig {
    /// Parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WatchError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: WatchConfig = toml::from_str(&content)?;
        config.validate()?;
        debug!("Loaded watch configuration from {:?}", path);
        Ok(config)
    }

    /// Load from `path` if given, otherwise use the defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Override the debounce window, e.g. from a command line flag
    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.manifest_suffix.is_empty() {
            return Err(WatchError::Config("manifest_suffix must not be empty".to_string()));
        }
        if self.lock_file.is_empty() || self.ignore_file.is_empty() {
            return Err(WatchError::Config(
                "lock_file and ignore_file must not be empty".to_string(),
            ));
        }
        if self.app_config_file.is_empty() {
            return Err(WatchError::Config("app_config_file must not be empty".to_string()));
        }
        Ok(())
    }
}
