//! Application settings

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cart_link::LinkConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Discovery, handshake and retry tuning
    pub link: LinkConfig,
    /// Arguments passed to every launched executable
    pub launch_args: Vec<String>,
}

impl Settings {
    /// Get the XDG config directory for cart-monitor
    /// Uses $XDG_CONFIG_HOME/cart-monitor, falls back to ~/.config/cart-monitor
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("cart-monitor"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("cart-monitor"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            return Self::default();
        };
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring settings file: {:#}", e);
                Self::default()
            }
        }
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Save settings to disk, returning where they went
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::settings_path().context("could not determine settings path")?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save settings to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(self).context("failed to serialize settings")?;
        std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("cart-monitor-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_save_and_load() {
        let path = scratch("saved/settings.json");
        let mut settings = Settings::default();
        settings.link.auto_launch = false;
        settings.launch_args = vec!["--fullscreen".to_string()];

        settings.save_to(&path).unwrap();
        let loaded = Settings::load_from(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let path = scratch("partial.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"link": {"scan_interval_ms": 500}}"#).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.link.scan_interval_ms, 500);
        assert_eq!(loaded.link.max_reconnect_attempts, 3);
        assert!(loaded.launch_args.is_empty());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let path = scratch("broken.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let result = Settings::load_from(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }
}
