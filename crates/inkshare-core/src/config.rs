//! Whiteboard configuration.

use crate::primitives::SerializableColor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for one whiteboard session.
///
/// Every field has a default, so a config file only needs the keys it
/// changes:
/// ```json
/// { "collection": "team-board", "width": 3 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhiteboardConfig {
    /// Name of the shared collection to draw into.
    pub collection: String,
    /// Initial brush color.
    pub color: SerializableColor,
    /// Initial brush width.
    pub width: f64,
    /// Extra distance around outlines that still counts as a hit.
    pub hit_tolerance: f64,
    /// Relay server to connect to, e.g. `ws://localhost:3030/ws`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
}

impl Default for WhiteboardConfig {
    fn default() -> Self {
        Self {
            collection: "drawings".to_string(),
            color: SerializableColor::black(),
            width: 5.0,
            hit_tolerance: 4.0,
            relay_url: None,
        }
    }
}

impl WhiteboardConfig {
    /// Read a config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Default config location.
    ///
    /// On Linux: `~/.config/inkshare/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir()
            .or_else(dirs::home_dir)
            .map(|base| base.join("inkshare").join("config.json"))
    }

    /// Load from the default location, falling back to defaults when the
    /// file is missing or unusable.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("Ignoring config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, json).map_err(|e| ConfigError::Io(e.to_string()))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.collection.trim().is_empty() {
            return Err(ConfigError::Invalid("collection must not be empty".into()));
        }
        if !(self.width.is_finite() && self.width > 0.0) {
            return Err(ConfigError::Invalid(format!("width must be positive, got {}", self.width)));
        }
        if !(self.hit_tolerance.is_finite() && self.hit_tolerance >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "hit_tolerance must not be negative, got {}",
                self.hit_tolerance
            )));
        }
        Ok(())
    }
}
