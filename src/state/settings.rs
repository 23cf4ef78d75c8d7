//! Persistent application settings
//!
//! Stored as JSON in the user's config directory:
//! - Linux: ~/.config/image-captioner/settings.json
//! - macOS: ~/Library/Application Support/image-captioner/settings.json
//! - Windows: %APPDATA%\image-captioner\settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::SettingsError;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// How often the UI drains finished captions (milliseconds)
    pub poll_interval_ms: u64,

    /// How long the worker blocks on an empty queue before re-checking (milliseconds)
    pub worker_idle_timeout_ms: u64,

    /// Bounding box for the on-screen preview (pixels)
    pub preview_size: u32,

    /// Square input size fed to the model (pixels)
    pub model_input_size: u32,

    /// Image extensions to list, without the dot
    pub extensions: Vec<String>,

    /// Directory opened last time, if any
    pub last_directory: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            worker_idle_timeout_ms: 500,
            preview_size: 512,
            model_input_size: 224,
            extensions: ["png", "jpg", "jpeg", "bmp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            last_directory: None,
        }
    }
}

impl Settings {
    /// Convert to a JSON string for storage
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from a JSON string; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn worker_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_idle_timeout_ms.max(1))
    }

    /// Get the path where settings should be stored
    pub fn path() -> Result<PathBuf, SettingsError> {
        let mut path = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or(SettingsError::NoConfigDir)?;

        path.push("image-captioner");
        path.push("settings.json");
        Ok(path)
    }

    /// Load settings from disk, falling back to defaults
    ///
    /// A missing file is expected on first run; a corrupt one is logged and ignored.
    pub fn load_or_default() -> Self {
        match Self::path().and_then(|path| Self::load_from(&path)) {
            Ok(Some(settings)) => settings,
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!("⚠️  Using default settings: {}", e);
                Self::default()
            }
        }
    }

    fn load_from(path: &PathBuf) -> Result<Option<Self>, SettingsError> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };
        Ok(Some(Self::from_json(&json)?))
    }

    /// Save settings to the config directory
    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&Self::path()?)
    }

    fn save_to(&self, path: &PathBuf) -> Result<(), SettingsError> {
        let io_err = |source: std::io::Error| SettingsError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, self.to_json()?).map_err(io_err)?;

        tracing::debug!("💾 Settings saved to {}", path.display());
        Ok(())
    }
}
