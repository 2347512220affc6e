/// Application configuration management
/// Stores default roots in ~/.config/stackvault/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::{DEFAULT_BACKUP_ROOT, DEFAULT_MOVER_IMAGE, DEFAULT_RESTORE_ROOT, DEFAULT_SOURCE_ROOT};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub source_root: Option<PathBuf>,
    pub backup_root: Option<PathBuf>,
    pub restore_root: Option<PathBuf>,
    pub mover_image: Option<String>,
}

/// Values given on the command line or through the environment
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub source_root: Option<PathBuf>,
    pub backup_root: Option<PathBuf>,
    pub restore_root: Option<PathBuf>,
    pub mover_image: Option<String>,
}

/// Fully resolved settings for one run
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub source_root: PathBuf,
    pub backup_root: PathBuf,
    pub restore_root: PathBuf,
    pub mover_image: String,
}

impl AppConfig {
    /// Get default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("stackvault");
        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from a file; a missing file yields the empty config
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to a file, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Merge overrides over the file values, then fall back to built-in defaults
    pub fn resolve(&self, overrides: Overrides) -> Settings {
        Settings {
            source_root: overrides
                .source_root
                .or_else(|| self.source_root.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_ROOT)),
            backup_root: overrides
                .backup_root
                .or_else(|| self.backup_root.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_ROOT)),
            restore_root: overrides
                .restore_root
                .or_else(|| self.restore_root.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESTORE_ROOT)),
            mover_image: overrides
                .mover_image
                .or_else(|| self.mover_image.clone())
                .unwrap_or_else(|| DEFAULT_MOVER_IMAGE.to_string()),
        }
    }
}

impl From<&Settings> for AppConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            source_root: Some(settings.source_root.clone()),
            backup_root: Some(settings.backup_root.clone()),
            restore_root: Some(settings.restore_root.clone()),
            mover_image: Some(settings.mover_image.clone()),
        }
    }
}
