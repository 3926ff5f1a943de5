//! Vault settings management
//!
//! Stores non-sensitive configuration in a plain JSON file next to the vault.
//! Settings are accessible even when the vault is locked.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, VaultError};
use crate::session::SessionConfig;

const SETTINGS_FILE_NAME: &str = "settings.json";

/// Vault settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultSettings {
    /// Settings file version
    pub version: u32,
    /// Idle time before the session locks, in seconds (0 = never)
    pub auto_lock_timeout_secs: u64,
    /// Interval between idle checks, in milliseconds
    pub idle_poll_interval_ms: u64,
    /// Consecutive failed unlocks before the session terminates (0 = unlimited)
    pub max_failed_unlocks: u32,
    /// Delay before a copied secret is cleared from the clipboard, in seconds
    pub clipboard_clear_secs: u64,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultSettings {
    /// Create default settings
    pub fn new() -> Self {
        Self {
            version: 1,
            auto_lock_timeout_secs: 120,
            idle_poll_interval_ms: 1_000,
            max_failed_unlocks: 3,
            clipboard_clear_secs: 10,
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.auto_lock_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn clipboard_clear_after(&self) -> Duration {
        Duration::from_secs(self.clipboard_clear_secs)
    }

    /// Session tuning derived from these settings
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: self.idle_timeout(),
            poll_interval: self.poll_interval(),
            max_failed_unlocks: self.max_failed_unlocks,
        }
    }
}

/// Settings manager
pub struct SettingsManager {
    settings_file: PathBuf,
    settings: VaultSettings,
}

impl SettingsManager {
    /// Load settings from `storage_dir`, falling back to defaults
    pub fn new(storage_dir: &Path) -> Self {
        let settings_file = storage_dir.join(SETTINGS_FILE_NAME);
        let settings = match Self::load_from_file(&settings_file) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring unreadable settings file: {}", e);
                VaultSettings::new()
            }
        };

        Self {
            settings_file,
            settings,
        }
    }

    fn load_from_file(path: &Path) -> Result<VaultSettings> {
        if !path.exists() {
            debug!("No settings file found, using defaults");
            return Ok(VaultSettings::new());
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: VaultSettings = serde_json::from_str(&contents)?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub async fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.settings)?;

        if let Some(parent) = self.settings_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write atomically using temp file
        let temp_path = self.settings_file.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &self.settings_file).await?;

        debug!("Saved settings to {:?}", self.settings_file);
        Ok(())
    }

    pub fn get(&self) -> &VaultSettings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut VaultSettings {
        &mut self.settings
    }

    /// Update settings and save
    pub async fn update(&mut self, settings: VaultSettings) -> Result<()> {
        self.settings = settings;
        self.save().await
    }

    /// Set the idle timeout and save
    pub async fn set_auto_lock_timeout(&mut self, secs: u64) -> Result<()> {
        self.settings.auto_lock_timeout_secs = secs;
        self.save().await
    }

    pub fn settings_file(&self) -> &Path {
        &self.settings_file
    }

    /// Reset settings to defaults and delete the settings file
    pub async fn reset(&mut self) -> Result<()> {
        self.settings = VaultSettings::new();

        if self.settings_file.exists() {
            tokio::fs::remove_file(&self.settings_file)
                .await
                .map_err(|e| VaultError::Storage(e.to_string()))?;
        }

        Ok(())
    }
}
