use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings, read from `settings.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub tracking: TrackingSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub blocking: BlockingSettings,

    #[serde(default)]
    pub security: SecuritySettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TrackingSettings {
    /// Seconds between heartbeats; each heartbeat counts one usage unit
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct StorageSettings {
    /// State document location (platform data directory when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BlockingSettings {
    /// Page blocked tabs are redirected to; `?domain=<domain>` is appended
    #[serde(default = "default_block_page_url")]
    pub block_page_url: String,
}

impl Default for BlockingSettings {
    fn default() -> Self {
        Self {
            block_page_url: default_block_page_url(),
        }
    }
}

fn default_block_page_url() -> String {
    "chrome-extension://site-limits/src/pages/blocked/blocked.html".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SecuritySettings {
    /// Code attempts allowed per window before further attempts are refused
    #[serde(default = "default_max_unlock_attempts")]
    pub max_unlock_attempts: usize,

    #[serde(default = "default_attempt_window")]
    pub attempt_window_secs: u64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            max_unlock_attempts: default_max_unlock_attempts(),
            attempt_window_secs: default_attempt_window(),
        }
    }
}

fn default_max_unlock_attempts() -> usize {
    5
}

fn default_attempt_window() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;

        settings
            .validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;

        Ok(settings)
    }

    /// Write settings as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;

        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;

        crate::platform::common::atomic_write(path, content.as_bytes())
            .with_context(|| format!("Failed to write settings file: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.tracking.heartbeat_interval_secs == 0 {
            anyhow::bail!("tracking.heartbeat_interval_secs must be at least 1");
        }

        url::Url::parse(&self.blocking.block_page_url).with_context(|| {
            format!(
                "blocking.block_page_url is not a valid URL: {}",
                self.blocking.block_page_url
            )
        })?;

        if self.security.max_unlock_attempts == 0 {
            anyhow::bail!("security.max_unlock_attempts must be at least 1");
        }

        if self.security.attempt_window_secs == 0 {
            anyhow::bail!("security.attempt_window_secs must be at least 1");
        }

        if self.logging.level.trim().is_empty() {
            anyhow::bail!("logging.level cannot be empty");
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.tracking.heartbeat_interval_secs)
    }

    /// State file from the settings, falling back to the platform default
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.storage.state_file {
            Some(path) => Ok(path.clone()),
            None => crate::platform::default_state_path(),
        }
    }
}
