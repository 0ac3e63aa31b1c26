use anyhow::{Context, Result};
use chrono::Duration;
use std::path::{Path, PathBuf};

use site_limits::platform;
use site_limits::settings::Settings;
use site_limits::{JsonFileStore, RateLimiter, SharedStore, SiteGuard};

/// Initialize logging on stderr
///
/// `RUST_LOG` wins over `--verbose`, which wins over the configured level.
pub fn init_logging(verbose: bool, level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if verbose { "debug" } else { level };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

/// Settings and state location for this invocation
pub struct Environment {
    pub settings: Settings,
    pub state_path: PathBuf,
}

/// Settings file from `--config`, falling back to the platform default
pub fn settings_path(config: Option<PathBuf>) -> Result<PathBuf> {
    match config {
        Some(path) => Ok(path),
        None => platform::default_settings_path(),
    }
}

impl Environment {
    pub fn load(settings_path: &Path, state: Option<PathBuf>) -> Result<Self> {
        let settings = Settings::load(settings_path).context("Failed to load settings")?;

        let state_path = match state {
            Some(path) => path,
            None => settings.state_path()?,
        };

        Ok(Self {
            settings,
            state_path,
        })
    }

    pub fn store(&self) -> SharedStore<JsonFileStore> {
        SharedStore::new(JsonFileStore::new(&self.state_path))
    }

    pub fn guard(&self) -> SiteGuard<JsonFileStore> {
        SiteGuard::new(
            self.store(),
            RateLimiter::new(
                self.settings.security.max_unlock_attempts,
                self.settings.security.attempt_window_secs,
            ),
        )
    }
}

/// Format duration for display
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d", secs / 86400)
    }
}
