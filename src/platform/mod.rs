/// Atomic writes, lock files and private directories
pub mod common;

use anyhow::Result;
use std::path::PathBuf;

const SETTINGS_FILE: &str = "settings.toml";
const STATE_FILE: &str = "state.json";

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "site-limits")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Default location of the settings file
pub fn default_settings_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join(SETTINGS_FILE))
}

/// Default location of the persisted state document
pub fn default_state_path() -> Result<PathBuf> {
    Ok(project_dirs()?.data_local_dir().join(STATE_FILE))
}
