use anyhow::{Context, Result};
use std::path::Path;

use site_limits::settings::Settings;

/// Write the default settings to `path`
///
/// An existing file is only replaced with `force`.
pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Settings file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    Settings::default()
        .save(path)
        .context("Failed to write default settings")?;

    println!("✓ Wrote default settings to {}", path.display());
    Ok(())
}
