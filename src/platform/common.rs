use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically replace the contents of a file
///
/// Writes to a uniquely named sibling temporary file, syncs it to disk, then
/// renames it over the target so readers never observe a partially written
/// state file. Concurrent writers never share a temporary file.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = parent_dir(path)?;

    let mut file = NamedTempFile::new_in(dir).with_context(|| {
        format!("Failed to create temporary file in: {}", dir.display())
    })?;

    file.write_all(content)
        .context("Failed to write to temporary file")?;

    file.as_file()
        .sync_all()
        .context("Failed to sync file to disk")?;

    file.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(())
}

/// Take an exclusive advisory lock on `path`, creating it if needed
///
/// Blocks until no other handle holds the lock; the lock is released when
/// the returned file is dropped.
pub fn lock_exclusive(path: &Path) -> Result<File> {
    parent_dir(path)?;

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

    file.lock()
        .with_context(|| format!("Failed to lock: {}", path.display()))?;

    Ok(file)
}

/// Directory holding `path`, created if missing
fn parent_dir(path: &Path) -> Result<&Path> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            ensure_directory_exists(parent)?;
            Ok(parent)
        }
        _ => Ok(Path::new(".")),
    }
}

/// Ensure a directory exists, creating it and all parents if needed
///
/// Directories created here are private to the current user (Unix only).
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;

    set_owner_only(path)
}

fn set_owner_only(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = std::fs::metadata(path)
            .with_context(|| format!("Failed to get metadata for: {}", path.display()))?
            .permissions();
        permissions.set_mode(0o700);

        std::fs::set_permissions(path, permissions)
            .with_context(|| format!("Failed to set permissions for: {}", path.display()))?;
    }

    Ok(())
}
