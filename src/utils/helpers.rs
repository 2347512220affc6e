/// Helper utilities shared across the backup engine

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, DirEntry};
use std::path::Path;

use crate::utils::{BACKUP_ID_FORMAT, BACKUP_PREFIX};

/// List a directory's entries sorted by file name.
///
/// Every traversal in the engine goes through here so processing order never
/// depends on what the filesystem happens to return.
pub fn sorted_entries<P: AsRef<Path>>(dir: P) -> Result<Vec<DirEntry>> {
    let dir = dir.as_ref();
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to list directory {}", dir.display()))?;

    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

/// Normalize a directory name into the project name Compose would derive from it
pub fn normalize_project_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
        .collect()
}

/// Backup set directory name for a point in time. UTC, so ids never repeat or
/// go backwards across daylight saving changes.
pub fn backup_id_at(time: DateTime<Utc>) -> String {
    format!("{}{}", BACKUP_PREFIX, time.format(BACKUP_ID_FORMAT))
}

/// Whether a file name is hidden (dot-prefixed)
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Format bytes to human-readable size
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Size of a file in bytes, 0 if it cannot be read
pub fn file_size<P: AsRef<Path>>(path: P) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Create `path` if needed and check that a file can actually be created in it.
///
/// Permission bits alone do not say whether the current user may write, so a
/// marker file is created and removed.
pub fn ensure_writable_dir<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    let path = path.as_ref();
    fs::create_dir_all(path)?;

    let marker = path.join(format!(".stackvault-write-check-{}", std::process::id()));
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&marker)?;
    fs::remove_file(&marker)
}
