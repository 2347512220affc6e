/// Backup sets and backup selection
///
/// A backup set is a `docker-backup-<timestamp>` directory holding `projects/`,
/// `compose/` and `volumes/`. It is valid iff all three exist as directories.
/// Identifiers sort lexicographically in chronological order.

use anyhow::Result;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::core::error::{RunError, RunResult};
use crate::utils::{sorted_entries, COMPOSE_DIR, MANIFEST_FILE, PROJECTS_DIR, VOLUMES_DIR};

fn backup_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^docker-backup-\d{4}-\d{2}-\d{2}(_\d{2}-\d{2}-\d{2})?$")
            .expect("backup id pattern is valid")
    })
}

/// Whether a directory name follows the backup set naming convention
pub fn is_backup_id(name: &str) -> bool {
    backup_id_pattern().is_match(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSet {
    pub id: String,
    pub path: PathBuf,
}

impl BackupSet {
    /// Open an existing backup set, checking its structure
    pub fn open(path: &Path) -> RunResult<Self> {
        let invalid = |reason: String| RunError::InvalidBackup {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_dir() {
            return Err(invalid("not a directory".to_string()));
        }

        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| invalid("path has no directory name".to_string()))?;

        let set = Self {
            id,
            path: path.to_path_buf(),
        };

        if let Some(missing) = set.missing_dirs().first() {
            return Err(invalid(format!("missing {}/ directory", missing)));
        }

        Ok(set)
    }

    /// Create a fresh, empty backup set under `root`.
    ///
    /// Fails if the set already exists; two runs writing the same set is not
    /// supported.
    pub fn create(root: &Path, id: &str) -> RunResult<Self> {
        let set = Self {
            id: id.to_string(),
            path: root.join(id),
        };

        fs::create_dir(&set.path).map_err(|source| RunError::WriteFailed {
            path: set.path.clone(),
            source,
        })?;

        for dir in [set.projects_dir(), set.compose_dir(), set.volumes_dir()] {
            fs::create_dir(&dir).map_err(|source| RunError::WriteFailed { path: dir, source })?;
        }

        Ok(set)
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.path.join(PROJECTS_DIR)
    }

    pub fn compose_dir(&self) -> PathBuf {
        self.path.join(COMPOSE_DIR)
    }

    pub fn volumes_dir(&self) -> PathBuf {
        self.path.join(VOLUMES_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    fn missing_dirs(&self) -> Vec<&'static str> {
        [PROJECTS_DIR, COMPOSE_DIR, VOLUMES_DIR]
            .into_iter()
            .filter(|dir| !self.path.join(dir).is_dir())
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.missing_dirs().is_empty()
    }
}

/// Valid backup sets under `root`, oldest first
pub fn list_backups(root: &Path) -> Result<Vec<BackupSet>> {
    let mut sets = Vec::new();

    for entry in sorted_entries(root)? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_backup_id(&name) || !entry.path().is_dir() {
            continue;
        }

        let set = BackupSet {
            id: name,
            path: entry.path(),
        };
        if set.is_valid() {
            sets.push(set);
        } else {
            warn!(backup = %set.id, missing = ?set.missing_dirs(), "Ignoring incomplete backup set");
        }
    }

    sets.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sets)
}

/// Pick the backup set to restore.
///
/// An explicit path must be a valid set; there is no fallback to auto-selection.
/// Without one, the newest valid set under `root` wins.
pub fn select_backup(root: &Path, explicit: Option<&Path>) -> RunResult<BackupSet> {
    if let Some(path) = explicit {
        return BackupSet::open(path);
    }

    let sets = list_backups(root).map_err(|e| {
        debug!(error = %format!("{:#}", e), "Backup root not readable");
        RunError::NoBackupFound {
            root: root.to_path_buf(),
        }
    })?;

    sets.into_iter().last().ok_or_else(|| RunError::NoBackupFound {
        root: root.to_path_buf(),
    })
}
