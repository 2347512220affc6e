/// Backup manifest
///
/// `manifest.json` records which artifact belongs to which project so restore
/// never has to recover project identity from file names. Backup sets written
/// without one (older layouts) are still restorable through the file naming
/// convention in `plan_from_layout`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::core::selector::BackupSet;
use crate::utils::{
    normalize_project_name, sorted_entries, ARCHIVE_EXTENSION, COMPOSE_FILE_CANDIDATES,
    MANIFEST_VERSION, TREE_ARCHIVE_SUFFIX,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub version: u32,
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub source_root: PathBuf,
    pub projects: Vec<ManifestProject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestProject {
    pub name: String,
    /// Compose project label; unknown for sets restored from file names
    #[serde(default)]
    pub compose_project: Option<String>,
    /// File name under `projects/`
    #[serde(default)]
    pub tree_archive: Option<String>,
    #[serde(default)]
    pub compose_file: Option<ComposeArtifact>,
    /// File name under `compose/`
    #[serde(default)]
    pub env_file: Option<String>,
    #[serde(default)]
    pub volumes: Vec<VolumeArtifact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeArtifact {
    /// File name under `compose/`
    pub artifact: String,
    /// Basename the file had in the project directory
    pub original_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeArtifact {
    pub name: String,
    /// File name under `volumes/`
    pub archive: String,
}

impl BackupManifest {
    pub fn new(backup_id: &str, source_root: &Path) -> Self {
        Self {
            version: MANIFEST_VERSION,
            backup_id: backup_id.to_string(),
            created_at: Utc::now(),
            source_root: source_root.to_path_buf(),
            projects: Vec::new(),
        }
    }

    pub fn project_mut(&mut self, name: &str) -> &mut ManifestProject {
        let index = match self.projects.iter().position(|p| p.name == name) {
            Some(index) => index,
            None => {
                self.projects.push(ManifestProject {
                    name: name.to_string(),
                    ..Default::default()
                });
                self.projects.len() - 1
            }
        };

        &mut self.projects[index]
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
    }

    /// Load the manifest of a backup set, `None` if the set has none
    pub fn load(set: &BackupSet) -> Result<Option<Self>> {
        let path = set.manifest_path();
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let manifest = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok(Some(manifest))
    }
}

fn env_artifact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.+)-env(\.[^/]*)?\.env$").expect("env pattern is valid"))
}

fn tree_archive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(.+)-project(-[^-/]+)?\.tar\.gz$").expect("tree pattern is valid")
    })
}

/// Rebuild per-project artifact lists from file names alone.
///
/// Project names containing the separators used by the convention can be
/// ambiguous. A volume archive matching more than one project goes to the
/// longest matching name.
pub fn plan_from_layout(set: &BackupSet) -> Result<Vec<ManifestProject>> {
    let mut projects: BTreeMap<String, ManifestProject> = BTreeMap::new();

    for file in sorted_entries(set.projects_dir())? {
        let file_name = file.file_name().to_string_lossy().to_string();
        let name = match file_name.strip_suffix(TREE_ARCHIVE_SUFFIX) {
            Some(name) => Some(name.to_string()),
            None => tree_archive_pattern()
                .captures(&file_name)
                .map(|c| c[1].to_string()),
        };

        match name {
            Some(name) => entry(&mut projects, &name).tree_archive = Some(file_name),
            None => debug!(file = %file_name, "Unrecognised file in projects/"),
        }
    }

    for file in sorted_entries(set.compose_dir())? {
        let file_name = file.file_name().to_string_lossy().to_string();

        if let Some(captures) = env_artifact_pattern().captures(&file_name) {
            entry(&mut projects, &captures[1]).env_file = Some(file_name.clone());
            continue;
        }

        let compose = COMPOSE_FILE_CANDIDATES.iter().find_map(|basename| {
            file_name
                .strip_suffix(basename)
                .and_then(|rest| rest.strip_suffix('-'))
                .filter(|name| !name.is_empty())
                .map(|name| (name.to_string(), basename.to_string()))
        });

        match compose {
            Some((name, original_name)) => {
                entry(&mut projects, &name).compose_file = Some(ComposeArtifact {
                    artifact: file_name,
                    original_name,
                })
            }
            None => debug!(file = %file_name, "Unrecognised file in compose/"),
        }
    }

    let names: Vec<String> = projects.keys().cloned().collect();
    for file in sorted_entries(set.volumes_dir())? {
        let file_name = file.file_name().to_string_lossy().to_string();
        let Some(volume) = file_name.strip_suffix(ARCHIVE_EXTENSION) else {
            debug!(file = %file_name, "Unrecognised file in volumes/");
            continue;
        };

        let mut owners: Vec<&String> = names
            .iter()
            .filter(|name| {
                volume.starts_with(&format!("{}_", name))
                    || volume.starts_with(&format!("{}_", normalize_project_name(name)))
            })
            .collect();
        owners.sort_by_key(|name| std::cmp::Reverse(name.len()));

        match owners.as_slice() {
            [] => warn!(file = %file_name, "Volume archive matches no project; skipped"),
            [owner, rest @ ..] => {
                if !rest.is_empty() {
                    warn!(file = %file_name, owner = %owner, "Volume archive matches several projects; using the longest name");
                }
                entry(&mut projects, owner).volumes.push(VolumeArtifact {
                    name: volume.to_string(),
                    archive: file_name.clone(),
                });
            }
        }
    }

    Ok(projects.into_values().collect())
}

fn entry<'a>(projects: &'a mut BTreeMap<String, ManifestProject>, name: &str) -> &'a mut ManifestProject {
    projects
        .entry(name.to_string())
        .or_insert_with(|| ManifestProject {
            name: name.to_string(),
            ..Default::default()
        })
}
