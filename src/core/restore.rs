/// Restore orchestration
///
/// Select a backup set, then per project: extract its tree under the target
/// root, put its composition and environment files back under their canonical
/// names, and import its volumes. Projects are started only after every
/// project has been restored.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::core::archive;
use crate::core::discovery::Project;
use crate::core::error::{RunError, RunResult};
use crate::core::lifecycle::LifecycleController;
use crate::core::manifest::{plan_from_layout, BackupManifest, ManifestProject};
use crate::core::outcome::{ProjectState, RunKind, RunOutcome, RunReport};
use crate::core::platform::Platform;
use crate::core::selector::{select_backup, BackupSet};
use crate::core::volume::import_volume;
use crate::utils::{ensure_writable_dir, CANONICAL_COMPOSE_FILE, ENV_FILE_NAME};

pub struct RestoreManager<'a, P: Platform> {
    platform: &'a P,
    backup_root: PathBuf,
    target_root: PathBuf,
}

impl<'a, P: Platform> RestoreManager<'a, P> {
    pub fn new(platform: &'a P, backup_root: impl Into<PathBuf>, target_root: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            backup_root: backup_root.into(),
            target_root: target_root.into(),
        }
    }

    /// Restore `backup_path`, or the newest backup set when none is given
    pub async fn restore(&self, backup_path: Option<&Path>) -> RunResult<RunReport> {
        let started = Instant::now();

        // Nothing is touched until the backup set is known to be usable
        let set = select_backup(&self.backup_root, backup_path)?;
        info!(backup = %set.path.display(), "Selected backup set");

        self.platform
            .ping()
            .await
            .map_err(|e| RunError::PlatformUnreachable(format!("{:#}", e)))?;

        ensure_writable_dir(&self.target_root).map_err(|source| RunError::RootUnavailable {
            path: self.target_root.clone(),
            source,
        })?;

        let plan = self.plan(&set)?;
        info!(count = plan.len(), "Projects to restore");

        let mut outcome = RunOutcome::new();
        let mut restored = Vec::new();

        for entry in &plan {
            info!(project = %entry.name, "Restoring project");
            if let Some(project) = self.restore_project(&set, entry, &mut outcome).await {
                restored.push(project);
            }
        }

        LifecycleController::new(self.platform)
            .start_restored(&restored, &mut outcome)
            .await;

        Ok(RunReport {
            kind: RunKind::Restore,
            backup_set: set.path,
            outcome,
            elapsed: started.elapsed(),
        })
    }

    fn plan(&self, set: &BackupSet) -> RunResult<Vec<ManifestProject>> {
        let invalid = |e: anyhow::Error| RunError::InvalidBackup {
            path: set.path.clone(),
            reason: format!("{:#}", e),
        };

        match BackupManifest::load(set).map_err(invalid)? {
            Some(manifest) => Ok(manifest.projects),
            None => {
                warn!(backup = %set.id, "No manifest, recovering projects from file names");
                plan_from_layout(set).map_err(invalid)
            }
        }
    }

    /// Restore one project. Returns the project to start, or `None` if its
    /// tree could not be restored.
    async fn restore_project(
        &self,
        set: &BackupSet,
        entry: &ManifestProject,
        outcome: &mut RunOutcome,
    ) -> Option<Project> {
        let name = entry.name.as_str();
        outcome.track(name);

        let project_dir = match self.restore_tree(set, entry) {
            Ok(dir) => {
                outcome.step_ok(name, "tree");
                dir
            }
            Err(e) => {
                error!(project = %name, error = %format!("{:#}", e), "Tree restore failed");
                outcome.step_failed(name, "tree", &e);
                outcome.set_state(name, ProjectState::RestoreFailed);
                return None;
            }
        };

        match &entry.compose_file {
            Some(compose) => {
                let source = set.compose_dir().join(&compose.artifact);
                match copy_artifact(&source, &project_dir.join(CANONICAL_COMPOSE_FILE)) {
                    Ok(()) => outcome.step_ok(name, "compose"),
                    Err(e) => {
                        error!(project = %name, error = %format!("{:#}", e), "Compose file restore failed");
                        outcome.step_failed(name, "compose", &e);
                    }
                }
            }
            None => outcome.warn(name, "no composition file in backup"),
        }

        if let Some(env_file) = &entry.env_file {
            let source = set.compose_dir().join(env_file);
            match copy_artifact(&source, &project_dir.join(ENV_FILE_NAME)) {
                Ok(()) => outcome.step_ok(name, "env"),
                Err(e) => {
                    error!(project = %name, error = %format!("{:#}", e), "Env file restore failed");
                    outcome.step_failed(name, "env", &e);
                }
            }
        }

        let project = match Project::from_dir(&project_dir) {
            Ok(project) => project,
            Err(e) => {
                outcome.step_failed(name, "tree", &e);
                outcome.set_state(name, ProjectState::RestoreFailed);
                return None;
            }
        };

        // Volumes keep the label recorded at backup time, so Compose adopts them
        let compose_project = entry
            .compose_project
            .clone()
            .unwrap_or_else(|| project.compose_project.clone());

        for volume in &entry.volumes {
            let step = format!("volume {}", volume.name);
            let archive_path = set.volumes_dir().join(&volume.archive);

            match import_volume(self.platform, &volume.name, &compose_project, &archive_path).await {
                Ok(()) => outcome.step_ok(name, step),
                Err(e) => {
                    error!(project = %name, volume = %volume.name, error = %format!("{:#}", e), "Volume import failed");
                    outcome.step_failed(name, step, &e);
                }
            }
        }

        outcome.set_state(name, ProjectState::Restored);
        Some(project)
    }

    /// Extract the project tree, or create an empty project directory when the
    /// backup has no tree archive. Returns the project directory.
    fn restore_tree(&self, set: &BackupSet, entry: &ManifestProject) -> Result<PathBuf> {
        let Some(tree_archive) = &entry.tree_archive else {
            warn!(project = %entry.name, "No tree archive, restoring into an empty directory");
            let dir = self.target_root.join(&entry.name);
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            return Ok(dir);
        };

        let archive_path = set.projects_dir().join(tree_archive);
        let roots = archive::root_entries(&archive_path)?;

        // Archives hold one directory named after the project; older ones may
        // name it differently, in which case that name wins
        let dir_name = match roots.as_slice() {
            [root] if *root != entry.name => {
                warn!(project = %entry.name, root = %root, "Tree archive root differs from project name");
                root.clone()
            }
            _ => entry.name.clone(),
        };

        archive::unpack(&archive_path, &self.target_root)?;

        let dir = self.target_root.join(dir_name);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir)
    }
}

fn copy_artifact(source: &Path, destination: &Path) -> Result<()> {
    fs::copy(source, destination).with_context(|| {
        format!(
            "Failed to copy {} to {}",
            source.display(),
            destination.display()
        )
    })?;
    Ok(())
}
