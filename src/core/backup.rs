/// Backup orchestration
///
/// One run: discover projects, then for each project in order stop it, archive
/// its tree, copy its composition and environment files, and export its
/// volumes. Once every project is archived the stopped ones are restarted.
///
/// Per-project failures are recorded in the run outcome and never stop the
/// run. A fatal error restarts whatever this run already stopped before it is
/// returned.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::core::archive;
use crate::core::discovery::{discover_projects, resolve_volumes, Project};
use crate::core::error::{RunError, RunResult};
use crate::core::lifecycle::LifecycleController;
use crate::core::manifest::{BackupManifest, ComposeArtifact, VolumeArtifact};
use crate::core::outcome::{RunKind, RunOutcome, RunReport};
use crate::core::platform::Platform;
use crate::core::selector::BackupSet;
use crate::core::volume::export_volume;
use crate::utils::{backup_id_at, format_bytes, ensure_writable_dir, ARCHIVE_EXTENSION, ENV_ARTIFACT_SUFFIX, TREE_ARCHIVE_SUFFIX};

pub struct BackupManager<'a, P: Platform> {
    platform: &'a P,
    source_root: PathBuf,
    backup_root: PathBuf,
}

impl<'a, P: Platform> BackupManager<'a, P> {
    pub fn new(platform: &'a P, source_root: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            source_root: source_root.into(),
            backup_root: backup_root.into(),
        }
    }

    /// Back up every project under the source root into a new backup set
    pub async fn create_backup(&self) -> RunResult<RunReport> {
        let started = Instant::now();

        self.platform
            .ping()
            .await
            .map_err(|e| RunError::PlatformUnreachable(format!("{:#}", e)))?;

        if !self.source_root.is_dir() {
            return Err(RunError::RootUnavailable {
                path: self.source_root.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "source root does not exist"),
            });
        }

        ensure_writable_dir(&self.backup_root).map_err(|source| RunError::RootUnavailable {
            path: self.backup_root.clone(),
            source,
        })?;

        let set = BackupSet::create(&self.backup_root, &backup_id_at(Utc::now()))?;
        info!(backup = %set.path.display(), "Created backup set");

        let exclude: Vec<PathBuf> = self.backup_root.canonicalize().into_iter().collect();
        let projects = discover_projects(&self.source_root, &exclude).map_err(|e| {
            RunError::RootUnavailable {
                path: self.source_root.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, format!("{:#}", e)),
            }
        })?;
        info!(count = projects.len(), "Discovered projects");

        let lifecycle = LifecycleController::new(self.platform);
        let mut outcome = RunOutcome::new();

        // Any fatal error from here on first restarts what was already stopped
        if let Err(e) = self
            .archive_all(&lifecycle, &set, &projects, &exclude, &mut outcome)
            .await
        {
            error!(error = %e, "Backup aborted");
            lifecycle.rollback(&projects, &mut outcome).await;
            return Err(e);
        }

        lifecycle.restart_stopped(&projects, &mut outcome).await;

        Ok(RunReport {
            kind: RunKind::Backup,
            backup_set: set.path,
            outcome,
            elapsed: started.elapsed(),
        })
    }

    async fn archive_all(
        &self,
        lifecycle: &LifecycleController<'a, P>,
        set: &BackupSet,
        projects: &[Project],
        exclude: &[PathBuf],
        outcome: &mut RunOutcome,
    ) -> RunResult<()> {
        let mut manifest = BackupManifest::new(&set.id, &self.source_root);

        for project in projects {
            self.platform
                .ping()
                .await
                .map_err(|e| RunError::PlatformUnreachable(format!("{:#}", e)))?;

            info!(project = %project.name, "Backing up project");
            lifecycle.stop(project, outcome).await;
            self.archive_project(set, project, exclude, outcome, &mut manifest).await;
            outcome.mark_archived(&project.name);
        }

        let manifest_path = set.manifest_path();
        manifest
            .save(&manifest_path)
            .map_err(|source| RunError::WriteFailed {
                path: manifest_path,
                source,
            })?;

        Ok(())
    }

    async fn archive_project(
        &self,
        set: &BackupSet,
        project: &Project,
        exclude: &[PathBuf],
        outcome: &mut RunOutcome,
        manifest: &mut BackupManifest,
    ) {
        let name = project.name.as_str();
        manifest.project_mut(name).compose_project = Some(project.compose_project.clone());

        // Project tree
        let tree_name = format!("{}{}", name, TREE_ARCHIVE_SUFFIX);
        match archive::pack(&project.path, &set.projects_dir().join(&tree_name), exclude) {
            Ok(size) => {
                info!(project = %name, size = %format_bytes(size), "Project tree archived");
                outcome.step_ok(name, "tree");
                manifest.project_mut(name).tree_archive = Some(tree_name);
            }
            Err(e) => {
                error!(project = %name, error = %format!("{:#}", e), "Tree archive failed");
                outcome.step_failed(name, "tree", &e);
            }
        }

        // Composition file
        match (&project.compose_file, project.compose_basename()) {
            (Some(compose_file), Some(basename)) => {
                let artifact = format!("{}-{}", name, basename);
                match copy_artifact(compose_file, &set.compose_dir().join(&artifact)) {
                    Ok(()) => {
                        outcome.step_ok(name, "compose");
                        manifest.project_mut(name).compose_file = Some(ComposeArtifact {
                            artifact,
                            original_name: basename,
                        });
                    }
                    Err(e) => {
                        error!(project = %name, error = %format!("{:#}", e), "Compose file copy failed");
                        outcome.step_failed(name, "compose", &e);
                    }
                }
            }
            _ => {
                warn!(project = %name, "No composition file; archived as a plain tree");
                outcome.warn(name, "no composition file; archived as a plain tree");
            }
        }

        // Environment file
        match &project.env_file {
            Some(env_file) => {
                let artifact = format!("{}{}", name, ENV_ARTIFACT_SUFFIX);
                match copy_artifact(env_file, &set.compose_dir().join(&artifact)) {
                    Ok(()) => {
                        outcome.step_ok(name, "env");
                        manifest.project_mut(name).env_file = Some(artifact);
                    }
                    Err(e) => {
                        error!(project = %name, error = %format!("{:#}", e), "Env file copy failed");
                        outcome.step_failed(name, "env", &e);
                    }
                }
            }
            None => outcome.warn(name, "no .env file"),
        }

        // Volumes
        let volumes = match resolve_volumes(self.platform, project).await {
            Ok(volumes) => volumes,
            Err(e) => {
                error!(project = %name, error = %format!("{:#}", e), "Volume lookup failed");
                outcome.step_failed(name, "volumes", &e);
                return;
            }
        };

        if volumes.is_empty() {
            outcome.warn(name, "no owned volumes");
            return;
        }

        for volume in volumes {
            let archive_name = format!("{}{}", volume, ARCHIVE_EXTENSION);
            let step = format!("volume {}", volume);

            match export_volume(self.platform, &volume, &set.volumes_dir().join(&archive_name)).await {
                Ok(_) => {
                    outcome.step_ok(name, step);
                    manifest.project_mut(name).volumes.push(VolumeArtifact {
                        name: volume,
                        archive: archive_name,
                    });
                }
                Err(e) => {
                    error!(project = %name, volume = %volume, error = %format!("{:#}", e), "Volume export failed");
                    outcome.step_failed(name, step, &e);
                }
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::outcome::ProjectState;
    use crate::core::testing::{Call, FakePlatform};

    fn write_project(root: &Path, name: &str, compose: Option<&str>) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("data")).unwrap();
        fs::write(dir.join("data/readme.txt"), format!("{} data", name)).unwrap();
        if let Some(basename) = compose {
            fs::write(dir.join(basename), "services:\n  web:\n    image: nginx\n").unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_backup_layout_and_manifest() {
        let source = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        let shop = write_project(source.path(), "shop", Some("compose.yaml"));
        fs::write(shop.join(".env"), "TAG=1\n").unwrap();
        write_project(source.path(), "notes", None);

        let platform = FakePlatform::new();
        platform.add_volume("shop", "shop_db", &[("pg/base", b"rows".as_slice())]);

        let report = BackupManager::new(&platform, source.path(), backups.path())
            .create_backup()
            .await
            .unwrap();

        let set = BackupSet::open(&report.backup_set).unwrap();
        assert!(set.projects_dir().join("shop-project.tar.gz").is_file());
        assert!(set.projects_dir().join("notes-project.tar.gz").is_file());
        assert!(set.compose_dir().join("shop-compose.yaml").is_file());
        assert!(set.compose_dir().join("shop-env.env").is_file());
        assert!(set.volumes_dir().join("shop_db.tar.gz").is_file());

        let manifest = BackupManifest::load(&set).unwrap().unwrap();
        let shop_entry = manifest.projects.iter().find(|p| p.name == "shop").unwrap();
        assert_eq!(shop_entry.compose_file.as_ref().unwrap().original_name, "compose.yaml");
        assert_eq!(shop_entry.volumes[0].name, "shop_db");

        let notes = report.outcome.project("notes").unwrap();
        assert_eq!(notes.state, ProjectState::Archived);
        assert!(notes.warnings.iter().any(|w| w.contains("no composition file")));
        assert_eq!(report.outcome.project("shop").unwrap().state, ProjectState::Restarted);
        assert!(!report.is_degraded());
    }

    #[tokio::test]
    async fn test_stop_happens_before_export_and_restart_after_all_archiving() {
        let source = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        write_project(source.path(), "alpha", Some("docker-compose.yml"));
        write_project(source.path(), "beta", Some("docker-compose.yml"));

        let platform = FakePlatform::new();
        platform.add_volume("alpha", "alpha_data", &[]);
        platform.add_volume("beta", "beta_data", &[]);

        BackupManager::new(&platform, source.path(), backups.path())
            .create_backup()
            .await
            .unwrap();

        assert_eq!(
            platform.calls(),
            vec![
                Call::Stop("alpha".to_string()),
                Call::Export("alpha_data".to_string()),
                Call::Stop("beta".to_string()),
                Call::Export("beta_data".to_string()),
                Call::Start("alpha".to_string()),
                Call::Start("beta".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_failure_skips_restart_but_still_archives() {
        let source = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        write_project(source.path(), "alpha", Some("docker-compose.yml"));
        write_project(source.path(), "beta", Some("docker-compose.yml"));

        let platform = FakePlatform::new();
        platform.fail_stop("alpha");

        let report = BackupManager::new(&platform, source.path(), backups.path())
            .create_backup()
            .await
            .unwrap();

        assert!(!platform.calls().contains(&Call::Start("alpha".to_string())));
        assert!(platform.calls().contains(&Call::Start("beta".to_string())));
        assert!(report.backup_set.join("projects/alpha-project.tar.gz").is_file());
        assert_eq!(report.outcome.project("alpha").unwrap().state, ProjectState::StopFailed);
        assert!(report.is_degraded());
    }

    #[tokio::test]
    async fn test_tree_failure_does_not_block_later_projects() {
        let source = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        write_project(source.path(), "alpha", Some("docker-compose.yml"));
        write_project(source.path(), "beta", Some("docker-compose.yml"));

        let platform = FakePlatform::new();
        platform.vanish_on_stop("alpha");

        let report = BackupManager::new(&platform, source.path(), backups.path())
            .create_backup()
            .await
            .unwrap();

        let alpha = report.outcome.project("alpha").unwrap();
        assert!(alpha.failures().any(|s| s.name == "tree"));
        assert!(!report.backup_set.join("projects/alpha-project.tar.gz").exists());

        assert!(report.backup_set.join("projects/beta-project.tar.gz").is_file());
        assert_eq!(report.outcome.project("beta").unwrap().state, ProjectState::Restarted);
        // Stopped by this run, so restarted regardless of the failed archive
        assert_eq!(alpha.state, ProjectState::Restarted);
    }

    #[tokio::test]
    async fn test_volume_export_failure_is_recoverable() {
        let source = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        write_project(source.path(), "alpha", Some("docker-compose.yml"));

        let platform = FakePlatform::new();
        platform.add_volume("alpha", "alpha_cache", &[]);
        platform.add_volume("alpha", "alpha_db", &[("x", b"1".as_slice())]);
        platform.fail_export("alpha_cache");

        let report = BackupManager::new(&platform, source.path(), backups.path())
            .create_backup()
            .await
            .unwrap();

        assert!(report.backup_set.join("volumes/alpha_db.tar.gz").is_file());
        let manifest = BackupManifest::load(&BackupSet::open(&report.backup_set).unwrap())
            .unwrap()
            .unwrap();
        let volumes: Vec<&str> = manifest.projects[0].volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(volumes, vec!["alpha_db"]);
        assert!(report.is_degraded());
    }

    #[tokio::test]
    async fn test_fatal_error_restarts_already_stopped_projects() {
        let source = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        write_project(source.path(), "alpha", Some("docker-compose.yml"));
        write_project(source.path(), "beta", Some("docker-compose.yml"));

        let platform = FakePlatform::new();
        // Run preflight and alpha succeed, the daemon disappears before beta
        platform.unreachable_after(2);

        let result = BackupManager::new(&platform, source.path(), backups.path())
            .create_backup()
            .await;

        assert!(matches!(result, Err(RunError::PlatformUnreachable(_))));
        assert_eq!(
            platform.calls(),
            vec![
                Call::Stop("alpha".to_string()),
                Call::Start("alpha".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_platform_touches_nothing() {
        let source = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        write_project(source.path(), "alpha", Some("docker-compose.yml"));

        let platform = FakePlatform::new();
        platform.unreachable_after(0);

        let result = BackupManager::new(&platform, source.path(), backups.path())
            .create_backup()
            .await;

        assert!(matches!(result, Err(RunError::PlatformUnreachable(_))));
        assert!(platform.calls().is_empty());
        assert!(fs::read_dir(backups.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_manifest_write_failure_restarts_stopped_projects() {
        let source = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        write_project(source.path(), "alpha", Some("docker-compose.yml"));
        write_project(source.path(), "beta", Some("docker-compose.yml"));

        let platform = FakePlatform::new();
        let backup_root = backups.path().to_path_buf();
        // Occupy the manifest path once the set exists
        platform.on_stop("beta", move || {
            let set = fs::read_dir(&backup_root).unwrap().next().unwrap().unwrap();
            fs::create_dir(set.path().join("manifest.json")).unwrap();
        });

        let result = BackupManager::new(&platform, source.path(), backups.path())
            .create_backup()
            .await;

        match result {
            Err(RunError::WriteFailed { path, .. }) => assert!(path.ends_with("manifest.json")),
            other => panic!("expected WriteFailed, got {:?}", other.map(|r| r.backup_set)),
        }
        assert_eq!(
            platform.calls(),
            vec![
                Call::Stop("alpha".to_string()),
                Call::Stop("beta".to_string()),
                Call::Start("alpha".to_string()),
                Call::Start("beta".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unusable_backup_root_fails_before_any_stop() {
        let source = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        write_project(source.path(), "alpha", Some("docker-compose.yml"));
        let backups = scratch.path().join("backups");
        fs::write(&backups, "not a directory").unwrap();

        let platform = FakePlatform::new();
        let result = BackupManager::new(&platform, source.path(), &backups)
            .create_backup()
            .await;

        match result {
            Err(RunError::RootUnavailable { path, .. }) => assert_eq!(path, backups),
            other => panic!("expected RootUnavailable, got {:?}", other.map(|r| r.backup_set)),
        }
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_backup_root_inside_source_root_is_not_a_project() {
        let source = tempfile::tempdir().unwrap();
        write_project(source.path(), "alpha", None);
        let backups = source.path().join("backups");

        let platform = FakePlatform::new();
        let report = BackupManager::new(&platform, source.path(), &backups)
            .create_backup()
            .await
            .unwrap();

        let names: Vec<&String> = report.outcome.projects().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["alpha"]);
    }
}
