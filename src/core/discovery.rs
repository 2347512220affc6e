/// Project discovery
///
/// A project is an immediate subdirectory of the source root. Its composition
/// file, environment file and Compose project name are resolved from disk; its
/// volumes are resolved from the platform by ownership label.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::platform::Platform;
use crate::utils::{
    is_hidden, normalize_project_name, sorted_entries, COMPOSE_FILE_CANDIDATES,
    COMPOSE_OVERRIDE_CANDIDATES, ENV_FILE_NAME, PROJECT_NAME_VAR,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    /// Directory name, unique under its root
    pub name: String,
    pub path: PathBuf,
    pub compose_file: Option<PathBuf>,
    /// Merged into the composition file by every compose command
    pub override_file: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Value of the Compose project label on this project's containers and volumes
    pub compose_project: String,
}

impl Project {
    /// Resolve a project from its directory
    pub fn from_dir(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .with_context(|| format!("{} has no directory name", path.display()))?
            .to_string_lossy()
            .to_string();

        let compose_file = resolve_compose_file(path);
        let override_file = compose_file.as_ref().and_then(|_| resolve_override_file(path));
        let env_file = resolve_env_file(path);
        let compose_project =
            compose_project_name(&name, compose_file.as_deref(), env_file.as_deref());

        Ok(Self {
            name,
            path: path.to_path_buf(),
            compose_file,
            override_file,
            env_file,
            compose_project,
        })
    }

    /// Basename of the resolved composition file
    pub fn compose_basename(&self) -> Option<String> {
        self.compose_file
            .as_ref()
            .and_then(|f| f.file_name())
            .map(|n| n.to_string_lossy().to_string())
    }
}

/// Enumerate projects under `root`, sorted by name.
///
/// Hidden directories are ignored, as is any directory listed in `exclude` (the
/// backup root when it lives directly inside the source root). A backup root
/// nested deeper is left out of the tree archive instead.
pub fn discover_projects(root: &Path, exclude: &[PathBuf]) -> Result<Vec<Project>> {
    let mut projects = Vec::new();

    for entry in sorted_entries(root)? {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_hidden(&name) {
            continue;
        }

        // Follows symlinks: a project kept on another mount is still a project
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
        if exclude.iter().any(|ex| *ex == canonical) {
            debug!(project = %name, "Skipping the backup root");
            continue;
        }

        projects.push(Project::from_dir(&path)?);
    }

    Ok(projects)
}

/// First composition file present, in `COMPOSE_FILE_CANDIDATES` order
pub fn resolve_compose_file(dir: &Path) -> Option<PathBuf> {
    COMPOSE_FILE_CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Override file Compose would load on its own when no `-f` is given
pub fn resolve_override_file(dir: &Path) -> Option<PathBuf> {
    COMPOSE_OVERRIDE_CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

pub fn resolve_env_file(dir: &Path) -> Option<PathBuf> {
    let path = dir.join(ENV_FILE_NAME);
    path.is_file().then_some(path)
}

/// Compose project name, using the same precedence Compose does:
/// `COMPOSE_PROJECT_NAME` from `.env`, then the file's top-level `name:`,
/// then the normalized directory name.
pub fn compose_project_name(
    dir_name: &str,
    compose_file: Option<&Path>,
    env_file: Option<&Path>,
) -> String {
    if let Some(name) = env_file.and_then(project_name_from_env) {
        return normalize_project_name(&name);
    }

    if let Some(name) = compose_file.and_then(project_name_from_compose) {
        return normalize_project_name(&name);
    }

    normalize_project_name(dir_name)
}

// `from_path` would load the file into the process environment, where one
// project's COMPOSE_PROJECT_NAME would shadow the next one's; the iterator reads
// the file without side effects.
#[allow(deprecated)]
fn project_name_from_env(env_file: &Path) -> Option<String> {
    dotenv::from_path_iter(env_file)
        .ok()?
        .filter_map(|item| item.ok())
        .find(|(key, _)| key == PROJECT_NAME_VAR)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

// Only the literal top-level `name:` is honoured; interpolated names are left to
// the directory fallback.
fn project_name_from_compose(compose_file: &Path) -> Option<String> {
    let content = std::fs::read_to_string(compose_file).ok()?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&content).ok()?;

    yaml.get("name")
        .and_then(|n| n.as_str())
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty() && !n.contains('$'))
}

/// Volumes owned by a project, as reported by the platform
pub async fn resolve_volumes<P: Platform>(platform: &P, project: &Project) -> Result<Vec<String>> {
    platform
        .project_volumes(&project.compose_project)
        .await
        .with_context(|| format!("Failed to list volumes of {}", project.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_compose_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("compose.yaml"), "services: {}").unwrap();
        fs::write(dir.path().join("compose.yml"), "services: {}").unwrap();
        assert_eq!(
            resolve_compose_file(dir.path()),
            Some(dir.path().join("compose.yml"))
        );

        fs::write(dir.path().join("docker-compose.yaml"), "services: {}").unwrap();
        assert_eq!(
            resolve_compose_file(dir.path()),
            Some(dir.path().join("docker-compose.yaml"))
        );

        fs::write(dir.path().join("docker-compose.yml"), "services: {}").unwrap();
        assert_eq!(
            resolve_compose_file(dir.path()),
            Some(dir.path().join("docker-compose.yml"))
        );
    }

    #[test]
    fn test_discovery_is_sorted_and_skips_noise() {
        let root = tempfile::tempdir().unwrap();
        for name in ["zulu", "Alpha", "mike", ".cache"] {
            fs::create_dir(root.path().join(name)).unwrap();
        }
        fs::write(root.path().join("README.md"), "not a project").unwrap();
        fs::write(root.path().join("mike/docker-compose.yml"), "services: {}").unwrap();
        fs::write(root.path().join("mike/.env"), "FOO=bar\n").unwrap();

        let projects = discover_projects(root.path(), &[]).unwrap();
        let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "mike", "zulu"]);

        let mike = &projects[1];
        assert_eq!(mike.compose_basename().as_deref(), Some("docker-compose.yml"));
        assert!(mike.env_file.is_some());
        assert!(projects[2].compose_file.is_none());
        assert_eq!(projects[0].compose_project, "alpha");
    }

    #[test]
    fn test_symlinked_project_is_discovered() {
        let root = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        let real = storage.path().join("shop-data");
        fs::create_dir(&real).unwrap();
        fs::write(real.join("docker-compose.yml"), "services: {}").unwrap();
        std::os::unix::fs::symlink(&real, root.path().join("shop")).unwrap();
        fs::create_dir(root.path().join("blog")).unwrap();

        let projects = discover_projects(root.path(), &[]).unwrap();
        let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["blog", "shop"]);
        assert_eq!(projects[1].compose_project, "shop");
        assert!(projects[1].compose_file.is_some());
    }

    #[test]
    fn test_symlink_to_backup_root_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(backups.path(), root.path().join("backups")).unwrap();
        fs::create_dir(root.path().join("app")).unwrap();

        let exclude = vec![backups.path().canonicalize().unwrap()];
        let projects = discover_projects(root.path(), &exclude).unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "app");
    }

    #[test]
    fn test_override_file_is_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("app");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("compose.override.yaml"), "services: {}").unwrap();
        assert!(Project::from_dir(&project).unwrap().override_file.is_none());

        fs::write(project.join("docker-compose.yml"), "services: {}").unwrap();
        assert_eq!(
            Project::from_dir(&project).unwrap().override_file,
            Some(project.join("compose.override.yaml"))
        );
    }

    #[test]
    fn test_discovery_skips_backup_root() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("backups/docker-backup-2025-01-01")).unwrap();
        fs::create_dir(root.path().join("app")).unwrap();

        let exclude = vec![root.path().join("backups").canonicalize().unwrap()];
        let projects = discover_projects(root.path(), &exclude).unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "app");
    }

    #[test]
    fn test_compose_project_name_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("My_Stack");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("compose.yaml"), "name: Shop\nservices: {}\n").unwrap();

        let resolved = Project::from_dir(&project).unwrap();
        assert_eq!(resolved.compose_project, "shop");

        fs::write(project.join(".env"), "COMPOSE_PROJECT_NAME=storefront\n").unwrap();
        let resolved = Project::from_dir(&project).unwrap();
        assert_eq!(resolved.compose_project, "storefront");
    }

    #[test]
    fn test_unparseable_compose_falls_back_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("Legacy");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("docker-compose.yml"), "name: [unterminated").unwrap();

        assert_eq!(Project::from_dir(&project).unwrap().compose_project, "legacy");
    }
}
