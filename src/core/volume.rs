/// Volume data mover
///
/// Volume bytes never touch the host directly: each export or import runs a
/// disposable, network-less container that sees exactly two mounts, the volume
/// and the directory holding the archive.
///
/// Import is an overlay. Files in the archive overwrite their counterparts in
/// the volume, but files already in the volume and absent from the archive are
/// left in place.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::platform::Platform;
use crate::utils::{file_size, MOVER_ARCHIVE_MOUNT, MOVER_VOLUME_MOUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Volume to archive; the volume is mounted read-only
    Export,
    /// Archive to volume; the archive directory is mounted read-only
    Import,
}

/// One data mover invocation
#[derive(Debug, Clone, PartialEq)]
pub struct MoverJob {
    pub volume: String,
    /// Absolute host directory holding the archive
    pub archive_dir: PathBuf,
    pub archive_name: String,
    pub direction: Direction,
}

impl MoverJob {
    fn new(volume: &str, archive_path: &Path, direction: Direction) -> Result<Self> {
        let archive_name = archive_path
            .file_name()
            .ok_or_else(|| anyhow!("Archive path {} has no file name", archive_path.display()))?
            .to_string_lossy()
            .to_string();

        let parent = archive_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let archive_dir = parent
            .canonicalize()
            .with_context(|| format!("Archive directory {} is not accessible", parent.display()))?;

        Ok(Self {
            volume: volume.to_string(),
            archive_dir,
            archive_name,
            direction,
        })
    }

    /// Host path of the archive
    pub fn archive_path(&self) -> PathBuf {
        self.archive_dir.join(&self.archive_name)
    }

    /// Bind mounts given to the container, nothing else is visible to it
    pub fn binds(&self) -> Vec<String> {
        let (volume_mode, archive_mode) = match self.direction {
            Direction::Export => ("ro", "rw"),
            Direction::Import => ("rw", "ro"),
        };

        vec![
            format!("{}:{}:{}", self.volume, MOVER_VOLUME_MOUNT, volume_mode),
            format!(
                "{}:{}:{}",
                self.archive_dir.display(),
                MOVER_ARCHIVE_MOUNT,
                archive_mode
            ),
        ]
    }

    /// Command run inside the container
    pub fn command(&self) -> Vec<String> {
        let archive = format!("{}/{}", MOVER_ARCHIVE_MOUNT, self.archive_name);

        let args: Vec<&str> = match self.direction {
            Direction::Export => vec!["tar", "czf", archive.as_str(), "-C", MOVER_VOLUME_MOUNT, "."],
            Direction::Import => vec!["tar", "xzpf", archive.as_str(), "-C", MOVER_VOLUME_MOUNT],
        };

        args.into_iter().map(String::from).collect()
    }
}

/// Stream a volume's contents into `archive_path`. Returns the archive size.
pub async fn export_volume<P: Platform>(platform: &P, volume: &str, archive_path: &Path) -> Result<u64> {
    let job = MoverJob::new(volume, archive_path, Direction::Export)?;

    platform
        .run_mover(&job)
        .await
        .with_context(|| format!("Failed to export volume {}", volume))?;

    let size = file_size(job.archive_path());
    info!(volume = %volume, bytes = size, "Volume exported");
    Ok(size)
}

/// Stream `archive_path` into a volume, creating the volume first if needed
pub async fn import_volume<P: Platform>(
    platform: &P,
    volume: &str,
    compose_project: &str,
    archive_path: &Path,
) -> Result<()> {
    let job = MoverJob::new(volume, archive_path, Direction::Import)?;

    let exists = platform
        .volume_exists(volume)
        .await
        .with_context(|| format!("Failed to inspect volume {}", volume))?;

    if !exists {
        info!(volume = %volume, "Creating missing volume");
        platform
            .create_volume(volume, compose_project)
            .await
            .with_context(|| format!("Failed to create volume {}", volume))?;
    }

    platform
        .run_mover(&job)
        .await
        .with_context(|| format!("Failed to import volume {}", volume))?;

    info!(volume = %volume, "Volume imported");
    Ok(())
}
