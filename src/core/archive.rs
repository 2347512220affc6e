/// Compressed tree archives (tar + gzip)
///
/// `pack` stores a directory under a single named root entry so `unpack`
/// recreates `<destination>/<name>/...` wherever it is pointed. Directories and
/// regular files keep their mode bits. Symlinks are stored as links and never
/// followed. Sockets, FIFOs and device nodes are skipped with a warning.

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder};
use tracing::{debug, warn};

use crate::utils::sorted_entries;

/// Archive `source_dir` as a single root entry named after the directory.
///
/// Paths under any of `exclude` are left out. Returns the archive size in bytes.
/// On failure no partial archive is left behind.
pub fn pack(source_dir: &Path, archive_path: &Path, exclude: &[PathBuf]) -> Result<u64> {
    let source = source_dir
        .canonicalize()
        .with_context(|| format!("Source directory {} is not accessible", source_dir.display()))?;
    // Named after the path given, not a symlink's target
    let root_name = source_dir
        .file_name()
        .or_else(|| source.file_name())
        .ok_or_else(|| anyhow!("Cannot archive {} without a directory name", source.display()))?
        .to_owned();

    write_archive(archive_path, |builder| {
        builder
            .append_dir(&root_name, &source)
            .with_context(|| format!("Failed to add {} to archive", source.display()))?;
        append_tree(builder, &source, Path::new(&root_name), exclude)
    })
}

/// Archive the contents of `source_dir` with paths relative to it (no root entry)
pub fn pack_contents(source_dir: &Path, archive_path: &Path) -> Result<u64> {
    let source = source_dir
        .canonicalize()
        .with_context(|| format!("Source directory {} is not accessible", source_dir.display()))?;

    write_archive(archive_path, |builder| append_tree(builder, &source, Path::new(""), &[]))
}

/// Extract an archive under `destination_root`, creating it if needed.
///
/// Existing files are overwritten, permissions are restored, and entries that
/// would land outside the destination are refused.
pub fn unpack(archive_path: &Path, destination_root: &Path) -> Result<()> {
    fs::create_dir_all(destination_root)
        .with_context(|| format!("Failed to create {}", destination_root.display()))?;

    let mut archive = open_archive(archive_path)?;
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(true);

    archive.unpack(destination_root).with_context(|| {
        format!(
            "Failed to extract {} into {}",
            archive_path.display(),
            destination_root.display()
        )
    })?;

    Ok(())
}

/// Top-level entry names of an archive, sorted
pub fn root_entries(archive_path: &Path) -> Result<Vec<String>> {
    let mut archive = open_archive(archive_path)?;
    let mut roots = BTreeSet::new();

    let entries = archive
        .entries()
        .with_context(|| format!("Failed to read {}", archive_path.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Corrupt entry in {}", archive_path.display()))?;
        let path = entry.path().context("Invalid path in archive entry")?;

        if let Some(Component::Normal(first)) = path
            .components()
            .find(|c| !matches!(c, Component::CurDir))
        {
            roots.insert(first.to_string_lossy().to_string());
        }
    }

    Ok(roots.into_iter().collect())
}

fn open_archive(archive_path: &Path) -> Result<Archive<GzDecoder<BufReader<File>>>> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive {}", archive_path.display()))?;
    Ok(Archive::new(GzDecoder::new(BufReader::new(file))))
}

fn write_archive<F>(archive_path: &Path, fill: F) -> Result<u64>
where
    F: FnOnce(&mut Builder<GzEncoder<BufWriter<File>>>) -> Result<()>,
{
    let result = (|| {
        let file = File::create(archive_path)
            .with_context(|| format!("Failed to create archive file {}", archive_path.display()))?;

        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let mut builder = Builder::new(encoder);
        builder.follow_symlinks(false);

        fill(&mut builder)?;

        let mut writer = builder
            .into_inner()
            .context("Failed to finish archive")?
            .finish()
            .context("Failed to finish compression")?;
        writer.flush().context("Failed to flush archive")?;

        let file = writer
            .into_inner()
            .map_err(|e| anyhow!("Failed to flush archive buffer: {}", e.error()))?;
        file.sync_all()
            .with_context(|| format!("Failed to fsync archive {}", archive_path.display()))?;

        Ok(file.metadata().map(|m| m.len()).unwrap_or(0))
    })();

    if result.is_err() {
        let _ = fs::remove_file(archive_path);
    }

    result
}

fn append_tree<W: Write>(
    builder: &mut Builder<W>,
    dir: &Path,
    prefix: &Path,
    exclude: &[PathBuf],
) -> Result<()> {
    for entry in sorted_entries(dir)? {
        let fs_path = entry.path();
        if exclude.iter().any(|ex| fs_path.starts_with(ex)) {
            debug!(path = %fs_path.display(), "Excluded from archive");
            continue;
        }

        let archive_name = prefix.join(entry.file_name());
        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to stat {}", fs_path.display()))?;

        if file_type.is_dir() {
            builder
                .append_dir(&archive_name, &fs_path)
                .with_context(|| format!("Failed to add directory {}", fs_path.display()))?;
            append_tree(builder, &fs_path, &archive_name, exclude)?;
        } else if file_type.is_file() || file_type.is_symlink() {
            builder
                .append_path_with_name(&fs_path, &archive_name)
                .with_context(|| format!("Failed to add {}", fs_path.display()))?;
        } else {
            warn!(path = %fs_path.display(), "Skipping special file");
        }
    }

    Ok(())
}
