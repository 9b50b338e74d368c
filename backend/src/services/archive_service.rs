//! Archive builder: streams a local directory tree into a `.tar.gz` file.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::Builder;

use crate::error::{AppError, Result};

fn archive_err(context: &str, err: impl std::fmt::Display) -> AppError {
    AppError::Archive(format!("{}: {}", context, err))
}

/// Archive every entry of `source` into `dest` and return the archive size.
///
/// Each top-level directory of `source` becomes a top-level archive entry.
/// Symlinks are stored as links, never followed. The call returns only after
/// the gzip stream is finished and the file is synced to disk.
pub async fn build_archive(source: &Path, dest: &Path) -> Result<u64> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || build_archive_blocking(&source, &dest))
        .await
        .map_err(|e| AppError::Internal(format!("Archive task failed: {}", e)))?
}

fn build_archive_blocking(source: &Path, dest: &Path) -> Result<u64> {
    let mut entries: Vec<PathBuf> = fs::read_dir(source)
        .map_err(|e| archive_err(&format!("Failed to read {}", source.display()), e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    let file = File::create(dest)
        .map_err(|e| archive_err(&format!("Failed to create {}", dest.display()), e))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut tar = Builder::new(encoder);
    tar.follow_symlinks(false);

    for path in &entries {
        let Some(name) = path.file_name() else {
            continue;
        };
        let result = if path.is_dir() {
            tar.append_dir_all(name, path)
        } else {
            tar.append_path_with_name(path, name)
        };
        result.map_err(|e| archive_err(&format!("Failed to add {}", path.display()), e))?;
    }

    let encoder = tar
        .into_inner()
        .map_err(|e| archive_err("Failed to finish tar stream", e))?;
    let mut writer = encoder
        .finish()
        .map_err(|e| archive_err("Failed to finish gzip stream", e))?;
    writer
        .flush()
        .map_err(|e| archive_err("Failed to flush archive", e))?;
    let file = writer
        .into_inner()
        .map_err(|e| archive_err("Failed to flush archive", e.error()))?;
    file.sync_all()
        .map_err(|e| archive_err("Failed to sync archive", e))?;
    drop(file);

    let size = fs::metadata(dest)
        .map_err(|e| archive_err("Failed to stat archive", e))?
        .len();
    tracing::debug!(path = %dest.display(), size, entries = entries.len(), "Archive written");
    Ok(size)
}
