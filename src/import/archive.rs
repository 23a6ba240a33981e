//! Post-import compression of source files.
//!
//! `<file>` becomes `<file>.gz`. The archive is written to a temporary file in
//! the same directory and renamed into place, so a `.gz` sibling is always
//! complete. An existing sibling means the file was archived before and only
//! the original is removed.

use crate::config::ARCHIVE_SUFFIX;
use crate::error::{ImportError, ImportResult};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveAction {
    Compressed,
    AlreadyArchived,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Archiver {
    level: Compression,
}

/// Sibling path the archive of `path` is written to.
pub fn archive_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(ARCHIVE_SUFFIX);
    PathBuf::from(name)
}

impl Archiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }

    pub async fn archive(&self, path: &Path) -> ImportResult<ArchiveAction> {
        let level = self.level;
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || archive_blocking(&owned, level))
            .await
            .map_err(|err| ImportError::Archive {
                path: path.to_path_buf(),
                source: io::Error::other(err),
            })?
            .map_err(|source| ImportError::Archive {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Archive and log the result. Never fails.
    pub async fn archive_best_effort(&self, path: &Path) -> bool {
        match self.archive(path).await {
            Ok(ArchiveAction::Compressed) => {
                log::info!("archived {}", path.display());
                true
            }
            Ok(ArchiveAction::AlreadyArchived) => {
                log::info!("{} was already archived, original removed", path.display());
                true
            }
            Err(err) => {
                log::warn!("{}", err);
                false
            }
        }
    }
}

fn archive_blocking(path: &Path, level: Compression) -> io::Result<ArchiveAction> {
    let target = archive_path(path);
    if target.exists() {
        fs::remove_file(path)?;
        return Ok(ArchiveAction::AlreadyArchived);
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut source = File::open(path)?;
    let mut encoder = GzEncoder::new(NamedTempFile::new_in(dir)?, level);
    io::copy(&mut source, &mut encoder)?;
    let temp = encoder.finish()?;
    temp.as_file().sync_all()?;
    temp.persist(&target).map_err(|err| err.error)?;

    fs::remove_file(path)?;
    Ok(ArchiveAction::Compressed)
}
