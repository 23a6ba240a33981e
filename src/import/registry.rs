//! In-memory set of file paths already imported.
//!
//! The set only grows during a process lifetime. When it is empty (cold start
//! or after a restart) it is seeded from the most recent completed bookkeeping
//! rows. Content duplicates are not caught here: the store enforces
//! fingerprint uniqueness.
//!
//! Paths are compared exactly as the filesystem reports them, so on a
//! case-sensitive filesystem `syslog_1` and `SYSLOG_1` are different files.
//! This differs from a case-insensitive registry on Windows-style volumes,
//! where two spellings of one file would otherwise both be imported.

use crate::error::ImportResult;
use crate::import::bulk_load::ImportStore;
use std::collections::HashSet;
use std::path::Path;

/// How many completed files are loaded when the registry is cold.
pub const REGISTRY_REFRESH_LIMIT: i64 = 100;

#[derive(Debug, Default)]
pub struct ProcessedFileRegistry {
    paths: HashSet<String>,
}

// Case-sensitive, matching the filesystem.
fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl ProcessedFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(&key(path))
    }

    pub fn insert(&mut self, path: &Path) -> bool {
        self.paths.insert(key(path))
    }

    /// Seed from the store when empty. Returns how many paths were loaded.
    pub async fn refresh_if_empty<S: ImportStore + ?Sized>(
        &mut self,
        store: &S,
    ) -> ImportResult<usize> {
        if !self.paths.is_empty() {
            return Ok(0);
        }

        let files = store
            .recent_completed_files(REGISTRY_REFRESH_LIMIT)
            .await?;
        let loaded = files.len();
        self.paths
            .extend(files.into_iter().map(|file| file.file_path));

        log::debug!("registry seeded with {} completed file(s)", loaded);
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::fingerprint::Fingerprint;
    use crate::test_support::MemoryStore;
    use std::path::PathBuf;

    #[tokio::test]
    async fn seeds_from_store_only_when_cold() {
        let store = MemoryStore::new();
        store.seed_completed_file("/var/log/syslog_1", Fingerprint::of(b"1"));
        store.seed_completed_file("/var/log/syslog_2", Fingerprint::of(b"2"));

        let mut registry = ProcessedFileRegistry::new();
        assert_eq!(registry.refresh_if_empty(&store).await.unwrap(), 2);
        assert!(registry.contains(&PathBuf::from("/var/log/syslog_1")));

        store.seed_completed_file("/var/log/syslog_3", Fingerprint::of(b"3"));
        assert_eq!(registry.refresh_if_empty(&store).await.unwrap(), 0);
        assert!(!registry.contains(&PathBuf::from("/var/log/syslog_3")));
    }

    #[tokio::test]
    async fn incomplete_bookkeeping_rows_are_not_loaded() {
        let store = MemoryStore::new();
        store.seed_incomplete_file("/var/log/syslog_1", Fingerprint::of(b"1"));

        let mut registry = ProcessedFileRegistry::new();
        assert_eq!(registry.refresh_if_empty(&store).await.unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn insert_is_idempotent() {
        let mut registry = ProcessedFileRegistry::new();
        assert!(registry.insert(Path::new("/var/log/syslog_1")));
        assert!(!registry.insert(Path::new("/var/log/syslog_1")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn paths_are_case_sensitive() {
        let mut registry = ProcessedFileRegistry::new();
        registry.insert(Path::new("/var/log/syslog_1"));
        assert!(registry.contains(Path::new("/var/log/syslog_1")));
        assert!(!registry.contains(Path::new("/var/log/SYSLOG_1")));
    }
}
