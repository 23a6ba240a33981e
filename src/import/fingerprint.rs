//! Content fingerprints used for server-side duplicate suppression.
//!
//! Only the leading [`FINGERPRINT_CHUNK_LEN`] bytes of a file are hashed. Two
//! files sharing those bytes get the same fingerprint even if they differ
//! further down, and the store will treat the second one as duplicate content.

use crate::error::{ImportError, ImportResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tokio::io::AsyncReadExt;

pub const FINGERPRINT_CHUNK_LEN: usize = 32 * 1024;
pub const FINGERPRINT_LEN: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Hash an in-memory chunk.
    pub fn of(chunk: &[u8]) -> Self {
        Self(Sha256::digest(chunk).into())
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; FINGERPRINT_LEN]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|byte| format!("{:02x}", byte)).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

/// Computes fingerprints with a reusable read buffer.
pub struct ContentFingerprinter {
    buffer: Vec<u8>,
}

impl ContentFingerprinter {
    pub fn new() -> Self {
        Self {
            buffer: vec![0; FINGERPRINT_CHUNK_LEN],
        }
    }

    /// Fingerprint the leading chunk of `path`. An empty read is an error.
    pub async fn compute(&mut self, path: &Path) -> ImportResult<Fingerprint> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|err| ImportError::file_access(path, err.to_string()))?;

        let mut filled = 0;
        while filled < self.buffer.len() {
            let read = file
                .read(&mut self.buffer[filled..])
                .await
                .map_err(|err| ImportError::file_access(path, err.to_string()))?;
            if read == 0 {
                break;
            }
            filled += read;
        }

        if filled == 0 {
            return Err(ImportError::file_access(path, "file is empty"));
        }

        Ok(Fingerprint::of(&self.buffer[..filled]))
    }
}

impl Default for ContentFingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn identical_content_gives_identical_fingerprints() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("syslog_a");
        let b = dir.path().join("syslog_b");
        std::fs::write(&a, b"<13>1 2024-01-01T00:00:00Z host app - - - hello\n").unwrap();
        std::fs::write(&b, b"<13>1 2024-01-01T00:00:00Z host app - - - hello\n").unwrap();

        let mut fingerprinter = ContentFingerprinter::new();
        let fa = fingerprinter.compute(&a).await.unwrap();
        let fb = fingerprinter.compute(&b).await.unwrap();
        assert_eq!(fa, fb);
        assert_eq!(fa.as_bytes().len(), FINGERPRINT_LEN);
    }

    #[tokio::test]
    async fn only_the_leading_chunk_is_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let head = vec![b'x'; FINGERPRINT_CHUNK_LEN];

        let a = dir.path().join("syslog_a");
        let mut file = std::fs::File::create(&a).unwrap();
        file.write_all(&head).unwrap();
        file.write_all(b"tail one\n").unwrap();

        let b = dir.path().join("syslog_b");
        let mut file = std::fs::File::create(&b).unwrap();
        file.write_all(&head).unwrap();
        file.write_all(b"a completely different tail\n").unwrap();

        let mut fingerprinter = ContentFingerprinter::new();
        assert_eq!(
            fingerprinter.compute(&a).await.unwrap(),
            fingerprinter.compute(&b).await.unwrap()
        );
    }

    #[tokio::test]
    async fn short_files_differ_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("syslog_a");
        let b = dir.path().join("syslog_b");
        std::fs::write(&a, b"first\n").unwrap();
        std::fs::write(&b, b"second\n").unwrap();

        let mut fingerprinter = ContentFingerprinter::new();
        assert_ne!(
            fingerprinter.compute(&a).await.unwrap(),
            fingerprinter.compute(&b).await.unwrap()
        );
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syslog_empty");
        std::fs::write(&path, b"").unwrap();

        let err = ContentFingerprinter::new().compute(&path).await.unwrap_err();
        assert!(matches!(err, ImportError::FileAccess { .. }));
    }

    #[test]
    fn round_trips_through_bytes() {
        let fingerprint = Fingerprint::of(b"abc");
        assert_eq!(Fingerprint::from_slice(fingerprint.as_bytes()), Some(fingerprint));
        assert_eq!(Fingerprint::from_slice(b"short"), None);
        assert_eq!(
            fingerprint.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
