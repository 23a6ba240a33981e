//! Storage seam of the import pipeline.
//!
//! [`BulkLoadSession`] is an append-only streaming write into the staging
//! area. There is no per-row acknowledgement: failures surface from `write`
//! or `complete`. [`ImportStore`] groups the remaining storage operations the
//! scheduler and the file processor need.

use crate::error::ImportResult;
use crate::import::fingerprint::Fingerprint;
use crate::models::{ImportedFile, StagedRow};
use async_trait::async_trait;

/// Staging table columns, in wire order.
pub const STAGING_COLUMNS: [&str; 10] = [
    "file_fingerprint",
    "facility",
    "severity",
    "created_on",
    "host",
    "payload_kind",
    "app",
    "pid",
    "msg_id",
    "message",
];

#[async_trait]
pub trait BulkLoadSession: Send + Sized {
    /// Append one row to the open session.
    async fn write(&mut self, row: &StagedRow) -> ImportResult<()>;

    /// Finalize the session and make its rows visible to the completion step.
    /// Returns the number of rows written.
    async fn complete(self) -> ImportResult<u64>;

    /// Release the session without committing anything.
    async fn abort(self) -> ImportResult<()>;
}

#[async_trait]
pub trait ImportStore: Send + Sync {
    type Session: BulkLoadSession;

    /// Truncate the staging area and drop unfinished bookkeeping rows.
    async fn prepare_batch(&self) -> ImportResult<()>;

    /// Most recent completed files, newest first.
    async fn recent_completed_files(&self, limit: i64) -> ImportResult<Vec<ImportedFile>>;

    async fn open_session(&self) -> ImportResult<Self::Session>;

    /// Record a file as imported. A fingerprint already present is a no-op.
    async fn record_file_imported(&self, path: &str, fingerprint: &Fingerprint)
    -> ImportResult<()>;

    /// Move staged rows into permanent storage and apply retention.
    async fn complete_batch(&self, max_days_to_keep: i16) -> ImportResult<()>;
}
