//! PostgreSQL backing store for the import pipeline.
//!
//! Tables:
//! - `syslog_file_imported` - bookkeeping, one row per imported file content
//! - `syslog_msg_import` - staging, filled by binary `COPY`
//! - `syslog_msg` - permanent storage, filled by `complete_syslog_msg_import`

pub mod copy;
pub mod migration;

pub use copy::{BinaryCopyEncoder, PgCopySession};
pub use migration::{MIGRATOR, run_migrations};

use crate::config::DatabaseConfig;
use crate::error::ImportResult;
use crate::import::bulk_load::ImportStore;
use crate::import::fingerprint::Fingerprint;
use crate::models::ImportedFile;
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Open a connection pool from validated settings.
pub async fn connect(config: &DatabaseConfig) -> ImportResult<PgPool> {
    let options = config.connect_options()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

#[derive(Clone)]
pub struct PgImportStore {
    pool: PgPool,
}

impl PgImportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ImportStore for PgImportStore {
    type Session = PgCopySession;

    async fn prepare_batch(&self) -> ImportResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("TRUNCATE syslog_msg_import")
            .execute(&mut *tx)
            .await?;
        let dropped = sqlx::query("DELETE FROM syslog_file_imported WHERE NOT is_complete")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        if dropped > 0 {
            log::info!("dropped {} unfinished bookkeeping row(s)", dropped);
        }
        Ok(())
    }

    async fn recent_completed_files(&self, limit: i64) -> ImportResult<Vec<ImportedFile>> {
        let files = sqlx::query_as::<_, ImportedFile>(
            r#"SELECT id, file_fingerprint, file_path, is_complete
               FROM syslog_file_imported
               WHERE is_complete
               ORDER BY id DESC
               LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    async fn open_session(&self) -> ImportResult<PgCopySession> {
        PgCopySession::open(&self.pool).await
    }

    async fn record_file_imported(
        &self,
        path: &str,
        fingerprint: &Fingerprint,
    ) -> ImportResult<()> {
        let inserted = sqlx::query(
            r#"INSERT INTO syslog_file_imported (file_fingerprint, file_path)
               VALUES ($1, $2)
               ON CONFLICT (file_fingerprint) DO NOTHING"#,
        )
        .bind(fingerprint.as_bytes())
        .bind(path)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            log::info!("content of {} was already imported", path);
        }
        Ok(())
    }

    async fn complete_batch(&self, max_days_to_keep: i16) -> ImportResult<()> {
        sqlx::query("CALL complete_syslog_msg_import($1)")
            .bind(max_days_to_keep)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
