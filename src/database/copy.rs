//! Binary `COPY ... FROM STDIN` into the staging table.
//!
//! Rows are encoded in PostgreSQL's binary copy format and flushed to the
//! server in chunks of roughly [`COPY_FLUSH_THRESHOLD`] bytes.
//!
//! Layout:
//!
//! - header: signature, `i32` flags (0), `i32` extension length (0)
//! - per row: `i16` field count, then per field an `i32` byte length
//!   (`-1` for NULL) followed by the value bytes
//! - trailer: `i16` -1
//!
//! Values use the binary send format of their column type: `bytea` and
//! `text` are raw bytes, `int4` is big-endian, `timestamp` is an `i64` count
//! of microseconds since 2000-01-01.

use crate::error::ImportResult;
use crate::import::bulk_load::{BulkLoadSession, STAGING_COLUMNS};
use crate::models::StagedRow;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const COPY_FLUSH_THRESHOLD: usize = 64 * 1024;
pub const STAGING_TABLE: &str = "syslog_msg_import";

const COPY_SIGNATURE: &[u8] = b"PGCOPY\n\xff\r\n\0";
const NULL_LENGTH: i32 = -1;
const TRAILER: i16 = -1;

pub fn copy_statement() -> String {
    format!(
        "COPY {} ({}) FROM STDIN (FORMAT BINARY)",
        STAGING_TABLE,
        STAGING_COLUMNS.join(", ")
    )
}

fn postgres_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Accumulates encoded rows between flushes.
#[derive(Debug)]
pub struct BinaryCopyEncoder {
    buf: Vec<u8>,
    epoch: NaiveDateTime,
}

impl BinaryCopyEncoder {
    /// Encoder with the copy header already written.
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(COPY_FLUSH_THRESHOLD + 4096);
        buf.extend_from_slice(COPY_SIGNATURE);
        buf.extend_from_slice(&0i32.to_be_bytes());
        buf.extend_from_slice(&0i32.to_be_bytes());
        Self {
            buf,
            epoch: postgres_epoch(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn should_flush(&self) -> bool {
        self.buf.len() >= COPY_FLUSH_THRESHOLD
    }

    /// Hand out the buffered bytes and start a fresh chunk.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::replace(&mut self.buf, Vec::with_capacity(COPY_FLUSH_THRESHOLD + 4096))
    }

    pub fn encode_row(&mut self, row: &StagedRow) {
        self.buf
            .extend_from_slice(&(STAGING_COLUMNS.len() as i16).to_be_bytes());
        self.put_bytes(row.fingerprint.as_bytes());
        self.put_text(row.facility.as_str());
        self.put_text(row.severity.as_str());
        self.put_timestamp(row.created_on);
        self.put_text(&row.host);
        self.put_text(row.payload_kind.as_str());
        self.put_opt_text(row.app.as_deref());
        self.put_opt_i32(row.pid);
        self.put_opt_i32(row.msg_id);
        self.put_text(&row.message);
    }

    pub fn finish(&mut self) {
        self.buf.extend_from_slice(&TRAILER.to_be_bytes());
    }

    fn put_bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(&(value.len() as i32).to_be_bytes());
        self.buf.extend_from_slice(value);
    }

    fn put_null(&mut self) {
        self.buf.extend_from_slice(&NULL_LENGTH.to_be_bytes());
    }

    // PostgreSQL text cannot hold NUL bytes.
    fn put_text(&mut self, value: &str) {
        if value.contains('\0') {
            self.put_bytes(value.replace('\0', "").as_bytes());
        } else {
            self.put_bytes(value.as_bytes());
        }
    }

    fn put_opt_text(&mut self, value: Option<&str>) {
        match value {
            Some(value) => self.put_text(value),
            None => self.put_null(),
        }
    }

    fn put_opt_i32(&mut self, value: Option<i32>) {
        match value {
            Some(value) => self.put_bytes(&value.to_be_bytes()),
            None => self.put_null(),
        }
    }

    fn put_timestamp(&mut self, value: NaiveDateTime) {
        let micros = (value - self.epoch)
            .num_microseconds()
            .unwrap_or(i64::MAX);
        self.put_bytes(&micros.to_be_bytes());
    }
}

impl Default for BinaryCopyEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoded chunks on their way to the copy task.
const COPY_CHANNEL_CAPACITY: usize = 4;

enum CopyMessage {
    Data(Vec<u8>),
    Finish,
    Abort,
}

/// Bulk-load session over one pooled connection.
///
/// The connection and its `COPY` live on a dedicated task; the session only
/// encodes rows and hands chunks over. Dropping the session without
/// completing it aborts the copy.
pub struct PgCopySession {
    chunks: mpsc::Sender<CopyMessage>,
    task: Option<JoinHandle<ImportResult<u64>>>,
    encoder: BinaryCopyEncoder,
}

impl PgCopySession {
    pub async fn open(pool: &PgPool) -> ImportResult<Self> {
        let conn = pool.acquire().await?;
        let (chunks, rx) = mpsc::channel(COPY_CHANNEL_CAPACITY);
        let task = tokio::spawn(drive_copy(conn, rx));
        Ok(Self {
            chunks,
            task: Some(task),
            encoder: BinaryCopyEncoder::new(),
        })
    }

    async fn send(&mut self, message: CopyMessage) -> ImportResult<()> {
        if self.chunks.send(message).await.is_ok() {
            return Ok(());
        }
        // The copy task is gone; surface its error.
        match self.task.take() {
            Some(task) => match join_copy(task).await {
                Ok(_) => Err(sqlx::Error::WorkerCrashed.into()),
                Err(err) => Err(err),
            },
            None => Err(sqlx::Error::WorkerCrashed.into()),
        }
    }

    async fn wait(mut self) -> ImportResult<u64> {
        match self.task.take() {
            Some(task) => join_copy(task).await,
            None => Err(sqlx::Error::WorkerCrashed.into()),
        }
    }
}

async fn join_copy(task: JoinHandle<ImportResult<u64>>) -> ImportResult<u64> {
    task.await.map_err(|err| {
        log::error!("copy task failed: {}", err);
        sqlx::Error::WorkerCrashed
    })?
}

async fn drive_copy(
    mut conn: PoolConnection<Postgres>,
    mut chunks: mpsc::Receiver<CopyMessage>,
) -> ImportResult<u64> {
    let mut copy = conn.copy_in_raw(&copy_statement()).await?;
    while let Some(message) = chunks.recv().await {
        match message {
            CopyMessage::Data(chunk) => {
                copy.send(chunk).await?;
            }
            CopyMessage::Finish => return Ok(copy.finish().await?),
            CopyMessage::Abort => {
                copy.abort("import aborted").await?;
                return Ok(0);
            }
        }
    }
    copy.abort("bulk load session dropped").await?;
    Ok(0)
}

#[async_trait]
impl BulkLoadSession for PgCopySession {
    async fn write(&mut self, row: &StagedRow) -> ImportResult<()> {
        self.encoder.encode_row(row);
        if self.encoder.should_flush() {
            let chunk = self.encoder.take();
            self.send(CopyMessage::Data(chunk)).await?;
        }
        Ok(())
    }

    async fn complete(mut self) -> ImportResult<u64> {
        self.encoder.finish();
        let chunk = self.encoder.take();
        self.send(CopyMessage::Data(chunk)).await?;
        self.send(CopyMessage::Finish).await?;
        self.wait().await
    }

    async fn abort(mut self) -> ImportResult<()> {
        self.send(CopyMessage::Abort).await?;
        self.wait().await?;
        Ok(())
    }
}
