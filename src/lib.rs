pub mod config;
pub mod database;
pub mod error;
pub mod import;
pub mod models;
pub mod watcher;

use crate::config::AppConfig;
use crate::database::PgImportStore;
use crate::error::ImportResult;
use crate::import::ImportScheduler;
use crate::watcher::SyslogFileWatcher;
use env_logger::Env;
use sqlx::PgPool;
use std::sync::{Arc, Once};
use tokio_util::sync::CancellationToken;

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info,sqlx=warn")).init();
    });
}

/// Run the importer until `cancel` fires.
///
/// The watcher runs on its own task and feeds the scheduler, which runs on
/// the caller's task. Cancellation stops the watcher, lets the file in
/// progress finish and returns.
pub async fn run(config: AppConfig, pool: PgPool, cancel: CancellationToken) -> ImportResult<()> {
    let store = Arc::new(PgImportStore::new(pool));
    let mut scheduler = ImportScheduler::new(store, &config.importer);
    let sender = scheduler.subscribe()?;
    let watcher = SyslogFileWatcher::new(&config.watcher, sender)?;

    let watcher_cancel = cancel.clone();
    let watcher_task = tokio::spawn(async move {
        if let Err(err) = watcher.run(watcher_cancel.clone()).await {
            log::error!("syslog files watcher failed: {}", err);
            watcher_cancel.cancel();
        }
    });

    scheduler.run(cancel.clone()).await;
    cancel.cancel();

    if let Err(err) = watcher_task.await {
        log::error!("watcher task failed: {}", err);
    }
    Ok(())
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    pub use database::{TestDatabase, TestDatabaseError};
    pub use memory::MemoryStore;

    pub mod memory {
        use crate::error::{ImportError, ImportResult};
        use crate::import::bulk_load::{BulkLoadSession, ImportStore};
        use crate::import::fingerprint::Fingerprint;
        use crate::models::{ImportedFile, StagedRow};
        use async_trait::async_trait;
        use parking_lot::Mutex;
        use std::path::Path;
        use std::sync::Arc;

        #[derive(Debug, Default)]
        struct State {
            files: Vec<ImportedFile>,
            next_id: i32,
            staging: Vec<StagedRow>,
            permanent: Vec<StagedRow>,
            fail_prepare: bool,
            fail_open_session: bool,
            fail_writes: bool,
            fail_complete: bool,
            prepare_calls: usize,
            sessions_opened: usize,
            sessions_aborted: usize,
            completions: usize,
            last_max_days_to_keep: Option<i16>,
        }

        impl State {
            fn insert_file(&mut self, path: &str, fingerprint: &Fingerprint, complete: bool) -> bool {
                if self
                    .files
                    .iter()
                    .any(|file| file.file_fingerprint == fingerprint.as_bytes())
                {
                    return false;
                }
                self.next_id += 1;
                self.files.push(ImportedFile {
                    id: self.next_id,
                    file_fingerprint: fingerprint.as_bytes().to_vec(),
                    file_path: path.to_string(),
                    is_complete: complete,
                });
                true
            }
        }

        fn storage_error() -> ImportError {
            ImportError::Storage(sqlx::Error::PoolTimedOut)
        }

        /// In-memory [`ImportStore`] with the same bookkeeping semantics as the
        /// Postgres store and switchable failures.
        #[derive(Clone, Default)]
        pub struct MemoryStore {
            state: Arc<Mutex<State>>,
        }

        impl MemoryStore {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn seed_completed_file(&self, path: &str, fingerprint: Fingerprint) {
                self.state.lock().insert_file(path, &fingerprint, true);
            }

            pub fn seed_incomplete_file(&self, path: &str, fingerprint: Fingerprint) {
                self.state.lock().insert_file(path, &fingerprint, false);
            }

            pub fn fail_prepare(&self, fail: bool) {
                self.state.lock().fail_prepare = fail;
            }

            pub fn fail_open_session(&self, fail: bool) {
                self.state.lock().fail_open_session = fail;
            }

            pub fn fail_writes(&self, fail: bool) {
                self.state.lock().fail_writes = fail;
            }

            pub fn fail_complete(&self, fail: bool) {
                self.state.lock().fail_complete = fail;
            }

            pub fn staged_rows(&self) -> Vec<StagedRow> {
                self.state.lock().staging.clone()
            }

            pub fn stored_rows(&self) -> Vec<StagedRow> {
                self.state.lock().permanent.clone()
            }

            pub fn files(&self) -> Vec<ImportedFile> {
                self.state.lock().files.clone()
            }

            pub fn has_bookkeeping_for(&self, path: &Path) -> bool {
                let path = path.to_string_lossy();
                self.state
                    .lock()
                    .files
                    .iter()
                    .any(|file| file.file_path == path)
            }

            pub fn is_complete(&self, path: &Path) -> bool {
                let path = path.to_string_lossy();
                self.state
                    .lock()
                    .files
                    .iter()
                    .any(|file| file.file_path == path && file.is_complete)
            }

            pub fn prepare_calls(&self) -> usize {
                self.state.lock().prepare_calls
            }

            /// Number of `open_session` calls, failed ones included.
            pub fn sessions_opened(&self) -> usize {
                self.state.lock().sessions_opened
            }

            pub fn sessions_aborted(&self) -> usize {
                self.state.lock().sessions_aborted
            }

            /// Number of successful completion calls.
            pub fn completions(&self) -> usize {
                self.state.lock().completions
            }

            pub fn last_max_days_to_keep(&self) -> Option<i16> {
                self.state.lock().last_max_days_to_keep
            }
        }

        pub struct MemorySession {
            state: Arc<Mutex<State>>,
            rows: Vec<StagedRow>,
        }

        #[async_trait]
        impl BulkLoadSession for MemorySession {
            async fn write(&mut self, row: &StagedRow) -> ImportResult<()> {
                if self.state.lock().fail_writes {
                    return Err(storage_error());
                }
                self.rows.push(row.clone());
                Ok(())
            }

            async fn complete(self) -> ImportResult<u64> {
                let written = self.rows.len() as u64;
                self.state.lock().staging.extend(self.rows);
                Ok(written)
            }

            async fn abort(self) -> ImportResult<()> {
                self.state.lock().sessions_aborted += 1;
                Ok(())
            }
        }

        #[async_trait]
        impl ImportStore for MemoryStore {
            type Session = MemorySession;

            async fn prepare_batch(&self) -> ImportResult<()> {
                let mut state = self.state.lock();
                state.prepare_calls += 1;
                if state.fail_prepare {
                    return Err(storage_error());
                }
                state.staging.clear();
                state.files.retain(|file| file.is_complete);
                Ok(())
            }

            async fn recent_completed_files(&self, limit: i64) -> ImportResult<Vec<ImportedFile>> {
                let state = self.state.lock();
                let mut files: Vec<ImportedFile> = state
                    .files
                    .iter()
                    .filter(|file| file.is_complete)
                    .cloned()
                    .collect();
                files.sort_by(|a, b| b.id.cmp(&a.id));
                files.truncate(limit.max(0) as usize);
                Ok(files)
            }

            async fn open_session(&self) -> ImportResult<MemorySession> {
                let mut state = self.state.lock();
                state.sessions_opened += 1;
                if state.fail_open_session {
                    return Err(storage_error());
                }
                Ok(MemorySession {
                    state: self.state.clone(),
                    rows: Vec::new(),
                })
            }

            async fn record_file_imported(
                &self,
                path: &str,
                fingerprint: &Fingerprint,
            ) -> ImportResult<()> {
                self.state.lock().insert_file(path, fingerprint, false);
                Ok(())
            }

            async fn complete_batch(&self, max_days_to_keep: i16) -> ImportResult<()> {
                let mut state = self.state.lock();
                if state.fail_complete {
                    return Err(storage_error());
                }

                let pending: Vec<Vec<u8>> = state
                    .files
                    .iter()
                    .filter(|file| !file.is_complete)
                    .map(|file| file.file_fingerprint.clone())
                    .collect();
                let staged = std::mem::take(&mut state.staging);
                state.permanent.extend(
                    staged
                        .into_iter()
                        .filter(|row| pending.iter().any(|f| f == row.fingerprint.as_bytes())),
                );
                for file in state.files.iter_mut() {
                    file.is_complete = true;
                }

                state.completions += 1;
                state.last_max_days_to_keep = Some(max_days_to_keep);
                Ok(())
            }
        }
    }

    pub mod database {
        use log::LevelFilter;
        use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use sqlx::{ConnectOptions, PgPool};
        use testcontainers::ImageExt;
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use uuid::Uuid;

        use crate::database::MIGRATOR;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("TEST_DATABASE_URL not set")]
            MissingUrl,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        impl TestDatabaseError {
            /// Whether the failure means no database could be provisioned at
            /// all, as opposed to a broken schema or query.
            pub fn is_unavailable(&self) -> bool {
                matches!(
                    self,
                    TestDatabaseError::MissingUrl | TestDatabaseError::Container(_)
                )
            }
        }

        /// Migrated scratch database for integration tests, dropped on
        /// [`TestDatabase::close`].
        pub struct TestDatabase {
            pool: PgPool,
            admin_options: PgConnectOptions,
            database_name: String,
            _container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Use `TEST_DATABASE_URL` when set, otherwise launch a disposable
            /// Postgres container.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                match std::env::var("TEST_DATABASE_URL") {
                    Ok(url) if !url.trim().is_empty() => Self::create(&url, None).await,
                    _ => Self::new().await,
                }
            }

            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default().with_tag("16-alpine").start().await?;
                let host = container.get_host().await?;
                let port = container.get_host_port_ipv4(5432).await?;
                let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
                Self::create(&url, Some(container)).await
            }

            async fn create(
                url: &str,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let admin_options = url
                    .parse::<PgConnectOptions>()?
                    .log_statements(LevelFilter::Off)
                    .database("postgres");
                let database_name = format!("syslog_test_{}", Uuid::new_v4().simple());

                let admin = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;
                sqlx::query(&format!("CREATE DATABASE \"{}\"", database_name))
                    .execute(&admin)
                    .await?;
                admin.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(admin_options.clone().database(&database_name))
                    .await?;
                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool,
                    admin_options,
                    database_name,
                    _container: container,
                })
            }

            pub fn pool(&self) -> &PgPool {
                &self.pool
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool.clone()
            }

            /// Close the pool and drop the scratch database.
            pub async fn close(self) -> Result<(), TestDatabaseError> {
                self.pool.close().await;

                let admin = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(self.admin_options.clone())
                    .await?;
                sqlx::query(&format!(
                    "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
                    self.database_name
                ))
                .execute(&admin)
                .await?;
                admin.close().await;
                Ok(())
            }
        }
    }
}
