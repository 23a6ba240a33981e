use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use syslog_importer::config::ImporterConfig;
use syslog_importer::error::ImportResult;
use syslog_importer::import::archive::archive_path;
use syslog_importer::import::{
    ExclusionSet, FileTask, FileTaskSender, Fingerprint, ImportScheduler, ImportStore,
    MAX_STORAGE_FAILURES,
};
use syslog_importer::models::ImportedFile;
use syslog_importer::test_support::MemoryStore;
use syslog_importer::test_support::memory::MemorySession;
use tokio_util::sync::CancellationToken;

fn write_syslog(dir: &Path, name: &str, messages: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let content: String = messages
        .iter()
        .enumerate()
        .map(|(i, message)| {
            format!(
                "<14>1 2024-03-01T10:00:{:02}+01:00 host1 app {} - - {}\n",
                i, i, message
            )
        })
        .collect();
    std::fs::write(&path, content).unwrap();
    path
}

fn importer_config(compress: bool) -> ImporterConfig {
    ImporterConfig {
        excluded_hosts_or_apps: ExclusionSet::default(),
        max_days_to_keep: 30,
        compress_after_import: compress,
    }
}

#[tokio::test]
async fn cycle_imports_completes_and_preserves_order() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_syslog(dir.path(), "syslog_1", &["a1", "a2", "a3"]);
    let second = write_syslog(dir.path(), "syslog_2", &["b1", "b2"]);

    let store = Arc::new(MemoryStore::new());
    let mut scheduler = ImportScheduler::new(store.clone(), &importer_config(false));
    let sender = scheduler.subscribe().unwrap();
    sender.push(second.clone());

    let report = scheduler
        .run_cycle(FileTask::new(first.clone()), &CancellationToken::new())
        .await;

    assert_eq!(report.imported, 2);
    assert!(report.completed);
    assert_eq!(store.prepare_calls(), 1);
    assert_eq!(store.completions(), 1);
    assert_eq!(store.last_max_days_to_keep(), Some(30));
    assert!(store.is_complete(&first));
    assert!(store.is_complete(&second));

    let messages: Vec<String> = store
        .stored_rows()
        .into_iter()
        .map(|row| row.message)
        .collect();
    assert_eq!(messages, vec!["a1", "a2", "a3", "b1", "b2"]);
    assert!(first.exists(), "archival is disabled");
}

#[tokio::test]
async fn six_storage_failures_discard_the_rest_of_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<PathBuf> = (0..10)
        .map(|i| write_syslog(dir.path(), &format!("syslog_{:02}", i), &["line"]))
        .collect();

    let store = Arc::new(MemoryStore::new());
    store.fail_open_session(true);
    let mut scheduler = ImportScheduler::new(store.clone(), &importer_config(false));
    let sender = scheduler.subscribe().unwrap();
    for path in &files[1..] {
        sender.push(path.clone());
    }

    let report = scheduler
        .run_cycle(FileTask::new(files[0].clone()), &CancellationToken::new())
        .await;

    assert!(report.circuit_open);
    assert_eq!(report.storage_failures, MAX_STORAGE_FAILURES + 1);
    assert_eq!(report.discarded, 10 - (MAX_STORAGE_FAILURES + 1));
    assert_eq!(store.sessions_opened(), MAX_STORAGE_FAILURES + 1);
    assert!(!report.completed);
    assert_eq!(store.completions(), 0);
}

#[tokio::test]
async fn storage_failures_below_the_budget_keep_draining() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<PathBuf> = (0..MAX_STORAGE_FAILURES)
        .map(|i| write_syslog(dir.path(), &format!("syslog_{}", i), &["line"]))
        .collect();

    let store = Arc::new(MemoryStore::new());
    store.fail_open_session(true);
    let mut scheduler = ImportScheduler::new(store.clone(), &importer_config(false));
    let sender = scheduler.subscribe().unwrap();
    for path in &files[1..] {
        sender.push(path.clone());
    }

    let report = scheduler
        .run_cycle(FileTask::new(files[0].clone()), &CancellationToken::new())
        .await;

    assert!(!report.circuit_open);
    assert_eq!(report.storage_failures, MAX_STORAGE_FAILURES);
    assert_eq!(report.discarded, 0);
}

#[tokio::test]
async fn generic_failures_skip_only_that_file() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("syslog_empty");
    std::fs::write(&empty, b"").unwrap();
    let good = write_syslog(dir.path(), "syslog_good", &["ok"]);

    let store = Arc::new(MemoryStore::new());
    let mut scheduler = ImportScheduler::new(store.clone(), &importer_config(false));
    let sender = scheduler.subscribe().unwrap();
    sender.push(dir.path().join("syslog_missing"));
    sender.push(good.clone());

    let report = scheduler
        .run_cycle(FileTask::new(empty.clone()), &CancellationToken::new())
        .await;

    assert_eq!(report.generic_failures, 2);
    assert_eq!(report.imported, 1);
    assert!(!store.has_bookkeeping_for(&empty));
    assert!(store.is_complete(&good));
}

#[tokio::test]
async fn archives_after_successful_completion_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_syslog(dir.path(), "syslog_1", &["one"]);

    let store = Arc::new(MemoryStore::new());
    store.fail_complete(true);
    let mut scheduler = ImportScheduler::new(store.clone(), &importer_config(true));

    let report = scheduler
        .run_cycle(FileTask::new(path.clone()), &CancellationToken::new())
        .await;
    assert_eq!(report.imported, 1);
    assert!(!report.completed);
    assert_eq!(report.archived, 0);
    assert!(path.exists());

    let other = write_syslog(dir.path(), "syslog_2", &["two"]);
    store.fail_complete(false);
    let report = scheduler
        .run_cycle(FileTask::new(other.clone()), &CancellationToken::new())
        .await;
    assert!(report.completed);
    assert_eq!(report.archived, 1);
    assert!(!other.exists());
    assert!(archive_path(&other).exists());
}

#[tokio::test]
async fn already_processed_files_are_archived_without_import() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_syslog(dir.path(), "syslog_1", &["one"]);

    let store = Arc::new(MemoryStore::new());
    store.seed_completed_file(&path.to_string_lossy(), Fingerprint::of(b"earlier content"));
    let mut scheduler = ImportScheduler::new(store.clone(), &importer_config(true));

    let report = scheduler
        .run_cycle(FileTask::new(path.clone()), &CancellationToken::new())
        .await;

    assert_eq!(report.already_processed, 1);
    assert_eq!(report.archived, 1);
    assert_eq!(store.sessions_opened(), 0);
    assert_eq!(store.completions(), 0);
    assert!(archive_path(&path).exists());
}

#[tokio::test]
async fn restart_skips_completed_files_and_retries_unfinished_ones() {
    let dir = tempfile::tempdir().unwrap();
    let done = write_syslog(dir.path(), "syslog_done", &["done"]);
    let unfinished = write_syslog(dir.path(), "syslog_unfinished", &["retry"]);

    // State left behind by a previous process that crashed before completion.
    let store = Arc::new(MemoryStore::new());
    store.seed_completed_file(&done.to_string_lossy(), Fingerprint::of(b"done"));
    store.seed_incomplete_file(&unfinished.to_string_lossy(), Fingerprint::of(b"retry"));

    let mut scheduler = ImportScheduler::new(store.clone(), &importer_config(false));
    let sender = scheduler.subscribe().unwrap();
    sender.push(unfinished.clone());

    let report = scheduler
        .run_cycle(FileTask::new(done.clone()), &CancellationToken::new())
        .await;

    assert_eq!(report.already_processed, 1);
    assert_eq!(report.imported, 1);
    assert!(store.is_complete(&unfinished));
    let messages: Vec<String> = store
        .stored_rows()
        .into_iter()
        .map(|row| row.message)
        .collect();
    assert_eq!(messages, vec!["retry"]);
}

#[tokio::test]
async fn same_path_is_imported_once_per_process() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_syslog(dir.path(), "syslog_1", &["one"]);

    let store = Arc::new(MemoryStore::new());
    let mut scheduler = ImportScheduler::new(store.clone(), &importer_config(false));

    let cancel = CancellationToken::new();
    let first = scheduler.run_cycle(FileTask::new(path.clone()), &cancel).await;
    let second = scheduler.run_cycle(FileTask::new(path.clone()), &cancel).await;

    assert_eq!(first.imported, 1);
    assert_eq!(second.already_processed, 1);
    assert_eq!(store.sessions_opened(), 1);
    assert_eq!(store.stored_rows().len(), 1);
}

#[tokio::test]
async fn cancellation_skips_completion() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_syslog(dir.path(), "syslog_1", &["one"]);

    let store = Arc::new(MemoryStore::new());
    let mut scheduler = ImportScheduler::new(store.clone(), &importer_config(false));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = scheduler.run_cycle(FileTask::new(path.clone()), &cancel).await;

    assert_eq!(report.imported, 1);
    assert!(!report.completed);
    assert_eq!(store.completions(), 0);
    assert!(!store.is_complete(&path));
}

#[tokio::test]
async fn scheduler_loop_processes_pushed_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_syslog(dir.path(), "syslog_1", &["one", "two"]);

    let store = Arc::new(MemoryStore::new());
    let mut scheduler = ImportScheduler::new(store.clone(), &importer_config(false));
    let sender = scheduler.subscribe().unwrap();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(cancel.clone()));

    sender.push(path.clone());

    tokio::time::timeout(Duration::from_secs(10), async {
        while store.completions() == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("cycle completed");

    cancel.cancel();
    handle.await.unwrap();
    assert!(store.is_complete(&path));
    assert_eq!(store.stored_rows().len(), 2);
}

/// Store that queues another file every time a session opens, the way a busy
/// log directory keeps producing files while a cycle runs.
struct BusyDirectoryStore {
    inner: MemoryStore,
    sender: OnceLock<FileTaskSender>,
    dir: PathBuf,
    arrivals: AtomicUsize,
}

#[async_trait]
impl ImportStore for BusyDirectoryStore {
    type Session = MemorySession;

    async fn prepare_batch(&self) -> ImportResult<()> {
        self.inner.prepare_batch().await
    }

    async fn recent_completed_files(&self, limit: i64) -> ImportResult<Vec<ImportedFile>> {
        self.inner.recent_completed_files(limit).await
    }

    async fn open_session(&self) -> ImportResult<MemorySession> {
        let n = self.arrivals.fetch_add(1, Ordering::SeqCst);
        let late = write_syslog(&self.dir, &format!("syslog_late_{}", n), &["late"]);
        if let Some(sender) = self.sender.get() {
            sender.push(late);
        }
        self.inner.open_session().await
    }

    async fn record_file_imported(&self, path: &str, fingerprint: &Fingerprint) -> ImportResult<()> {
        self.inner.record_file_imported(path, fingerprint).await
    }

    async fn complete_batch(&self, max_days_to_keep: i16) -> ImportResult<()> {
        self.inner.complete_batch(max_days_to_keep).await
    }
}

#[tokio::test]
async fn files_arriving_mid_cycle_wait_for_the_next_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_syslog(dir.path(), "syslog_1", &["one"]);
    let queued = write_syslog(dir.path(), "syslog_2", &["two"]);

    let store = Arc::new(BusyDirectoryStore {
        inner: MemoryStore::new(),
        sender: OnceLock::new(),
        dir: dir.path().to_path_buf(),
        arrivals: AtomicUsize::new(0),
    });
    let mut scheduler = ImportScheduler::new(store.clone(), &importer_config(false));
    let sender = scheduler.subscribe().unwrap();
    sender.push(queued.clone());
    assert!(store.sender.set(sender).is_ok());

    let report = scheduler
        .run_cycle(FileTask::new(first.clone()), &CancellationToken::new())
        .await;

    assert_eq!(report.attempted(), 2);
    assert_eq!(report.imported, 2);
    assert!(report.completed);
    assert!(store.inner.is_complete(&first));
    assert!(store.inner.is_complete(&queued));
    assert_eq!(store.arrivals.load(Ordering::SeqCst), 2);
}
