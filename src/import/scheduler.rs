//! Single-consumer import loop.
//!
//! The scheduler sleeps until a file is queued, then runs one cycle:
//!
//! - **prepare**: truncate staging and drop unfinished bookkeeping rows. A
//!   failure here discards everything queued and ends the cycle.
//! - **drain**: process the file that woke the loop, then the files that were
//!   already queued at that moment, one at a time. Later arrivals wait for the
//!   next cycle.
//! - **complete**: move staged rows of the imported files into permanent
//!   storage, then archive them if enabled.
//!
//! More than [`MAX_STORAGE_FAILURES`] storage failures within one cycle open
//! the circuit: the rest of the queue is discarded and the cycle proceeds to
//! completion with whatever was imported so far.

use crate::config::ImporterConfig;
use crate::error::ConfigError;
use crate::import::archive::Archiver;
use crate::import::bulk_load::ImportStore;
use crate::import::processor::{FileProcessor, ProcessOutcome};
use crate::import::queue::{FileQueue, FileTask, FileTaskSender, file_queue};
use crate::import::stats::BatchReport;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Storage failures tolerated per cycle before the circuit opens.
pub const MAX_STORAGE_FAILURES: usize = 5;

/// Files attempted in one cycle.
#[derive(Debug, Default)]
pub struct BatchContext {
    completed: Vec<PathBuf>,
    storage_failures: usize,
    report: BatchReport,
}

impl BatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> &[PathBuf] {
        &self.completed
    }

    pub fn storage_failures(&self) -> usize {
        self.storage_failures
    }

    pub fn circuit_open(&self) -> bool {
        self.storage_failures > MAX_STORAGE_FAILURES
    }

    fn record(&mut self, task: &FileTask, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Success => {
                self.report.imported += 1;
                self.completed.push(task.path().to_path_buf());
            }
            ProcessOutcome::AlreadyProcessed => self.report.already_processed += 1,
            ProcessOutcome::StorageFailure => {
                self.report.storage_failures += 1;
                self.storage_failures += 1;
            }
            ProcessOutcome::GenericFailure => self.report.generic_failures += 1,
        }
    }
}

pub struct ImportScheduler<S: ImportStore> {
    store: Arc<S>,
    processor: FileProcessor<S>,
    queue: FileQueue,
    sender: Option<FileTaskSender>,
    archiver: Option<Archiver>,
    max_days_to_keep: i16,
}

impl<S: ImportStore> ImportScheduler<S> {
    pub fn new(store: Arc<S>, config: &ImporterConfig) -> Self {
        let (sender, queue) = file_queue();
        Self {
            processor: FileProcessor::new(store.clone(), config.excluded_hosts_or_apps.clone()),
            store,
            queue,
            sender: Some(sender),
            archiver: config.compress_after_import.then(Archiver::new),
            max_days_to_keep: config.max_days_to_keep,
        }
    }

    /// Hand out the producer side of the work queue. Succeeds once.
    pub fn subscribe(&mut self) -> Result<FileTaskSender, ConfigError> {
        self.sender.take().ok_or(ConfigError::AlreadySubscribed)
    }

    /// Run cycles until cancelled or every producer is gone.
    pub async fn run(mut self, cancel: CancellationToken) {
        log::info!("import scheduler started");

        while let Some(first) = self.queue.next(&cancel).await {
            let report = self.run_cycle(first, &cancel).await;
            log::info!("import cycle finished: {}", report);
        }

        if cancel.is_cancelled() {
            log::info!("import scheduler stopped");
        } else {
            log::warn!("file event source closed, import scheduler stopped");
        }
    }

    /// Run one cycle starting with `first`.
    pub async fn run_cycle(&mut self, first: FileTask, cancel: &CancellationToken) -> BatchReport {
        let mut batch = BatchContext::new();

        if let Err(err) = self.store.prepare_batch().await {
            let discarded = 1 + self.queue.discard_pending();
            log::error!(
                "failed to prepare import batch, discarding {} queued file(s): {}",
                discarded,
                err
            );
            batch.report.preparation_failed = true;
            batch.report.discarded = discarded;
            return batch.report;
        }

        // Only what had accumulated by the time the cycle woke up.
        let mut remaining = self.queue.len();
        let mut next = Some(first);
        while let Some(task) = next.take() {
            let outcome = self.processor.process(&task).await;
            log::debug!("{}: {:?}", task.path().display(), outcome);
            batch.record(&task, outcome);

            if outcome == ProcessOutcome::AlreadyProcessed {
                if let Some(archiver) = &self.archiver {
                    if archiver.archive_best_effort(task.path()).await {
                        batch.report.archived += 1;
                    }
                }
            }

            if batch.circuit_open() {
                let discarded = self.queue.discard_pending();
                log::warn!(
                    "{} storage failures in this cycle, discarding {} queued file(s)",
                    batch.storage_failures,
                    discarded
                );
                batch.report.circuit_open = true;
                batch.report.discarded += discarded;
                break;
            }

            if cancel.is_cancelled() {
                break;
            }
            if remaining > 0 {
                remaining -= 1;
                next = self.queue.try_next();
            }
        }

        self.complete_batch(&mut batch, cancel).await;
        batch.report
    }

    async fn complete_batch(&self, batch: &mut BatchContext, cancel: &CancellationToken) {
        if batch.completed.is_empty() {
            return;
        }
        if cancel.is_cancelled() {
            log::warn!(
                "shutdown requested, leaving {} staged file(s) for the next start",
                batch.completed.len()
            );
            return;
        }

        if let Err(err) = self.store.complete_batch(self.max_days_to_keep).await {
            log::error!(
                "failed to complete import of {} file(s): {}",
                batch.completed.len(),
                err
            );
            return;
        }

        batch.report.completed = true;
        log::info!("completed import of {} file(s)", batch.completed.len());

        if let Some(archiver) = &self.archiver {
            for path in &batch.completed {
                if archiver.archive_best_effort(path).await {
                    batch.report.archived += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;

    #[test]
    fn circuit_opens_after_the_failure_budget() {
        let mut batch = BatchContext::new();
        let task = FileTask::new("/logs/syslog_1");
        for _ in 0..MAX_STORAGE_FAILURES {
            batch.record(&task, ProcessOutcome::StorageFailure);
            assert!(!batch.circuit_open());
        }
        batch.record(&task, ProcessOutcome::StorageFailure);
        assert!(batch.circuit_open());
        assert_eq!(batch.storage_failures(), MAX_STORAGE_FAILURES + 1);
    }

    #[test]
    fn only_successes_are_completed() {
        let mut batch = BatchContext::new();
        batch.record(&FileTask::new("/logs/a"), ProcessOutcome::Success);
        batch.record(&FileTask::new("/logs/b"), ProcessOutcome::AlreadyProcessed);
        batch.record(&FileTask::new("/logs/c"), ProcessOutcome::GenericFailure);
        assert_eq!(batch.completed(), &[PathBuf::from("/logs/a")]);
        assert_eq!(batch.report.attempted(), 3);
    }

    #[test]
    fn subscribe_succeeds_once() {
        let store = Arc::new(MemoryStore::new());
        let mut scheduler = ImportScheduler::new(store, &ImporterConfig::default());
        assert!(scheduler.subscribe().is_ok());
        assert!(matches!(
            scheduler.subscribe(),
            Err(ConfigError::AlreadySubscribed)
        ));
    }

    #[tokio::test]
    async fn failed_preparation_discards_the_queue() {
        let store = Arc::new(MemoryStore::new());
        store.fail_prepare(true);
        let mut scheduler = ImportScheduler::new(store.clone(), &ImporterConfig::default());
        let sender = scheduler.subscribe().unwrap();
        sender.push("/logs/syslog_2");
        sender.push("/logs/syslog_3");

        let report = scheduler
            .run_cycle(FileTask::new("/logs/syslog_1"), &CancellationToken::new())
            .await;

        assert!(report.preparation_failed);
        assert_eq!(report.discarded, 3);
        assert_eq!(report.attempted(), 0);
        assert!(scheduler.queue.is_empty());
        assert_eq!(store.completions(), 0);
    }

    #[tokio::test]
    async fn run_exits_on_cancellation() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = ImportScheduler::new(store, &ImporterConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), scheduler.run(cancel))
            .await
            .unwrap();
    }
}
