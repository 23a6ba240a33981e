//! Imports a single file end to end.
//!
//! Steps, in order:
//!
//! 1. re-check that the file exists and is not empty
//! 2. fingerprint its leading chunk
//! 3. seed the registry from the store when it is cold
//! 4. skip paths already in the registry
//! 5. start the parser and open a bulk-load session
//! 6. stream parser events through the row filter into the session
//! 7. complete the session and record the file in the bookkeeping table
//! 8. remember the path in the registry
//!
//! Errors never leave [`FileProcessor::process`]: they are folded into a
//! [`ProcessOutcome`], storage errors into `StorageFailure` and everything
//! else into `GenericFailure`.

use crate::error::{ImportError, ImportResult};
use crate::import::bulk_load::{BulkLoadSession, ImportStore};
use crate::import::filter::{ExclusionSet, RowFilter};
use crate::import::fingerprint::ContentFingerprinter;
use crate::import::parser::{LineParser, ParserHandle, spawn_parser};
use crate::import::queue::FileTask;
use crate::import::registry::ProcessedFileRegistry;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success,
    AlreadyProcessed,
    StorageFailure,
    GenericFailure,
}

pub struct FileProcessor<S: ImportStore> {
    store: Arc<S>,
    registry: ProcessedFileRegistry,
    fingerprinter: ContentFingerprinter,
    exclusions: ExclusionSet,
}

impl<S: ImportStore> FileProcessor<S> {
    pub fn new(store: Arc<S>, exclusions: ExclusionSet) -> Self {
        Self {
            store,
            registry: ProcessedFileRegistry::new(),
            fingerprinter: ContentFingerprinter::new(),
            exclusions,
        }
    }

    pub fn registry(&self) -> &ProcessedFileRegistry {
        &self.registry
    }

    pub async fn process(&mut self, task: &FileTask) -> ProcessOutcome {
        match self.try_process(task).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_storage() => {
                log::error!(
                    "storage failure while importing {}: {}",
                    task.path().display(),
                    err
                );
                ProcessOutcome::StorageFailure
            }
            Err(err) => {
                log::warn!("skipping {}: {}", task.path().display(), err);
                ProcessOutcome::GenericFailure
            }
        }
    }

    async fn try_process(&mut self, task: &FileTask) -> ImportResult<ProcessOutcome> {
        let path = task.path();
        let size = task.size().await?;
        if size == 0 {
            return Err(ImportError::file_access(path, "file is empty"));
        }

        let fingerprint = self.fingerprinter.compute(path).await?;

        self.registry.refresh_if_empty(self.store.as_ref()).await?;
        if self.registry.contains(path) {
            log::debug!("file {} already processed", path.display());
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let file = task.open().await?;
        let mut parser = spawn_parser(file, LineParser::new());
        let mut session = self.store.open_session().await?;
        let mut filter = RowFilter::new(fingerprint, &self.exclusions);

        if !parser.wait_started().await {
            log::warn!(
                "parser for {} did not acknowledge its start in time",
                path.display()
            );
        }

        if let Err(err) = stream_rows(&mut parser, &mut filter, &mut session).await {
            if let Err(abort_err) = session.abort().await {
                log::warn!(
                    "failed to abort bulk load for {}: {}",
                    path.display(),
                    abort_err
                );
            }
            return Err(err);
        }

        let lines = parser.join().await?;
        let written = session.complete().await?;
        log::debug!(
            "{}: {} lines, {} rows written ({})",
            path.display(),
            lines,
            written,
            filter.stats()
        );

        let file_path = path.to_string_lossy();
        self.store
            .record_file_imported(&file_path, &fingerprint)
            .await?;
        self.registry.insert(path);

        if written == 0 {
            log::warn!(
                "no rows imported from {} ({} bytes)",
                path.display(),
                size
            );
        }

        Ok(ProcessOutcome::Success)
    }
}

async fn stream_rows<B: BulkLoadSession>(
    parser: &mut ParserHandle,
    filter: &mut RowFilter<'_>,
    session: &mut B,
) -> ImportResult<()> {
    while let Some(event) = parser.next().await {
        if let Some(row) = filter.accept(event) {
            session.write(&row).await?;
        }
    }
    Ok(())
}
