//! Work queue between file-event producers and the import scheduler.
//!
//! Producers hold a cloneable [`FileTaskSender`] and may push from any task
//! or thread without blocking. The scheduler owns the single [`FileQueue`].

use crate::error::{ImportError, ImportResult};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A candidate file announced by the file-event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    path: PathBuf,
}

impl FileTask {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the file. Fails if it vanished or is not a regular file.
    pub async fn size(&self) -> ImportResult<u64> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|err| ImportError::file_access(&self.path, err.to_string()))?;
        if !metadata.is_file() {
            return Err(ImportError::file_access(&self.path, "not a regular file"));
        }
        Ok(metadata.len())
    }

    /// Open the file for sequential reading on a blocking thread.
    pub async fn open(&self) -> ImportResult<std::fs::File> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|err| ImportError::file_access(&self.path, err.to_string()))?;
        Ok(file.into_std().await)
    }
}

/// Producer handle. Cloning is cheap; pushing never blocks.
#[derive(Debug, Clone)]
pub struct FileTaskSender {
    tx: mpsc::UnboundedSender<FileTask>,
}

impl FileTaskSender {
    /// Queue a file. Returns false once the consumer is gone.
    pub fn push(&self, path: impl Into<PathBuf>) -> bool {
        self.tx.send(FileTask::new(path)).is_ok()
    }
}

/// Consumer side, owned by the scheduler.
#[derive(Debug)]
pub struct FileQueue {
    rx: mpsc::UnboundedReceiver<FileTask>,
}

pub fn file_queue() -> (FileTaskSender, FileQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FileTaskSender { tx }, FileQueue { rx })
}

impl FileQueue {
    /// Wait for the next task. Returns `None` on cancellation or when every
    /// producer has been dropped.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<FileTask> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            task = self.rx.recv() => task,
        }
    }

    /// Take a task only if one is already queued.
    pub fn try_next(&mut self) -> Option<FileTask> {
        self.rx.try_recv().ok()
    }

    /// Drop everything currently queued. Returns how many tasks were dropped.
    pub fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tasks_come_out_in_push_order() {
        let (sender, mut queue) = file_queue();
        let other = sender.clone();
        assert!(sender.push("/logs/syslog_1"));
        assert!(other.push("/logs/syslog_2"));

        let cancel = CancellationToken::new();
        assert_eq!(
            queue.next(&cancel).await.unwrap().path(),
            Path::new("/logs/syslog_1")
        );
        assert_eq!(queue.try_next().unwrap().path(), Path::new("/logs/syslog_2"));
        assert!(queue.try_next().is_none());
    }

    #[tokio::test]
    async fn cancellation_ends_the_wait() {
        let (_sender, mut queue) = file_queue();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(queue.next(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn discard_pending_empties_the_queue() {
        let (sender, mut queue) = file_queue();
        for i in 0..4 {
            sender.push(format!("/logs/syslog_{}", i));
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.discard_pending(), 4);
        assert!(queue.is_empty());
    }

    #[test]
    fn push_reports_a_closed_queue() {
        let (sender, queue) = file_queue();
        drop(queue);
        assert!(!sender.push("/logs/syslog_1"));
    }

    #[tokio::test]
    async fn size_fails_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let task = FileTask::new(dir.path().join("syslog_gone"));
        assert!(matches!(task.size().await, Err(ImportError::FileAccess { .. })));

        let present = dir.path().join("syslog_1");
        std::fs::write(&present, b"line\n").unwrap();
        assert_eq!(FileTask::new(present).size().await.unwrap(), 5);
    }
}
