//! File-event source feeding the import queue.
//!
//! The syslog directory is usually a mounted volume, so changes are detected
//! by polling. Any change triggers a rescan of the directory; every regular
//! file whose name matches the configured glob (and does not carry the
//! archive suffix) is pushed to the queue once per process lifetime.

use crate::config::{ARCHIVE_SUFFIX, WatcherConfig};
use crate::error::{ConfigError, ImportError, ImportResult};
use crate::import::queue::FileTaskSender;
use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// File-name glob supporting `*` and `?`. Matches names, not paths.
#[derive(Debug, Clone)]
pub struct FilePattern {
    pattern: String,
    regex: Regex,
}

impl FilePattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        if pattern.ends_with(ARCHIVE_SUFFIX) {
            return Err(ConfigError::ArchivalSuffixPattern(pattern.to_string()));
        }

        let mut source = String::with_capacity(pattern.len() * 2 + 2);
        source.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => source.push_str("[^/]*"),
                '?' => source.push_str("[^/]"),
                other => source.push_str(&regex::escape(&other.to_string())),
            }
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|err| ConfigError::Invalid {
            key: "SYSLOG_FILE_PATTERN",
            value: pattern.to_string(),
            reason: err.to_string(),
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, file_name: &str) -> bool {
        !file_name.ends_with(ARCHIVE_SUFFIX) && self.regex.is_match(file_name)
    }
}

struct Announcer {
    directory: PathBuf,
    pattern: FilePattern,
    seen: Mutex<HashSet<PathBuf>>,
    sender: FileTaskSender,
}

impl Announcer {
    /// Rescan the directory and push new matches. Returns how many were pushed.
    fn scan(&self) -> ImportResult<usize> {
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(&self.directory)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| self.is_candidate(path))
            .collect();
        candidates.sort();

        let mut pushed = 0;
        for path in candidates {
            if self.announce(path) {
                pushed += 1;
            }
        }
        Ok(pushed)
    }

    fn is_candidate(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        self.pattern.matches(name) && path.is_file()
    }

    fn announce(&self, path: PathBuf) -> bool {
        if !self.seen.lock().insert(path.clone()) {
            return false;
        }
        log::info!("pushing file for processing: {}", path.display());
        if !self.sender.push(path) {
            log::warn!("import queue closed, file event dropped");
            return false;
        }
        true
    }

    fn on_event(&self, event: Event) {
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }
        if let Err(err) = self.scan() {
            log::error!("failed to scan {}: {}", self.directory.display(), err);
        }
    }
}

pub struct SyslogFileWatcher {
    announcer: Arc<Announcer>,
    poll_interval: Duration,
}

impl SyslogFileWatcher {
    pub fn new(config: &WatcherConfig, sender: FileTaskSender) -> Result<Self, ConfigError> {
        Ok(Self {
            announcer: Arc::new(Announcer {
                directory: config.directory.clone(),
                pattern: FilePattern::new(&config.file_pattern)?,
                seen: Mutex::new(HashSet::new()),
                sender,
            }),
            poll_interval: config.poll_interval,
        })
    }

    /// One pass over the directory on a blocking thread. Returns how many
    /// files were queued.
    pub async fn scan(&self) -> ImportResult<usize> {
        let announcer = self.announcer.clone();
        tokio::task::spawn_blocking(move || announcer.scan())
            .await
            .map_err(|err| ImportError::Io(std::io::Error::other(err)))?
    }

    /// Scan once, then poll for changes until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> ImportResult<()> {
        let directory = self.announcer.directory.clone();
        log::info!(
            "watching syslog files in {} matching {}",
            directory.display(),
            self.announcer.pattern.as_str()
        );

        let queued = self.scan().await?;
        log::info!("initial scan queued {} file(s)", queued);

        let announcer = self.announcer.clone();
        let mut watcher = PollWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => announcer.on_event(event),
                Err(err) => log::error!("file watcher error: {}", err),
            },
            NotifyConfig::default().with_poll_interval(self.poll_interval),
        )?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        cancel.cancelled().await;
        drop(watcher);
        log::info!("stopped syslog files watcher");
        Ok(())
    }
}
