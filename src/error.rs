use std::path::PathBuf;
use thiserror::Error;

pub type ImportResult<T> = Result<T, ImportError>;

/// Startup validation failures. The process refuses to start on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value `{value}`: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("syslog directory does not exist or is unreachable: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("file pattern `{0}` must not end with '.gz'")]
    ArchivalSuffixPattern(String),
    #[error("database password must not be set in DATABASE_URL, use DATABASE_PASSWORD or DATABASE_PASSWORD_FILE")]
    PasswordInUrl,
    #[error("DATABASE_PASSWORD and DATABASE_PASSWORD_FILE are mutually exclusive")]
    ConflictingPassword,
    #[error("DATABASE_PASSWORD or DATABASE_PASSWORD_FILE must be set")]
    MissingPassword,
    #[error("failed to read password file {path}: {source}")]
    PasswordFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("file events already subscribed: the importer accepts a single subscription")]
    AlreadySubscribed,
}

/// Errors raised while importing files.
///
/// Per-file errors never reach the scheduler as errors: the file processor
/// folds them into an outcome using [`ImportError::is_storage`].
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("file {} cannot be processed: {reason}", path.display())]
    FileAccess { path: PathBuf, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parser error: {0}")]
    Parser(String),
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),
}

impl ImportError {
    pub fn file_access(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ImportError::FileAccess {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True when the failure came from the backing store. These drive the
    /// per-cycle circuit breaker.
    pub fn is_storage(&self) -> bool {
        matches!(self, ImportError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_database_errors_are_storage_errors() {
        assert!(ImportError::Storage(sqlx::Error::PoolTimedOut).is_storage());
        assert!(!ImportError::file_access("/tmp/a", "empty").is_storage());
        assert!(!ImportError::Parser("boom".into()).is_storage());
    }

    #[test]
    fn file_access_message_names_the_path() {
        let err = ImportError::file_access("/var/log/syslog_1", "file is empty");
        assert_eq!(
            err.to_string(),
            "file /var/log/syslog_1 cannot be processed: file is empty"
        );
    }
}
