//! Environment-driven configuration.
//!
//! Every setting is read from the process environment once at startup and
//! validated before any component is built. Invalid settings fail fast with a
//! [`ConfigError`].

use crate::error::ConfigError;
use crate::import::filter::ExclusionSet;
use sqlx::postgres::PgConnectOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_FILE_PATTERN: &str = "syslog_*";
pub const DEFAULT_MAX_DAYS_TO_KEEP: i16 = 90;
pub const ARCHIVE_SUFFIX: &str = ".gz";
const APPLICATION_NAME: &str = "syslog-importer";

fn env_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

fn env_parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => value.trim().parse::<T>().map_err(|err| ConfigError::Invalid {
            key,
            value,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

fn env_string(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Where to look for syslog files and which ones to pick up.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub directory: PathBuf,
    pub file_pattern: String,
    pub poll_interval: Duration,
}

/// Row filtering, retention and archival behaviour of the importer.
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    pub excluded_hosts_or_apps: ExclusionSet,
    pub max_days_to_keep: i16,
    pub compress_after_import: bool,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            excluded_hosts_or_apps: ExclusionSet::default(),
            max_days_to_keep: DEFAULT_MAX_DAYS_TO_KEEP,
            compress_after_import: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordSource {
    Literal(String),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub password: Option<String>,
    pub password_file: Option<PathBuf>,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Resolve which secret source is configured. Exactly one must be set.
    pub fn password_source(&self) -> Result<PasswordSource, ConfigError> {
        match (&self.password, &self.password_file) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingPassword),
            (Some(password), None) => Ok(PasswordSource::Literal(password.clone())),
            (None, Some(path)) => Ok(PasswordSource::File(path.clone())),
            (None, None) => Err(ConfigError::MissingPassword),
        }
    }

    /// Build connection options with the resolved secret applied.
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        if url_has_password(&self.url)? {
            return Err(ConfigError::PasswordInUrl);
        }

        let password = match self.password_source()? {
            PasswordSource::Literal(password) => password,
            PasswordSource::File(path) => std::fs::read_to_string(&path)
                .map(|content| content.trim_end_matches(['\r', '\n']).to_string())
                .map_err(|source| ConfigError::PasswordFile { path, source })?,
        };

        let options = PgConnectOptions::from_str(&self.url).map_err(|err| ConfigError::Invalid {
            key: "DATABASE_URL",
            value: self.url.clone(),
            reason: err.to_string(),
        })?;

        Ok(options
            .password(&password)
            .application_name(APPLICATION_NAME))
    }
}

/// Detect a password embedded in a connection URL, either in the userinfo
/// (`user:secret@host`) or as a `password` query parameter.
fn url_has_password(raw: &str) -> Result<bool, ConfigError> {
    let url = Url::parse(raw).map_err(|err| ConfigError::Invalid {
        key: "DATABASE_URL",
        value: "<redacted>".into(),
        reason: err.to_string(),
    })?;
    Ok(url.password().is_some()
        || url
            .query_pairs()
            .any(|(key, _)| key.eq_ignore_ascii_case("password")))
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub watcher: WatcherConfig,
    pub importer: ImporterConfig,
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Read and validate the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse settings through an arbitrary key lookup. Does not validate.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let directory = env_string(&lookup, "SYSLOG_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_default();
        let file_pattern = env_string(&lookup, "SYSLOG_FILE_PATTERN")
            .unwrap_or_else(|| DEFAULT_FILE_PATTERN.to_string());
        let poll_interval =
            Duration::from_millis(env_parse(&lookup, "SYSLOG_POLL_INTERVAL_MS", 5_000u64)?);

        let excluded_hosts_or_apps = env_string(&lookup, "SYSLOG_EXCLUDE")
            .map(|value| ExclusionSet::from_csv(&value))
            .unwrap_or_default();
        let max_days_to_keep =
            env_parse(&lookup, "SYSLOG_MAX_DAYS_TO_KEEP", DEFAULT_MAX_DAYS_TO_KEEP)?;
        let compress_after_import = env_bool(&lookup, "SYSLOG_COMPRESS_AFTER_IMPORT", false);

        let url = env_string(&lookup, "DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let password = lookup("DATABASE_PASSWORD").filter(|value| !value.is_empty());
        let password_file = env_string(&lookup, "DATABASE_PASSWORD_FILE").map(PathBuf::from);
        let max_connections = env_parse(&lookup, "DATABASE_MAX_CONNECTIONS", 4u32)?;

        Ok(Self {
            watcher: WatcherConfig {
                directory,
                file_pattern,
                poll_interval,
            },
            importer: ImporterConfig {
                excluded_hosts_or_apps,
                max_days_to_keep,
                compress_after_import,
            },
            database: DatabaseConfig {
                url,
                password,
                password_file,
                max_connections,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watcher.directory.as_os_str().is_empty() {
            return Err(ConfigError::Missing("SYSLOG_DIRECTORY"));
        }
        if !self.watcher.directory.is_dir() {
            return Err(ConfigError::DirectoryNotFound(self.watcher.directory.clone()));
        }
        if self.watcher.file_pattern.is_empty() {
            return Err(ConfigError::Missing("SYSLOG_FILE_PATTERN"));
        }
        if self.watcher.file_pattern.ends_with(ARCHIVE_SUFFIX) {
            return Err(ConfigError::ArchivalSuffixPattern(
                self.watcher.file_pattern.clone(),
            ));
        }
        if self.importer.max_days_to_keep < 1 {
            return Err(ConfigError::Invalid {
                key: "SYSLOG_MAX_DAYS_TO_KEEP",
                value: self.importer.max_days_to_keep.to_string(),
                reason: "must be greater than 0".into(),
            });
        }
        if url_has_password(&self.database.url)? {
            return Err(ConfigError::PasswordInUrl);
        }
        self.database.password_source()?;
        Ok(())
    }
}
