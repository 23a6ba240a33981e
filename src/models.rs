use crate::import::fingerprint::Fingerprint;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use std::fmt;

/// Syslog facility, decoded from the PRI value (`pri / 8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facility {
    Kernel,
    User,
    Mail,
    Daemon,
    Auth,
    Syslog,
    Printer,
    News,
    Uucp,
    Cron,
    AuthPriv,
    Ftp,
    Ntp,
    Audit,
    Alert,
    Clock,
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

impl Facility {
    pub fn from_code(code: u8) -> Option<Self> {
        use Facility::*;
        const ALL: [Facility; 24] = [
            Kernel, User, Mail, Daemon, Auth, Syslog, Printer, News, Uucp, Cron, AuthPriv, Ftp,
            Ntp, Audit, Alert, Clock, Local0, Local1, Local2, Local3, Local4, Local5, Local6,
            Local7,
        ];
        ALL.get(code as usize).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Facility::Kernel => "Kernel",
            Facility::User => "User",
            Facility::Mail => "Mail",
            Facility::Daemon => "Daemon",
            Facility::Auth => "Auth",
            Facility::Syslog => "Syslog",
            Facility::Printer => "Printer",
            Facility::News => "News",
            Facility::Uucp => "Uucp",
            Facility::Cron => "Cron",
            Facility::AuthPriv => "AuthPriv",
            Facility::Ftp => "Ftp",
            Facility::Ntp => "Ntp",
            Facility::Audit => "Audit",
            Facility::Alert => "Alert",
            Facility::Clock => "Clock",
            Facility::Local0 => "Local0",
            Facility::Local1 => "Local1",
            Facility::Local2 => "Local2",
            Facility::Local3 => "Local3",
            Facility::Local4 => "Local4",
            Facility::Local5 => "Local5",
            Facility::Local6 => "Local6",
            Facility::Local7 => "Local7",
        }
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Syslog severity, decoded from the PRI value (`pri % 8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Informational,
    Debug,
}

impl Severity {
    pub fn from_code(code: u8) -> Option<Self> {
        use Severity::*;
        const ALL: [Severity; 8] = [
            Emergency,
            Alert,
            Critical,
            Error,
            Warning,
            Notice,
            Informational,
            Debug,
        ];
        ALL.get(code as usize).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Emergency => "Emergency",
            Severity::Alert => "Alert",
            Severity::Critical => "Critical",
            Severity::Error => "Error",
            Severity::Warning => "Warning",
            Severity::Notice => "Notice",
            Severity::Informational => "Informational",
            Severity::Debug => "Debug",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which grammar produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Rfc5424,
    Rfc3164,
    PlainText,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Rfc5424 => "Rfc5424",
            PayloadKind::Rfc3164 => "Rfc3164",
            PayloadKind::PlainText => "PlainText",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured log line as produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct SyslogRecord {
    pub facility: Facility,
    pub severity: Severity,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub host: String,
    pub app_name: Option<String>,
    pub proc_id: Option<String>,
    pub msg_id: Option<String>,
    pub payload_kind: PayloadKind,
    pub message: String,
    /// Original line, kept for diagnostics only.
    pub raw: String,
}

/// Event pushed by the parser for a single file. An `Error` does not close
/// the stream by itself; consumers decide what to do with later events.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    Record(SyslogRecord),
    Error { line: usize, reason: String },
}

/// Storage-ready row. Field order mirrors the staging table columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    pub fingerprint: Fingerprint,
    pub facility: Facility,
    pub severity: Severity,
    /// Absolute instant with the zone offset discarded.
    pub created_on: NaiveDateTime,
    pub host: String,
    pub payload_kind: PayloadKind,
    pub app: Option<String>,
    pub pid: Option<i32>,
    pub msg_id: Option<i32>,
    pub message: String,
}

/// Bookkeeping row of the completed-files registry.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ImportedFile {
    pub id: i32,
    pub file_fingerprint: Vec<u8>,
    pub file_path: String,
    pub is_complete: bool,
}
