//! Row filter between parser events and the bulk loader.
//!
//! One [`RowFilter`] is created per file. It drops excluded hosts and
//! applications, drops rows without a timestamp, parses numeric ids, and
//! repairs year-boundary skew with [`correct_year`] before handing out
//! [`StagedRow`]s in parser order.
//!
//! # Year correction
//!
//! RFC 3164 timestamps carry no year. When an RFC 5424 relay fills in "the
//! current year" and its clock is not in sync with the sender around new year,
//! rows get a year that is one off:
//!
//! - relay ahead: `2023-12-31T23:59:55` is followed by `2024-12-31T23:59:57`
//! - relay late: `2023-12-31T23:59:55` is followed by `2023-01-01T00:00:00`
//!
//! Both are repaired relative to the anchor, the last timestamp accepted
//! without correction. Corrected rows never move the anchor, so a run of
//! skewed rows is corrected against the same trusted point.

use crate::import::fingerprint::Fingerprint;
use crate::import::stats::FilterStats;
use crate::models::{ParseEvent, StagedRow, SyslogRecord};
use chrono::{DateTime, Datelike, FixedOffset};
use std::collections::HashSet;

/// Case-insensitive set of host or application names to skip.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet(HashSet<String>);

impl ExclusionSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            names
                .into_iter()
                .map(|name| name.as_ref().trim().to_lowercase())
                .filter(|name| !name.is_empty())
                .collect(),
        )
    }

    /// Parse a comma-separated list, ignoring blanks.
    pub fn from_csv(value: &str) -> Self {
        Self::new(value.split(','))
    }

    pub fn contains(&self, name: &str) -> bool {
        !self.0.is_empty() && self.0.contains(&name.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Last trusted timestamp of the file being filtered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateAnchor(Option<DateTime<FixedOffset>>);

impl DateAnchor {
    pub fn unset() -> Self {
        Self(None)
    }

    pub fn at(timestamp: DateTime<FixedOffset>) -> Self {
        Self(Some(timestamp))
    }

    pub fn get(&self) -> Option<DateTime<FixedOffset>> {
        self.0
    }
}

/// Apply the year correction to `timestamp` given the current anchor.
///
/// Returns the anchor to use for the next row and the timestamp to store.
/// A year rewrite that lands on an invalid date (29 February) keeps the
/// original timestamp and leaves the anchor untouched.
pub fn correct_year(
    anchor: DateAnchor,
    timestamp: DateTime<FixedOffset>,
) -> (DateAnchor, DateTime<FixedOffset>) {
    let Some(previous) = anchor.0 else {
        return (DateAnchor::at(timestamp), timestamp);
    };

    if previous.year() < timestamp.year() && previous.month() == timestamp.month() {
        let corrected = timestamp.with_year(previous.year()).unwrap_or(timestamp);
        return (anchor, corrected);
    }

    if previous.month() == 12 && timestamp.month() == 1 && previous.year() == timestamp.year() {
        let corrected = timestamp.with_year(timestamp.year() + 1).unwrap_or(timestamp);
        return (anchor, corrected);
    }

    (DateAnchor::at(timestamp), timestamp)
}

fn parse_id(value: Option<&str>) -> Option<i32> {
    value.and_then(|value| value.trim().parse::<i32>().ok())
}

pub struct RowFilter<'a> {
    fingerprint: Fingerprint,
    exclusions: &'a ExclusionSet,
    anchor: DateAnchor,
    failed: bool,
    stats: FilterStats,
}

impl<'a> RowFilter<'a> {
    pub fn new(fingerprint: Fingerprint, exclusions: &'a ExclusionSet) -> Self {
        Self {
            fingerprint,
            exclusions,
            anchor: DateAnchor::unset(),
            failed: false,
            stats: FilterStats::default(),
        }
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    pub fn anchor(&self) -> DateAnchor {
        self.anchor
    }

    /// Whether the parser reported an error for this file.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Feed one parser event. Returns the row to write, if any.
    pub fn accept(&mut self, event: ParseEvent) -> Option<StagedRow> {
        if self.failed {
            self.stats.discarded_after_error += 1;
            return None;
        }

        match event {
            ParseEvent::Error { line, reason } => {
                self.failed = true;
                self.stats.parser_errors += 1;
                log::error!("parser error at line {}: {}", line, reason);
                None
            }
            ParseEvent::Record(record) => self.accept_record(record),
        }
    }

    fn is_excluded(&self, record: &SyslogRecord) -> bool {
        if self.exclusions.contains(&record.host) {
            return true;
        }
        record
            .app_name
            .as_deref()
            .filter(|app| !app.is_empty())
            .map(|app| self.exclusions.contains(app))
            .unwrap_or(false)
    }

    fn accept_record(&mut self, record: SyslogRecord) -> Option<StagedRow> {
        if self.is_excluded(&record) {
            self.stats.excluded += 1;
            return None;
        }

        let Some(timestamp) = record.timestamp else {
            self.stats.missing_timestamp += 1;
            log::warn!("message without timestamp ignored: {}", record.raw);
            return None;
        };

        let (anchor, corrected) = correct_year(self.anchor, timestamp);
        self.anchor = anchor;
        if corrected != timestamp {
            self.stats.corrected_timestamps += 1;
            log::warn!("changed an inconsistent date/time: {}", record.raw);
        }

        self.stats.accepted += 1;
        Some(StagedRow {
            fingerprint: self.fingerprint,
            facility: record.facility,
            severity: record.severity,
            created_on: corrected.naive_utc(),
            pid: parse_id(record.proc_id.as_deref()),
            msg_id: parse_id(record.msg_id.as_deref()),
            host: record.host,
            payload_kind: record.payload_kind,
            app: record.app_name,
            message: record.message,
        })
    }
}
