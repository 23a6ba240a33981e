//! Default syslog line parser.
//!
//! Understands the two common on-disk syslog layouts:
//!
//! - RFC 5424: `<PRI>1 TIMESTAMP HOST APP PROCID MSGID SD [MSG]`
//! - RFC 3164: `<PRI>Mmm dd hh:mm:ss HOST TAG[PID]: MSG`
//!
//! RFC 3164 headers carry no year and no offset. Both are taken from the
//! parser's reference time (the importer's local clock), which is what
//! produces the new-year skew repaired later by the row filter.
//!
//! Lines that match neither layout are kept as `PlainText` records without a
//! timestamp; the row filter drops those with a warning.
//!
//! # Streaming
//!
//! [`spawn_parser`] reads a file on a blocking thread and pushes
//! [`ParseEvent`]s through a bounded channel. The task acknowledges its start
//! before reading the first line and ends by closing the channel, so a
//! consumer that drains the channel to completion never observes a short read.

use crate::error::{ImportError, ImportResult};
use crate::models::{Facility, ParseEvent, PayloadKind, Severity, SyslogRecord};
use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, TimeZone};
use regex::Regex;
use std::io::{BufRead, BufReader, Read};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Events buffered between the parser thread and the consumer.
pub const PARSER_CHANNEL_CAPACITY: usize = 1024;

/// Upper bound on waiting for the parser's start acknowledgement.
pub const PARSER_START_TIMEOUT: Duration = Duration::from_millis(250);

const NIL: &str = "-";
const BOM: char = '\u{feff}';
const MAX_PRI: u16 = 191;

static RFC5424_REGEX: OnceLock<Regex> = OnceLock::new();
static RFC3164_REGEX: OnceLock<Regex> = OnceLock::new();
static TAG_REGEX: OnceLock<Regex> = OnceLock::new();

fn rfc5424_regex() -> &'static Regex {
    RFC5424_REGEX.get_or_init(|| {
        Regex::new(
            r"^1 (\S+) (\S+) (\S+) (\S+) (\S+) (-|(?:\[(?:[^\]\\]|\\.)*\])+)(?: (.*))?$",
        )
        .expect("Invalid RFC 5424 header regex")
    })
}

fn rfc3164_regex() -> &'static Regex {
    RFC3164_REGEX.get_or_init(|| {
        Regex::new(r"^([A-Z][a-z]{2}) {1,2}(\d{1,2}) (\d{2}):(\d{2}):(\d{2}) (\S+) ?(.*)$")
            .expect("Invalid RFC 3164 header regex")
    })
}

fn tag_regex() -> &'static Regex {
    TAG_REGEX.get_or_init(|| {
        Regex::new(r"^([^:\[\s]+)(?:\[([^\]]*)\])?: ?(.*)$").expect("Invalid RFC 3164 tag regex")
    })
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    MONTHS
        .iter()
        .position(|month| *month == name)
        .map(|index| index as u32 + 1)
}

fn nil_to_none(value: &str) -> Option<String> {
    (value != NIL).then(|| value.to_string())
}

/// Split `<PRI>` off the front of a line.
fn split_pri(line: &str) -> Option<(Facility, Severity, &str)> {
    let rest = line.strip_prefix('<')?;
    let end = rest.find('>')?;
    if end == 0 || end > 3 {
        return None;
    }
    let pri: u16 = rest[..end].parse().ok()?;
    if pri > MAX_PRI {
        return None;
    }
    let facility = Facility::from_code((pri / 8) as u8)?;
    let severity = Severity::from_code((pri % 8) as u8)?;
    Some((facility, severity, &rest[end + 1..]))
}

/// Stateless line parser with a fixed reference time for RFC 3164 headers.
#[derive(Debug, Clone, Copy)]
pub struct LineParser {
    reference: DateTime<FixedOffset>,
}

impl LineParser {
    /// Parser whose RFC 3164 year and offset come from the local clock.
    pub fn new() -> Self {
        Self {
            reference: Local::now().fixed_offset(),
        }
    }

    pub fn with_reference(reference: DateTime<FixedOffset>) -> Self {
        Self { reference }
    }

    pub fn parse_line(&self, line: &str) -> SyslogRecord {
        let Some((facility, severity, rest)) = split_pri(line) else {
            return SyslogRecord {
                facility: Facility::User,
                severity: Severity::Notice,
                timestamp: None,
                host: String::new(),
                app_name: None,
                proc_id: None,
                msg_id: None,
                payload_kind: PayloadKind::PlainText,
                message: line.to_string(),
                raw: line.to_string(),
            };
        };

        if let Some(caps) = rfc5424_regex().captures(rest) {
            let timestamp = match &caps[1] {
                NIL => None,
                value => DateTime::parse_from_rfc3339(value).ok(),
            };
            let message = caps
                .get(7)
                .map(|m| m.as_str().trim_start_matches(BOM).to_string())
                .unwrap_or_default();

            return SyslogRecord {
                facility,
                severity,
                timestamp,
                host: nil_to_none(&caps[2]).unwrap_or_default(),
                app_name: nil_to_none(&caps[3]),
                proc_id: nil_to_none(&caps[4]),
                msg_id: nil_to_none(&caps[5]),
                payload_kind: PayloadKind::Rfc5424,
                message,
                raw: line.to_string(),
            };
        }

        if let Some(caps) = rfc3164_regex().captures(rest) {
            let timestamp = self.rfc3164_timestamp(
                &caps[1], &caps[2], &caps[3], &caps[4], &caps[5],
            );
            let body = caps.get(7).map(|m| m.as_str()).unwrap_or_default();
            let (app_name, proc_id, message) = match tag_regex().captures(body) {
                Some(tag) => (
                    Some(tag[1].to_string()),
                    tag.get(2).map(|m| m.as_str().to_string()),
                    tag[3].to_string(),
                ),
                None => (None, None, body.to_string()),
            };

            return SyslogRecord {
                facility,
                severity,
                timestamp,
                host: caps[6].to_string(),
                app_name,
                proc_id,
                msg_id: None,
                payload_kind: PayloadKind::Rfc3164,
                message,
                raw: line.to_string(),
            };
        }

        SyslogRecord {
            facility,
            severity,
            timestamp: None,
            host: String::new(),
            app_name: None,
            proc_id: None,
            msg_id: None,
            payload_kind: PayloadKind::PlainText,
            message: rest.to_string(),
            raw: line.to_string(),
        }
    }

    fn rfc3164_timestamp(
        &self,
        month: &str,
        day: &str,
        hour: &str,
        minute: &str,
        second: &str,
    ) -> Option<DateTime<FixedOffset>> {
        let naive = NaiveDate::from_ymd_opt(
            self.reference.year(),
            month_number(month)?,
            day.parse().ok()?,
        )?
        .and_hms_opt(hour.parse().ok()?, minute.parse().ok()?, second.parse().ok()?)?;

        self.reference
            .offset()
            .from_local_datetime(&naive)
            .single()
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer side of a running parser task.
pub struct ParserHandle {
    events: mpsc::Receiver<ParseEvent>,
    started: Option<oneshot::Receiver<()>>,
    task: JoinHandle<usize>,
}

impl ParserHandle {
    /// Wait for the start acknowledgement, bounded by [`PARSER_START_TIMEOUT`].
    /// Returns false if the parser did not acknowledge in time.
    pub async fn wait_started(&mut self) -> bool {
        let Some(started) = self.started.take() else {
            return true;
        };
        matches!(
            tokio::time::timeout(PARSER_START_TIMEOUT, started).await,
            Ok(Ok(()))
        )
    }

    /// Next event, or `None` once the parser has finished the file.
    pub async fn next(&mut self) -> Option<ParseEvent> {
        self.events.recv().await
    }

    /// Wait for the parser thread. Returns the number of lines read.
    pub async fn join(self) -> ImportResult<usize> {
        drop(self.events);
        self.task
            .await
            .map_err(|err| ImportError::Parser(format!("parser task failed: {}", err)))
    }
}

/// Parse `reader` line by line on a blocking thread.
///
/// Invalid UTF-8 is replaced with U+FFFD rather than failing the file. I/O
/// failures are pushed as a single [`ParseEvent::Error`] and end the stream.
/// Empty lines are skipped. If the consumer goes away the parser stops at the
/// next line.
pub fn spawn_parser<R>(reader: R, parser: LineParser) -> ParserHandle
where
    R: Read + Send + 'static,
{
    let (tx, events) = mpsc::channel(PARSER_CHANNEL_CAPACITY);
    let (started_tx, started) = oneshot::channel();

    let task = tokio::task::spawn_blocking(move || {
        let _ = started_tx.send(());
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();
        let mut line_no = 0usize;

        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) => break,
                Ok(_) => {
                    line_no += 1;
                    let text = String::from_utf8_lossy(&buffer);
                    let line = text.trim_end_matches(['\r', '\n']);
                    if line.trim().is_empty() {
                        continue;
                    }
                    let event = ParseEvent::Record(parser.parse_line(line));
                    if tx.blocking_send(event).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    line_no += 1;
                    let _ = tx.blocking_send(ParseEvent::Error {
                        line: line_no,
                        reason: err.to_string(),
                    });
                    break;
                }
            }
        }

        line_no
    });

    ParserHandle {
        events,
        started: Some(started),
        task,
    }
}
