//! Recent system log entries from plain log files and the systemd journal.

use crate::access::{FileSystem, PseudoFs};
use crate::error::CollectError;
use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Entries kept per source when no cap is configured
pub const DEFAULT_MAX_ENTRIES: usize = 50;

const KNOWN_SERVICES: &[&str] = &["systemd", "kernel", "sshd", "NetworkManager"];

/// Syslog-style severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Emerg,
    Alert,
    Crit,
    Err,
    Warn,
    Notice,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    fn from_keyword(word: &str) -> Option<Self> {
        Some(match word {
            "emerg" => LogLevel::Emerg,
            "alert" => LogLevel::Alert,
            "crit" => LogLevel::Crit,
            "err" | "error" => LogLevel::Err,
            "warn" | "warning" => LogLevel::Warn,
            "notice" => LogLevel::Notice,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Emerg => "emerg",
            LogLevel::Alert => "alert",
            LogLevel::Crit => "crit",
            LogLevel::Err => "err",
            LogLevel::Warn => "warn",
            LogLevel::Notice => "notice",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            LogLevel::Emerg | LogLevel::Alert | LogLevel::Crit | LogLevel::Err
        )
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub service: String,
    pub message: String,
    /// File path, or `journal`
    pub source: String,
}

/// Merged entries across all sources, newest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogMetrics {
    pub entries: Vec<LogEntry>,
    pub sources: Vec<String>,
    /// emerg, alert, crit and err entries
    pub error_count: usize,
    pub warn_count: usize,
    /// Everything else
    pub info_count: usize,
}

/// Where log entries come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    Journal,
    File(PathBuf),
}

impl LogSource {
    /// `journal` (or `journalctl`) selects the journal; anything else is a path.
    pub fn parse(value: &str) -> Self {
        match value {
            "journal" | "journalctl" => LogSource::Journal,
            path => LogSource::File(PathBuf::from(path)),
        }
    }

    pub fn name(&self) -> String {
        match self {
            LogSource::Journal => "journal".to_string(),
            LogSource::File(path) => path.display().to_string(),
        }
    }
}

/// Produces recent journal output in `short-iso` layout.
pub trait JournalSource: Send + Sync {
    fn recent(&self, limit: usize) -> io::Result<String>;
}

/// Runs `journalctl -n N --no-pager -o short-iso`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Journalctl;

impl JournalSource for Journalctl {
    fn recent(&self, limit: usize) -> io::Result<String> {
        let output = Command::new("journalctl")
            .args(["-n", &limit.to_string(), "--no-pager", "-o", "short-iso"])
            .output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "journalctl exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Log aggregator. Holds configuration only; every collection rereads its sources.
pub struct LogCollector<F: FileSystem> {
    fs: PseudoFs<F>,
    sources: Vec<LogSource>,
    max_entries: usize,
    journal: Box<dyn JournalSource>,
}

impl<F: FileSystem> LogCollector<F> {
    pub fn new(fs: PseudoFs<F>, sources: &[String], max_entries: usize) -> Self {
        Self::with_journal(fs, sources, max_entries, Box::new(Journalctl))
    }

    pub fn with_journal(
        fs: PseudoFs<F>,
        sources: &[String],
        max_entries: usize,
        journal: Box<dyn JournalSource>,
    ) -> Self {
        Self {
            fs,
            sources: sources.iter().map(|s| LogSource::parse(s)).collect(),
            max_entries: if max_entries == 0 {
                DEFAULT_MAX_ENTRIES
            } else {
                max_entries
            },
            journal,
        }
    }

    /// Collects from every source. Failing sources are skipped.
    pub fn collect(&self) -> LogMetrics {
        let mut entries = Vec::new();

        for source in &self.sources {
            match self.collect_source(source) {
                Ok(mut found) => entries.append(&mut found),
                Err(e) => debug!(source = %source.name(), error = %e, "skipping log source"),
            }
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(self.max_entries);

        let error_count = entries.iter().filter(|e| e.level.is_error()).count();
        let warn_count = entries
            .iter()
            .filter(|e| e.level == LogLevel::Warn)
            .count();

        LogMetrics {
            info_count: entries.len() - error_count - warn_count,
            error_count,
            warn_count,
            entries,
            sources: self.sources.iter().map(LogSource::name).collect(),
        }
    }

    fn collect_source(&self, source: &LogSource) -> Result<Vec<LogEntry>, CollectError> {
        match source {
            LogSource::Journal => {
                let output = self
                    .journal
                    .recent(self.max_entries)
                    .map_err(|source| CollectError::Command {
                        command: "journalctl",
                        source,
                    })?;
                Ok(output.lines().filter_map(parse_journal_line).collect())
            }
            LogSource::File(path) => {
                let lines = self.fs.read_lines(path)?;
                let start = lines.len().saturating_sub(self.max_entries);
                let name = source.name();
                let year = Local::now().year();
                Ok(lines[start..]
                    .iter()
                    .filter_map(|line| parse_log_line(line, &name, year))
                    .collect())
            }
        }
    }
}

/// Parses a plain log file line. Lines without a recognisable timestamp are dropped.
pub fn parse_log_line(line: &str, source: &str, year: i32) -> Option<LogEntry> {
    let timestamp = extract_timestamp(line, year)?;
    Some(LogEntry {
        timestamp,
        level: classify(line),
        service: extract_service(line),
        message: line.to_string(),
        source: source.to_string(),
    })
}

/// Parses one `short-iso` journal line: `timestamp host service: message`.
pub fn parse_journal_line(line: &str) -> Option<LogEntry> {
    if line.trim().is_empty() || line.starts_with("--") {
        return None;
    }
    let mut parts = line.splitn(4, ' ');
    let timestamp = parts.next()?;
    let _host = parts.next()?;
    let service = parts.next()?;
    let message = parts.next()?;

    let timestamp = extract_timestamp(timestamp, Local::now().year())?;

    Some(LogEntry {
        timestamp,
        level: classify(message),
        service: strip_service_decorations(service),
        message: message.to_string(),
        source: "journal".to_string(),
    })
}

type TimestampMatcher = fn(&[&str], i32) -> Option<DateTime<Utc>>;

/// Tried in order; the first match wins.
const TIMESTAMP_MATCHERS: &[TimestampMatcher] = &[
    match_syslog,
    match_rfc3339,
    match_iso8601_offset,
    match_naive_datetime,
];

/// Extracts the leading timestamp of a log line. `year` fills in syslog
/// timestamps, which carry none.
pub fn extract_timestamp(line: &str, year: i32) -> Option<DateTime<Utc>> {
    let tokens: Vec<&str> = line.split_whitespace().take(3).collect();
    if tokens.is_empty() {
        return None;
    }
    TIMESTAMP_MATCHERS
        .iter()
        .find_map(|matcher| matcher(&tokens, year))
}

/// `Jan  2 15:04:05`
fn match_syslog(tokens: &[&str], year: i32) -> Option<DateTime<Utc>> {
    let [month, day, time, ..] = tokens else {
        return None;
    };
    let text = format!("{} {} {} {}", year, month, day, time);
    let naive = NaiveDateTime::parse_from_str(&text, "%Y %b %d %H:%M:%S").ok()?;
    local_to_utc(naive)
}

/// `2006-01-02T15:04:05.000Z`, `2006-01-02T15:04:05+07:00`
fn match_rfc3339(tokens: &[&str], _year: i32) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(tokens.first()?)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `2006-01-02T15:04:05-0700`, optionally with fractional seconds
fn match_iso8601_offset(tokens: &[&str], _year: i32) -> Option<DateTime<Utc>> {
    let token = tokens.first()?;
    ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%.f%z"]
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(token, fmt).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// `2006-01-02 15:04:05`, in local time
fn match_naive_datetime(tokens: &[&str], _year: i32) -> Option<DateTime<Utc>> {
    let [date, time, ..] = tokens else {
        return None;
    };
    let text = format!("{} {}", date, time);
    let naive = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S").ok()?;
    local_to_utc(naive)
}

fn local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    // Ambiguous times during a DST fold resolve to the earlier instant
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Classifies a message by its leftmost severity keyword (whole word,
/// case-insensitive), falling back to substring hints.
pub fn classify(message: &str) -> LogLevel {
    let lower = message.to_lowercase();

    let keyword = lower
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .find_map(LogLevel::from_keyword);
    if let Some(level) = keyword {
        return level;
    }

    if lower.contains("error") || lower.contains("fail") {
        LogLevel::Err
    } else if lower.contains("warn") {
        LogLevel::Warn
    } else {
        LogLevel::Info
    }
}

/// Resolves the emitting service of a plain log line.
pub fn extract_service(line: &str) -> String {
    if let Some(known) = KNOWN_SERVICES.iter().find(|name| line.contains(*name)) {
        return known.to_string();
    }

    // syslog layout: month day time host service[pid]: message
    line.split_whitespace()
        .skip(3)
        .take(3)
        .find(|word| word.ends_with(':') || (word.contains('[') && word.contains(']')))
        .map(strip_service_decorations)
        .filter(|service| !service.is_empty())
        .unwrap_or_else(|| "system".to_string())
}

/// `cron[1234]:` → `cron`
fn strip_service_decorations(token: &str) -> String {
    let token = token.trim_end_matches(':');
    let token = match token.find('[') {
        Some(open) if token.ends_with(']') => &token[..open],
        _ => token,
    };
    token.to_string()
}
