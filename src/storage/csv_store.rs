//! Append-only, date-partitioned CSV log.
//!
//! File layout (one file per local calendar date):
//!
//! ```text
//! keystrokes_2024-01-15.csv
//! timestamp,key,time_since_previous_ms,is_backspace
//! 2024-01-15T10:23:01.123,a,,0
//! 2024-01-15T10:23:01.400,backspace,277,1
//! ```
//!
//! The session-start sentinel interval is an empty field.

use crate::core::event::{KeyLabel, KeystrokeEvent, UnknownLabel};
use crate::storage::{EventStore, StoreError};
use chrono::{NaiveDate, NaiveDateTime};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Header row, written once per file.
pub const CSV_HEADER: &str = "timestamp,key,time_since_previous_ms,is_backspace";

const FILE_PREFIX: &str = "keystrokes_";
const FILE_SUFFIX: &str = ".csv";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Name of the log file for a date.
pub fn file_name_for(date: NaiveDate) -> String {
    format!("{FILE_PREFIX}{}{FILE_SUFFIX}", date.format("%Y-%m-%d"))
}

/// Inverse of [`file_name_for`].
pub fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    let date = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Why a row could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("expected 4 fields, found {0}")]
    FieldCount(usize),
    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
    #[error(transparent)]
    Key(#[from] UnknownLabel),
    #[error("invalid interval {0:?}")]
    Interval(String),
    #[error("invalid backspace flag {0:?}")]
    Flag(String),
    #[error("backspace flag disagrees with key {0:?}")]
    InconsistentFlag(String),
}

/// A row that was skipped while reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based line number
    pub line: usize,
    pub reason: RowError,
}

/// Parsed content of one daily file.
#[derive(Debug, Clone, Default)]
pub struct LogFileContents {
    pub events: Vec<KeystrokeEvent>,
    pub skipped: Vec<SkippedRow>,
}

/// Daily CSV files in one directory.
#[derive(Debug, Clone)]
pub struct CsvStore {
    dir: PathBuf,
}

impl CsvStore {
    /// Open a store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the log file for a date.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(file_name_for(date))
    }

    /// Append events for `date` and fsync before returning.
    ///
    /// The header is written when the file is new (or empty). If the file
    /// ends in a torn row from an earlier crash, that row is terminated first
    /// so the new rows start on a fresh line. A file holding only a torn
    /// header is rewritten from scratch. On failure the file is truncated
    /// back to its previous length.
    pub fn append(&self, events: &[KeystrokeEvent], date: NaiveDate) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let path = self.path_for(date);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(StoreError::io(&path))?;

        let original_len = file.metadata().map_err(StoreError::io(&path))?.len();
        let mut rollback_len = original_len;

        let tail = if original_len == 0 {
            Tail::Empty
        } else {
            inspect_tail(&mut file, original_len).map_err(StoreError::io(&path))?
        };

        let mut out = String::with_capacity(events.len() * 40 + CSV_HEADER.len() + 2);
        match tail {
            Tail::Complete => {}
            Tail::Empty => {
                out.push_str(CSV_HEADER);
                out.push('\n');
            }
            Tail::TornRow => {
                tracing::warn!(path = %path.display(), "terminating torn row left by an earlier write");
                out.push('\n');
            }
            Tail::TornHeader => {
                tracing::warn!(path = %path.display(), "rewriting header torn by an earlier write");
                file.set_len(0).map_err(StoreError::io(&path))?;
                rollback_len = 0;
                out.push_str(CSV_HEADER);
                out.push('\n');
            }
        }
        for event in events {
            out.push_str(&format_row(event));
            out.push('\n');
        }

        if let Err(source) = file
            .write_all(out.as_bytes())
            .and_then(|_| file.sync_all())
        {
            if let Err(e) = file.set_len(rollback_len) {
                tracing::error!(path = %path.display(), "could not roll back partial append: {e}");
            }
            return Err(StoreError::Io { path, source });
        }

        tracing::debug!(path = %path.display(), rows = events.len(), "appended rows");
        Ok(())
    }

    /// Daily files in the directory, oldest date first.
    pub fn list_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(StoreError::io(&self.dir))?;
        let mut files: Vec<(NaiveDate, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter_map(|p| {
                let date = date_from_file_name(p.file_name()?.to_str()?)?;
                Some((date, p))
            })
            .collect();
        files.sort();
        Ok(files.into_iter().map(|(_, p)| p).collect())
    }
}

impl EventStore for CsvStore {
    fn append(&mut self, events: &[KeystrokeEvent], date: NaiveDate) -> Result<(), StoreError> {
        CsvStore::append(self, events, date)
    }
}

/// How an existing file ends before an append.
enum Tail {
    Empty,
    Complete,
    TornRow,
    TornHeader,
}

fn inspect_tail(file: &mut File, len: u64) -> io::Result<Tail> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(Tail::Complete);
    }

    // A file with a complete header line is longer than the header itself.
    if len <= CSV_HEADER.len() as u64 {
        let mut head = Vec::with_capacity(len as usize);
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut head)?;
        if head != CSV_HEADER.as_bytes() {
            return Ok(Tail::TornHeader);
        }
    }
    Ok(Tail::TornRow)
}

/// Render one event as a CSV row (without newline).
pub fn format_row(event: &KeystrokeEvent) -> String {
    format!(
        "{},{},{},{}",
        event.timestamp.format(TIMESTAMP_FORMAT),
        event.key_label,
        event
            .interval_ms
            .map(|ms| ms.to_string())
            .unwrap_or_default(),
        u8::from(event.is_backspace)
    )
}

/// Parse one CSV row.
///
/// Also accepts rows from older logs: quoted fields, fractional intervals
/// (rounded to whole milliseconds) and timestamps with any sub-second
/// precision.
pub fn parse_row(line: &str) -> Result<KeystrokeEvent, RowError> {
    let fields = split_fields(line);
    let [timestamp, key, interval, flag] = fields.as_slice() else {
        return Err(RowError::FieldCount(fields.len()));
    };

    let timestamp = NaiveDateTime::parse_from_str(timestamp.trim(), "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|_| RowError::Timestamp(timestamp.clone()))?;
    let key_label: KeyLabel = key.parse()?;
    let interval_ms = parse_interval(interval)?;
    let is_backspace = match flag.trim() {
        "0" => false,
        "1" => true,
        other => return Err(RowError::Flag(other.to_string())),
    };
    if is_backspace != key_label.is_backspace() {
        return Err(RowError::InconsistentFlag(key.clone()));
    }

    Ok(KeystrokeEvent::new(timestamp, key_label, interval_ms))
}

fn parse_interval(field: &str) -> Result<Option<u64>, RowError> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(None);
    }
    if let Ok(ms) = field.parse::<u64>() {
        return Ok(Some(ms));
    }
    match field.parse::<f64>() {
        Ok(ms) if ms.is_finite() && ms >= 0.0 => Ok(Some(ms.round() as u64)),
        _ => Err(RowError::Interval(field.to_string())),
    }
}

/// Split a row on commas, honouring double-quoted fields.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::with_capacity(4);
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Read a daily file, skipping (and reporting) malformed rows.
pub fn read_log_file(path: &Path) -> Result<LogFileContents, StoreError> {
    let bytes = fs::read(path).map_err(StoreError::io(path))?;
    // A torn multi-byte sequence only damages its own row
    let content = String::from_utf8_lossy(&bytes);
    let mut contents = LogFileContents::default();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || (index == 0 && line == CSV_HEADER) {
            continue;
        }
        match parse_row(line) {
            Ok(event) => contents.events.push(event),
            Err(reason) => {
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    "skipping malformed row: {reason}"
                );
                contents.skipped.push(SkippedRow {
                    line: index + 1,
                    reason,
                });
            }
        }
    }

    Ok(contents)
}
