//! Durable storage for keystroke events.
//!
//! Events are kept in one append-only CSV file per local calendar date.
//! The flush task talks to storage through [`EventStore`] so tests can
//! inject faults.

pub mod csv_store;

use crate::core::event::KeystrokeEvent;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use csv_store::{
    file_name_for, parse_row, read_log_file, CsvStore, LogFileContents, RowError, SkippedRow,
    CSV_HEADER,
};

/// Storage failures. Always recoverable from the recorder's point of view.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O failure on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Destination for flushed batches.
pub trait EventStore: Send {
    /// Durably append `events`, all of which fall on `date`, in order.
    ///
    /// On error nothing from this call may remain visible, so a retry with
    /// the same events cannot duplicate rows.
    fn append(&mut self, events: &[KeystrokeEvent], date: NaiveDate) -> Result<(), StoreError>;
}
