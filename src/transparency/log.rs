//! Privacy-preserving transparency log.
//!
//! Counts what the recorder did (events captured, persisted, dropped, rows
//! skipped) without storing anything about the keys themselves. Every way of
//! losing data has a counter here.
//!
//! Several processes may share one counters file (a long-running `start` and
//! a `stats` run). Each log remembers what it loaded or last saved and only
//! adds its own increments on top of what is on disk when saving.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Cumulative recorder statistics.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Key presses normalized into the buffer
    events_captured: AtomicU64,
    /// Events durably written to the daily log
    events_persisted: AtomicU64,
    /// Successful flushes
    flushes_completed: AtomicU64,
    /// Flushes that hit an I/O failure
    flush_failures: AtomicU64,
    /// Events evicted from a full buffer
    events_dropped: AtomicU64,
    /// Malformed rows skipped by the latest stats run
    last_rows_skipped: AtomicU64,
    /// Set once this log has recorded a stats run
    rows_skipped_updated: AtomicBool,
    /// Stats snapshots written
    snapshots_written: AtomicU64,
    /// Counter values as last loaded from or saved to disk
    baseline: Mutex<Counters>,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    /// Create a new transparency log.
    pub fn new() -> Self {
        Self {
            events_captured: AtomicU64::new(0),
            events_persisted: AtomicU64::new(0),
            flushes_completed: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            last_rows_skipped: AtomicU64::new(0),
            rows_skipped_updated: AtomicBool::new(false),
            snapshots_written: AtomicU64::new(0),
            baseline: Mutex::new(Counters::default()),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a transparency log that continues from the counters at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("could not load previous transparency stats: {e}");
        }

        log
    }

    pub fn record_captured(&self) {
        self.events_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persisted(&self, count: u64) {
        self.events_persisted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_flush_completed(&self) {
        self.flushes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_failed(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.events_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Record how many malformed rows the latest stats run skipped.
    ///
    /// This replaces the previous value: rereading the same files must not
    /// count the same rows again.
    pub fn record_rows_skipped(&self, count: u64) {
        self.last_rows_skipped.store(count, Ordering::Relaxed);
        self.rows_skipped_updated.store(true, Ordering::Relaxed);
    }

    pub fn record_snapshot_written(&self) {
        self.snapshots_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        let counters = self.counters();
        TransparencyStats {
            events_captured: counters.events_captured,
            events_persisted: counters.events_persisted,
            flushes_completed: counters.flushes_completed,
            flush_failures: counters.flush_failures,
            events_dropped: counters.events_dropped,
            last_rows_skipped: counters.last_rows_skipped,
            snapshots_written: counters.snapshots_written,
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Recorder Statistics:\n\
             - Key presses captured: {}\n\
             - Events persisted: {}\n\
             - Flushes completed: {}\n\
             - Flush failures: {}\n\
             - Events dropped (buffer full): {}\n\
             - Malformed rows skipped (last stats run): {}\n\
             - Stats snapshots written: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Privacy Guarantee:\n\
             - One label per key press, never sequences or text\n\
             - Only timing metadata retained",
            stats.events_captured,
            stats.events_persisted,
            stats.flushes_completed,
            stats.flush_failures,
            stats.events_dropped,
            stats.last_rows_skipped,
            stats.snapshots_written,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    ///
    /// Counters written by another process since this log loaded are kept;
    /// only this log's own increments are added to them.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut baseline = self.baseline.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.counters();
        let on_disk = if path.exists() {
            match load_persisted(path) {
                Ok(persisted) => Counters::from(&persisted),
                Err(e) => {
                    tracing::warn!("overwriting unreadable transparency stats: {e}");
                    *baseline
                }
            }
        } else {
            *baseline
        };
        let merged = on_disk.merge(
            &current,
            &baseline,
            self.rows_skipped_updated.load(Ordering::Relaxed),
        );

        let json = serde_json::to_string_pretty(&merged.persisted(Utc::now()))
            .map_err(std::io::Error::other)?;
        std::fs::write(path, json)?;

        self.advance(&current, &merged);
        *baseline = merged;
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let loaded = Counters::from(&load_persisted(path)?);
                self.advance(&Counters::default(), &loaded);
                *self.baseline.get_mut().unwrap_or_else(|e| e.into_inner()) = loaded;
            }
        }
        Ok(())
    }

    fn counters(&self) -> Counters {
        Counters {
            events_captured: self.events_captured.load(Ordering::Relaxed),
            events_persisted: self.events_persisted.load(Ordering::Relaxed),
            flushes_completed: self.flushes_completed.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            last_rows_skipped: self.last_rows_skipped.load(Ordering::Relaxed),
            snapshots_written: self.snapshots_written.load(Ordering::Relaxed),
        }
    }

    /// Move every counter from `from` to `to`, keeping increments recorded
    /// in between. The delta may be negative; atomic adds wrap.
    fn advance(&self, from: &Counters, to: &Counters) {
        let step = |counter: &AtomicU64, from: u64, to: u64| {
            counter.fetch_add(to.wrapping_sub(from), Ordering::Relaxed);
        };
        step(&self.events_captured, from.events_captured, to.events_captured);
        step(&self.events_persisted, from.events_persisted, to.events_persisted);
        step(&self.flushes_completed, from.flushes_completed, to.flushes_completed);
        step(&self.flush_failures, from.flush_failures, to.flush_failures);
        step(&self.events_dropped, from.events_dropped, to.events_dropped);
        step(&self.last_rows_skipped, from.last_rows_skipped, to.last_rows_skipped);
        step(&self.snapshots_written, from.snapshots_written, to.snapshots_written);
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain counter values, as persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counters {
    events_captured: u64,
    events_persisted: u64,
    flushes_completed: u64,
    flush_failures: u64,
    events_dropped: u64,
    last_rows_skipped: u64,
    snapshots_written: u64,
}

impl Counters {
    /// Apply the increments made since `baseline` on top of `self`.
    ///
    /// `last_rows_skipped` is a latest value, not a sum: it is taken from
    /// `current` only when this log recorded a stats run.
    fn merge(&self, current: &Counters, baseline: &Counters, rows_skipped_updated: bool) -> Self {
        let add = |disk: u64, now: u64, base: u64| disk + now.saturating_sub(base);
        Self {
            events_captured: add(
                self.events_captured,
                current.events_captured,
                baseline.events_captured,
            ),
            events_persisted: add(
                self.events_persisted,
                current.events_persisted,
                baseline.events_persisted,
            ),
            flushes_completed: add(
                self.flushes_completed,
                current.flushes_completed,
                baseline.flushes_completed,
            ),
            flush_failures: add(
                self.flush_failures,
                current.flush_failures,
                baseline.flush_failures,
            ),
            events_dropped: add(
                self.events_dropped,
                current.events_dropped,
                baseline.events_dropped,
            ),
            last_rows_skipped: if rows_skipped_updated {
                current.last_rows_skipped
            } else {
                self.last_rows_skipped
            },
            snapshots_written: add(
                self.snapshots_written,
                current.snapshots_written,
                baseline.snapshots_written,
            ),
        }
    }

    fn persisted(&self, last_updated: DateTime<Utc>) -> PersistedStats {
        PersistedStats {
            events_captured: self.events_captured,
            events_persisted: self.events_persisted,
            flushes_completed: self.flushes_completed,
            flush_failures: self.flush_failures,
            events_dropped: self.events_dropped,
            last_rows_skipped: self.last_rows_skipped,
            snapshots_written: self.snapshots_written,
            last_updated,
        }
    }
}

impl From<&PersistedStats> for Counters {
    fn from(p: &PersistedStats) -> Self {
        Self {
            events_captured: p.events_captured,
            events_persisted: p.events_persisted,
            flushes_completed: p.flushes_completed,
            flush_failures: p.flush_failures,
            events_dropped: p.events_dropped,
            last_rows_skipped: p.last_rows_skipped,
            snapshots_written: p.snapshots_written,
        }
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub events_captured: u64,
    pub events_persisted: u64,
    pub flushes_completed: u64,
    pub flush_failures: u64,
    pub events_dropped: u64,
    pub last_rows_skipped: u64,
    pub snapshots_written: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStats {
    #[serde(default)]
    pub events_captured: u64,
    #[serde(default)]
    pub events_persisted: u64,
    #[serde(default)]
    pub flushes_completed: u64,
    #[serde(default)]
    pub flush_failures: u64,
    #[serde(default)]
    pub events_dropped: u64,
    #[serde(default)]
    pub last_rows_skipped: u64,
    #[serde(default)]
    pub snapshots_written: u64,
    pub last_updated: DateTime<Utc>,
}

/// Read persisted counters (used by `status` without opening a live log).
pub fn load_persisted(path: &std::path::Path) -> Result<PersistedStats, std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(std::io::Error::other)
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

/// Create a new shared transparency log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
