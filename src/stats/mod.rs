//! Offline stats aggregation over daily keystroke logs.
//!
//! The aggregator reads one or more daily CSV files, merges their events in
//! timestamp order and derives a [`StatsSnapshot`]. Inputs are never
//! modified.

pub mod metrics;
pub mod snapshot;

use crate::config::StatsConfig;
use crate::core::event::KeystrokeEvent;
use crate::storage::{read_log_file, StoreError};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

pub use snapshot::{
    read_snapshot, write_snapshot, Burst, IntervalDistribution, Percentiles, Producer,
    StatsSnapshot, Summary, WpmPoint, PRODUCER_NAME,
};

/// Events loaded from daily logs, ready for aggregation.
#[derive(Debug, Clone, Default)]
pub struct LoadedEvents {
    /// All valid events, in timestamp order
    pub events: Vec<KeystrokeEvent>,
    /// File names that were read
    pub source_files: Vec<String>,
    /// Rows skipped as malformed across all files
    pub skipped_rows: usize,
}

/// Computes stats snapshots.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    config: StatsConfig,
}

impl Aggregator {
    pub fn new(config: StatsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    /// Read `files` and merge their events chronologically.
    ///
    /// The sort is stable, so events sharing a timestamp keep file order.
    pub fn load(&self, files: &[PathBuf]) -> Result<LoadedEvents, StoreError> {
        let mut loaded = LoadedEvents::default();

        for path in files {
            let contents = read_log_file(path)?;
            tracing::debug!(
                path = %path.display(),
                events = contents.events.len(),
                skipped = contents.skipped.len(),
                "read daily log"
            );
            loaded.skipped_rows += contents.skipped.len();
            loaded.events.extend(contents.events);
            loaded.source_files.push(display_name(path));
        }

        loaded.events.sort_by_key(|e| e.timestamp);
        Ok(loaded)
    }

    /// Load `files` and compute a snapshot stamped with the current time.
    pub fn run(&self, files: &[PathBuf]) -> Result<StatsSnapshot, StoreError> {
        let loaded = self.load(files)?;
        Ok(self.compute_at(&loaded, Local::now()))
    }

    /// Compute a snapshot. Equal inputs give equal snapshots.
    pub fn compute_at(&self, loaded: &LoadedEvents, generated_at: DateTime<Local>) -> StatsSnapshot {
        let events = &loaded.events;
        let intervals = metrics::active_intervals(events, self.config.idle_threshold_ms());

        let wpm_series = metrics::wpm_series(events, self.config.wpm_window);
        let bursts = metrics::detect_bursts(events, &self.config);
        let interval_distribution =
            metrics::interval_distribution(&intervals, &self.config.bucket_edges_ms);

        let mut summary =
            metrics::summarize(events, &intervals, &wpm_series, &bursts, &self.config);
        summary.skipped_rows = loaded.skipped_rows;
        summary.files_read = loaded.source_files.len();

        StatsSnapshot {
            generated_at,
            producer: Producer::default(),
            source_files: loaded.source_files.clone(),
            wpm_series: keep_latest(wpm_series, self.config.max_wpm_points),
            interval_distribution,
            bursts: keep_latest(bursts, self.config.max_bursts),
            summary,
        }
    }
}

fn keep_latest<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        let excess = items.len().saturating_sub(limit);
        items.drain(..excess);
    }
    items
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::KeyLabel;
    use crate::storage::{CsvStore, CSV_HEADER};
    use chrono::{NaiveDate, NaiveDateTime, TimeZone};

    fn at(day: u32, h: u32, m: u32, s: u32, ms: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
            + chrono::Duration::milliseconds(ms)
    }

    fn generated() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 17, 9, 0, 0).single().unwrap()
    }

    fn write_day(store: &CsvStore, day: u32, hour: u32, intervals: &[u64]) -> PathBuf {
        let mut ts = at(day, hour, 0, 0, 0);
        let mut events = vec![KeystrokeEvent::new(ts, KeyLabel::Char('t'), None)];
        for &ms in intervals {
            ts += chrono::Duration::milliseconds(ms as i64);
            events.push(KeystrokeEvent::new(ts, KeyLabel::Char('t'), Some(ms)));
        }
        let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        store.append(&events, date).unwrap();
        store.path_for(date)
    }

    #[test]
    fn test_empty_log_gives_zero_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::open(dir.path()).unwrap();
        let path = store.path_for(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        std::fs::write(&path, format!("{CSV_HEADER}\n")).unwrap();

        let aggregator = Aggregator::default();
        let loaded = aggregator.load(&[path]).unwrap();
        let snapshot = aggregator.compute_at(&loaded, generated());

        assert_eq!(snapshot.summary.total_events, 0);
        assert_eq!(snapshot.summary.total_sessions, 0);
        assert_eq!(snapshot.summary.avg_interval_ms, 0.0);
        assert!(snapshot.wpm_series.is_empty());
        assert!(snapshot.bursts.is_empty());
        assert!(snapshot
            .interval_distribution
            .buckets
            .iter()
            .all(|(_, count)| *count == 0));
    }

    #[test]
    fn test_no_files() {
        let snapshot = Aggregator::default().run(&[]).unwrap();
        assert_eq!(snapshot.summary, Summary::default());
        assert!(snapshot.source_files.is_empty());
    }

    #[test]
    fn test_single_event() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::open(dir.path()).unwrap();
        let path = write_day(&store, 15, 10, &[]);

        let aggregator = Aggregator::default();
        let snapshot = aggregator.compute_at(&aggregator.load(&[path]).unwrap(), generated());

        assert_eq!(snapshot.summary.total_events, 1);
        assert_eq!(snapshot.summary.total_sessions, 1);
        assert_eq!(snapshot.wpm_series.len(), 1);
        assert_eq!(snapshot.interval_distribution.mean, 0.0);
        assert!(snapshot.bursts.is_empty());
    }

    #[test]
    fn test_merges_files_in_timestamp_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::open(dir.path()).unwrap();
        let later = write_day(&store, 16, 9, &[100, 100]);
        let earlier = write_day(&store, 15, 22, &[200]);

        let aggregator = Aggregator::default();
        let loaded = aggregator.load(&[later, earlier]).unwrap();

        assert_eq!(loaded.events.len(), 5);
        assert!(loaded
            .events
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));

        let snapshot = aggregator.compute_at(&loaded, generated());
        assert_eq!(snapshot.summary.files_read, 2);
        assert_eq!(snapshot.summary.total_sessions, 2);
        assert_eq!(
            snapshot.source_files,
            vec!["keystrokes_2024-01-16.csv", "keystrokes_2024-01-15.csv"]
        );
    }

    #[test]
    fn test_deterministic_over_unchanged_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::open(dir.path()).unwrap();
        let path = write_day(&store, 15, 10, &[120, 80, 640, 90, 3_000, 75]);
        let before = std::fs::read(&path).unwrap();

        let aggregator = Aggregator::default();
        let first = aggregator.compute_at(&aggregator.load(&[path.clone()]).unwrap(), generated());
        let second = aggregator.compute_at(&aggregator.load(&[path.clone()]).unwrap(), generated());

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_skipped_rows_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::open(dir.path()).unwrap();
        let path = write_day(&store, 15, 10, &[150]);

        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("garbage\n2024-01-15T10:00:01.000,a,xyz,0\n");
        std::fs::write(&path, content).unwrap();

        let aggregator = Aggregator::default();
        let snapshot = aggregator.compute_at(&aggregator.load(&[path]).unwrap(), generated());
        assert_eq!(snapshot.summary.total_events, 2);
        assert_eq!(snapshot.summary.skipped_rows, 2);
    }

    #[test]
    fn test_output_limits_keep_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::open(dir.path()).unwrap();
        // Three bursts separated by slow intervals.
        let path = write_day(&store, 15, 10, &[100, 900, 100, 900, 100]);

        let aggregator = Aggregator::new(StatsConfig {
            max_bursts: Some(2),
            ..Default::default()
        });
        let snapshot = aggregator.compute_at(&aggregator.load(&[path]).unwrap(), generated());

        assert_eq!(snapshot.summary.total_bursts, 3);
        assert_eq!(snapshot.bursts.len(), 2);
        assert_eq!(snapshot.bursts[0].start, at(15, 10, 0, 1, 0));
    }

    #[test]
    fn test_wall_clock_falling_back_stays_one_session() {
        use crate::collector::RawKey;
        use crate::core::{LabelPolicy, Normalizer};

        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::open(dir.path()).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 11, 3).unwrap();

        // 01:59:59.900, then the clock falls back to 01:00:00.000
        let mut normalizer = Normalizer::new(LabelPolicy::Exact);
        let events: Vec<KeystrokeEvent> = [
            date.and_hms_milli_opt(1, 59, 59, 900).unwrap(),
            date.and_hms_milli_opt(1, 0, 0, 0).unwrap(),
            date.and_hms_milli_opt(1, 0, 0, 100).unwrap(),
        ]
        .into_iter()
        .map(|at| normalizer.normalize_local(RawKey::Char('x'), at))
        .collect();
        store.append(&events, date).unwrap();

        let aggregator = Aggregator::default();
        let loaded = aggregator.load(&[store.path_for(date)]).unwrap();
        assert_eq!(loaded.events, events);
        assert_eq!(loaded.events[0].interval_ms, None);

        let snapshot = aggregator.compute_at(&loaded, generated());
        assert_eq!(snapshot.summary.total_sessions, 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Aggregator::default().load(&[dir.path().join("keystrokes_2024-01-15.csv")]);
        assert!(result.is_err());
    }
}
