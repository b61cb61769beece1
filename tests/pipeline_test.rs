//! Integration tests for the capture pipeline and stats aggregation

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use typing_rhythm::collector::{ManualSource, RawKey};
use typing_rhythm::core::ShutdownOutcome;
use typing_rhythm::stats::{read_snapshot, write_snapshot};
use typing_rhythm::storage::read_log_file;
use typing_rhythm::transparency::create_shared_log;
use typing_rhythm::{
    Aggregator, CsvStore, EventStore, KeystrokeEvent, LabelPolicy, Recorder, RecorderSettings,
    StatsConfig, StoreError,
};

fn local(day: u32, h: u32, m: u32, s: u32, ms: i64) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(2024, 1, day, h, m, s)
        .single()
        .expect("unambiguous local time")
        + chrono::Duration::milliseconds(ms)
}

fn settings(batch_size: usize) -> RecorderSettings {
    RecorderSettings {
        flush_interval: Duration::from_secs(3_600),
        batch_size,
        buffer_capacity: 1_000,
        shutdown_timeout: Duration::from_secs(5),
        label_policy: LabelPolicy::Exact,
    }
}

/// CSV store whose first `failures` appends fail without touching disk.
struct FlakyCsvStore {
    inner: CsvStore,
    failures: Arc<AtomicUsize>,
}

impl EventStore for FlakyCsvStore {
    fn append(&mut self, events: &[KeystrokeEvent], date: NaiveDate) -> Result<(), StoreError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Io {
                path: self.inner.path_for(date),
                source: std::io::Error::new(std::io::ErrorKind::Other, "simulated fault"),
            });
        }
        self.inner.append(events, date)
    }
}

#[test]
fn test_recording_across_midnight_then_stats() {
    let dir = tempfile::tempdir().unwrap();
    let raw_dir = dir.path().join("raw");
    let store = CsvStore::open(&raw_dir).unwrap();

    let source = ManualSource::new();
    let emitter = source.emitter();
    let mut recorder = Recorder::new(source, settings(100), create_shared_log());
    recorder.start(store).unwrap();

    emitter.press(RawKey::Char('n'), local(15, 23, 59, 59, 800));
    emitter.press(RawKey::Char('i'), local(15, 23, 59, 59, 900));
    emitter.press(RawKey::Char('g'), local(16, 0, 0, 0, 50));
    emitter.press(RawKey::Char('h'), local(16, 0, 0, 0, 200));

    assert_eq!(
        recorder.stop(),
        Some(ShutdownOutcome::Completed { flushed_ok: true })
    );

    let files = CsvStore::open(&raw_dir).unwrap().list_files().unwrap();
    assert_eq!(files.len(), 2);
    assert!(files[0].ends_with("keystrokes_2024-01-15.csv"));
    assert!(files[1].ends_with("keystrokes_2024-01-16.csv"));
    assert_eq!(read_log_file(&files[0]).unwrap().events.len(), 2);

    // The interval crosses the file boundary unchanged.
    let second_day = read_log_file(&files[1]).unwrap();
    assert_eq!(second_day.events[0].interval_ms, Some(150));

    let aggregator = Aggregator::new(StatsConfig::default());
    let snapshot = aggregator.run(&files).unwrap();
    assert_eq!(snapshot.summary.total_events, 4);
    assert_eq!(snapshot.summary.total_sessions, 1);
    assert_eq!(snapshot.summary.files_read, 2);
    assert_eq!(snapshot.bursts.len(), 1);
    assert_eq!(snapshot.bursts[0].event_count, 4);
    assert_eq!(snapshot.bursts[0].duration_ms, 400);

    let output = dir.path().join("typing_stats.json");
    write_snapshot(&snapshot, &output).unwrap();
    assert_eq!(read_snapshot(&output).unwrap(), snapshot);
}

#[test]
fn test_failed_flush_is_retried_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let failures = Arc::new(AtomicUsize::new(1));
    let store = FlakyCsvStore {
        inner: CsvStore::open(dir.path()).unwrap(),
        failures: failures.clone(),
    };

    let source = ManualSource::new();
    let emitter = source.emitter();
    let log = create_shared_log();
    let mut recorder = Recorder::new(source, settings(2), log.clone());
    recorder.start(store).unwrap();

    emitter.press(RawKey::Char('a'), local(15, 10, 0, 0, 0));
    emitter.press(RawKey::Char('b'), local(15, 10, 0, 0, 130));

    // Wait for the threshold flush to hit the fault.
    let deadline = Instant::now() + Duration::from_secs(5);
    while failures.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(failures.load(Ordering::SeqCst), 0);

    emitter.press(RawKey::Char('c'), local(15, 10, 0, 0, 260));
    recorder.stop();

    let contents = read_log_file(&dir.path().join("keystrokes_2024-01-15.csv")).unwrap();
    let labels: Vec<String> = contents
        .events
        .iter()
        .map(|e| e.key_label.to_string())
        .collect();
    assert_eq!(labels, vec!["a", "b", "c"]);
    assert_eq!(log.stats().flush_failures, 1);
    assert_eq!(log.stats().events_persisted, 3);
}

#[test]
fn test_stats_are_stable_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store = CsvStore::open(dir.path()).unwrap();

    let source = ManualSource::new();
    let emitter = source.emitter();
    let mut recorder = Recorder::new(source, settings(100), create_shared_log());
    recorder.start(store).unwrap();
    for (i, key) in ['t', 'y', 'p', 'e', 's'].into_iter().enumerate() {
        emitter.press(RawKey::Char(key), local(15, 9, 0, 0, i as i64 * 180));
    }
    emitter.press(RawKey::Backspace, local(15, 9, 0, 1, 200));
    recorder.stop();

    let files = CsvStore::open(dir.path()).unwrap().list_files().unwrap();
    let aggregator = Aggregator::default();
    let generated_at = local(17, 8, 0, 0, 0);

    let first = aggregator.compute_at(&aggregator.load(&files).unwrap(), generated_at);
    let second = aggregator.compute_at(&aggregator.load(&files).unwrap(), generated_at);
    assert_eq!(first, second);
    assert_eq!(first.summary.total_events, 6);
    assert_eq!(first.summary.backspace_ratio, 0.167);
}
