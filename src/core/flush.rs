//! Background flush task.
//!
//! A [`Flusher`] drains the [`SessionBuffer`] into an [`EventStore`]; a
//! [`FlushScheduler`] runs it on its own thread on a fixed cadence, on
//! threshold nudges from the listener, and once more at shutdown.

use crate::core::buffer::SessionBuffer;
use crate::storage::{EventStore, StoreError};
use crate::transparency::SharedTransparencyLog;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Moves buffered events into durable storage.
pub struct Flusher<S: EventStore> {
    buffer: Arc<SessionBuffer>,
    store: S,
    log: SharedTransparencyLog,
}

impl<S: EventStore> Flusher<S> {
    pub fn new(buffer: Arc<SessionBuffer>, store: S, log: SharedTransparencyLog) -> Self {
        Self { buffer, store, log }
    }

    /// Write everything currently buffered. Returns the number of events
    /// persisted.
    ///
    /// The batch is split into runs of consecutive events sharing a date, and
    /// each run goes to that date's file. If a run fails, it and every later
    /// run go back to the front of the buffer for the next attempt.
    pub fn flush(&mut self) -> Result<usize, StoreError> {
        let mut batch = self.buffer.swap_out();
        if batch.is_empty() {
            return Ok(0);
        }

        let mut start = 0;
        while start < batch.len() {
            let date = batch[start].date();
            let end = batch[start..]
                .iter()
                .position(|e| e.date() != date)
                .map_or(batch.len(), |offset| start + offset);

            if let Err(e) = self.store.append(&batch[start..end], date) {
                let unwritten = batch.split_off(start);
                let requeued = unwritten.len();
                let evicted = self.buffer.restore(unwritten);

                if start > 0 {
                    self.log.record_persisted(start as u64);
                }
                self.log.record_flush_failed();
                if evicted > 0 {
                    self.log.record_dropped(evicted as u64);
                }
                tracing::warn!(
                    persisted = start,
                    requeued,
                    evicted,
                    "flush failed, will retry on next tick: {e}"
                );
                return Err(e);
            }
            start = end;
        }

        let written = batch.len();
        self.log.record_persisted(written as u64);
        self.log.record_flush_completed();
        tracing::debug!(events = written, "flushed batch");
        Ok(written)
    }

    pub fn buffer(&self) -> &Arc<SessionBuffer> {
        &self.buffer
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

/// How a scheduler shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The final flush ran; `flushed_ok` is false if it hit a store error.
    Completed { flushed_ok: bool },
    /// The final flush did not finish within the timeout.
    TimedOut,
}

/// Cheap handle the listener uses to request an early flush.
#[derive(Debug, Clone)]
pub struct FlushNudger {
    sender: Sender<()>,
}

impl FlushNudger {
    /// Request a flush without blocking. Requests coalesce while one is
    /// already pending.
    pub fn request(&self) {
        match self.sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                tracing::debug!("flush requested after scheduler stopped");
            }
        }
    }
}

/// Owns the flush thread.
pub struct FlushScheduler {
    nudger: FlushNudger,
    shutdown: Sender<()>,
    done: Receiver<bool>,
    handle: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    /// Start the flush thread, flushing every `interval`.
    pub fn spawn<S: EventStore + 'static>(flusher: Flusher<S>, interval: Duration) -> Self {
        let (nudge_tx, nudge_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let interval = interval.max(Duration::from_millis(1));

        let handle = thread::Builder::new()
            .name("flush".into())
            .spawn(move || run_flush_loop(flusher, interval, nudge_rx, shutdown_rx, done_tx))
            .ok();
        if handle.is_none() {
            tracing::error!("could not spawn flush thread; events will stay buffered");
        }

        Self {
            nudger: FlushNudger { sender: nudge_tx },
            shutdown: shutdown_tx,
            done: done_rx,
            handle,
        }
    }

    pub fn nudger(&self) -> FlushNudger {
        self.nudger.clone()
    }

    pub fn request_flush(&self) {
        self.nudger.request();
    }

    /// Stop the thread after one final flush, waiting at most `timeout`.
    ///
    /// On timeout the thread is detached and keeps writing in the background
    /// until the process exits.
    pub fn shutdown(mut self, timeout: Duration) -> ShutdownOutcome {
        let _ = self.shutdown.try_send(());

        match self.done.recv_timeout(timeout) {
            Ok(flushed_ok) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                ShutdownOutcome::Completed { flushed_ok }
            }
            Err(_) => {
                tracing::warn!(?timeout, "final flush did not complete in time");
                ShutdownOutcome::TimedOut
            }
        }
    }
}

enum Wake {
    Stop,
    Nudge,
    Tick,
}

fn run_flush_loop<S: EventStore>(
    mut flusher: Flusher<S>,
    interval: Duration,
    nudges: Receiver<()>,
    shutdown: Receiver<()>,
    done: Sender<bool>,
) {
    let mut next_tick = Instant::now() + interval;
    // After a failure, threshold nudges wait for the next tick.
    let mut backing_off = false;

    loop {
        let timeout = next_tick.saturating_duration_since(Instant::now());
        let wake = select! {
            recv(shutdown) -> _ => Wake::Stop,
            recv(nudges) -> msg => if msg.is_ok() { Wake::Nudge } else { Wake::Stop },
            default(timeout) => Wake::Tick,
        };

        match wake {
            Wake::Stop => break,
            Wake::Nudge => {
                if !backing_off {
                    backing_off = flusher.flush().is_err();
                }
            }
            Wake::Tick => {
                backing_off = flusher.flush().is_err();
                next_tick += interval;
                let now = Instant::now();
                if next_tick <= now {
                    next_tick = now + interval;
                }
            }
        }
    }

    let flushed_ok = flusher.flush().is_ok();
    tracing::debug!(flushed_ok, "flush thread stopped");
    let _ = done.send(flushed_ok);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{KeyLabel, KeystrokeEvent};
    use crate::storage::CsvStore;
    use crate::transparency::create_shared_log;
    use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
    use std::io;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Store that fails the first `failures` appends, then records batches.
    struct FlakyStore {
        failures: usize,
        written: Arc<Mutex<Vec<(NaiveDate, Vec<KeystrokeEvent>)>>>,
        delay: Duration,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                written: Arc::new(Mutex::new(Vec::new())),
                delay: Duration::ZERO,
            }
        }

        fn rows(&self) -> Vec<KeystrokeEvent> {
            self.written
                .lock()
                .unwrap()
                .iter()
                .flat_map(|(_, batch)| batch.iter().cloned())
                .collect()
        }
    }

    impl EventStore for FlakyStore {
        fn append(&mut self, events: &[KeystrokeEvent], date: NaiveDate) -> Result<(), StoreError> {
            thread::sleep(self.delay);
            if self.failures > 0 {
                self.failures -= 1;
                return Err(StoreError::Io {
                    path: PathBuf::from("flaky.csv"),
                    source: io::Error::new(io::ErrorKind::Other, "disk full"),
                });
            }
            self.written
                .lock()
                .unwrap()
                .push((date, events.to_vec()));
            Ok(())
        }
    }

    fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn events(start: NaiveDateTime, count: usize) -> Vec<KeystrokeEvent> {
        (0..count)
            .map(|i| {
                KeystrokeEvent::new(
                    start + ChronoDuration::milliseconds(i as i64 * 150),
                    KeyLabel::Char('e'),
                    if i == 0 { None } else { Some(150) },
                )
            })
            .collect()
    }

    #[test]
    fn test_flush_writes_and_clears() {
        let buffer = Arc::new(SessionBuffer::new(100, 50));
        let log = create_shared_log();
        let mut flusher = Flusher::new(buffer.clone(), FlakyStore::new(0), log.clone());

        for event in events(at(15, 10, 0, 0), 5) {
            buffer.append(event);
        }

        assert_eq!(flusher.flush().unwrap(), 5);
        assert!(buffer.is_empty());
        assert_eq!(flusher.store().rows().len(), 5);
        assert_eq!(log.stats().events_persisted, 5);
        assert_eq!(log.stats().flushes_completed, 1);
    }

    #[test]
    fn test_empty_flush_is_noop() {
        let buffer = Arc::new(SessionBuffer::new(10, 5));
        let mut flusher = Flusher::new(buffer, FlakyStore::new(0), create_shared_log());

        assert_eq!(flusher.flush().unwrap(), 0);
        assert!(flusher.store().written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_flush_keeps_events_without_duplicates() {
        let buffer = Arc::new(SessionBuffer::new(100, 50));
        let log = create_shared_log();
        let mut flusher = Flusher::new(buffer.clone(), FlakyStore::new(2), log.clone());

        let input = events(at(15, 10, 0, 0), 4);
        for event in input.clone() {
            buffer.append(event);
        }

        assert!(flusher.flush().is_err());
        assert_eq!(buffer.snapshot(), input);

        // Events arriving between attempts stay behind the restored batch.
        let late = events(at(15, 10, 1, 0), 2);
        for event in late.clone() {
            buffer.append(event);
        }
        assert!(flusher.flush().is_err());
        assert_eq!(buffer.len(), 6);

        assert_eq!(flusher.flush().unwrap(), 6);
        let mut expected = input;
        expected.extend(late);
        assert_eq!(flusher.store().rows(), expected);
        assert_eq!(log.stats().flush_failures, 2);
        assert_eq!(log.stats().events_persisted, 6);
    }

    #[test]
    fn test_sustained_failure_drops_oldest_and_counts() {
        let buffer = Arc::new(SessionBuffer::new(5, 5));
        let log = create_shared_log();
        let mut flusher = Flusher::new(buffer.clone(), FlakyStore::new(usize::MAX), log.clone());

        let input = events(at(15, 10, 0, 0), 8);
        for event in input[..4].iter().cloned() {
            buffer.append(event);
        }
        assert!(flusher.flush().is_err());

        for event in input[4..].iter().cloned() {
            let outcome = buffer.append(event);
            if outcome.evicted > 0 {
                log.record_dropped(outcome.evicted as u64);
            }
        }

        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.dropped_count(), 3);
        assert_eq!(log.stats().events_dropped, 3);
        assert_eq!(buffer.snapshot(), input[3..].to_vec());
    }

    #[test]
    fn test_batch_spanning_midnight_goes_to_two_files() {
        let buffer = Arc::new(SessionBuffer::new(100, 50));
        let mut flusher = Flusher::new(buffer.clone(), FlakyStore::new(0), create_shared_log());

        let mut input = events(at(15, 23, 59, 59), 3);
        input.extend(events(at(16, 0, 0, 1), 2));
        for event in input {
            buffer.append(event);
        }

        assert_eq!(flusher.flush().unwrap(), 5);
        let written = flusher.store().written.lock().unwrap().clone();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].0, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(written[0].1.len(), 3);
        assert_eq!(written[1].0, NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
        assert_eq!(written[1].1.len(), 2);
    }

    #[test]
    fn test_scheduler_flushes_on_nudge_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::open(dir.path()).unwrap();
        let buffer = Arc::new(SessionBuffer::new(100, 2));
        let flusher = Flusher::new(buffer.clone(), store, create_shared_log());

        let scheduler = FlushScheduler::spawn(flusher, Duration::from_secs(3_600));
        for event in events(at(15, 10, 0, 0), 2) {
            if buffer.append(event).should_flush {
                scheduler.request_flush();
            }
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while !buffer.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(buffer.is_empty());

        buffer.append(events(at(15, 10, 5, 0), 1).remove(0));
        assert_eq!(
            scheduler.shutdown(Duration::from_secs(5)),
            ShutdownOutcome::Completed { flushed_ok: true }
        );

        let path = dir.path().join("keystrokes_2024-01-15.csv");
        let contents = crate::storage::read_log_file(&path).unwrap();
        assert_eq!(contents.events.len(), 3);
    }

    #[test]
    fn test_scheduler_flushes_on_interval() {
        let buffer = Arc::new(SessionBuffer::new(100, 100));
        let store = FlakyStore::new(0);
        let written = store.written.clone();
        let flusher = Flusher::new(buffer.clone(), store, create_shared_log());

        let scheduler = FlushScheduler::spawn(flusher, Duration::from_millis(20));
        buffer.append(events(at(15, 10, 0, 0), 1).remove(0));

        let deadline = Instant::now() + Duration::from_secs(5);
        while written.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(written.lock().unwrap().len(), 1);

        scheduler.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_shutdown_times_out_on_stuck_store() {
        let buffer = Arc::new(SessionBuffer::new(100, 100));
        let mut store = FlakyStore::new(0);
        store.delay = Duration::from_millis(500);
        let flusher = Flusher::new(buffer.clone(), store, create_shared_log());

        let scheduler = FlushScheduler::spawn(flusher, Duration::from_secs(3_600));
        buffer.append(events(at(15, 10, 0, 0), 1).remove(0));

        assert_eq!(
            scheduler.shutdown(Duration::from_millis(50)),
            ShutdownOutcome::TimedOut
        );
    }
}
