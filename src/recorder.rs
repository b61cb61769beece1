//! The listening session.
//!
//! A [`Recorder`] subscribes to a [`KeySource`], normalizes each notification
//! into the shared buffer, and owns the flush thread that persists it.

use crate::collector::{CollectorError, KeyHandler, KeyNotification, KeySource};
use crate::config::Config;
use crate::core::buffer::SessionBuffer;
use crate::core::event::LabelPolicy;
use crate::core::flush::{FlushNudger, FlushScheduler, Flusher, ShutdownOutcome};
use crate::core::normalizer::Normalizer;
use crate::storage::EventStore;
use crate::transparency::SharedTransparencyLog;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Tunables of a recording session.
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderSettings {
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub buffer_capacity: usize,
    pub shutdown_timeout: Duration,
    pub label_policy: LabelPolicy,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RecorderSettings {
    fn from(config: &Config) -> Self {
        Self {
            flush_interval: config.flush_interval,
            batch_size: config.batch_size,
            buffer_capacity: config.buffer_capacity,
            shutdown_timeout: config.shutdown_timeout,
            label_policy: config.label_policy,
        }
    }
}

/// Capture service with an explicit start/stop lifecycle.
pub struct Recorder<K: KeySource> {
    source: K,
    settings: RecorderSettings,
    log: SharedTransparencyLog,
    buffer: Arc<SessionBuffer>,
    normalizer: Arc<Mutex<Normalizer>>,
    scheduler: Option<FlushScheduler>,
}

impl<K: KeySource> Recorder<K> {
    pub fn new(source: K, settings: RecorderSettings, log: SharedTransparencyLog) -> Self {
        let buffer = Arc::new(SessionBuffer::new(
            settings.buffer_capacity,
            settings.batch_size,
        ));
        let normalizer = Arc::new(Mutex::new(Normalizer::new(settings.label_policy)));

        Self {
            source,
            settings,
            log,
            buffer,
            normalizer,
            scheduler: None,
        }
    }

    /// Start the flush thread, then subscribe to the source.
    ///
    /// If subscribing fails (for example because monitoring permission is
    /// missing) the flush thread is stopped again and the error returned.
    pub fn start<S: EventStore + 'static>(&mut self, store: S) -> Result<(), CollectorError> {
        if self.scheduler.is_some() {
            return Err(CollectorError::AlreadyRunning);
        }

        self.lock_normalizer().reset();
        let flusher = Flusher::new(self.buffer.clone(), store, self.log.clone());
        let scheduler = FlushScheduler::spawn(flusher, self.settings.flush_interval);
        let handler = self.handler(scheduler.nudger());

        if let Err(e) = self.source.subscribe(handler) {
            scheduler.shutdown(self.settings.shutdown_timeout);
            return Err(e);
        }

        self.scheduler = Some(scheduler);
        tracing::info!(
            flush_interval = ?self.settings.flush_interval,
            batch_size = self.settings.batch_size,
            label_policy = ?self.settings.label_policy,
            "recorder started"
        );
        Ok(())
    }

    fn handler(&self, nudger: FlushNudger) -> KeyHandler {
        let buffer = self.buffer.clone();
        let normalizer = self.normalizer.clone();
        let log = self.log.clone();

        Arc::new(move |notification: KeyNotification| {
            // Normalize and append under one lock so buffer order matches
            // the order intervals were computed in.
            let outcome = {
                let mut normalizer = normalizer.lock().unwrap_or_else(PoisonError::into_inner);
                let event = normalizer.normalize(&notification);
                buffer.append(event)
            };

            log.record_captured();
            if outcome.evicted > 0 {
                log.record_dropped(outcome.evicted as u64);
                tracing::warn!(
                    evicted = outcome.evicted,
                    total_dropped = buffer.dropped_count(),
                    "buffer full, dropped oldest events"
                );
            }
            if outcome.should_flush {
                nudger.request();
            }
        })
    }

    /// Unsubscribe, run the final flush and persist the counters.
    ///
    /// Returns `None` if the recorder was not running.
    pub fn stop(&mut self) -> Option<ShutdownOutcome> {
        self.source.unsubscribe();
        let scheduler = self.scheduler.take()?;
        let outcome = scheduler.shutdown(self.settings.shutdown_timeout);

        match outcome {
            ShutdownOutcome::Completed { flushed_ok: true } => {
                tracing::info!("recorder stopped, all events flushed");
            }
            ShutdownOutcome::Completed { flushed_ok: false } => {
                tracing::warn!(
                    lost = self.buffer.len(),
                    "final flush failed, unflushed events are lost"
                );
            }
            ShutdownOutcome::TimedOut => {
                tracing::warn!(
                    pending = self.buffer.len(),
                    "shutdown timed out, unflushed events may be lost"
                );
            }
        }

        if let Err(e) = self.log.save() {
            tracing::warn!("could not save transparency stats: {e}");
        }
        Some(outcome)
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Events waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Events evicted because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.buffer.dropped_count()
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn log(&self) -> &SharedTransparencyLog {
        &self.log
    }

    pub fn source(&self) -> &K {
        &self.source
    }

    fn lock_normalizer(&self) -> std::sync::MutexGuard<'_, Normalizer> {
        self.normalizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: KeySource> Drop for Recorder<K> {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}
