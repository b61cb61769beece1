//! Bounded in-memory buffer between the listener and the flush task.
//!
//! The listener appends; the flush task swaps the whole content out, writes
//! it without holding the lock, and restores it on failure. Once capacity is
//! exceeded the oldest events are evicted and counted.

use crate::core::event::KeystrokeEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result of a single append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Oldest events evicted to make room
    pub evicted: usize,
    /// The buffer reached its flush threshold
    pub should_flush: bool,
}

/// Session buffer shared by the listener and the flush task.
#[derive(Debug)]
pub struct SessionBuffer {
    events: Mutex<VecDeque<KeystrokeEvent>>,
    capacity: usize,
    flush_threshold: usize,
    dropped: AtomicU64,
}

impl SessionBuffer {
    /// `capacity` and `flush_threshold` are clamped to at least 1.
    pub fn new(capacity: usize, flush_threshold: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(4_096))),
            capacity,
            flush_threshold: flush_threshold.clamp(1, capacity),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<KeystrokeEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one event. Never performs I/O.
    pub fn append(&self, event: KeystrokeEvent) -> AppendOutcome {
        let mut events = self.lock();
        events.push_back(event);
        let evicted = self.evict_overflow(&mut events);
        AppendOutcome {
            evicted,
            should_flush: events.len() >= self.flush_threshold,
        }
    }

    /// Take every buffered event, leaving the buffer empty.
    pub fn swap_out(&self) -> Vec<KeystrokeEvent> {
        let mut events = self.lock();
        std::mem::take(&mut *events).into()
    }

    /// Put back a batch that could not be written.
    ///
    /// The batch is older than anything appended since it was swapped out,
    /// so it goes in front. Returns how many events were evicted.
    pub fn restore(&self, batch: Vec<KeystrokeEvent>) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let mut events = self.lock();
        let mut merged = VecDeque::from(batch);
        merged.append(&mut events);
        *events = merged;
        self.evict_overflow(&mut events)
    }

    fn evict_overflow(&self, events: &mut VecDeque<KeystrokeEvent>) -> usize {
        let excess = events.len().saturating_sub(self.capacity);
        if excess > 0 {
            events.drain(..excess);
            self.dropped.fetch_add(excess as u64, Ordering::Relaxed);
        }
        excess
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total events evicted since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Copy of the buffered events, oldest first.
    pub fn snapshot(&self) -> Vec<KeystrokeEvent> {
        self.lock().iter().cloned().collect()
    }
}
