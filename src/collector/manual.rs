//! A key source driven programmatically.
//!
//! Used to replay recorded timings, to embed the recorder behind another
//! listener, and in tests in place of a platform hook.

use crate::collector::types::{CollectorError, KeyHandler, KeyNotification, RawKey};
use crate::collector::KeySource;
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, PoisonError};

type HandlerSlot = Arc<Mutex<Option<KeyHandler>>>;

/// Key source whose notifications come from a [`ManualEmitter`].
#[derive(Default)]
pub struct ManualSource {
    slot: HandlerSlot,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a handle that delivers notifications to the current subscriber.
    pub fn emitter(&self) -> ManualEmitter {
        ManualEmitter {
            slot: self.slot.clone(),
        }
    }
}

impl KeySource for ManualSource {
    fn subscribe(&mut self, handler: KeyHandler) -> Result<(), CollectorError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(CollectorError::AlreadyRunning);
        }
        *slot = Some(handler);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn is_subscribed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Cloneable handle for pushing notifications into a [`ManualSource`].
#[derive(Clone)]
pub struct ManualEmitter {
    slot: HandlerSlot,
}

impl ManualEmitter {
    /// Deliver a notification. Returns `false` if nobody is subscribed.
    pub fn emit(&self, notification: KeyNotification) -> bool {
        // Clone the handler out so it runs without holding the slot lock.
        let handler = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => {
                handler(notification);
                true
            }
            None => false,
        }
    }

    /// Deliver a press of `key` at `at`.
    pub fn press(&self, key: RawKey, at: DateTime<Local>) -> bool {
        self.emit(KeyNotification::at(key, at))
    }
}
