//! Raw notification types emitted by key sources.
//!
//! A notification carries the identity of ONE physical key and the instant it
//! was pressed. Sources never accumulate sequences of keys.

use chrono::{DateTime, Local};
use std::sync::Arc;
use thiserror::Error;

/// Identity of a pressed key, as reported by a platform adapter.
///
/// Adapters translate native key codes into this enum. Codes that have no
/// variant become [`RawKey::Unmapped`]; the native value is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawKey {
    /// A key that produces a character on a US layout (unshifted or shifted).
    Char(char),
    Space,
    Enter,
    Backspace,
    Tab,
    Shift,
    Control,
    Command,
    Alt,
    Escape,
    Delete,
    Unmapped,
}

/// A single key-press notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyNotification {
    /// Which key was pressed
    pub key: RawKey,
    /// Wall-clock arrival time
    pub at: DateTime<Local>,
}

impl KeyNotification {
    /// Create a notification stamped with the current time.
    pub fn new(key: RawKey) -> Self {
        Self {
            key,
            at: Local::now(),
        }
    }

    /// Create a notification with an explicit arrival time.
    pub fn at(key: RawKey, at: DateTime<Local>) -> Self {
        Self { key, at }
    }
}

/// Callback invoked once per physical key press.
///
/// Handlers run on the source's listener thread and must not block on I/O.
pub type KeyHandler = Arc<dyn Fn(KeyNotification) + Send + Sync>;

/// Errors that can occur while subscribing to a key source.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("key source is already subscribed")]
    AlreadyRunning,
    #[error("keyboard monitoring permission not granted")]
    PermissionDenied,
    #[error("failed to install keyboard hook: {0}")]
    HookFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_now_is_recent() {
        let before = Local::now();
        let notification = KeyNotification::new(RawKey::Space);
        assert_eq!(notification.key, RawKey::Space);
        assert!(notification.at >= before);
    }

    #[test]
    fn test_permission_error_message() {
        let err = CollectorError::PermissionDenied;
        assert!(err.to_string().contains("permission"));
    }
}
