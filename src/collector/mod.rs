//! Key sources for the typing rhythm recorder.
//!
//! Every source implements [`KeySource`]: a single capability to subscribe a
//! handler that is called once per physical key press, and to unsubscribe it
//! again. Platform adapters translate native key codes into [`RawKey`] and
//! nothing else crosses this boundary.

pub mod manual;
pub mod types;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub mod noop;

// Re-export commonly used types
pub use manual::{ManualEmitter, ManualSource};
pub use types::{CollectorError, KeyHandler, KeyNotification, RawKey};

#[cfg(target_os = "macos")]
pub use macos::{check_permission, MacOSSource, PERMISSION_REMEDIATION};

/// Platform-native key source
#[cfg(target_os = "macos")]
pub type PlatformSource = MacOSSource;

#[cfg(target_os = "windows")]
pub use windows::{check_permission, WindowsSource, PERMISSION_REMEDIATION};

/// Platform-native key source
#[cfg(target_os = "windows")]
pub type PlatformSource = WindowsSource;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub use noop::{check_permission, NoopSource, PERMISSION_REMEDIATION};

/// Platform-native key source
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub type PlatformSource = NoopSource;

/// A source of key-press notifications.
pub trait KeySource: Send {
    /// Start delivering notifications to `handler`.
    fn subscribe(&mut self, handler: KeyHandler) -> Result<(), CollectorError>;

    /// Stop delivering notifications. Idempotent.
    fn unsubscribe(&mut self);

    /// Whether a handler is currently subscribed.
    fn is_subscribed(&self) -> bool;
}
