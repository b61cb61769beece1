//! macOS key source using a listen-only CGEvent tap.
//!
//! Requires the Input Monitoring permission. Only key-down events (and
//! modifier presses, seen as FlagsChanged) are observed; the virtual key code
//! is translated to a [`RawKey`] inside the callback and then dropped.

use crate::collector::types::{CollectorError, KeyHandler, KeyNotification, RawKey};
use crate::collector::KeySource;
use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventType, CallbackResult, EventField,
};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How to grant the permission when the tap cannot be created.
pub const PERMISSION_REMEDIATION: &str = "\
To grant permission:
1. Open System Settings > Privacy & Security
2. Select 'Input Monitoring'
3. Add this application (or your terminal) to the allowed list
4. Restart the application";

/// Key source backed by a CGEvent tap on a dedicated run-loop thread.
pub struct MacOSSource {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl MacOSSource {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl Default for MacOSSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySource for MacOSSource {
    /// Returns `PermissionDenied` if the tap cannot be created.
    fn subscribe(&mut self, handler: KeyHandler) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = bounded(1);
        let running = self.running.clone();

        let handle = thread::spawn(move || {
            if let Err(e) = run_event_loop(handler, running.clone(), &ready_tx) {
                let _ = ready_tx.try_send(Err(e));
            }
            running.store(false, Ordering::SeqCst);
        });
        self.thread_handle = Some(handle);

        match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.unsubscribe();
                Err(e)
            }
            Err(_) => {
                self.unsubscribe();
                Err(CollectorError::HookFailed(
                    "event tap did not start in time".to_string(),
                ))
            }
        }
    }

    fn unsubscribe(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            // The run loop wakes every 100ms and observes the flag
            let _ = handle.join();
        }
    }

    fn is_subscribed(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for MacOSSource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Run the Core Graphics event loop until `running` is cleared.
fn run_event_loop(
    handler: KeyHandler,
    running: Arc<AtomicBool>,
    ready: &crossbeam_channel::Sender<Result<(), CollectorError>>,
) -> Result<(), CollectorError> {
    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::KeyDown, CGEventType::FlagsChanged],
        move |_proxy, event_type, event| {
            if let Some(key) = translate_event(event_type, event) {
                handler(KeyNotification::new(key));
            }
            // Passive observer: the event is always passed through
            CallbackResult::Keep
        },
    )
    .map_err(|_| CollectorError::PermissionDenied)?;

    let source = tap
        .mach_port()
        .create_runloop_source(0)
        .map_err(|_| CollectorError::HookFailed("run loop source".to_string()))?;

    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&source, kCFRunLoopCommonModes);
    }
    tap.enable();
    let _ = ready.try_send(Ok(()));

    while running.load(Ordering::SeqCst) {
        CFRunLoop::run_in_mode(
            unsafe { kCFRunLoopCommonModes },
            Duration::from_millis(100),
            false,
        );
    }

    Ok(())
}

/// Translate a tapped event into a key identity.
fn translate_event(event_type: CGEventType, event: &CGEvent) -> Option<RawKey> {
    let keycode = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16;
    match event_type {
        CGEventType::KeyDown => Some(key_from_keycode(keycode)),
        // FlagsChanged fires on press and release; keep presses only
        CGEventType::FlagsChanged => {
            let (key, flag) = modifier_for_keycode(keycode)?;
            event.get_flags().contains(flag).then_some(key)
        }
        _ => None,
    }
}

fn modifier_for_keycode(keycode: u16) -> Option<(RawKey, CGEventFlags)> {
    match keycode {
        0x38 | 0x3C => Some((RawKey::Shift, CGEventFlags::CGEventFlagShift)),
        0x3B | 0x3E => Some((RawKey::Control, CGEventFlags::CGEventFlagControl)),
        0x3A | 0x3D => Some((RawKey::Alt, CGEventFlags::CGEventFlagAlternate)),
        0x37 | 0x36 => Some((RawKey::Command, CGEventFlags::CGEventFlagCommand)),
        _ => None,
    }
}

/// Map an ANSI virtual key code to a key identity.
fn key_from_keycode(keycode: u16) -> RawKey {
    let c = match keycode {
        0x00 => 'a',
        0x01 => 's',
        0x02 => 'd',
        0x03 => 'f',
        0x04 => 'h',
        0x05 => 'g',
        0x06 => 'z',
        0x07 => 'x',
        0x08 => 'c',
        0x09 => 'v',
        0x0B => 'b',
        0x0C => 'q',
        0x0D => 'w',
        0x0E => 'e',
        0x0F => 'r',
        0x10 => 'y',
        0x11 => 't',
        0x12 => '1',
        0x13 => '2',
        0x14 => '3',
        0x15 => '4',
        0x16 => '6',
        0x17 => '5',
        0x18 => '=',
        0x19 => '9',
        0x1A => '7',
        0x1B => '-',
        0x1C => '8',
        0x1D => '0',
        0x1E => ']',
        0x1F => 'o',
        0x20 => 'u',
        0x21 => '[',
        0x22 => 'i',
        0x23 => 'p',
        0x25 => 'l',
        0x26 => 'j',
        0x27 => '\'',
        0x28 => 'k',
        0x29 => ';',
        0x2A => '\\',
        0x2B => ',',
        0x2C => '/',
        0x2D => 'n',
        0x2E => 'm',
        0x2F => '.',
        0x32 => '`',
        0x24 | 0x4C => return RawKey::Enter,
        0x30 => return RawKey::Tab,
        0x31 => return RawKey::Space,
        0x33 => return RawKey::Backspace,
        0x35 => return RawKey::Escape,
        0x75 => return RawKey::Delete,
        _ => return RawKey::Unmapped,
    };
    RawKey::Char(c)
}

/// Check whether a listen-only tap can be created.
///
/// macOS has no direct query for Input Monitoring; tap creation fails when
/// the permission is missing.
pub fn check_permission() -> bool {
    CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::KeyDown],
        |_proxy, _type, _event| CallbackResult::Keep,
    )
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_creation() {
        let source = MacOSSource::new();
        assert!(!source.is_subscribed());
    }

    #[test]
    fn test_keycode_mapping() {
        assert_eq!(key_from_keycode(0x00), RawKey::Char('a'));
        assert_eq!(key_from_keycode(0x1D), RawKey::Char('0'));
        assert_eq!(key_from_keycode(0x33), RawKey::Backspace);
        assert_eq!(key_from_keycode(0x7A), RawKey::Unmapped);
    }
}
