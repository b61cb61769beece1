//! Windows key source using a low-level keyboard hook.
//!
//! The hook (SetWindowsHookEx with WH_KEYBOARD_LL) runs on a dedicated thread
//! with its own message loop. Only key-down messages are forwarded, after the
//! virtual-key code has been translated to a [`RawKey`].

use crate::collector::types::{CollectorError, KeyHandler, KeyNotification, RawKey};
use crate::collector::KeySource;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, GetMessageW, PostThreadMessageW, SetWindowsHookExW, UnhookWindowsHookEx,
    HHOOK, KBDLLHOOKSTRUCT, MSG, WH_KEYBOARD_LL, WM_KEYDOWN, WM_QUIT, WM_SYSKEYDOWN,
};

/// How to recover when the hook cannot be installed.
pub const PERMISSION_REMEDIATION: &str = "\
The low-level keyboard hook could not be installed.
1. Make sure no security software blocks global keyboard hooks
2. Run the recorder in the same session as the desktop user
3. If the recorder runs elevated, run it unelevated (or vice versa) to match the session";

/// Key source backed by a low-level keyboard hook.
pub struct WindowsSource {
    running: Arc<AtomicBool>,
    hook_thread_id: Arc<AtomicU32>,
    thread_handle: Option<JoinHandle<()>>,
}

impl WindowsSource {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            hook_thread_id: Arc::new(AtomicU32::new(0)),
            thread_handle: None,
        }
    }
}

impl Default for WindowsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySource for WindowsSource {
    fn subscribe(&mut self, handler: KeyHandler) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = bounded(1);
        let running = self.running.clone();
        let thread_id = self.hook_thread_id.clone();

        let handle = thread::spawn(move || {
            thread_id.store(unsafe { GetCurrentThreadId() }, Ordering::SeqCst);
            let result = run_hook_loop(handler, &ready_tx);
            if let Err(e) = result {
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
                    "hook thread did not start in time".to_string(),
                ))
            }
        }
    }

    fn unsubscribe(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let thread_id = self.hook_thread_id.swap(0, Ordering::SeqCst);
        if thread_id != 0 {
            // GetMessageW blocks; WM_QUIT is the only way to wake it
            let _ = unsafe { PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) };
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn is_subscribed(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for WindowsSource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// Hook procedures are plain functions, so the handler lives in a
// thread-local of the hook thread.
thread_local! {
    static KEY_HANDLER: std::cell::RefCell<Option<KeyHandler>> = const { std::cell::RefCell::new(None) };
}

/// Low-level keyboard hook callback.
unsafe extern "system" fn keyboard_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code >= 0 && matches!(w_param.0 as u32, WM_KEYDOWN | WM_SYSKEYDOWN) {
        let kb_struct = &*(l_param.0 as *const KBDLLHOOKSTRUCT);
        let key = key_from_vk(kb_struct.vkCode);

        KEY_HANDLER.with(|handler| {
            if let Some(ref handler) = *handler.borrow() {
                handler(KeyNotification::new(key));
            }
        });
    }

    CallNextHookEx(HHOOK::default(), n_code, w_param, l_param)
}

/// Install the hook and pump messages until WM_QUIT.
fn run_hook_loop(
    handler: KeyHandler,
    ready: &crossbeam_channel::Sender<Result<(), CollectorError>>,
) -> Result<(), CollectorError> {
    KEY_HANDLER.with(|h| *h.borrow_mut() = Some(handler));

    unsafe {
        let hook = SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), None, 0)
            .map_err(|_| CollectorError::PermissionDenied)?;
        let _ = ready.try_send(Ok(()));

        let mut msg = MSG::default();
        // > 0: message, 0: WM_QUIT, < 0: error
        while GetMessageW(&mut msg, HWND::default(), 0, 0).0 > 0 {}

        let _ = UnhookWindowsHookEx(hook);
    }

    KEY_HANDLER.with(|h| h.borrow_mut().take());
    Ok(())
}

/// Map a virtual-key code to a key identity.
fn key_from_vk(vk: u32) -> RawKey {
    match vk {
        0x41..=0x5A => RawKey::Char(char::from(vk as u8).to_ascii_lowercase()),
        0x30..=0x39 => RawKey::Char(char::from(vk as u8)),
        0x08 => RawKey::Backspace,
        0x09 => RawKey::Tab,
        0x0D => RawKey::Enter,
        0x10 | 0xA0 | 0xA1 => RawKey::Shift,
        0x11 | 0xA2 | 0xA3 => RawKey::Control,
        0x12 | 0xA4 | 0xA5 => RawKey::Alt,
        0x1B => RawKey::Escape,
        0x20 => RawKey::Space,
        0x2E => RawKey::Delete,
        0x5B | 0x5C => RawKey::Command,
        0xBA => RawKey::Char(';'),
        0xBB => RawKey::Char('='),
        0xBC => RawKey::Char(','),
        0xBD => RawKey::Char('-'),
        0xBE => RawKey::Char('.'),
        0xBF => RawKey::Char('/'),
        0xC0 => RawKey::Char('`'),
        0xDB => RawKey::Char('['),
        0xDC => RawKey::Char('\\'),
        0xDD => RawKey::Char(']'),
        0xDE => RawKey::Char('\''),
        _ => RawKey::Unmapped,
    }
}

/// Check whether a low-level keyboard hook can be installed.
///
/// Low-level hooks generally work without an explicit grant; installing a
/// temporary hook verifies it.
pub fn check_permission() -> bool {
    unsafe {
        match SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), None, 0) {
            Ok(hook) => {
                let _ = UnhookWindowsHookEx(hook);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_creation() {
        let source = WindowsSource::new();
        assert!(!source.is_subscribed());
    }

    #[test]
    fn test_vk_mapping() {
        assert_eq!(key_from_vk(0x41), RawKey::Char('a'));
        assert_eq!(key_from_vk(0x39), RawKey::Char('9'));
        assert_eq!(key_from_vk(0x08), RawKey::Backspace);
        assert_eq!(key_from_vk(0x70), RawKey::Unmapped);
    }
}
