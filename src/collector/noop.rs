//! Fallback key source for targets without a native hook.
//!
//! This exists so the crate (and binary) can compile on targets other than
//! macOS and Windows without pulling in platform dependencies. It accepts a
//! subscription but never delivers notifications.

use crate::collector::types::{CollectorError, KeyHandler};
use crate::collector::KeySource;

/// Remediation shown when permission is missing. There is no gate here.
pub const PERMISSION_REMEDIATION: &str =
    "No native keyboard hook is available on this platform; no events will be captured.";

/// A source that never emits notifications.
#[derive(Default)]
pub struct NoopSource {
    handler: Option<KeyHandler>,
}

impl NoopSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeySource for NoopSource {
    fn subscribe(&mut self, handler: KeyHandler) -> Result<(), CollectorError> {
        if self.handler.is_some() {
            return Err(CollectorError::AlreadyRunning);
        }
        tracing::warn!("no native keyboard hook on this platform; recorder will stay idle");
        self.handler = Some(handler);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.handler = None;
    }

    fn is_subscribed(&self) -> bool {
        self.handler.is_some()
    }
}

/// On these platforms there is no permission gate.
pub fn check_permission() -> bool {
    true
}
