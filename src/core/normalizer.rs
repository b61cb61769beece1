//! Turns raw key notifications into [`KeystrokeEvent`]s.
//!
//! The only state carried between notifications is the previous timestamp.
//! No key identity is remembered, so consecutive events cannot be joined
//! into text here.

use crate::collector::types::{KeyNotification, RawKey};
use crate::core::event::{KeyLabel, KeystrokeEvent, LabelPolicy};
use chrono::{NaiveDateTime, SubsecRound};

/// Stateful converter for one capture session.
#[derive(Debug, Clone)]
pub struct Normalizer {
    policy: LabelPolicy,
    previous: Option<NaiveDateTime>,
}

impl Normalizer {
    pub fn new(policy: LabelPolicy) -> Self {
        Self {
            policy,
            previous: None,
        }
    }

    /// Produce exactly one event for a notification.
    ///
    /// Works on local wall-clock time, which is what the log stores.
    /// Timestamps are truncated to whole milliseconds. A wall clock that
    /// steps backwards (a manual change or the end of daylight saving time)
    /// is clamped to the previous timestamp, so the interval is 0 and the
    /// stored stream never runs backwards.
    pub fn normalize(&mut self, notification: &KeyNotification) -> KeystrokeEvent {
        self.normalize_local(notification.key, notification.at.naive_local())
    }

    /// Same as [`Normalizer::normalize`], for a local wall-clock time.
    pub(crate) fn normalize_local(&mut self, key: RawKey, at: NaiveDateTime) -> KeystrokeEvent {
        let mut at = at.trunc_subsecs(3);
        let interval_ms = match self.previous {
            Some(previous) => {
                if at < previous {
                    at = previous;
                }
                Some((at - previous).num_milliseconds() as u64)
            }
            None => None,
        };
        self.previous = Some(at);

        let label = KeyLabel::from_raw(key, self.policy);
        KeystrokeEvent::new(at, label, interval_ms)
    }

    /// Start a new session: the next event gets the sentinel interval.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn policy(&self) -> LabelPolicy {
        self.policy
    }
}
