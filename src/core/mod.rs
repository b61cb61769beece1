//! Core capture pipeline for the typing rhythm recorder.
//!
//! This module contains:
//! - The keystroke event record and key label vocabulary
//! - Normalization of raw key notifications into events
//! - The bounded session buffer
//! - The background flush task

pub mod buffer;
pub mod event;
pub mod flush;
pub mod normalizer;

// Re-export commonly used types
pub use buffer::{AppendOutcome, SessionBuffer};
pub use event::{KeyLabel, KeystrokeEvent, LabelPolicy, Punctuation, UnknownLabel};
pub use flush::{FlushNudger, FlushScheduler, Flusher, ShutdownOutcome};
pub use normalizer::Normalizer;
