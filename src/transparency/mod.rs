//! Transparency module for the typing rhythm recorder.
//!
//! Tracks and exposes what the recorder collected, wrote and lost, so the
//! user can audit it at any time.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, load_persisted, PersistedStats,
    SharedTransparencyLog, TransparencyLog, TransparencyStats,
};
