//! Typing Rhythm - local keystroke timing recorder.
//!
//! This library captures the timing of key presses on one machine, keeps an
//! append-only daily log of keystroke metadata, and derives typing statistics
//! (speed, interval distribution, bursts) from that log.
//!
//! # Privacy Guarantees
//!
//! - **One key at a time**: each event carries a single key label; no
//!   sequence of keys is buffered or joined into text
//! - **Configurable coarseness**: the character-class label policy records
//!   only `letter`, `digit` or `punct` for printable keys
//! - **Local only**: logs and statistics never leave the machine
//! - **Transparency**: all collection is counted and auditable
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Typing Rhythm                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌────────────┐   ┌─────────┐   ┌─────────┐  │
//! │  │ KeySource │──▶│ Normalizer │──▶│ Buffer  │──▶│ CsvStore│  │
//! │  │ (platform)│   │ (interval) │   │ (flush) │   │ (daily) │  │
//! │  └───────────┘   └────────────┘   └─────────┘   └─────────┘  │
//! │                                                      │       │
//! │  ┌─────────────┐                             ┌───────────┐   │
//! │  │Transparency │                             │ Aggregator│   │
//! │  │    Log      │                             │ (snapshot)│   │
//! │  └─────────────┘                             └───────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use typing_rhythm::{
//!     collector::PlatformSource, storage::CsvStore, transparency::create_shared_log, Recorder,
//!     RecorderSettings,
//! };
//!
//! // Subscribing requires keyboard monitoring permission
//! let store = CsvStore::open("/tmp/typing-rhythm/raw").expect("Failed to open log dir");
//! let mut recorder = Recorder::new(
//!     PlatformSource::new(),
//!     RecorderSettings::default(),
//!     create_shared_log(),
//! );
//! recorder.start(store).expect("Failed to start recorder");
//!
//! // ... later
//! recorder.stop();
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod error;
pub mod recorder;
pub mod stats;
pub mod storage;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use collector::{CollectorError, KeyNotification, KeySource, RawKey};
pub use config::{Config, ConfigError, StatsConfig};
pub use core::{KeyLabel, KeystrokeEvent, LabelPolicy, SessionBuffer};
pub use error::{Error, Result};
pub use recorder::{Recorder, RecorderSettings};
pub use stats::{Aggregator, StatsSnapshot};
pub use storage::{CsvStore, EventStore, StoreError};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║               TYPING RHYTHM - PRIVACY DECLARATION                ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This recorder captures keystroke timing for personal stats.     ║
║                                                                  ║
║  ✓ WHAT WE RECORD:                                               ║
║    • When each key is pressed (millisecond timestamps)           ║
║    • A label for that one key (e.g. "a", "space", "backspace"),  ║
║      or only its class ("letter", "digit", "punct") under the    ║
║      character-class label policy                                ║
║    • Whether the key was a correction (backspace)                ║
║                                                                  ║
║  ✗ WHAT WE NEVER RECORD:                                         ║
║    • Key sequences, words or reconstructed text                  ║
║    • Native key codes of unmapped keys                           ║
║    • What applications you use                                   ║
║    • Any screen content                                          ║
║                                                                  ║
║  With the default exact policy each row names one key, so the    ║
║  log read in order can reveal what was typed. Choose             ║
║  "character-class" to keep only classes.                         ║
║                                                                  ║
║  All data stays on this machine. You can view collection         ║
║  statistics anytime with:                                        ║
║    typing-rhythm status                                          ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
