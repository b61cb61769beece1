//! Typing Rhythm CLI
//!
//! Local keystroke timing recorder and typing stats.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use typing_rhythm::{
    collector::{check_permission, PlatformSource, PERMISSION_REMEDIATION},
    config::Config,
    core::{LabelPolicy, ShutdownOutcome},
    stats::{write_snapshot, Aggregator},
    storage::CsvStore,
    transparency::{create_shared_log_with_persistence, load_persisted},
    CollectorError, Recorder, RecorderSettings, PRIVACY_DECLARATION, VERSION,
};

#[derive(Parser)]
#[command(name = "typing-rhythm")]
#[command(version = VERSION)]
#[command(about = "Local keystroke timing recorder and typing stats", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start recording keystroke timing in the foreground
    Start {
        /// Data directory (defaults to the configured one)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Seconds between background flushes
        #[arg(long)]
        flush_interval: Option<u64>,

        /// Buffered events that trigger an early flush
        #[arg(long)]
        batch_size: Option<usize>,

        /// Key label policy (exact or character-class)
        #[arg(long)]
        label_policy: Option<LabelPolicy>,
    },

    /// Compute typing stats from the daily logs
    Stats {
        /// Data directory (defaults to the configured one)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Snapshot output path
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// WPM window width in minutes
        #[arg(long)]
        window_minutes: Option<u64>,

        /// Intervals below this many milliseconds count as burst typing
        #[arg(long)]
        burst_threshold_ms: Option<u64>,
    },

    /// Show current recording status
    Status,

    /// Display privacy declaration
    Privacy,

    /// Show configuration
    Config,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start {
            data_dir,
            flush_interval,
            batch_size,
            label_policy,
        } => cmd_start(data_dir, flush_interval, batch_size, label_policy),
        Commands::Stats {
            data_dir,
            output,
            window_minutes,
            burst_threshold_ms,
        } => cmd_stats(data_dir, output, window_minutes, burst_threshold_ms),
        Commands::Status => cmd_status(),
        Commands::Privacy => {
            cmd_privacy();
            Ok(())
        }
        Commands::Config => cmd_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(data_dir: Option<PathBuf>) -> Config {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config, using defaults: {e}");
        Config::default()
    });
    match data_dir {
        Some(dir) => config.with_data_path(dir),
        None => config,
    }
}

fn cmd_start(
    data_dir: Option<PathBuf>,
    flush_interval: Option<u64>,
    batch_size: Option<usize>,
    label_policy: Option<LabelPolicy>,
) -> Result<()> {
    println!("Typing Rhythm v{VERSION}");
    println!();

    if !check_permission() {
        print_remediation();
        std::process::exit(1);
    }

    let mut config = load_config(data_dir);
    if let Some(secs) = flush_interval {
        config.flush_interval = Duration::from_secs(secs.max(1));
    }
    if let Some(size) = batch_size {
        config.batch_size = size.max(1);
    }
    if let Some(policy) = label_policy {
        config.label_policy = policy;
    }
    config
        .ensure_directories()
        .context("creating data directories")?;

    let store = CsvStore::open(config.raw_log_dir()).context("opening log directory")?;
    let transparency_log = create_shared_log_with_persistence(config.transparency_path());
    let mut recorder = Recorder::new(
        PlatformSource::new(),
        RecorderSettings::from(&config),
        transparency_log.clone(),
    );

    println!("Starting recording...");
    println!("  Log directory: {:?}", config.raw_log_dir());
    println!("  Flush interval: {}s", config.flush_interval.as_secs());
    println!("  Batch size: {}", config.batch_size);
    println!("  Label policy: {:?}", config.label_policy);
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    match recorder.start(store) {
        Ok(()) => {}
        Err(CollectorError::PermissionDenied) => {
            print_remediation();
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("starting recorder"),
    }

    println!("Recording. Press Ctrl+C to stop.");

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    println!();
    println!("Stopping, flushing buffered events...");
    match recorder.stop() {
        Some(ShutdownOutcome::Completed { flushed_ok: true }) | None => {}
        Some(ShutdownOutcome::Completed { flushed_ok: false }) => {
            eprintln!("Warning: Final flush failed; the unflushed tail was lost.");
        }
        Some(ShutdownOutcome::TimedOut) => {
            eprintln!("Warning: Final flush timed out; the unflushed tail may be lost.");
        }
    }

    // Final stats
    println!();
    println!("{}", transparency_log.summary());
    Ok(())
}

fn cmd_stats(
    data_dir: Option<PathBuf>,
    output: Option<PathBuf>,
    window_minutes: Option<u64>,
    burst_threshold_ms: Option<u64>,
) -> Result<()> {
    let mut config = load_config(data_dir);
    if let Some(minutes) = window_minutes {
        config.stats.wpm_window = Duration::from_secs(minutes.max(1) * 60);
    }
    if let Some(ms) = burst_threshold_ms {
        config.stats.burst_threshold_ms = ms;
    }
    let output = output.unwrap_or_else(|| config.stats_output_path());

    let store = CsvStore::open(config.raw_log_dir()).context("opening log directory")?;
    let files = store.list_files().context("listing daily logs")?;
    if files.is_empty() {
        println!("No daily logs found in {:?}", config.raw_log_dir());
        println!("Run 'typing-rhythm start' to begin recording.");
    }

    let snapshot = Aggregator::new(config.stats.clone())
        .run(&files)
        .context("reading daily logs")?;
    write_snapshot(&snapshot, &output).context("writing snapshot")?;

    let transparency_log = create_shared_log_with_persistence(config.transparency_path());
    transparency_log.record_rows_skipped(snapshot.summary.skipped_rows as u64);
    transparency_log.record_snapshot_written();
    if let Err(e) = transparency_log.save() {
        eprintln!("Warning: Could not save transparency stats: {e}");
    }

    let summary = &snapshot.summary;
    println!("Typing Stats");
    println!("============");
    println!();
    println!("  Files read: {}", summary.files_read);
    println!("  Keystrokes: {}", summary.total_events);
    println!("  Sessions: {}", summary.total_sessions);
    println!("  Average WPM: {:.1}", summary.avg_wpm);
    println!("  Average interval: {:.1} ms", summary.avg_interval_ms);
    println!("  Median interval: {:.1} ms", summary.median_interval_ms);
    println!("  Backspace ratio: {:.3}", summary.backspace_ratio);
    println!("  Bursts: {}", summary.total_bursts);
    if summary.skipped_rows > 0 {
        println!("  Malformed rows skipped: {}", summary.skipped_rows);
    }
    println!();
    println!("Snapshot written to {output:?}");
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = load_config(None);

    println!("Typing Rhythm Status");
    println!("====================");
    println!();

    // Check permission
    let has_permission = check_permission();
    println!(
        "Keyboard Monitoring Permission: {}",
        if has_permission {
            "Granted ✓"
        } else {
            "Not Granted ✗"
        }
    );
    println!();

    println!("Configuration:");
    println!("  Data directory: {:?}", config.data_path);
    println!("  Flush interval: {}s", config.flush_interval.as_secs());
    println!("  Batch size: {}", config.batch_size);
    println!("  Label policy: {:?}", config.label_policy);
    println!();

    let raw_dir = config.raw_log_dir();
    if raw_dir.exists() {
        let files = CsvStore::open(&raw_dir)
            .and_then(|store| store.list_files())
            .context("listing daily logs")?;
        println!("Daily logs: {}", files.len());
        for path in &files {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if let Some(name) = path.file_name() {
                println!("  {} ({size} bytes)", name.to_string_lossy());
            }
        }
    } else {
        println!("Daily logs: none");
    }
    println!();

    let stats_path = config.transparency_path();
    if stats_path.exists() {
        let stats = load_persisted(&stats_path).context("reading transparency stats")?;
        println!("Cumulative Statistics:");
        println!("  Key presses captured: {}", stats.events_captured);
        println!("  Events persisted: {}", stats.events_persisted);
        println!("  Flush failures: {}", stats.flush_failures);
        println!("  Events dropped: {}", stats.events_dropped);
        println!(
            "  Malformed rows skipped (last stats run): {}",
            stats.last_rows_skipped
        );
        println!("  Last updated: {}", stats.last_updated);
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_privacy() {
    println!("{PRIVACY_DECLARATION}");
}

fn cmd_config() -> Result<()> {
    let config = load_config(None);

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("serializing configuration")?
    );
    Ok(())
}

fn print_remediation() {
    eprintln!("Error: Keyboard monitoring permission not granted.");
    eprintln!();
    eprintln!("{PERMISSION_REMEDIATION}");
}

/// Set up Ctrl+C / SIGTERM handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
