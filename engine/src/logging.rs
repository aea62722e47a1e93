//! Logging setup.
//!
//! Every run logs to stderr and, when a log directory is given, to a
//! plain-text file `logs/<name>_<YYYYmmdd_HHMMSS>.log` that is kept as the
//! audit trail of the run.
//!
//! `RUST_LOG` overrides the default `info` level.

use chrono::Local;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default directory for run log files
pub const DEFAULT_LOG_DIR: &str = "logs";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Console-only logging, for commands that leave no audit trail.
pub fn init() {
    let _ = fmt()
        .with_env_filter(filter())
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

/// Console plus a per-run log file. Returns the file path.
pub fn init_with_file(dir: &Path, run_name: &str) -> io::Result<PathBuf> {
    let path = log_file_path(dir, run_name);
    fs::create_dir_all(dir)?;
    let file = File::create(&path)?;

    let console = fmt::layer().with_target(false).with_writer(io::stderr);
    let audit = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .with_writer(Mutex::new(file));

    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(console)
        .with(audit)
        .try_init();

    Ok(path)
}

/// `<dir>/<run_name>_<YYYYmmdd_HHMMSS>.log`
pub fn log_file_path(dir: &Path, run_name: &str) -> PathBuf {
    dir.join(format!("{}_{}.log", run_name, Local::now().format("%Y%m%d_%H%M%S")))
}

/// Verbose logging for tests
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
