//! Logging setup, powered by tracing-subscriber.
//!
//! The TUI owns the terminal, so in that mode events go to a log file; text and JSON
//! modes log to stderr.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

/// Default log file for TUI sessions.
pub fn default_log_file() -> PathBuf {
    crate::config::app_data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("monitor.log")
}

fn build_env_filter(level: &str) -> Result<EnvFilter> {
    // RUST_LOG wins; otherwise our level plus quiet HTTP internals.
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = format!("{level},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn");
    EnvFilter::try_new(&directives)
        .with_context(|| format!("invalid log filter '{directives}'"))
}

pub fn init_logging(level: &str, target: LogTarget) -> Result<()> {
    let filter = build_env_filter(level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match target {
        LogTarget::Stderr => builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install logger: {e}")),
        LogTarget::File(path) => {
            let file = open_log_file(&path)?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
        }
    }
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}
