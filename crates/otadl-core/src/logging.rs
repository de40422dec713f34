//! Tracing setup for the `otadl` binary: an append-only log file under the
//! XDG state directory, or stderr when that cannot be opened.
//!
//! The filter comes from `OTADL_LOG`, then `RUST_LOG`, then [`DEFAULT_FILTER`].

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "OTADL_LOG";
pub const DEFAULT_FILTER: &str = "info,otadl=debug,otadl_core=debug";

/// `otadl.log` in the otadl state directory, created if missing.
pub fn default_log_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("otadl")?;
    xdg_dirs
        .place_state_file("otadl.log")
        .context("failed to create log directory")
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Log to [`default_log_path`]. Returns the file in use.
pub fn init_logging() -> Result<PathBuf> {
    let path = default_log_path()?;
    init_logging_at(&path)?;
    Ok(path)
}

/// Append structured logs to `path`. Fails when the file cannot be opened
/// or a global subscriber is already installed.
pub fn init_logging_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(
        path = %path.display(),
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "otadl logging initialized"
    );
    Ok(())
}

/// Stderr-only logging, for when [`init_logging`] fails.
pub fn init_logging_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_logging_creates_parents_and_installs_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("otadl.log");
        init_logging_at(&path).unwrap();
        tracing::info!(artifact = "fw-1", run_id = 3, "after init");

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("otadl logging initialized"), "{text}");
        assert!(text.contains(env!("CARGO_PKG_VERSION")));
        assert!(text.contains("run_id=3"), "{text}");

        let again = dir.path().join("second.log");
        assert!(init_logging_at(&again).is_err());
    }
}
