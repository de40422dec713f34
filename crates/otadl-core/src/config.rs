use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::reconcile::DownloadStatus;
use crate::retry::RetryPolicy;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per job run (including the first).
    pub max_attempts: u32,
    /// Minimum backoff delay in seconds; no retry waits less.
    pub min_backoff_secs: f64,
    /// Linear backoff step in seconds (delay = step * attempt).
    pub backoff_step_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_backoff_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_backoff_secs: 10.0,
            backoff_step_secs: 10.0,
            max_backoff_secs: 300.0,
        }
    }
}

/// Global configuration loaded from `~/.config/otadl/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    /// Bytes buffered before each flush + transfer-state write.
    pub chunk_size_bytes: usize,
    /// Minimum interval between progress ticks.
    pub progress_interval_ms: u64,
    /// A progress tick is also emitted once this many bytes arrived since the last one.
    pub progress_min_bytes: u64,
    /// Number of recent progress ticks used for the throughput/ETA estimate.
    pub eta_window: usize,
    /// Worker pool size shared by download and verify jobs.
    pub max_concurrent_jobs: usize,
    /// Connect timeout for the HTTP transfer.
    pub connect_timeout_secs: u64,
    /// Abort the transfer when below 1 KiB/s for this long (counts as a connection error).
    pub low_speed_time_secs: u64,
    /// Where finished artifacts are placed (default: XDG data dir).
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Where in-progress `.part` files live (default: XDG cache dir).
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Statuses forwarded to observers even when unchanged (they carry progress).
    #[serde(default = "default_always_forward")]
    pub always_forward: Vec<DownloadStatus>,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_always_forward() -> Vec<DownloadStatus> {
    vec![DownloadStatus::Downloading]
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 256 * 1024,
            progress_interval_ms: 500,
            progress_min_bytes: 1024 * 1024,
            eta_window: 10,
            max_concurrent_jobs: 2,
            connect_timeout_secs: 30,
            low_speed_time_secs: 60,
            download_dir: None,
            temp_dir: None,
            always_forward: default_always_forward(),
            retry: None,
        }
    }
}

impl OtaConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .as_ref()
            .map(RetryPolicy::from)
            .unwrap_or_default()
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Resolve `(temp_dir, download_dir)`, falling back to XDG locations.
    pub fn resolve_dirs(&self) -> Result<(PathBuf, PathBuf)> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("otadl")?;
        let temp = match &self.temp_dir {
            Some(p) => p.clone(),
            None => xdg_dirs.get_cache_home().join("otadl").join("partial"),
        };
        let downloads = match &self.download_dir {
            Some(p) => p.clone(),
            None => xdg_dirs.get_data_home().join("otadl").join("downloads"),
        };
        Ok((temp, downloads))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("otadl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<OtaConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = OtaConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: OtaConfig = toml::from_str(&data)?;
    Ok(cfg)
}
