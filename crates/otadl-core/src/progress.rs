//! Progress model: percentage, ETA and human-readable byte counters.
//!
//! Raw `(bytes_done, total_bytes)` ticks come from the downloader; the
//! reconciler turns them into a [`WorkProgress`] for observers. Emission on
//! the producer side is gated by [`ProgressThrottle`].

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Derived progress for the UI; recomputed on every tick, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkProgress {
    pub bytes_done: u64,
    pub total_bytes: u64,
    /// `None` when the total is unknown (indeterminate progress).
    pub current_progress_percent: Option<u8>,
    pub eta_text: String,
    /// e.g. `1.5 MB / 10.0 MB`.
    pub bytes_text: String,
}

/// `floor(done * 100 / total)` clamped to `[0, 100]`; `None` if `total == 0`.
pub fn percent(bytes_done: u64, total_bytes: u64) -> Option<u8> {
    if total_bytes == 0 {
        return None;
    }
    let pct = (bytes_done as u128 * 100) / total_bytes as u128;
    Some(pct.min(100) as u8)
}

/// Remaining-time estimate with graduated precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    Unknown,
    Hours(u64),
    Minutes(u64),
    LessThanMinute,
    FewSeconds,
}

impl Eta {
    pub fn from_secs(secs: f64) -> Self {
        if !secs.is_finite() || secs < 0.0 {
            return Eta::Unknown;
        }
        let whole = secs as u64;
        if whole >= 3600 {
            Eta::Hours(whole / 3600)
        } else if whole >= 60 {
            Eta::Minutes(whole / 60)
        } else if secs > 10.0 {
            Eta::LessThanMinute
        } else {
            Eta::FewSeconds
        }
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eta::Unknown => f.write_str("unknown"),
            Eta::Hours(1) => f.write_str("1 hour"),
            Eta::Hours(h) => write!(f, "{h} hours"),
            Eta::Minutes(1) => f.write_str("1 minute"),
            Eta::Minutes(m) => write!(f, "{m} minutes"),
            Eta::LessThanMinute => f.write_str("less than a minute"),
            Eta::FewSeconds => f.write_str("a few seconds"),
        }
    }
}

/// Short SI byte size: `512 B`, `1.5 kB`, `12.0 MB`, `1.2 GB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["kB", "MB", "GB", "TB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = UNITS[0];
    for u in UNITS {
        value /= 1000.0;
        unit = u;
        if value < 1000.0 {
            break;
        }
    }
    format!("{value:.1} {unit}")
}

/// Throughput over the last `window` ticks.
#[derive(Debug)]
pub struct ThroughputSampler {
    window: usize,
    samples: VecDeque<(Instant, u64)>,
}

impl ThroughputSampler {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            samples: VecDeque::new(),
        }
    }

    pub fn record(&mut self, at: Instant, bytes_done: u64) {
        // A restart from a lower offset invalidates the history.
        if self.samples.back().is_some_and(|&(_, b)| bytes_done < b) {
            self.samples.clear();
        }
        self.samples.push_back((at, bytes_done));
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Bytes per second, or `None` until two distinct samples exist.
    pub fn bytes_per_sec(&self) -> Option<f64> {
        let (t0, b0) = *self.samples.front()?;
        let (t1, b1) = *self.samples.back()?;
        let secs = t1.saturating_duration_since(t0).as_secs_f64();
        if secs <= 0.0 || b1 <= b0 {
            return None;
        }
        Some((b1 - b0) as f64 / secs)
    }

    pub fn eta(&self, bytes_done: u64, total_bytes: u64) -> Eta {
        if total_bytes == 0 {
            return Eta::Unknown;
        }
        let remaining = total_bytes.saturating_sub(bytes_done);
        if remaining == 0 {
            return Eta::FewSeconds;
        }
        match self.bytes_per_sec() {
            Some(rate) => Eta::from_secs(remaining as f64 / rate),
            None => Eta::Unknown,
        }
    }
}

/// Turns raw ticks into [`WorkProgress`] values.
///
/// A tick identical to the previous one yields the cached value and adds no
/// throughput sample, so re-reading an unchanged snapshot cannot skew the ETA.
#[derive(Debug)]
pub struct ProgressModel {
    sampler: ThroughputSampler,
    last: Option<WorkProgress>,
}

impl ProgressModel {
    pub fn new(eta_window: usize) -> Self {
        Self {
            sampler: ThroughputSampler::new(eta_window),
            last: None,
        }
    }

    pub fn reset(&mut self) {
        self.sampler.reset();
        self.last = None;
    }

    pub fn update(&mut self, bytes_done: u64, total_bytes: u64, at: Instant) -> WorkProgress {
        if let Some(last) = self
            .last
            .as_ref()
            .filter(|p| p.bytes_done == bytes_done && p.total_bytes == total_bytes)
        {
            return last.clone();
        }
        self.sampler.record(at, bytes_done);
        let bytes_text = if total_bytes > 0 {
            format!("{} / {}", format_bytes(bytes_done), format_bytes(total_bytes))
        } else {
            format_bytes(bytes_done)
        };
        let progress = WorkProgress {
            bytes_done,
            total_bytes,
            current_progress_percent: percent(bytes_done, total_bytes),
            eta_text: self.sampler.eta(bytes_done, total_bytes).to_string(),
            bytes_text,
        };
        self.last = Some(progress.clone());
        progress
    }
}

/// Producer-side gate so observers are not flooded with ticks.
///
/// A tick passes when either the interval elapsed or enough bytes arrived
/// since the last emitted tick. The first tick always passes; the final
/// tick is emitted by the caller unconditionally.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    min_bytes: u64,
    last: Option<(Instant, u64)>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration, min_bytes: u64) -> Self {
        Self {
            interval,
            min_bytes,
            last: None,
        }
    }

    pub fn should_emit(&mut self, bytes_done: u64, now: Instant) -> bool {
        let pass = match self.last {
            None => true,
            Some((at, bytes)) => {
                now.saturating_duration_since(at) >= self.interval
                    || bytes_done.saturating_sub(bytes) >= self.min_bytes
            }
        };
        if pass {
            self.last = Some((now, bytes_done));
        }
        pass
    }
}
