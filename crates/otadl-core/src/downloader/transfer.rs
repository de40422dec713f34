//! One transfer attempt: resume decision, curl GET, chunked write, finalize.

use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

use super::offsets::OffsetStore;
use crate::artifact::ArtifactDescriptor;
use crate::config::OtaConfig;
use crate::failure::TransferError;
use crate::jobs::JobContext;
use crate::progress::ProgressThrottle;
use crate::state_db::TransferState;
use crate::storage::{self, ArtifactPaths, ChunkWriter};

/// Transfer tuning taken from [`OtaConfig`].
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub chunk_size: usize,
    pub progress_interval: Duration,
    pub progress_min_bytes: u64,
    pub connect_timeout: Duration,
    pub low_speed_time: Duration,
}

impl From<&OtaConfig> for TransferOptions {
    fn from(cfg: &OtaConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size_bytes.max(1),
            progress_interval: cfg.progress_interval(),
            progress_min_bytes: cfg.progress_min_bytes,
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            low_speed_time: Duration::from_secs(cfg.low_speed_time_secs),
        }
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::from(&OtaConfig::default())
    }
}

/// Status line and length headers of the response currently being received.
/// Reset on every status line so redirect hops do not leak through.
#[derive(Debug, Default)]
struct ResponseHead {
    code: u32,
    reason: String,
    content_length: Option<u64>,
    /// `a` and `total` from `Content-Range: bytes a-b/total`.
    range_start: Option<u64>,
    range_total: Option<u64>,
}

impl ResponseHead {
    fn parse_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("HTTP/") {
            let mut parts = rest.splitn(3, ' ');
            let _version = parts.next();
            *self = ResponseHead {
                code: parts.next().and_then(|c| c.parse().ok()).unwrap_or(0),
                reason: parts.next().unwrap_or("").trim().to_string(),
                ..ResponseHead::default()
            };
            return;
        }
        let Some((name, value)) = line.split_once(':') else {
            return;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            self.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("content-range") {
            let (span, total) = value.rsplit_once('/').unwrap_or((value, ""));
            self.range_total = total.trim().parse().ok();
            self.range_start = span
                .trim()
                .strip_prefix("bytes")
                .and_then(|r| r.trim().split_once('-'))
                .and_then(|(start, _)| start.trim().parse().ok());
        }
    }

    fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Full artifact length implied by this response, given the offset the
    /// body is written from.
    fn total_from(&self, offset: u64) -> Option<u64> {
        match self.code {
            206 => self
                .range_total
                .or_else(|| self.content_length.map(|len| offset + len)),
            _ => self.content_length,
        }
    }
}

/// Download `descriptor` into `paths`, resuming from the stored offset when
/// the partial file agrees with it. Returns the final artifact length.
///
/// On every exit after the body started, whatever was received is flushed
/// and its length persisted, so a later attempt resumes from there.
pub fn download_artifact(
    descriptor: &ArtifactDescriptor,
    paths: &ArtifactPaths,
    store: &dyn OffsetStore,
    opts: &TransferOptions,
    ctx: &JobContext,
) -> Result<u64, TransferError> {
    let url = descriptor.validate().map_err(TransferError::Preflight)?;
    let id = descriptor.id();
    let size_hint = descriptor.size_bytes();

    let stored = store.load(id).map_err(TransferError::State)?;
    let on_disk = storage::file_len(&paths.temp).map_err(TransferError::Storage)?;
    let offset = match stored {
        Some(st)
            if st.bytes_done() > 0
                && st.bytes_done() == on_disk
                && (size_hint == 0 || st.bytes_done() <= size_hint) =>
        {
            st.bytes_done()
        }
        _ => 0,
    };
    if offset == 0 && (on_disk > 0 || stored.is_some()) {
        tracing::info!(
            artifact = id,
            stored = ?stored.map(|s| s.bytes_done()),
            on_disk,
            "partial file does not match stored offset, starting over"
        );
        storage::remove_if_exists(&paths.temp).map_err(TransferError::Storage)?;
        store.clear(id).map_err(TransferError::State)?;
    }

    if size_hint > 0 && offset == size_hint {
        tracing::info!(artifact = id, bytes = offset, "partial file already complete");
        return complete(descriptor, paths, store, ctx, offset);
    }

    let writer = ChunkWriter::open(&paths.temp, offset, opts.chunk_size)
        .map_err(TransferError::Storage)?;

    let mut easy = curl::easy::Easy::new();
    easy.url(url.as_str())?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(opts.connect_timeout)?;
    // Below 1 KiB/s for `low_speed_time` counts as a dropped connection.
    easy.low_speed_limit(1024)?;
    easy.low_speed_time(opts.low_speed_time)?;
    easy.progress(true)?;
    if offset > 0 {
        easy.range(&format!("{offset}-"))?;
        tracing::info!(artifact = id, offset, "resuming transfer");
    } else {
        tracing::info!(artifact = id, url = %url, "starting transfer");
    }

    let head = RefCell::new(ResponseHead::default());
    let writer = RefCell::new(writer);
    let body_started = Cell::new(false);
    let total = Cell::new(size_hint);
    let stashed: RefCell<Option<TransferError>> = RefCell::new(None);
    let throttle = RefCell::new(ProgressThrottle::new(
        opts.progress_interval,
        opts.progress_min_bytes,
    ));
    let abort = ctx.abort_token();

    let performed = {
        let mut transfer = easy.transfer();
        transfer.header_function(|line| {
            head.borrow_mut().parse_line(line);
            true
        })?;
        transfer.write_function(|data| {
            if abort.is_aborted() {
                return Ok(0);
            }
            let head = head.borrow();
            if !head.is_success() {
                // Error bodies are drained, never written.
                return Ok(data.len());
            }
            let mut writer = writer.borrow_mut();
            if !body_started.replace(true) {
                if head.code == 200 && !writer.is_empty() {
                    tracing::info!(artifact = id, "server ignored range request, restarting at zero");
                    if let Err(e) = writer.restart() {
                        *stashed.borrow_mut() = Some(TransferError::Storage(e));
                        return Ok(0);
                    }
                }
                if head.code == 206 {
                    let requested = writer.len();
                    if let Some(start) = head.range_start.filter(|&s| s != requested) {
                        *stashed.borrow_mut() = Some(TransferError::RangeMismatch {
                            requested,
                            received: start,
                        });
                        return Ok(0);
                    }
                }
                if let Some(t) = head.total_from(writer.len()) {
                    total.set(t);
                }
            }
            let received = writer.len() + data.len() as u64;
            if total.get() > 0 && received > total.get() {
                *stashed.borrow_mut() = Some(TransferError::Overrun {
                    expected: total.get(),
                    received,
                });
                return Ok(0);
            }
            match writer.push(data) {
                Ok(Some(flushed)) => {
                    let state = TransferState::new(flushed, total.get());
                    if let Err(e) = store.save(id, state) {
                        *stashed.borrow_mut() = Some(TransferError::State(e));
                        return Ok(0);
                    }
                    if throttle.borrow_mut().should_emit(flushed, Instant::now()) {
                        ctx.report_progress(flushed, total.get());
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    *stashed.borrow_mut() = Some(TransferError::Storage(e));
                    return Ok(0);
                }
            }
            Ok(data.len())
        })?;
        transfer.progress_function(|_, _, _, _| !abort.is_aborted())?;
        transfer.perform()
    };

    let mut writer = writer.into_inner();
    let head = head.into_inner();
    let total = total.get();

    let early_exit = if let Some(e) = stashed.into_inner() {
        Some(e)
    } else if abort.is_aborted() {
        Some(TransferError::Aborted)
    } else {
        performed.err().map(TransferError::from)
    };
    if let Some(err) = early_exit {
        // Keep what arrived so the next attempt resumes from it.
        if body_started.get() {
            if let Ok(flushed) = writer.flush_chunk() {
                if let Err(e) = store.save(id, TransferState::new(flushed, total)) {
                    tracing::warn!(artifact = id, error = %e, "failed to persist offset");
                }
                tracing::info!(artifact = id, bytes_done = flushed, error = %err, "transfer interrupted");
            }
        }
        return Err(err);
    }

    if !head.is_success() {
        return Err(TransferError::Http {
            code: head.code,
            message: head.reason,
        });
    }

    let done = writer.finish().map_err(TransferError::Storage)?;
    if total > 0 && done > total {
        return Err(TransferError::Overrun {
            expected: total,
            received: done,
        });
    }
    store
        .save(id, TransferState::new(done, total))
        .map_err(TransferError::State)?;
    if total > 0 && done < total {
        return Err(TransferError::ShortBody {
            expected: total,
            received: done,
        });
    }
    complete(descriptor, paths, store, ctx, done)
}

/// Final tick, rename into place, drop the offset.
fn complete(
    descriptor: &ArtifactDescriptor,
    paths: &ArtifactPaths,
    store: &dyn OffsetStore,
    ctx: &JobContext,
    len: u64,
) -> Result<u64, TransferError> {
    ctx.report_progress(len, len);
    storage::finalize(&paths.temp, &paths.final_path).map_err(TransferError::MoveTempFile)?;
    store
        .clear(descriptor.id())
        .map_err(TransferError::State)?;
    tracing::info!(
        artifact = descriptor.id(),
        bytes = len,
        path = %paths.final_path.display(),
        "artifact downloaded"
    );
    Ok(len)
}
