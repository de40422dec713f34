//! Failure taxonomy and classification of low-level transfer errors.
//!
//! Every error is classified where it happens and travels through the job
//! system as a structured [`FailurePayload`], so the status reconciler never
//! has to look at raw curl or io errors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of download failures surfaced with `DownloadStatus::Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadFailure {
    NullDescriptorOrUrl,
    InvalidUrlScheme,
    ServerError,
    ConnectionError,
    UnsuccessfulHttpResponse,
    CouldNotMoveTempFile,
    Unknown,
}

/// What the user-facing retry affordance should do for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Continue from the persisted offset.
    Resume,
    /// Discard partial data and download from zero.
    Restart,
    /// Nothing to retry; a new descriptor is needed.
    None,
}

impl DownloadFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadFailure::NullDescriptorOrUrl => "null_descriptor_or_url",
            DownloadFailure::InvalidUrlScheme => "invalid_url_scheme",
            DownloadFailure::ServerError => "server_error",
            DownloadFailure::ConnectionError => "connection_error",
            DownloadFailure::UnsuccessfulHttpResponse => "unsuccessful_http_response",
            DownloadFailure::CouldNotMoveTempFile => "could_not_move_temp_file",
            DownloadFailure::Unknown => "unknown",
        }
    }

    /// Rejected before any job exists.
    pub fn is_preflight(self) -> bool {
        matches!(
            self,
            DownloadFailure::NullDescriptorOrUrl | DownloadFailure::InvalidUrlScheme
        )
    }

    /// Eligible for scheduler-driven backoff retry.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            DownloadFailure::ConnectionError | DownloadFailure::ServerError
        )
    }

    pub fn retry_action(self) -> RetryAction {
        match self {
            DownloadFailure::ConnectionError
            | DownloadFailure::ServerError
            | DownloadFailure::CouldNotMoveTempFile => RetryAction::Resume,
            DownloadFailure::UnsuccessfulHttpResponse | DownloadFailure::Unknown => {
                RetryAction::Restart
            }
            DownloadFailure::NullDescriptorOrUrl | DownloadFailure::InvalidUrlScheme => {
                RetryAction::None
            }
        }
    }
}

impl fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured output attached to a failed job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<DownloadFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_code: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_message: Option<String>,
}

impl FailurePayload {
    pub fn typed(failure: DownloadFailure) -> Self {
        Self {
            failure_type: Some(failure),
            ..Self::default()
        }
    }
}

/// Error from one run of the resumable downloader.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("descriptor rejected: {0}")]
    Preflight(DownloadFailure),
    #[error("transfer failed: {0}")]
    Curl(#[from] curl::Error),
    #[error("HTTP {code} {message}")]
    Http { code: u32, message: String },
    #[error("body ended early: expected {expected} bytes, have {received}")]
    ShortBody { expected: u64, received: u64 },
    #[error("partial content starts at byte {received}, requested {requested}")]
    RangeMismatch { requested: u64, received: u64 },
    #[error("body overruns the artifact: expected {expected} bytes, got {received}")]
    Overrun { expected: u64, received: u64 },
    #[error("storage: {0}")]
    Storage(#[source] std::io::Error),
    #[error("could not move temp file into place: {0}")]
    MoveTempFile(#[source] std::io::Error),
    #[error("transfer state: {0:#}")]
    State(anyhow::Error),
    #[error("aborted")]
    Aborted,
}

impl TransferError {
    pub fn is_abort(&self) -> bool {
        matches!(self, TransferError::Aborted)
    }

    pub fn http_code(&self) -> Option<u32> {
        match self {
            TransferError::Http { code, .. } => Some(*code),
            TransferError::RangeMismatch { .. } => Some(206),
            _ => None,
        }
    }

    pub fn classify(&self) -> DownloadFailure {
        match self {
            TransferError::Preflight(f) => *f,
            TransferError::Curl(e) => classify_curl_error(e),
            TransferError::Http { code, .. } => {
                classify_http_status(*code).unwrap_or(DownloadFailure::Unknown)
            }
            TransferError::ShortBody { .. } => DownloadFailure::ConnectionError,
            TransferError::RangeMismatch { .. } | TransferError::Overrun { .. } => {
                DownloadFailure::UnsuccessfulHttpResponse
            }
            TransferError::MoveTempFile(_) => DownloadFailure::CouldNotMoveTempFile,
            TransferError::Storage(_) | TransferError::State(_) | TransferError::Aborted => {
                DownloadFailure::Unknown
            }
        }
    }
}

/// Classify an HTTP status. `None` for 2xx.
pub fn classify_http_status(code: u32) -> Option<DownloadFailure> {
    match code {
        200..=299 => None,
        500..=599 => Some(DownloadFailure::ServerError),
        _ => Some(DownloadFailure::UnsuccessfulHttpResponse),
    }
}

/// Classify a curl error. Anything that looks like the connection could not
/// be made or went away mid-body is a `ConnectionError`.
pub fn classify_curl_error(e: &curl::Error) -> DownloadFailure {
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_operation_timedout()
        || e.is_partial_file()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_ssl_connect_error()
    {
        return DownloadFailure::ConnectionError;
    }
    DownloadFailure::Unknown
}
