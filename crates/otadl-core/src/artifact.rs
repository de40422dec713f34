//! Artifact descriptor: what to fetch, where it lands, and how to check it.
//!
//! Descriptors are built from server-provided update metadata and are
//! read-only for the rest of the engine. Pre-flight validation happens here,
//! before any job is enqueued.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::failure::DownloadFailure;

/// Immutable description of one OTA artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    id: String,
    #[serde(default)]
    url: Option<String>,
    filename: String,
    #[serde(alias = "size", alias = "sizeBytes")]
    size_bytes: u64,
    #[serde(alias = "checksum", alias = "sha256", alias = "expectedChecksum")]
    expected_checksum: String,
}

/// Error parsing update metadata into a descriptor.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("malformed update metadata: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected checksum is not a SHA-256 hex digest: {0:?}")]
    InvalidChecksum(String),
}

impl ArtifactDescriptor {
    pub fn new(
        id: impl Into<String>,
        url: Option<String>,
        filename: impl Into<String>,
        size_bytes: u64,
        expected_checksum: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            url,
            filename: filename.into(),
            size_bytes,
            expected_checksum: expected_checksum.into(),
        }
    }

    /// Parse server metadata. A literal `null` document yields `Ok(None)`,
    /// which the engine reports as [`DownloadFailure::NullDescriptorOrUrl`].
    pub fn from_metadata_json(json: &str) -> Result<Option<Self>, DescriptorError> {
        let parsed: Option<Self> = serde_json::from_str(json)?;
        if let Some(desc) = &parsed {
            if !is_sha256_hex(&desc.expected_checksum) {
                return Err(DescriptorError::InvalidChecksum(
                    desc.expected_checksum.clone(),
                ));
            }
        }
        Ok(parsed)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn expected_checksum(&self) -> &str {
        &self.expected_checksum
    }

    /// Pre-flight check run before anything is enqueued.
    ///
    /// Absent or blank URL → `NullDescriptorOrUrl`; anything that does not
    /// parse as an `http`/`https` URL → `InvalidUrlScheme`.
    pub fn validate(&self) -> Result<Url, DownloadFailure> {
        let raw = match self.url.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => return Err(DownloadFailure::NullDescriptorOrUrl),
        };
        let url = Url::parse(raw).map_err(|_| DownloadFailure::InvalidUrlScheme)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            _ => Err(DownloadFailure::InvalidUrlScheme),
        }
    }
}

/// Validate an optional descriptor (metadata may legitimately be missing).
pub fn preflight(descriptor: Option<&ArtifactDescriptor>) -> Result<Url, DownloadFailure> {
    descriptor
        .ok_or(DownloadFailure::NullDescriptorOrUrl)?
        .validate()
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
