//! SHA-256 verification of the downloaded artifact.
//!
//! The digest is streamed through a fixed buffer so memory use does not
//! depend on the artifact size. Verification runs as its own job after a
//! successful download and never modifies the file.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::failure::FailurePayload;
use crate::jobs::{JobContext, WorkOutcome, Worker};

const BUF_SIZE: usize = 64 * 1024;

/// Compute SHA-256 of a file and return the digest as lowercase hex.
pub fn sha256_path(path: &Path) -> Result<String> {
    digest_until(path, || false)?.context("digest interrupted")
}

/// Hash `path`, checking `stop` before each buffer. `Ok(None)` when stopped.
fn digest_until(path: &Path, stop: impl Fn() -> bool) -> Result<Option<String>> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        if stop() {
            return Ok(None);
        }
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Some(hex::encode(hasher.finalize())))
}

/// Outcome of comparing a file against its expected digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Match,
    Mismatch { actual: String },
}

/// Compare the digest of `path` with `expected` (hex, any case).
pub fn verify_file(path: &Path, expected: &str) -> Result<Verification> {
    let actual = sha256_path(path)?;
    Ok(compare(actual, expected))
}

fn compare(actual: String, expected: &str) -> Verification {
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Verification::Match
    } else {
        Verification::Mismatch { actual }
    }
}

/// Verify job body.
#[derive(Debug, Clone)]
pub struct VerifyWorker {
    path: PathBuf,
    expected: String,
    filename: String,
}

impl VerifyWorker {
    pub fn new(path: PathBuf, expected: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            path,
            expected: expected.into(),
            filename: filename.into(),
        }
    }

    fn failed(&self, message: String) -> WorkOutcome {
        tracing::warn!(path = %self.path.display(), %message, "verification failed");
        WorkOutcome::Failure(Some(FailurePayload {
            filename: Some(self.filename.clone()),
            http_message: Some(message),
            ..FailurePayload::default()
        }))
    }
}

impl Worker for VerifyWorker {
    fn run(&self, ctx: &JobContext) -> WorkOutcome {
        let abort = ctx.abort_token();
        match digest_until(&self.path, || abort.is_aborted()) {
            Ok(None) => WorkOutcome::Aborted,
            Ok(Some(actual)) => match compare(actual, &self.expected) {
                Verification::Match => {
                    tracing::info!(path = %self.path.display(), "checksum verified");
                    WorkOutcome::Success
                }
                Verification::Mismatch { actual } => self.failed(format!(
                    "checksum mismatch: expected {}, got {actual}",
                    self.expected.to_ascii_lowercase()
                )),
            },
            Err(e) => self.failed(format!("{e:#}")),
        }
    }
}
