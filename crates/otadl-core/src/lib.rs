//! OTA artifact download and verification engine.
//!
//! A requested artifact goes through two background jobs: a resumable HTTP
//! download and a SHA-256 verification. Both are uniquely keyed, durable and
//! cancellable; the [`engine::Engine`] folds their lifecycles into a single
//! [`reconcile::DownloadStatus`] stream.

pub mod artifact;
pub mod checksum;
pub mod config;
pub mod control;
pub mod downloader;
pub mod engine;
pub mod failure;
pub mod jobs;
pub mod logging;
pub mod progress;
pub mod reconcile;
pub mod retry;
pub mod state_db;
pub mod storage;

pub use artifact::ArtifactDescriptor;
pub use engine::{Engine, EngineError};
pub use failure::DownloadFailure;
pub use reconcile::{DownloadStatus, StatusUpdate};
