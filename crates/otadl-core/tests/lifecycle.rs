//! Integration tests: the engine against a local range server, end to end
//! through download, verification, pause/resume, retry and delete.

mod common;

use std::path::Path;
use std::time::Duration;

use common::range_server::{self, RangeServer, RangeServerOptions};
use otadl_core::config::{OtaConfig, RetryConfig};
use otadl_core::jobs::{JobState, DOWNLOAD_JOB_KEY, VERIFY_JOB_KEY};
use otadl_core::state_db::StateDb;
use otadl_core::{ArtifactDescriptor, DownloadFailure, DownloadStatus, Engine, EngineError, StatusUpdate};
use sha2::{Digest, Sha256};
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(15);

fn body(len: usize) -> Vec<u8> {
    (0u8..=250).cycle().take(len).collect()
}

fn digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn config(dir: &Path, chunk: usize) -> OtaConfig {
    OtaConfig {
        chunk_size_bytes: chunk,
        progress_interval_ms: 0,
        progress_min_bytes: 1,
        temp_dir: Some(dir.join("partial")),
        download_dir: Some(dir.join("downloads")),
        retry: Some(RetryConfig {
            max_attempts: 1,
            min_backoff_secs: 0.05,
            backoff_step_secs: 0.05,
            max_backoff_secs: 0.1,
        }),
        ..OtaConfig::default()
    }
}

async fn open_engine(dir: &Path, chunk: usize) -> (Engine, StateDb) {
    let db = StateDb::open_at(dir.join("state.db")).await.unwrap();
    let engine = Engine::with_db(config(dir, chunk), db.clone()).await.unwrap();
    (engine, db)
}

fn descriptor(server: &RangeServer, len: usize, checksum: String) -> ArtifactDescriptor {
    ArtifactDescriptor::new("fw-1", Some(server.url.clone()), "fw.bin", len as u64, checksum)
}

async fn wait_status(engine: &Engine, pred: impl Fn(&StatusUpdate) -> bool) -> StatusUpdate {
    let mut rx = engine.subscribe();
    let update = tokio::time::timeout(WAIT, rx.wait_for(|u| pred(u)))
        .await
        .unwrap_or_else(|_| panic!("timed out, last status {:?}", engine.status()))
        .unwrap();
    update.clone()
}

async fn wait_for(engine: &Engine, status: DownloadStatus) -> StatusUpdate {
    wait_status(engine, |u| u.status == status).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn download_then_verify_completes() {
    let data = body(1000);
    let server = range_server::start(data.clone());
    let dir = tempdir().unwrap();
    let (engine, _db) = open_engine(dir.path(), 100).await;

    engine
        .start(Some(descriptor(&server, data.len(), digest(&data))))
        .await
        .unwrap();
    wait_for(&engine, DownloadStatus::VerificationCompleted).await;

    let paths = engine.paths().unwrap();
    assert_eq!(std::fs::read(&paths.final_path).unwrap(), data);
    assert!(!paths.temp.exists());
    assert!(engine.transfer_state().await.unwrap().is_none());
    assert_eq!(engine.job(DOWNLOAD_JOB_KEY).unwrap().state, JobState::Succeeded);
    assert_eq!(engine.job(VERIFY_JOB_KEY).unwrap().state, JobState::Succeeded);
    assert_eq!(server.range_headers(), vec![None]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connection_drop_keeps_offset_and_resumes_with_range() {
    let data = body(1000);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            drop_after: Some(400),
            drop_requests: 1,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let (engine, _db) = open_engine(dir.path(), 256 * 1024).await;

    engine
        .start(Some(descriptor(&server, data.len(), digest(&data))))
        .await
        .unwrap();
    let failed = wait_for(&engine, DownloadStatus::Failed).await;
    assert_eq!(failed.failure, Some(DownloadFailure::ConnectionError));

    let state = engine.transfer_state().await.unwrap().unwrap();
    assert_eq!(state.bytes_done(), 400);
    let paths = engine.paths().unwrap();
    assert_eq!(std::fs::metadata(&paths.temp).unwrap().len(), 400);

    engine.retry().await.unwrap();
    wait_for(&engine, DownloadStatus::VerificationCompleted).await;
    assert_eq!(std::fs::read(&paths.final_path).unwrap(), data);
    assert_eq!(
        server.range_headers(),
        vec![None, Some("bytes=400-".to_string())]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn checksum_mismatch_fails_and_retry_starts_over() {
    let data = body(1000);
    let server = range_server::start(data.clone());
    let dir = tempdir().unwrap();
    let (engine, _db) = open_engine(dir.path(), 100).await;

    engine
        .start(Some(descriptor(&server, data.len(), "0".repeat(64))))
        .await
        .unwrap();
    let update = wait_for(&engine, DownloadStatus::VerificationFailed).await;
    assert!(update.failure.is_none());
    let paths = engine.paths().unwrap();
    assert!(paths.final_path.exists(), "file is kept after a mismatch");
    let first_verify = engine.job(VERIFY_JOB_KEY).unwrap().run_id;

    engine.retry().await.unwrap();
    wait_status(&engine, |u| {
        u.status == DownloadStatus::VerificationFailed
            && engine
                .job(VERIFY_JOB_KEY)
                .is_some_and(|v| v.run_id > first_verify)
    })
    .await;
    assert_eq!(server.range_headers(), vec![None, None]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preflight_rejections_create_no_job() {
    let dir = tempdir().unwrap();
    let (engine, _db) = open_engine(dir.path(), 100).await;

    let ftp = ArtifactDescriptor::new("fw-1", Some("ftp://x".into()), "fw.bin", 10, "0".repeat(64));
    let err = engine.start(Some(ftp)).await.unwrap_err();
    assert!(matches!(err, EngineError::Rejected(DownloadFailure::InvalidUrlScheme)));
    let update = wait_for(&engine, DownloadStatus::Failed).await;
    assert_eq!(update.failure, Some(DownloadFailure::InvalidUrlScheme));
    assert!(engine.job(DOWNLOAD_JOB_KEY).is_none());
    assert!(matches!(
        engine.retry().await.unwrap_err(),
        EngineError::NotRetryable(DownloadStatus::Failed)
    ));

    let err = engine.start(None).await.unwrap_err();
    assert!(matches!(err, EngineError::Rejected(DownloadFailure::NullDescriptorOrUrl)));
    wait_status(&engine, |u| u.failure == Some(DownloadFailure::NullDescriptorOrUrl)).await;

    let err = engine.start_metadata("null").await.unwrap_err();
    assert!(matches!(err, EngineError::Rejected(DownloadFailure::NullDescriptorOrUrl)));
    assert!(engine.job(DOWNLOAD_JOB_KEY).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn http_errors_are_classified() {
    for (code, expected) in [
        (500, DownloadFailure::ServerError),
        (404, DownloadFailure::UnsuccessfulHttpResponse),
    ] {
        let server = range_server::start_with_options(
            body(10),
            RangeServerOptions {
                status_override: Some(code),
                ..RangeServerOptions::default()
            },
        );
        let dir = tempdir().unwrap();
        let (engine, _db) = open_engine(dir.path(), 100).await;
        engine
            .start(Some(descriptor(&server, 10, "0".repeat(64))))
            .await
            .unwrap();
        let update = wait_for(&engine, DownloadStatus::Failed).await;
        assert_eq!(update.failure, Some(expected));
        let output = engine.job(DOWNLOAD_JOB_KEY).unwrap().output.unwrap();
        assert_eq!(output.http_code, Some(code as u32));
        assert_eq!(output.filename.as_deref(), Some("fw.bin"));
        assert!(output.url.is_some());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_errors_are_retried_with_backoff() {
    let server = range_server::start_with_options(
        body(10),
        RangeServerOptions {
            status_override: Some(503),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let db = StateDb::open_at(dir.path().join("state.db")).await.unwrap();
    let mut cfg = config(dir.path(), 100);
    cfg.retry = Some(RetryConfig {
        max_attempts: 3,
        min_backoff_secs: 0.05,
        backoff_step_secs: 0.05,
        max_backoff_secs: 0.1,
    });
    let engine = Engine::with_db(cfg, db).await.unwrap();
    engine
        .start(Some(descriptor(&server, 10, "0".repeat(64))))
        .await
        .unwrap();
    let update = wait_for(&engine, DownloadStatus::Failed).await;
    assert_eq!(update.failure, Some(DownloadFailure::ServerError));
    assert_eq!(server.request_count(), 3);
}

fn slow_server(data: Vec<u8>) -> RangeServer {
    range_server::start_with_options(
        data,
        RangeServerOptions {
            write_chunk: 1024,
            chunk_delay: Some(Duration::from_millis(20)),
            ..RangeServerOptions::default()
        },
    )
}

async fn pause_mid_transfer(engine: &Engine) -> u64 {
    wait_status(engine, |u| {
        u.status == DownloadStatus::Downloading
            && u.progress.as_ref().is_some_and(|p| p.bytes_done >= 4096)
    })
    .await;
    engine.pause().await.unwrap();
    wait_for(engine, DownloadStatus::Paused).await;
    engine.transfer_state().await.unwrap().unwrap().bytes_done()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_preserves_offset_and_resume_continues() {
    let data = body(64 * 1024);
    let server = slow_server(data.clone());
    let dir = tempdir().unwrap();
    let (engine, _db) = open_engine(dir.path(), 1024).await;

    engine
        .start(Some(descriptor(&server, data.len(), digest(&data))))
        .await
        .unwrap();
    let paused_at = pause_mid_transfer(&engine).await;
    assert!(paused_at > 0 && paused_at < data.len() as u64);
    let paths = engine.paths().unwrap();
    assert_eq!(std::fs::metadata(&paths.temp).unwrap().len(), paused_at);

    engine.resume().await.unwrap();
    wait_for(&engine, DownloadStatus::VerificationCompleted).await;
    assert_eq!(std::fs::read(&paths.final_path).unwrap(), data);
    assert_eq!(
        server.range_headers(),
        vec![None, Some(format!("bytes={paused_at}-"))]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_clears_state_and_files() {
    let data = body(64 * 1024);
    let server = slow_server(data.clone());
    let dir = tempdir().unwrap();
    let (engine, db) = open_engine(dir.path(), 1024).await;

    engine
        .start(Some(descriptor(&server, data.len(), digest(&data))))
        .await
        .unwrap();
    pause_mid_transfer(&engine).await;
    let paths = engine.paths().unwrap();

    engine.delete().await.unwrap();
    wait_for(&engine, DownloadStatus::NotDownloading).await;
    assert!(db.load_transfer("fw-1").await.unwrap().is_none());
    assert!(!paths.temp.exists());
    assert!(!paths.final_path.exists());
    assert!(engine.job(DOWNLOAD_JOB_KEY).is_none());
    assert!(db.get_job(DOWNLOAD_JOB_KEY).await.unwrap().is_none());
    assert!(matches!(engine.resume().await, Err(EngineError::NoArtifact)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn paused_download_survives_restart() {
    let data = body(64 * 1024);
    let server = slow_server(data.clone());
    let dir = tempdir().unwrap();

    let paused_at = {
        let (engine, _db) = open_engine(dir.path(), 1024).await;
        engine
            .start(Some(descriptor(&server, data.len(), digest(&data))))
            .await
            .unwrap();
        pause_mid_transfer(&engine).await
    };

    let (engine, _db) = open_engine(dir.path(), 1024).await;
    let recovered = engine.recover(false).await.unwrap().unwrap();
    assert_eq!(recovered.id(), "fw-1");
    wait_for(&engine, DownloadStatus::Paused).await;
    assert_eq!(
        engine.transfer_state().await.unwrap().unwrap().bytes_done(),
        paused_at
    );

    engine.resume().await.unwrap();
    wait_for(&engine, DownloadStatus::VerificationCompleted).await;
    assert_eq!(std::fs::read(engine.paths().unwrap().final_path).unwrap(), data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resume_after_verification_is_rejected() {
    let data = body(1000);
    let server = range_server::start(data.clone());
    let dir = tempdir().unwrap();
    let (engine, _db) = open_engine(dir.path(), 100).await;

    engine
        .start(Some(descriptor(&server, data.len(), digest(&data))))
        .await
        .unwrap();
    wait_for(&engine, DownloadStatus::VerificationCompleted).await;
    let verify_run = engine.job(VERIFY_JOB_KEY).unwrap().run_id;

    let err = engine.resume().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotResumable(DownloadStatus::VerificationCompleted)
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.status().status, DownloadStatus::VerificationCompleted);
    assert_eq!(engine.job(VERIFY_JOB_KEY).unwrap().run_id, verify_run);
    assert_eq!(engine.job(DOWNLOAD_JOB_KEY).unwrap().state, JobState::Succeeded);
    assert_eq!(server.range_headers(), vec![None]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resume_after_failure_is_rejected() {
    let server = range_server::start_with_options(
        body(10),
        RangeServerOptions {
            status_override: Some(404),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let (engine, _db) = open_engine(dir.path(), 100).await;
    engine
        .start(Some(descriptor(&server, 10, "0".repeat(64))))
        .await
        .unwrap();
    wait_for(&engine, DownloadStatus::Failed).await;

    assert!(matches!(
        engine.resume().await.unwrap_err(),
        EngineError::NotResumable(DownloadStatus::Failed)
    ));
    assert_eq!(server.request_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn published_progress_never_decreases() {
    let data = body(64 * 1024);
    let server = slow_server(data.clone());
    let dir = tempdir().unwrap();
    let (engine, _db) = open_engine(dir.path(), 1024).await;

    let mut rx = engine.subscribe();
    let collector = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let update = rx.borrow_and_update().clone();
            let done = update.status == DownloadStatus::VerificationCompleted;
            seen.push(update);
            if done {
                break;
            }
        }
        seen
    });
    engine
        .start(Some(descriptor(&server, data.len(), digest(&data))))
        .await
        .unwrap();
    let seen = tokio::time::timeout(WAIT, collector).await.unwrap().unwrap();
    assert_eq!(seen.last().map(|u| u.status), Some(DownloadStatus::VerificationCompleted));

    let ticks: Vec<_> = seen.iter().filter_map(|u| u.progress.clone()).collect();
    assert!(ticks.len() > 1, "expected several progress ticks, got {}", ticks.len());
    for pair in ticks.windows(2) {
        assert!(pair[0].bytes_done <= pair[1].bytes_done, "{pair:?}");
        assert!(
            pair[0].current_progress_percent <= pair[1].current_progress_percent,
            "{pair:?}"
        );
    }
    for tick in &ticks {
        assert!(tick.current_progress_percent.is_some_and(|p| p <= 100), "{tick:?}");
        assert_eq!(tick.total_bytes, data.len() as u64);
    }

    // The final tick lands on the job record even when the watch skipped it.
    let last = engine.job(DOWNLOAD_JOB_KEY).unwrap().progress.unwrap();
    assert_eq!(last.bytes_done, data.len() as u64);
    assert_eq!(last.total_bytes, data.len() as u64);
    if let Some(completed) = seen.iter().find(|u| u.status == DownloadStatus::Completed) {
        assert_eq!(completed.progress.as_ref().and_then(|p| p.current_progress_percent), Some(100));
    }
}
