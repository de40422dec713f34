//! In-process job scheduler: replace-on-enqueue, bounded worker pool,
//! linear-backoff retry and durable job records.
//!
//! Each run is driven by one tokio task. The task waits for the run it
//! replaced to exit, takes a pool permit (reporting `Blocked` while it
//! waits), executes the worker on the blocking pool and publishes every
//! transition on the key's `watch` channel. Publishing is conditional on the
//! channel still showing this run's `run_id`, so a superseded run can never
//! overwrite its successor.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use super::types::{JobInfo, JobProgress, JobState};
use super::worker::{JobContext, ProgressSink, WorkOutcome, Worker};
use crate::control::AbortToken;
use crate::failure::FailurePayload;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::state_db::StateDb;

type InfoTx = Arc<watch::Sender<Option<JobInfo>>>;

struct ActiveRun {
    run_id: u64,
    abort: AbortToken,
    handle: Option<JoinHandle<()>>,
}

struct Slot {
    tx: InfoTx,
    active: Option<ActiveRun>,
}

impl Slot {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            active: None,
        }
    }
}

struct Inner {
    slots: Mutex<HashMap<String, Slot>>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    next_run_id: AtomicU64,
    db: Option<StateDb>,
}

/// Handle to the scheduler. Cheap to clone.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("retry", &self.inner.retry)
            .field("available_permits", &self.inner.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl JobScheduler {
    /// Scheduler without persistence.
    pub fn new(max_concurrent: usize, retry: RetryPolicy) -> Self {
        Self::build(max_concurrent, retry, None, 0)
    }

    /// Scheduler that records every transition in `db`. Run ids continue
    /// after the highest one recorded.
    pub async fn persistent(max_concurrent: usize, retry: RetryPolicy, db: StateDb) -> Result<Self> {
        let last = db.max_run_id().await?;
        Ok(Self::build(max_concurrent, retry, Some(db), last))
    }

    fn build(max_concurrent: usize, retry: RetryPolicy, db: Option<StateDb>, last_run_id: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                retry,
                next_run_id: AtomicU64::new(last_run_id),
                db,
            }),
        }
    }

    /// Observe the latest run under `key`. `None` means no job exists.
    pub fn subscribe(&self, key: &str) -> watch::Receiver<Option<JobInfo>> {
        self.inner.with_slot(key, |slot| slot.tx.subscribe())
    }

    pub fn current(&self, key: &str) -> Option<JobInfo> {
        self.inner.with_slot(key, |slot| slot.tx.borrow().clone())
    }

    /// True while the latest run under `key` has not finished.
    pub fn is_active(&self, key: &str) -> bool {
        self.current(key).is_some_and(|info| !info.state.is_finished())
    }

    /// Enqueue `worker` under `key`, replacing any existing run. `input` is
    /// stored with the job record so the run can be recreated after a
    /// restart. Returns the new run id.
    pub fn enqueue(&self, key: &str, worker: Arc<dyn Worker>, input: Option<String>) -> u64 {
        let run_id = self.inner.next_run_id.fetch_add(1, Ordering::SeqCst) + 1;
        let abort = AbortToken::new();

        let mut slots = self.inner.lock_slots();
        let slot = slots.entry(key.to_string()).or_insert_with(Slot::new);
        let previous = slot.active.take().and_then(|prev| {
            tracing::debug!(key, run_id = prev.run_id, "replacing active run");
            prev.abort.abort();
            prev.handle
        });
        slot.tx.send_replace(Some(JobInfo::new(run_id, JobState::Enqueued)));

        let run = Run {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            run_id,
            abort: abort.clone(),
            tx: Arc::clone(&slot.tx),
        };
        let handle = tokio::spawn(run.drive(worker, input, previous));
        slot.active = Some(ActiveRun {
            run_id,
            abort,
            handle: Some(handle),
        });
        tracing::info!(key, run_id, "job enqueued");
        run_id
    }

    /// Abort the active run under `key` and wait until it has finished.
    /// Returns the run's final snapshot, or `None` when no job exists.
    pub async fn cancel(&self, key: &str) -> Option<JobInfo> {
        let (mut rx, run_id) = {
            let slots = self.inner.lock_slots();
            let slot = slots.get(key)?;
            let active = slot.active.as_ref()?;
            active.abort.abort();
            (slot.tx.subscribe(), active.run_id)
        };
        tracing::debug!(key, run_id, "cancel requested");
        let done = rx
            .wait_for(|info| match info {
                Some(i) => i.run_id != run_id || i.state.is_finished(),
                None => true,
            })
            .await;
        done.ok().and_then(|info| info.clone())
    }

    /// Forget the job under `key`: observers see `None` and the durable
    /// record is removed. Callers cancel first; a still-running run is
    /// aborted and its later updates are dropped.
    pub async fn clear(&self, key: &str) {
        {
            let mut slots = self.inner.lock_slots();
            if let Some(slot) = slots.get_mut(key) {
                if let Some(active) = slot.active.take() {
                    active.abort.abort();
                }
                slot.tx.send_replace(None);
            }
        }
        if let Some(db) = &self.inner.db {
            if let Err(e) = db.remove_job(key).await {
                tracing::warn!(key, error = %e, "failed to remove job record");
            }
        }
    }

    /// Publish a recorded snapshot without running anything (recovery of a
    /// finished job after restart).
    pub fn restore(&self, key: &str, info: JobInfo) {
        self.inner.next_run_id.fetch_max(info.run_id, Ordering::SeqCst);
        let mut slots = self.inner.lock_slots();
        let slot = slots.entry(key.to_string()).or_insert_with(Slot::new);
        if let Some(active) = slot.active.take() {
            active.abort.abort();
        }
        tracing::debug!(key, run_id = info.run_id, state = info.state.as_str(), "job restored");
        slot.tx.send_replace(Some(info));
    }
}

impl Inner {
    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_slot<T>(&self, key: &str, f: impl FnOnce(&Slot) -> T) -> T {
        let mut slots = self.lock_slots();
        let slot = slots.entry(key.to_string()).or_insert_with(Slot::new);
        f(slot)
    }
}

/// One run under one key.
struct Run {
    inner: Arc<Inner>,
    key: String,
    run_id: u64,
    abort: AbortToken,
    tx: InfoTx,
}

impl Run {
    async fn drive(self, worker: Arc<dyn Worker>, input: Option<String>, previous: Option<JoinHandle<()>>) {
        self.record(JobState::Enqueued, input.as_deref(), None).await;
        if let Some(prev) = previous {
            let _ = prev.await;
        }

        let mut attempt = 1u32;
        loop {
            if self.abort.is_aborted() {
                return self.finish(JobState::Cancelled, None).await;
            }

            let permit = match Arc::clone(&self.inner.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    self.transition(JobState::Blocked).await;
                    tokio::select! {
                        permit = Arc::clone(&self.inner.permits).acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return self.finish(JobState::Failed, None).await,
                        },
                        _ = self.abort.aborted() => {
                            return self.finish(JobState::Cancelled, None).await;
                        }
                    }
                }
            };

            self.transition(JobState::Running).await;
            tracing::info!(key = %self.key, run_id = self.run_id, attempt, "job running");
            let ctx = JobContext::new(self.run_id, attempt, self.abort.clone(), self.progress_sink());
            let work = Arc::clone(&worker);
            let outcome = match tokio::task::spawn_blocking(move || work.run(&ctx)).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(key = %self.key, run_id = self.run_id, error = %e, "worker panicked");
                    WorkOutcome::Failure(None)
                }
            };
            drop(permit);

            match outcome {
                WorkOutcome::Success => return self.finish(JobState::Succeeded, None).await,
                WorkOutcome::Aborted => return self.finish(JobState::Cancelled, None).await,
                _ if self.abort.is_aborted() => {
                    return self.finish(JobState::Cancelled, None).await;
                }
                WorkOutcome::Failure(payload) => {
                    return self.finish(JobState::Failed, payload).await;
                }
                WorkOutcome::Retry(payload) => match self.inner.retry.decide(attempt) {
                    RetryDecision::NoRetry => {
                        return self.finish(JobState::Failed, Some(payload)).await;
                    }
                    RetryDecision::RetryAfter(delay) => {
                        tracing::info!(
                            key = %self.key,
                            run_id = self.run_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            failure = ?payload.failure_type,
                            "transient failure, retrying after backoff"
                        );
                        self.transition(JobState::Enqueued).await;
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.abort.aborted() => {
                                return self.finish(JobState::Cancelled, None).await;
                            }
                        }
                        attempt += 1;
                    }
                },
            }
        }
    }

    fn progress_sink(&self) -> ProgressSink {
        let tx = Arc::clone(&self.tx);
        let run_id = self.run_id;
        ProgressSink::new(move |bytes_done, total_bytes| {
            tx.send_if_modified(|cur| match cur {
                Some(info) if info.run_id == run_id && info.state == JobState::Running => {
                    info.progress = Some(JobProgress {
                        bytes_done,
                        total_bytes,
                    });
                    true
                }
                _ => false,
            });
        })
    }

    /// Apply `f` to the channel value if it still belongs to this run.
    fn publish(&self, f: impl FnOnce(&mut JobInfo)) -> bool {
        let run_id = self.run_id;
        self.tx.send_if_modified(|cur| match cur {
            Some(info) if info.run_id == run_id => {
                f(info);
                true
            }
            _ => false,
        })
    }

    async fn transition(&self, state: JobState) {
        self.record(state, None, None).await;
        self.publish(|info| {
            info.state = state;
            if state == JobState::Running {
                info.progress = None;
            }
        });
    }

    async fn finish(&self, state: JobState, output: Option<FailurePayload>) {
        self.record(state, None, output.as_ref()).await;
        let published = self.publish(|info| {
            info.state = state;
            info.output = output;
        });
        tracing::info!(
            key = %self.key,
            run_id = self.run_id,
            state = state.as_str(),
            superseded = !published,
            "job finished"
        );
    }

    async fn record(&self, state: JobState, input: Option<&str>, output: Option<&FailurePayload>) {
        let Some(db) = &self.inner.db else {
            return;
        };
        // Cleared keys stay cleared.
        if self.tx.borrow().is_none() {
            return;
        }
        if let Err(e) = db.record_job(&self.key, self.run_id, state, input, output).await {
            tracing::warn!(key = %self.key, run_id = self.run_id, error = %e, "failed to record job state");
        }
    }
}
