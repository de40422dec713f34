//! Job control primitives: abort tokens for running jobs and the pause-intent
//! flag that tells a cancel-for-pause apart from a cancel-for-delete.
//!
//! A running worker polls its [`AbortToken`] from the transfer callbacks and
//! stops; async code (backoff sleeps, pool waits) can await it instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared abort signal for one job run. Cheap to clone.
#[derive(Clone, Default)]
pub struct AbortToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl std::fmt::Debug for AbortToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortToken")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request abort. Idempotent.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`abort`](Self::abort) has been called.
    pub async fn aborted(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

/// Out-of-band intent attached to the next download cancel: `true` means the
/// cancel is a pause, `false` a delete. Consumed once when the resulting
/// `Cancelled` state is observed.
#[derive(Debug, Default)]
pub struct PauseIntent {
    flag: AtomicBool,
}

impl PauseIntent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record intent immediately before cancelling.
    pub fn set(&self, cancel_means_pause: bool) {
        self.flag.store(cancel_means_pause, Ordering::SeqCst);
    }

    /// Read and reset the intent.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }
}
