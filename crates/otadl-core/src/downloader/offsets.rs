//! Where the downloader keeps its resume offset.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::runtime::Handle;

use crate::state_db::{StateDb, TransferState};

/// Blocking access to [`TransferState`], keyed by artifact id. Called from
/// the transfer callbacks, which run on a blocking thread.
pub trait OffsetStore: Send + Sync {
    fn load(&self, artifact_id: &str) -> Result<Option<TransferState>>;
    fn save(&self, artifact_id: &str, state: TransferState) -> Result<()>;
    fn clear(&self, artifact_id: &str) -> Result<()>;
}

/// [`StateDb`]-backed store. Must not be used from inside an async task;
/// the scheduler runs workers on the blocking pool.
#[derive(Debug, Clone)]
pub struct DbOffsetStore {
    db: StateDb,
    handle: Handle,
}

impl DbOffsetStore {
    pub fn new(db: StateDb, handle: Handle) -> Self {
        Self { db, handle }
    }
}

impl OffsetStore for DbOffsetStore {
    fn load(&self, artifact_id: &str) -> Result<Option<TransferState>> {
        self.handle.block_on(self.db.load_transfer(artifact_id))
    }

    fn save(&self, artifact_id: &str, state: TransferState) -> Result<()> {
        self.handle.block_on(self.db.save_transfer(artifact_id, &state))
    }

    fn clear(&self, artifact_id: &str) -> Result<()> {
        self.handle.block_on(self.db.clear_transfer(artifact_id))
    }
}

/// In-memory store (tests, one-shot tools).
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    states: Mutex<HashMap<String, TransferState>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, artifact_id: &str) -> Option<TransferState> {
        self.lock().get(artifact_id).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TransferState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OffsetStore for MemoryOffsetStore {
    fn load(&self, artifact_id: &str) -> Result<Option<TransferState>> {
        Ok(self.get(artifact_id))
    }

    fn save(&self, artifact_id: &str, state: TransferState) -> Result<()> {
        self.lock().insert(artifact_id.to_string(), state);
        Ok(())
    }

    fn clear(&self, artifact_id: &str) -> Result<()> {
        self.lock().remove(artifact_id);
        Ok(())
    }
}
