//! Persistent engine state (SQLite via sqlx).
//!
//! Holds the resumable transfer offset per artifact and the durable record
//! of each uniquely-keyed job, so both survive a process restart.

mod db;
mod jobs;
mod transfer;
mod types;

pub use db::StateDb;
pub use types::{JobRecord, TransferState};

#[cfg(test)]
pub(crate) use db::open_memory;
