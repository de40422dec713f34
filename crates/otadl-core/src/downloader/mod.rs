//! Resumable single-stream HTTP downloader.
//!
//! One GET per attempt, optionally ranged from the persisted offset. The
//! body is appended to `<filename>.part` in fixed-size chunks; after every
//! flushed chunk the offset is persisted through an [`OffsetStore`] and a
//! throttled progress tick is published. A finished file is renamed into
//! the downloads directory.

mod offsets;
mod transfer;
mod worker;

pub use offsets::{DbOffsetStore, MemoryOffsetStore, OffsetStore};
pub use transfer::{download_artifact, TransferOptions};
pub use worker::DownloadWorker;
