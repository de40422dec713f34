//! CLI command handlers. Each command is in its own file.

mod checksum;
mod delete;
mod fetch;
mod follow;
mod status;

pub use checksum::run_checksum;
pub use delete::run_delete;
pub use fetch::{run_fetch, run_resume, run_retry};
pub use status::run_status;
