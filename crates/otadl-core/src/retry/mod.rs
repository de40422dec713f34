//! Retry and backoff policy for transient job failures.
//!
//! The job scheduler consults this policy when a worker reports a transient
//! failure (connection drop, 5xx). Backoff is linear with a minimum floor;
//! classified failures that are not transient never reach it.

mod policy;

pub use policy::{RetryDecision, RetryPolicy};
