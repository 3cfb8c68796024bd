//! Resilience patterns for fault-tolerant pipelines
//!
//! Retries around datasource fetches and processor units, with delays that
//! give way to cancellation.

pub mod retry;

pub use retry::{retry_with_cancel, RetryPolicy};
