//! Utility functions shared by every ingestion path.
//!
//! - **Code extraction**: the canonical `ABC-123` identifier parsed from the
//!   leading token of a title. The catalog synchronizer, the ranking loader and
//!   the feed poller all key their data on it.
//! - **Task helpers**: panic capture for spawned background batches.
//!
//! # Examples
//!
//! ```
//! use curator::util::extract_code;
//!
//! assert_eq!(extract_code("ABC-123 Some Title"), Some("ABC-123"));
//! assert_eq!(extract_code("no code here"), None);
//! ```

mod code;
mod task;

pub use code::extract_code;
pub use task::catch_task_panic;

/// Current unix timestamp in seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
