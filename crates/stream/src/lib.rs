//! Stream log
//!
//! Append-only logs with consumer groups, modelled on Redis streams.
//!
//! # Features
//!
//! - **Append with retention**: entries get monotonically increasing ids and
//!   the stream is trimmed to a maximum length on every append
//! - **Consumer groups**: a shared delivery cursor per group, each entry
//!   delivered to exactly one consumer of the group
//! - **Pending entries**: delivered-but-unacknowledged entries are tracked per
//!   consumer with delivery count and idle time
//! - **Claims**: idle pending entries can be reassigned to another consumer
//! - **Blocking reads**: wait for new entries with an optional timeout
//!
//! Two implementations of [`StreamLog`] are provided:
//!
//! - [`RedisStreamLog`] talks to a Redis server
//! - [`MemoryStreamLog`] keeps everything in process, for demos and tests
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use workstream_log::{MemoryStreamLog, StreamId, StreamLog};
//!
//! #[tokio::main]
//! async fn main() -> workstream_log::Result<()> {
//!     let log = MemoryStreamLog::new();
//!
//!     log.create_group("jobs", "workers", StreamId::ZERO).await?;
//!     log.append("jobs", &[("msg", "hello")], 1000).await?;
//!
//!     let entries = log
//!         .read_new("jobs", "workers", "consumer-1", 1, Some(Duration::from_secs(1)))
//!         .await?;
//!     for entry in &entries {
//!         log.ack("jobs", "workers", &[entry.id]).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod log;
pub mod redis_log;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use error::{LogError, Result};
pub use log::StreamLog;
pub use redis_log::RedisStreamLog;
pub use store::{AppendNotification, MemoryStreamLog};
pub use types::{Entry, GroupInfo, PendingEntry, StreamId};
