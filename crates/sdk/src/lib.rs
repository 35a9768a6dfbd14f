//! Workstream SDK
//!
//! This crate provides a small work queue on top of an append-only stream
//! with consumer-group semantics. Competing consumers share a group, each
//! entry is delivered to exactly one of them at a time, and entries left
//! unacknowledged by a dead consumer are reclaimed by a live one.
//!
//! # Overview
//!
//! - [`Publisher`] - Appends messages with bounded retention and reports the
//!   outstanding work of a group
//! - [`ConsumerGroupClient`] - Runs the consume loop: pending replay, new
//!   deliveries, acknowledgment and stuck-entry reclamation
//! - [`WorkSimulator`] - Cancellable CPU and I/O load used as the work done
//!   per message
//!
//! The transport is any [`StreamLog`](workstream_log::StreamLog), either a
//! Redis server or the in-process [`MemoryStreamLog`](workstream_log::MemoryStreamLog).
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use tokio_util::sync::CancellationToken;
//! use workstream_log::RedisStreamLog;
//! use workstream_sdk::{ConsumerConfig, ConsumerGroupClient, Publisher, PublisherConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = Arc::new(RedisStreamLog::connect("redis://127.0.0.1:6379").await?);
//!
//!     let publisher = Publisher::new(log.clone(), PublisherConfig::new("jobs"));
//!     publisher.publish("hello").await?;
//!
//!     let consumer = ConsumerGroupClient::new(
//!         log,
//!         ConsumerConfig::new("jobs", "workers").with_data_size_bytes(1 << 20),
//!     );
//!     consumer.init_group().await?;
//!
//!     let cancel = CancellationToken::new();
//!     consumer.run(cancel).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Delivery
//!
//! Processing is at-least-once. An entry is acknowledged only after its work
//! completes; a crash in between leaves it pending, to be replayed by the
//! same identity or reclaimed by another consumer once idle long enough.

pub mod consumer;
pub mod error;
pub mod publisher;
pub mod types;
pub mod work;

// Re-export main types at crate root
pub use consumer::ConsumerGroupClient;
pub use error::{Result, WorkError, WorkQueueError};
pub use publisher::Publisher;
pub use types::{
    ConsumerConfig, ConsumerState, Entry, GroupInfo, PendingEntry, PublisherConfig, StreamId,
    defaults,
};
pub use work::{WorkOutcome, WorkSimulator};
