//! Transport interface of the append-log service.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    error::Result,
    types::{Entry, GroupInfo, PendingEntry, StreamId},
};

/// Operations the work queue needs from the append-log service.
///
/// Implementations serialize all mutations (append, claim, ack) so callers
/// can treat the stream and its pending lists as a remote transactional
/// resource. Mirrors the Redis stream commands named in each method.
#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Check the transport is reachable (PING).
    async fn ping(&self) -> Result<()>;

    /// Append an entry with an auto-assigned id, trimming the stream to at
    /// most `max_len` entries in the same operation (XADD MAXLEN = n *).
    /// Creates the stream when absent.
    async fn append(
        &self,
        stream: &str,
        fields: &[(&str, &str)],
        max_len: usize,
    ) -> Result<StreamId>;

    /// Create a consumer group positioned after `start`, creating the stream
    /// when absent (XGROUP CREATE ... MKSTREAM). Fails with
    /// [`LogError::GroupExists`](crate::LogError::GroupExists) if present.
    async fn create_group(&self, stream: &str, group: &str, start: StreamId) -> Result<()>;

    /// Deliver up to `count` never-delivered entries to `consumer`
    /// (XREADGROUP ... >). Waits for new entries for at most `block`, or
    /// indefinitely when `block` is `None`. Returns an empty list on timeout.
    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<Entry>>;

    /// Re-read up to `count` entries already pending for `consumer` with ids
    /// strictly greater than `after` (XREADGROUP ... <id>). Never blocks.
    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        after: StreamId,
        count: usize,
    ) -> Result<Vec<Entry>>;

    /// List up to `count` pending entries idle for at least `min_idle` with
    /// ids strictly greater than `after`, in id order
    /// (XPENDING ... IDLE ms (after + count). Pass [`StreamId::ZERO`] to start
    /// from the beginning and the last returned id to fetch the next page.
    async fn pending_entries(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        after: StreamId,
        count: usize,
    ) -> Result<Vec<PendingEntry>>;

    /// Number of entries pending acknowledgment in the group (XPENDING summary).
    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64>;

    /// Reassign the given entries to `consumer` when they are still idle for
    /// at least `min_idle` (XCLAIM). Returns the entries actually claimed.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[StreamId],
    ) -> Result<Vec<Entry>>;

    /// Acknowledge entries, removing them from the pending list (XACK).
    /// Returns the number of entries that were pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[StreamId]) -> Result<u64>;

    /// Number of entries currently in the stream (XLEN). Zero when absent.
    async fn len(&self, stream: &str) -> Result<u64>;

    /// Entries with id strictly greater than `after` (XRANGE stream (after +).
    async fn range_after(&self, stream: &str, after: StreamId) -> Result<Vec<Entry>>;

    /// Consumer groups defined on the stream (XINFO GROUPS).
    async fn groups(&self, stream: &str) -> Result<Vec<GroupInfo>>;
}
