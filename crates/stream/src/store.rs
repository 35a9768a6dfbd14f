//! In-memory stream log.
//!
//! Provides a thread-safe in-memory implementation of [`StreamLog`] with the
//! consumer-group semantics of Redis streams: a per-group delivery cursor, a
//! pending list per group with owner and idle tracking, claims and acks.
//! Blocking reads wait on append notifications.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, info};

use crate::{
    error::{LogError, Result},
    log::StreamLog,
    types::{Entry, GroupInfo, PendingEntry, StreamId},
};

/// Notification sent when new data is appended to a stream.
#[derive(Debug, Clone)]
pub struct AppendNotification {
    pub stream: String,
    pub id: StreamId,
}

#[derive(Debug)]
struct PendingState {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: StreamId,
    pending: BTreeMap<StreamId, PendingState>,
    consumers: HashSet<String>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: VecDeque<Entry>,
    last_id: StreamId,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    /// Next auto-assigned id: wall-clock milliseconds, bumping the sequence
    /// when the clock has not moved past the last id.
    fn next_id(&self) -> StreamId {
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        if now_ms > self.last_id.ms {
            StreamId::new(now_ms, 0)
        } else {
            self.last_id.next()
        }
    }

    fn find(&self, id: StreamId) -> Option<&Entry> {
        self.entries
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|idx| &self.entries[idx])
    }

    fn group_mut(&mut self, stream: &str, group: &str) -> Result<&mut GroupState> {
        self.groups
            .get_mut(group)
            .ok_or_else(|| LogError::GroupNotFound {
                stream: stream.to_string(),
                group: group.to_string(),
            })
    }
}

/// In-memory stream log with blocking-read support.
pub struct MemoryStreamLog {
    /// Streams indexed by name
    streams: RwLock<HashMap<String, StreamState>>,
    /// Broadcast channel for append notifications
    notify_tx: broadcast::Sender<AppendNotification>,
}

impl MemoryStreamLog {
    /// Create a new empty log.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe to append notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AppendNotification> {
        self.notify_tx.subscribe()
    }

    /// Check if a stream exists.
    pub fn has(&self, stream: &str) -> bool {
        self.streams.read().contains_key(stream)
    }

    /// Snapshot of the entries currently retained in a stream.
    pub fn entries(&self, stream: &str) -> Vec<Entry> {
        self.streams
            .read()
            .get(stream)
            .map(|s| s.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn not_found(stream: &str, group: &str) -> LogError {
        LogError::GroupNotFound {
            stream: stream.to_string(),
            group: group.to_string(),
        }
    }

    /// Move up to `count` entries past the group cursor into the consumer's
    /// pending list.
    fn deliver_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<Entry>> {
        let mut streams = self.streams.write();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| Self::not_found(stream, group))?;

        let cursor = state
            .groups
            .get(group)
            .ok_or_else(|| Self::not_found(stream, group))?
            .last_delivered;

        let delivered: Vec<Entry> = state
            .entries
            .iter()
            .filter(|e| e.id > cursor)
            .take(count)
            .cloned()
            .collect();

        let group_state = state.group_mut(stream, group)?;
        group_state.consumers.insert(consumer.to_string());

        let now = Instant::now();
        for entry in &delivered {
            group_state.last_delivered = entry.id;
            group_state.pending.insert(
                entry.id,
                PendingState {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
        }

        if !delivered.is_empty() {
            debug!(
                stream = %stream,
                group = %group,
                consumer = %consumer,
                count = delivered.len(),
                "Delivered entries"
            );
        }

        Ok(delivered)
    }

    /// Wait for an append to `stream`. Returns early on lag so the caller
    /// re-checks the stream.
    async fn wait_for_append(rx: &mut broadcast::Receiver<AppendNotification>, stream: &str) {
        loop {
            match rx.recv().await {
                Ok(notification) if notification.stream == stream => return,
                Ok(_) => continue,
                Err(_) => return,
            }
        }
    }
}

impl Default for MemoryStreamLog {
    fn default() -> Self {
        let (notify_tx, _) = broadcast::channel(1024);
        Self {
            streams: RwLock::new(HashMap::new()),
            notify_tx,
        }
    }
}

#[async_trait]
impl StreamLog for MemoryStreamLog {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn append(
        &self,
        stream: &str,
        fields: &[(&str, &str)],
        max_len: usize,
    ) -> Result<StreamId> {
        let id = {
            let mut streams = self.streams.write();
            let state = streams.entry(stream.to_string()).or_default();

            let id = state.next_id();
            let fields = fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            state.entries.push_back(Entry::new(id, fields));
            state.last_id = id;

            while state.entries.len() > max_len {
                state.entries.pop_front();
            }
            id
        };

        debug!(stream = %stream, id = %id, "Appended to stream");

        // Notify waiters
        let _ = self.notify_tx.send(AppendNotification {
            stream: stream.to_string(),
            id,
        });

        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str, start: StreamId) -> Result<()> {
        let mut streams = self.streams.write();
        let state = streams.entry(stream.to_string()).or_default();

        if state.groups.contains_key(group) {
            return Err(LogError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }

        state.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered: start,
                ..Default::default()
            },
        );

        info!(stream = %stream, group = %group, start = %start, "Created consumer group");
        Ok(())
    }

    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<Entry>> {
        let deadline = block.map(|d| Instant::now() + d);

        loop {
            // Subscribe before checking so an append between the check and
            // the wait is not missed
            let mut rx = self.subscribe();

            let delivered = self.deliver_new(stream, group, consumer, count)?;
            if !delivered.is_empty() {
                return Ok(delivered);
            }

            match deadline {
                Some(deadline) => {
                    let wait = Self::wait_for_append(&mut rx, stream);
                    if tokio::time::timeout_at(deadline, wait).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
                None => Self::wait_for_append(&mut rx, stream).await,
            }
        }
    }

    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        after: StreamId,
        count: usize,
    ) -> Result<Vec<Entry>> {
        let mut streams = self.streams.write();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| Self::not_found(stream, group))?;

        let ids: Vec<StreamId> = {
            let group_state = state.group_mut(stream, group)?;
            group_state.consumers.insert(consumer.to_string());
            group_state
                .pending
                .range(after.next()..)
                .filter(|(_, p)| p.consumer == consumer)
                .take(count)
                .map(|(id, _)| *id)
                .collect()
        };

        Ok(ids
            .into_iter()
            .map(|id| {
                state
                    .find(id)
                    .cloned()
                    .unwrap_or_else(|| Entry::new(id, HashMap::new()))
            })
            .collect())
    }

    async fn pending_entries(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        after: StreamId,
        count: usize,
    ) -> Result<Vec<PendingEntry>> {
        let streams = self.streams.read();
        let group_state = streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| Self::not_found(stream, group))?;

        let now = Instant::now();
        Ok(group_state
            .pending
            .range(after.next()..)
            .map(|(id, p)| PendingEntry {
                id: *id,
                consumer: p.consumer.clone(),
                delivery_count: p.delivery_count,
                idle: now.saturating_duration_since(p.delivered_at),
            })
            .filter(|p| p.idle >= min_idle)
            .take(count)
            .collect())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let streams = self.streams.read();
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len() as u64)
            .ok_or_else(|| Self::not_found(stream, group))
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[StreamId],
    ) -> Result<Vec<Entry>> {
        let mut streams = self.streams.write();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| Self::not_found(stream, group))?;

        let retained: HashMap<StreamId, Entry> = ids
            .iter()
            .filter_map(|id| state.find(*id).map(|e| (*id, e.clone())))
            .collect();

        let group_state = state.group_mut(stream, group)?;
        group_state.consumers.insert(consumer.to_string());

        let now = Instant::now();
        let mut claimed = Vec::new();
        for id in ids {
            let Some(pending) = group_state.pending.get_mut(id) else {
                continue;
            };
            if now.saturating_duration_since(pending.delivered_at) < min_idle {
                continue;
            }
            match retained.get(id) {
                Some(entry) => {
                    pending.consumer = consumer.to_string();
                    pending.delivered_at = now;
                    pending.delivery_count += 1;
                    claimed.push(entry.clone());
                }
                None => {
                    // Trimmed from the stream: nothing left to deliver
                    group_state.pending.remove(id);
                }
            }
        }

        debug!(
            stream = %stream,
            group = %group,
            consumer = %consumer,
            requested = ids.len(),
            claimed = claimed.len(),
            "Claimed entries"
        );

        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[StreamId]) -> Result<u64> {
        let mut streams = self.streams.write();
        let Some(group_state) = streams.get_mut(stream).and_then(|s| s.groups.get_mut(group))
        else {
            return Ok(0);
        };

        let acked = ids
            .iter()
            .filter(|id| group_state.pending.remove(*id).is_some())
            .count() as u64;

        Ok(acked)
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        Ok(self
            .streams
            .read()
            .get(stream)
            .map(|s| s.entries.len() as u64)
            .unwrap_or(0))
    }

    async fn range_after(&self, stream: &str, after: StreamId) -> Result<Vec<Entry>> {
        Ok(self
            .streams
            .read()
            .get(stream)
            .map(|s| s.entries.iter().filter(|e| e.id > after).cloned().collect())
            .unwrap_or_default())
    }

    async fn groups(&self, stream: &str) -> Result<Vec<GroupInfo>> {
        let streams = self.streams.read();
        let state = streams
            .get(stream)
            .ok_or_else(|| LogError::StreamNotFound(stream.to_string()))?;

        let mut groups: Vec<GroupInfo> = state
            .groups
            .iter()
            .map(|(name, g)| GroupInfo {
                name: name.clone(),
                consumers: g.consumers.len() as u64,
                pending: g.pending.len() as u64,
                last_delivered_id: g.last_delivered,
            })
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "jobs";
    const GROUP: &str = "workers";
    const MINUTE: Duration = Duration::from_secs(60);

    async fn publish(log: &MemoryStreamLog, n: usize, max_len: usize) -> Vec<StreamId> {
        let mut ids = Vec::new();
        for i in 0..n {
            let msg = format!("message-{}", i);
            ids.push(log.append(STREAM, &[("msg", msg.as_str())], max_len).await.unwrap());
        }
        ids
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let log = MemoryStreamLog::new();

        let ids = publish(&log, 50, 1000).await;

        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(log.len(STREAM).await.unwrap(), 50);
        assert_eq!(log.entries(STREAM)[0].field("msg"), Some("message-0"));
    }

    #[tokio::test]
    async fn test_append_trims_to_max_len() {
        let log = MemoryStreamLog::new();

        let ids = publish(&log, 5, 2).await;

        let retained: Vec<StreamId> = log.entries(STREAM).iter().map(|e| e.id).collect();
        assert_eq!(retained, ids[3..].to_vec());
        assert_eq!(log.len(STREAM).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_create_group_makes_stream() {
        let log = MemoryStreamLog::new();

        log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();

        assert!(log.has(STREAM));
        assert_eq!(log.len(STREAM).await.unwrap(), 0);
        let groups = log.groups(STREAM).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].never_read());
    }

    #[tokio::test]
    async fn test_create_group_twice_keeps_cursor() {
        let log = MemoryStreamLog::new();
        log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();
        let ids = publish(&log, 2, 1000).await;
        log.read_new(STREAM, GROUP, "c1", 1, Some(Duration::ZERO))
            .await
            .unwrap();

        let err = log
            .create_group(STREAM, GROUP, StreamId::ZERO)
            .await
            .unwrap_err();

        assert!(err.is_group_exists());
        let groups = log.groups(STREAM).await.unwrap();
        assert_eq!(groups[0].last_delivered_id, ids[0]);
    }

    #[tokio::test]
    async fn test_read_new_delivers_each_entry_once() {
        let log = MemoryStreamLog::new();
        log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();
        let ids = publish(&log, 1, 1000).await;

        let first = log
            .read_new(STREAM, GROUP, "c1", 1, Some(Duration::ZERO))
            .await
            .unwrap();
        let second = log
            .read_new(STREAM, GROUP, "c2", 1, Some(Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, ids[0]);
        assert!(second.is_empty());
        assert_eq!(log.pending_count(STREAM, GROUP).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_read_new_respects_count() {
        let log = MemoryStreamLog::new();
        log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();
        let ids = publish(&log, 3, 1000).await;

        let batch = log
            .read_new(STREAM, GROUP, "c1", 2, Some(Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), ids[..2].to_vec());
        let groups = log.groups(STREAM).await.unwrap();
        assert_eq!(groups[0].last_delivered_id, ids[1]);
    }

    #[tokio::test]
    async fn test_read_new_blocks_until_append() {
        let log = MemoryStreamLog::new();
        log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();

        let reader = {
            let log = Arc::clone(&log);
            tokio::spawn(async move { log.read_new(STREAM, GROUP, "c1", 1, None).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        let ids = publish(&log, 1, 1000).await;
        let delivered = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("reader should wake up")
            .unwrap()
            .unwrap();

        assert_eq!(delivered[0].id, ids[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_new_times_out_empty() {
        let log = MemoryStreamLog::new();
        log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();

        let delivered = log
            .read_new(STREAM, GROUP, "c1", 1, Some(Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(delivered.is_empty());
    }

    #[tokio::test]
    async fn test_read_new_missing_group() {
        let log = MemoryStreamLog::new();
        publish(&log, 1, 1000).await;

        let result = log.read_new(STREAM, GROUP, "c1", 1, None).await;

        assert!(matches!(result, Err(LogError::GroupNotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_entries_idle_threshold() {
        let log = MemoryStreamLog::new();
        log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();
        let ids = publish(&log, 1, 1000).await;
        log.read_new(STREAM, GROUP, "c1", 1, Some(Duration::ZERO))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(log.pending_entries(STREAM, GROUP, MINUTE, StreamId::ZERO, 10).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        let pending = log.pending_entries(STREAM, GROUP, MINUTE, StreamId::ZERO, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ids[0]);
        assert_eq!(pending[0].consumer, "c1");
        assert_eq!(pending[0].delivery_count, 1);
        assert!(pending[0].idle >= MINUTE);
    }

    #[tokio::test]
    async fn test_pending_entries_pages_after_id() {
        let log = MemoryStreamLog::new();
        log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();
        let ids = publish(&log, 5, 1000).await;
        log.read_new(STREAM, GROUP, "c1", 5, Some(Duration::ZERO))
            .await
            .unwrap();

        let first = log
            .pending_entries(STREAM, GROUP, Duration::ZERO, StreamId::ZERO, 2)
            .await
            .unwrap();
        assert_eq!(first.iter().map(|p| p.id).collect::<Vec<_>>(), ids[..2]);

        let second = log
            .pending_entries(STREAM, GROUP, Duration::ZERO, first[1].id, 2)
            .await
            .unwrap();
        assert_eq!(second.iter().map(|p| p.id).collect::<Vec<_>>(), ids[2..4]);

        let last = log
            .pending_entries(STREAM, GROUP, Duration::ZERO, ids[4], 2)
            .await
            .unwrap();
        assert!(last.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_transfers_ownership() {
        let log = MemoryStreamLog::new();
        log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();
        let ids = publish(&log, 1, 1000).await;
        log.read_new(STREAM, GROUP, "c1", 1, Some(Duration::ZERO))
            .await
            .unwrap();

        // Too early
        let claimed = log.claim(STREAM, GROUP, "c2", MINUTE, &ids).await.unwrap();
        assert!(claimed.is_empty());

        tokio::time::advance(MINUTE).await;
        let claimed = log.claim(STREAM, GROUP, "c2", MINUTE, &ids).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].field("msg"), Some("message-0"));

        let pending = log
            .pending_entries(STREAM, GROUP, Duration::ZERO, StreamId::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(pending[0].consumer, "c2");
        assert_eq!(pending[0].delivery_count, 2);
        assert_eq!(pending[0].idle, Duration::ZERO);

        assert_eq!(log.ack(STREAM, GROUP, &ids).await.unwrap(), 1);
        assert_eq!(log.pending_count(STREAM, GROUP).await.unwrap(), 0);
        assert_eq!(log.len(STREAM).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_read_pending_replays_own_entries() {
        let log = MemoryStreamLog::new();
        log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();
        let ids = publish(&log, 3, 1000).await;
        log.read_new(STREAM, GROUP, "c1", 2, Some(Duration::ZERO))
            .await
            .unwrap();
        log.read_new(STREAM, GROUP, "c2", 1, Some(Duration::ZERO))
            .await
            .unwrap();

        let first = log
            .read_pending(STREAM, GROUP, "c1", StreamId::ZERO, 1)
            .await
            .unwrap();
        assert_eq!(first[0].id, ids[0]);

        let rest = log
            .read_pending(STREAM, GROUP, "c1", first[0].id, 10)
            .await
            .unwrap();
        assert_eq!(rest.iter().map(|e| e.id).collect::<Vec<_>>(), vec![ids[1]]);

        let stranger = log
            .read_pending(STREAM, GROUP, "c3", StreamId::ZERO, 10)
            .await
            .unwrap();
        assert!(stranger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trimmed_pending_entry() {
        let log = MemoryStreamLog::new();
        log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();
        let ids = publish(&log, 1, 1).await;
        log.read_new(STREAM, GROUP, "c1", 1, Some(Duration::ZERO))
            .await
            .unwrap();
        publish(&log, 1, 1).await;

        let replay = log
            .read_pending(STREAM, GROUP, "c1", StreamId::ZERO, 1)
            .await
            .unwrap();
        assert_eq!(replay[0].id, ids[0]);
        assert!(replay[0].fields.is_empty());

        tokio::time::advance(MINUTE).await;
        let claimed = log.claim(STREAM, GROUP, "c2", MINUTE, &ids).await.unwrap();
        assert!(claimed.is_empty());
        assert_eq!(log.pending_count(STREAM, GROUP).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_range_after_is_open_interval() {
        let log = MemoryStreamLog::new();
        let ids = publish(&log, 3, 1000).await;

        let after_first = log.range_after(STREAM, ids[0]).await.unwrap();
        assert_eq!(after_first.iter().map(|e| e.id).collect::<Vec<_>>(), ids[1..].to_vec());
        assert!(log.range_after(STREAM, ids[2]).await.unwrap().is_empty());
        assert!(log.range_after("missing", StreamId::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_groups_missing_stream() {
        let log = MemoryStreamLog::new();

        let result = log.groups(STREAM).await;

        assert!(matches!(result, Err(LogError::StreamNotFound(_))));
        assert_eq!(log.len(STREAM).await.unwrap(), 0);
    }
}
