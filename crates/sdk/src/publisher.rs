use std::{future::Future, sync::Arc};

use tracing::{debug, warn};
use workstream_log::{LogError, StreamLog};

use crate::{
    error::{Result, WorkQueueError},
    types::{PublisherConfig, StreamId, defaults},
};

/// Appends messages to a bounded stream and reports the backlog.
///
/// Publishing never waits for consumers. Every operation runs under the
/// configured deadline.
///
/// # Example
///
/// ```ignore
/// use workstream_sdk::{Publisher, PublisherConfig};
///
/// let publisher = Publisher::new(log, PublisherConfig::new("jobs").with_max_stream_length(1000));
/// publisher.publish("2024-10-09T00:00:00Z").await?;
///
/// let backlog = publisher.pending_messages_count("workers").await?;
/// ```
#[derive(Clone)]
pub struct Publisher {
    log: Arc<dyn StreamLog>,
    config: PublisherConfig,
}

impl Publisher {
    /// Create a new publisher over the given log
    pub fn new(log: Arc<dyn StreamLog>, config: PublisherConfig) -> Self {
        Self { log, config }
    }

    /// Get the configuration
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    async fn with_deadline<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.timeout, fut)
            .await
            .map_err(|_| WorkQueueError::Timeout(self.config.timeout))?
    }

    /// Append `{"msg": message}` with an auto-assigned id, trimming the
    /// stream to the configured maximum length. Not retried on failure.
    pub async fn publish(&self, message: &str) -> Result<StreamId> {
        let stream = &self.config.stream_name;
        let id = self
            .with_deadline(async {
                self.log
                    .append(
                        stream,
                        &[(defaults::MESSAGE_FIELD, message)],
                        self.config.max_stream_length,
                    )
                    .await
                    .map_err(WorkQueueError::Publish)
            })
            .await?;

        debug!(stream = %stream, id = %id, "Published message");
        Ok(id)
    }

    /// Publish messages in order, stopping at the first failure.
    ///
    /// Returns the ids of the published messages.
    pub async fn publish_batch<I, S>(&self, messages: I) -> Result<Vec<StreamId>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids = Vec::new();
        for message in messages {
            match self.publish(message.as_ref()).await {
                Ok(id) => ids.push(id),
                Err(e) => {
                    warn!(published = ids.len(), error = %e, "Publishing stopped");
                    return Err(e);
                }
            }
        }
        Ok(ids)
    }

    /// Total outstanding work for a group: entries never delivered to any
    /// consumer plus entries delivered but not yet acknowledged.
    pub async fn pending_messages_count(&self, group_name: &str) -> Result<u64> {
        let stream = &self.config.stream_name;
        self.with_deadline(async {
            let group_not_found = |e: LogError| match e {
                LogError::StreamNotFound(_) | LogError::GroupNotFound { .. } => {
                    WorkQueueError::GroupNotFound(group_name.to_string())
                }
                other => WorkQueueError::Log(other),
            };

            let group = self
                .log
                .groups(stream)
                .await
                .map_err(group_not_found)?
                .into_iter()
                .find(|g| g.name == group_name)
                .ok_or_else(|| WorkQueueError::GroupNotFound(group_name.to_string()))?;

            let undelivered = if group.never_read() {
                self.log.len(stream).await?
            } else {
                self.log
                    .range_after(stream, group.last_delivered_id)
                    .await?
                    .len() as u64
            };

            let pending = self
                .log
                .pending_count(stream, group_name)
                .await
                .map_err(group_not_found)?;

            Ok(undelivered + pending)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use workstream_log::{Entry, GroupInfo, MemoryStreamLog, PendingEntry};

    use super::*;

    const STREAM: &str = "jobs";
    const GROUP: &str = "workers";

    fn publisher(log: Arc<dyn StreamLog>, max_len: usize) -> Publisher {
        Publisher::new(log, PublisherConfig::new(STREAM).with_max_stream_length(max_len))
    }

    #[tokio::test]
    async fn test_publish_writes_msg_field() {
        let log = MemoryStreamLog::new();
        let publisher = publisher(log.clone(), 1000);

        let id = publisher.publish("hello").await.unwrap();

        let entries = log.entries(STREAM);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].field("msg"), Some("hello"));
    }

    #[tokio::test]
    async fn test_retention_min_k_m() {
        for (k, m) in [(3usize, 1000usize), (5, 2), (4, 4)] {
            let log = MemoryStreamLog::new();
            log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();
            let publisher = publisher(log.clone(), m);

            publisher
                .publish_batch((0..k).map(|i| format!("m{}", i)))
                .await
                .unwrap();

            assert_eq!(log.len(STREAM).await.unwrap() as usize, k.min(m));
            assert_eq!(
                publisher.pending_messages_count(GROUP).await.unwrap() as usize,
                k.min(m)
            );
        }
    }

    #[tokio::test]
    async fn test_pending_count_after_partial_delivery() {
        let log = MemoryStreamLog::new();
        log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();
        let publisher = publisher(log.clone(), 1000);
        publisher.publish_batch(["a", "b", "c", "d"]).await.unwrap();

        // Two delivered, one of them acknowledged
        let delivered = log
            .read_new(STREAM, GROUP, "c1", 2, Some(Duration::ZERO))
            .await
            .unwrap();
        log.ack(STREAM, GROUP, &[delivered[0].id]).await.unwrap();

        // 2 undelivered + 1 pending
        assert_eq!(publisher.pending_messages_count(GROUP).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_pending_count_unknown_group() {
        let log = MemoryStreamLog::new();
        let publisher = publisher(log.clone(), 1000);

        // Stream missing
        let result = publisher.pending_messages_count(GROUP).await;
        assert!(matches!(result, Err(WorkQueueError::GroupNotFound(g)) if g == GROUP));

        // Stream present, group missing
        publisher.publish("x").await.unwrap();
        let result = publisher.pending_messages_count(GROUP).await;
        assert!(matches!(result, Err(WorkQueueError::GroupNotFound(_))));
    }

    /// Log whose appends never complete.
    struct StalledLog;

    #[async_trait]
    impl StreamLog for StalledLog {
        async fn ping(&self) -> workstream_log::Result<()> {
            Ok(())
        }
        async fn append(
            &self,
            _stream: &str,
            _fields: &[(&str, &str)],
            _max_len: usize,
        ) -> workstream_log::Result<StreamId> {
            std::future::pending().await
        }
        async fn create_group(&self, _: &str, _: &str, _: StreamId) -> workstream_log::Result<()> {
            Ok(())
        }
        async fn read_new(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: usize,
            _: Option<Duration>,
        ) -> workstream_log::Result<Vec<Entry>> {
            std::future::pending().await
        }
        async fn read_pending(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: StreamId,
            _: usize,
        ) -> workstream_log::Result<Vec<Entry>> {
            Ok(Vec::new())
        }
        async fn pending_entries(
            &self,
            _: &str,
            _: &str,
            _: Duration,
            _: StreamId,
            _: usize,
        ) -> workstream_log::Result<Vec<PendingEntry>> {
            Ok(Vec::new())
        }
        async fn pending_count(&self, _: &str, _: &str) -> workstream_log::Result<u64> {
            Ok(0)
        }
        async fn claim(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Duration,
            _: &[StreamId],
        ) -> workstream_log::Result<Vec<Entry>> {
            Ok(Vec::new())
        }
        async fn ack(&self, _: &str, _: &str, _: &[StreamId]) -> workstream_log::Result<u64> {
            Ok(0)
        }
        async fn len(&self, _: &str) -> workstream_log::Result<u64> {
            Ok(0)
        }
        async fn range_after(&self, _: &str, _: StreamId) -> workstream_log::Result<Vec<Entry>> {
            Ok(Vec::new())
        }
        async fn groups(&self, _: &str) -> workstream_log::Result<Vec<GroupInfo>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_times_out() {
        let publisher = Publisher::new(
            Arc::new(StalledLog),
            PublisherConfig::new(STREAM).with_timeout(Duration::from_secs(2)),
        );

        let result = publisher.publish("hello").await;

        assert!(matches!(result, Err(WorkQueueError::Timeout(d)) if d == Duration::from_secs(2)));
    }
}
