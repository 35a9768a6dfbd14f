//! Redis streams implementation of [`StreamLog`].

use std::time::Duration;

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client, RedisError,
    aio::ConnectionManager,
    streams::{
        StreamClaimReply, StreamInfoGroupsReply, StreamMaxlen, StreamPendingCountReply,
        StreamPendingReply, StreamRangeReply, StreamReadOptions, StreamReadReply,
    },
};
use tracing::{debug, info};

use crate::{
    error::{LogError, Result},
    log::StreamLog,
    types::{Entry, GroupInfo, PendingEntry, StreamId},
};

/// Stream log backed by a Redis server.
///
/// Blocking reads run on a dedicated connection so acknowledgments, claims
/// and appends issued meanwhile are not queued behind them.
#[derive(Clone)]
pub struct RedisStreamLog {
    commands: ConnectionManager,
    blocking: ConnectionManager,
}

impl RedisStreamLog {
    /// Connect to the Redis server addressed by `dsn`
    /// (`redis://[user[:password]@]host[:port][/db]`).
    pub async fn connect(dsn: &str) -> Result<Self> {
        let client = Client::open(dsn).map_err(|e| LogError::Connection(e.to_string()))?;

        let commands = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| LogError::Connection(e.to_string()))?;
        let blocking = ConnectionManager::new(client)
            .await
            .map_err(|e| LogError::Connection(e.to_string()))?;

        info!("Connected to Redis");
        Ok(Self { commands, blocking })
    }

    fn map_err(e: RedisError, stream: &str, group: &str) -> LogError {
        match e.code() {
            Some("NOGROUP") => LogError::GroupNotFound {
                stream: stream.to_string(),
                group: group.to_string(),
            },
            Some("BUSYGROUP") => LogError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            },
            _ if e.is_connection_refusal() || e.is_io_error() || e.is_connection_dropped() => {
                LogError::Connection(e.to_string())
            }
            _ => LogError::Redis(e),
        }
    }

    fn to_entry(raw: redis::streams::StreamId) -> Result<Entry> {
        let fields = raw
            .map
            .iter()
            .filter_map(|(k, v)| {
                redis::from_redis_value::<String>(v)
                    .ok()
                    .map(|v| (k.clone(), v))
            })
            .collect();
        Ok(Entry::new(raw.id.parse()?, fields))
    }

    fn to_entries(raw: Vec<redis::streams::StreamId>) -> Result<Vec<Entry>> {
        raw.into_iter().map(Self::to_entry).collect()
    }

    fn read_reply_entries(reply: StreamReadReply) -> Result<Vec<Entry>> {
        let ids = reply.keys.into_iter().flat_map(|key| key.ids).collect();
        Self::to_entries(ids)
    }
}

#[async_trait]
impl StreamLog for RedisStreamLog {
    async fn ping(&self) -> Result<()> {
        let mut con = self.commands.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut con)
            .await
            .map_err(|e| LogError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn append(
        &self,
        stream: &str,
        fields: &[(&str, &str)],
        max_len: usize,
    ) -> Result<StreamId> {
        let mut con = self.commands.clone();
        let id: String = con
            .xadd_maxlen(stream, StreamMaxlen::Equals(max_len), "*", fields)
            .await
            .map_err(|e| Self::map_err(e, stream, ""))?;

        debug!(stream = %stream, id = %id, "Appended to stream");
        id.parse()
    }

    async fn create_group(&self, stream: &str, group: &str, start: StreamId) -> Result<()> {
        let mut con = self.commands.clone();
        let () = con
            .xgroup_create_mkstream(stream, group, start.to_string())
            .await
            .map_err(|e| Self::map_err(e, stream, group))?;

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
        let mut options = StreamReadOptions::default().group(group, consumer).count(count);
        options = match block {
            // BLOCK 0 waits indefinitely
            None => options.block(0),
            Some(d) if d.is_zero() => options,
            Some(d) => options.block(d.as_millis().max(1) as usize),
        };

        let mut con = self.blocking.clone();
        let reply: Option<StreamReadReply> = con
            .xread_options(&[stream], &[">"], &options)
            .await
            .map_err(|e| Self::map_err(e, stream, group))?;

        match reply {
            Some(reply) => Self::read_reply_entries(reply),
            None => Ok(Vec::new()),
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
        let options = StreamReadOptions::default().group(group, consumer).count(count);

        let mut con = self.commands.clone();
        let reply: Option<StreamReadReply> = con
            .xread_options(&[stream], &[after.to_string()], &options)
            .await
            .map_err(|e| Self::map_err(e, stream, group))?;

        match reply {
            Some(reply) => Self::read_reply_entries(reply),
            None => Ok(Vec::new()),
        }
    }

    async fn pending_entries(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        after: StreamId,
        count: usize,
    ) -> Result<Vec<PendingEntry>> {
        // Exclusive start needs Redis 6.2; "-" covers the first page
        let start = if after.is_zero() {
            "-".to_string()
        } else {
            format!("({}", after)
        };

        let mut con = self.commands.clone();
        let reply: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle.as_millis() as u64)
            .arg(start)
            .arg("+")
            .arg(count)
            .query_async(&mut con)
            .await
            .map_err(|e| Self::map_err(e, stream, group))?;

        reply
            .ids
            .into_iter()
            .map(|p| -> Result<PendingEntry> {
                Ok(PendingEntry {
                    id: p.id.parse()?,
                    consumer: p.consumer,
                    delivery_count: p.times_delivered as u64,
                    idle: Duration::from_millis(p.last_delivered_ms as u64),
                })
            })
            .collect()
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let mut con = self.commands.clone();
        let reply: StreamPendingReply = con
            .xpending(stream, group)
            .await
            .map_err(|e| Self::map_err(e, stream, group))?;

        Ok(reply.count() as u64)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[StreamId],
    ) -> Result<Vec<Entry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = ids.iter().map(StreamId::to_string).collect();

        let mut con = self.commands.clone();
        let reply: StreamClaimReply = con
            .xclaim(stream, group, consumer, min_idle.as_millis() as u64, &ids)
            .await
            .map_err(|e| Self::map_err(e, stream, group))?;

        Self::to_entries(reply.ids)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[StreamId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = ids.iter().map(StreamId::to_string).collect();

        let mut con = self.commands.clone();
        let acked: u64 = con
            .xack(stream, group, &ids)
            .await
            .map_err(|e| Self::map_err(e, stream, group))?;
        Ok(acked)
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        let mut con = self.commands.clone();
        let len: u64 = con
            .xlen(stream)
            .await
            .map_err(|e| Self::map_err(e, stream, ""))?;
        Ok(len)
    }

    async fn range_after(&self, stream: &str, after: StreamId) -> Result<Vec<Entry>> {
        let mut con = self.commands.clone();
        let reply: StreamRangeReply = con
            .xrange(stream, format!("({}", after), "+")
            .await
            .map_err(|e| Self::map_err(e, stream, ""))?;

        Self::to_entries(reply.ids)
    }

    async fn groups(&self, stream: &str) -> Result<Vec<GroupInfo>> {
        let mut con = self.commands.clone();
        let reply: StreamInfoGroupsReply = match con.xinfo_groups(stream).await {
            Ok(reply) => reply,
            Err(e) if e.to_string().contains("no such key") => {
                return Err(LogError::StreamNotFound(stream.to_string()));
            }
            Err(e) => return Err(Self::map_err(e, stream, "")),
        };

        reply
            .groups
            .into_iter()
            .map(|g| -> Result<GroupInfo> {
                Ok(GroupInfo {
                    name: g.name,
                    consumers: g.consumers as u64,
                    pending: g.pending as u64,
                    last_delivered_id: g.last_delivered_id.parse()?,
                })
            })
            .collect()
    }
}
