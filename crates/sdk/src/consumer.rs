use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use workstream_log::{LogError, StreamLog};

use crate::{
    error::{Result, WorkError, WorkQueueError},
    types::{ConsumerConfig, ConsumerState, Entry, StreamId},
    work::WorkSimulator,
};

/// Competing consumer in a consumer group
///
/// Each [`run`](Self::run) replays the entries already pending for its
/// identity, then processes new entries one at a time, acknowledging each
/// after the simulated work completes. A ticker on the same loop reclaims
/// entries left idle by other consumers.
///
/// # Example
///
/// ```ignore
/// use workstream_sdk::{ConsumerConfig, ConsumerGroupClient};
///
/// let client = ConsumerGroupClient::new(log, ConsumerConfig::new("jobs", "workers"));
/// client.init_group().await?;
///
/// let cancel = CancellationToken::new();
/// client.run(cancel.clone()).await?;
/// ```
#[derive(Clone)]
pub struct ConsumerGroupClient {
    log: Arc<dyn StreamLog>,
    config: ConsumerConfig,
    simulator: WorkSimulator,
    state: Arc<RwLock<ConsumerState>>,
}

impl ConsumerGroupClient {
    /// Create a new client over the given log
    pub fn new(log: Arc<dyn StreamLog>, config: ConsumerConfig) -> Self {
        Self {
            log,
            config,
            simulator: WorkSimulator::new(),
            state: Arc::new(RwLock::new(ConsumerState::Initializing)),
        }
    }

    /// Replace the work simulator
    pub fn with_simulator(mut self, simulator: WorkSimulator) -> Self {
        self.simulator = simulator;
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Get the current state
    pub fn state(&self) -> ConsumerState {
        *self.state.read()
    }

    fn set_state(&self, state: ConsumerState) {
        *self.state.write() = state;
    }

    /// Create the stream and the group positioned at the start of the stream.
    ///
    /// An existing group is left untouched, including its delivery cursor.
    pub async fn init_group(&self) -> Result<()> {
        let stream = &self.config.stream_name;
        let group = &self.config.group_name;

        match self.log.create_group(stream, group, StreamId::ZERO).await {
            Ok(()) => {
                info!(stream = %stream, group = %group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.is_group_exists() => {
                debug!(stream = %stream, group = %group, "Consumer group already exists");
                Ok(())
            }
            Err(e @ LogError::Connection(_)) => Err(WorkQueueError::Connection(e)),
            Err(e) => Err(WorkQueueError::Init(e)),
        }
    }

    /// Run the consume loop until `cancel` fires or a fatal error occurs.
    ///
    /// Returns [`WorkQueueError::Cancelled`] on cancellation. Read failures
    /// and failures while replaying pending entries are fatal; failures on
    /// new or reclaimed entries are logged and leave the entry pending.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let consumer = self
            .config
            .consumer_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        info!(
            stream = %self.config.stream_name,
            group = %self.config.group_name,
            consumer = %consumer,
            "Starting consumer"
        );

        let result = self.consume(&cancel, &consumer).await;
        self.set_state(ConsumerState::Stopped);

        match &result {
            Err(WorkQueueError::Cancelled) => info!(consumer = %consumer, "Consumer cancelled"),
            Err(e) => error!(consumer = %consumer, error = %e, "Consumer stopped"),
            Ok(()) => {}
        }
        result
    }

    async fn consume(&self, cancel: &CancellationToken, consumer: &str) -> Result<()> {
        self.set_state(ConsumerState::Initializing);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WorkQueueError::Cancelled),
            result = self.init_group() => result?,
        }

        self.set_state(ConsumerState::RecoveringPending);
        self.recover_pending(cancel, consumer).await?;

        self.listen(cancel, consumer).await
    }

    /// Replay entries already delivered to this identity, one at a time.
    async fn recover_pending(&self, cancel: &CancellationToken, consumer: &str) -> Result<()> {
        let stream = &self.config.stream_name;
        let group = &self.config.group_name;
        let mut last = StreamId::ZERO;
        let mut recovered = 0usize;

        loop {
            let entries = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WorkQueueError::Cancelled),
                result = self.log.read_pending(stream, group, consumer, last, 1) => {
                    result.map_err(WorkQueueError::Read)?
                }
            };

            let Some(entry) = entries.into_iter().next() else {
                break;
            };
            last = entry.id;
            self.process_entry(cancel, consumer, &entry).await?;
            recovered += 1;
        }

        if recovered > 0 {
            info!(consumer = %consumer, count = recovered, "Recovered pending messages");
        }
        Ok(())
    }

    /// Steady state: new entries and the reclamation ticker on one task.
    async fn listen(&self, cancel: &CancellationToken, consumer: &str) -> Result<()> {
        let stream = &self.config.stream_name;
        let group = &self.config.group_name;
        let block = self.config.read_block;

        let interval = self.config.claim_interval;
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.set_state(ConsumerState::Listening);

        // Kept across ticks: dropping it could strand an entry the log
        // already delivered to this consumer.
        let mut read = self.log.read_new(stream, group, consumer, 1, block);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WorkQueueError::Cancelled),
                result = &mut read => {
                    let entries = result.map_err(WorkQueueError::Read)?;
                    for entry in &entries {
                        self.handle_entry(cancel, consumer, entry).await?;
                    }
                    read = self.log.read_new(stream, group, consumer, 1, block);
                }
                _ = ticker.tick() => {
                    self.reclaim_stuck(cancel, consumer).await?;
                }
            }
            self.set_state(ConsumerState::Listening);
        }
    }

    /// Process an entry outside recovery. Only cancellation is propagated.
    async fn handle_entry(
        &self,
        cancel: &CancellationToken,
        consumer: &str,
        entry: &Entry,
    ) -> Result<()> {
        match self.process_entry(cancel, consumer, entry).await {
            Err(WorkQueueError::Cancelled) => Err(WorkQueueError::Cancelled),
            Err(e) => {
                error!(consumer = %consumer, id = %entry.id, error = %e, "Message left pending");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Run the work for one entry, then acknowledge it.
    async fn process_entry(
        &self,
        cancel: &CancellationToken,
        consumer: &str,
        entry: &Entry,
    ) -> Result<()> {
        self.set_state(ConsumerState::Processing);
        debug!(consumer = %consumer, id = %entry.id, "Processing message");

        let outcome = self
            .simulator
            .run(cancel, self.config.data_size_bytes)
            .await
            .map_err(|e| match e {
                WorkError::Cancelled => WorkQueueError::Cancelled,
                source => WorkQueueError::Processing {
                    id: entry.id,
                    source,
                },
            })?;

        // Not raced against cancellation
        self.log
            .ack(
                &self.config.stream_name,
                &self.config.group_name,
                &[entry.id],
            )
            .await
            .map_err(|source| WorkQueueError::Ack {
                id: entry.id,
                source,
            })?;

        info!(
            consumer = %consumer,
            id = %entry.id,
            digest = %outcome.digest,
            "Processed message"
        );
        Ok(())
    }

    /// Claim entries stuck on other consumers, then process them in id order.
    async fn reclaim_stuck(&self, cancel: &CancellationToken, consumer: &str) -> Result<()> {
        self.set_state(ConsumerState::Claiming);

        let claimed = match self.claim_stuck(consumer).await {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(consumer = %consumer, error = %e, "Reclamation skipped");
                return Ok(());
            }
        };

        if claimed.is_empty() {
            return Ok(());
        }
        info!(consumer = %consumer, count = claimed.len(), "Claimed stuck messages");

        for entry in &claimed {
            if cancel.is_cancelled() {
                return Err(WorkQueueError::Cancelled);
            }
            self.handle_entry(cancel, consumer, entry).await?;
        }
        Ok(())
    }

    async fn claim_stuck(&self, consumer: &str) -> Result<Vec<Entry>> {
        let stream = &self.config.stream_name;
        let group = &self.config.group_name;
        let min_idle = self.config.claim_min_idle;
        let batch = self.config.claim_batch_size.max(1);

        // Own entries are skipped without counting toward the batch
        let mut ids: Vec<StreamId> = Vec::new();
        let mut after = StreamId::ZERO;
        while ids.len() < batch {
            let page = self
                .log
                .pending_entries(stream, group, min_idle, after, batch)
                .await
                .map_err(WorkQueueError::Reclaim)?;

            let Some(last) = page.last().map(|p| p.id) else {
                break;
            };
            let exhausted = page.len() < batch;
            after = last;

            ids.extend(
                page.into_iter()
                    .filter(|p| p.consumer != consumer)
                    .map(|p| p.id),
            );
            if exhausted {
                break;
            }
        }
        ids.truncate(batch);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut claimed = self
            .log
            .claim(stream, group, consumer, min_idle, &ids)
            .await
            .map_err(WorkQueueError::Reclaim)?;
        claimed.sort_by_key(|e| e.id);
        Ok(claimed)
    }
}
