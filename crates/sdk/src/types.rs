use std::time::Duration;

pub use workstream_log::{Entry, GroupInfo, PendingEntry, StreamId};

/// Default values shared by the publisher and the consumer
pub mod defaults {
    use std::time::Duration;

    /// Field holding the message payload in every entry
    pub const MESSAGE_FIELD: &str = "msg";
    /// Retention cap applied on append
    pub const MAX_STREAM_LENGTH: usize = 1000;
    /// Simulated work per message when nothing is configured (1 GiB)
    pub const DATA_SIZE_BYTES: i64 = 1024 * 1024 * 1024;
    /// How often stuck entries are looked for
    pub const CLAIM_INTERVAL: Duration = Duration::from_secs(60);
    /// Idle time after which a pending entry is considered stuck
    pub const CLAIM_MIN_IDLE: Duration = Duration::from_secs(60);
    /// Stuck entries claimed per tick
    pub const CLAIM_BATCH_SIZE: usize = 10;
    /// Deadline applied to publisher operations
    pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
}

/// State of a running consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Creating the stream and group
    Initializing,

    /// Replaying entries already pending for this identity
    RecoveringPending,

    /// Waiting for new entries
    Listening,

    /// Reclaiming entries stuck on other consumers
    Claiming,

    /// Running the work for one entry
    Processing,

    /// The consume loop has exited
    Stopped,
}

impl std::fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumerState::Initializing => write!(f, "initializing"),
            ConsumerState::RecoveringPending => write!(f, "recovering_pending"),
            ConsumerState::Listening => write!(f, "listening"),
            ConsumerState::Claiming => write!(f, "claiming"),
            ConsumerState::Processing => write!(f, "processing"),
            ConsumerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Configuration for the publisher
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Stream to append to
    pub stream_name: String,

    /// Retention cap: at most this many recent entries are kept
    pub max_stream_length: usize,

    /// Deadline for each publisher operation
    pub timeout: Duration,
}

impl PublisherConfig {
    /// Create a new configuration for the given stream
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            max_stream_length: defaults::MAX_STREAM_LENGTH,
            timeout: defaults::PUBLISH_TIMEOUT,
        }
    }

    /// Set the retention cap
    pub fn with_max_stream_length(mut self, max: usize) -> Self {
        self.max_stream_length = max;
        self
    }

    /// Set the operation deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Configuration for a consumer-group client
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Stream to consume
    pub stream_name: String,

    /// Consumer group shared by competing consumers
    pub group_name: String,

    /// Bytes of simulated work per message
    pub data_size_bytes: i64,

    /// Fixed consumer identity; a random one is generated per run when unset
    pub consumer_id: Option<String>,

    /// How long one read waits for new entries (`None` waits indefinitely)
    pub read_block: Option<Duration>,

    /// Interval of the stuck-entry scan
    pub claim_interval: Duration,

    /// Idle threshold for reclaiming an entry
    pub claim_min_idle: Duration,

    /// Maximum entries reclaimed per scan
    pub claim_batch_size: usize,
}

impl ConsumerConfig {
    /// Create a new configuration for the given stream and group
    pub fn new(stream_name: impl Into<String>, group_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            group_name: group_name.into(),
            data_size_bytes: defaults::DATA_SIZE_BYTES,
            consumer_id: None,
            read_block: None,
            claim_interval: defaults::CLAIM_INTERVAL,
            claim_min_idle: defaults::CLAIM_MIN_IDLE,
            claim_batch_size: defaults::CLAIM_BATCH_SIZE,
        }
    }

    /// Set the simulated work size per message
    pub fn with_data_size_bytes(mut self, size: i64) -> Self {
        self.data_size_bytes = size;
        self
    }

    /// Pin the consumer identity instead of generating one per run
    pub fn with_consumer_id(mut self, consumer_id: impl Into<String>) -> Self {
        self.consumer_id = Some(consumer_id.into());
        self
    }

    /// Bound each blocking read
    pub fn with_read_block(mut self, block: Duration) -> Self {
        self.read_block = Some(block);
        self
    }

    /// Set the reclamation interval
    pub fn with_claim_interval(mut self, interval: Duration) -> Self {
        self.claim_interval = interval;
        self
    }

    /// Set the idle threshold for reclamation
    pub fn with_claim_min_idle(mut self, min_idle: Duration) -> Self {
        self.claim_min_idle = min_idle;
        self
    }

    /// Set the reclamation batch size
    pub fn with_claim_batch_size(mut self, batch_size: usize) -> Self {
        self.claim_batch_size = batch_size;
        self
    }
}
