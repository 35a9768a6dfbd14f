use thiserror::Error;

/// Errors reported by a stream log.
#[derive(Debug, Error)]
pub enum LogError {
    /// The stream key does not exist
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// The consumer group does not exist on the stream (NOGROUP)
    #[error("Consumer group {group} not found on stream {stream}")]
    GroupNotFound { stream: String, group: String },

    /// The consumer group already exists (BUSYGROUP)
    #[error("Consumer group {group} already exists on stream {stream}")]
    GroupExists { stream: String, group: String },

    /// Malformed stream id
    #[error("Invalid stream id: {0}")]
    InvalidId(String),

    /// Transport unreachable or misconfigured
    #[error("Connection error: {0}")]
    Connection(String),

    /// Error returned by the Redis server or client
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl LogError {
    /// Whether this error means the group is already there.
    pub fn is_group_exists(&self) -> bool {
        match self {
            LogError::GroupExists { .. } => true,
            LogError::Redis(e) => e.code() == Some("BUSYGROUP"),
            _ => false,
        }
    }
}

/// Result type alias for stream log operations
pub type Result<T> = std::result::Result<T, LogError>;
