use std::time::Duration;

use thiserror::Error;
use workstream_log::{LogError, StreamId};

/// Errors from the work simulator
#[derive(Error, Debug)]
pub enum WorkError {
    /// Requested payload size is not positive
    #[error("Size must be greater than 0, got {0}")]
    Size(i64),

    /// The random source failed
    #[error("Error generating random data: {0}")]
    Generation(String),

    /// The digest side failed or received a short input
    #[error("Error calculating hash: {0}")]
    Digest(String),

    /// Cancelled before completion
    #[error("Work cancelled")]
    Cancelled,
}

/// Errors that can occur in the work queue
#[derive(Error, Debug)]
pub enum WorkQueueError {
    /// Transport unreachable
    #[error("Connection error: {0}")]
    Connection(#[source] LogError),

    /// Stream or group creation failed for a reason other than "already exists"
    #[error("Failed to create consumer group: {0}")]
    Init(#[source] LogError),

    /// Blocking read failed
    #[error("Error reading messages: {0}")]
    Read(#[source] LogError),

    /// Work simulation failed; the entry stays pending
    #[error("Error processing message {id}: {source}")]
    Processing {
        id: StreamId,
        #[source]
        source: WorkError,
    },

    /// Acknowledgment failed after successful processing
    #[error("Error acknowledging message {id}: {source}")]
    Ack {
        id: StreamId,
        #[source]
        source: LogError,
    },

    /// Claiming stuck entries failed
    #[error("Error claiming stuck messages: {0}")]
    Reclaim(#[source] LogError),

    /// Append failed
    #[error("An event has not been written to the stream: {0}")]
    Publish(#[source] LogError),

    /// The named consumer group does not exist on the stream
    #[error("Consumer group {0:?} not found")]
    GroupNotFound(String),

    /// Any other stream log failure
    #[error("Stream log error: {0}")]
    Log(#[from] LogError),

    /// Deadline exceeded
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Cancelled by the caller
    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias for work queue operations
pub type Result<T> = std::result::Result<T, WorkQueueError>;
