//! Synthetic CPU and I/O load.
//!
//! [`WorkSimulator::run`] generates a fixed number of random bytes and
//! digests them with SHA-256. Generation and digesting run on two blocking
//! tasks joined by a bounded channel, so hashing overlaps generation and the
//! payload is never held in memory as a whole.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, bounded};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::WorkError;

/// Size of each generated chunk
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Chunks buffered between the generator and the digester
const PIPE_DEPTH: usize = 4;

/// Fills a buffer with random bytes.
pub type RandomSource = dyn Fn(&mut [u8]) -> Result<(), rand::Error> + Send + Sync;

/// Result of a completed simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOutcome {
    /// Hex-encoded SHA-256 of the generated payload
    pub digest: String,
    /// Number of bytes that went through the digest
    pub bytes: u64,
}

/// Produces a verifiable amount of CPU and I/O work.
#[derive(Clone)]
pub struct WorkSimulator {
    source: Arc<RandomSource>,
}

impl WorkSimulator {
    /// Simulator drawing from the operating system's CSPRNG.
    pub fn new() -> Self {
        Self::with_source(|buf: &mut [u8]| OsRng.try_fill_bytes(buf))
    }

    /// Simulator drawing from a custom random source.
    pub fn with_source<F>(source: F) -> Self
    where
        F: Fn(&mut [u8]) -> Result<(), rand::Error> + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(source),
        }
    }

    /// Generate exactly `size_bytes` of random content and return its digest.
    ///
    /// Returns [`WorkError::Cancelled`] as soon as `cancel` fires. Both
    /// background tasks stop within one chunk after cancellation, or after
    /// this future is dropped.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        size_bytes: i64,
    ) -> Result<WorkOutcome, WorkError> {
        if size_bytes <= 0 {
            return Err(WorkError::Size(size_bytes));
        }
        let total = size_bytes as u64;

        // Stops both tasks on every exit path, including drop
        let pipeline = cancel.child_token();
        let _guard = pipeline.clone().drop_guard();

        let (tx, rx) = bounded::<Vec<u8>>(PIPE_DEPTH);

        let generator = {
            let source = Arc::clone(&self.source);
            let token = pipeline.clone();
            tokio::task::spawn_blocking(move || generate(&*source, tx, total, &token))
        };
        let digester = {
            let token = pipeline.clone();
            tokio::task::spawn_blocking(move || digest(rx, total, &token))
        };

        let work = async {
            match tokio::join!(generator, digester) {
                (Err(e), _) => Err(WorkError::Generation(format!("generator task failed: {}", e))),
                // Generation errors explain a short digest input, report them first
                (Ok(Err(e)), _) => Err(e),
                (Ok(Ok(_)), Err(e)) => Err(WorkError::Digest(format!("digest task failed: {}", e))),
                (Ok(Ok(_)), Ok(digested)) => digested,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WorkError::Cancelled),
            result = work => {
                if let Ok(outcome) = &result {
                    debug!(bytes = outcome.bytes, digest = %outcome.digest, "Work finished");
                }
                result
            }
        }
    }
}

impl Default for WorkSimulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `total` random bytes into the pipe in chunks of [`CHUNK_SIZE`].
fn generate(
    source: &RandomSource,
    tx: Sender<Vec<u8>>,
    total: u64,
    token: &CancellationToken,
) -> Result<u64, WorkError> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut written: u64 = 0;

    while written < total {
        if token.is_cancelled() {
            return Err(WorkError::Cancelled);
        }

        source(buffer.as_mut_slice()).map_err(|e| WorkError::Generation(e.to_string()))?;

        let remaining = total - written;
        let size = remaining.min(CHUNK_SIZE as u64) as usize;

        tx.send(buffer[..size].to_vec())
            .map_err(|_| WorkError::Digest("digest side closed the pipe".to_string()))?;
        written += size as u64;
    }

    // Dropping `tx` here signals end of input
    Ok(written)
}

/// Hash everything read from the pipe and check the byte count.
fn digest(
    rx: Receiver<Vec<u8>>,
    total: u64,
    token: &CancellationToken,
) -> Result<WorkOutcome, WorkError> {
    let mut hasher = Sha256::new();
    let mut read: u64 = 0;

    for chunk in rx.iter() {
        if token.is_cancelled() {
            return Err(WorkError::Cancelled);
        }
        hasher.update(&chunk);
        read += chunk.len() as u64;
    }

    if read != total {
        return Err(WorkError::Digest(format!(
            "expected {} bytes, read {}",
            total, read
        )));
    }

    Ok(WorkOutcome {
        digest: hex::encode(hasher.finalize()),
        bytes: read,
    })
}
