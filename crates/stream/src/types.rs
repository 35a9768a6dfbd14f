//! Core types for stream logs.

use std::{collections::HashMap, fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::LogError;

/// Identifier of a stream entry.
///
/// Format: "ms-seq" where `ms` is the append time in milliseconds since epoch
/// and `seq` disambiguates entries appended within the same millisecond.
/// Ordering is total: by `ms`, then by `seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    /// The "never read" cursor of a freshly created group.
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Smallest id strictly greater than this one.
    pub fn next(self) -> Self {
        match self.seq.checked_add(1) {
            Some(seq) => Self { ms: self.ms, seq },
            None => Self {
                ms: self.ms + 1,
                seq: 0,
            },
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = LogError;

    /// Parses "ms-seq". A bare "ms" is accepted with `seq = 0`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LogError::InvalidId(s.to_string());
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        let ms = ms.parse().map_err(|_| invalid())?;
        let seq = seq.parse().map_err(|_| invalid())?;
        Ok(Self { ms, seq })
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for StreamId {
    type Error = LogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// An entry stored in a stream. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: StreamId,
    /// Field/value pairs. Empty when the entry was trimmed from the stream
    /// while still pending.
    pub fields: HashMap<String, String>,
}

impl Entry {
    pub fn new(id: StreamId, fields: HashMap<String, String>) -> Self {
        Self { id, fields }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// An entry delivered to a consumer but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: StreamId,
    /// Consumer identity currently owning the delivery
    pub consumer: String,
    /// Number of times the entry was delivered (initial read plus claims)
    pub delivery_count: u64,
    /// Time elapsed since the last delivery to `consumer`
    pub idle: Duration,
}

/// Consumer group metadata as reported by the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub consumers: u64,
    pub pending: u64,
    pub last_delivered_id: StreamId,
}

impl GroupInfo {
    /// Whether the group cursor is still at the "never read" sentinel.
    pub fn never_read(&self) -> bool {
        self.last_delivered_id.is_zero()
    }
}
