//! Stream coordinate types shared across the ingestion core.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Topic name identifying an upstream log stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    /// Create a new topic.
    ///
    /// # Errors
    /// Returns an error if the topic name is empty.
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidRecord {
                message: "Topic name cannot be empty".to_string(),
            });
        }
        Ok(Self(name))
    }

    /// Get the topic name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the topic name in bytes, as counted by queue accounting.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the topic name is empty. Always false for a constructed topic.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Partition identifier within a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl Default for PartitionId {
    fn default() -> Self {
        Self(0)
    }
}

/// Record offset within a partition, assigned by the upstream log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Offset(pub u64);

impl Offset {
    /// Create a new offset.
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Get the next offset.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the raw offset value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Offset {
    fn from(offset: u64) -> Self {
        Self(offset)
    }
}

/// Coordinates of a log-stream shard on the upstream message bus.
///
/// This is the unit of ordering in the ingestion core: every record of one
/// `TopicPartition` is serialized through the same drainer, and the drain
/// barrier quiesces exactly one `TopicPartition` at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    /// Topic of the shard
    pub topic: Topic,
    /// Partition within the topic
    pub partition: PartitionId,
}

impl TopicPartition {
    /// Create a new shard coordinate.
    pub fn new(topic: Topic, partition: PartitionId) -> Self {
        Self { topic, partition }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}
