//! Record types flowing through the buffer-and-drain engine.

use crate::task::{IngestionTask, ProducedRecord};
use crate::types::{Offset, PartitionId, Topic, TopicPartition};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// A raw record pulled from the upstream message bus by the polling thread.
///
/// Payload bytes are held by reference count; buffering a record does not
/// copy what the upstream already paid for.
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    /// Topic of the log stream this record came from
    pub topic: Topic,
    /// Partition within the topic
    pub partition: PartitionId,
    /// Offset assigned by the upstream log
    pub offset: Offset,
    /// Record key bytes; control records may carry none
    pub key: Option<Bytes>,
    /// Serialized record envelope
    pub value: Bytes,
}

impl ConsumedRecord {
    /// Create a new consumed record.
    pub fn new(
        topic: Topic,
        partition: PartitionId,
        offset: Offset,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Self {
        Self {
            topic,
            partition,
            offset,
            key,
            value,
        }
    }

    /// Shard coordinate of this record.
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// Combined size of the key and value payloads in bytes.
    pub fn payload_size(&self) -> usize {
        self.key.as_ref().map_or(0, Bytes::len) + self.value.len()
    }
}

/// The unit of work buffered in a drainer queue: one consumed record bound to
/// the ingestion task that owns it and an optional downstream completion
/// handle.
pub struct IngestionRecord {
    record: ConsumedRecord,
    shard: TopicPartition,
    task: Arc<dyn IngestionTask>,
    produced: Option<Arc<dyn ProducedRecord>>,
    accounted_size: usize,
}

impl IngestionRecord {
    /// Bundle a consumed record with its owning task and optional completion
    /// handle.
    ///
    /// `overhead_bytes` is the fixed per-record accounting overhead covering
    /// struct and queue-node memory the payload bytes do not.
    pub fn new(
        record: ConsumedRecord,
        task: Arc<dyn IngestionTask>,
        produced: Option<Arc<dyn ProducedRecord>>,
        overhead_bytes: usize,
    ) -> Self {
        let accounted_size = record.payload_size() + record.topic.len() + overhead_bytes;
        let shard = record.topic_partition();
        Self {
            record,
            shard,
            task,
            produced,
            accounted_size,
        }
    }

    /// The raw consumed record.
    pub fn record(&self) -> &ConsumedRecord {
        &self.record
    }

    /// Shard coordinate this record belongs to.
    pub fn topic_partition(&self) -> &TopicPartition {
        &self.shard
    }

    /// The ingestion task that owns this record.
    pub fn task(&self) -> &Arc<dyn IngestionTask> {
        &self.task
    }

    /// Optional downstream completion handle.
    pub fn produced(&self) -> Option<&Arc<dyn ProducedRecord>> {
        self.produced.as_ref()
    }

    /// Size charged against the owning queue's byte capacity.
    pub fn accounted_size(&self) -> usize {
        self.accounted_size
    }
}

impl fmt::Debug for IngestionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionRecord")
            .field("record", &self.record)
            .field("accounted_size", &self.accounted_size)
            .field("has_produced", &self.produced.is_some())
            .finish()
    }
}
