//! # Sluice Core
//!
//! Ingestion buffer-and-drain engine for the sluice distributed key-value
//! serving system.
//!
//! Upstream, a polling thread pulls records off the message bus as fast as
//! it can; downstream, every record must be decoded, validated, and
//! persisted to the local store — the slow path. This crate mediates between
//! the two:
//! - a fixed pool of drainer workers, each owning one byte-bounded blocking
//!   queue;
//! - deterministic routing of every record to a drainer by topic+partition,
//!   preserving per-partition ordering for downstream data-integrity
//!   validation;
//! - blocking backpressure: a full queue blocks the upstream poller instead
//!   of growing the heap;
//! - a drain barrier that waits until no record for a given topic+partition
//!   is buffered or in flight, so subscriptions can be changed safely;
//! - asynchronous per-record error propagation back into the owning
//!   ingestion task, with per-partition processing-time telemetry for
//!   slow-drainer diagnostics.
//!
//! ## Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use sluice_core::{
//!     BufferConfig, BufferService, ConsumedRecord, IngestError, IngestionTask, Offset,
//!     PartitionId, ProducedRecord, Topic,
//! };
//! use std::sync::Arc;
//!
//! struct StoreWriter;
//!
//! impl IngestionTask for StoreWriter {
//!     fn process_record(
//!         &self,
//!         record: &ConsumedRecord,
//!         _produced: Option<&Arc<dyn ProducedRecord>>,
//!     ) -> Result<(), IngestError> {
//!         // decode, validate, persist...
//!         let _ = record;
//!         Ok(())
//!     }
//!
//!     fn set_last_drainer_error(&self, _error: IngestError) {}
//! }
//!
//! fn main() -> sluice_core::Result<()> {
//!     let service = BufferService::new(BufferConfig::default())?;
//!     service.start()?;
//!
//!     let task: Arc<dyn IngestionTask> = Arc::new(StoreWriter);
//!     let topic = Topic::new("records_storeA_v3")?;
//!     let record = ConsumedRecord::new(
//!         topic.clone(),
//!         PartitionId(0),
//!         Offset::new(0),
//!         None,
//!         Bytes::from_static(b"envelope"),
//!     );
//!     service.enqueue(record, Arc::clone(&task), None)?;
//!
//!     // Quiesce the shard before resubscribing, then shut down.
//!     service.drain_partition(&topic, PartitionId(0))?;
//!     service.stop()
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod drainer;
pub mod error;
pub mod queue;
pub mod record;
pub mod service;
pub mod task;
pub mod types;

pub use config::BufferConfig;
pub use drainer::DrainerState;
pub use error::{Error, Result};
pub use queue::MemoryBoundedQueue;
pub use record::{ConsumedRecord, IngestionRecord};
pub use service::{BufferService, ServiceState};
pub use task::{IngestError, IngestionTask, PersistedFuture, ProducedRecord};
pub use types::{Offset, PartitionId, Topic, TopicPartition};

/// Re-export commonly used types for convenience.
pub mod prelude {
    pub use crate::{
        BufferConfig, BufferService, ConsumedRecord, Error, IngestError, IngestionTask, Offset,
        PartitionId, PersistedFuture, ProducedRecord, Result, Topic, TopicPartition,
    };
    pub use bytes::Bytes;
}
