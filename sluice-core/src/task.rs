//! Collaborator contracts consumed by the drainer pool.
//!
//! The buffer core does not decode, validate, or persist anything itself; it
//! hands each buffered record back to the [`IngestionTask`] that produced it
//! and signals the optional [`ProducedRecord`] handle when processing is
//! done. Both seams are traits so the serving stack can plug in its own
//! per-subscription task and completion plumbing.

use crate::record::ConsumedRecord;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// Failure raised while processing a single buffered record.
///
/// The core treats this type as opaque: it is delivered to the owning task
/// and to the record's completion handle, never surfaced from the service
/// API, and never retried on the task's behalf. It is `Clone` because one
/// failure flows to both sinks.
#[derive(Error, Debug, Clone)]
pub enum IngestError {
    /// Record envelope could not be decoded
    #[error("Failed to decode record envelope: {message}")]
    Decode { message: String },

    /// Per-partition data-integrity validation rejected the record
    #[error("Data integrity validation failed: {message}")]
    Validation { message: String },

    /// Local storage engine rejected the write
    #[error("Storage write failed: {message}")]
    Storage { message: String },

    /// Any other task-defined failure
    #[error("{message}")]
    Other { message: String },
}

/// The per-subscription actor that owns decoding, validation, and storage
/// writes. One task instance may have records in flight across several
/// drainers; calls for a single topic+partition are always serial.
pub trait IngestionTask: Send + Sync {
    /// Process one buffered record.
    ///
    /// Invoked by a drainer thread, strictly in enqueue order for records of
    /// the same topic+partition. May take arbitrary time; the queue feeding
    /// the caller is byte-bounded, so a slow implementation pushes back on
    /// the upstream poller rather than growing the heap.
    ///
    /// # Errors
    /// A returned error is treated as a per-record failure: it is logged,
    /// stored via [`set_last_drainer_error`](Self::set_last_drainer_error),
    /// and completes the record's [`ProducedRecord`] handle. The drainer
    /// itself keeps running.
    fn process_record(
        &self,
        record: &ConsumedRecord,
        produced: Option<&Arc<dyn ProducedRecord>>,
    ) -> Result<(), IngestError>;

    /// One-way notification that a record owned by this task failed on a
    /// drainer thread. The task runs on a different thread than the drainer;
    /// this is how it learns about asynchronous failures. Implementations
    /// typically retain only the most recent error.
    fn set_last_drainer_error(&self, error: IngestError);
}

/// Single-shot completion handle for the downstream effect of one record.
///
/// The core calls [`complete`](Self::complete) exactly once per record that
/// carries a handle: `Ok(())` if processing returned normally, the error
/// otherwise.
pub trait ProducedRecord: Send + Sync {
    /// Signal that processing of the associated record finished.
    fn complete(&self, outcome: Result<(), IngestError>);
}

/// Ready-made [`ProducedRecord`] backed by a [`tokio::sync::oneshot`]
/// channel.
///
/// The receiving half supports both `await` and
/// [`blocking_recv`](oneshot::Receiver::blocking_recv), so awaiters on either
/// side of the async boundary can observe persistence. A second `complete`
/// call is a no-op.
pub struct PersistedFuture {
    sender: Mutex<Option<oneshot::Sender<Result<(), IngestError>>>>,
}

impl PersistedFuture {
    /// Create a handle and the receiver observing its completion.
    pub fn channel() -> (Arc<Self>, oneshot::Receiver<Result<(), IngestError>>) {
        let (sender, receiver) = oneshot::channel();
        (
            Arc::new(Self {
                sender: Mutex::new(Some(sender)),
            }),
            receiver,
        )
    }
}

impl ProducedRecord for PersistedFuture {
    fn complete(&self, outcome: Result<(), IngestError>) {
        if let Some(sender) = self.sender.lock().take() {
            // The awaiter may have gone away; completion is best-effort.
            let _ = sender.send(outcome);
        }
    }
}
