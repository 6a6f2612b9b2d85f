//! Drainer worker threads.
//!
//! Each drainer owns exactly one [`MemoryBoundedQueue`] and loops pulling
//! records out of it, delegating persistence and validation to the record's
//! owning [`IngestionTask`](crate::task::IngestionTask). A failure while
//! processing one record is isolated to that record; the other shards
//! sharing the drainer keep flowing.

use crate::queue::MemoryBoundedQueue;
use crate::task::IngestError;
use crate::types::TopicPartition;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Cap on the rendered-record length in failure logs, to avoid flooding them
/// with payload dumps.
const MAX_LOGGED_RECORD_CHARS: usize = 1024;

/// Terminal and running states of a drainer worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DrainerState {
    /// Worker loop is live (also the initial state before the thread spawns)
    Running = 0,
    /// Exited after observing a stop request
    StoppedNormal = 1,
    /// Exited because its queue was closed mid-wait
    StoppedCancelled = 2,
    /// Terminated by a panic escaping the ingestion task
    StoppedFatal = 3,
}

impl DrainerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::StoppedNormal,
            2 => Self::StoppedCancelled,
            _ => Self::StoppedFatal,
        }
    }
}

/// A single worker pulling records from one queue.
pub(crate) struct Drainer {
    index: usize,
    queue: Arc<MemoryBoundedQueue>,
    running: AtomicBool,
    state: AtomicU8,
    /// Cumulative time spent in `process_record` per shard. Written only by
    /// the worker thread; read and cleared by diagnostic callers.
    time_spent: Mutex<HashMap<TopicPartition, Duration>>,
}

impl Drainer {
    pub(crate) fn new(index: usize, queue: Arc<MemoryBoundedQueue>) -> Self {
        Self {
            index,
            queue,
            running: AtomicBool::new(true),
            state: AtomicU8::new(DrainerState::Running as u8),
            time_spent: Mutex::new(HashMap::new()),
        }
    }

    /// Ask the worker loop to exit. The loop re-checks the flag between
    /// records; a worker blocked in `take` is woken by closing the queue.
    pub(crate) fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub(crate) fn state(&self) -> DrainerState {
        DrainerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Snapshot of cumulative per-shard processing time.
    pub(crate) fn time_spent_snapshot(&self) -> Vec<(TopicPartition, Duration)> {
        self.time_spent
            .lock()
            .iter()
            .map(|(shard, spent)| (shard.clone(), *spent))
            .collect()
    }

    /// Reset the per-shard processing-time counters.
    pub(crate) fn clear_time_spent(&self) {
        self.time_spent.lock().clear();
    }

    /// Worker loop. Runs on a dedicated thread until stopped, cancelled, or
    /// terminated by a panic in the ingestion task.
    pub(crate) fn run(&self) {
        info!(drainer = self.index, "Drainer thread started");
        while self.running.load(Ordering::SeqCst) {
            let Some(taken) = self.queue.take() else {
                self.state
                    .store(DrainerState::StoppedCancelled as u8, Ordering::SeqCst);
                info!(drainer = self.index, "Drainer queue closed, exiting");
                return;
            };

            let shard = taken.topic_partition().clone();
            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                taken.task().process_record(taken.record(), taken.produced())
            }));

            match outcome {
                Ok(Ok(())) => {
                    if let Some(produced) = taken.produced() {
                        produced.complete(Ok(()));
                    }
                    let elapsed = started.elapsed();
                    *self.time_spent.lock().entry(shard).or_default() += elapsed;
                }
                Ok(Err(ingest_error)) => {
                    self.report_record_failure(&taken, &ingest_error);
                    taken.task().set_last_drainer_error(ingest_error.clone());
                    if let Some(produced) = taken.produced() {
                        produced.complete(Err(ingest_error));
                    }
                }
                Err(panic_payload) => {
                    error!(
                        drainer = self.index,
                        shard = %shard,
                        panic = panic_message(panic_payload.as_ref()),
                        "Drainer terminating after panic in ingestion task"
                    );
                    // State first: once the guard drops and the shard is
                    // released, observers must already see the terminal state.
                    self.state
                        .store(DrainerState::StoppedFatal as u8, Ordering::SeqCst);
                    return;
                }
            }
        }
        self.state
            .store(DrainerState::StoppedNormal as u8, Ordering::SeqCst);
        info!(drainer = self.index, "Drainer thread stopped");
    }

    fn report_record_failure(
        &self,
        record: &crate::record::IngestionRecord,
        ingest_error: &IngestError,
    ) {
        let mut rendered = format!("{:?}", record.record());
        if rendered.chars().count() > MAX_LOGGED_RECORD_CHARS {
            rendered = rendered.chars().take(MAX_LOGGED_RECORD_CHARS).collect();
        }
        error!(
            drainer = self.index,
            error = %ingest_error,
            record = %rendered,
            "Failed to process buffered record"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}
