//! The buffer service facade.
//!
//! [`BufferService`] sits between the upstream message-bus poller and the
//! per-partition storage-write path. It owns a fixed pool of drainer
//! workers, routes every incoming record to a deterministic drainer by
//! topic+partition, bounds memory per drainer, blocks the producer as
//! backpressure, and offers a drain barrier for quiescing one shard before a
//! subscription change.
//!
//! All records of one topic+partition land in the same queue and are
//! processed by the same worker, which is what keeps per-partition ordering
//! intact for downstream data-integrity validation. Nothing is promised
//! about ordering across shards, even when they share a drainer.

use crate::config::BufferConfig;
use crate::drainer::{Drainer, DrainerState};
use crate::queue::MemoryBoundedQueue;
use crate::record::{ConsumedRecord, IngestionRecord};
use crate::task::{IngestionTask, ProducedRecord};
use crate::types::{PartitionId, Topic};
use crate::{Error, Result};
use fxhash::FxHasher;
use parking_lot::Mutex;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Poll interval while waiting for worker threads to finish during stop.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle states of a [`BufferService`]. Transitions are monotonic and
/// one-shot: `New → Started → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceState {
    /// Constructed, workers not yet spawned
    New = 0,
    /// Worker pool is live
    Started = 1,
    /// Stop in progress
    Stopping = 2,
    /// Terminal
    Stopped = 3,
}

impl ServiceState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::New,
            1 => Self::Started,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// Human-readable state name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

/// Buffer-and-drain facade owning the drainer pool.
pub struct BufferService {
    config: BufferConfig,
    queues: Vec<Arc<MemoryBoundedQueue>>,
    drainers: Vec<Arc<Drainer>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    state: AtomicU8,
}

impl BufferService {
    /// Create a service with the given configuration. Queues and drainers
    /// are built up front; worker threads spawn on [`start`](Self::start).
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the configuration fails
    /// validation.
    pub fn new(config: BufferConfig) -> Result<Self> {
        config.validate()?;
        let queues: Vec<Arc<MemoryBoundedQueue>> = (0..config.drainer_count)
            .map(|_| {
                Arc::new(MemoryBoundedQueue::new(
                    config.capacity_per_drainer_bytes,
                    config.notify_delta_bytes,
                ))
            })
            .collect();
        let drainers = queues
            .iter()
            .enumerate()
            .map(|(index, queue)| Arc::new(Drainer::new(index, Arc::clone(queue))))
            .collect();
        Ok(Self {
            config,
            queues,
            drainers,
            handles: Mutex::new(Vec::new()),
            state: AtomicU8::new(ServiceState::New as u8),
        })
    }

    /// Spawn one named worker thread per drainer.
    ///
    /// # Errors
    /// - [`Error::InvalidState`] unless the service is in the `New` state;
    ///   `start` is one-shot.
    /// - [`Error::StartFailure`] if thread creation fails; the service is
    ///   left stopped.
    pub fn start(&self) -> Result<()> {
        self.transition(ServiceState::New, ServiceState::Started, "start")?;
        info!(
            drainers = self.config.drainer_count,
            capacity_per_drainer = self.config.capacity_per_drainer_bytes,
            "Starting buffer service"
        );

        let mut handles = self.handles.lock();
        for (index, drainer) in self.drainers.iter().enumerate() {
            let worker = Arc::clone(drainer);
            let spawned = thread::Builder::new()
                .name(format!("sluice-drainer-{index}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(spawn_error) => {
                    error!(drainer = index, error = %spawn_error, "Failed to spawn drainer thread");
                    for other in &self.drainers {
                        other.request_stop();
                    }
                    for queue in &self.queues {
                        queue.close();
                    }
                    self.state
                        .store(ServiceState::Stopped as u8, Ordering::SeqCst);
                    return Err(Error::StartFailure {
                        message: spawn_error.to_string(),
                    });
                }
            }
        }

        info!("Buffer service started");
        Ok(())
    }

    /// Buffer one consumed record for processing by `task`.
    ///
    /// Blocks while the target drainer's queue is over capacity; blocking
    /// the upstream poller is how the engine signals that downstream is
    /// overloaded. Unblocked by shutdown with [`Error::Cancelled`].
    ///
    /// # Errors
    /// - [`Error::InvalidState`] unless the service is started.
    /// - [`Error::RecordTooLarge`] if the record alone exceeds the
    ///   per-drainer capacity; such a record can never be admitted.
    /// - [`Error::Cancelled`] if the service stops while the call is
    ///   blocked; the record was not enqueued.
    pub fn enqueue(
        &self,
        record: ConsumedRecord,
        task: Arc<dyn IngestionTask>,
        produced: Option<Arc<dyn ProducedRecord>>,
    ) -> Result<()> {
        self.ensure_started("enqueue")?;
        let index = self.drainer_index_for(&record.topic, record.partition);
        let queued = IngestionRecord::new(record, task, produced, self.config.record_overhead_bytes);
        self.queues[index].put(queued)
    }

    /// Drainer index for a shard.
    ///
    /// A pure function of its inputs, fixed for the life of the process:
    /// every record of one topic+partition is serialized through the same
    /// queue and worker. The topic hash is halved to keep headroom over the
    /// partition addend.
    pub fn drainer_index_for(&self, topic: &Topic, partition: PartitionId) -> usize {
        let mut hasher = FxHasher::default();
        topic.as_str().hash(&mut hasher);
        let topic_hash = hasher.finish() >> 1;
        let bucket = topic_hash.wrapping_add(u64::from(partition.0)) % self.queues.len() as u64;
        bucket as usize
    }

    /// Block until no buffered or in-flight record for the shard remains.
    ///
    /// Used before a subscription change (unsubscribe, kill, resubscribe at
    /// a new offset) so residual records of the old subscription cannot
    /// interleave with the new one. The caller must have halted upstream
    /// production for the shard first; this call is then a consensus that
    /// the shard is quiescent. Successful return means the last record's
    /// processing has completed, not merely that the queue looked empty.
    ///
    /// Probe cadence comes from `drain_retry_budget` and
    /// `drain_sleep_interval`; tests inject tiny values.
    ///
    /// # Errors
    /// - [`Error::InvalidState`] unless the service is started.
    /// - [`Error::DrainTimeout`] if records remain after the retry budget.
    pub fn drain_partition(&self, topic: &Topic, partition: PartitionId) -> Result<()> {
        self.ensure_started("drain_partition")?;
        let index = self.drainer_index_for(topic, partition);
        let queue = &self.queues[index];

        for _ in 0..self.config.drain_retry_budget {
            let pending = queue
                .contains(|shard| shard.topic == *topic && shard.partition == partition);
            if !pending {
                debug!(
                    topic = %topic,
                    partition = %partition,
                    drainer = index,
                    "No buffered records remain for shard"
                );
                return Ok(());
            }
            thread::sleep(self.config.drain_sleep_interval);
        }

        error!(
            topic = %topic,
            partition = %partition,
            drainer = index,
            retries = self.config.drain_retry_budget,
            "Records still buffered after drain retry budget"
        );
        Err(Error::DrainTimeout {
            topic: topic.as_str().to_string(),
            partition: partition.0,
            drainer: index,
            retries: self.config.drain_retry_budget,
        })
    }

    /// Stop the worker pool.
    ///
    /// Flips every drainer's run flag, closes every queue (discarding
    /// buffered records — the caller checkpoints offsets before stopping),
    /// and waits up to `stop_timeout` for the workers to exit. A worker in
    /// the middle of `process_record` is allowed to finish its current
    /// record.
    ///
    /// # Errors
    /// - [`Error::InvalidState`] unless the service is started.
    /// - [`Error::ShutdownTimeout`] if workers outlive the deadline; the
    ///   service still transitions to `Stopped` and the stragglers are
    ///   detached.
    pub fn stop(&self) -> Result<()> {
        self.transition(ServiceState::Started, ServiceState::Stopping, "stop")?;
        info!("Stopping buffer service");

        for drainer in &self.drainers {
            drainer.request_stop();
        }
        for queue in &self.queues {
            queue.close();
        }

        let deadline = Instant::now() + self.config.stop_timeout;
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        let total = handles.len();
        for (finished, handle) in handles.into_iter().enumerate() {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    let pending = total - finished;
                    warn!(pending, "Drainer threads still running at stop deadline");
                    self.state
                        .store(ServiceState::Stopped as u8, Ordering::SeqCst);
                    return Err(Error::ShutdownTimeout { pending });
                }
                thread::sleep(STOP_POLL_INTERVAL);
            }
            if handle.join().is_err() {
                warn!("Drainer thread panicked outside record processing");
            }
        }

        self.state
            .store(ServiceState::Stopped as u8, Ordering::SeqCst);
        info!("Buffer service stopped");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Number of drainers in the pool.
    pub fn drainer_count(&self) -> usize {
        self.drainers.len()
    }

    /// Number of drainers whose worker loop is still live. Meaningful once
    /// the service has started; a supervising health check compares this
    /// against [`drainer_count`](Self::drainer_count) to detect a shard
    /// killed by a fatal processing failure.
    pub fn live_drainer_count(&self) -> usize {
        self.drainers
            .iter()
            .filter(|drainer| drainer.state() == DrainerState::Running)
            .count()
    }

    /// Memory usage of one drainer's queue, or `None` for an out-of-range
    /// index.
    pub fn per_drainer_memory_usage(&self, index: usize) -> Option<usize> {
        self.queues.get(index).map(|queue| queue.memory_usage())
    }

    /// Total accounted bytes buffered across all drainers.
    pub fn total_memory_usage(&self) -> usize {
        self.queues.iter().map(|queue| queue.memory_usage()).sum()
    }

    /// Total remaining byte capacity across all drainers.
    pub fn total_remaining_memory(&self) -> usize {
        self.queues.iter().map(|queue| queue.remaining()).sum()
    }

    /// Smallest per-drainer memory usage.
    pub fn min_memory_usage_per_drainer(&self) -> usize {
        self.queues
            .iter()
            .map(|queue| queue.memory_usage())
            .min()
            .unwrap_or(0)
    }

    /// Largest per-drainer memory usage.
    ///
    /// When any queue is above the slow-drainer threshold this also emits a
    /// diagnostic burst — per drainer, the slowest shards by cumulative
    /// processing time (top 5 for slow drainers, top 1 otherwise), the shard
    /// count and memory usage — and then **clears every drainer's
    /// processing-time counters**. Calling it marks a sampling interval;
    /// callers that only want the number without resetting the counters
    /// must not rely on the counters afterwards.
    pub fn max_memory_usage_per_drainer(&self) -> usize {
        let usages: Vec<usize> = self.queues.iter().map(|queue| queue.memory_usage()).collect();
        let max_usage = usages.iter().copied().max().unwrap_or(0);

        let threshold =
            self.config.slow_drainer_threshold * self.config.capacity_per_drainer_bytes as f64;
        let slow_drainer_exists = usages.iter().any(|&usage| usage as f64 > threshold);
        if !slow_drainer_exists {
            return max_usage;
        }

        for (index, drainer) in self.drainers.iter().enumerate() {
            let usage = usages[index];
            let top = if usage as f64 > threshold { 5 } else { 1 };
            let mut entries = drainer.time_spent_snapshot();
            entries.sort_by(|a, b| b.1.cmp(&a.1));
            for (shard, spent) in entries.iter().take(top) {
                info!(
                    drainer = index,
                    shard = %shard,
                    spent_ms = spent.as_millis() as u64,
                    "Cumulative processing time for shard"
                );
            }
            info!(
                drainer = index,
                shards = entries.len(),
                memory_usage = usage,
                "Drainer utilization snapshot"
            );
            drainer.clear_time_spent();
        }

        max_usage
    }

    fn ensure_started(&self, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state != ServiceState::Started {
            return Err(Error::InvalidState {
                operation,
                state: state.as_str(),
            });
        }
        Ok(())
    }

    fn transition(
        &self,
        from: ServiceState,
        to: ServiceState,
        operation: &'static str,
    ) -> Result<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|actual| Error::InvalidState {
                operation,
                state: ServiceState::from_u8(actual).as_str(),
            })?;
        Ok(())
    }
}

impl Drop for BufferService {
    fn drop(&mut self) {
        if self.state() == ServiceState::Started {
            let _ = self.stop();
        }
    }
}

impl std::fmt::Debug for BufferService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferService")
            .field("state", &self.state())
            .field("drainer_count", &self.drainers.len())
            .field("total_memory_usage", &self.total_memory_usage())
            .finish()
    }
}
