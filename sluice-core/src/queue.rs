//! Byte-bounded blocking queue feeding a single drainer.
//!
//! Capacity is measured in accounted bytes of buffered payload, not element
//! count: a producer blocks in [`put`](MemoryBoundedQueue::put) while its
//! record would push usage past the ceiling, which is how the engine pushes
//! back on the upstream poller. Accounted bytes are charged when a record is
//! admitted and released only once the consumer has *finished processing* it
//! (when the [`TakenRecord`] guard drops), so a record stuck inside the
//! downstream task still counts against the ceiling.
//!
//! Exactly one consumer may take from a queue. The drainer pool guarantees
//! this by construction; behavior with concurrent consumers is unspecified.

use crate::record::IngestionRecord;
use crate::types::TopicPartition;
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;

struct QueueInner {
    records: VecDeque<IngestionRecord>,
    /// Accounted bytes of queued records plus the in-flight record
    used_bytes: usize,
    /// Shard of the record currently held by the consumer, if any
    in_flight: Option<TopicPartition>,
    closed: bool,
}

/// Blocking multi-producer, single-consumer FIFO bounded in payload bytes.
pub struct MemoryBoundedQueue {
    inner: Mutex<QueueInner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity_bytes: usize,
    notify_delta_bytes: usize,
}

impl MemoryBoundedQueue {
    /// Create a queue with the given byte capacity and producer wake-up
    /// granularity.
    pub fn new(capacity_bytes: usize, notify_delta_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                records: VecDeque::new(),
                used_bytes: 0,
                in_flight: None,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity_bytes,
            notify_delta_bytes,
        }
    }

    /// Enqueue a record, blocking while the queue is over capacity.
    ///
    /// The capacity check is strict: usage never exceeds the ceiling, even
    /// transiently, at any point observable by another thread.
    ///
    /// # Errors
    /// - [`Error::RecordTooLarge`] if the record alone exceeds the queue
    ///   capacity; the record is not enqueued and the queue is unchanged.
    /// - [`Error::Cancelled`] if the queue is closed before space becomes
    ///   available; the record is not enqueued.
    pub fn put(&self, record: IngestionRecord) -> Result<()> {
        let size = record.accounted_size();
        if size > self.capacity_bytes {
            return Err(Error::RecordTooLarge {
                size,
                capacity: self.capacity_bytes,
            });
        }

        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(Error::Cancelled { operation: "put" });
            }
            if inner.used_bytes + size <= self.capacity_bytes {
                break;
            }
            self.not_full.wait(&mut inner);
        }
        inner.used_bytes += size;
        inner.records.push_back(record);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the head record, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue has been closed. The returned guard
    /// keeps the record's shard registered as in flight and its bytes
    /// charged against capacity until the guard drops, so
    /// [`contains`](Self::contains) and the byte accounting both observe
    /// records that are still being processed.
    pub fn take(&self) -> Option<TakenRecord<'_>> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(record) = inner.records.pop_front() {
                inner.in_flight = Some(record.topic_partition().clone());
                return Some(TakenRecord {
                    queue: self,
                    size: record.accounted_size(),
                    record,
                });
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Whether any queued or in-flight record's shard satisfies the
    /// predicate.
    ///
    /// This is a point-in-time inclusion test under the queue lock: records
    /// enqueued after the scan are not observed. It is the primitive the
    /// drain barrier polls, with the caller responsible for first halting
    /// upstream production to the shard being drained.
    pub fn contains<P>(&self, predicate: P) -> bool
    where
        P: Fn(&TopicPartition) -> bool,
    {
        let inner = self.inner.lock();
        if inner.in_flight.as_ref().is_some_and(&predicate) {
            return true;
        }
        inner
            .records
            .iter()
            .any(|record| predicate(record.topic_partition()))
    }

    /// Accounted bytes currently charged, including the in-flight record.
    pub fn memory_usage(&self) -> usize {
        self.inner.lock().used_bytes
    }

    /// Bytes of capacity still available to producers.
    pub fn remaining(&self) -> usize {
        self.capacity_bytes - self.inner.lock().used_bytes
    }

    /// Configured byte capacity.
    pub fn capacity(&self) -> usize {
        self.capacity_bytes
    }

    /// Number of queued records, excluding the in-flight record.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Whether no records are queued. An in-flight record does not count.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Close the queue, waking every blocked producer and the consumer.
    ///
    /// Buffered records are discarded; the caller is responsible for having
    /// checkpointed offsets first. A record currently held by the consumer
    /// stays charged until its guard drops. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        let discarded: usize = inner
            .records
            .iter()
            .map(IngestionRecord::accounted_size)
            .sum();
        inner.records.clear();
        inner.used_bytes -= discarded;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Release an in-flight record's bytes and wake a producer if warranted.
    ///
    /// The wake-up policy dampens thundering herds: with a non-zero delta,
    /// one producer is woken when remaining capacity crosses the delta from
    /// below, or when usage reaches zero (so a record larger than the delta
    /// cannot strand). A zero delta wakes on every release.
    fn release(&self, size: usize) {
        let mut inner = self.inner.lock();
        inner.in_flight = None;
        let remaining_before = self.capacity_bytes - inner.used_bytes;
        inner.used_bytes -= size;
        let remaining_after = self.capacity_bytes - inner.used_bytes;

        let crossed = remaining_before < self.notify_delta_bytes
            && remaining_after >= self.notify_delta_bytes;
        if self.notify_delta_bytes == 0 || crossed || inner.used_bytes == 0 {
            self.not_full.notify_one();
        }
    }
}

impl fmt::Debug for MemoryBoundedQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryBoundedQueue")
            .field("capacity_bytes", &self.capacity_bytes)
            .field("notify_delta_bytes", &self.notify_delta_bytes)
            .field("used_bytes", &inner.used_bytes)
            .field("queued", &inner.records.len())
            .field("in_flight", &inner.in_flight)
            .field("closed", &inner.closed)
            .finish()
    }
}

/// A record checked out of a [`MemoryBoundedQueue`] by its consumer.
///
/// While the guard lives, the record's shard is reported by
/// [`MemoryBoundedQueue::contains`] and its bytes stay charged against the
/// queue's capacity. Dropping the guard releases both.
pub struct TakenRecord<'a> {
    queue: &'a MemoryBoundedQueue,
    record: IngestionRecord,
    size: usize,
}

impl Deref for TakenRecord<'_> {
    type Target = IngestionRecord;

    fn deref(&self) -> &IngestionRecord {
        &self.record
    }
}

impl Drop for TakenRecord<'_> {
    fn drop(&mut self) {
        self.queue.release(self.size);
    }
}

impl fmt::Debug for TakenRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TakenRecord")
            .field("record", &self.record)
            .finish()
    }
}
