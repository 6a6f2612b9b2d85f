//! End-to-end scenarios for the buffer-and-drain engine.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use sluice_core::{
    BufferConfig, BufferService, ConsumedRecord, Error, IngestError, IngestionTask, Offset,
    PartitionId, PersistedFuture, ProducedRecord, Topic, TopicPartition,
};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Reusable open/closed latch for holding `process_record` hostage.
struct Gate {
    open: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    fn open(&self) {
        *self.open.lock() = true;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.condvar.wait(&mut open);
        }
    }
}

#[derive(Default)]
struct RecordingTask {
    processed: Mutex<Vec<(TopicPartition, Offset)>>,
    delay: Duration,
    gate: Option<Arc<Gate>>,
    fail_offsets: Vec<Offset>,
    panic_offsets: Vec<Offset>,
    last_error: Mutex<Option<IngestError>>,
}

impl RecordingTask {
    fn processed_offsets(&self) -> Vec<Offset> {
        self.processed
            .lock()
            .iter()
            .map(|(_, offset)| *offset)
            .collect()
    }
}

impl IngestionTask for RecordingTask {
    fn process_record(
        &self,
        record: &ConsumedRecord,
        _produced: Option<&Arc<dyn ProducedRecord>>,
    ) -> Result<(), IngestError> {
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.panic_offsets.contains(&record.offset) {
            panic!("poisoned record at offset {}", record.offset);
        }
        if self.fail_offsets.contains(&record.offset) {
            return Err(IngestError::Storage {
                message: format!("write rejected at offset {}", record.offset),
            });
        }
        self.processed
            .lock()
            .push((record.topic_partition(), record.offset));
        Ok(())
    }

    fn set_last_drainer_error(&self, error: IngestError) {
        *self.last_error.lock() = Some(error);
    }
}

fn topic(name: &str) -> Topic {
    Topic::new(name).expect("valid topic")
}

fn record(topic_name: &str, partition: u32, offset: u64, payload_len: usize) -> ConsumedRecord {
    ConsumedRecord::new(
        topic(topic_name),
        PartitionId(partition),
        Offset::new(offset),
        None,
        Bytes::from(vec![0u8; payload_len]),
    )
}

fn test_config() -> BufferConfig {
    BufferConfig {
        drainer_count: 4,
        capacity_per_drainer_bytes: 64 * 1024,
        notify_delta_bytes: 0,
        drain_retry_budget: 2000,
        drain_sleep_interval: Duration::from_millis(1),
        record_overhead_bytes: 0,
        ..BufferConfig::default()
    }
}

fn started(config: BufferConfig) -> BufferService {
    let service = BufferService::new(config).expect("valid config");
    service.start().expect("start");
    service
}

#[test]
fn test_ordering_per_partition_under_slow_processing() {
    let service = started(test_config());
    let task = Arc::new(RecordingTask {
        delay: Duration::from_millis(10),
        ..RecordingTask::default()
    });

    for offset in 1..=3 {
        service
            .enqueue(record("t", 0, offset, 64), Arc::clone(&task) as Arc<dyn IngestionTask>, None)
            .expect("enqueue");
    }

    service
        .drain_partition(&topic("t"), PartitionId(0))
        .expect("drain");
    assert_eq!(
        task.processed_offsets(),
        vec![Offset::new(1), Offset::new(2), Offset::new(3)]
    );
    service.stop().expect("stop");
}

#[test]
fn test_per_record_failure_isolation() {
    let service = started(test_config());
    let task = Arc::new(RecordingTask {
        fail_offsets: vec![Offset::new(2)],
        ..RecordingTask::default()
    });

    let (handle_one, receiver_one) = PersistedFuture::channel();
    let (handle_two, receiver_two) = PersistedFuture::channel();
    let (handle_three, receiver_three) = PersistedFuture::channel();
    for (offset, handle) in [(1, handle_one), (2, handle_two), (3, handle_three)] {
        service
            .enqueue(
                record("t", 0, offset, 64),
                Arc::clone(&task) as Arc<dyn IngestionTask>,
                Some(handle as Arc<dyn ProducedRecord>),
            )
            .expect("enqueue");
    }

    assert!(receiver_one.blocking_recv().expect("completed").is_ok());
    assert!(matches!(
        receiver_two.blocking_recv().expect("completed"),
        Err(IngestError::Storage { .. })
    ));
    assert!(receiver_three.blocking_recv().expect("completed").is_ok());

    assert_eq!(task.processed_offsets(), vec![Offset::new(1), Offset::new(3)]);
    assert!(matches!(
        task.last_error.lock().clone(),
        Some(IngestError::Storage { .. })
    ));
    // The drainer survived the failure.
    assert_eq!(service.live_drainer_count(), service.drainer_count());
    service.stop().expect("stop");
}

#[test]
fn test_backpressure_blocks_third_enqueue() {
    let gate = Gate::new();
    let service = started(BufferConfig {
        drainer_count: 1,
        capacity_per_drainer_bytes: 1000,
        ..test_config()
    });
    let task = Arc::new(RecordingTask {
        gate: Some(Arc::clone(&gate)),
        ..RecordingTask::default()
    });

    // Topic "t" is one byte, so each record accounts for exactly 400 bytes.
    for offset in 1..=2 {
        service
            .enqueue(record("t", 0, offset, 399), Arc::clone(&task) as Arc<dyn IngestionTask>, None)
            .expect("enqueue");
    }

    let (done_tx, done_rx) = mpsc::channel();
    let blocked_service = Arc::new(service);
    let producer_service = Arc::clone(&blocked_service);
    let producer_task = Arc::clone(&task) as Arc<dyn IngestionTask>;
    let producer = thread::spawn(move || {
        producer_service
            .enqueue(record("t", 0, 3, 399), producer_task, None)
            .expect("enqueue");
        done_tx.send(()).expect("send");
    });

    // 3 x 400 bytes exceeds the 1000-byte ceiling; the third put must block.
    assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());

    gate.open();
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("third enqueue unblocked once processing resumed");
    producer.join().expect("join");

    blocked_service
        .drain_partition(&topic("t"), PartitionId(0))
        .expect("drain");
    assert_eq!(task.processed.lock().len(), 3);
    blocked_service.stop().expect("stop");
}

#[test]
fn test_drain_barrier_waits_for_processing_to_finish() {
    let service = started(test_config());
    let task = Arc::new(RecordingTask {
        delay: Duration::from_millis(20),
        ..RecordingTask::default()
    });

    for offset in 1..=5 {
        service
            .enqueue(record("t", 0, offset, 64), Arc::clone(&task) as Arc<dyn IngestionTask>, None)
            .expect("enqueue");
    }

    service
        .drain_partition(&topic("t"), PartitionId(0))
        .expect("drain");
    // Success means the fifth record finished processing, not merely that
    // the queue looked empty while it was still in flight.
    assert_eq!(task.processed.lock().len(), 5);
    service.stop().expect("stop");
}

#[test]
fn test_drain_barrier_times_out_on_stuck_processor() {
    let gate = Gate::new();
    let service = started(BufferConfig {
        drain_retry_budget: 3,
        ..test_config()
    });
    let task = Arc::new(RecordingTask {
        gate: Some(Arc::clone(&gate)),
        ..RecordingTask::default()
    });

    service
        .enqueue(record("t", 0, 1, 64), Arc::clone(&task) as Arc<dyn IngestionTask>, None)
        .expect("enqueue");

    let result = service.drain_partition(&topic("t"), PartitionId(0));
    assert!(matches!(
        result,
        Err(Error::DrainTimeout { retries: 3, .. })
    ));

    gate.open();
    service.stop().expect("stop");
}

#[test]
fn test_second_drain_returns_immediately() {
    let service = started(test_config());
    let task = Arc::new(RecordingTask::default());

    for offset in 1..=3 {
        service
            .enqueue(record("t", 0, offset, 64), Arc::clone(&task) as Arc<dyn IngestionTask>, None)
            .expect("enqueue");
    }
    service
        .drain_partition(&topic("t"), PartitionId(0))
        .expect("first drain");
    service
        .drain_partition(&topic("t"), PartitionId(0))
        .expect("second drain on a quiescent shard");
    service.stop().expect("stop");
}

#[test]
fn test_single_drainer_serializes_all_shards() {
    let service = started(BufferConfig {
        drainer_count: 1,
        ..test_config()
    });
    let task = Arc::new(RecordingTask {
        delay: Duration::from_millis(2),
        ..RecordingTask::default()
    });

    let shards = [("alpha", 0), ("beta", 1), ("alpha", 2)];
    let mut offset = 0;
    let mut expected = Vec::new();
    for _ in 0..3 {
        for (topic_name, partition) in shards {
            offset += 1;
            expected.push(Offset::new(offset));
            service
                .enqueue(
                    record(topic_name, partition, offset, 64),
                    Arc::clone(&task) as Arc<dyn IngestionTask>,
                    None,
                )
                .expect("enqueue");
        }
    }

    for (topic_name, partition) in shards {
        service
            .drain_partition(&topic(topic_name), PartitionId(partition))
            .expect("drain");
    }
    // One queue, one worker: enqueue order is processing order globally.
    assert_eq!(task.processed_offsets(), expected);
    service.stop().expect("stop");
}

#[test]
fn test_graceful_drain_processes_every_record() {
    let service = started(test_config());
    let task = Arc::new(RecordingTask::default());

    let partitions = [0u32, 1, 2];
    let per_partition = 7u64;
    for partition in partitions {
        for offset in 0..per_partition {
            service
                .enqueue(
                    record("records_storeA_v3", partition, offset, 128),
                    Arc::clone(&task) as Arc<dyn IngestionTask>,
                    None,
                )
                .expect("enqueue");
        }
    }

    for partition in partitions {
        service
            .drain_partition(&topic("records_storeA_v3"), PartitionId(partition))
            .expect("drain");
    }

    let processed = task.processed.lock();
    assert_eq!(processed.len(), partitions.len() * per_partition as usize);
    for partition in partitions {
        let shard_offsets: Vec<Offset> = processed
            .iter()
            .filter(|(shard, _)| shard.partition == PartitionId(partition))
            .map(|(_, offset)| *offset)
            .collect();
        let expected: Vec<Offset> = (0..per_partition).map(Offset::new).collect();
        assert_eq!(shard_offsets, expected, "partition {partition} out of order");
    }
    drop(processed);
    service.stop().expect("stop");
}

#[test]
fn test_panicking_task_kills_only_its_drainer() {
    let service = started(test_config());
    let poisoned = Arc::new(RecordingTask {
        panic_offsets: vec![Offset::new(1)],
        ..RecordingTask::default()
    });
    let healthy = Arc::new(RecordingTask::default());

    // Pick two topics that route to different drainers.
    let poisoned_topic = topic("poisoned");
    let mut healthy_topic = None;
    for candidate in ["a", "b", "c", "d", "e", "f"] {
        if service.drainer_index_for(&topic(candidate), PartitionId(0))
            != service.drainer_index_for(&poisoned_topic, PartitionId(0))
        {
            healthy_topic = Some(topic(candidate));
            break;
        }
    }
    let healthy_topic = healthy_topic.expect("a topic on another drainer");

    service
        .enqueue(
            record("poisoned", 0, 1, 64),
            Arc::clone(&poisoned) as Arc<dyn IngestionTask>,
            None,
        )
        .expect("enqueue");
    service
        .drain_partition(&poisoned_topic, PartitionId(0))
        .expect("poisoned shard drains once the record is dropped");
    assert_eq!(service.live_drainer_count(), service.drainer_count() - 1);

    // The rest of the pool keeps flowing.
    service
        .enqueue(
            ConsumedRecord::new(
                healthy_topic.clone(),
                PartitionId(0),
                Offset::new(1),
                None,
                Bytes::from_static(b"payload"),
            ),
            Arc::clone(&healthy) as Arc<dyn IngestionTask>,
            None,
        )
        .expect("enqueue");
    service
        .drain_partition(&healthy_topic, PartitionId(0))
        .expect("drain");
    assert_eq!(healthy.processed.lock().len(), 1);

    service.stop().expect("stop");
}

#[test]
fn test_lifecycle_misuse_is_rejected() {
    let service = BufferService::new(test_config()).expect("valid config");
    let task = Arc::new(RecordingTask::default());

    let before_start = service.enqueue(record("t", 0, 1, 64), Arc::clone(&task) as Arc<dyn IngestionTask>, None);
    assert!(matches!(before_start, Err(Error::InvalidState { .. })));
    assert!(matches!(
        service.drain_partition(&topic("t"), PartitionId(0)),
        Err(Error::InvalidState { .. })
    ));

    service.start().expect("start");
    service.stop().expect("stop");

    let after_stop = service.enqueue(record("t", 0, 1, 64), Arc::clone(&task) as Arc<dyn IngestionTask>, None);
    assert!(matches!(after_stop, Err(Error::InvalidState { .. })));
}

#[test]
fn test_oversized_record_rejected_at_enqueue() {
    let service = started(BufferConfig {
        capacity_per_drainer_bytes: 256,
        ..test_config()
    });
    let task = Arc::new(RecordingTask::default());

    let result = service.enqueue(record("t", 0, 1, 512), Arc::clone(&task) as Arc<dyn IngestionTask>, None);
    assert!(matches!(result, Err(Error::RecordTooLarge { .. })));
    assert_eq!(service.total_memory_usage(), 0);
    service.stop().expect("stop");
}

#[test]
fn test_memory_observers_track_buffered_records() {
    let gate = Gate::new();
    let service = started(BufferConfig {
        drainer_count: 1,
        capacity_per_drainer_bytes: 4096,
        ..test_config()
    });
    let task = Arc::new(RecordingTask {
        gate: Some(Arc::clone(&gate)),
        ..RecordingTask::default()
    });

    for offset in 1..=4 {
        service
            .enqueue(record("t", 0, offset, 99), Arc::clone(&task) as Arc<dyn IngestionTask>, None)
            .expect("enqueue");
    }

    // Four records of 100 accounted bytes each, queued or in flight.
    assert_eq!(service.total_memory_usage(), 400);
    assert_eq!(service.per_drainer_memory_usage(0), Some(400));
    assert_eq!(service.max_memory_usage_per_drainer(), 400);
    assert_eq!(service.min_memory_usage_per_drainer(), 400);
    assert_eq!(service.total_remaining_memory(), 4096 - 400);

    gate.open();
    service
        .drain_partition(&topic("t"), PartitionId(0))
        .expect("drain");
    assert_eq!(service.total_memory_usage(), 0);
    service.stop().expect("stop");
}
