//! Configuration for the buffer-and-drain engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`BufferService`](crate::service::BufferService).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Number of drainer workers; also the routing hash modulus
    pub drainer_count: usize,

    /// Hard byte ceiling for each drainer queue
    pub capacity_per_drainer_bytes: usize,

    /// Wake-up granularity for producers blocked on a full queue
    pub notify_delta_bytes: usize,

    /// Number of probe attempts before the drain barrier gives up
    pub drain_retry_budget: u32,

    /// Delay between drain barrier probes
    pub drain_sleep_interval: Duration,

    /// Queue utilization fraction above which a drainer is reported slow
    pub slow_drainer_threshold: f64,

    /// Maximum wait for worker threads to terminate during stop
    pub stop_timeout: Duration,

    /// Accounting overhead added to every record's payload size, covering
    /// struct and queue-node memory the payload bytes do not
    pub record_overhead_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            drainer_count: 8,
            capacity_per_drainer_bytes: 32 * 1024 * 1024,
            notify_delta_bytes: 1024,
            drain_retry_budget: 1000,
            drain_sleep_interval: Duration::from_millis(50),
            slow_drainer_threshold: 0.8,
            stop_timeout: Duration::from_secs(10),
            record_overhead_bytes: 256,
        }
    }
}

impl BufferConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns an error if any field is outside its supported range.
    pub fn validate(&self) -> crate::Result<()> {
        if self.drainer_count == 0 {
            return Err(crate::Error::InvalidConfig {
                message: "drainer_count must be at least 1".to_string(),
            });
        }
        if self.capacity_per_drainer_bytes == 0 {
            return Err(crate::Error::InvalidConfig {
                message: "capacity_per_drainer_bytes must be at least 1".to_string(),
            });
        }
        if self.notify_delta_bytes > self.capacity_per_drainer_bytes {
            return Err(crate::Error::InvalidConfig {
                message: format!(
                    "notify_delta_bytes ({}) cannot exceed capacity_per_drainer_bytes ({})",
                    self.notify_delta_bytes, self.capacity_per_drainer_bytes
                ),
            });
        }
        if !(self.slow_drainer_threshold > 0.0 && self.slow_drainer_threshold <= 1.0) {
            return Err(crate::Error::InvalidConfig {
                message: format!(
                    "slow_drainer_threshold must be in (0, 1], got {}",
                    self.slow_drainer_threshold
                ),
            });
        }
        Ok(())
    }
}
