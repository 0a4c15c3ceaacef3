//! Process-scoped counters of one replica.
//!
//! Counters are plain atomics owned by a [`ReplicaMetrics`] that is created
//! with the replica and handed to every component by `Arc`. Nothing here is a
//! global.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ReplicaConfig;
use crate::error::Result;
use crate::scheduler::{BackgroundTask, TaskContext};

/// Write operations that are counted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Put,
    MultiPut,
    Remove,
    MultiRemove,
    Incr,
    CheckAndSet,
    Duplicate,
}

impl WriteOp {
    const ALL: [WriteOp; 7] = [
        WriteOp::Put,
        WriteOp::MultiPut,
        WriteOp::Remove,
        WriteOp::MultiRemove,
        WriteOp::Incr,
        WriteOp::CheckAndSet,
        WriteOp::Duplicate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WriteOp::Put => "put",
            WriteOp::MultiPut => "multi_put",
            WriteOp::Remove => "remove",
            WriteOp::MultiRemove => "multi_remove",
            WriteOp::Incr => "incr",
            WriteOp::CheckAndSet => "check_and_set",
            WriteOp::Duplicate => "duplicate",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
struct OpCounter {
    count: AtomicU64,
    latency_ns: AtomicU64,
}

#[derive(Debug)]
pub struct ReplicaMetrics {
    ops: [OpCounter; 7],
    recent_expire_count: AtomicU64,
    recent_filter_count: AtomicU64,
    read_cu: AtomicU64,
    write_cu: AtomicU64,
    read_cu_size: u64,
    write_cu_size: u64,
    compact_enqueue_count: AtomicU64,
    compact_running_count: AtomicU64,
}

/// Point-in-time copy of [`ReplicaMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub op_counts: Vec<(&'static str, u64)>,
    pub recent_expire_count: u64,
    pub recent_filter_count: u64,
    pub read_cu: u64,
    pub write_cu: u64,
    pub compact_enqueue_count: u64,
    pub compact_running_count: u64,
}

impl ReplicaMetrics {
    pub fn new(read_cu_size: u64, write_cu_size: u64) -> Self {
        Self {
            ops: Default::default(),
            recent_expire_count: AtomicU64::new(0),
            recent_filter_count: AtomicU64::new(0),
            read_cu: AtomicU64::new(0),
            write_cu: AtomicU64::new(0),
            read_cu_size: read_cu_size.max(1),
            write_cu_size: write_cu_size.max(1),
            compact_enqueue_count: AtomicU64::new(0),
            compact_running_count: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ReplicaConfig) -> Self {
        Self::new(config.read_capacity_unit_size, config.write_capacity_unit_size)
    }

    pub fn record_op(&self, op: WriteOp, latency: Duration) {
        let counter = &self.ops[op.index()];
        counter.count.fetch_add(1, Ordering::Relaxed);
        counter
            .latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn op_count(&self, op: WriteOp) -> u64 {
        self.ops[op.index()].count.load(Ordering::Relaxed)
    }

    /// Mean latency of `op`, zero before the first call.
    pub fn mean_latency(&self, op: WriteOp) -> Duration {
        let counter = &self.ops[op.index()];
        let count = counter.count.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(counter.latency_ns.load(Ordering::Relaxed) / count)
    }

    /// Counts one read that found an expired record.
    pub fn inc_expired(&self) {
        self.recent_expire_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn expired_count(&self) -> u64 {
        self.recent_expire_count.load(Ordering::Relaxed)
    }

    /// Counts one record dropped by the TTL compaction filter.
    pub fn inc_filtered(&self) {
        self.recent_filter_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn filtered_count(&self) -> u64 {
        self.recent_filter_count.load(Ordering::Relaxed)
    }

    /// Adds at least one read capacity unit.
    pub fn add_read_cu(&self, data_len: u64) {
        self.read_cu
            .fetch_add(capacity_units(data_len, self.read_cu_size), Ordering::Relaxed);
    }

    /// Adds at least one write capacity unit.
    pub fn add_write_cu(&self, data_len: u64) {
        self.write_cu
            .fetch_add(capacity_units(data_len, self.write_cu_size), Ordering::Relaxed);
    }

    pub fn read_cu(&self) -> u64 {
        self.read_cu.load(Ordering::Relaxed)
    }

    pub fn write_cu(&self) -> u64 {
        self.write_cu.load(Ordering::Relaxed)
    }

    pub fn compact_enqueued(&self) {
        self.compact_enqueue_count.fetch_add(1, Ordering::SeqCst);
    }

    /// The enqueued compaction was dropped before it could run.
    pub fn compact_cancelled(&self) {
        self.compact_enqueue_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// The enqueued compaction left the queue and started running.
    pub fn compact_started(&self) {
        self.compact_enqueue_count.fetch_sub(1, Ordering::SeqCst);
        self.compact_running_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn compact_finished(&self) {
        self.compact_running_count.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            op_counts: WriteOp::ALL
                .iter()
                .map(|op| (op.name(), self.op_count(*op)))
                .collect(),
            recent_expire_count: self.expired_count(),
            recent_filter_count: self.filtered_count(),
            read_cu: self.read_cu(),
            write_cu: self.write_cu(),
            compact_enqueue_count: self.compact_enqueue_count.load(Ordering::SeqCst),
            compact_running_count: self.compact_running_count.load(Ordering::SeqCst),
        }
    }
}

fn capacity_units(data_len: u64, unit_size: u64) -> u64 {
    data_len.div_ceil(unit_size).max(1)
}

/// Periodically logs a metrics snapshot.
pub struct MetricsTask {
    metrics: Arc<ReplicaMetrics>,
    interval: Duration,
}

impl MetricsTask {
    pub fn new(metrics: Arc<ReplicaMetrics>, interval: Duration) -> Self {
        Self { metrics, interval }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for MetricsTask {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, ctx: TaskContext) -> Result<()> {
        let snapshot = self.metrics.snapshot();
        tracing::info!(
            tick = ctx.tick,
            ops = ?snapshot.op_counts,
            recent_expire_count = snapshot.recent_expire_count,
            recent_filter_count = snapshot.recent_filter_count,
            read_cu = snapshot.read_cu,
            write_cu = snapshot.write_cu,
            compact_enqueue_count = snapshot.compact_enqueue_count,
            compact_running_count = snapshot.compact_running_count,
            "Replica metrics"
        );
        Ok(())
    }
}
