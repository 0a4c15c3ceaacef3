use std::sync::Arc;

use crate::clock::Clock;
use crate::encoding::value;
use crate::engine::CompactionFilter;
use crate::metrics::ReplicaMetrics;

/// Drops records whose TTL has passed.
pub struct TtlCompactionFilter {
    clock: Arc<dyn Clock>,
    metrics: Arc<ReplicaMetrics>,
}

impl TtlCompactionFilter {
    pub fn new(clock: Arc<dyn Clock>, metrics: Arc<ReplicaMetrics>) -> Self {
        Self { clock, metrics }
    }
}

impl CompactionFilter for TtlCompactionFilter {
    fn name(&self) -> &'static str {
        "ttl_compaction_filter"
    }

    fn filter(&self, _key: &[u8], value: &[u8]) -> bool {
        // Undecodable values are kept; reads report them as corruption.
        let expired = value::is_record_expired(self.clock.now_secs(), value).unwrap_or(false);
        if expired {
            self.metrics.inc_filtered();
        }
        expired
    }
}
