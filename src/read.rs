//! Point reads that honor record TTLs. Tombstones left by replayed removes
//! read as absent.

use std::sync::Arc;

use crate::clock::Clock;
use crate::encoding::{format, value};
use crate::engine::Engine;
use crate::error::Result;
use crate::metrics::ReplicaMetrics;

/// Remaining lifetime of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The record never expires.
    Forever,
    /// Seconds until the record expires.
    Seconds(u32),
}

impl Ttl {
    /// Wire form: `-1` for no TTL.
    pub fn as_i32(self) -> i32 {
        match self {
            Ttl::Forever => -1,
            Ttl::Seconds(secs) => i32::try_from(secs).unwrap_or(i32::MAX),
        }
    }
}

#[derive(Clone)]
pub struct ReadService {
    engine: Arc<dyn Engine>,
    clock: Arc<dyn Clock>,
    metrics: Arc<ReplicaMetrics>,
}

impl ReadService {
    pub fn new(
        engine: Arc<dyn Engine>,
        clock: Arc<dyn Clock>,
        metrics: Arc<ReplicaMetrics>,
    ) -> Self {
        Self {
            engine,
            clock,
            metrics,
        }
    }

    /// Payload stored under `raw_key`, `None` when absent or expired.
    pub fn get(&self, raw_key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(raw) = self.live_record(raw_key)? else {
            return Ok(None);
        };
        let record = value::decode(&raw)?;
        self.metrics.add_read_cu((raw_key.len() + record.payload.len()) as u64);
        Ok(Some(record.payload.to_vec()))
    }

    /// Remaining TTL of `raw_key`, `None` when absent or expired.
    pub fn ttl(&self, raw_key: &[u8]) -> Result<Option<Ttl>> {
        let Some(raw) = self.live_record(raw_key)? else {
            return Ok(None);
        };
        let expire_ts = value::extract_expire_ts(&raw)?;
        self.metrics.add_read_cu(raw_key.len() as u64);
        if expire_ts == 0 {
            return Ok(Some(Ttl::Forever));
        }
        Ok(Some(Ttl::Seconds(expire_ts.saturating_sub(self.clock.now_secs()))))
    }

    fn live_record(&self, raw_key: &[u8]) -> Result<Option<Vec<u8>>> {
        let raw = self.engine.get(raw_key).inspect_err(|e| {
            tracing::error!(key = %format::storage_key(raw_key), error = %e, "Get failed");
        })?;
        let Some(raw) = raw else {
            self.metrics.add_read_cu(raw_key.len() as u64);
            return Ok(None);
        };
        let (expired, tombstone) = {
            let record = value::decode(&raw)?;
            (
                value::is_expired(self.clock.now_secs(), record.expire_ts),
                record.is_tombstone(),
            )
        };
        if expired || tombstone {
            if expired {
                self.metrics.inc_expired();
            }
            self.metrics.add_read_cu(raw_key.len() as u64);
            return Ok(None);
        }
        Ok(Some(raw))
    }
}
