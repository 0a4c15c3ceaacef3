//! Accumulation of engine writes under one decree.
//!
//! A [`WriteBatch`] is owned by the write service and reused for every
//! decree. It is only reachable through a [`BatchScope`], which clears it on
//! every exit path, so operations accumulated for one decree can never leak
//! into the next one.

use std::time::Instant;

use super::context::WriteContext;
use super::request::{ResponseHeader, UpdateRequest, UpdateResponse};
use crate::encoding::{format, value};
use crate::engine::{BatchOp, Engine};
use crate::error::{Error, Result, Status};
use crate::metrics::ReplicaMetrics;

/// Reusable buffer of engine mutations.
#[derive(Debug)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    bytes: usize,
    max_bytes: usize,
}

impl WriteBatch {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            ops: Vec::new(),
            bytes: 0,
            max_bytes,
        }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.push(BatchOp::Put { key, value })
    }

    pub fn delete(&mut self, key: Vec<u8>) -> Result<()> {
        self.push(BatchOp::Delete { key })
    }

    fn push(&mut self, op: BatchOp) -> Result<()> {
        let size = op.size();
        if self.bytes + size > self.max_bytes {
            return Err(Error::engine(
                Status::Aborted,
                format!(
                    "write batch exceeds {} bytes ({} accumulated, {} more)",
                    self.max_bytes, self.bytes, size
                ),
            ));
        }
        self.bytes += size;
        self.ops.push(op);
        Ok(())
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Accumulated key and value bytes.
    pub fn size(&self) -> usize {
        self.bytes
    }

    /// Drops every op but keeps the allocation.
    pub fn clear(&mut self) {
        self.ops.clear();
        self.bytes = 0;
    }
}

/// Outcome of [`BatchScope::commit`].
#[derive(Debug)]
pub struct BatchCommit {
    /// One response per single put or remove registered in the scope, all
    /// carrying the commit status.
    pub responses: Vec<UpdateResponse>,
    pub result: Result<()>,
}

impl BatchCommit {
    pub fn into_result(self) -> Result<()> {
        self.result
    }
}

/// Borrow of the write batch for one decree. Dropping the scope without
/// committing discards everything accumulated in it.
pub struct BatchScope<'a> {
    batch: &'a mut WriteBatch,
    engine: &'a dyn Engine,
    metrics: &'a ReplicaMetrics,
    value_schema_version: u32,
    header: ResponseHeader,
    decree: i64,
    slots: usize,
    started: Instant,
    done: bool,
}

impl<'a> BatchScope<'a> {
    pub(super) fn new(
        batch: &'a mut WriteBatch,
        engine: &'a dyn Engine,
        metrics: &'a ReplicaMetrics,
        value_schema_version: u32,
        header: ResponseHeader,
    ) -> Self {
        // A scope always starts from an empty batch.
        batch.clear();
        let decree = header.decree;
        Self {
            batch,
            engine,
            metrics,
            value_schema_version,
            header,
            decree,
            slots: 0,
            started: Instant::now(),
            done: false,
        }
    }

    pub fn decree(&self) -> i64 {
        self.decree
    }

    /// Number of engine ops accumulated so far.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Accumulates a put of `payload` wrapped in the configured value schema.
    pub fn put_record(
        &mut self,
        key: &[u8],
        payload: &[u8],
        expire_ts: u32,
        timetag: u64,
    ) -> Result<()> {
        let value = value::encode(self.value_schema_version, payload, expire_ts, timetag)?;
        self.batch.put(key.to_vec(), value).inspect_err(|e| {
            tracing::error!(
                decree = self.decree,
                key = %format::storage_key(key),
                expire_ts,
                error = %e,
                "Write batch put failed"
            );
        })
    }

    pub fn delete_record(&mut self, key: &[u8]) -> Result<()> {
        self.batch.delete(key.to_vec()).inspect_err(|e| {
            tracing::error!(
                decree = self.decree,
                key = %format::storage_key(key),
                error = %e,
                "Write batch delete failed"
            );
        })
    }

    /// Accumulates a remove that keeps `timetag` under `key`. Schema versions
    /// without a timetag can only drop the key.
    pub fn put_tombstone(&mut self, key: &[u8], timetag: u64) -> Result<()> {
        if self.value_schema_version < value::VERSION_1 {
            return self.delete_record(key);
        }
        self.put_record(key, &[], 0, timetag)
    }

    /// Accumulates the empty record that advances the decree when nothing
    /// else is written.
    pub fn put_placeholder(&mut self) -> Result<()> {
        self.put_record(&[], &[], 0, 0)
    }

    /// Accumulates a single put and registers a response slot for it.
    pub fn put(&mut self, ctx: &WriteContext, request: &UpdateRequest) -> Status {
        self.slots += 1;
        match self.put_record(
            &request.key,
            &request.value,
            request.expire_ts_seconds,
            ctx.timetag,
        ) {
            Ok(()) => Status::Ok,
            Err(e) => e.status(),
        }
    }

    /// Accumulates a single remove and registers a response slot for it.
    pub fn remove(&mut self, key: &[u8]) -> Status {
        self.slots += 1;
        match self.delete_record(key) {
            Ok(()) => Status::Ok,
            Err(e) => e.status(),
        }
    }

    /// Writes everything accumulated as one atomic engine write tagged with
    /// the decree. An empty scope still writes a placeholder.
    pub fn commit(mut self) -> BatchCommit {
        let result = self.flush();
        let status = match &result {
            Ok(()) => Status::Ok,
            Err(e) => e.status(),
        };
        let responses = self.fill_slots(status);
        self.finish();
        BatchCommit { responses, result }
    }

    /// Discards the batch; every registered slot reports `status`.
    pub fn abort(mut self, status: Status) -> Vec<UpdateResponse> {
        let responses = self.fill_slots(status);
        self.finish();
        responses
    }

    fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            self.put_placeholder()?;
        }

        self.engine
            .write(self.batch.ops(), self.decree)
            .inspect_err(|e| {
                tracing::error!(
                    decree = self.decree,
                    ops = self.batch.len(),
                    error = %e,
                    "Engine write failed"
                );
            })?;

        for op in self.batch.ops().iter().filter(|op| !op.key().is_empty()) {
            self.metrics.add_write_cu(op.size() as u64);
        }
        tracing::trace!(
            decree = self.decree,
            ops = self.batch.len(),
            bytes = self.batch.size(),
            elapsed = ?self.started.elapsed(),
            "Committed write batch"
        );
        Ok(())
    }

    fn fill_slots(&mut self, error: Status) -> Vec<UpdateResponse> {
        let responses = (0..self.slots)
            .map(|_| UpdateResponse {
                error,
                header: self.header.clone(),
            })
            .collect();
        self.slots = 0;
        responses
    }

    fn finish(&mut self) {
        self.batch.clear();
        self.done = true;
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if !self.done {
            tracing::debug!(
                decree = self.decree,
                ops = self.batch.len(),
                "Discarding uncommitted write batch"
            );
            self.batch.clear();
        }
    }
}
