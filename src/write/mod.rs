//! Application of replicated mutations to the engine.
//!
//! Each operation consumes the decree the replication layer assigned to it
//! and produces exactly one atomic engine write for that decree. Requests
//! rejected by validation still write an empty placeholder record, so the
//! engine's last applied decree never falls behind the replicated log.
//!
//! Operations return `Err` only for engine faults. Validation failures and
//! check-and-set conflicts are reported through the response `error` field.

pub mod batch;
pub mod cas;
pub mod context;
mod duplicate;
pub mod request;

use std::sync::Arc;
use std::time::Instant;

use crate::clock::Clock;
use crate::config::ReplicaConfig;
use crate::encoding::{format, key, value};
use crate::engine::Engine;
use crate::error::{Error, Result, Status};
use crate::metrics::{ReplicaMetrics, WriteOp};

pub use batch::{BatchCommit, BatchScope, WriteBatch};
pub use cas::CasCheckType;
pub use context::WriteContext;
pub use request::{
    CheckAndSetRequest, CheckAndSetResponse, DuplicateRequest, DuplicateResponse,
    DuplicatedWrite, IncrRequest, IncrResponse, KeyValue, MultiPutRequest, MultiRemoveRequest,
    MultiRemoveResponse, ResponseHeader, UpdateRequest, UpdateResponse, WriteRequest,
    WriteResponse,
};

/// Write path of one replica. Not shared: the replication layer applies
/// decrees one at a time, in order.
pub struct WriteService {
    engine: Arc<dyn Engine>,
    batch: WriteBatch,
    value_schema_version: u32,
    app_id: i32,
    partition_index: i32,
    primary_address: String,
    clock: Arc<dyn Clock>,
    metrics: Arc<ReplicaMetrics>,
}

impl WriteService {
    pub fn new(
        config: &ReplicaConfig,
        engine: Arc<dyn Engine>,
        clock: Arc<dyn Clock>,
        metrics: Arc<ReplicaMetrics>,
    ) -> Self {
        Self {
            engine,
            batch: WriteBatch::new(config.max_write_batch_bytes),
            value_schema_version: config.value_schema_version,
            app_id: config.app_id,
            partition_index: config.partition_index,
            primary_address: config.primary_address.clone(),
            clock,
            metrics,
        }
    }

    /// Response envelope for a write at `decree`.
    pub fn header(&self, decree: i64) -> ResponseHeader {
        ResponseHeader {
            app_id: self.app_id,
            partition_index: self.partition_index,
            decree,
            server: self.primary_address.clone(),
        }
    }

    /// Opens the batch of `decree`. Single puts and removes accumulated in
    /// the scope are applied together on [`BatchScope::commit`].
    pub fn begin_batch(&mut self, decree: i64) -> BatchScope<'_> {
        let header = self.header(decree);
        BatchScope::new(
            &mut self.batch,
            self.engine.as_ref(),
            self.metrics.as_ref(),
            self.value_schema_version,
            header,
        )
    }

    /// Writes only a placeholder record at `decree`.
    pub fn empty_put(&mut self, decree: i64) -> Result<()> {
        let mut scope = self.begin_batch(decree);
        scope.put_placeholder()?;
        scope.commit().into_result()
    }

    pub fn put(&mut self, ctx: &WriteContext, request: &UpdateRequest) -> Result<UpdateResponse> {
        self.timed(WriteOp::Put, |this| {
            this.single_update(ctx.decree, |scope| scope.put(ctx, request))
        })
    }

    pub fn remove(&mut self, ctx: &WriteContext, key: &[u8]) -> Result<UpdateResponse> {
        self.timed(WriteOp::Remove, |this| {
            this.single_update(ctx.decree, |scope| scope.remove(key))
        })
    }

    /// Writes one put or remove as the whole batch of `decree`. A write that
    /// cannot be accumulated is an engine fault, like a failed commit.
    fn single_update(
        &mut self,
        decree: i64,
        accumulate: impl FnOnce(&mut BatchScope<'_>) -> Status,
    ) -> Result<UpdateResponse> {
        let mut scope = self.begin_batch(decree);
        let status = accumulate(&mut scope);
        if !status.is_ok() {
            scope.abort(status);
            return Err(Error::engine(
                status,
                format!("accumulating single write of decree {}", decree),
            ));
        }

        let commit = scope.commit();
        commit.result?;
        commit.responses.into_iter().next().ok_or_else(|| {
            Error::InvalidState(format!("no response slot for decree {}", decree))
        })
    }

    pub fn multi_put(
        &mut self,
        ctx: &WriteContext,
        request: &MultiPutRequest,
    ) -> Result<UpdateResponse> {
        self.timed(WriteOp::MultiPut, |this| this.multi_put_impl(ctx, request))
    }

    fn multi_put_impl(
        &mut self,
        ctx: &WriteContext,
        request: &MultiPutRequest,
    ) -> Result<UpdateResponse> {
        let mut resp = UpdateResponse {
            header: self.header(ctx.decree),
            ..Default::default()
        };

        if request.kvs.is_empty() {
            tracing::error!(
                decree = ctx.decree,
                hash_key = %format::bytes(&request.hash_key),
                "Invalid multi_put: request.kvs is empty"
            );
            resp.error = Status::InvalidArgument;
            self.empty_put(ctx.decree)?;
            return Ok(resp);
        }

        let mut scope = self.begin_batch(ctx.decree);
        for kv in &request.kvs {
            let raw_key = key::build(&request.hash_key, &kv.key)?;
            scope.put_record(&raw_key, &kv.value, request.expire_ts_seconds, ctx.timetag)?;
        }
        scope.commit().into_result()?;
        Ok(resp)
    }

    pub fn multi_remove(
        &mut self,
        ctx: &WriteContext,
        request: &MultiRemoveRequest,
    ) -> Result<MultiRemoveResponse> {
        self.timed(WriteOp::MultiRemove, |this| {
            this.multi_remove_impl(ctx, request)
        })
    }

    fn multi_remove_impl(
        &mut self,
        ctx: &WriteContext,
        request: &MultiRemoveRequest,
    ) -> Result<MultiRemoveResponse> {
        let mut resp = MultiRemoveResponse {
            header: self.header(ctx.decree),
            ..Default::default()
        };

        if request.sort_keys.is_empty() {
            tracing::error!(
                decree = ctx.decree,
                hash_key = %format::bytes(&request.hash_key),
                "Invalid multi_remove: request.sort_keys is empty"
            );
            resp.error = Status::InvalidArgument;
            self.empty_put(ctx.decree)?;
            return Ok(resp);
        }

        let mut scope = self.begin_batch(ctx.decree);
        for sort_key in &request.sort_keys {
            scope.delete_record(&key::build(&request.hash_key, sort_key)?)?;
        }
        scope.commit().into_result()?;
        resp.count = request.sort_keys.len() as u64;
        Ok(resp)
    }

    pub fn incr(&mut self, ctx: &WriteContext, request: &IncrRequest) -> Result<IncrResponse> {
        self.timed(WriteOp::Incr, |this| this.incr_impl(ctx, request))
    }

    fn incr_impl(&mut self, ctx: &WriteContext, request: &IncrRequest) -> Result<IncrResponse> {
        let mut resp = IncrResponse {
            header: self.header(ctx.decree),
            ..Default::default()
        };

        let stored = self.engine.get(&request.key).inspect_err(|e| {
            tracing::error!(
                decree = ctx.decree,
                key = %format::storage_key(&request.key),
                error = %e,
                "Get for incr failed"
            );
        })?;

        let (old_value, expire_ts) = match stored {
            None => (0, 0),
            Some(raw) => {
                let record = value::decode(&raw)?;
                if value::is_expired(self.clock.now_secs(), record.expire_ts) {
                    // An expired record restarts from zero without a TTL.
                    self.metrics.inc_expired();
                    (0, 0)
                } else if record.is_tombstone() {
                    (0, 0)
                } else if record.payload.is_empty() {
                    (0, record.expire_ts)
                } else {
                    match parse_i64(record.payload) {
                        Some(old) => (old, record.expire_ts),
                        None => {
                            tracing::error!(
                                decree = ctx.decree,
                                key = %format::storage_key(&request.key),
                                "Incr failed: old value is not an integer or out of range"
                            );
                            resp.error = Status::InvalidArgument;
                            self.empty_put(ctx.decree)?;
                            return Ok(resp);
                        }
                    }
                }
            }
        };

        let Some(new_value) = old_value.checked_add(request.increment) else {
            tracing::error!(
                decree = ctx.decree,
                key = %format::storage_key(&request.key),
                old_value,
                increment = request.increment,
                "Incr failed: new value is out of range"
            );
            resp.error = Status::InvalidArgument;
            resp.new_value = old_value;
            self.empty_put(ctx.decree)?;
            return Ok(resp);
        };

        let mut scope = self.begin_batch(ctx.decree);
        scope.put_record(
            &request.key,
            new_value.to_string().as_bytes(),
            expire_ts,
            ctx.timetag,
        )?;
        scope.commit().into_result()?;
        resp.new_value = new_value;
        Ok(resp)
    }

    pub fn check_and_set(
        &mut self,
        ctx: &WriteContext,
        request: &CheckAndSetRequest,
    ) -> Result<CheckAndSetResponse> {
        self.timed(WriteOp::CheckAndSet, |this| {
            this.check_and_set_impl(ctx, request)
        })
    }

    fn check_and_set_impl(
        &mut self,
        ctx: &WriteContext,
        request: &CheckAndSetRequest,
    ) -> Result<CheckAndSetResponse> {
        let mut resp = CheckAndSetResponse {
            header: self.header(ctx.decree),
            ..Default::default()
        };

        let check_type = match CasCheckType::try_from(request.check_type) {
            Ok(check_type) => check_type,
            Err(e) => {
                tracing::error!(decree = ctx.decree, error = %e, "Invalid check_and_set");
                resp.error = Status::InvalidArgument;
                self.empty_put(ctx.decree)?;
                return Ok(resp);
            }
        };

        let check_key = key::build(&request.hash_key, &request.check_sort_key)?;
        let stored = self.engine.get(&check_key).inspect_err(|e| {
            tracing::error!(
                decree = ctx.decree,
                hash_key = %format::bytes(&request.hash_key),
                check_sort_key = %format::bytes(&request.check_sort_key),
                error = %e,
                "Get check value for check_and_set failed"
            );
        })?;

        let check_value = match stored {
            Some(raw) => {
                let record = value::decode(&raw)?;
                if value::is_expired(self.clock.now_secs(), record.expire_ts) {
                    self.metrics.inc_expired();
                    None
                } else if record.is_tombstone() {
                    None
                } else {
                    Some(record.payload.to_vec())
                }
            }
            None => None,
        };

        let passed = check_type.validate(&request.check_operand, check_value.as_deref());
        let mut scope = self.begin_batch(ctx.decree);
        if passed {
            let set_key = if request.set_diff_sort_key {
                key::build(&request.hash_key, &request.set_sort_key)?
            } else {
                check_key
            };
            scope.put_record(
                &set_key,
                &request.set_value,
                request.set_expire_ts_seconds,
                ctx.timetag,
            )?;
        } else {
            scope.put_placeholder()?;
        }
        scope.commit().into_result()?;

        if !passed {
            resp.error = Status::TryAgain;
        }
        if request.return_check_value {
            resp.check_value_returned = true;
            if let Some(check_value) = check_value {
                resp.check_value_exist = true;
                resp.check_value = check_value;
            }
        }
        Ok(resp)
    }

    /// Runs `f`, counting the call and its latency under `op`.
    fn timed<T>(&mut self, op: WriteOp, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let started = Instant::now();
        let result = f(self);
        self.metrics.record_op(op, started.elapsed());
        result
    }
}

/// Parses a stored counter: base-10, optional sign, no surrounding spaces.
fn parse_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::encoding::timetag;
    use crate::engine::MemEngine;

    const NOW_MS: u64 = 1_700_000_000_000;
    const NOW_SECS: u32 = (NOW_MS / 1000) as u32;

    struct Fixture {
        engine: Arc<MemEngine>,
        clock: Arc<MockClock>,
        metrics: Arc<ReplicaMetrics>,
        service: WriteService,
    }

    fn setup() -> Fixture {
        let config = ReplicaConfig::new(3, 5).primary_address("10.0.0.1:34801");
        let engine = Arc::new(MemEngine::new());
        let clock = Arc::new(MockClock::new(NOW_MS));
        let metrics = Arc::new(ReplicaMetrics::new(4096, 4096));
        let service = WriteService::new(&config, engine.clone(), clock.clone(), metrics.clone());
        Fixture {
            engine,
            clock,
            metrics,
            service,
        }
    }

    fn ctx(decree: i64) -> WriteContext {
        WriteContext::put(decree, NOW_MS, 1)
    }

    fn payload(engine: &MemEngine, raw_key: &[u8]) -> Option<Vec<u8>> {
        engine
            .get(raw_key)
            .unwrap()
            .map(|raw| value::decode(&raw).unwrap().payload.to_vec())
    }

    fn put_raw(f: &mut Fixture, decree: i64, raw_key: &[u8], value: &[u8], expire_ts: u32) {
        let request = UpdateRequest {
            key: raw_key.to_vec(),
            value: value.to_vec(),
            expire_ts_seconds: expire_ts,
        };
        let resp = f.service.put(&ctx(decree), &request).unwrap();
        assert_eq!(resp.error, Status::Ok);
    }

    fn cas(check_type: CasCheckType, operand: &[u8], value: &[u8]) -> CheckAndSetRequest {
        CheckAndSetRequest {
            hash_key: b"h".to_vec(),
            check_sort_key: b"c".to_vec(),
            check_type: check_type.into(),
            check_operand: operand.to_vec(),
            set_diff_sort_key: false,
            set_sort_key: Vec::new(),
            set_value: value.to_vec(),
            set_expire_ts_seconds: 0,
            return_check_value: true,
        }
    }

    #[test]
    fn test_put_and_remove() {
        let mut f = setup();
        put_raw(&mut f, 1, b"k", b"v", 0);
        assert_eq!(payload(&f.engine, b"k").as_deref(), Some(&b"v"[..]));

        let resp = f.service.remove(&WriteContext::remove(2, NOW_MS, 1), b"k").unwrap();
        assert_eq!(resp.error, Status::Ok);
        assert_eq!(resp.header.decree, 2);
        assert_eq!(resp.header.app_id, 3);
        assert_eq!(resp.header.partition_index, 5);
        assert_eq!(resp.header.server, "10.0.0.1:34801");
        assert!(payload(&f.engine, b"k").is_none());
        assert_eq!(f.engine.last_applied_decree(), 2);
        assert_eq!(f.metrics.op_count(WriteOp::Put), 1);
        assert_eq!(f.metrics.op_count(WriteOp::Remove), 1);
    }

    #[test]
    fn test_multi_put() {
        let mut f = setup();
        let request = MultiPutRequest {
            hash_key: b"h".to_vec(),
            kvs: vec![KeyValue::new("s1", "v1"), KeyValue::new("s2", "v2")],
            expire_ts_seconds: NOW_SECS + 100,
        };
        let resp = f.service.multi_put(&ctx(1), &request).unwrap();
        assert_eq!(resp.error, Status::Ok);

        let raw = f.engine.get(&key::build(b"h", b"s2").unwrap()).unwrap().unwrap();
        let record = value::decode(&raw).unwrap();
        assert_eq!(record.payload, b"v2");
        assert_eq!(record.expire_ts, NOW_SECS + 100);
        assert_eq!(record.timetag, ctx(1).timetag);
        assert_eq!(f.engine.len(), 2);
    }

    #[test]
    fn test_multi_put_empty_advances_decree() {
        let mut f = setup();
        let request = MultiPutRequest {
            hash_key: b"h".to_vec(),
            kvs: vec![],
            expire_ts_seconds: 0,
        };
        let resp = f.service.multi_put(&ctx(42), &request).unwrap();
        assert_eq!(resp.error, Status::InvalidArgument);
        assert_eq!(resp.header.decree, 42);
        assert_eq!(f.engine.last_applied_decree(), 42);
    }

    #[test]
    fn test_multi_remove() {
        let mut f = setup();
        let request = MultiPutRequest {
            hash_key: b"h".to_vec(),
            kvs: vec![KeyValue::new("s1", "v1"), KeyValue::new("s2", "v2")],
            expire_ts_seconds: 0,
        };
        f.service.multi_put(&ctx(1), &request).unwrap();

        let remove = MultiRemoveRequest {
            hash_key: b"h".to_vec(),
            sort_keys: vec![b"s1".to_vec(), b"s2".to_vec(), b"missing".to_vec()],
        };
        let resp = f.service.multi_remove(&ctx(2), &remove).unwrap();
        assert_eq!(resp.error, Status::Ok);
        assert_eq!(resp.count, 3);
        assert!(f.engine.is_empty());

        let empty = MultiRemoveRequest {
            hash_key: b"h".to_vec(),
            sort_keys: vec![],
        };
        let resp = f.service.multi_remove(&ctx(3), &empty).unwrap();
        assert_eq!(resp.error, Status::InvalidArgument);
        assert_eq!(resp.count, 0);
        assert_eq!(f.engine.last_applied_decree(), 3);
    }

    #[test]
    fn test_incr() {
        let mut f = setup();
        let request = IncrRequest {
            key: b"counter".to_vec(),
            increment: 5,
        };

        let resp = f.service.incr(&ctx(1), &request).unwrap();
        assert_eq!((resp.error, resp.new_value), (Status::Ok, 5));

        put_raw(&mut f, 2, b"counter", b"10", 0);
        let resp = f.service.incr(&ctx(3), &request).unwrap();
        assert_eq!((resp.error, resp.new_value), (Status::Ok, 15));
        assert_eq!(payload(&f.engine, b"counter").as_deref(), Some(&b"15"[..]));

        let down = IncrRequest {
            key: b"counter".to_vec(),
            increment: -20,
        };
        let resp = f.service.incr(&ctx(4), &down).unwrap();
        assert_eq!(resp.new_value, -5);
    }

    #[test]
    fn test_incr_empty_value_counts_as_zero() {
        let mut f = setup();
        put_raw(&mut f, 1, b"counter", b"", 0);
        let request = IncrRequest {
            key: b"counter".to_vec(),
            increment: 7,
        };
        assert_eq!(f.service.incr(&ctx(2), &request).unwrap().new_value, 7);
    }

    #[test]
    fn test_incr_invalid_old_value() {
        let mut f = setup();
        put_raw(&mut f, 1, b"counter", b"abc", 0);
        put_raw(&mut f, 2, b"other", b"untouched", 0);

        let request = IncrRequest {
            key: b"counter".to_vec(),
            increment: 1,
        };
        let resp = f.service.incr(&ctx(3), &request).unwrap();
        assert_eq!(resp.error, Status::InvalidArgument);
        assert_eq!(f.engine.last_applied_decree(), 3);
        assert_eq!(payload(&f.engine, b"counter").as_deref(), Some(&b"abc"[..]));
        assert_eq!(payload(&f.engine, b"other").as_deref(), Some(&b"untouched"[..]));
    }

    #[test]
    fn test_incr_overflow_returns_old_value() {
        let mut f = setup();
        let max = i64::MAX.to_string();
        put_raw(&mut f, 1, b"counter", max.as_bytes(), 0);

        let request = IncrRequest {
            key: b"counter".to_vec(),
            increment: 1,
        };
        let resp = f.service.incr(&ctx(2), &request).unwrap();
        assert_eq!(resp.error, Status::InvalidArgument);
        assert_eq!(resp.new_value, i64::MAX);
        assert_eq!(f.engine.last_applied_decree(), 2);

        let min = i64::MIN.to_string();
        put_raw(&mut f, 3, b"counter", min.as_bytes(), 0);
        let request = IncrRequest {
            key: b"counter".to_vec(),
            increment: -1,
        };
        let resp = f.service.incr(&ctx(4), &request).unwrap();
        assert_eq!(resp.error, Status::InvalidArgument);
        assert_eq!(resp.new_value, i64::MIN);
    }

    #[test]
    fn test_incr_ttl_handling() {
        let mut f = setup();
        let request = IncrRequest {
            key: b"counter".to_vec(),
            increment: 1,
        };

        // A live record keeps its TTL.
        put_raw(&mut f, 1, b"counter", b"10", NOW_SECS + 60);
        f.service.incr(&ctx(2), &request).unwrap();
        let raw = f.engine.get(b"counter").unwrap().unwrap();
        assert_eq!(value::extract_expire_ts(&raw).unwrap(), NOW_SECS + 60);

        // Once expired it restarts from zero and loses the TTL.
        f.clock.advance_ms(61_000);
        let resp = f.service.incr(&ctx(3), &request).unwrap();
        assert_eq!(resp.new_value, 1);
        let raw = f.engine.get(b"counter").unwrap().unwrap();
        assert_eq!(value::extract_expire_ts(&raw).unwrap(), 0);
        assert_eq!(f.metrics.expired_count(), 1);
    }

    #[test]
    fn test_incr_read_failure_is_engine_fault() {
        let mut f = setup();
        f.engine.fail_next_get(Status::IoError);
        let request = IncrRequest {
            key: b"counter".to_vec(),
            increment: 1,
        };
        let err = f.service.incr(&ctx(1), &request).unwrap_err();
        assert_eq!(err.status(), Status::IoError);
        assert_eq!(f.engine.last_applied_decree(), 0);
    }

    #[test]
    fn test_check_and_set_not_exist() {
        let mut f = setup();
        let request = cas(CasCheckType::ValueNotExist, b"", b"v1");

        let resp = f.service.check_and_set(&ctx(1), &request).unwrap();
        assert_eq!(resp.error, Status::Ok);
        assert!(resp.check_value_returned);
        assert!(!resp.check_value_exist);

        let resp = f.service.check_and_set(&ctx(2), &request).unwrap();
        assert_eq!(resp.error, Status::TryAgain);
        assert!(resp.check_value_exist);
        assert_eq!(resp.check_value, b"v1");
        assert_eq!(f.engine.last_applied_decree(), 2);
    }

    #[test]
    fn test_check_and_set_diff_sort_key() {
        let mut f = setup();
        let check_key = key::build(b"h", b"c").unwrap();
        put_raw(&mut f, 1, &check_key, b"hello world", 0);

        let mut request = cas(CasCheckType::ValueMatchPrefix, b"hello", b"set");
        request.set_diff_sort_key = true;
        request.set_sort_key = b"target".to_vec();
        request.return_check_value = false;

        let resp = f.service.check_and_set(&ctx(2), &request).unwrap();
        assert_eq!(resp.error, Status::Ok);
        assert!(!resp.check_value_returned);
        let set_key = key::build(b"h", b"target").unwrap();
        assert_eq!(payload(&f.engine, &set_key).as_deref(), Some(&b"set"[..]));
        assert_eq!(payload(&f.engine, &check_key).as_deref(), Some(&b"hello world"[..]));
    }

    #[test]
    fn test_check_and_set_expired_check_value_is_absent() {
        let mut f = setup();
        let check_key = key::build(b"h", b"c").unwrap();
        put_raw(&mut f, 1, &check_key, b"old", NOW_SECS + 1);
        f.clock.advance_ms(2_000);

        let resp = f
            .service
            .check_and_set(&ctx(2), &cas(CasCheckType::ValueNotExist, b"", b"new"))
            .unwrap();
        assert_eq!(resp.error, Status::Ok);
        assert!(!resp.check_value_exist);
        assert_eq!(payload(&f.engine, &check_key).as_deref(), Some(&b"new"[..]));
        assert_eq!(f.metrics.expired_count(), 1);
    }

    #[test]
    fn test_check_and_set_unsupported_check_type() {
        let mut f = setup();
        let mut request = cas(CasCheckType::NoCheck, b"", b"v");
        request.check_type = 100;

        let resp = f.service.check_and_set(&ctx(9), &request).unwrap();
        assert_eq!(resp.error, Status::InvalidArgument);
        assert_eq!(f.engine.last_applied_decree(), 9);
        assert!(payload(&f.engine, &key::build(b"h", b"c").unwrap()).is_none());
    }

    #[test]
    fn test_engine_write_failure_propagates() {
        let mut f = setup();
        f.engine.fail_next_write(Status::Corruption);

        let request = MultiPutRequest {
            hash_key: b"h".to_vec(),
            kvs: vec![KeyValue::new("s", "v")],
            expire_ts_seconds: 0,
        };
        let err = f.service.multi_put(&ctx(1), &request).unwrap_err();
        assert_eq!(err.status(), Status::Corruption);
        assert!(f.engine.is_empty());

        // The next decree starts from a clean batch.
        put_raw(&mut f, 2, b"k", b"v", 0);
        assert_eq!(f.engine.len(), 1);
        assert_eq!(f.metrics.op_count(WriteOp::MultiPut), 1);
    }

    #[test]
    fn test_oversized_single_put_is_engine_fault() {
        let config = ReplicaConfig::new(3, 5).max_write_batch_bytes(64);
        let engine = Arc::new(MemEngine::new());
        let mut service = WriteService::new(
            &config,
            engine.clone(),
            Arc::new(MockClock::new(NOW_MS)),
            Arc::new(ReplicaMetrics::new(4096, 4096)),
        );

        let request = UpdateRequest {
            key: b"k".to_vec(),
            value: vec![b'x'; 100],
            expire_ts_seconds: 0,
        };
        let err = service.put(&ctx(5), &request).unwrap_err();
        assert_eq!(err.status(), Status::Aborted);
        assert!(engine.is_empty());
        assert_eq!(engine.last_applied_decree(), 0);

        let small = UpdateRequest {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
            expire_ts_seconds: 0,
        };
        assert_eq!(service.put(&ctx(5), &small).unwrap().error, Status::Ok);
        assert_eq!(engine.last_applied_decree(), 5);
    }

    fn put_tombstone(f: &mut Fixture, decree: i64, raw_key: &[u8]) {
        let mut scope = f.service.begin_batch(decree);
        scope
            .put_tombstone(raw_key, timetag::generate(NOW_MS, 2, true))
            .unwrap();
        scope.commit().into_result().unwrap();
    }

    #[test]
    fn test_tombstone_is_absent_for_incr_and_check_and_set() {
        let mut f = setup();
        put_tombstone(&mut f, 1, b"counter");
        let request = IncrRequest {
            key: b"counter".to_vec(),
            increment: 3,
        };
        let resp = f.service.incr(&ctx(2), &request).unwrap();
        assert_eq!((resp.error, resp.new_value), (Status::Ok, 3));

        let check_key = key::build(b"h", b"c").unwrap();
        put_tombstone(&mut f, 3, &check_key);
        let resp = f
            .service
            .check_and_set(&ctx(4), &cas(CasCheckType::ValueNotExist, b"", b"new"))
            .unwrap();
        assert_eq!(resp.error, Status::Ok);
        assert!(!resp.check_value_exist);
        assert_eq!(payload(&f.engine, &check_key).as_deref(), Some(&b"new"[..]));
        assert_eq!(f.metrics.expired_count(), 0);
    }

    #[test]
    fn test_parse_i64() {
        assert_eq!(parse_i64(b"42"), Some(42));
        assert_eq!(parse_i64(b"-42"), Some(-42));
        assert_eq!(parse_i64(b"+7"), Some(7));
        assert_eq!(parse_i64(b" 1"), None);
        assert_eq!(parse_i64(b"9223372036854775808"), None);
        assert_eq!(parse_i64(&[0xFF]), None);
    }
}
