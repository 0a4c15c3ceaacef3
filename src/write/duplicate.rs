//! Replay of writes shipped from another cluster.
//!
//! A duplicated write carries the wall clock and cluster id of its origin.
//! Every key it touches is written only when the remote timetag is newer than
//! the timetag stored with the key, so a replica converges on the same value
//! whatever order the clusters' writes arrive in.
//!
//! A replayed remove leaves a tombstone, an empty record whose timetag has
//! the delete bit set, rather than dropping the key. A put older than the
//! remove still loses against it. Readers treat tombstones as absent.

use super::context::WriteContext;
use super::request::{DuplicateRequest, DuplicateResponse, DuplicatedWrite};
use super::WriteService;
use crate::conflict;
use crate::encoding::{format, key, timetag, value};
use crate::error::{Result, Status};
use crate::metrics::WriteOp;

/// One key touched by a duplicated write.
enum Mutation {
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        expire_ts: u32,
    },
    Delete {
        key: Vec<u8>,
    },
}

impl Mutation {
    fn key(&self) -> &[u8] {
        match self {
            Mutation::Put { key, .. } | Mutation::Delete { key } => key,
        }
    }
}

fn mutations(write: DuplicatedWrite) -> Result<Vec<Mutation>> {
    Ok(match write {
        DuplicatedWrite::Put(request) => vec![Mutation::Put {
            key: request.key,
            value: request.value,
            expire_ts: request.expire_ts_seconds,
        }],
        DuplicatedWrite::Remove { key } => vec![Mutation::Delete { key }],
        DuplicatedWrite::MultiPut(request) => request
            .kvs
            .into_iter()
            .map(|kv| -> Result<Mutation> {
                Ok(Mutation::Put {
                    key: key::build(&request.hash_key, &kv.key)?,
                    value: kv.value,
                    expire_ts: request.expire_ts_seconds,
                })
            })
            .collect::<Result<Vec<_>>>()?,
        DuplicatedWrite::MultiRemove(request) => request
            .sort_keys
            .iter()
            .map(|sort_key| -> Result<Mutation> {
                Ok(Mutation::Delete {
                    key: key::build(&request.hash_key, sort_key)?,
                })
            })
            .collect::<Result<Vec<_>>>()?,
    })
}

impl WriteService {
    /// Applies a write replayed from another cluster at `decree`.
    ///
    /// Keys whose stored record is at least as new as the replayed write are
    /// skipped, which makes redelivery of the same request harmless. A write
    /// that loses on every key still acknowledges success.
    pub fn duplicate(
        &mut self,
        decree: i64,
        request: &DuplicateRequest,
    ) -> Result<DuplicateResponse> {
        self.timed(WriteOp::Duplicate, |this| this.duplicate_impl(decree, request))
    }

    fn duplicate_impl(
        &mut self,
        decree: i64,
        request: &DuplicateRequest,
    ) -> Result<DuplicateResponse> {
        let mut resp = DuplicateResponse {
            header: self.header(decree),
            ..Default::default()
        };

        if request.cluster_id > timetag::MAX_CLUSTER_ID {
            tracing::error!(
                decree,
                cluster_id = request.cluster_id,
                "Invalid duplicate: cluster id does not fit in a timetag"
            );
            resp.error = Status::InvalidArgument;
            self.empty_put(decree)?;
            return Ok(resp);
        }

        let decoded = request.decode_write().and_then(|write| {
            let is_delete = write.is_delete();
            mutations(write).map(|mutations| (is_delete, mutations))
        });
        let (is_delete, mutations) = match decoded {
            Ok((is_delete, mutations)) if !mutations.is_empty() => (is_delete, mutations),
            Ok(_) => {
                tracing::error!(decree, "Invalid duplicate: embedded write touches no key");
                resp.error = Status::InvalidArgument;
                self.empty_put(decree)?;
                return Ok(resp);
            }
            Err(e) => {
                tracing::error!(
                    decree,
                    cluster_id = request.cluster_id,
                    error = %e,
                    "Invalid duplicate: cannot decode embedded write"
                );
                resp.error = Status::InvalidArgument;
                self.empty_put(decree)?;
                return Ok(resp);
            }
        };

        let remote_timetag = timetag::generate(request.timestamp, request.cluster_id, is_delete);
        let ctx = WriteContext::duplicated(decree, remote_timetag);

        let mut winners = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            let existing = self.stored_timetag(mutation.key())?;
            if conflict::should_apply(existing, ctx.remote_timetag) {
                winners.push(mutation);
            } else {
                tracing::debug!(
                    decree,
                    key = %format::storage_key(mutation.key()),
                    existing = existing.unwrap_or_default(),
                    incoming = ctx.remote_timetag,
                    "Skipping stale duplicated write"
                );
            }
        }

        let mut scope = self.begin_batch(decree);
        for mutation in &winners {
            match mutation {
                Mutation::Put {
                    key,
                    value,
                    expire_ts,
                } => scope.put_record(key, value, *expire_ts, ctx.timetag)?,
                Mutation::Delete { key } => scope.put_tombstone(key, ctx.timetag)?,
            }
        }
        // An empty scope commits a placeholder.
        scope.commit().into_result()?;

        resp.applied = winners.len() as u64;
        Ok(resp)
    }

    /// Timetag stored with `raw_key`, tombstones included. `None` when absent
    /// or expired.
    fn stored_timetag(&self, raw_key: &[u8]) -> Result<Option<u64>> {
        let Some(raw) = self.engine.get(raw_key)? else {
            return Ok(None);
        };
        let record = value::decode(&raw)?;
        if value::is_expired(self.clock.now_secs(), record.expire_ts) {
            self.metrics.inc_expired();
            return Ok(None);
        }
        Ok(Some(record.timetag))
    }
}
