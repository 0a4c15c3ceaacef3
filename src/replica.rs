//! One replica of a partition: the write path, point reads, compaction
//! admission and the background tasks around them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::clock::Clock;
use crate::compaction::{ManualCompactService, ManualCompactTask};
use crate::config::ReplicaConfig;
use crate::encoding::{timetag, value};
use crate::engine::Engine;
use crate::error::{Error, Result, Status};
use crate::metrics::{MetricsTask, ReplicaMetrics, WriteOp};
use crate::read::{ReadService, Ttl};
use crate::scheduler::Scheduler;
use crate::write::{
    CheckAndSetResponse, DuplicateResponse, IncrResponse, MultiRemoveResponse, ResponseHeader,
    UpdateResponse, WriteContext, WriteRequest, WriteResponse, WriteService,
};

/// Responses of one decree and the outcome of its engine write.
#[derive(Debug)]
pub struct WriteOutcome {
    pub responses: Vec<WriteResponse>,
    /// `Err` for engine faults and misuse; validation failures are only
    /// visible in the responses.
    pub result: Result<()>,
}

impl WriteOutcome {
    fn ok(responses: Vec<WriteResponse>) -> Self {
        Self {
            responses,
            result: Ok(()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct Replica {
    config: ReplicaConfig,
    engine: Arc<dyn Engine>,
    writer: WriteService,
    reader: ReadService,
    compaction: Arc<ManualCompactService>,
    envs: Arc<RwLock<HashMap<String, String>>>,
    metrics: Arc<ReplicaMetrics>,
    scheduler: Arc<Scheduler>,
}

impl Replica {
    /// Creates the replica on top of an opened engine. Background tasks are
    /// not running until [`Replica::start`].
    pub fn open(
        config: ReplicaConfig,
        engine: Arc<dyn Engine>,
        clock: Arc<dyn Clock>,
        metrics: Arc<ReplicaMetrics>,
    ) -> Result<Self> {
        if config.value_schema_version > value::LATEST_VERSION {
            return Err(Error::InvalidArgument(format!(
                "value schema version {} is newer than {}",
                config.value_schema_version,
                value::LATEST_VERSION
            )));
        }
        if config.cluster_id > timetag::MAX_CLUSTER_ID {
            return Err(Error::InvalidArgument(format!(
                "cluster id {} does not fit in a timetag",
                config.cluster_id
            )));
        }

        let writer = WriteService::new(&config, engine.clone(), clock.clone(), metrics.clone());
        let reader = ReadService::new(engine.clone(), clock.clone(), metrics.clone());
        let compaction = Arc::new(ManualCompactService::new(
            &config.compaction,
            engine.clone(),
            clock,
            metrics.clone(),
        ));

        tracing::info!(
            app_id = config.app_id,
            partition_index = config.partition_index,
            last_applied_decree = engine.last_applied_decree(),
            "Opened replica"
        );

        Ok(Self {
            config,
            engine,
            writer,
            reader,
            compaction,
            envs: Arc::new(RwLock::new(HashMap::new())),
            metrics,
            scheduler: Arc::new(Scheduler::new()),
        })
    }

    /// Starts the compaction trigger check and the metrics logger. Must be
    /// called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        self.scheduler
            .register(Arc::new(ManualCompactTask::new(
                self.compaction.clone(),
                self.envs.clone(),
                self.scheduler.clone(),
                self.config.compaction.check_interval,
            )))?
            .register(Arc::new(MetricsTask::new(
                self.metrics.clone(),
                self.config.metrics_interval,
            )))?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown().await
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<ReplicaMetrics> {
        &self.metrics
    }

    pub fn compaction(&self) -> &Arc<ManualCompactService> {
        &self.compaction
    }

    pub fn last_applied_decree(&self) -> i64 {
        self.engine.last_applied_decree()
    }

    /// Replaces the environment the compaction triggers are read from.
    pub fn update_app_envs(&self, envs: HashMap<String, String>) -> Result<()> {
        *self.envs.write()? = envs;
        Ok(())
    }

    /// Evaluates the compaction triggers now instead of waiting for the
    /// next periodic check. The compaction runs on the current tokio
    /// runtime; outside one, or after [`Replica::shutdown`], nothing is
    /// admitted and `false` is returned.
    pub fn check_manual_compact(&self) -> Result<bool> {
        let envs = self.envs.read()?.clone();
        Ok(self
            .compaction
            .start_manual_compact_if_needed(&envs, &self.scheduler)
            .is_some())
    }

    pub fn query_compact_state(&self) -> String {
        self.compaction.query_compact_state()
    }

    pub fn get(&self, raw_key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.reader.get(raw_key)
    }

    pub fn ttl(&self, raw_key: &[u8]) -> Result<Option<Ttl>> {
        self.reader.ttl(raw_key)
    }

    /// Applies the requests the replication layer committed at `decree`.
    ///
    /// Single puts and removes may share a decree and are written together.
    /// Any other request must be alone in its decree. An empty list only
    /// advances the decree.
    pub fn on_batched_write_requests(
        &mut self,
        decree: i64,
        timestamp_ms: u64,
        requests: &[WriteRequest],
    ) -> WriteOutcome {
        match requests {
            [] => WriteOutcome {
                responses: Vec::new(),
                result: self.writer.empty_put(decree),
            },
            [single] if !single.is_batchable() => {
                self.on_single_write(decree, timestamp_ms, single)
            }
            _ => self.on_batched_writes(decree, timestamp_ms, requests),
        }
    }

    fn on_batched_writes(
        &mut self,
        decree: i64,
        timestamp_ms: u64,
        requests: &[WriteRequest],
    ) -> WriteOutcome {
        let started = Instant::now();
        let put_ctx = WriteContext::put(decree, timestamp_ms, self.config.cluster_id);
        let mut scope = self.writer.begin_batch(decree);

        for request in requests {
            let status = match request {
                WriteRequest::Put(update) => scope.put(&put_ctx, update),
                WriteRequest::Remove { key } => scope.remove(key),
                other => {
                    let err = Error::InvalidOperation(format!(
                        "{} cannot share decree {} with other requests",
                        request_name(other),
                        decree
                    ));
                    tracing::error!(decree, error = %err, "Rejected batched write");
                    return Self::aborted(scope.abort(err.status()), err);
                }
            };
            if !status.is_ok() {
                let err = Error::engine(status, format!("accumulating batch of decree {}", decree));
                return Self::aborted(scope.abort(status), err);
            }
        }

        let commit = scope.commit();
        let elapsed = started.elapsed();
        for request in requests {
            let op = match request {
                WriteRequest::Put(_) => WriteOp::Put,
                _ => WriteOp::Remove,
            };
            self.metrics.record_op(op, elapsed);
        }

        WriteOutcome {
            responses: commit
                .responses
                .into_iter()
                .map(WriteResponse::Update)
                .collect(),
            result: commit.result,
        }
    }

    fn aborted(responses: Vec<UpdateResponse>, err: Error) -> WriteOutcome {
        WriteOutcome {
            responses: responses.into_iter().map(WriteResponse::Update).collect(),
            result: Err(err),
        }
    }

    fn on_single_write(
        &mut self,
        decree: i64,
        timestamp_ms: u64,
        request: &WriteRequest,
    ) -> WriteOutcome {
        let cluster_id = self.config.cluster_id;
        let put_ctx = WriteContext::put(decree, timestamp_ms, cluster_id);
        let remove_ctx = WriteContext::remove(decree, timestamp_ms, cluster_id);

        let result = match request {
            WriteRequest::Put(update) => {
                self.writer.put(&put_ctx, update).map(WriteResponse::Update)
            }
            WriteRequest::Remove { key } => {
                self.writer.remove(&remove_ctx, key).map(WriteResponse::Update)
            }
            WriteRequest::MultiPut(update) => {
                self.writer.multi_put(&put_ctx, update).map(WriteResponse::Update)
            }
            WriteRequest::MultiRemove(update) => self
                .writer
                .multi_remove(&remove_ctx, update)
                .map(WriteResponse::MultiRemove),
            WriteRequest::Incr(update) => {
                self.writer.incr(&put_ctx, update).map(WriteResponse::Incr)
            }
            WriteRequest::CheckAndSet(update) => self
                .writer
                .check_and_set(&put_ctx, update)
                .map(WriteResponse::CheckAndSet),
            WriteRequest::Duplicate(update) => self
                .writer
                .duplicate(decree, update)
                .map(WriteResponse::Duplicate),
        };

        match result {
            Ok(response) => WriteOutcome::ok(vec![response]),
            Err(err) => {
                let header = self.writer.header(decree);
                WriteOutcome {
                    responses: vec![failed_response(request, header, err.status())],
                    result: Err(err),
                }
            }
        }
    }
}

fn request_name(request: &WriteRequest) -> &'static str {
    match request {
        WriteRequest::Put(_) => "put",
        WriteRequest::Remove { .. } => "remove",
        WriteRequest::MultiPut(_) => "multi_put",
        WriteRequest::MultiRemove(_) => "multi_remove",
        WriteRequest::Incr(_) => "incr",
        WriteRequest::CheckAndSet(_) => "check_and_set",
        WriteRequest::Duplicate(_) => "duplicate",
    }
}

/// Response of the kind `request` expects, carrying only `error`.
fn failed_response(
    request: &WriteRequest,
    header: ResponseHeader,
    error: Status,
) -> WriteResponse {
    match request {
        WriteRequest::Put(_) | WriteRequest::Remove { .. } | WriteRequest::MultiPut(_) => {
            WriteResponse::Update(UpdateResponse { error, header })
        }
        WriteRequest::MultiRemove(_) => WriteResponse::MultiRemove(MultiRemoveResponse {
            error,
            header,
            ..Default::default()
        }),
        WriteRequest::Incr(_) => WriteResponse::Incr(IncrResponse {
            error,
            header,
            ..Default::default()
        }),
        WriteRequest::CheckAndSet(_) => WriteResponse::CheckAndSet(CheckAndSetResponse {
            error,
            header,
            ..Default::default()
        }),
        WriteRequest::Duplicate(_) => WriteResponse::Duplicate(DuplicateResponse {
            error,
            header,
            ..Default::default()
        }),
    }
}
