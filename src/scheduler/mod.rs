//! Background work of a replica.
//!
//! Two kinds of work run here: periodic tasks (the compaction trigger check,
//! the metrics logger) ticking until shutdown, and one-off jobs such as a
//! manual compaction. Shutdown stops the periodic loops first and then waits
//! for in-flight jobs, so a running compaction is never abandoned halfway.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{Error, Result};

/// Handed to a periodic task on every tick.
pub struct TaskContext {
    pub task: &'static str,
    /// Ticks of this task so far, starting at 1.
    pub tick: u64,
    pub shutdown: broadcast::Receiver<()>,
}

#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// Delay between two runs. The first run happens one interval after
    /// registration.
    fn interval(&self) -> Duration;

    async fn execute(&self, ctx: TaskContext) -> Result<()>;
}

/// Counts one-off jobs still running.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    drained: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }

    async fn wait_drained(&self) {
        loop {
            let drained = self.drained.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

pub struct Scheduler {
    loops: Mutex<Vec<JoinHandle<()>>>,
    jobs: Arc<InFlight>,
    closed: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            loops: Mutex::new(Vec::new()),
            jobs: Arc::new(InFlight::default()),
            closed: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Starts ticking `task` until shutdown. Fails once the scheduler is
    /// shut down or when called outside a tokio runtime.
    pub fn register<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> Result<&Self> {
        if self.is_closed() {
            return Err(Error::InvalidState(format!(
                "cannot register {} after shutdown",
                task.name()
            )));
        }
        let handle = self.spawn_ticker(runtime(task.name())?, task);
        self.loops.lock()?.push(handle);
        Ok(self)
    }

    /// Runs a one-off job. Its error is logged, not returned through the
    /// handle. Shutdown waits for the job to finish. Fails once the
    /// scheduler is shut down or when called outside a tokio runtime.
    pub fn spawn<F>(&self, name: &'static str, job: F) -> Result<JoinHandle<()>>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        // Counted before the check so a concurrent shutdown either sees the
        // job or the job sees the shutdown.
        let guard = self.jobs.enter();
        if self.is_closed() {
            return Err(Error::InvalidState(format!(
                "cannot spawn {} after shutdown",
                name
            )));
        }
        Ok(runtime(name)?.spawn(async move {
            let _guard = guard;
            if let Err(e) = job.await {
                tracing::error!(job = name, error = %e, "Background job failed");
            }
        }))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of one-off jobs that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.jobs.count.load(Ordering::SeqCst)
    }

    fn spawn_ticker<T: BackgroundTask + 'static>(
        &self,
        runtime: Handle,
        task: Arc<T>,
    ) -> JoinHandle<()> {
        let period = task.interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            // A slow run must not be followed by a burst of catch-up runs.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut tick = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tick += 1;
                        let ctx = TaskContext {
                            task: task.name(),
                            tick,
                            shutdown: shutdown_rx.resubscribe(),
                        };
                        if let Err(e) = task.execute(ctx).await {
                            tracing::error!(
                                task = task.name(),
                                tick,
                                error = %e,
                                "Periodic task failed"
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!(
                            task = task.name(),
                            ticks = tick,
                            "Periodic task stopped"
                        );
                        break;
                    }
                }
            }
        })
    }

    /// Stops every periodic task, then waits for running jobs. Calling it
    /// again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.shutdown_tx.send(());

        let loops = std::mem::take(&mut *self.loops.lock()?);
        for handle in loops {
            handle
                .await
                .map_err(|e| Error::InvalidState(format!("periodic task panicked: {}", e)))?;
        }

        self.jobs.wait_drained().await;
        Ok(())
    }
}

fn runtime(name: &str) -> Result<Handle> {
    Handle::try_current().map_err(|e| {
        Error::InvalidState(format!("cannot start {} outside a runtime: {}", name, e))
    })
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
