use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::ManualCompactService;
use crate::error::Result;
use crate::scheduler::{BackgroundTask, Scheduler, TaskContext};

/// Re-evaluates the compaction triggers of the replica environment.
pub struct ManualCompactTask {
    service: Arc<ManualCompactService>,
    envs: Arc<RwLock<HashMap<String, String>>>,
    scheduler: Arc<Scheduler>,
    interval: Duration,
}

impl ManualCompactTask {
    pub fn new(
        service: Arc<ManualCompactService>,
        envs: Arc<RwLock<HashMap<String, String>>>,
        scheduler: Arc<Scheduler>,
        interval: Duration,
    ) -> Self {
        Self {
            service,
            envs,
            scheduler,
            interval,
        }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for ManualCompactTask {
    fn name(&self) -> &'static str {
        "manual-compact-check"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, _ctx: TaskContext) -> Result<()> {
        let envs = self.envs.read()?.clone();
        // The compaction itself runs detached; the gate tracks it.
        self.service.start_manual_compact_if_needed(&envs, &self.scheduler);
        Ok(())
    }
}
