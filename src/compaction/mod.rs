//! Admission control of manual compactions.
//!
//! Compactions are requested through the replica's environment: a one-shot
//! trigger timestamp and a list of daily trigger times. At most one manual
//! compaction is queued or running per replica, and a new one is admitted
//! only after `min_interval_seconds` have passed since the last finished.
//!
//! The gate is the `enqueue_time_ms` atomic: admission swaps it from zero to
//! the current time, and only the finishing compaction resets it.

mod filter;
mod task;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Local, NaiveTime, TimeZone};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::{
    ManualCompactConfig, MANUAL_COMPACT_BOTTOMMOST_LEVEL_COMPACTION_FORCE,
    MANUAL_COMPACT_BOTTOMMOST_LEVEL_COMPACTION_KEY, MANUAL_COMPACT_BOTTOMMOST_LEVEL_COMPACTION_SKIP,
    MANUAL_COMPACT_ONCE_KEY_PREFIX, MANUAL_COMPACT_ONCE_TRIGGER_TIME_KEY,
    MANUAL_COMPACT_PERIODIC_DISABLED_KEY, MANUAL_COMPACT_PERIODIC_KEY_PREFIX,
    MANUAL_COMPACT_PERIODIC_TRIGGER_TIME_KEY, MANUAL_COMPACT_TARGET_LEVEL_KEY,
};
use crate::engine::{BottommostLevelCompaction, CompactRangeOptions, Engine};
use crate::error::{Error, Result};
use crate::metrics::ReplicaMetrics;
use crate::scheduler::Scheduler;

pub use filter::TtlCompactionFilter;
pub use task::ManualCompactTask;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub struct ManualCompactService {
    engine: Arc<dyn Engine>,
    clock: Arc<dyn Clock>,
    metrics: Arc<ReplicaMetrics>,
    min_interval_seconds: i64,

    // All in epoch milliseconds, zero when unset.
    enqueue_time_ms: AtomicU64,
    start_time_ms: AtomicU64,
    last_finish_time_ms: AtomicU64,
    last_used_ms: AtomicU64,
}

impl ManualCompactService {
    pub fn new(
        config: &ManualCompactConfig,
        engine: Arc<dyn Engine>,
        clock: Arc<dyn Clock>,
        metrics: Arc<ReplicaMetrics>,
    ) -> Self {
        Self {
            engine,
            clock,
            metrics,
            min_interval_seconds: config.min_interval_seconds,
            enqueue_time_ms: AtomicU64::new(0),
            start_time_ms: AtomicU64::new(0),
            last_finish_time_ms: AtomicU64::new(0),
            last_used_ms: AtomicU64::new(0),
        }
    }

    /// Seeds the finish time of the last compaction, e.g. from engine
    /// metadata after a restart.
    pub fn init_last_finish_time_ms(&self, last_finish_time_ms: u64) {
        self.last_finish_time_ms.store(last_finish_time_ms, Ordering::SeqCst);
    }

    pub fn last_finish_time_ms(&self) -> u64 {
        self.last_finish_time_ms.load(Ordering::SeqCst)
    }

    /// True while a compaction is queued or running.
    pub fn is_pending(&self) -> bool {
        self.enqueue_time_ms.load(Ordering::SeqCst) != 0
    }

    /// Evaluates the triggers in `envs` and, if one fires and the gate
    /// admits it, spawns the compaction on `scheduler`. Returns the handle of
    /// the spawned compaction. Nothing is admitted once the scheduler is shut
    /// down or outside a tokio runtime.
    pub fn start_manual_compact_if_needed(
        self: &Arc<Self>,
        envs: &HashMap<String, String>,
        scheduler: &Scheduler,
    ) -> Option<JoinHandle<()>> {
        let key_prefix = if self.check_once_compact(envs) {
            MANUAL_COMPACT_ONCE_KEY_PREFIX
        } else if self.check_periodic_compact(envs) {
            MANUAL_COMPACT_PERIODIC_KEY_PREFIX
        } else {
            return None;
        };

        if scheduler.is_closed() {
            tracing::debug!("Ignored compact request, the replica is shutting down");
            return None;
        }
        if !self.try_admit(self.clock.now_ms()) {
            tracing::debug!(
                "Ignored compact request, the last one is ongoing or finished just now"
            );
            return None;
        }

        let options = self.extract_manual_compact_opts(envs, key_prefix);
        self.metrics.compact_enqueued();
        tracing::info!(
            rule = key_prefix,
            target_level = options.target_level,
            bottommost_level_compaction = %options.bottommost_level_compaction,
            "Enqueued manual compaction"
        );

        let this = Arc::clone(self);
        match scheduler.spawn("manual-compact", async move {
            this.manual_compact(options).await
        }) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "Dropped enqueued manual compaction");
                self.enqueue_time_ms.store(0, Ordering::SeqCst);
                self.metrics.compact_cancelled();
                None
            }
        }
    }

    /// The single-flight gate. Admits when no interval limit applies or the
    /// last compaction finished more than `min_interval_seconds` ago, and no
    /// other compaction is pending.
    pub fn try_admit(&self, now_ms: u64) -> bool {
        let last_finish = self.last_finish_time_ms.load(Ordering::SeqCst);
        let interval_passed = self.min_interval_seconds <= 0
            || last_finish == 0
            || now_ms.saturating_sub(last_finish) > self.min_interval_seconds as u64 * 1000;
        if !interval_passed {
            return false;
        }

        self.enqueue_time_ms
            .compare_exchange(0, now_ms, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// The once trigger fires when its timestamp, in epoch seconds, is after
    /// the last finish.
    pub fn check_once_compact(&self, envs: &HashMap<String, String>) -> bool {
        let Some(value) = envs.get(MANUAL_COMPACT_ONCE_TRIGGER_TIME_KEY) else {
            return false;
        };

        match value.parse::<i64>() {
            Ok(trigger_time) if trigger_time > 0 => {
                trigger_time > (self.last_finish_time_ms() / 1000) as i64
            }
            _ => {
                tracing::error!(
                    key = MANUAL_COMPACT_ONCE_TRIGGER_TIME_KEY,
                    value = %value,
                    "Invalid compaction trigger time"
                );
                false
            }
        }
    }

    /// The periodic trigger fires when one of today's trigger times has
    /// passed and is later than the last finish.
    pub fn check_periodic_compact(&self, envs: &HashMap<String, String>) -> bool {
        if envs
            .get(MANUAL_COMPACT_PERIODIC_DISABLED_KEY)
            .is_some_and(|v| v == "true")
        {
            tracing::warn!("Periodic compaction is disabled");
            return false;
        }

        let Some(value) = envs.get(MANUAL_COMPACT_PERIODIC_TRIGGER_TIME_KEY) else {
            return false;
        };

        let now_ms = self.clock.now_ms();
        let trigger_times: Vec<u64> = value
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .filter_map(|s| hh_mm_today_ms(s, now_ms))
            .collect();
        if trigger_times.is_empty() {
            tracing::error!(
                key = MANUAL_COMPACT_PERIODIC_TRIGGER_TIME_KEY,
                value = %value,
                "Invalid compaction trigger time"
            );
            return false;
        }

        let last_finish = self.last_finish_time_ms();
        trigger_times
            .into_iter()
            .any(|t| last_finish < t && t < now_ms)
    }

    /// Builds the compaction options of the trigger under `key_prefix`.
    /// Invalid values fall back to the defaults with a warning.
    pub fn extract_manual_compact_opts(
        &self,
        envs: &HashMap<String, String>,
        key_prefix: &str,
    ) -> CompactRangeOptions {
        let mut options = CompactRangeOptions::default();

        let key = format!("{}{}", key_prefix, MANUAL_COMPACT_TARGET_LEVEL_KEY);
        if let Some(value) = envs.get(&key) {
            match value.parse::<i32>() {
                Ok(level) if level >= 1 && level <= self.engine.num_levels() => {
                    options.target_level = level;
                }
                _ => tracing::warn!(
                    key = %key,
                    value = %value,
                    default = options.target_level,
                    "Invalid target level, using default"
                ),
            }
        }

        let key = format!("{}{}", key_prefix, MANUAL_COMPACT_BOTTOMMOST_LEVEL_COMPACTION_KEY);
        if let Some(value) = envs.get(&key) {
            match value.as_str() {
                MANUAL_COMPACT_BOTTOMMOST_LEVEL_COMPACTION_FORCE => {
                    options.bottommost_level_compaction = BottommostLevelCompaction::Force;
                }
                MANUAL_COMPACT_BOTTOMMOST_LEVEL_COMPACTION_SKIP => {
                    options.bottommost_level_compaction = BottommostLevelCompaction::Skip;
                }
                _ => tracing::warn!(
                    key = %key,
                    value = %value,
                    default = %options.bottommost_level_compaction,
                    "Invalid bottommost level compaction, using default"
                ),
            }
        }

        options
    }

    /// Runs one admitted compaction and releases the gate, whatever the
    /// outcome.
    async fn manual_compact(self: Arc<Self>, options: CompactRangeOptions) -> Result<()> {
        let start = self.begin_manual_compact();

        let engine = Arc::clone(&self.engine);
        let result = tokio::task::spawn_blocking(move || engine.compact_range(&options))
            .await
            .map_err(|e| Error::InvalidState(format!("Compaction join error: {}", e)))
            .and_then(|result| result);

        self.end_manual_compact(start, self.clock.now_ms());
        result
    }

    fn begin_manual_compact(&self) -> u64 {
        tracing::info!("Start to execute manual compaction");
        self.metrics.compact_started();
        let start = self.clock.now_ms();
        self.start_time_ms.store(start, Ordering::SeqCst);
        start
    }

    fn end_manual_compact(&self, start: u64, finish: u64) {
        let used = finish.saturating_sub(start);
        tracing::info!(time_used_ms = used, "Finish to execute manual compaction");
        self.last_finish_time_ms.store(finish, Ordering::SeqCst);
        self.last_used_ms.store(used, Ordering::SeqCst);
        self.enqueue_time_ms.store(0, Ordering::SeqCst);
        self.start_time_ms.store(0, Ordering::SeqCst);
        self.metrics.compact_finished();
    }

    /// Human readable state of the gate.
    pub fn query_compact_state(&self) -> String {
        let enqueue_time = self.enqueue_time_ms.load(Ordering::SeqCst);
        let start_time = self.start_time_ms.load(Ordering::SeqCst);
        let last_finish = self.last_finish_time_ms.load(Ordering::SeqCst);
        let last_used = self.last_used_ms.load(Ordering::SeqCst);

        let mut state = if last_finish > 0 {
            format!("last finish at [{}]", time_ms_to_string(last_finish))
        } else {
            "last finish at [-]".to_string()
        };
        if last_used > 0 {
            state.push_str(&format!(", last used {} ms", last_used));
        }
        if enqueue_time > 0 {
            state.push_str(&format!(
                ", recent enqueue at [{}]",
                time_ms_to_string(enqueue_time)
            ));
        }
        if start_time > 0 {
            state.push_str(&format!(", recent start at [{}]", time_ms_to_string(start_time)));
        }
        state
    }
}

/// Local time of `ms` formatted like `2024-01-02 03:04:05.678`.
fn time_ms_to_string(ms: u64) -> String {
    match Local.timestamp_millis_opt(ms as i64).single() {
        Some(time) => time.format(TIME_FORMAT).to_string(),
        None => ms.to_string(),
    }
}

/// Epoch milliseconds of `HH:MM` local time on the day of `now_ms`.
fn hh_mm_today_ms(hh_mm: &str, now_ms: u64) -> Option<u64> {
    let time = NaiveTime::parse_from_str(hh_mm.trim(), "%H:%M").ok()?;
    let today = Local.timestamp_millis_opt(now_ms as i64).single()?.date_naive();
    let trigger = today.and_time(time).and_local_timezone(Local).earliest()?;
    u64::try_from(trigger.timestamp_millis()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::engine::MemEngine;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn setup(
        min_interval_seconds: i64,
        now_ms: u64,
    ) -> (Arc<MockClock>, Arc<ManualCompactService>) {
        let clock = Arc::new(MockClock::new(now_ms));
        let service = ManualCompactService::new(
            &ManualCompactConfig::default().min_interval_seconds(min_interval_seconds),
            Arc::new(MemEngine::new()),
            clock.clone(),
            Arc::new(ReplicaMetrics::new(1, 1)),
        );
        (clock, Arc::new(service))
    }

    fn envs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Epoch milliseconds of `hh:mm` local time today.
    fn local_today_ms(hour: u32, minute: u32) -> u64 {
        let today = Local::now().date_naive();
        let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap();
        today
            .and_time(time)
            .and_local_timezone(Local)
            .earliest()
            .unwrap()
            .timestamp_millis() as u64
    }

    #[test]
    fn test_concurrent_admission_is_single_flight() {
        let (_, service) = setup(0, 1_000_000);
        let admitted = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    if service.try_admit(1_000_000) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert!(service.is_pending());
    }

    #[test]
    fn test_min_interval() {
        let (_, service) = setup(10, 0);
        let last_finish = 1_700_000_000_000;
        service.init_last_finish_time_ms(last_finish);

        assert!(!service.try_admit(last_finish + 9_000));
        assert!(!service.is_pending(), "rejected admission leaves the gate open");
        assert!(service.try_admit(last_finish + 11_000));
    }

    #[test]
    fn test_no_interval_limit() {
        let (_, service) = setup(0, 0);
        service.init_last_finish_time_ms(1_000);
        assert!(service.try_admit(1_001));

        let (_, service) = setup(-5, 0);
        service.init_last_finish_time_ms(1_000);
        assert!(service.try_admit(1_001));

        // Never compacted before.
        let (_, service) = setup(3600, 0);
        assert!(service.try_admit(1));
    }

    #[test]
    fn test_once_trigger() {
        let (_, service) = setup(0, 0);
        assert!(!service.check_once_compact(&envs(&[])));
        for invalid in ["abc", "0", "-10"] {
            let trigger = envs(&[(MANUAL_COMPACT_ONCE_TRIGGER_TIME_KEY, invalid)]);
            assert!(!service.check_once_compact(&trigger), "{}", invalid);
        }

        service.init_last_finish_time_ms(1_700_000_000_000);
        let before = envs(&[(MANUAL_COMPACT_ONCE_TRIGGER_TIME_KEY, "1699999999")]);
        let after = envs(&[(MANUAL_COMPACT_ONCE_TRIGGER_TIME_KEY, "1700000001")]);
        assert!(!service.check_once_compact(&before));
        assert!(service.check_once_compact(&after));
    }

    #[test]
    fn test_periodic_trigger() {
        let noon = local_today_ms(12, 0);
        let (clock, service) = setup(0, noon);

        let morning = envs(&[(MANUAL_COMPACT_PERIODIC_TRIGGER_TIME_KEY, "03:00,11:30")]);
        let evening = envs(&[(MANUAL_COMPACT_PERIODIC_TRIGGER_TIME_KEY, "23:00")]);
        let invalid = envs(&[(MANUAL_COMPACT_PERIODIC_TRIGGER_TIME_KEY, "25:00,,x")]);
        assert!(service.check_periodic_compact(&morning));
        assert!(!service.check_periodic_compact(&evening));
        assert!(!service.check_periodic_compact(&invalid));

        // Already compacted after the last trigger time.
        service.init_last_finish_time_ms(local_today_ms(11, 45));
        assert!(!service.check_periodic_compact(&morning));

        clock.set_ms(local_today_ms(23, 30));
        assert!(service.check_periodic_compact(&evening));

        let disabled = envs(&[
            (MANUAL_COMPACT_PERIODIC_TRIGGER_TIME_KEY, "23:00"),
            (MANUAL_COMPACT_PERIODIC_DISABLED_KEY, "true"),
        ]);
        assert!(!service.check_periodic_compact(&disabled));
    }

    #[test]
    fn test_extract_opts() {
        let (_, service) = setup(0, 0);
        let prefix = MANUAL_COMPACT_ONCE_KEY_PREFIX;

        let options = service.extract_manual_compact_opts(&envs(&[]), prefix);
        assert_eq!(options, CompactRangeOptions::default());
        assert_eq!(options.target_level, -1);
        assert_eq!(options.bottommost_level_compaction, BottommostLevelCompaction::Skip);
        assert!(options.exclusive_manual_compaction && options.change_level);

        let options = service.extract_manual_compact_opts(
            &envs(&[
                ("manual_compact.once.target_level", "3"),
                ("manual_compact.once.bottommost_level_compaction", "force"),
            ]),
            prefix,
        );
        assert_eq!(options.target_level, 3);
        assert_eq!(options.bottommost_level_compaction, BottommostLevelCompaction::Force);

        // Another trigger's keys are ignored.
        let options = service.extract_manual_compact_opts(
            &envs(&[("manual_compact.periodic.target_level", "3")]),
            prefix,
        );
        assert_eq!(options.target_level, -1);

        for level in ["0", "8", "-1", "two"] {
            let options = service.extract_manual_compact_opts(
                &envs(&[("manual_compact.once.target_level", level)]),
                prefix,
            );
            assert_eq!(options.target_level, -1, "level {}", level);
        }

        let options = service.extract_manual_compact_opts(
            &envs(&[("manual_compact.once.bottommost_level_compaction", "always")]),
            prefix,
        );
        assert_eq!(options.bottommost_level_compaction, BottommostLevelCompaction::default());
    }

    #[test]
    fn test_query_state() {
        let (_, service) = setup(0, 0);
        assert_eq!(service.query_compact_state(), "last finish at [-]");

        let finish = local_today_ms(8, 30) + 123;
        service.init_last_finish_time_ms(finish);
        service.last_used_ms.store(250, Ordering::SeqCst);
        assert!(service.try_admit(finish + 1000));

        let state = service.query_compact_state();
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        let expected = format!("last finish at [{} 08:30:00.123]", today);
        assert!(state.starts_with(&expected), "{}", state);
        assert!(state.contains(", last used 250 ms"), "{}", state);
        assert!(state.contains(", recent enqueue at ["), "{}", state);
        assert!(!state.contains("recent start"), "{}", state);
    }

    #[tokio::test]
    async fn test_compaction_lifecycle() -> Result<()> {
        let clock = Arc::new(MockClock::new(1_700_000_000_000));
        let engine = Arc::new(MemEngine::new().with_compaction_delay(Duration::from_millis(50)));
        let metrics = Arc::new(ReplicaMetrics::new(1, 1));
        let service = Arc::new(ManualCompactService::new(
            &ManualCompactConfig::default().min_interval_seconds(60),
            engine.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let scheduler = Scheduler::new();
        let trigger = envs(&[
            (MANUAL_COMPACT_ONCE_TRIGGER_TIME_KEY, "1700000000"),
            ("manual_compact.once.target_level", "2"),
        ]);

        let handle = service
            .start_manual_compact_if_needed(&trigger, &scheduler)
            .ok_or_else(|| Error::InvalidState("compaction not admitted".to_string()))?;
        assert!(service.is_pending());
        assert!(
            service.start_manual_compact_if_needed(&trigger, &scheduler).is_none(),
            "second request while pending is ignored"
        );

        handle
            .await
            .map_err(|e| Error::InvalidState(e.to_string()))?;
        assert!(!service.is_pending());
        assert_eq!(engine.compaction_count(), 1);
        assert_eq!(engine.last_compact_options().map(|o| o.target_level), Some(2));
        assert_eq!(service.last_finish_time_ms(), 1_700_000_000_000);
        let snapshot = metrics.snapshot();
        assert_eq!((snapshot.compact_enqueue_count, snapshot.compact_running_count), (0, 0));

        // The once trigger already fired, and the interval has not passed.
        assert!(service.start_manual_compact_if_needed(&trigger, &scheduler).is_none());
        clock.advance_ms(30_000);
        assert!(!service.try_admit(clock.now_ms()));

        scheduler.shutdown().await
    }

    fn once_service() -> (Arc<ManualCompactService>, Arc<ReplicaMetrics>) {
        let metrics = Arc::new(ReplicaMetrics::new(1, 1));
        let service = Arc::new(ManualCompactService::new(
            &ManualCompactConfig::default(),
            Arc::new(MemEngine::new()),
            Arc::new(MockClock::new(1_700_000_000_000)),
            metrics.clone(),
        ));
        (service, metrics)
    }

    #[tokio::test]
    async fn test_no_compaction_after_shutdown() -> Result<()> {
        let (service, metrics) = once_service();
        let scheduler = Scheduler::new();
        scheduler.shutdown().await?;

        let trigger = envs(&[(MANUAL_COMPACT_ONCE_TRIGGER_TIME_KEY, "1700000000")]);
        assert!(service.start_manual_compact_if_needed(&trigger, &scheduler).is_none());
        assert!(!service.is_pending());
        assert_eq!(metrics.snapshot().compact_enqueue_count, 0);
        Ok(())
    }

    #[test]
    fn test_no_runtime_releases_gate() {
        let (service, metrics) = once_service();
        let scheduler = Scheduler::new();

        let trigger = envs(&[(MANUAL_COMPACT_ONCE_TRIGGER_TIME_KEY, "1700000000")]);
        assert!(service.start_manual_compact_if_needed(&trigger, &scheduler).is_none());
        assert!(!service.is_pending());
        assert_eq!(metrics.snapshot().compact_enqueue_count, 0);
    }

    #[tokio::test]
    async fn test_failed_compaction_releases_gate() -> Result<()> {
        let clock = Arc::new(MockClock::new(1_700_000_000_000));
        let engine = Arc::new(MemEngine::new().with_num_levels(1));
        let service = Arc::new(ManualCompactService::new(
            &ManualCompactConfig::default(),
            engine.clone(),
            clock.clone(),
            Arc::new(ReplicaMetrics::new(1, 1)),
        ));

        // Skips option validation so the engine rejects the level.
        let options = CompactRangeOptions {
            target_level: 2,
            ..Default::default()
        };
        assert!(service.try_admit(clock.now_ms()));
        service.metrics.compact_enqueued();
        assert!(Arc::clone(&service).manual_compact(options).await.is_err());
        assert!(!service.is_pending());
        assert_eq!(engine.compaction_count(), 0);
        Ok(())
    }
}
