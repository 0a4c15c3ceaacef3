use std::time::Duration;

/// Environment key of the one-shot manual compaction trigger (unix seconds).
pub const MANUAL_COMPACT_ONCE_TRIGGER_TIME_KEY: &str = "manual_compact.once.trigger_time";
/// Prefix of the keys that parameterize a one-shot compaction.
pub const MANUAL_COMPACT_ONCE_KEY_PREFIX: &str = "manual_compact.once.";
/// Environment key of the periodic trigger: comma separated `HH:MM` local times.
pub const MANUAL_COMPACT_PERIODIC_TRIGGER_TIME_KEY: &str = "manual_compact.periodic.trigger_time";
/// Prefix of the keys that parameterize a periodic compaction.
pub const MANUAL_COMPACT_PERIODIC_KEY_PREFIX: &str = "manual_compact.periodic.";
/// Setting this key to `"true"` turns periodic compaction off.
pub const MANUAL_COMPACT_PERIODIC_DISABLED_KEY: &str = "manual_compact.periodic.disabled";
/// Suffix, appended to a trigger prefix, of the target level key.
pub const MANUAL_COMPACT_TARGET_LEVEL_KEY: &str = "target_level";
/// Suffix, appended to a trigger prefix, of the bottommost compaction mode key.
pub const MANUAL_COMPACT_BOTTOMMOST_LEVEL_COMPACTION_KEY: &str = "bottommost_level_compaction";
pub const MANUAL_COMPACT_BOTTOMMOST_LEVEL_COMPACTION_FORCE: &str = "force";
pub const MANUAL_COMPACT_BOTTOMMOST_LEVEL_COMPACTION_SKIP: &str = "skip";

/// Configuration for one replica of a partition
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Table the partition belongs to (default: 1)
    pub app_id: i32,

    /// Index of the partition inside the table (default: 0)
    pub partition_index: i32,

    /// Address reported in write responses (default: "127.0.0.1:34801")
    pub primary_address: String,

    /// Id of the local cluster, 7 usable bits (default: 1)
    pub cluster_id: u8,

    /// Value schema version used for new records (default: 1)
    pub value_schema_version: u32,

    /// Bytes per read capacity unit (default: 4KB)
    pub read_capacity_unit_size: u64,

    /// Bytes per write capacity unit (default: 4KB)
    pub write_capacity_unit_size: u64,

    /// Upper bound of the accumulated write batch (default: 64MB)
    pub max_write_batch_bytes: usize,

    /// How often to log metric snapshots (default: 10s)
    pub metrics_interval: Duration,

    /// Manual compaction configuration
    pub compaction: ManualCompactConfig,
}

#[derive(Debug, Clone)]
pub struct ManualCompactConfig {
    /// Minimal interval between the finish of one manual compaction and the
    /// start of the next, `<= 0` means no limit (default: 0)
    pub min_interval_seconds: i64,

    /// How often the compaction triggers are re-evaluated (default: 60s)
    pub check_interval: Duration,
}

impl Default for ManualCompactConfig {
    fn default() -> Self {
        Self {
            min_interval_seconds: 0,
            check_interval: Duration::from_secs(60),
        }
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            app_id: 1,
            partition_index: 0,
            primary_address: "127.0.0.1:34801".to_string(),
            cluster_id: 1,
            value_schema_version: 1,
            read_capacity_unit_size: 4 * 1024,
            write_capacity_unit_size: 4 * 1024,
            max_write_batch_bytes: 64 * 1024 * 1024, // 64MB
            metrics_interval: Duration::from_secs(10),
            compaction: ManualCompactConfig::default(),
        }
    }
}

impl ReplicaConfig {
    /// Create a config for the given partition
    pub fn new(app_id: i32, partition_index: i32) -> Self {
        Self {
            app_id,
            partition_index,
            ..Default::default()
        }
    }

    pub fn primary_address(mut self, address: impl Into<String>) -> Self {
        self.primary_address = address.into();
        self
    }

    /// Set the local cluster id, at most 127
    pub fn cluster_id(mut self, cluster_id: u8) -> Self {
        self.cluster_id = cluster_id;
        self
    }

    pub fn value_schema_version(mut self, version: u32) -> Self {
        self.value_schema_version = version;
        self
    }

    pub fn read_capacity_unit_size(mut self, size: u64) -> Self {
        self.read_capacity_unit_size = size;
        self
    }

    pub fn write_capacity_unit_size(mut self, size: u64) -> Self {
        self.write_capacity_unit_size = size;
        self
    }

    pub fn max_write_batch_bytes(mut self, size: usize) -> Self {
        self.max_write_batch_bytes = size;
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Configure manual compaction settings
    pub fn compaction(mut self, config: ManualCompactConfig) -> Self {
        self.compaction = config;
        self
    }
}

impl ManualCompactConfig {
    pub fn min_interval_seconds(mut self, seconds: i64) -> Self {
        self.min_interval_seconds = seconds;
        self
    }

    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }
}
