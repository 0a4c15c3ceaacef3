//! Interface of the embedded LSM engine the write path is layered on.
//!
//! The write path only needs three things from the engine: point reads,
//! atomic batched writes tagged with the replication decree, and manual
//! range compaction. Any engine offering those (and reporting failures as
//! [`crate::Status`] codes) can back a replica.

pub mod memory;

use std::fmt;

use crate::error::Result;

pub use memory::MemEngine;

/// A single engine-level mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }

    /// Bytes this op adds to a batch.
    pub fn size(&self) -> usize {
        match self {
            BatchOp::Put { key, value } => key.len() + value.len(),
            BatchOp::Delete { key } => key.len(),
        }
    }
}

/// How the bottommost level takes part in a manual compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BottommostLevelCompaction {
    /// Leave the bottommost level alone.
    #[default]
    Skip,
    /// Always rewrite the bottommost level.
    Force,
}

impl fmt::Display for BottommostLevelCompaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BottommostLevelCompaction::Skip => {
                f.write_str(crate::config::MANUAL_COMPACT_BOTTOMMOST_LEVEL_COMPACTION_SKIP)
            }
            BottommostLevelCompaction::Force => {
                f.write_str(crate::config::MANUAL_COMPACT_BOTTOMMOST_LEVEL_COMPACTION_FORCE)
            }
        }
    }
}

/// Options of a full-range manual compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactRangeOptions {
    pub exclusive_manual_compaction: bool,
    pub change_level: bool,
    /// `-1` lets the engine pick the level.
    pub target_level: i32,
    pub bottommost_level_compaction: BottommostLevelCompaction,
}

impl Default for CompactRangeOptions {
    fn default() -> Self {
        Self {
            exclusive_manual_compaction: true,
            change_level: true,
            target_level: -1,
            bottommost_level_compaction: BottommostLevelCompaction::default(),
        }
    }
}

/// Decides, during compaction, whether a record should be dropped.
pub trait CompactionFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns true to drop the record.
    fn filter(&self, key: &[u8], value: &[u8]) -> bool;
}

/// The embedded key-value engine.
///
/// Implementations must be safe for concurrent readers alongside a single
/// serialized writer, and must allow compaction to run concurrently with both.
pub trait Engine: Send + Sync {
    /// Point read; `Ok(None)` when the key does not exist.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Applies `ops` atomically and records `decree` as the last applied
    /// sequence number.
    fn write(&self, ops: &[BatchOp], decree: i64) -> Result<()>;

    /// Compacts the whole key range.
    fn compact_range(&self, options: &CompactRangeOptions) -> Result<()>;

    /// Number of levels the engine is configured with.
    fn num_levels(&self) -> i32;

    /// Highest decree durably applied by [`Engine::write`].
    fn last_applied_decree(&self) -> i64;
}

