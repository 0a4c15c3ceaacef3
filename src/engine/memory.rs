//! In-memory engine on a concurrent skip list.
//!
//! `MemEngine` implements [`Engine`] with the same visibility rules as a real
//! LSM engine: a batch becomes visible all at once, readers never observe half
//! of it, and the decree of the last applied batch is tracked alongside the
//! data. Compaction rewrites nothing but runs the registered
//! [`CompactionFilter`] over every record, which is what manual compaction is
//! used for on the write path (dropping expired records).
//!
//! One-shot fault injection (`fail_next_write`, `fail_next_get`) lets callers
//! exercise the engine-fault paths of the write service.

use std::sync::{
    atomic::{AtomicI64, AtomicU64, Ordering},
    Arc, Mutex, RwLock,
};
use std::time::Duration;

use crossbeam_skiplist::SkipMap;

use super::{BatchOp, CompactRangeOptions, CompactionFilter, Engine};
use crate::error::{Error, Result, Status};

const DEFAULT_NUM_LEVELS: i32 = 7;

pub struct MemEngine {
    data: SkipMap<Vec<u8>, Vec<u8>>,
    // Writers take it exclusively so a batch is visible atomically.
    apply_lock: RwLock<()>,
    last_applied_decree: AtomicI64,
    num_levels: i32,
    filter: Option<Arc<dyn CompactionFilter>>,
    compaction_delay: Duration,

    compactions: AtomicU64,
    filtered: AtomicU64,
    last_compact_options: Mutex<Option<CompactRangeOptions>>,

    write_fault: Mutex<Option<Status>>,
    get_fault: Mutex<Option<Status>>,
}

impl std::fmt::Debug for MemEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemEngine")
            .field("len", &self.data.len())
            .field("last_applied_decree", &self.last_applied_decree())
            .field("num_levels", &self.num_levels)
            .finish()
    }
}

impl Default for MemEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemEngine {
    pub fn new() -> Self {
        Self {
            data: SkipMap::new(),
            apply_lock: RwLock::new(()),
            last_applied_decree: AtomicI64::new(0),
            num_levels: DEFAULT_NUM_LEVELS,
            filter: None,
            compaction_delay: Duration::ZERO,
            compactions: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            last_compact_options: Mutex::new(None),
            write_fault: Mutex::new(None),
            get_fault: Mutex::new(None),
        }
    }

    pub fn with_num_levels(mut self, num_levels: i32) -> Self {
        self.num_levels = num_levels;
        self
    }

    pub fn with_compaction_filter(mut self, filter: Arc<dyn CompactionFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Makes every compaction take at least `delay`.
    pub fn with_compaction_delay(mut self, delay: Duration) -> Self {
        self.compaction_delay = delay;
        self
    }

    /// The next `write` fails with `status` without applying anything.
    pub fn fail_next_write(&self, status: Status) {
        if let Ok(mut fault) = self.write_fault.lock() {
            *fault = Some(status);
        }
    }

    /// The next `get` fails with `status`.
    pub fn fail_next_get(&self, status: Status) {
        if let Ok(mut fault) = self.get_fault.lock() {
            *fault = Some(status);
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn compaction_count(&self) -> u64 {
        self.compactions.load(Ordering::SeqCst)
    }

    /// Records dropped by the compaction filter so far.
    pub fn filtered_count(&self) -> u64 {
        self.filtered.load(Ordering::SeqCst)
    }

    pub fn last_compact_options(&self) -> Option<CompactRangeOptions> {
        self.last_compact_options.lock().ok().and_then(|o| *o)
    }

    fn take_fault(fault: &Mutex<Option<Status>>) -> Result<Option<Status>> {
        Ok(fault.lock()?.take())
    }
}

impl Engine for MemEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(status) = Self::take_fault(&self.get_fault)? {
            return Err(Error::engine(status, "injected get failure"));
        }

        let _guard = self.apply_lock.read()?;
        Ok(self.data.get(key).map(|entry| entry.value().clone()))
    }

    fn write(&self, ops: &[BatchOp], decree: i64) -> Result<()> {
        if let Some(status) = Self::take_fault(&self.write_fault)? {
            return Err(Error::engine(
                status,
                format!("injected write failure at decree {}", decree),
            ));
        }

        let _guard = self.apply_lock.write()?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    self.data.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    self.data.remove(key);
                }
            }
        }
        self.last_applied_decree.fetch_max(decree, Ordering::SeqCst);
        Ok(())
    }

    fn compact_range(&self, options: &CompactRangeOptions) -> Result<()> {
        if options.target_level > self.num_levels {
            return Err(Error::engine(
                Status::InvalidArgument,
                format!(
                    "target level {} exceeds level count {}",
                    options.target_level, self.num_levels
                ),
            ));
        }

        if !self.compaction_delay.is_zero() {
            std::thread::sleep(self.compaction_delay);
        }

        if let Some(filter) = &self.filter {
            // Records are filtered one at a time, concurrent writers are not blocked.
            for entry in self.data.iter() {
                if filter.filter(entry.key(), entry.value()) {
                    let _guard = self.apply_lock.write()?;
                    // Only drop the exact record that was filtered.
                    if let Some(current) = self.data.get(entry.key()) {
                        if current.value() == entry.value() {
                            current.remove();
                            self.filtered.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            }
        }

        *self.last_compact_options.lock()? = Some(*options);
        self.compactions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn num_levels(&self) -> i32 {
        self.num_levels
    }

    fn last_applied_decree(&self) -> i64 {
        self.last_applied_decree.load(Ordering::SeqCst)
    }
}
