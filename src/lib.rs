pub mod clock;
pub mod compaction;
pub mod config;
pub mod conflict;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod metrics;
pub mod read;
pub mod replica;
pub mod scheduler;
pub mod write;

pub use clock::{Clock, MockClock, SystemClock};
pub use compaction::{ManualCompactService, TtlCompactionFilter};
pub use config::{ManualCompactConfig, ReplicaConfig};
pub use engine::{Engine, MemEngine};
pub use error::{Error, Result, Status};
pub use hasher::KeyHasher;
pub use metrics::ReplicaMetrics;
pub use read::{ReadService, Ttl};
pub use replica::{Replica, WriteOutcome};
pub use write::{WriteContext, WriteRequest, WriteResponse, WriteService};
