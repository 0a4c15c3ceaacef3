//! Typed requests and responses of the write operations.

use serde::{Deserialize, Serialize};

use crate::encoding::bincode;
use crate::error::{Result, Status};

/// Single-key put. `key` is an encoded storage key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Absolute expiration in epoch seconds, 0 for none.
    pub expire_ts_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Puts several sort keys of one hash key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MultiPutRequest {
    pub hash_key: Vec<u8>,
    pub kvs: Vec<KeyValue>,
    pub expire_ts_seconds: u32,
}

/// Removes several sort keys of one hash key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MultiRemoveRequest {
    pub hash_key: Vec<u8>,
    pub sort_keys: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IncrRequest {
    pub key: Vec<u8>,
    pub increment: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckAndSetRequest {
    pub hash_key: Vec<u8>,
    pub check_sort_key: Vec<u8>,
    /// Wire value of a [`super::CasCheckType`]; validated on use.
    pub check_type: i32,
    pub check_operand: Vec<u8>,
    /// When false the value is set on the check key.
    pub set_diff_sort_key: bool,
    pub set_sort_key: Vec<u8>,
    pub set_value: Vec<u8>,
    pub set_expire_ts_seconds: u32,
    pub return_check_value: bool,
}

/// A write that can be replayed into another cluster.
///
/// Increments and check-and-sets depend on the value they read, so replaying
/// them elsewhere would not be idempotent; they are not duplicable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatedWrite {
    Put(UpdateRequest),
    Remove { key: Vec<u8> },
    MultiPut(MultiPutRequest),
    MultiRemove(MultiRemoveRequest),
}

impl DuplicatedWrite {
    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            DuplicatedWrite::Remove { .. } | DuplicatedWrite::MultiRemove(_)
        )
    }
}

/// A write shipped from another cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DuplicateRequest {
    /// Wall clock of the original write, in milliseconds.
    pub timestamp: u64,
    /// Cluster the write originated from.
    pub cluster_id: u8,
    /// bincode encoded [`DuplicatedWrite`].
    pub raw_message: Vec<u8>,
}

impl DuplicateRequest {
    pub fn new(timestamp: u64, cluster_id: u8, write: &DuplicatedWrite) -> Result<Self> {
        Ok(Self {
            timestamp,
            cluster_id,
            raw_message: bincode::serialize(write)?,
        })
    }

    pub fn decode_write(&self) -> Result<DuplicatedWrite> {
        bincode::deserialize(&self.raw_message)
    }
}

/// Fields every write response carries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseHeader {
    pub app_id: i32,
    pub partition_index: i32,
    pub decree: i64,
    pub server: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateResponse {
    pub error: Status,
    pub header: ResponseHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultiRemoveResponse {
    pub error: Status,
    pub header: ResponseHeader,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IncrResponse {
    pub error: Status,
    pub header: ResponseHeader,
    pub new_value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckAndSetResponse {
    pub error: Status,
    pub header: ResponseHeader,
    pub check_value_returned: bool,
    pub check_value_exist: bool,
    pub check_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DuplicateResponse {
    pub error: Status,
    pub header: ResponseHeader,
    /// Keys whose write was newer than the stored record.
    pub applied: u64,
}

/// Any mutation the replication layer can hand to a replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    Put(UpdateRequest),
    Remove { key: Vec<u8> },
    MultiPut(MultiPutRequest),
    MultiRemove(MultiRemoveRequest),
    Incr(IncrRequest),
    CheckAndSet(CheckAndSetRequest),
    Duplicate(DuplicateRequest),
}

impl WriteRequest {
    /// Single puts and removes can share a decree with other single puts and
    /// removes; every other request owns its decree.
    pub fn is_batchable(&self) -> bool {
        matches!(self, WriteRequest::Put(_) | WriteRequest::Remove { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResponse {
    Update(UpdateResponse),
    MultiRemove(MultiRemoveResponse),
    Incr(IncrResponse),
    CheckAndSet(CheckAndSetResponse),
    Duplicate(DuplicateResponse),
}

impl WriteResponse {
    pub fn error(&self) -> Status {
        match self {
            WriteResponse::Update(r) => r.error,
            WriteResponse::MultiRemove(r) => r.error,
            WriteResponse::Incr(r) => r.error,
            WriteResponse::CheckAndSet(r) => r.error,
            WriteResponse::Duplicate(r) => r.error,
        }
    }
}
