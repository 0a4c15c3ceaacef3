//! Record encodings layered on top of the embedded engine.
//!
//! The engine only stores opaque byte strings. Everything that gives those
//! bytes meaning lives here:
//!
//! - [`key`]: the composite storage key built from a hash key and a sort key
//! - [`value`]: the versioned value header carrying TTL and conflict timetag
//! - [`timetag`]: the 64-bit write timestamp used for cross-cluster ordering
//! - [`bincode`]: serialization of requests shipped between clusters
//! - [`format`]: human readable rendering of keys for logs

pub mod bincode;
pub mod format;
pub mod key;
pub mod timetag;
pub mod value;

/// Error type for encoding operations
#[derive(Debug)]
pub enum EncodingError {
    InvalidFormat(String),
    UnsupportedVersion(u32),
    TruncatedData,
    KeyTooLong(usize),
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::InvalidFormat(msg) => write!(f, "Invalid encoding format: {}", msg),
            EncodingError::UnsupportedVersion(v) => {
                write!(f, "Unsupported value schema version: {}", v)
            }
            EncodingError::TruncatedData => write!(f, "Truncated data"),
            EncodingError::KeyTooLong(len) => write!(f, "Hash key too long: {} bytes", len),
        }
    }
}

impl std::error::Error for EncodingError {}

impl From<EncodingError> for crate::Error {
    fn from(err: EncodingError) -> Self {
        match err {
            EncodingError::KeyTooLong(_) => crate::Error::InvalidArgument(err.to_string()),
            _ => crate::Error::Corruption(err.to_string()),
        }
    }
}
