//! Wire form of writes shipped between clusters.
//!
//! Fixed-width integers, little endian, and no trailing bytes: a duplicated
//! payload decodes to exactly one write or fails.

use bincode::{ErrorKind, Options};
use serde::{de::DeserializeOwned, Serialize};

use super::EncodingError;
use crate::error::Result;

/// Largest payload accepted from a remote cluster.
pub const MAX_PAYLOAD_BYTES: u64 = 64 << 20;

fn options() -> impl Options {
    bincode::options()
        .with_fixint_encoding()
        .reject_trailing_bytes()
        .with_limit(MAX_PAYLOAD_BYTES)
}

pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    options()
        .serialize(value)
        .map_err(|e| EncodingError::InvalidFormat(format!("cannot serialize: {}", e)).into())
}

pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    options().deserialize(bytes).map_err(|e| match *e {
        ErrorKind::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            EncodingError::TruncatedData.into()
        }
        ErrorKind::SizeLimit => EncodingError::InvalidFormat(format!(
            "payload exceeds {} bytes",
            MAX_PAYLOAD_BYTES
        ))
        .into(),
        other => EncodingError::InvalidFormat(format!("cannot deserialize: {}", other)).into(),
    })
}
