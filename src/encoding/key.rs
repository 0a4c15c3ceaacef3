//! Composite storage key.
//!
//! ```text
//! +----------------------+-----------------+-----------------+
//! | hash_key_len (u16 BE)| hash_key bytes  | sort_key bytes  |
//! +----------------------+-----------------+-----------------+
//! ```
//!
//! The length prefix makes the encoding injective and keeps every record of
//! one hash key in a single contiguous range, ordered by sort key. Across hash
//! keys the order is (hash key length, hash key bytes), not plain byte order
//! of the hash key: every key under `b"b"` sorts before every key under
//! `b"aa"`. Scans that need lexicographic hash-key order cannot rely on the
//! encoded order, and neither does the derived `Ord` of [`CompositeKey`]
//! match it.

use std::num::NonZeroU32;

use byteorder::{BigEndian, ByteOrder};

use super::EncodingError;
use crate::error::Result;
use crate::hasher;

const LEN_PREFIX: usize = 2;

/// Longest hash key the two byte prefix can describe.
pub const MAX_HASH_KEY_LEN: usize = u16::MAX as usize - 1;

/// A decoded composite key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey {
    pub hash_key: Vec<u8>,
    pub sort_key: Vec<u8>,
}

impl CompositeKey {
    pub fn new(hash_key: impl Into<Vec<u8>>, sort_key: impl Into<Vec<u8>>) -> Self {
        Self {
            hash_key: hash_key.into(),
            sort_key: sort_key.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        build(&self.hash_key, &self.sort_key)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (hash_key, sort_key) = parse(bytes)?;
        Ok(Self::new(hash_key, sort_key))
    }
}

/// Builds the storage key of `(hash_key, sort_key)`.
pub fn build(hash_key: &[u8], sort_key: &[u8]) -> Result<Vec<u8>> {
    if hash_key.len() > MAX_HASH_KEY_LEN {
        return Err(EncodingError::KeyTooLong(hash_key.len()).into());
    }

    let mut key = vec![0u8; LEN_PREFIX + hash_key.len() + sort_key.len()];
    BigEndian::write_u16(&mut key[..LEN_PREFIX], hash_key.len() as u16);
    key[LEN_PREFIX..LEN_PREFIX + hash_key.len()].copy_from_slice(hash_key);
    key[LEN_PREFIX + hash_key.len()..].copy_from_slice(sort_key);
    Ok(key)
}

/// Splits a storage key back into `(hash_key, sort_key)`.
pub fn parse(key: &[u8]) -> Result<(&[u8], &[u8])> {
    if key.len() < LEN_PREFIX {
        return Err(EncodingError::TruncatedData.into());
    }

    let hash_key_len = BigEndian::read_u16(&key[..LEN_PREFIX]) as usize;
    let rest = &key[LEN_PREFIX..];
    if rest.len() < hash_key_len {
        return Err(EncodingError::InvalidFormat(format!(
            "hash key length {} exceeds key size {}",
            hash_key_len,
            rest.len()
        ))
        .into());
    }

    Ok(rest.split_at(hash_key_len))
}

/// Routing hash of a hash key.
pub fn hash(hash_key: &[u8]) -> u64 {
    hasher::crc64(hash_key)
}

/// Routing hash of an encoded storage key. Keys with an empty hash key are
/// routed by their sort key.
pub fn key_hash(key: &[u8]) -> Result<u64> {
    let (hash_key, sort_key) = parse(key)?;
    if hash_key.is_empty() {
        Ok(hash(sort_key))
    } else {
        Ok(hash(hash_key))
    }
}

/// Partition a routing hash belongs to.
pub fn partition_of(hash: u64, partition_count: NonZeroU32) -> u32 {
    (hash % u64::from(partition_count.get())) as u32
}
