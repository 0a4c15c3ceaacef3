use std::fmt;

use crc::{Algorithm, Crc};

pub const CRC_64_ECMA: Algorithm<u64> = crc::CRC_64_ECMA_182;

/// CRC-64 used to route hash keys to partitions. Must stay stable across
/// releases: every client and server computes the same value for a key.
#[derive(Clone)]
pub struct KeyHasher {
    crc64: Crc<u64>,
}

impl fmt::Debug for KeyHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyHasher")
    }
}

impl KeyHasher {
    pub const fn new() -> Self {
        Self {
            crc64: Crc::<u64>::new(&CRC_64_ECMA),
        }
    }

    pub fn hash(&self, data: &[u8]) -> u64 {
        self.crc64.checksum(data)
    }
}

impl Default for KeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

static KEY_HASHER: KeyHasher = KeyHasher::new();

/// Hash of raw bytes with the routing CRC.
pub fn crc64(data: &[u8]) -> u64 {
    KEY_HASHER.hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let hasher = KeyHasher::new();
        assert_eq!(hasher.hash(b"user:42"), hasher.hash(b"user:42"));
        assert_eq!(hasher.hash(b"user:42"), crc64(b"user:42"));
    }

    #[test]
    fn test_different_data_different_hashes() {
        assert_ne!(crc64(b"hello"), crc64(b"world"), "Different keys should hash apart");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(crc64(b""), KeyHasher::new().hash(&[]));
    }
}
