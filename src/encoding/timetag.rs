//! Write timetags.
//!
//! ```text
//!  63                                   8 7          1       0
//! +--------------------------------------+------------+-------+
//! |      wall clock (milliseconds)       | cluster id | del   |
//! +--------------------------------------+------------+-------+
//! ```
//!
//! Comparing two timetags as plain integers orders writes by wall clock, then
//! by originating cluster, then puts before deletes of the same instant.

const CLUSTER_ID_MASK: u64 = 0x7F;

/// Largest cluster id a timetag can carry.
pub const MAX_CLUSTER_ID: u8 = CLUSTER_ID_MASK as u8;

/// Packs a write's timestamp, originating cluster and delete marker.
pub fn generate(timestamp_ms: u64, cluster_id: u8, delete: bool) -> u64 {
    (timestamp_ms << 8) | ((cluster_id as u64 & CLUSTER_ID_MASK) << 1) | delete as u64
}

pub fn timestamp_ms(timetag: u64) -> u64 {
    timetag >> 8
}

pub fn cluster_id(timetag: u64) -> u8 {
    ((timetag >> 1) & CLUSTER_ID_MASK) as u8
}

pub fn is_delete(timetag: u64) -> bool {
    timetag & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_extract() {
        let tag = generate(1_700_000_000_123, 5, true);
        assert_eq!(timestamp_ms(tag), 1_700_000_000_123);
        assert_eq!(cluster_id(tag), 5);
        assert!(is_delete(tag));

        let tag = generate(10, 127, false);
        assert_eq!(cluster_id(tag), 127);
        assert!(!is_delete(tag));
    }

    #[test]
    fn test_cluster_id_is_masked() {
        assert_eq!(cluster_id(generate(1, 0x80 | 3, false)), 3);
    }

    #[test]
    fn test_ordering() {
        // Wall clock dominates.
        assert!(generate(101, 1, false) > generate(100, 100, true));
        // Cluster id breaks ties.
        assert!(generate(100, 2, false) > generate(100, 1, false));
        // The delete marker orders a delete after a put of the same instant.
        assert!(generate(100, 1, true) > generate(100, 1, false));
    }
}
