use crate::encoding::timetag;

/// Per-mutation context handed down by the replication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteContext {
    /// Position of the mutation in the replicated log.
    pub decree: i64,
    /// Timetag stored with the records this write produces.
    pub timetag: u64,
    /// Timetag of the remote write, 0 if the write originated locally.
    pub remote_timetag: u64,
}

impl WriteContext {
    pub fn put(decree: i64, timestamp_ms: u64, cluster_id: u8) -> Self {
        Self::local(decree, timestamp_ms, cluster_id, false)
    }

    pub fn remove(decree: i64, timestamp_ms: u64, cluster_id: u8) -> Self {
        Self::local(decree, timestamp_ms, cluster_id, true)
    }

    /// Context of a write replayed from another cluster.
    pub fn duplicated(decree: i64, remote_timetag: u64) -> Self {
        Self {
            decree,
            timetag: remote_timetag,
            remote_timetag,
        }
    }

    pub fn is_duplicated(&self) -> bool {
        self.remote_timetag != 0
    }

    fn local(decree: i64, timestamp_ms: u64, cluster_id: u8, delete: bool) -> Self {
        Self {
            decree,
            timetag: timetag::generate(timestamp_ms, cluster_id, delete),
            remote_timetag: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_contexts() {
        let put = WriteContext::put(10, 1000, 1);
        let remove = WriteContext::remove(10, 1000, 1);

        assert_eq!(put.decree, 10);
        assert!(!put.is_duplicated());
        assert!(!timetag::is_delete(put.timetag));
        assert!(timetag::is_delete(remove.timetag));
        assert_eq!(timetag::timestamp_ms(remove.timetag), 1000);
    }

    #[test]
    fn test_duplicated_context() {
        let tag = timetag::generate(500, 3, false);
        let ctx = WriteContext::duplicated(11, tag);
        assert!(ctx.is_duplicated());
        assert_eq!(ctx.timetag, tag);
    }
}
