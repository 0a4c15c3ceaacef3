//! Last-writer-wins resolution for writes replayed from another cluster.
//!
//! Every stored record carries the timetag of the write that produced it.
//! A replayed write is applied only when its timetag is strictly newer than
//! the stored one, so replays are idempotent and the final value does not
//! depend on arrival order.

/// Returns true iff a write tagged `incoming` must be applied over a record
/// tagged `existing`.
pub fn should_apply(existing: Option<u64>, incoming: u64) -> bool {
    match existing {
        None => true,
        Some(existing) => incoming > existing,
    }
}
