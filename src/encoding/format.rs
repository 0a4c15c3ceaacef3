//! Formats raw storage keys for log lines.

use itertools::Itertools as _;

use super::key;

/// Formats raw bytes as an escaped ASCII string.
pub fn bytes(bytes: &[u8]) -> String {
    let escaped = bytes
        .iter()
        .copied()
        .flat_map(std::ascii::escape_default)
        .collect_vec();
    format!("\"{}\"", String::from_utf8_lossy(&escaped))
}

/// Formats an encoded storage key as `hash_key : sort_key`, falling back to
/// the raw bytes when the key does not parse.
pub fn storage_key(raw: &[u8]) -> String {
    match key::parse(raw) {
        Ok((hash_key, sort_key)) => format!("{} : {}", bytes(hash_key), bytes(sort_key)),
        Err(_) => bytes(raw),
    }
}

/// Formats a list of sort keys, used when logging multi-key requests.
pub fn sort_keys<'a>(keys: impl IntoIterator<Item = &'a [u8]>) -> String {
    format!("[{}]", keys.into_iter().map(bytes).join(", "))
}
