//! Versioned value schema.
//!
//! Every record value starts with a one byte schema version followed by a
//! fixed-size header for that version and then the user payload:
//!
//! ```text
//! v0: | 0 | expire_ts (u32 BE) |                     payload |
//! v1: | 1 | expire_ts (u32 BE) | timetag (u64 BE)  | payload |
//! ```
//!
//! Records written by any past version must stay readable, so a version is
//! never removed from [`decode`].

use byteorder::{BigEndian, ByteOrder};

use super::{timetag, EncodingError};
use crate::error::Result;

pub const VERSION_0: u32 = 0;
pub const VERSION_1: u32 = 1;
pub const LATEST_VERSION: u32 = VERSION_1;

const VERSION_LEN: usize = 1;
const EXPIRE_TS_LEN: usize = 4;
const TIMETAG_LEN: usize = 8;

/// A decoded record value, borrowing the payload from the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub version: u32,
    pub expire_ts: u32,
    /// Zero for versions that predate timetags.
    pub timetag: u64,
    pub payload: &'a [u8],
}

impl Record<'_> {
    /// Left behind by a replayed remove. It holds no value, only the remove's
    /// timetag, so a replay older than the remove cannot bring the key back.
    pub fn is_tombstone(&self) -> bool {
        timetag::is_delete(self.timetag)
    }
}

/// Size of the header a version prepends to the payload.
pub fn header_len(version: u32) -> Result<usize> {
    match version {
        VERSION_0 => Ok(VERSION_LEN + EXPIRE_TS_LEN),
        VERSION_1 => Ok(VERSION_LEN + EXPIRE_TS_LEN + TIMETAG_LEN),
        v => Err(EncodingError::UnsupportedVersion(v).into()),
    }
}

/// Prepends the header of `version` to `payload`. The timetag is dropped by
/// versions that cannot carry it.
pub fn encode(version: u32, payload: &[u8], expire_ts: u32, timetag: u64) -> Result<Vec<u8>> {
    let header = header_len(version)?;
    let mut buf = vec![0u8; header + payload.len()];
    buf[0] = version as u8;
    BigEndian::write_u32(&mut buf[VERSION_LEN..VERSION_LEN + EXPIRE_TS_LEN], expire_ts);
    if version >= VERSION_1 {
        let start = VERSION_LEN + EXPIRE_TS_LEN;
        BigEndian::write_u64(&mut buf[start..start + TIMETAG_LEN], timetag);
    }
    buf[header..].copy_from_slice(payload);
    Ok(buf)
}

pub fn decode(raw: &[u8]) -> Result<Record<'_>> {
    let version = *raw.first().ok_or(EncodingError::TruncatedData)? as u32;
    let header = header_len(version)?;
    if raw.len() < header {
        return Err(EncodingError::TruncatedData.into());
    }

    let expire_ts = BigEndian::read_u32(&raw[VERSION_LEN..VERSION_LEN + EXPIRE_TS_LEN]);
    let timetag = match version {
        VERSION_0 => 0,
        _ => {
            let start = VERSION_LEN + EXPIRE_TS_LEN;
            BigEndian::read_u64(&raw[start..start + TIMETAG_LEN])
        }
    };

    Ok(Record {
        version,
        expire_ts,
        timetag,
        payload: &raw[header..],
    })
}

/// Reads only the expiration timestamp of a raw value.
pub fn extract_expire_ts(raw: &[u8]) -> Result<u32> {
    decode(raw).map(|record| record.expire_ts)
}

/// Reads only the timetag of a raw value.
pub fn extract_timetag(raw: &[u8]) -> Result<u64> {
    decode(raw).map(|record| record.timetag)
}

/// `expire_ts == 0` means the record never expires.
pub fn is_expired(now_epoch_secs: u32, expire_ts: u32) -> bool {
    expire_ts != 0 && now_epoch_secs >= expire_ts
}

pub fn is_record_expired(now_epoch_secs: u32, raw: &[u8]) -> Result<bool> {
    Ok(is_expired(now_epoch_secs, extract_expire_ts(raw)?))
}
