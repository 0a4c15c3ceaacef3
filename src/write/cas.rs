//! Predicates of check-and-set.

use crate::error::{Error, Result};

/// Condition a check-and-set evaluates against the current value of its
/// check key. Discriminants are the wire values.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasCheckType {
    NoCheck = 0,
    ValueNotExist = 1,
    ValueNotExistOrEmpty = 2,
    ValueExist = 3,
    ValueNotEmpty = 4,
    ValueMatchAnywhere = 5,
    ValueMatchPrefix = 6,
    ValueMatchPostfix = 7,
    ValueEqual = 8,
}

impl TryFrom<i32> for CasCheckType {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        Ok(match value {
            0 => CasCheckType::NoCheck,
            1 => CasCheckType::ValueNotExist,
            2 => CasCheckType::ValueNotExistOrEmpty,
            3 => CasCheckType::ValueExist,
            4 => CasCheckType::ValueNotEmpty,
            5 => CasCheckType::ValueMatchAnywhere,
            6 => CasCheckType::ValueMatchPrefix,
            7 => CasCheckType::ValueMatchPostfix,
            8 => CasCheckType::ValueEqual,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "check type {} not supported",
                    other
                )))
            }
        })
    }
}

impl From<CasCheckType> for i32 {
    fn from(check_type: CasCheckType) -> Self {
        check_type as i32
    }
}

impl CasCheckType {
    /// Evaluates the predicate. `value` is `None` when the check key is
    /// absent or expired.
    pub fn validate(self, operand: &[u8], value: Option<&[u8]>) -> bool {
        match self {
            CasCheckType::NoCheck => true,
            CasCheckType::ValueNotExist => value.is_none(),
            CasCheckType::ValueNotExistOrEmpty => value.map_or(true, |v| v.is_empty()),
            CasCheckType::ValueExist => value.is_some(),
            CasCheckType::ValueNotEmpty => value.is_some_and(|v| !v.is_empty()),
            CasCheckType::ValueEqual => value == Some(operand),
            CasCheckType::ValueMatchAnywhere => {
                value.is_some_and(|v| contains(v, operand))
            }
            CasCheckType::ValueMatchPrefix => value.is_some_and(|v| v.starts_with(operand)),
            CasCheckType::ValueMatchPostfix => value.is_some_and(|v| v.ends_with(operand)),
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.len() >= needle.len() && haystack.windows(needle.len()).any(|w| w == needle)
}
