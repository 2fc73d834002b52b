//! Script numbers: little-endian sign-magnitude integers
//!
//! The sign lives in the high bit of the last byte and zero is the empty
//! string. Numbers decoded from the stack are bounded in length and, when
//! minimal encoding is required, must use the shortest representation.

use crate::error::ScriptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScriptNum(pub i64);

impl ScriptNum {
    pub fn value(self) -> i64 {
        self.0
    }

    pub fn to_bytes(self) -> Vec<u8> {
        encode_num(self.0)
    }

    pub fn from_bytes(bytes: &[u8], require_minimal: bool, max_len: usize) -> Result<Self, ScriptError> {
        decode_num(bytes, require_minimal, max_len).map(ScriptNum)
    }
}

impl From<i64> for ScriptNum {
    fn from(value: i64) -> Self {
        ScriptNum(value)
    }
}

pub fn encode_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }

    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut result = Vec::with_capacity(9);
    while magnitude > 0 {
        result.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }

    // If the high bit of the last byte is already taken by the magnitude,
    // an extra byte carries the sign.
    let last = result.len() - 1;
    if result[last] & 0x80 != 0 {
        result.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        result[last] |= 0x80;
    }
    result
}

/// True when `bytes` is the shortest encoding of its value.
pub fn is_minimally_encoded(bytes: &[u8]) -> bool {
    match bytes.split_last() {
        None => true,
        Some((&last, rest)) => {
            // A last byte holding only the sign bit is redundant unless the
            // byte before it needs its own high bit for magnitude.
            if last & 0x7f == 0 {
                match rest.last() {
                    None => false,
                    Some(&prev) => prev & 0x80 != 0,
                }
            } else {
                true
            }
        }
    }
}

pub fn decode_num(bytes: &[u8], require_minimal: bool, max_len: usize) -> Result<i64, ScriptError> {
    if bytes.len() > max_len {
        return Err(ScriptError::NumberTooBig { max: max_len });
    }
    if require_minimal && !is_minimally_encoded(bytes) {
        return Err(ScriptError::NonMinimalEncoding);
    }
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 9 {
        return Err(ScriptError::NumberTooBig { max: max_len });
    }

    let last = bytes.len() - 1;
    let negative = bytes[last] & 0x80 != 0;
    let mut magnitude: u128 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        let byte = if i == last { byte & 0x7f } else { *byte };
        magnitude |= u128::from(byte) << (8 * i);
    }

    // A nine byte encoding fits only when its top byte is pure sign.
    if magnitude > i64::MAX as u128 {
        return Err(ScriptError::NumberTooBig { max: max_len });
    }
    let magnitude = magnitude as i64;
    Ok(if negative { -magnitude } else { magnitude })
}

/// Booleans are false for any encoding of zero, including negative zero.
pub fn cast_to_bool(bytes: &[u8]) -> bool {
    for (i, &byte) in bytes.iter().enumerate() {
        if byte != 0 {
            if i == bytes.len() - 1 && byte == 0x80 {
                return false;
            }
            return true;
        }
    }
    false
}

pub fn encode_bool(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_values() {
        assert_eq!(encode_num(0), Vec::<u8>::new());
        assert_eq!(encode_num(1), vec![0x01]);
        assert_eq!(encode_num(-1), vec![0x81]);
        assert_eq!(encode_num(127), vec![0x7f]);
        assert_eq!(encode_num(128), vec![0x80, 0x00]);
        assert_eq!(encode_num(-128), vec![0x80, 0x80]);
        assert_eq!(encode_num(255), vec![0xff, 0x00]);
        assert_eq!(encode_num(256), vec![0x00, 0x01]);
        assert_eq!(encode_num(-256), vec![0x00, 0x81]);
        assert_eq!(encode_num(32767), vec![0xff, 0x7f]);
        assert_eq!(encode_num(32768), vec![0x00, 0x80, 0x00]);
    }

    #[test]
    fn test_round_trip_boundaries() {
        let mut values = vec![0i64, i64::MAX, -i64::MAX];
        for bits in [7u32, 8, 15, 16, 23, 24, 31, 32, 39, 40, 47, 48, 55, 56, 62] {
            let edge = 1i64 << bits;
            values.extend_from_slice(&[edge - 1, edge, edge + 1, -(edge - 1), -edge, -(edge + 1)]);
        }
        for value in values {
            let bytes = encode_num(value);
            assert!(bytes.len() <= 8, "{} encoded to {} bytes", value, bytes.len());
            assert!(is_minimally_encoded(&bytes));
            assert_eq!(decode_num(&bytes, true, 8).unwrap(), value, "value {}", value);
        }
    }

    #[test]
    fn test_length_thresholds() {
        assert_eq!(encode_num(0x7f).len(), 1);
        assert_eq!(encode_num(0x80).len(), 2);
        assert_eq!(encode_num(0x7fff).len(), 2);
        assert_eq!(encode_num(0x8000).len(), 3);
        assert_eq!(encode_num(0x7fff_ffff).len(), 4);
        assert_eq!(encode_num(0x8000_0000).len(), 5);
        assert_eq!(encode_num(i64::MAX).len(), 8);
    }

    #[test]
    fn test_decode_enforces_max_length() {
        let bytes = encode_num(0x8000_0000);
        assert_eq!(
            decode_num(&bytes, true, 4),
            Err(ScriptError::NumberTooBig { max: 4 })
        );
        assert_eq!(decode_num(&bytes, true, 5).unwrap(), 0x8000_0000);
        // i64::MIN needs nine bytes
        assert_eq!(encode_num(i64::MIN).len(), 9);
        assert!(decode_num(&encode_num(i64::MIN), true, 8).is_err());
    }

    #[test]
    fn test_minimal_rejections() {
        // negative zero
        assert_eq!(decode_num(&[0x80], true, 8), Err(ScriptError::NonMinimalEncoding));
        // zero padded
        assert_eq!(decode_num(&[0x00], true, 8), Err(ScriptError::NonMinimalEncoding));
        // padded positive
        assert_eq!(decode_num(&[0x01, 0x00], true, 8), Err(ScriptError::NonMinimalEncoding));
        // padded negative
        assert_eq!(decode_num(&[0x01, 0x80], true, 8), Err(ScriptError::NonMinimalEncoding));
        // the extra byte is needed when the magnitude's high bit is set
        assert_eq!(decode_num(&[0x80, 0x00], true, 8), Ok(128));
        assert_eq!(decode_num(&[0x80, 0x80], true, 8), Ok(-128));
    }

    #[test]
    fn test_non_minimal_accepted_when_not_required() {
        assert_eq!(decode_num(&[0x80], false, 8), Ok(0));
        assert_eq!(decode_num(&[0x01, 0x00], false, 8), Ok(1));
        assert_eq!(decode_num(&[0x01, 0x80], false, 8), Ok(-1));
    }

    #[test]
    fn test_cast_to_bool() {
        assert!(!cast_to_bool(&[]));
        assert!(!cast_to_bool(&[0x00]));
        assert!(!cast_to_bool(&[0x00, 0x00]));
        assert!(!cast_to_bool(&[0x80]));
        assert!(!cast_to_bool(&[0x00, 0x80]));
        assert!(cast_to_bool(&[0x01]));
        assert!(cast_to_bool(&[0x80, 0x00]));
        assert!(cast_to_bool(&[0x00, 0x81]));
    }
}
