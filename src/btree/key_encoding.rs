/// Order-preserving key encoding.
///
/// A primary key (single or composite) encodes into a byte string whose
/// plain lexicographic comparison matches the typed tuple comparison:
///
///   INTEGER/TIMESTAMP  big-endian with the sign bit flipped
///   REAL               IEEE-754 bits, transformed so byte order == numeric order
///   BOOLEAN            one byte, 0 or 1
///   TEXT/BLOB          payload with 0x00 escaped as 0x00 0xFF, terminated
///                      by 0x00 0x01 so composite fields compare field by field
///   DECIMAL            REAL-style prefix of the approximate magnitude, then
///                      the canonical string as a tiebreaker
///
/// Each component starts with its type tag; within one table the PK column
/// types are fixed, so tags never decide an ordering.
use rust_decimal::prelude::ToPrimitive;

use crate::error::{Result, TinyError};
use crate::record::{
    TAG_BLOB, TAG_BOOLEAN, TAG_DECIMAL, TAG_INTEGER, TAG_REAL, TAG_TEXT, TAG_TIMESTAMP,
};
use crate::types::Value;

/// Encode i64 into 8 bytes that preserve sort order under byte comparison.
pub fn encode_i64(val: i64) -> [u8; 8] {
    // Flip the sign bit so that negative numbers sort before positive.
    let unsigned = (val as u64) ^ (1u64 << 63);
    unsigned.to_be_bytes()
}

/// Decode i64 from order-preserving encoding.
pub fn decode_i64(bytes: &[u8; 8]) -> i64 {
    let unsigned = u64::from_be_bytes(*bytes);
    (unsigned ^ (1u64 << 63)) as i64
}

/// Encode f64 into 8 bytes that preserve sort order under byte comparison.
/// Positive values get the sign bit set; negative values are fully inverted.
pub fn encode_f64(val: f64) -> [u8; 8] {
    let bits = val.to_bits();
    let transformed = if bits & (1u64 << 63) != 0 {
        !bits
    } else {
        bits | (1u64 << 63)
    };
    transformed.to_be_bytes()
}

/// Decode f64 from order-preserving encoding.
pub fn decode_f64(bytes: &[u8; 8]) -> f64 {
    let transformed = u64::from_be_bytes(*bytes);
    let bits = if transformed & (1u64 << 63) != 0 {
        transformed & !(1u64 << 63)
    } else {
        !transformed
    };
    f64::from_bits(bits)
}

/// Escape-and-terminate a variable-length component: embedded 0x00 becomes
/// 0x00 0xFF, the terminator is 0x00 0x01. Shorter strings sort before
/// their extensions and the escape keeps embedded zero bytes ordered.
fn push_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == 0x00 {
            buf.push(0x00);
            buf.push(0xFF);
        } else {
            buf.push(b);
        }
    }
    buf.push(0x00);
    buf.push(0x01);
}

/// Encode a PK tuple. NULL components are rejected: primary-key columns
/// are NOT NULL by construction.
pub fn encode_key(values: &[Value]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(values.len() * 10);
    for value in values {
        match value {
            Value::Integer(n) => {
                buf.push(TAG_INTEGER);
                buf.extend_from_slice(&encode_i64(*n));
            }
            Value::Timestamp(n) => {
                buf.push(TAG_TIMESTAMP);
                buf.extend_from_slice(&encode_i64(*n));
            }
            Value::Real(n) => {
                buf.push(TAG_REAL);
                buf.extend_from_slice(&encode_f64(*n));
            }
            Value::Boolean(b) => {
                buf.push(TAG_BOOLEAN);
                buf.push(u8::from(*b));
            }
            Value::Text(s) => {
                buf.push(TAG_TEXT);
                push_escaped(&mut buf, s.as_bytes());
            }
            Value::Blob(b) => {
                buf.push(TAG_BLOB);
                push_escaped(&mut buf, b);
            }
            Value::Decimal(d) => {
                buf.push(TAG_DECIMAL);
                buf.extend_from_slice(&encode_f64(d.to_f64().unwrap_or(0.0)));
                push_escaped(&mut buf, d.normalize().to_string().as_bytes());
            }
            Value::Null => {
                return Err(TinyError::Constraint(
                    "primary-key component is NULL".into(),
                ));
            }
        }
    }
    Ok(buf)
}

/// Compare two encoded keys. Lexicographic by construction.
pub fn compare_keys(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.cmp(b)
}
