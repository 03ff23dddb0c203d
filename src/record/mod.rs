/// Row codec.
///
/// A row encodes as a 2-byte slot count followed by one tagged value per
/// physical slot:
///
///   INTEGER   tag 1 + i64 LE
///   TEXT      tag 2 + u32 length + UTF-8 bytes
///   REAL      tag 3 + f64 LE
///   BOOLEAN   tag 4 + 1 byte
///   TIMESTAMP tag 5 + i64 LE (epoch microseconds)
///   BLOB      tag 6 + u32 length + raw bytes
///   DECIMAL   tag 7 + u32 length + canonical decimal string
///   NULL      tag 0xFF, no payload
///
/// Each column occupies the row slot recorded in its `ColumnDef`; slots
/// vacated by DROP COLUMN encode as NULL and are never reassigned, and the
/// stored slot count tells decoding which slots predate the row. A column
/// whose slot the row never wrote reads as the declared default (NULL when
/// none), so ALTER TABLE never rewrites rows and stale bytes left by a
/// dropped column cannot resurface as a later column's value.
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::catalog::TableDef;
use crate::error::{Result, TinyError};
use crate::types::Value;

pub const TAG_INTEGER: u8 = 1;
pub const TAG_TEXT: u8 = 2;
pub const TAG_REAL: u8 = 3;
pub const TAG_BOOLEAN: u8 = 4;
pub const TAG_TIMESTAMP: u8 = 5;
pub const TAG_BLOB: u8 = 6;
pub const TAG_DECIMAL: u8 = 7;
pub const TAG_NULL: u8 = 0xFF;

/// Append one tagged value.
pub fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(n) => {
            buf.push(TAG_INTEGER);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Value::Text(s) => {
            buf.push(TAG_TEXT);
            buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Real(n) => {
            buf.push(TAG_REAL);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Value::Boolean(b) => {
            buf.push(TAG_BOOLEAN);
            buf.push(u8::from(*b));
        }
        Value::Timestamp(n) => {
            buf.push(TAG_TIMESTAMP);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Value::Blob(b) => {
            buf.push(TAG_BLOB);
            buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
            buf.extend_from_slice(b);
        }
        Value::Decimal(d) => {
            let s = d.normalize().to_string();
            buf.push(TAG_DECIMAL);
            buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Null => buf.push(TAG_NULL),
    }
}

/// Decode one tagged value. Returns the value and the bytes consumed.
pub fn decode_value(data: &[u8]) -> Result<(Value, usize)> {
    let corrupt = || TinyError::Corruption("truncated value encoding".into());
    let tag = *data.first().ok_or_else(corrupt)?;
    let body = &data[1..];

    match tag {
        TAG_INTEGER => {
            let bytes: [u8; 8] = body.get(..8).ok_or_else(corrupt)?.try_into().unwrap();
            Ok((Value::Integer(i64::from_le_bytes(bytes)), 9))
        }
        TAG_REAL => {
            let bytes: [u8; 8] = body.get(..8).ok_or_else(corrupt)?.try_into().unwrap();
            Ok((Value::Real(f64::from_le_bytes(bytes)), 9))
        }
        TAG_BOOLEAN => {
            let byte = *body.first().ok_or_else(corrupt)?;
            match byte {
                0 => Ok((Value::Boolean(false), 2)),
                1 => Ok((Value::Boolean(true), 2)),
                other => Err(TinyError::Corruption(format!(
                    "invalid boolean encoding {}",
                    other
                ))),
            }
        }
        TAG_TIMESTAMP => {
            let bytes: [u8; 8] = body.get(..8).ok_or_else(corrupt)?.try_into().unwrap();
            Ok((Value::Timestamp(i64::from_le_bytes(bytes)), 9))
        }
        TAG_TEXT | TAG_BLOB | TAG_DECIMAL => {
            let len_bytes: [u8; 4] = body.get(..4).ok_or_else(corrupt)?.try_into().unwrap();
            let len = u32::from_le_bytes(len_bytes) as usize;
            let payload = body.get(4..4 + len).ok_or_else(corrupt)?;
            let value = match tag {
                TAG_BLOB => Value::Blob(payload.to_vec()),
                _ => {
                    let s = std::str::from_utf8(payload)
                        .map_err(|_| TinyError::Corruption("invalid UTF-8 in value".into()))?;
                    if tag == TAG_TEXT {
                        Value::Text(s.to_string())
                    } else {
                        let d = Decimal::from_str(s).map_err(|_| {
                            TinyError::Corruption(format!("invalid decimal string {:?}", s))
                        })?;
                        Value::Decimal(d)
                    }
                }
            };
            Ok((value, 1 + 4 + len))
        }
        TAG_NULL => Ok((Value::Null, 1)),
        other => Err(TinyError::Corruption(format!(
            "unknown value type tag {}",
            other
        ))),
    }
}

/// Encode a row as stored in a B-tree leaf. Values land at their column's
/// slot; vacated slots encode as NULL.
pub fn encode_row(values: &[Value], def: &TableDef) -> Vec<u8> {
    let slot_count = def.row_slots as usize;
    let mut slots: Vec<Option<&Value>> = vec![None; slot_count];
    for (col, value) in def.columns.iter().zip(values) {
        slots[col.slot as usize] = Some(value);
    }

    let mut buf = Vec::with_capacity(2 + slot_count * 9);
    buf.extend_from_slice(&def.row_slots.to_le_bytes());
    for slot in &slots {
        match slot {
            Some(value) => encode_value(&mut buf, value),
            None => buf.push(TAG_NULL),
        }
    }
    buf
}

/// Decode a row against the current schema. A column whose slot the row
/// never stored (added after the row was written) reads as the declared
/// default; slots belonging to since-dropped columns are skipped.
pub fn decode_row(data: &[u8], def: &TableDef) -> Result<Vec<Value>> {
    if data.len() < 2 {
        return Err(TinyError::Corruption("row shorter than its header".into()));
    }
    let stored = u16::from_le_bytes(data[0..2].try_into().unwrap()) as usize;
    let mut offset = 2;

    let mut slot_values: Vec<Option<Value>> = Vec::with_capacity(stored);
    for _ in 0..stored {
        let (value, consumed) = decode_value(&data[offset..])?;
        slot_values.push(Some(value));
        offset += consumed;
    }
    if offset != data.len() {
        return Err(TinyError::Corruption("trailing bytes after row".into()));
    }

    let mut values = Vec::with_capacity(def.columns.len());
    for col in &def.columns {
        let slot = col.slot as usize;
        if slot >= stored {
            values.push(col.backfill_value());
            continue;
        }
        let value = slot_values[slot].take().ok_or_else(|| {
            TinyError::Corruption(format!(
                "columns of table '{}' share row slot {}",
                def.name, slot
            ))
        })?;
        if !value.conforms_to(col.data_type) {
            return Err(TinyError::Corruption(format!(
                "stored value {:?} does not match column '{}' ({})",
                value, col.name, col.data_type
            )));
        }
        values.push(value);
    }
    Ok(values)
}
