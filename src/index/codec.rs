//! Byte encodings of row index keys and values.
//!
//! Keys use an order-preserving ("memcomparable") encoding so the index, which
//! compares raw bytes, sorts rows by primary key. Values are a sparse list of
//! `(tag, physical type, payload)` sorted by tag; nulls are omitted, so adding
//! a nullable column never changes existing row bytes.

use crate::catalog::{DataType, Row, Tag, Value};
use crate::storage::{StorageError, StorageResult};

const KEY_NULL: u8 = 0x01;
const KEY_BOOL: u8 = 0x02;
const KEY_INT: u8 = 0x03;
const KEY_FLOAT: u8 = 0x04;
const KEY_TEXT: u8 = 0x05;
const KEY_TIMESTAMP: u8 = 0x06;
const KEY_JSON: u8 = 0x07;

const VAL_BOOL: u8 = 1;
const VAL_I8: u8 = 2;
const VAL_I16: u8 = 3;
const VAL_I32: u8 = 4;
const VAL_I64: u8 = 5;
const VAL_F32: u8 = 6;
const VAL_F64: u8 = 7;
const VAL_TEXT: u8 = 8;
const VAL_TIMESTAMP: u8 = 9;
const VAL_JSON: u8 = 10;

const SIGN_BIT: u64 = 1 << 63;

fn corrupt(reason: impl Into<String>) -> StorageError {
    StorageError::corrupted("row encoding", reason)
}

/// Cursor over an encoded buffer.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub(crate) fn bytes(&mut self, n: usize) -> StorageResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let out = &self.buf[self.pos..end];
                self.pos = end;
                Ok(out)
            }
            None => Err(corrupt(format!("truncated at byte {} (wanted {})", self.pos, n))),
        }
    }

    pub(crate) fn u8(&mut self) -> StorageResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn array<const N: usize>(&mut self) -> StorageResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub(crate) fn u32(&mut self) -> StorageResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> StorageResult<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    /// u32 length followed by that many bytes
    pub(crate) fn chunk(&mut self) -> StorageResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.bytes(len)
    }
}

pub(crate) fn put_chunk(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

// ==================== Keys ====================

/// Encode primary key values so byte order equals value order.
pub fn encode_key(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        match value {
            Value::Null => out.push(KEY_NULL),
            Value::Bool(b) => {
                out.push(KEY_BOOL);
                out.push(*b as u8);
            }
            Value::Int(i) => {
                out.push(KEY_INT);
                out.extend_from_slice(&((*i as u64) ^ SIGN_BIT).to_be_bytes());
            }
            Value::Float(f) => {
                out.push(KEY_FLOAT);
                let f = if *f == 0.0 { 0.0 } else { *f };
                let bits = f.to_bits();
                let ordered = if bits & SIGN_BIT != 0 { !bits } else { bits ^ SIGN_BIT };
                out.extend_from_slice(&ordered.to_be_bytes());
            }
            Value::Text(s) => {
                out.push(KEY_TEXT);
                put_escaped(&mut out, s.as_bytes());
            }
            Value::Timestamp(ts) => {
                out.push(KEY_TIMESTAMP);
                out.extend_from_slice(&((ts.timestamp_micros() as u64) ^ SIGN_BIT).to_be_bytes());
            }
            Value::Json(j) => {
                out.push(KEY_JSON);
                put_escaped(&mut out, j.to_string().as_bytes());
            }
        }
    }
    out
}

// 0x00 inside the string becomes 0x00 0xFF; the string ends with 0x00 0x00
fn put_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
    for b in bytes {
        out.push(*b);
        if *b == 0 {
            out.push(0xFF);
        }
    }
    out.extend_from_slice(&[0, 0]);
}

fn read_escaped(reader: &mut Reader<'_>) -> StorageResult<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let b = reader.u8()?;
        if b != 0 {
            out.push(b);
            continue;
        }
        match reader.u8()? {
            0 => return Ok(out),
            0xFF => out.push(0),
            other => return Err(corrupt(format!("bad escape byte {:#x}", other))),
        }
    }
}

fn utf8(bytes: Vec<u8>) -> StorageResult<String> {
    String::from_utf8(bytes).map_err(|e| corrupt(e.to_string()))
}

fn timestamp(micros: i64) -> StorageResult<Value> {
    chrono::DateTime::from_timestamp_micros(micros)
        .map(Value::Timestamp)
        .ok_or_else(|| corrupt(format!("timestamp out of range: {}", micros)))
}

/// Decode a key produced by [`encode_key`].
pub fn decode_key(bytes: &[u8]) -> StorageResult<Vec<Value>> {
    let mut reader = Reader::new(bytes);
    let mut values = Vec::new();
    while !reader.is_empty() {
        let value = match reader.u8()? {
            KEY_NULL => Value::Null,
            KEY_BOOL => Value::Bool(reader.u8()? != 0),
            KEY_INT => Value::Int((reader.u64()? ^ SIGN_BIT) as i64),
            KEY_FLOAT => {
                let ordered = reader.u64()?;
                let bits = if ordered & SIGN_BIT != 0 { ordered ^ SIGN_BIT } else { !ordered };
                Value::Float(f64::from_bits(bits))
            }
            KEY_TEXT => Value::Text(utf8(read_escaped(&mut reader)?)?),
            KEY_TIMESTAMP => timestamp((reader.u64()? ^ SIGN_BIT) as i64)?,
            KEY_JSON => {
                let text = utf8(read_escaped(&mut reader)?)?;
                Value::Json(serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))?)
            }
            other => return Err(corrupt(format!("unknown key type {:#x}", other))),
        };
        values.push(value);
    }
    Ok(values)
}

// ==================== Values ====================

/// Encode the given columns of a row. `columns` lists (tag, type) of the
/// columns to store; unset columns are skipped.
pub fn encode_values(columns: &[(Tag, DataType)], row: &Row) -> Vec<u8> {
    let mut sorted: Vec<&(Tag, DataType)> = columns.iter().collect();
    sorted.sort_by_key(|(tag, _)| *tag);

    let mut out = Vec::new();
    for (tag, data_type) in sorted {
        let value = row.get(*tag);
        if value.is_null() {
            continue;
        }
        out.extend_from_slice(&tag.get().to_be_bytes());
        put_value(&mut out, data_type, value);
    }
    out
}

fn put_value(out: &mut Vec<u8>, data_type: &DataType, value: &Value) {
    match (data_type, value) {
        (DataType::TinyInt, Value::Int(i)) if i8::try_from(*i).is_ok() => {
            out.push(VAL_I8);
            out.extend_from_slice(&(*i as i8).to_be_bytes());
        }
        (DataType::SmallInt, Value::Int(i)) if i16::try_from(*i).is_ok() => {
            out.push(VAL_I16);
            out.extend_from_slice(&(*i as i16).to_be_bytes());
        }
        (DataType::Int, Value::Int(i)) if i32::try_from(*i).is_ok() => {
            out.push(VAL_I32);
            out.extend_from_slice(&(*i as i32).to_be_bytes());
        }
        (_, Value::Int(i)) => {
            out.push(VAL_I64);
            out.extend_from_slice(&i.to_be_bytes());
        }
        (DataType::Float, Value::Float(f)) => {
            out.push(VAL_F32);
            out.extend_from_slice(&(*f as f32).to_be_bytes());
        }
        (_, Value::Float(f)) => {
            out.push(VAL_F64);
            out.extend_from_slice(&f.to_be_bytes());
        }
        (_, Value::Bool(b)) => {
            out.push(VAL_BOOL);
            out.push(*b as u8);
        }
        (_, Value::Text(s)) => {
            out.push(VAL_TEXT);
            put_chunk(out, s.as_bytes());
        }
        (_, Value::Timestamp(ts)) => {
            out.push(VAL_TIMESTAMP);
            out.extend_from_slice(&ts.timestamp_micros().to_be_bytes());
        }
        (_, Value::Json(j)) => {
            out.push(VAL_JSON);
            put_chunk(out, j.to_string().as_bytes());
        }
        (_, Value::Null) => {}
    }
}

/// Decode values produced by [`encode_values`] into `row`.
pub fn decode_values_into(bytes: &[u8], row: &mut Row) -> StorageResult<()> {
    let mut reader = Reader::new(bytes);
    while !reader.is_empty() {
        let tag = Tag::new(reader.u64()?);
        let value = match reader.u8()? {
            VAL_BOOL => Value::Bool(reader.u8()? != 0),
            VAL_I8 => Value::Int(i8::from_be_bytes(reader.array()?) as i64),
            VAL_I16 => Value::Int(i16::from_be_bytes(reader.array()?) as i64),
            VAL_I32 => Value::Int(i32::from_be_bytes(reader.array()?) as i64),
            VAL_I64 => Value::Int(i64::from_be_bytes(reader.array()?)),
            VAL_F32 => Value::Float(f32::from_be_bytes(reader.array()?) as f64),
            VAL_F64 => Value::Float(f64::from_be_bytes(reader.array()?)),
            VAL_TEXT => Value::Text(utf8(reader.chunk()?.to_vec())?),
            VAL_TIMESTAMP => timestamp(i64::from_be_bytes(reader.array()?))?,
            VAL_JSON => Value::Json(serde_json::from_slice(reader.chunk()?).map_err(|e| corrupt(e.to_string()))?),
            other => return Err(corrupt(format!("unknown value type {}", other))),
        };
        row.set(tag, value);
    }
    Ok(())
}

pub fn decode_values(bytes: &[u8]) -> StorageResult<Row> {
    let mut row = Row::new();
    decode_values_into(bytes, &mut row)?;
    Ok(row)
}

// ==================== Key-less rows ====================

/// Index key of a key-less row: a content hash of its encoded values.
pub fn keyless_key(value_bytes: &[u8]) -> Vec<u8> {
    blake3::hash(value_bytes).as_bytes().to_vec()
}

/// Index value of a key-less row: cardinality followed by the row bytes.
pub fn encode_keyless(count: u64, value_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + value_bytes.len());
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(value_bytes);
    out
}

/// Split a key-less index value into (cardinality, row bytes).
pub fn decode_keyless(bytes: &[u8]) -> StorageResult<(u64, &[u8])> {
    if bytes.len() < 8 {
        return Err(corrupt("key-less entry shorter than its count"));
    }
    let (count, rest) = bytes.split_at(8);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(count);
    Ok((u64::from_be_bytes(buf), rest))
}
