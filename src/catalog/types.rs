//! Data types, column tags and column definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::Value;

/// Column data types.
///
/// Integer and floating point types carry a physical width. Changing a column
/// between widths changes how rows are encoded, never their logical values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    /// 8-bit integer.
    TinyInt,
    /// 16-bit integer.
    SmallInt,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    BigInt,
    /// 32-bit floating point.
    Float,
    /// 64-bit floating point.
    Double,
    /// Unbounded text.
    Text,
    /// Text of at most `n` characters.
    Varchar(u32),
    Timestamp,
    /// JSON objects, arrays or scalars.
    Json,
    /// UUIDs (stored as text).
    Uuid,
}

/// Key encoding shared by a group of types. Widening within a family keeps
/// every key byte the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Bool,
    Int,
    Float,
    Text,
    Timestamp,
    Json,
}

impl DataType {
    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, DataType::Text | DataType::Varchar(_))
    }

    /// How values of this type are laid out in a row index key.
    pub fn key_family(&self) -> KeyFamily {
        match self {
            DataType::Boolean => KeyFamily::Bool,
            t if t.is_integer() => KeyFamily::Int,
            t if t.is_float() => KeyFamily::Float,
            DataType::Timestamp => KeyFamily::Timestamp,
            DataType::Json => KeyFamily::Json,
            _ => KeyFamily::Text,
        }
    }

    /// inclusive value range of an integer type
    pub fn int_range(&self) -> Option<(i64, i64)> {
        match self {
            DataType::TinyInt => Some((i8::MIN as i64, i8::MAX as i64)),
            DataType::SmallInt => Some((i16::MIN as i64, i16::MAX as i64)),
            DataType::Int => Some((i32::MIN as i64, i32::MAX as i64)),
            DataType::BigInt => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Check whether `value` can be stored in a column of this type as is.
    pub fn accepts(&self, value: &Value) -> bool {
        self.conform(value.clone()).is_ok()
    }

    /// Validate `value` for this type and normalize it to the precision the
    /// column stores (32-bit floats, microsecond timestamps).
    pub fn conform(&self, value: Value) -> Result<Value, String> {
        let mismatch = |v: &Value| format!("expected {}, got {} {}", self, v.kind(), v);
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (DataType::Boolean, v @ Value::Bool(_)) => Ok(v),
            (t, Value::Int(i)) if t.is_integer() => match t.int_range() {
                Some((lo, hi)) if i < lo || i > hi => Err(format!("{} out of range for {}", i, t)),
                _ => Ok(Value::Int(i)),
            },
            (DataType::Float, Value::Int(i)) => Ok(Value::Float(i as f32 as f64)),
            (DataType::Float, Value::Float(f)) => Ok(Value::Float(f as f32 as f64)),
            (DataType::Double, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (DataType::Double, v @ Value::Float(_)) => Ok(v),
            (DataType::Text, v @ Value::Text(_)) => Ok(v),
            (DataType::Varchar(n), Value::Text(s)) => {
                if s.chars().count() > *n as usize {
                    Err(format!("'{}' exceeds {}", s, self))
                } else {
                    Ok(Value::Text(s))
                }
            }
            (DataType::Uuid, Value::Text(s)) => {
                if is_uuid(&s) {
                    Ok(Value::Text(s.to_ascii_lowercase()))
                } else {
                    Err(format!("'{}' is not a uuid", s))
                }
            }
            (DataType::Timestamp, Value::Timestamp(ts)) => {
                chrono::DateTime::from_timestamp_micros(ts.timestamp_micros())
                    .map(Value::Timestamp)
                    .ok_or_else(|| format!("timestamp {} out of range", ts))
            }
            (DataType::Json, v @ Value::Json(_)) => Ok(v),
            (_, v) => Err(mismatch(&v)),
        }
    }

    /// Get the SQL name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            DataType::Boolean => "BOOLEAN".to_string(),
            DataType::TinyInt => "TINYINT".to_string(),
            DataType::SmallInt => "SMALLINT".to_string(),
            DataType::Int => "INT".to_string(),
            DataType::BigInt => "BIGINT".to_string(),
            DataType::Float => "FLOAT".to_string(),
            DataType::Double => "DOUBLE".to_string(),
            DataType::Text => "TEXT".to_string(),
            DataType::Varchar(n) => format!("VARCHAR({})", n),
            DataType::Timestamp => "TIMESTAMP".to_string(),
            DataType::Json => "JSON".to_string(),
            DataType::Uuid => "UUID".to_string(),
        }
    }
}

fn is_uuid(s: &str) -> bool {
    s.len() == 36
        && s.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_name())
    }
}

/// Stable identity of a column.
///
/// Assigned once when the column is created and kept across renames and type
/// changes. Tags are random 64-bit values, so columns added independently on
/// two branches never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(u64);

impl Tag {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// a fresh random tag
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().random() as u64)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a column in the row index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    /// part of the primary key, at the given position
    Primary(u16),
    /// ordinary value column
    Value,
}

/// Full column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub tag: Tag,
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub key: KeyRole,
    /// Value used for rows that don't set this column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Column {
    /// Create a nullable value column with a fresh tag.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self::with_tag(Tag::generate(), name, data_type)
    }

    /// Create a nullable value column with a given tag.
    pub fn with_tag(tag: Tag, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            tag,
            name: name.into(),
            data_type,
            nullable: true,
            key: KeyRole::Value,
            default: None,
            description: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn is_primary_key(&self) -> bool {
        matches!(self.key, KeyRole::Primary(_))
    }

    /// Validate and normalize a value for this column. `None` means the row
    /// didn't set the column, so the default applies.
    pub fn validate(&self, value: Option<Value>) -> Result<Value, String> {
        let value = match value {
            Some(Value::Null) | None => self.default.clone().unwrap_or(Value::Null),
            Some(v) => v,
        };
        if value.is_null() {
            if !self.nullable || self.is_primary_key() {
                return Err(format!("column '{}' cannot be null", self.name));
            }
            return Ok(Value::Null);
        }
        self.data_type
            .conform(value)
            .map_err(|e| format!("column '{}': {}", self.name, e))
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        if let KeyRole::Primary(_) = self.key {
            write!(f, " PRIMARY KEY")?;
        }
        if let Some(default) = &self.default {
            write!(f, " DEFAULT {}", default)?;
        }
        Ok(())
    }
}
