//! Column values, canonical equality and type coercion.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::DataType;

/// A single cell value.
///
/// Physical width is a property of the column type, not of the value: every
/// integer is an `Int(i64)` and every floating point number a `Float(f64)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

pub(crate) static NULL: Value = Value::Null;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// short name of the value's kind, used in messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::Json(_) => "json",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn float_eq_int(f: f64, i: i64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 && f as i64 == i
}

/// Canonical, type-aware equality: `Int(1) == Float(1.0)`, NaN equals NaN.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => float_eq_int(*f, *i),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Timestamp(t) => write!(f, "'{}'", t.to_rfc3339()),
            Value::Json(j) => write!(f, "{}", j),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A value that could not be converted to a column type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unable to coerce {value} to {target}")]
pub struct CoercionError {
    pub value: String,
    pub target: DataType,
}

/// Convert `value` to `target`, following the coercion table:
///
/// | from \ to  | int types     | float types | bool  | text   | timestamp | json | uuid  |
/// |------------|---------------|-------------|-------|--------|-----------|------|-------|
/// | int        | range checked | always      | 0 / 1 | always | -         | yes  | -     |
/// | float      | integral only | always      | -     | always | -         | yes  | -     |
/// | bool       | 0 / 1         | 0.0 / 1.0   | yes   | always | -         | yes  | -     |
/// | text       | parse         | parse       | parse | yes    | parse     | parse| parse |
/// | timestamp  | -             | -           | -     | always | yes       | -    | -     |
/// | json       | numbers       | numbers     | bools | always | -         | yes  | -     |
pub fn coerce(value: &Value, target: &DataType) -> Result<Value, CoercionError> {
    let fail = || CoercionError {
        value: value.to_string(),
        target: *target,
    };

    if value.is_null() {
        return Ok(Value::Null);
    }
    if let Ok(conformed) = target.conform(value.clone()) {
        return Ok(conformed);
    }

    let converted = match (value, target) {
        (Value::Int(i), t) if t.is_float() => Value::Float(*i as f64),
        (Value::Int(i), DataType::Boolean) => match i {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            _ => return Err(fail()),
        },
        (Value::Int(i), t) if t.is_textual() => Value::Text(i.to_string()),
        (Value::Int(i), DataType::Json) => Value::Json(serde_json::Value::from(*i)),

        (Value::Float(f), t) if t.is_integer() => {
            if f.is_finite() && f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                Value::Int(*f as i64)
            } else {
                return Err(fail());
            }
        }
        (Value::Float(f), t) if t.is_textual() => Value::Text(f.to_string()),
        (Value::Float(f), DataType::Json) => match serde_json::Number::from_f64(*f) {
            Some(n) => Value::Json(serde_json::Value::Number(n)),
            None => return Err(fail()),
        },

        (Value::Bool(b), t) if t.is_integer() => Value::Int(*b as i64),
        (Value::Bool(b), t) if t.is_float() => Value::Float(if *b { 1.0 } else { 0.0 }),
        (Value::Bool(b), t) if t.is_textual() => Value::Text(b.to_string()),
        (Value::Bool(b), DataType::Json) => Value::Json(serde_json::Value::Bool(*b)),

        (Value::Text(s), t) => parse_text(s.trim(), t).ok_or_else(fail)?,

        (Value::Timestamp(ts), t) if t.is_textual() => Value::Text(ts.to_rfc3339()),

        (Value::Json(j), t) if t.is_textual() => Value::Text(j.to_string()),
        (Value::Json(serde_json::Value::Number(n)), t) if t.is_integer() => {
            Value::Int(n.as_i64().ok_or_else(fail)?)
        }
        (Value::Json(serde_json::Value::Number(n)), t) if t.is_float() => {
            Value::Float(n.as_f64().ok_or_else(fail)?)
        }
        (Value::Json(serde_json::Value::Bool(b)), DataType::Boolean) => Value::Bool(*b),

        _ => return Err(fail()),
    };

    // second pass applies range, width and length rules of the target
    target.conform(converted).map_err(|_| fail())
}

fn parse_text(s: &str, target: &DataType) -> Option<Value> {
    match target {
        t if t.is_integer() => s.parse::<i64>().ok().map(Value::Int),
        t if t.is_float() => s.parse::<f64>().ok().map(Value::Float),
        DataType::Boolean => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        DataType::Timestamp => parse_timestamp(s).map(Value::Timestamp),
        DataType::Json => serde_json::from_str(s).ok().map(Value::Json),
        _ => Some(Value::Text(s.to_string())),
    }
}

/// parse RFC 3339 or `YYYY-MM-DD HH:MM:SS` (taken as UTC)
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_equality() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::Float(1.5));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Int(1), Value::text("1"));
        assert_ne!(Value::Null, Value::Int(0));
    }

    #[test]
    fn test_integer_widening_and_narrowing() {
        assert_eq!(coerce(&Value::Int(300), &DataType::BigInt).unwrap(), Value::Int(300));
        assert!(coerce(&Value::Int(300), &DataType::TinyInt).is_err());
        assert_eq!(coerce(&Value::Int(-128), &DataType::TinyInt).unwrap(), Value::Int(-128));
    }

    #[test]
    fn test_numeric_to_text_always_succeeds() {
        assert_eq!(coerce(&Value::Int(42), &DataType::Text).unwrap(), Value::text("42"));
        assert_eq!(coerce(&Value::Float(2.5), &DataType::Text).unwrap(), Value::text("2.5"));
        assert_eq!(coerce(&Value::Bool(true), &DataType::Text).unwrap(), Value::text("true"));
    }

    #[test]
    fn test_text_to_number_requires_literal() {
        assert_eq!(coerce(&Value::text(" 17 "), &DataType::Int).unwrap(), Value::Int(17));
        assert!(coerce(&Value::text("seventeen"), &DataType::Int).is_err());
        assert_eq!(coerce(&Value::text("1.25"), &DataType::Double).unwrap(), Value::Float(1.25));
        assert!(coerce(&Value::text("1.25"), &DataType::Int).is_err());
    }

    #[test]
    fn test_float_to_int_only_when_integral() {
        assert_eq!(coerce(&Value::Float(3.0), &DataType::Int).unwrap(), Value::Int(3));
        assert!(coerce(&Value::Float(3.5), &DataType::Int).is_err());
        assert!(coerce(&Value::Float(f64::INFINITY), &DataType::BigInt).is_err());
    }

    #[test]
    fn test_varchar_length_is_enforced() {
        assert!(coerce(&Value::Int(123456), &DataType::Varchar(3)).is_err());
        assert_eq!(coerce(&Value::Int(123), &DataType::Varchar(3)).unwrap(), Value::text("123"));
    }

    #[test]
    fn test_text_to_timestamp() {
        let ts = coerce(&Value::text("2024-05-01 10:30:00"), &DataType::Timestamp).unwrap();
        match ts {
            Value::Timestamp(t) => assert_eq!(t.to_rfc3339(), "2024-05-01T10:30:00+00:00"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(coerce(&Value::text("yesterday"), &DataType::Timestamp).is_err());
    }

    #[test]
    fn test_null_always_coerces() {
        assert_eq!(coerce(&Value::Null, &DataType::Uuid).unwrap(), Value::Null);
    }

    #[test]
    fn test_bool_int_coercions() {
        assert_eq!(coerce(&Value::Bool(true), &DataType::Int).unwrap(), Value::Int(1));
        assert_eq!(coerce(&Value::Int(0), &DataType::Boolean).unwrap(), Value::Bool(false));
        assert!(coerce(&Value::Int(7), &DataType::Boolean).is_err());
    }
}
