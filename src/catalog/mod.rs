//! Schema model: data types, values, columns with stable tags, schemas, rows
//! and reconciliation between schema versions.

mod reconcile;
mod row;
mod schema;
mod types;
mod value;

pub use reconcile::{reconcile, ColumnMapping, MappedColumn};
pub use row::{format_key, Row};
pub use schema::{Schema, SchemaBuilder, SchemaError};
pub use types::{Column, DataType, KeyFamily, KeyRole, Tag};
pub use value::{coerce, parse_timestamp, CoercionError, Value};
