//! Core data model: values, columns, table schemas and rows.
//!
//! A `Row` is an ordered mapping from column name to a tagged `Value`; rows
//! of the same schema are not packed against it, so a row with an absent
//! column simply reads back as NULL rather than needing a sparse encoding.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// SQL data types supported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit signed integer
    Integer,
    /// 64-bit floating point
    Float,
    /// Variable-length string with optional max length
    Varchar(Option<u32>),
    /// Text (unlimited length string)
    Text,
    /// Boolean
    Boolean,
    /// Opaque byte string
    Bytes,
    /// Unix-epoch-millis timestamp
    Timestamp,
    /// JSON document
    Json,
    /// Untyped value, used by virtual catalog columns whose shape varies
    Any,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => write!(f, "INTEGER"),
            DataType::Float => write!(f, "FLOAT"),
            DataType::Varchar(Some(len)) => write!(f, "VARCHAR({})", len),
            DataType::Varchar(None) => write!(f, "VARCHAR"),
            DataType::Text => write!(f, "TEXT"),
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Bytes => write!(f, "BYTES"),
            DataType::Timestamp => write!(f, "TIMESTAMP"),
            DataType::Json => write!(f, "JSON"),
            DataType::Any => write!(f, "ANY"),
        }
    }
}

/// A tagged SQL value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Integer value
    Integer(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Boolean value
    Boolean(bool),
    /// Opaque bytes
    Bytes(Vec<u8>),
    /// Unix-epoch-millis timestamp
    Timestamp(i64),
    /// JSON document
    Json(JsonValue),
    /// Untyped escape hatch for virtual-catalog and generated-expression results
    Any(JsonValue),
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Json(j) => j.to_string().hash(state),
            Value::Any(j) => j.to_string().hash(state),
        }
    }
}

impl Eq for Value {}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Any(a), Value::Any(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            (Value::Integer(a), Value::Timestamp(b)) | (Value::Timestamp(b), Value::Integer(a)) => {
                a == b
            }
            (Value::String(s), Value::Integer(i)) | (Value::Integer(i), Value::String(s)) => {
                s.parse::<i64>().map(|parsed| parsed == *i).unwrap_or(false)
            }
            (Value::String(s), Value::Float(f)) | (Value::Float(f), Value::String(s)) => {
                s.parse::<f64>().map(|parsed| parsed == *f).unwrap_or(false)
            }
            _ => false,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.partial_cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Integer(a), Value::Timestamp(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Integer(b)) => a.partial_cmp(b),
            (Value::String(s), Value::Integer(i)) => match s.parse::<i64>() {
                Ok(parsed) => parsed.partial_cmp(i),
                Err(_) => Some(Ordering::Greater),
            },
            (Value::Integer(i), Value::String(s)) => match s.parse::<i64>() {
                Ok(parsed) => i.partial_cmp(&parsed),
                Err(_) => Some(Ordering::Less),
            },
            (Value::String(s), Value::Float(f)) => match s.parse::<f64>() {
                Ok(parsed) => parsed.partial_cmp(f),
                Err(_) => Some(Ordering::Greater),
            },
            (Value::Float(f), Value::String(s)) => match s.parse::<f64>() {
                Ok(parsed) => f.partial_cmp(&parsed),
                Err(_) => Some(Ordering::Less),
            },
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            Value::Bytes(v) => write!(f, "0x{}", v.iter().map(|b| format!("{:02x}", b)).collect::<String>()),
            Value::Timestamp(v) => write!(f, "{}", v),
            Value::Json(v) => write!(f, "{}", v),
            Value::Any(v) => write!(f, "{}", v),
        }
    }
}

impl Value {
    /// Check if the value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if the value is truthy (for WHERE clauses)
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Timestamp(t) => *t != 0,
            Value::Json(_) | Value::Any(_) => true,
        }
    }

    /// Extract a field from a JSON value using the -> operator
    pub fn json_get(&self, key: &str) -> Value {
        match self {
            Value::Json(json) | Value::Any(json) => {
                if let Some(obj) = json.as_object() {
                    if let Some(val) = obj.get(key) {
                        return Value::Json(val.clone());
                    }
                }
                if let Ok(idx) = key.parse::<usize>() {
                    if let Some(arr) = json.as_array() {
                        if let Some(val) = arr.get(idx) {
                            return Value::Json(val.clone());
                        }
                    }
                }
                Value::Null
            }
            _ => Value::Null,
        }
    }

    /// Extract a field from a JSON value and return as text (->>) operator
    pub fn json_get_text(&self, key: &str) -> Value {
        match self.json_get(key) {
            Value::Json(json) => match json {
                JsonValue::String(s) => Value::String(s),
                JsonValue::Null => Value::Null,
                other => Value::String(other.to_string()),
            },
            other => other,
        }
    }
}

/// How a generated column is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratedKind {
    /// Computed on read; absent from persisted tuple versions.
    Virtual,
    /// Computed on write and materialized in persisted tuple versions.
    Stored,
}

/// Generated-column metadata.
#[derive(Debug, Clone)]
pub struct GeneratedSpec {
    /// Parsed expression, evaluated against the rest of the row
    pub expr: crate::parser::Expr,
    pub kind: GeneratedKind,
    /// Columns this expression reads, in dependency order
    pub depends_on: Vec<String>,
}

/// A column definition in a table schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub primary_key: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(skip)]
    pub generated: Option<GeneratedSpec>,
}

impl ColumnDef {
    pub fn is_virtual(&self) -> bool {
        matches!(
            self.generated,
            Some(GeneratedSpec {
                kind: GeneratedKind::Virtual,
                ..
            })
        )
    }

    pub fn is_stored_generated(&self) -> bool {
        matches!(
            self.generated,
            Some(GeneratedSpec {
                kind: GeneratedKind::Stored,
                ..
            })
        )
    }
}

/// Table schema definition. Immutable after creation: DDL beyond
/// CREATE/DROP/TRUNCATE is out of scope, so a schema never changes shape
/// once its owning table exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    /// Name of the owning database/schema
    #[serde(default = "default_db_name")]
    pub db_name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default = "default_auto_increment")]
    pub auto_increment_counter: u64,
}

fn default_auto_increment() -> u64 {
    1
}

fn default_db_name() -> String {
    "minisql".to_string()
}

impl TableSchema {
    /// Find a column by name, returning its index
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Column names a caller can supply values for directly: excludes every
    /// generated column, VIRTUAL or STORED, since both are computed by the
    /// engine rather than written by an INSERT.
    pub fn insertable_column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.generated.is_none())
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Get primary key column indices
    pub fn primary_key_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect()
    }

    /// Get the auto-increment column index, if any
    pub fn auto_increment_column(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.auto_increment)
    }
}

/// A row: an ordered mapping of column name to value, sharing its column
/// list with every other row of the same table via `Arc` so per-row overhead
/// stays a `Vec<Value>` rather than duplicated strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub columns: Arc<Vec<String>>,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Look up a value by column name. Absent columns read back as NULL.
    pub fn get(&self, name: &str) -> Value {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|i| self.values.get(i))
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn get_index(&self, idx: usize) -> Value {
        self.values.get(idx).cloned().unwrap_or(Value::Null)
    }
}

/// Result of a query, ready for the external caller.
#[derive(Debug, Clone)]
pub struct ResultColumn {
    pub name: String,
    pub r#type: DataType,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Row>,
    pub total: i64,
    pub truncated: bool,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: vec![],
            rows: vec![],
            total: 0,
            truncated: false,
        }
    }
}

/// Result of a write statement.
#[derive(Debug, Clone)]
pub struct ModifyResult {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_equality() {
        assert_eq!(Value::Integer(1), Value::Integer(1));
        assert_ne!(Value::Integer(1), Value::Integer(2));
        assert_eq!(Value::Integer(1), Value::Float(1.0));
        assert_eq!(Value::Null, Value::Null);
    }

    #[test]
    fn test_value_ordering() {
        assert!(Value::Integer(1) < Value::Integer(2));
        assert!(Value::Null < Value::Integer(1));
        assert!(Value::Integer(1) < Value::Float(1.5));
    }

    #[test]
    fn test_type_affinity_integer_strict() {
        assert_eq!(Value::String("1".into()), Value::Integer(1));
        assert_ne!(Value::String("1.5".into()), Value::Integer(1));
        assert_ne!(Value::String("1abc".into()), Value::Integer(1));
    }

    #[test]
    fn test_row_absent_column_is_null() {
        let cols = Arc::new(vec!["a".to_string(), "b".to_string()]);
        let row = Row::new(cols, vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(row.get("missing"), Value::Null);
        assert_eq!(row.get("a"), Value::Integer(1));
    }

    #[test]
    fn test_json_get() {
        let val = Value::Json(json!({"a": 1, "b": {"c": 2}}));
        assert_eq!(val.json_get("a"), Value::Json(json!(1)));
        assert_eq!(val.json_get("b").json_get("c"), Value::Json(json!(2)));
    }
}
