//! Error types for the engine
//!
//! Defines a unified, closed error type that can represent failures from
//! every subsystem (MVCC, optimizer, executor, data sources). Error messages
//! are formatted to be MySQL-compatible so external collaborators (wire
//! protocol, HTTP gateway) can map them onto numeric codes and SQLSTATEs
//! without re-deriving them.

use std::fmt;
use std::io;

/// Context for where a column reference appears in a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnContext {
    /// In SELECT field list
    FieldList,
    /// In WHERE clause
    WhereClause,
    /// In ORDER BY clause
    OrderClause,
    /// In GROUP BY clause
    GroupByClause,
    /// In HAVING clause
    HavingClause,
    /// In ON clause (joins)
    OnClause,
    /// In INSERT column list
    InsertList,
    /// In UPDATE SET clause
    UpdateClause,
    /// Generic/unknown context
    General,
}

impl ColumnContext {
    /// Get the MySQL-style clause name
    pub fn as_mysql_str(&self) -> &'static str {
        match self {
            ColumnContext::FieldList => "field list",
            ColumnContext::WhereClause => "where clause",
            ColumnContext::OrderClause => "order clause",
            ColumnContext::GroupByClause => "group statement",
            ColumnContext::HavingClause => "having clause",
            ColumnContext::OnClause => "on clause",
            ColumnContext::InsertList => "field list",
            ColumnContext::UpdateClause => "field list",
            ColumnContext::General => "field list",
        }
    }
}

/// Unified, closed error type for engine operations.
///
/// Mirrors the tagged error set: each variant maps to a numeric MySQL
/// error code and SQLSTATE via `mysql_error_code`/`sql_state`.
#[derive(Debug)]
pub enum MiniSqlError {
    /// I/O error (slice-adapter sync, test fixtures)
    Io(io::Error),
    /// SQL syntax error
    Syntax(String),
    /// Table-related error (not found, already exists, etc.)
    Table(String),
    /// Column-related error
    Column(String),
    /// Type error (wrong type for operation)
    Type(String),
    /// Schema-related error surfaced by the optimizer (e.g. join key inference failure)
    Schema(String),
    /// Permission denied (catalog/information-schema visibility)
    PermissionDenied(String),
    /// A write lost a race against a concurrent writer of the same row.
    /// The statement fails; the transaction is NOT auto-rolled-back.
    WriteConflict(String),
    /// Serializable transaction's commit-time predicate re-check found a
    /// conflicting write; the transaction is aborted.
    SerializationFailure(String),
    /// Transaction state error (e.g. commit with no active transaction)
    TransactionState(String),
    /// An operation required a capability (e.g. MVCC) the data source lacks
    CapabilityError(String),
    /// Read-write statement touched a non-MVCC source and AutoDowngrade is disabled
    MVCCRequired(String),
    /// A resource limit was exceeded (e.g. too many concurrent transactions)
    ResourceExhausted(String),
    /// The operation was cancelled via its context token or deadline
    Cancellation(String),
    /// A worker task panicked; the panic payload is logged, not surfaced
    TaskPanic(String),
    /// Submission to a worker pool that has already been shut down
    PoolClosed(String),
    /// JSON-related error
    Json(String),
    /// Generic internal error (logged in full, sanitized for the caller)
    Internal(String),
}

/// Default database name for error messages
const DEFAULT_DATABASE: &str = "minisql";

impl MiniSqlError {
    /// Create a MySQL-compatible "table not found" error
    /// MySQL format: Table 'database.table' doesn't exist
    pub fn table_not_found(table_name: &str) -> Self {
        MiniSqlError::Table(format!(
            "Table '{}.{}' doesn't exist",
            DEFAULT_DATABASE, table_name
        ))
    }

    /// Create a MySQL-compatible "table already exists" error
    pub fn table_already_exists(table_name: &str) -> Self {
        MiniSqlError::Table(format!("Table '{}' already exists", table_name))
    }

    /// Create a MySQL-compatible "unknown column" error
    pub fn unknown_column(column_name: &str, context: ColumnContext) -> Self {
        MiniSqlError::Column(format!(
            "Unknown column '{}' in '{}'",
            column_name,
            context.as_mysql_str()
        ))
    }

    /// Create a MySQL-compatible "unknown column" error with table qualifier
    pub fn unknown_column_qualified(table: &str, column: &str, context: ColumnContext) -> Self {
        MiniSqlError::Column(format!(
            "Unknown column '{}.{}' in '{}'",
            table,
            column,
            context.as_mysql_str()
        ))
    }

    /// Create a MySQL-compatible "unknown table" error for column resolution
    pub fn unknown_table_in_field_list(table_name: &str) -> Self {
        MiniSqlError::Column(format!("Unknown table '{}' in field list", table_name))
    }

    /// Create a MySQL-compatible "ambiguous column" error
    pub fn ambiguous_column(column_name: &str, context: ColumnContext) -> Self {
        MiniSqlError::Column(format!(
            "Column '{}' in {} is ambiguous",
            column_name,
            context.as_mysql_str()
        ))
    }

    /// Create a MySQL-compatible "column count mismatch" error
    pub fn column_count_mismatch(expected: usize, got: usize) -> Self {
        MiniSqlError::Column(format!(
            "Column count doesn't match value count (expected {}, got {})",
            expected, got
        ))
    }

    /// Create a MySQL-compatible "duplicate table alias" error
    pub fn duplicate_table_alias(alias: &str) -> Self {
        MiniSqlError::Table(format!("Not unique table/alias: '{}'", alias))
    }

    /// Sanitize an error for an external caller: strip everything but the
    /// short human-readable reason. Internal variants (TaskPanic, Internal)
    /// are replaced by a generic message so file paths, stack traces and
    /// internal identifiers never cross the boundary.
    pub fn sanitized_message(&self) -> String {
        match self {
            MiniSqlError::TaskPanic(_) => "internal error".to_string(),
            MiniSqlError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for MiniSqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiniSqlError::Io(e) => write!(f, "{}", e),
            MiniSqlError::Syntax(msg) => write!(f, "{}", msg),
            MiniSqlError::Table(msg) => write!(f, "{}", msg),
            MiniSqlError::Column(msg) => write!(f, "{}", msg),
            MiniSqlError::Type(msg) => write!(f, "{}", msg),
            MiniSqlError::Schema(msg) => write!(f, "{}", msg),
            MiniSqlError::PermissionDenied(msg) => write!(f, "{}", msg),
            MiniSqlError::WriteConflict(msg) => write!(f, "{}", msg),
            MiniSqlError::SerializationFailure(msg) => write!(f, "{}", msg),
            MiniSqlError::TransactionState(msg) => write!(f, "{}", msg),
            MiniSqlError::CapabilityError(msg) => write!(f, "{}", msg),
            MiniSqlError::MVCCRequired(msg) => write!(f, "{}", msg),
            MiniSqlError::ResourceExhausted(msg) => write!(f, "{}", msg),
            MiniSqlError::Cancellation(msg) => write!(f, "{}", msg),
            MiniSqlError::TaskPanic(msg) => write!(f, "{}", msg),
            MiniSqlError::PoolClosed(msg) => write!(f, "{}", msg),
            MiniSqlError::Json(msg) => write!(f, "{}", msg),
            MiniSqlError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for MiniSqlError {}

impl From<io::Error> for MiniSqlError {
    fn from(e: io::Error) -> Self {
        MiniSqlError::Io(e)
    }
}

impl From<serde_json::Error> for MiniSqlError {
    fn from(e: serde_json::Error) -> Self {
        MiniSqlError::Json(e.to_string())
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, MiniSqlError>;

/// MySQL error codes (subset needed to satisfy the external contract)
#[allow(dead_code)]
pub mod mysql_error_codes {
    pub const ER_PARSE_ERROR: u16 = 1064;
    pub const ER_NO_SUCH_TABLE: u16 = 1146;
    pub const ER_TABLE_EXISTS_ERROR: u16 = 1050;
    pub const ER_BAD_FIELD_ERROR: u16 = 1054;
    pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
    pub const ER_DBACCESS_DENIED_ERROR: u16 = 1142;
    pub const ER_UNKNOWN_COM_ERROR: u16 = 1047;
    pub const ER_NON_UNIQ_TABLE: u16 = 1066;
    pub const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
    pub const ER_LOCK_DEADLOCK: u16 = 1213;
}

impl MiniSqlError {
    /// Get the MySQL error code for this error
    pub fn mysql_error_code(&self) -> u16 {
        match self {
            MiniSqlError::Syntax(_) => mysql_error_codes::ER_PARSE_ERROR,
            MiniSqlError::Table(msg) if msg.contains("doesn't exist") => {
                mysql_error_codes::ER_NO_SUCH_TABLE
            }
            MiniSqlError::Table(msg) if msg.contains("Not unique table/alias") => {
                mysql_error_codes::ER_NON_UNIQ_TABLE
            }
            MiniSqlError::Table(_) => mysql_error_codes::ER_TABLE_EXISTS_ERROR,
            MiniSqlError::Column(_) => mysql_error_codes::ER_BAD_FIELD_ERROR,
            MiniSqlError::PermissionDenied(_) => mysql_error_codes::ER_DBACCESS_DENIED_ERROR,
            MiniSqlError::SerializationFailure(_) => mysql_error_codes::ER_LOCK_DEADLOCK,
            MiniSqlError::TransactionState(msg) if msg.contains("timeout") => {
                mysql_error_codes::ER_LOCK_WAIT_TIMEOUT
            }
            _ => mysql_error_codes::ER_UNKNOWN_COM_ERROR,
        }
    }

    /// Get the SQLSTATE for this error
    pub fn sql_state(&self) -> &'static str {
        match self {
            MiniSqlError::Syntax(_) => "42000",
            MiniSqlError::Table(_) => "42S02",
            MiniSqlError::Column(_) => "42S22",
            MiniSqlError::Schema(_) => "42000",
            MiniSqlError::PermissionDenied(_) => "42000",
            MiniSqlError::SerializationFailure(_) => "40001",
            MiniSqlError::WriteConflict(_) => "40001",
            _ => "HY000",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_contract() {
        assert_eq!(MiniSqlError::Syntax("x".into()).mysql_error_code(), 1064);
        assert_eq!(MiniSqlError::Syntax("x".into()).sql_state(), "42000");
        assert_eq!(MiniSqlError::table_not_found("t").mysql_error_code(), 1146);
        assert_eq!(MiniSqlError::table_not_found("t").sql_state(), "42S02");
        assert_eq!(
            MiniSqlError::PermissionDenied("x".into()).mysql_error_code(),
            1142
        );
        assert_eq!(
            MiniSqlError::SerializationFailure("x".into()).sql_state(),
            "40001"
        );
    }

    #[test]
    fn sanitized_message_hides_internal_detail() {
        let err = MiniSqlError::Internal("/etc/passwd leaked at frame 3".into());
        assert_eq!(err.sanitized_message(), "internal error");
        let err = MiniSqlError::TaskPanic("panicked at src/foo.rs:12".into());
        assert_eq!(err.sanitized_message(), "internal error");
        let err = MiniSqlError::table_not_found("users");
        assert!(err.sanitized_message().contains("users"));
    }
}
