//! Slice adapter: wraps a caller-owned ordered collection of row maps or
//! structs as a data source.
//!
//! Grounded on the reflection-free mapping redesign note rather than any
//! existing teacher file (the teacher's storage is entirely internal to the
//! engine, never caller-owned memory). Reflection is replaced by a
//! caller-implemented `RowCodec`: callers resolve the `db` > `json` > field
//! name tag precedence themselves when they build the codec, since this
//! language has no runtime reflection to drive that resolution generically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::datasource::{Capabilities, DataSource, FilterableDataSource, MvccCapability, QueryOptions, WritableDataSource};
use crate::error::{MiniSqlError, Result};
use crate::expr_eval::eval_predicate;
use crate::mvcc::Xid;
use crate::types::{ModifyResult, Row, TableSchema, Value};

/// Maps a caller's item type to/from the engine's row representation.
/// Implementations decide their own column order and tag precedence;
/// `columns()` must return them in the order `decode` populates `Row::values`.
pub trait RowCodec<T>: Send + Sync {
    fn columns(&self) -> Vec<String>;
    fn decode(&self, item: &T) -> Row;
    fn encode(&self, row: &Row) -> Result<T>;
}

/// A `RowCodec` for row-map slices (`HashMap<String, Value>` items), which
/// have no struct tags to resolve: columns are ordered lexicographically so
/// the same set of keys always yields the same schema.
pub struct MapRowCodec {
    columns: Vec<String>,
}

impl MapRowCodec {
    pub fn new(mut columns: Vec<String>) -> Self {
        columns.sort();
        columns.dedup();
        Self { columns }
    }
}

impl RowCodec<HashMap<String, Value>> for MapRowCodec {
    fn columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn decode(&self, item: &HashMap<String, Value>) -> Row {
        let values = self.columns.iter().map(|c| item.get(c).cloned().unwrap_or(Value::Null)).collect();
        Row::new(Arc::new(self.columns.clone()), values)
    }

    fn encode(&self, row: &Row) -> Result<HashMap<String, Value>> {
        Ok(self.columns.iter().map(|c| (c.clone(), row.get(c))).collect())
    }
}

/// One field of a hand-built struct codec. Callers resolve `db`/`json`/field
/// name precedence and field exclusion (`-`) before constructing this: a
/// field with no `FieldSpec` simply isn't part of the schema.
pub struct FieldSpec<T> {
    pub column: String,
    pub get: Box<dyn Fn(&T) -> Value + Send + Sync>,
    pub set: Box<dyn Fn(&mut T, Value) + Send + Sync>,
}

impl<T> FieldSpec<T> {
    pub fn new(
        column: impl Into<String>,
        get: impl Fn(&T) -> Value + Send + Sync + 'static,
        set: impl Fn(&mut T, Value) + Send + Sync + 'static,
    ) -> Self {
        Self {
            column: column.into(),
            get: Box::new(get),
            set: Box::new(set),
        }
    }

    /// Resolve a column name from annotation priority (`db` tag, then
    /// `json` tag, then the field name), honoring `-` exclusion in either
    /// tag. Returns `None` when the field is excluded from the schema.
    pub fn resolve_column_name(db_tag: Option<&str>, json_tag: Option<&str>, field_name: &str) -> Option<String> {
        if db_tag == Some("-") || json_tag == Some("-") {
            return None;
        }
        Some(
            db_tag
                .or(json_tag)
                .map(str::to_string)
                .unwrap_or_else(|| field_name.to_string()),
        )
    }
}

/// Requires `T: Default` so `encode` can build a fresh item and `set` each
/// mapped field into it.
pub struct StructRowCodec<T> {
    fields: Vec<FieldSpec<T>>,
}

impl<T: Default> StructRowCodec<T> {
    pub fn new(fields: Vec<FieldSpec<T>>) -> Self {
        Self { fields }
    }
}

impl<T: Default + Send + Sync> RowCodec<T> for StructRowCodec<T> {
    fn columns(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.column.clone()).collect()
    }

    fn decode(&self, item: &T) -> Row {
        let columns = Arc::new(self.columns());
        let values = self.fields.iter().map(|f| (f.get)(item)).collect();
        Row::new(columns, values)
    }

    fn encode(&self, row: &Row) -> Result<T> {
        let mut item = T::default();
        for f in &self.fields {
            (f.set)(&mut item, row.get(&f.column));
        }
        Ok(item)
    }
}

enum Handle<T> {
    /// Shared with the caller: writes mutate this `Vec` directly, so the
    /// caller observes committed state without any extra sync step.
    Owning(Arc<Mutex<Vec<T>>>),
    /// A read-only snapshot; the source cannot be written through.
    NonOwning(Arc<Vec<T>>),
}

struct PendingOp<T> {
    // Replacement contents staged for this xid, applied verbatim on commit.
    snapshot: Vec<T>,
}

/// A data source over a caller-owned slice of `T`, addressed by codec.
pub struct SliceDataSource<T> {
    source_name: String,
    table_name: String,
    codec: Arc<dyn RowCodec<T>>,
    handle: Handle<T>,
    schema: TableSchema,
    pending: Mutex<HashMap<Xid, PendingOp<T>>>,
    connected: AtomicBool,
}

impl<T: Clone + Send + Sync + 'static> SliceDataSource<T> {
    pub fn owning(source_name: impl Into<String>, table_name: impl Into<String>, codec: Arc<dyn RowCodec<T>>, data: Arc<Mutex<Vec<T>>>, schema: TableSchema) -> Self {
        Self {
            source_name: source_name.into(),
            table_name: table_name.into(),
            codec,
            handle: Handle::Owning(data),
            schema,
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        }
    }

    pub fn non_owning(source_name: impl Into<String>, table_name: impl Into<String>, codec: Arc<dyn RowCodec<T>>, data: Arc<Vec<T>>, schema: TableSchema) -> Self {
        Self {
            source_name: source_name.into(),
            table_name: table_name.into(),
            codec,
            handle: Handle::NonOwning(data),
            schema,
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        }
    }

    fn require_table(&self, table: &str) -> Result<()> {
        if table != self.table_name {
            return Err(MiniSqlError::table_not_found(table));
        }
        Ok(())
    }

    fn snapshot_items(&self, xid: Option<Xid>) -> Vec<T> {
        if let Some(xid) = xid {
            if let Some(pending) = self.pending.lock().unwrap().get(&xid) {
                return pending.snapshot.clone();
            }
        }
        match &self.handle {
            Handle::Owning(data) => data.lock().unwrap().clone(),
            Handle::NonOwning(data) => data.as_ref().clone(),
        }
    }

    fn stage(&self, xid: Option<Xid>, items: Vec<T>) -> Result<()> {
        match xid {
            Some(xid) => {
                self.pending.lock().unwrap().insert(xid, PendingOp { snapshot: items });
                Ok(())
            }
            None => self.apply(items),
        }
    }

    fn apply(&self, items: Vec<T>) -> Result<()> {
        match &self.handle {
            Handle::Owning(data) => {
                *data.lock().unwrap() = items;
                Ok(())
            }
            Handle::NonOwning(_) => Err(MiniSqlError::CapabilityError(format!(
                "data source '{}' is read-only (non-owning slice handle)",
                self.source_name
            ))),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> DataSource for SliceDataSource<T> {
    fn name(&self) -> &str {
        &self.source_name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            writable: matches!(self.handle, Handle::Owning(_)),
            mvcc: MvccCapability::None,
            filterable: true,
        }
    }

    fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn get_tables(&self) -> Result<Vec<String>> {
        Ok(vec![self.table_name.clone()])
    }

    fn as_writable(&self) -> Option<&dyn WritableDataSource> {
        Some(self)
    }

    fn get_table_info(&self, table: &str) -> Result<TableSchema> {
        self.require_table(table)?;
        Ok(self.schema.clone())
    }

    fn query(&self, table: &str, options: &QueryOptions) -> Result<Vec<Row>> {
        self.require_table(table)?;
        let items = self.snapshot_items(options.xid);
        let mut rows: Vec<Row> = items.iter().map(|item| self.codec.decode(item)).collect();
        rows.retain(|row| {
            for f in &options.filters {
                if !eval_predicate(f, row).unwrap_or(false) {
                    return false;
                }
            }
            true
        });
        if let Some(cols) = &options.select_columns {
            let projected = Arc::new(cols.clone());
            rows = rows
                .into_iter()
                .map(|r| Row::new(Arc::clone(&projected), cols.iter().map(|c| r.get(c)).collect()))
                .collect();
        }
        rows = rows.into_iter().skip(options.offset as usize).collect();
        if let Some(limit) = options.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    fn create_table(&self, _schema: TableSchema) -> Result<()> {
        Err(MiniSqlError::CapabilityError("slice sources expose a single fixed table".into()))
    }

    fn drop_table(&self, _table: &str) -> Result<()> {
        Err(MiniSqlError::CapabilityError("slice sources do not support DROP TABLE".into()))
    }

    fn truncate_table(&self, table: &str) -> Result<()> {
        self.require_table(table)?;
        self.apply(Vec::new())
    }
}

impl<T: Clone + Send + Sync + 'static> FilterableDataSource for SliceDataSource<T> {}

impl<T: Clone + Send + Sync + 'static> WritableDataSource for SliceDataSource<T> {
    fn insert(&self, table: &str, row: Row, xid: Option<Xid>) -> Result<ModifyResult> {
        self.require_table(table)?;
        let mut items = self.snapshot_items(xid);
        items.push(self.codec.encode(&row)?);
        self.stage(xid, items)?;
        Ok(ModifyResult {
            rows_affected: 1,
            last_insert_id: 0,
        })
    }

    fn update(&self, table: &str, options: &QueryOptions, assignments: &[(String, Value)], xid: Option<Xid>) -> Result<ModifyResult> {
        self.require_table(table)?;
        let mut items = self.snapshot_items(xid);
        let mut affected = 0u64;
        for item in items.iter_mut() {
            let row = self.codec.decode(item);
            let matches = options.filters.iter().all(|f| eval_predicate(f, &row).unwrap_or(false));
            if !matches {
                continue;
            }
            let mut values = row.values.clone();
            for (col, val) in assignments {
                if let Some(pos) = row.columns.iter().position(|c| c.eq_ignore_ascii_case(col)) {
                    values[pos] = val.clone();
                }
            }
            let new_row = Row::new(Arc::clone(&row.columns), values);
            *item = self.codec.encode(&new_row)?;
            affected += 1;
        }
        self.stage(xid, items)?;
        Ok(ModifyResult {
            rows_affected: affected,
            last_insert_id: 0,
        })
    }

    fn delete(&self, table: &str, options: &QueryOptions, xid: Option<Xid>) -> Result<ModifyResult> {
        self.require_table(table)?;
        let items = self.snapshot_items(xid);
        let before = items.len();
        let kept: Vec<T> = items
            .into_iter()
            .filter(|item| {
                let row = self.codec.decode(item);
                !options.filters.iter().all(|f| eval_predicate(f, &row).unwrap_or(false))
            })
            .collect();
        let affected = (before - kept.len()) as u64;
        self.stage(xid, kept)?;
        Ok(ModifyResult {
            rows_affected: affected,
            last_insert_id: 0,
        })
    }

    fn finalize_transaction(&self, xid: Xid, commit: bool) -> Result<()> {
        if let Some(pending) = self.pending.lock().unwrap().remove(&xid) {
            if commit {
                self.apply(pending.snapshot)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{BinaryOperator, Expr};

    fn codec() -> Arc<dyn RowCodec<HashMap<String, Value>>> {
        Arc::new(MapRowCodec::new(vec!["id".into(), "name".into()]))
    }

    fn item(id: i64, name: &str) -> HashMap<String, Value> {
        [("id".to_string(), Value::Integer(id)), ("name".to_string(), Value::String(name.into()))]
            .into_iter()
            .collect()
    }

    fn schema() -> TableSchema {
        TableSchema {
            name: "people".into(),
            db_name: "minisql".into(),
            columns: vec![],
            auto_increment_counter: 1,
        }
    }

    #[test]
    fn owning_handle_commit_syncs_back_to_shared_vec() {
        let backing = Arc::new(Mutex::new(vec![item(1, "a")]));
        let src = SliceDataSource::owning("people", "people", codec(), Arc::clone(&backing), schema());
        src.insert("people", Row::new(Arc::new(vec!["id".into(), "name".into()]), vec![Value::Integer(2), Value::String("b".into())]), Some(7)).unwrap();
        assert_eq!(backing.lock().unwrap().len(), 1);
        src.finalize_transaction(7, true).unwrap();
        assert_eq!(backing.lock().unwrap().len(), 2);
    }

    #[test]
    fn rollback_discards_staged_writes() {
        let backing = Arc::new(Mutex::new(vec![item(1, "a")]));
        let src = SliceDataSource::owning("people", "people", codec(), Arc::clone(&backing), schema());
        src.insert("people", Row::new(Arc::new(vec!["id".into(), "name".into()]), vec![Value::Integer(2), Value::String("b".into())]), Some(7)).unwrap();
        src.finalize_transaction(7, false).unwrap();
        assert_eq!(backing.lock().unwrap().len(), 1);
    }

    #[test]
    fn non_owning_handle_rejects_writes() {
        let backing = Arc::new(vec![item(1, "a")]);
        let src = SliceDataSource::non_owning("people", "people", codec(), backing, schema());
        let err = src.insert("people", Row::new(Arc::new(vec!["id".into(), "name".into()]), vec![Value::Integer(2), Value::String("b".into())]), None);
        assert!(err.is_err());
    }

    #[test]
    fn query_applies_filter() {
        let backing = Arc::new(Mutex::new(vec![item(1, "a"), item(2, "b")]));
        let src = SliceDataSource::owning("people", "people", codec(), backing, schema());
        let opts = QueryOptions {
            filters: vec![Expr::BinaryOp {
                left: Box::new(Expr::Column { table: None, name: "id".into() }),
                op: BinaryOperator::Equal,
                right: Box::new(Expr::Literal(Value::Integer(2))),
            }],
            ..Default::default()
        };
        let rows = src.query("people", &opts).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Value::String("b".into()));
    }
}
