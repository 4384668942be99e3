//! Virtual catalog source: `information_schema`-shaped read (and narrowly
//! writable) views computed on demand from every data source registered
//! with the owning `DB`.
//!
//! Grounded on this crate's own schema-resolution conventions
//! (`executor/schema.rs`'s per-table/per-column bookkeeping) applied to a
//! cross-source registry instead of a single join's table list, since
//! nothing in the teacher ever had to describe more than one storage engine
//! at a time.

use std::sync::Arc;

use crate::datasource::{Capabilities, DataSource, FilterableDataSource, MvccCapability, QueryOptions, SourceRegistry};
use crate::error::{MiniSqlError, Result};
use crate::expr_eval::eval_predicate;
use crate::types::{ColumnDef, DataType, Row, TableSchema, Value};

const STANDARD_TABLES: &[&str] = &["schemata", "tables", "columns", "table_constraints", "key_column_usage"];
const PRIVILEGE_TABLES: &[&str] = &["USER_PRIVILEGES", "SCHEMA_PRIVILEGES", "TABLE_PRIVILEGES", "COLUMN_PRIVILEGES"];
const ADMIN_ROLE: &str = "admin";

/// A virtual catalog source bound to one viewer's role. `Session` constructs
/// one of these per session, pointed at the database-wide source registry.
pub struct CatalogDataSource {
    registry: SourceRegistry,
    role: String,
}

impl CatalogDataSource {
    pub fn new(registry: SourceRegistry, role: impl Into<String>) -> Self {
        Self { registry, role: role.into() }
    }

    fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case(ADMIN_ROLE)
    }

    fn virtual_columns(table: &str) -> Vec<&'static str> {
        match table {
            "schemata" => vec!["catalog_name", "schema_name"],
            "tables" => vec!["table_schema", "table_name", "table_type"],
            "columns" => vec!["table_schema", "table_name", "column_name", "data_type", "is_nullable", "column_key", "extra"],
            "table_constraints" => vec!["table_schema", "table_name", "constraint_name", "constraint_type"],
            "key_column_usage" => vec!["table_schema", "table_name", "column_name", "constraint_name", "ordinal_position"],
            "USER_PRIVILEGES" | "SCHEMA_PRIVILEGES" | "TABLE_PRIVILEGES" | "COLUMN_PRIVILEGES" => {
                vec!["grantee", "table_schema", "privilege_type"]
            }
            _ => vec![],
        }
    }

    fn rows_for(&self, table: &str) -> Result<Vec<Row>> {
        let sources = self.registry.read().unwrap();
        let columns: Arc<Vec<String>> = Arc::new(Self::virtual_columns(table).into_iter().map(String::from).collect());
        let mut out = Vec::new();

        match table {
            "schemata" => {
                for name in sources.keys() {
                    out.push(Row::new(Arc::clone(&columns), vec![Value::String("minisql".into()), Value::String(name.clone())]));
                }
            }
            "tables" => {
                for (schema_name, source) in sources.iter() {
                    for t in source.get_tables()? {
                        out.push(Row::new(
                            Arc::clone(&columns),
                            vec![Value::String(schema_name.clone()), Value::String(t), Value::String("BASE TABLE".into())],
                        ));
                    }
                }
            }
            "columns" => {
                for (schema_name, source) in sources.iter() {
                    for t in source.get_tables()? {
                        let info = source.get_table_info(&t)?;
                        for col in &info.columns {
                            out.push(Row::new(
                                Arc::clone(&columns),
                                vec![
                                    Value::String(schema_name.clone()),
                                    Value::String(t.clone()),
                                    Value::String(col.name.clone()),
                                    Value::String(col.data_type.to_string()),
                                    Value::String(if col.nullable { "YES".into() } else { "NO".into() }),
                                    Value::String(if col.primary_key { "PRI".into() } else { "".into() }),
                                    Value::String(if col.auto_increment { "auto_increment".into() } else { "".into() }),
                                ],
                            ));
                        }
                    }
                }
            }
            "table_constraints" => {
                for (schema_name, source) in sources.iter() {
                    for t in source.get_tables()? {
                        let info = source.get_table_info(&t)?;
                        if !info.primary_key_columns().is_empty() {
                            out.push(Row::new(
                                Arc::clone(&columns),
                                vec![
                                    Value::String(schema_name.clone()),
                                    Value::String(t.clone()),
                                    Value::String(format!("PRIMARY_{}", t)),
                                    Value::String("PRIMARY KEY".into()),
                                ],
                            ));
                        }
                    }
                }
            }
            "key_column_usage" => {
                for (schema_name, source) in sources.iter() {
                    for t in source.get_tables()? {
                        let info = source.get_table_info(&t)?;
                        for (pos, idx) in info.primary_key_columns().iter().enumerate() {
                            out.push(Row::new(
                                Arc::clone(&columns),
                                vec![
                                    Value::String(schema_name.clone()),
                                    Value::String(t.clone()),
                                    Value::String(info.columns[*idx].name.clone()),
                                    Value::String(format!("PRIMARY_{}", t)),
                                    Value::Integer(pos as i64 + 1),
                                ],
                            ));
                        }
                    }
                }
            }
            name if PRIVILEGE_TABLES.contains(&name) => {
                if !self.is_admin() {
                    return Err(MiniSqlError::PermissionDenied(format!(
                        "role '{}' cannot view information_schema.{}",
                        self.role, name
                    )));
                }
                for schema_name in sources.keys() {
                    out.push(Row::new(
                        Arc::clone(&columns),
                        vec![Value::String(self.role.clone()), Value::String(schema_name.clone()), Value::String("ALL".into())],
                    ));
                }
            }
            _ => return Err(MiniSqlError::table_not_found(table)),
        }
        Ok(out)
    }
}

impl DataSource for CatalogDataSource {
    fn name(&self) -> &str {
        "information_schema"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            writable: false,
            mvcc: MvccCapability::None,
            filterable: true,
        }
    }

    fn connect(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn get_tables(&self) -> Result<Vec<String>> {
        let mut tables: Vec<String> = STANDARD_TABLES.iter().map(|s| s.to_string()).collect();
        if self.is_admin() {
            tables.extend(PRIVILEGE_TABLES.iter().map(|s| s.to_string()));
        }
        Ok(tables)
    }

    fn get_table_info(&self, table: &str) -> Result<TableSchema> {
        let cols = Self::virtual_columns(table);
        if cols.is_empty() {
            return Err(MiniSqlError::table_not_found(table));
        }
        Ok(TableSchema {
            name: table.to_string(),
            db_name: "information_schema".to_string(),
            columns: cols
                .into_iter()
                .map(|c| ColumnDef {
                    name: c.to_string(),
                    data_type: DataType::Any,
                    nullable: true,
                    default: None,
                    primary_key: false,
                    auto_increment: false,
                    generated: None,
                })
                .collect(),
            auto_increment_counter: 1,
        })
    }

    fn query(&self, table: &str, options: &QueryOptions) -> Result<Vec<Row>> {
        let mut rows = self.rows_for(table)?;
        rows.retain(|row| options.filters.iter().all(|f| eval_predicate(f, row).unwrap_or(false)));
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
        Err(MiniSqlError::CapabilityError("information_schema is read-only".into()))
    }

    fn drop_table(&self, _table: &str) -> Result<()> {
        Err(MiniSqlError::CapabilityError("information_schema is read-only".into()))
    }

    fn truncate_table(&self, _table: &str) -> Result<()> {
        Err(MiniSqlError::CapabilityError("information_schema is read-only".into()))
    }
}

impl FilterableDataSource for CatalogDataSource {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::memory::MemoryTableStore;
    use crate::mvcc::{MvccConfig, TransactionManager};
    use std::collections::HashMap;
    use std::sync::RwLock;

    fn registry_with_one_table() -> SourceRegistry {
        let mgr = TransactionManager::new(MvccConfig {
            gc_interval_seconds: 3600,
            ..MvccConfig::default()
        });
        let mem = MemoryTableStore::new("app", mgr);
        mem.create_table(TableSchema {
            name: "users".into(),
            db_name: "app".into(),
            columns: vec![ColumnDef {
                name: "id".into(),
                data_type: DataType::Integer,
                nullable: false,
                default: None,
                primary_key: true,
                auto_increment: true,
                generated: None,
            }],
            auto_increment_counter: 1,
        })
        .unwrap();
        let mut map: HashMap<String, Arc<dyn DataSource>> = HashMap::new();
        map.insert("app".into(), Arc::new(mem));
        Arc::new(RwLock::new(map))
    }

    #[test]
    fn non_admin_sees_five_standard_tables_only() {
        let reg = registry_with_one_table();
        let cat = CatalogDataSource::new(reg, "reader");
        assert_eq!(cat.get_tables().unwrap(), STANDARD_TABLES.to_vec());
    }

    #[test]
    fn admin_sees_privilege_views_too() {
        let reg = registry_with_one_table();
        let cat = CatalogDataSource::new(reg, "admin");
        assert_eq!(cat.get_tables().unwrap().len(), STANDARD_TABLES.len() + PRIVILEGE_TABLES.len());
    }

    #[test]
    fn non_admin_denied_privilege_table_query() {
        let reg = registry_with_one_table();
        let cat = CatalogDataSource::new(reg, "reader");
        let err = cat.query("USER_PRIVILEGES", &QueryOptions::default());
        assert!(matches!(err, Err(MiniSqlError::PermissionDenied(_))));
    }

    #[test]
    fn columns_table_reflects_registered_source() {
        let reg = registry_with_one_table();
        let cat = CatalogDataSource::new(reg, "reader");
        let rows = cat.query("columns", &QueryOptions::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("column_name"), Value::String("id".into()));
    }
}
