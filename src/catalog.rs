//! Relational watch catalog.
//!
//! The conversational core only needs two things from the database: a
//! textual schema description to put in prompts, and a way to run a
//! generated query and get rows back as JSON objects.

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::error::{ConciergeError, Result};

#[cfg(test)]
use mockall::automock;

/// One result row, column name to value
pub type Row = serde_json::Map<String, Value>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaColumn {
    pub table: String,
    pub column: String,
    pub data_type: String,
}

/// "watches has brand of type text, watches has price of type numeric"
pub fn format_schema(details: &[SchemaColumn]) -> String {
    details
        .iter()
        .map(|c| format!("{} has {} of type {}", c.table, c.column, c.data_type))
        .collect::<Vec<_>>()
        .join(", ")
}

/// SQLite-backed catalog. The connection sits behind a mutex and queries
/// run on the blocking pool.
#[derive(Clone)]
pub struct SqliteCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalog {
    /// Open an existing catalog file without write access
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| {
            ConciergeError::Config(format!(
                "Failed to open catalog {}: {}",
                path.display(),
                e
            ))
        })?;
        info!("Catalog opened at {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConciergeError::Internal(format!("Catalog lock poisoned: {e}")))?;
        f(&conn)
    }

    /// Every user table's columns, tables by name and columns by position
    pub fn schema_details(&self) -> Result<Vec<SchemaColumn>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.name, p.name, p.type
                 FROM sqlite_master m
                 JOIN pragma_table_info(m.name) p
                 WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'
                 ORDER BY m.name, p.cid",
            )?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(SchemaColumn {
                        table: row.get(0)?,
                        column: row.get(1)?,
                        data_type: row.get::<_, String>(2)?.to_lowercase(),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(columns)
        })
    }

    pub fn schema_description(&self) -> Result<String> {
        Ok(format_schema(&self.schema_details()?))
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

fn query_rows(conn: &Connection, sql: &str) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(ConciergeError::SqlExecution(
            "only read-only statements may be run against the catalog".to_string(),
        ));
    }

    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (i, name) in names.iter().enumerate() {
            record.insert(name.clone(), json_value(row.get_ref(i)?));
        }
        out.push(record);
    }
    Ok(out)
}

#[async_trait]
impl RelationalStore for SqliteCatalog {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        let catalog = self.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || catalog.with_conn(|conn| query_rows(conn, &sql)))
            .await
            .map_err(|e| ConciergeError::Internal(format!("Catalog task failed: {e}")))?
    }
}
