//! SQLite row-store backend.
//!
//! Wraps a rusqlite connection behind the [`Backend`] contract. Every query
//! is prepared with bound parameters; identifiers (table and column names)
//! are validated against the identifier grammar before they are spliced
//! into SQL text, which is the only splicing that ever happens.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use polars::prelude::*;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use taiga_traits::validation::{sanitize_sql_path, validate_sql_identifier};
use taiga_traits::{DomainExpr, Result, SqlValue, TaigaError};

use crate::backend::{Backend, EngineKind};
use crate::schema::SchemaMapper;

/// SQLite implementation of [`Backend`].
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    timeout: Mutex<Option<Duration>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open a SQLite database file read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let text = path.to_str().ok_or_else(|| {
            TaigaError::InvalidPath(format!("non-UTF8 path: {}", path.display()))
        })?;
        sanitize_sql_path(text)?;
        if !path.exists() {
            return Err(TaigaError::InvalidPath(format!(
                "database file not found: {text}"
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(sql_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            timeout: Mutex::new(None),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| TaigaError::QueryError("connection closed".to_string()))?;
        let timeout = self.timeout.lock().ok().and_then(|t| *t);
        match timeout {
            Some(deadline) => {
                let start = Instant::now();
                let out = f(&guard)?;
                if start.elapsed() > deadline {
                    return Err(TaigaError::Cancelled(format!(
                        "query exceeded timeout of {deadline:?}"
                    )));
                }
                Ok(out)
            }
            None => f(&guard),
        }
    }

    fn run_query(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<DataFrame> {
        let mut stmt = conn.prepare(sql).map_err(sql_err)?;
        let names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut buffers: Vec<ColumnBuffer> = names.iter().map(|_| ColumnBuffer::new()).collect();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter().map(bind_value)))
            .map_err(sql_err)?;

        let mut height = 0usize;
        while let Some(row) = rows.next().map_err(sql_err)? {
            for (idx, buffer) in buffers.iter_mut().enumerate() {
                let value = row.get_ref(idx).map_err(sql_err)?;
                buffer.push(value);
            }
            height += 1;
        }

        let columns: Vec<Column> = names
            .into_iter()
            .zip(buffers)
            .map(|(name, buffer)| buffer.into_column(name, height))
            .collect();
        let df = DataFrame::new(columns)?;
        SchemaMapper::normalize(df)
    }
}

impl Backend for SqliteBackend {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<DataFrame> {
        self.with_conn(|conn| Self::run_query(conn, sql, params))
    }

    fn read_table(
        &self,
        name: &str,
        columns: Option<&[String]>,
        filter: Option<&DomainExpr>,
        limit: Option<usize>,
    ) -> Result<DataFrame> {
        validate_sql_identifier(name)?;
        if !self.table_exists(name)? {
            return Err(TaigaError::MissingTable(name.to_string()));
        }

        let projection = match columns {
            Some(cols) if !cols.is_empty() => {
                for col in cols {
                    validate_sql_identifier(col)?;
                }
                cols.join(", ")
            }
            _ => "*".to_string(),
        };

        let mut sql = format!("SELECT {projection} FROM {name}");
        let mut params: Vec<SqlValue> = Vec::new();
        if let Some(expr) = filter {
            let (fragment, binds) = expr.to_sql();
            sql.push_str(" WHERE ");
            sql.push_str(&fragment);
            params.extend(binds);
        }
        if let Some(n) = limit {
            sql.push_str(" LIMIT ");
            sql.push_str(&n.to_string());
        }

        self.execute(&sql, &params)
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        validate_sql_identifier(name)?;
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND UPPER(name) = UPPER(?1)",
                    [name],
                    |row| row.get(0),
                )
                .map_err(sql_err)?;
            Ok(count > 0)
        })
    }

    fn schema(&self, name: &str) -> Result<BTreeMap<String, DataType>> {
        validate_sql_identifier(name)?;
        if !self.table_exists(name)? {
            return Err(TaigaError::MissingTable(name.to_string()));
        }
        self.with_conn(|conn| {
            // PRAGMA arguments cannot be bound; the identifier was validated.
            let mut stmt = conn
                .prepare(&format!("PRAGMA table_info({name})"))
                .map_err(sql_err)?;
            let mut out = BTreeMap::new();
            let mut rows = stmt.query([]).map_err(sql_err)?;
            while let Some(row) = rows.next().map_err(sql_err)? {
                let column: String = row.get(1).map_err(sql_err)?;
                let decl: String = row.get::<_, Option<String>>(2).map_err(sql_err)?.unwrap_or_default();
                out.insert(column.to_uppercase(), decl_to_dtype(&decl));
            }
            Ok(out)
        })
    }

    fn load_spatial_extension(&self) -> Result<()> {
        // Spatial clipping runs in-process over LAT/LON; nothing to load.
        Ok(())
    }

    fn set_timeout(&self, timeout: Option<Duration>) {
        if let Ok(mut guard) = self.timeout.lock() {
            *guard = timeout;
        }
    }
}

fn sql_err(e: rusqlite::Error) -> TaigaError {
    TaigaError::QueryError(e.to_string())
}

fn bind_value(value: &SqlValue) -> rusqlite::types::Value {
    match value {
        SqlValue::Null => rusqlite::types::Value::Null,
        SqlValue::Integer(v) => rusqlite::types::Value::Integer(*v),
        SqlValue::Real(v) => rusqlite::types::Value::Real(*v),
        SqlValue::Text(v) => rusqlite::types::Value::Text(v.clone()),
    }
}

fn decl_to_dtype(decl: &str) -> DataType {
    let upper = decl.to_uppercase();
    if upper.contains("INT") {
        DataType::Int64
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        DataType::Float64
    } else {
        DataType::String
    }
}

/// Accumulates one result column, promoting the buffer type as values of
/// wider kinds arrive (integers widen to floats; anything mixes into text).
enum ColumnBuffer {
    Empty(usize),
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnBuffer {
    const fn new() -> Self {
        Self::Empty(0)
    }

    fn push(&mut self, value: ValueRef<'_>) {
        match value {
            ValueRef::Null => match self {
                Self::Empty(n) => *n += 1,
                Self::Int(v) => v.push(None),
                Self::Float(v) => v.push(None),
                Self::Text(v) => v.push(None),
            },
            ValueRef::Integer(i) => match self {
                Self::Empty(n) => {
                    let mut v = vec![None; *n];
                    v.push(Some(i));
                    *self = Self::Int(v);
                }
                Self::Int(v) => v.push(Some(i)),
                Self::Float(v) => v.push(Some(i as f64)),
                Self::Text(v) => v.push(Some(i.to_string())),
            },
            ValueRef::Real(f) => match self {
                Self::Empty(n) => {
                    let mut v = vec![None; *n];
                    v.push(Some(f));
                    *self = Self::Float(v);
                }
                Self::Int(v) => {
                    let mut floats: Vec<Option<f64>> =
                        v.iter().map(|o| o.map(|i| i as f64)).collect();
                    floats.push(Some(f));
                    *self = Self::Float(floats);
                }
                Self::Float(v) => v.push(Some(f)),
                Self::Text(v) => v.push(Some(f.to_string())),
            },
            ValueRef::Text(t) => {
                let text = String::from_utf8_lossy(t).into_owned();
                match self {
                    Self::Empty(n) => {
                        let mut v = vec![None; *n];
                        v.push(Some(text));
                        *self = Self::Text(v);
                    }
                    Self::Int(v) => {
                        let mut strings: Vec<Option<String>> =
                            v.iter().map(|o| o.map(|i| i.to_string())).collect();
                        strings.push(Some(text));
                        *self = Self::Text(strings);
                    }
                    Self::Float(v) => {
                        let mut strings: Vec<Option<String>> =
                            v.iter().map(|o| o.map(|f| f.to_string())).collect();
                        strings.push(Some(text));
                        *self = Self::Text(strings);
                    }
                    Self::Text(v) => v.push(Some(text)),
                }
            }
            ValueRef::Blob(_) => match self {
                Self::Empty(n) => {
                    let mut v: Vec<Option<String>> = vec![None; *n];
                    v.push(None);
                    *self = Self::Text(v);
                }
                Self::Int(v) => v.push(None),
                Self::Float(v) => v.push(None),
                Self::Text(v) => v.push(None),
            },
        }
    }

    fn into_column(self, name: String, height: usize) -> Column {
        match self {
            Self::Empty(_) => {
                // All-null column with no observed type; default to text.
                let values: Vec<Option<String>> = vec![None; height];
                Column::new(name.into(), values)
            }
            Self::Int(values) => Column::new(name.into(), values),
            Self::Float(values) => Column::new(name.into(), values),
            Self::Text(values) => Column::new(name.into(), values),
        }
    }
}
