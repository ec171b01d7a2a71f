//! Columnar parquet-store backend.
//!
//! A DuckDB-class layout: a directory holding one parquet file per FIA
//! table (uppercase stem, `PLOT.parquet`, `POP_STRATUM.parquet`, ...).
//! Tables are scanned lazily so projection and predicate push-down happen
//! inside the engine. Raw SQL goes through the polars SQL context; since
//! that engine has no bind protocol, parameters are rendered through a
//! strict literal writer instead (numbers verbatim, strings escaped by
//! quote doubling).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use polars::prelude::*;
use polars::sql::SQLContext;
use taiga_traits::validation::{sanitize_sql_path, validate_sql_identifier};
use taiga_traits::{DomainExpr, Result, SqlValue, TaigaError};

use crate::backend::{Backend, EngineKind};
use crate::schema::SchemaMapper;

/// Parquet-directory implementation of [`Backend`].
pub struct ColumnarBackend {
    root: PathBuf,
    timeout: Mutex<Option<Duration>>,
}

impl std::fmt::Debug for ColumnarBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnarBackend")
            .field("root", &self.root)
            .finish()
    }
}

impl ColumnarBackend {
    /// Open a parquet-store directory.
    pub fn open(root: &Path) -> Result<Self> {
        let text = root.to_str().ok_or_else(|| {
            TaigaError::InvalidPath(format!("non-UTF8 path: {}", root.display()))
        })?;
        sanitize_sql_path(text)?;
        if !root.is_dir() {
            return Err(TaigaError::InvalidPath(format!(
                "columnar store directory not found: {text}"
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
            timeout: Mutex::new(None),
        })
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.parquet", name.to_uppercase()))
    }

    /// Names of every table present in the store.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| TaigaError::QueryError(format!("cannot list store: {e}")))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_uppercase());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn check_deadline(&self, start: Instant) -> Result<()> {
        let timeout = self.timeout.lock().ok().and_then(|t| *t);
        if let Some(deadline) = timeout {
            if start.elapsed() > deadline {
                return Err(TaigaError::Cancelled(format!(
                    "query exceeded timeout of {deadline:?}"
                )));
            }
        }
        Ok(())
    }

    fn scan(&self, name: &str) -> Result<LazyFrame> {
        let path = self.table_path(name);
        if !path.exists() {
            return Err(TaigaError::MissingTable(name.to_string()));
        }
        LazyFrame::scan_parquet(&path, ScanArgsParquet::default())
            .map_err(TaigaError::from)
    }
}

impl Backend for ColumnarBackend {
    fn engine(&self) -> EngineKind {
        EngineKind::Columnar
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<DataFrame> {
        let start = Instant::now();
        let rendered = render_placeholders(sql, params)?;
        let mut ctx = SQLContext::new();
        for name in self.table_names()? {
            ctx.register(&name, self.scan(&name)?);
        }
        let lf = ctx
            .execute(&rendered)
            .map_err(|e| TaigaError::QueryError(e.to_string()))?;
        let df = lf.collect()?;
        self.check_deadline(start)?;
        SchemaMapper::normalize(df)
    }

    fn read_table(
        &self,
        name: &str,
        columns: Option<&[String]>,
        filter: Option<&DomainExpr>,
        limit: Option<usize>,
    ) -> Result<DataFrame> {
        let start = Instant::now();
        let mut lf = self.scan_table(name, columns, filter)?;
        if let Some(n) = limit {
            lf = lf.limit(n as u32);
        }
        let df = lf.collect()?;
        self.check_deadline(start)?;
        SchemaMapper::normalize(df)
    }

    fn scan_table(
        &self,
        name: &str,
        columns: Option<&[String]>,
        filter: Option<&DomainExpr>,
    ) -> Result<LazyFrame> {
        validate_sql_identifier(name)?;
        let mut lf = self.scan(name)?;
        if let Some(expr) = filter {
            lf = lf.filter(expr.to_polars());
        }
        if let Some(cols) = columns {
            if !cols.is_empty() {
                let exprs: Vec<Expr> = cols.iter().map(|c| col(c.as_str())).collect();
                lf = lf.select(exprs);
            }
        }
        Ok(lf)
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        validate_sql_identifier(name)?;
        Ok(self.table_path(name).exists())
    }

    fn schema(&self, name: &str) -> Result<BTreeMap<String, DataType>> {
        let mut lf = self.scan(name)?;
        let schema = lf
            .collect_schema()
            .map_err(|e| TaigaError::QueryError(e.to_string()))?;
        Ok(schema
            .iter()
            .map(|(name, dtype)| (name.to_string().to_uppercase(), dtype.clone()))
            .collect())
    }

    fn load_spatial_extension(&self) -> Result<()> {
        // The GeoJSON clipper is built in; loading just confirms presence.
        Ok(())
    }

    fn set_timeout(&self, timeout: Option<Duration>) {
        if let Ok(mut guard) = self.timeout.lock() {
            *guard = timeout;
        }
    }
}

/// Replace `?` placeholders with strictly-rendered literals.
///
/// Placeholder counting is positional, exactly like a bind protocol; a
/// count mismatch is an error rather than a silent truncation.
fn render_placeholders(sql: &str, params: &[SqlValue]) -> Result<String> {
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut next = 0usize;
    let mut in_string = false;

    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                out.push(ch);
            }
            '?' if !in_string => {
                let value = params.get(next).ok_or_else(|| {
                    TaigaError::QueryError(format!(
                        "placeholder {} has no bound parameter",
                        next + 1
                    ))
                })?;
                out.push_str(&render_literal(value));
                next += 1;
            }
            _ => out.push(ch),
        }
    }

    if next != params.len() {
        return Err(TaigaError::QueryError(format!(
            "{} parameters bound but {} placeholders found",
            params.len(),
            next
        )));
    }
    Ok(out)
}

fn render_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(v) => v.to_string(),
        SqlValue::Real(v) => {
            if v.is_finite() {
                format!("{v:?}")
            } else {
                "NULL".to_string()
            }
        }
        SqlValue::Text(v) => format!("'{}'", v.replace('\'', "''")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FIXTURE_ID: AtomicUsize = AtomicUsize::new(0);

    fn fixture_store() -> ColumnarBackend {
        let dir = std::env::temp_dir().join(format!(
            "taiga-columnar-test-{}-{}",
            std::process::id(),
            FIXTURE_ID.fetch_add(1, Ordering::SeqCst)
        ));
        let _ = std::fs::create_dir_all(&dir);

        let mut plot = df! {
            "CN" => &[101i64, 102, 103],
            "STATECD" => &[13i64, 13, 48],
            "INVYR" => &[2022i64, 2023, 2022],
        }
        .unwrap();
        let file = std::fs::File::create(dir.join("PLOT.parquet")).unwrap();
        ParquetWriter::new(file).finish(&mut plot).unwrap();

        ColumnarBackend::open(&dir).unwrap()
    }

    #[test]
    fn test_table_discovery() {
        let backend = fixture_store();
        assert_eq!(backend.table_names().unwrap(), vec!["PLOT"]);
        assert!(backend.table_exists("PLOT").unwrap());
        assert!(!backend.table_exists("TREE").unwrap());
    }

    #[test]
    fn test_read_table_with_filter() {
        let backend = fixture_store();
        let filter = DomainExpr::parse("STATECD == 13").unwrap();
        let df = backend
            .read_table("PLOT", Some(&["CN".to_string()]), Some(&filter), None)
            .unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 1);
    }

    #[test]
    fn test_execute_sql() {
        let backend = fixture_store();
        let df = backend
            .execute(
                "SELECT CN FROM PLOT WHERE STATECD = ? ORDER BY CN",
                &[SqlValue::Integer(48)],
            )
            .unwrap();
        assert_eq!(df.height(), 1);
        let cn = df.column("CN").unwrap().as_materialized_series().i64().unwrap();
        assert_eq!(cn.get(0), Some(103));
    }

    #[test]
    fn test_schema() {
        let backend = fixture_store();
        let schema = backend.schema("PLOT").unwrap();
        assert_eq!(schema.get("CN"), Some(&DataType::Int64));
        assert_eq!(schema.get("STATECD"), Some(&DataType::Int64));
    }

    #[test]
    fn test_render_placeholders() {
        let sql = render_placeholders(
            "SELECT * FROM T WHERE A = ? AND B = ? AND C = '?'",
            &[SqlValue::Integer(1), SqlValue::Text("O'Brien".to_string())],
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM T WHERE A = 1 AND B = 'O''Brien' AND C = '?'");

        assert!(render_placeholders("SELECT ?", &[]).is_err());
        assert!(
            render_placeholders("SELECT 1", &[SqlValue::Integer(1)]).is_err()
        );
    }

    #[test]
    fn test_missing_table() {
        let backend = fixture_store();
        let err = backend.read_table("COND", None, None, None).unwrap_err();
        assert!(matches!(err, TaigaError::MissingTable(_)));
    }
}
