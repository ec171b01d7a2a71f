//! The backend contract shared by the SQLite and columnar engines.

use std::collections::BTreeMap;
use std::time::Duration;

use polars::prelude::*;
use taiga_traits::{DomainExpr, Result, SqlValue};

/// Which storage engine a backend wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Row-store SQLite database file.
    Sqlite,
    /// Columnar parquet store (DuckDB-class layout, one file per table).
    Columnar,
}

/// A storage backend that serves FIA tables as columnar frames.
///
/// Both implementations present the same contract; schema differences are
/// hidden behind the [`SchemaMapper`](crate::schema::SchemaMapper). Query
/// parameters always travel as bind values, never interpolated text.
pub trait Backend: Send + std::fmt::Debug {
    /// The engine behind this backend.
    fn engine(&self) -> EngineKind;

    /// Execute a parameterized query and return the result frame.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<DataFrame>;

    /// Read a table with optional projection, predicate, and row limit.
    ///
    /// The predicate arrives as a parsed domain expression so each engine
    /// can compile it natively (bound SQL for SQLite, a polars mask for the
    /// columnar store).
    fn read_table(
        &self,
        name: &str,
        columns: Option<&[String]>,
        filter: Option<&DomainExpr>,
        limit: Option<usize>,
    ) -> Result<DataFrame>;

    /// Lazy variant of [`Backend::read_table`]; the default implementation
    /// materializes eagerly, columnar engines override with a real scan.
    fn scan_table(
        &self,
        name: &str,
        columns: Option<&[String]>,
        filter: Option<&DomainExpr>,
    ) -> Result<LazyFrame> {
        Ok(self.read_table(name, columns, filter, None)?.lazy())
    }

    /// Whether the table exists in this store.
    fn table_exists(&self, name: &str) -> Result<bool>;

    /// Column name to data type mapping for a table.
    fn schema(&self, name: &str) -> Result<BTreeMap<String, DataType>>;

    /// Make the spatial layer available. Idempotent; required before
    /// polygon clipping.
    fn load_spatial_extension(&self) -> Result<()>;

    /// Set the per-query timeout. `None` disables the deadline.
    fn set_timeout(&self, timeout: Option<Duration>);
}
