//! Common types used throughout the taiga engine.
//!
//! This module defines the columnar frame wrapper handed between pipeline
//! stages, the bind-parameter value type for backend queries, and the
//! warning channel estimators report through.

use std::sync::Mutex;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Container for an FIA inventory frame.
///
/// `InventoryFrame` wraps a Polars DataFrame whose columns follow the
/// FIA-standard uppercase naming (`PLT_CN`, `CONDPROP_UNADJ`, ...). It
/// provides zero-copy access to the underlying data.
#[derive(Debug, Clone)]
pub struct InventoryFrame {
    /// The underlying DataFrame.
    data: DataFrame,
}

impl InventoryFrame {
    /// Creates a new `InventoryFrame` from a DataFrame.
    #[must_use]
    pub const fn new(data: DataFrame) -> Self {
        Self { data }
    }

    /// Returns a reference to the underlying DataFrame.
    #[must_use]
    pub const fn data(&self) -> &DataFrame {
        &self.data
    }

    /// Consumes self and returns the underlying DataFrame.
    #[must_use]
    pub fn into_inner(self) -> DataFrame {
        self.data
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.height()
    }

    /// Returns whether the frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the column names.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        self.data
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Checks if a column exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.data
            .get_column_names()
            .iter()
            .any(|s| s.as_str() == name)
    }

    /// Gets a column by name, or `None` if absent.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.data.column(name).ok()
    }
}

impl From<DataFrame> for InventoryFrame {
    fn from(data: DataFrame) -> Self {
        Self::new(data)
    }
}

impl AsRef<DataFrame> for InventoryFrame {
    fn as_ref(&self) -> &DataFrame {
        &self.data
    }
}

/// A bind-parameter value for backend queries.
///
/// Parameters always travel out-of-band from the SQL text; the engine never
/// interpolates user values into query strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// Text value.
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Categories of non-fatal diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// A requested grouping column is not present in the loaded frames.
    UnknownColumn,
    /// The chosen options diverge from the published methodology.
    Methodology,
    /// A combination of options is likely to be slow.
    Performance,
    /// A configuration option was accepted but adjusted or ignored.
    Config,
}

/// A non-fatal diagnostic emitted during estimation.
///
/// Warnings travel on this channel and are mirrored to `tracing::warn!`;
/// they never abort the computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    /// The warning category.
    pub kind: WarningKind,
    /// Human-readable description.
    pub message: String,
}

/// Collector for warnings emitted during a single estimation run.
///
/// Owned by the estimator invocation; interior mutability lets stage
/// functions push without threading `&mut` through the pipeline.
#[derive(Debug, Default)]
pub struct WarningSink {
    warnings: Mutex<Vec<Warning>>,
}

impl WarningSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a warning and mirrors it to the tracing channel.
    pub fn push(&self, kind: WarningKind, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(?kind, "{message}");
        if let Ok(mut guard) = self.warnings.lock() {
            guard.push(Warning { kind, message });
        }
    }

    /// Drains all recorded warnings.
    #[must_use]
    pub fn drain(&self) -> Vec<Warning> {
        self.warnings
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }

    /// Number of warnings currently recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.warnings.lock().map(|g| g.len()).unwrap_or(0)
    }

    /// Whether no warnings have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_frame_accessors() {
        let df = df! {
            "PLT_CN" => &[1i64, 2, 3],
            "CONDPROP_UNADJ" => &[1.0, 0.75, 0.25],
        }
        .unwrap();

        let frame = InventoryFrame::new(df);
        assert_eq!(frame.len(), 3);
        assert!(frame.has_column("PLT_CN"));
        assert!(!frame.has_column("TPA_UNADJ"));
        assert!(frame.column("CONDPROP_UNADJ").is_some());
        assert_eq!(frame.columns().len(), 2);
    }

    #[test]
    fn test_inventory_frame_from_dataframe() {
        let df = df! { "CN" => &[10i64] }.unwrap();
        let frame: InventoryFrame = df.into();
        assert_eq!(frame.into_inner().height(), 1);
    }

    #[test]
    fn test_sql_value_conversions() {
        assert_eq!(SqlValue::from(42i64), SqlValue::Integer(42));
        assert_eq!(SqlValue::from(1.5), SqlValue::Real(1.5));
        assert_eq!(SqlValue::from("GA"), SqlValue::Text("GA".to_string()));
    }

    #[test]
    fn test_warning_sink_collects() {
        let sink = WarningSink::new();
        assert!(sink.is_empty());

        sink.push(WarningKind::UnknownColumn, "no column FOO");
        sink.push(WarningKind::Performance, "by_plot without lazy mode");
        assert_eq!(sink.len(), 2);

        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].kind, WarningKind::UnknownColumn);
        assert!(sink.is_empty());
    }
}
