//! Error types for the taiga estimation engine.
//!
//! This module defines the single error taxonomy used throughout the taiga
//! ecosystem. Every failure a library call can produce carries a short kind
//! tag and a human-readable message; backend errors are surfaced verbatim
//! with added stage context.

use thiserror::Error;

/// The main error type for taiga operations.
///
/// The variants mirror the error taxonomy of the estimation core:
/// configuration and validation failures, evaluation resolution failures,
/// backend/schema failures, and non-exceptional empty outcomes.
#[derive(Debug, Error)]
pub enum TaigaError {
    /// Configuration validation failed (bad enum value, conflicting
    /// combination of options).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A domain expression was malformed or contained forbidden SQL.
    #[error("Invalid domain expression: {0}")]
    InvalidDomain(String),

    /// A SQL identifier did not match the allowed identifier grammar.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A file path contained characters that are unsafe to hand to a SQL
    /// engine.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// No evaluation of the required type exists for the requested state.
    #[error("No EVALID found: {0}")]
    NoEvalid(String),

    /// The backend schema is missing a table required by the query plan.
    #[error("Missing required table: {0}")]
    MissingTable(String),

    /// The backend schema is missing a column required by the query plan.
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    /// Backend query execution failed.
    #[error("Query error: {0}")]
    QueryError(String),

    /// The spatial extension is unavailable but was required.
    #[error("Spatial extension error: {0}")]
    SpatialExtension(String),

    /// A spatial clip matched no plots.
    #[error("Spatial filter matched no plots: {0}")]
    NoSpatialFilter(String),

    /// The evaluation resolved to an empty plot assignment. Note that a
    /// zero estimate over a non-empty assignment is a valid outcome, not
    /// this error.
    #[error("No data: {0}")]
    NoData(String),

    /// The operation was cancelled or timed out.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Error from Polars operations.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),
}

impl TaigaError {
    /// Attach pipeline-stage or table context to the error message.
    ///
    /// Backend errors keep their kind; only the message is prefixed so the
    /// taxonomy stays intact across stage boundaries.
    #[must_use]
    pub fn with_context(self, context: &str) -> Self {
        match self {
            Self::InvalidConfig(m) => Self::InvalidConfig(format!("{context}: {m}")),
            Self::InvalidDomain(m) => Self::InvalidDomain(format!("{context}: {m}")),
            Self::InvalidIdentifier(m) => Self::InvalidIdentifier(format!("{context}: {m}")),
            Self::InvalidPath(m) => Self::InvalidPath(format!("{context}: {m}")),
            Self::NoEvalid(m) => Self::NoEvalid(format!("{context}: {m}")),
            Self::MissingTable(m) => Self::MissingTable(format!("{context}: {m}")),
            Self::MissingColumn(m) => Self::MissingColumn(format!("{context}: {m}")),
            Self::QueryError(m) => Self::QueryError(format!("{context}: {m}")),
            Self::SpatialExtension(m) => Self::SpatialExtension(format!("{context}: {m}")),
            Self::NoSpatialFilter(m) => Self::NoSpatialFilter(format!("{context}: {m}")),
            Self::NoData(m) => Self::NoData(format!("{context}: {m}")),
            Self::Cancelled(m) => Self::Cancelled(format!("{context}: {m}")),
            Self::Polars(e) => Self::QueryError(format!("{context}: {e}")),
            Self::Other(m) => Self::Other(format!("{context}: {m}")),
        }
    }
}

impl From<String> for TaigaError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for TaigaError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

/// A specialized Result type for taiga operations.
///
/// This is a convenience type that uses [`TaigaError`] as the error type.
pub type Result<T> = std::result::Result<T, TaigaError>;

/// Extension trait that attaches stage context to a `Result`.
pub trait ResultExt<T> {
    /// Prefix any error with the given pipeline stage or table name.
    fn stage(self, context: &str) -> Result<T>;
}

impl<T, E: Into<TaigaError>> ResultExt<T> for std::result::Result<T, E> {
    fn stage(self, context: &str) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
