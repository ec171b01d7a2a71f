#![forbid(unsafe_code)]

//! Core type definitions for the taiga forest-inventory estimation engine.
//!
//! This crate provides the foundational pieces shared by every other taiga
//! crate: the error taxonomy, FIA code constants, the frame wrapper and
//! warning channel, input validation, the domain-expression engine, and the
//! estimator configuration model.

/// The version of the taiga-traits crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Module declarations
pub mod codes;
pub mod config;
pub mod error;
pub mod expr;
pub mod types;
pub mod validation;

// Re-exports
pub use codes::{EvalType, MetricFamily, SubptypGrm, TreeStatus};
pub use config::{EstimatorConfig, EstimatorConfigV2, LandType, ModuleConfig, TreeType};
pub use error::{Result, ResultExt, TaigaError};
pub use expr::DomainExpr;
pub use types::{InventoryFrame, SqlValue, Warning, WarningKind, WarningSink};
