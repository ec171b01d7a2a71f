#![forbid(unsafe_code)]

//! Growth-Removal-Mortality estimators for the taiga engine.
//!
//! The GRM triad consumes the per-tree transition tables
//! (`TREE_GRM_COMPONENT`, `TREE_GRM_BEGIN`, `TREE_GRM_MIDPT`): mortality
//! and removals weight annualized TPA columns by component membership,
//! growth differences beginning and ending values over the BEGINEND
//! cross-join, and the carbon flux composes all three.

/// The version of the taiga-grm crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod carbon_flux;
pub mod common;
pub mod growth;
pub mod mortality;
pub mod rate;
pub mod removals;

pub use carbon_flux::{carbon_flux, CarbonFluxEstimator};
pub use common::{grm_columns, GrmColumns, GrmContext, GrmKind, GrmMeasure};
pub use growth::{growth, GrowthEstimator};
pub use mortality::{mortality, MortalityEstimator, MORTALITY_COMPONENTS};
pub use removals::{removals, RemovalsEstimator, REMOVAL_COMPONENTS};
