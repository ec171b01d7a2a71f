#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! # taiga
//!
//! Design-based estimation engine for USDA Forest Inventory and Analysis
//! (FIA) data.
//!
//! taiga is an umbrella crate that re-exports all taiga sub-crates for
//! convenience. Given a population evaluation (an `EVALID` binding plots
//! to strata and strata to expansion factors), it produces population
//! estimates (totals, per-acre values, ratios, and their standard
//! errors) for forest area, trees per acre, tree count, volume, biomass,
//! carbon, and the growth / removals / mortality triad.
//!
//! ## Quick Start
//!
//! ```ignore
//! use taiga::{Fia, EstimatorConfig, Result};
//!
//! # fn main() -> Result<()> {
//! let mut db = Fia::open("data/georgia.db")?;
//! db.clip_by_evalid(&[132301])?;
//!
//! let config = EstimatorConfig {
//!     land_type: taiga::LandType::Forest,
//!     totals: true,
//!     ..Default::default()
//! };
//! let frame = taiga::area(&db, &config.into())?;
//! println!("{frame}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Organization
//!
//! - [`traits`] - Error taxonomy, FIA codes, domain expressions, configs
//! - [`db`] - SQLite and columnar backends, clipping, EVALID resolution
//! - [`query`] - Query plans, builders, and the FIA join optimizer
//! - [`estimation`] - Indicators, adjustment, aggregation, variance
//! - [`estimators`] - Area, TPA, tree count, volume, biomass, carbon,
//!   site index
//! - [`grm`] - Growth, removals, mortality, and the carbon flux
//!
//! ## Architecture
//!
//! Every estimator runs the same linear pipeline: load → filter (domain
//! indicators, never row drops) → value → two-stage aggregation →
//! stratified expansion → variance → format. Query builders emit plans,
//! the join optimizer rewrites them, the backend executes them into
//! columnar frames, and the aggregation and variance kernels run on those
//! frames.

/// The version of the taiga crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use taiga_db as db;
pub use taiga_estimation as estimation;
pub use taiga_estimators as estimators;
pub use taiga_grm as grm;
pub use taiga_query as query;
pub use taiga_traits as traits;

// The stable call-style API.
pub use taiga_db::{EngineKind, EvalidResolver, Fia, RecommendedEvalid, SpatialPredicate};
pub use taiga_estimators::{area, biomass, carbon, site_index, tpa, tree_count, volume, Estimator};
pub use taiga_grm::{carbon_flux, growth, mortality, removals};
pub use taiga_traits::{
    DomainExpr, EstimatorConfig, EstimatorConfigV2, LandType, MetricFamily, ModuleConfig, Result,
    TaigaError, TreeType, Warning, WarningKind,
};

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
