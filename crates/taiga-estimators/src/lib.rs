#![forbid(unsafe_code)]

//! Standard estimators for the taiga engine.
//!
//! Each estimator runs the same linear pipeline (load, filter with
//! indicators and never row drops, value, aggregate, expand, variance,
//! format) over the frames served by `taiga-db`, with the module-specific
//! behavior kept in small pure functions. See [`pipeline::Estimator`] for
//! the shared interface and the free functions (`area`, `tpa`, `volume`,
//! ...) for the call-style API.

/// The version of the taiga-estimators crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod area;
pub mod biomass;
pub mod pipeline;
pub mod site_index;
pub mod support;
pub mod tpa;
pub mod tree_metric;
pub mod volume;

pub use area::{area, AreaEstimator};
pub use biomass::{biomass, carbon, BiomassEstimator, CarbonEstimator};
pub use pipeline::{Estimator, PipelineStage, PipelineState};
pub use site_index::{site_index, SiteIndexEstimator};
pub use tpa::{tpa, tree_count, TpaEstimator, TreeCountEstimator};
pub use volume::{volume, VolumeEstimator};
