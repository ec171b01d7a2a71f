//! Annual-removals estimator.

use polars::prelude::DataFrame;
use taiga_traits::codes::MetricFamily;
use taiga_traits::config::{EstimatorConfigV2, VarianceMethod};
use taiga_traits::{Result, WarningSink};

use taiga_db::Fia;
use taiga_estimators::Estimator;

use crate::common::{GrmKind, GrmMeasure};
use crate::rate::run_annual_rate;

/// Components counted as removals: harvest cuts and land-use diversions.
pub const REMOVAL_COMPONENTS: [&str; 4] = ["CUT1", "CUT2", "DIVERSION1", "DIVERSION2"];

/// Annual-removals estimator over `TREE_GRM_COMPONENT`.
///
/// Identical machinery to mortality with the `CUT*`/`DIVERSION*` component
/// set and the `SUBP_TPAREMV_UNADJ_*` weight column.
#[derive(Debug, Clone)]
pub struct RemovalsEstimator {
    config: EstimatorConfigV2,
}

impl RemovalsEstimator {
    /// New estimator over the given config.
    #[must_use]
    pub const fn new(config: EstimatorConfigV2) -> Self {
        Self { config }
    }

    fn measure(&self) -> Result<GrmMeasure> {
        match self
            .config
            .base
            .extra_params
            .get("measure")
            .and_then(serde_json::Value::as_str)
        {
            Some(text) => text.parse(),
            None => Ok(GrmMeasure::Tpa),
        }
    }
}

impl Estimator for RemovalsEstimator {
    fn name(&self) -> &'static str {
        "removals"
    }

    fn metric(&self) -> MetricFamily {
        MetricFamily::Removals
    }

    fn estimate(&self, fia: &Fia) -> Result<DataFrame> {
        let warnings = WarningSink::new();
        run_annual_rate(
            fia,
            &self.config.base,
            GrmKind::Removals,
            self.measure()?,
            &REMOVAL_COMPONENTS,
            &[],
            VarianceMethod::Ratio,
            &warnings,
        )
    }
}

/// Estimate annual removals for the active evaluation.
pub fn removals(fia: &Fia, config: &EstimatorConfigV2) -> Result<DataFrame> {
    RemovalsEstimator::new(config.clone()).estimate(fia)
}
