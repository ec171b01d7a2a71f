//! Site-index estimator.
//!
//! A condition-level weighted mean: `SICOND` weighted by the condition
//! proportion inside the domain, reported per `SIBASE` (the base age is
//! always a grouping key so means never mix bases). Uses the
//! ratio-of-means variance.

use polars::prelude::*;
use taiga_traits::codes::MetricFamily;
use taiga_traits::config::EstimatorConfig;
use taiga_traits::{Result, ResultExt, WarningSink};

use taiga_db::Fia;
use taiga_estimation::{
    combined_indicator, domain_indicator, expand_ratio, land_type_indicator, LazyPlan, DOMAIN_IND,
    PLOT_VALUE,
};

use crate::pipeline::{Estimator, PipelineStage, PipelineState};
use crate::support::{load_frames, ratio_output};

/// Site-index estimator.
#[derive(Debug, Clone)]
pub struct SiteIndexEstimator {
    config: EstimatorConfig,
}

impl SiteIndexEstimator {
    /// New estimator over the given config.
    #[must_use]
    pub const fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }
}

impl Estimator for SiteIndexEstimator {
    fn name(&self) -> &'static str {
        "site_index"
    }

    fn metric(&self) -> MetricFamily {
        MetricFamily::SiteIndex
    }

    fn estimate(&self, fia: &Fia) -> Result<DataFrame> {
        let mut state = PipelineState::new("site_index");
        let warnings = WarningSink::new();
        self.config.validate(MetricFamily::SiteIndex, &warnings)?;

        // SIBASE is always a grouping key.
        let frames = load_frames(
            fia,
            &self.config,
            MetricFamily::SiteIndex,
            &[],
            &["SICOND".to_string(), "SIBASE".to_string()],
            &["SIBASE".to_string()],
            false,
            &warnings,
        )
        .stage(&state.context())?;
        state.advance(PipelineStage::Loaded)?;

        let group_cols = frames.denom_group_cols.clone();
        let indicator = combined_indicator(vec![
            land_type_indicator(self.config.land_type),
            domain_indicator(frames.area_domain.as_ref()),
            // Conditions without a site index carry no weight.
            domain_indicator(Some(
                &taiga_traits::expr::DomainExpr::parse("SICOND IS NOT NULL")?,
            )),
        ]);
        let annotated = frames.conditions.clone().with_column(indicator);
        state.advance(PipelineStage::Filtered)?;

        let weight = col("CONDPROP_UNADJ").fill_null(lit(0.0)) * col(DOMAIN_IND);
        let mut keys = vec![col("STRATUM_CN"), col("PLT_CN")];
        keys.extend(group_cols.iter().map(|c| col(c.as_str())));
        let rollup = annotated
            .with_column((weight.clone() * col("SICOND").fill_null(lit(0.0))).alias("SI_NUM"))
            .with_column(weight.alias("SI_DEN"))
            .group_by(keys)
            .agg([col("SI_NUM").sum(), col("SI_DEN").sum()]);
        state.advance(PipelineStage::Valued)?;

        let rolled = LazyPlan::new(rollup, self.config.lazy.collection_strategy)
            .collect(&self.config.lazy)
            .stage(&state.context())?;
        state.advance(PipelineStage::Aggregated)?;

        let num_values = rolled
            .clone()
            .lazy()
            .with_column(col("SI_NUM").alias(PLOT_VALUE))
            .collect()
            .stage(&state.context())?;
        let den_values = rolled
            .lazy()
            .with_column(col("SI_DEN").alias(PLOT_VALUE))
            .collect()
            .stage(&state.context())?;

        let mut ratios = expand_ratio(
            &num_values,
            &den_values,
            &frames.strata,
            &group_cols,
            &group_cols,
        )
        .stage(&state.context())?;
        // Conditions with no site index (null SIBASE) carry zero weight
        // everywhere; their degenerate group row is pure noise.
        ratios.retain(|r| {
            !(r.ratio.degenerate
                && r.key
                    .iter()
                    .any(|k| matches!(k, taiga_estimation::Key::Null)))
        });
        state.advance(PipelineStage::Expanded)?;
        state.advance(PipelineStage::Varianced)?;

        let output = ratio_output(
            &group_cols,
            &ratios,
            "SI_MEAN",
            "SI_TOTAL",
            &self.config,
            frames.n_plots,
        )?;
        state.advance(PipelineStage::Formatted)?;
        Ok(output)
    }
}

/// Estimate mean site index for the active evaluation.
pub fn site_index(fia: &Fia, config: &EstimatorConfig) -> Result<DataFrame> {
    SiteIndexEstimator::new(config.clone()).estimate(fia)
}
