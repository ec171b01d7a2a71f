//! Land-area estimator.
//!
//! Condition-level estimation: the numerator is the adjusted condition
//! proportion inside the requested land base and area domain, the
//! denominator the proportion over all sampled land, so `AREA` is the
//! fraction of the land base in the domain and `AREA_TOTAL` the expanded
//! acres. Adjustment follows the condition's `PROP_BASIS`, matching the
//! published CASE expression.

use polars::prelude::*;
use taiga_traits::codes::MetricFamily;
use taiga_traits::config::{AreaOptions, EstimatorConfigV2, LandType, ModuleConfig};
use taiga_traits::{Result, ResultExt, TaigaError, WarningSink};

use taiga_db::Fia;
use taiga_estimation::{
    complete_with_zero_plots, expand_ratio, rollup_condition_to_plot, LazyPlan,
};

use crate::pipeline::{Estimator, PipelineStage, PipelineState};
use crate::support::{load_frames, prepare_condition_frame, ratio_output};

/// Land-area estimator.
#[derive(Debug, Clone)]
pub struct AreaEstimator {
    config: EstimatorConfigV2,
}

impl AreaEstimator {
    /// New estimator over the given config.
    #[must_use]
    pub const fn new(config: EstimatorConfigV2) -> Self {
        Self { config }
    }

    fn options(&self) -> AreaOptions {
        match &self.config.module {
            ModuleConfig::Area(options) => options.clone(),
            _ => AreaOptions::default(),
        }
    }
}

impl Estimator for AreaEstimator {
    fn name(&self) -> &'static str {
        "area"
    }

    fn metric(&self) -> MetricFamily {
        MetricFamily::Area
    }

    fn estimate(&self, fia: &Fia) -> Result<DataFrame> {
        let mut state = PipelineState::new("area");
        let warnings = WarningSink::new();
        let base = &self.config.base;
        base.validate(MetricFamily::Area, &warnings)?;
        let options = self.options();

        let mut config = base.clone();
        if options.include_nonforest {
            config.land_type = LandType::All;
        }
        if !options.ownership_groups.is_empty() {
            let list = options
                .ownership_groups
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let ownership = format!("OWNGRPCD IN ({list})");
            config.area_domain = Some(match config.area_domain {
                Some(existing) => format!("({existing}) AND {ownership}"),
                None => ownership,
            });
        }

        let frames = load_frames(
            fia,
            &config,
            MetricFamily::Area,
            &[],
            &[],
            &[],
            false,
            &warnings,
        )
        .stage(&state.context())?;
        state.advance(PipelineStage::Loaded)?;

        // Numerator: the land base restricted by the area domain.
        let numerator = prepare_condition_frame(&frames, &config, config.land_type, true);
        state.advance(PipelineStage::Filtered)?;
        state.advance(PipelineStage::Valued)?;

        // Area grouping lives entirely on the condition frame.
        let group_cols = frames.denom_group_cols.clone();
        let num_values = LazyPlan::new(
            rollup_condition_to_plot(numerator, &group_cols),
            config.lazy.collection_strategy,
        )
        .collect(&config.lazy)
        .stage(&state.context())?;
        state.advance(PipelineStage::Aggregated)?;

        if config.by_plot {
            state.advance(PipelineStage::Formatted)?;
            if group_cols.is_empty() {
                return complete_with_zero_plots(&num_values, &frames.plot_stratum)
                    .stage(&state.context());
            }
            return Ok(num_values);
        }

        // Denominator: every sampled condition, no domain restriction, so
        // the ratio reads as a proportion of all land.
        let denominator = prepare_condition_frame(&frames, &config, LandType::All, false);
        let den_values = LazyPlan::new(
            rollup_condition_to_plot(denominator, &[]),
            config.lazy.collection_strategy,
        )
        .collect(&config.lazy)
        .stage(&state.context())?;

        let ratios = expand_ratio(&num_values, &den_values, &frames.strata, &group_cols, &[])
            .stage(&state.context())?;
        state.advance(PipelineStage::Expanded)?;
        state.advance(PipelineStage::Varianced)?;

        let output = ratio_output(
            &group_cols,
            &ratios,
            "AREA",
            "AREA_TOTAL",
            &config,
            frames.n_plots,
        )?;
        state.advance(PipelineStage::Formatted)?;
        if output.is_empty() {
            return Err(TaigaError::NoData(
                "area estimation produced no groups".to_string(),
            ));
        }
        Ok(output)
    }
}

/// Estimate land area for the active evaluation.
pub fn area(fia: &Fia, config: &EstimatorConfigV2) -> Result<DataFrame> {
    AreaEstimator::new(config.clone()).estimate(fia)
}
