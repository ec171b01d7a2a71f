//! Net annual-growth estimator.
//!
//! Growth uses the BEGINEND cross-join: every GRM tree produces a
//! beginning row and an ending row (`ONEORTWO` 1 and 2). The ending side
//! adds the midpoint value for survivors (and ingrowth), the beginning
//! side subtracts the `TREE_GRM_BEGIN` value for survivors, both divided
//! by the plot's remeasurement period, so a survivor contributes
//! `(end − begin) / REMPER` and ingrowth `end / REMPER`. Cut, diversion,
//! and mortality trees contribute zero to net growth.
//!
//! `N_PLOTS` counts every phase-2 plot in the evaluation, including plots
//! whose only GRM trees are zero-contribution diversions; published counts
//! sometimes exclude those, which shows up as a difference of a few plots.

use polars::prelude::*;
use taiga_traits::codes::MetricFamily;
use taiga_traits::config::{EstimatorConfigV2, GrowthOptions, ModuleConfig};
use taiga_traits::{Result, ResultExt, WarningSink};

use taiga_db::Fia;
use taiga_estimation::{expand_ratio, LazyPlan};
use taiga_estimators::support::ratio_output;
use taiga_estimators::{Estimator, PipelineStage, PipelineState};

use crate::common::{component_indicator, load_grm, with_grm_adjustment, GrmKind, GrmMeasure};
use crate::rate::rollup_grm_to_plot;

/// The per-row growth value over the BEGINEND cross-join.
fn growth_value_expr(
    columns: &crate::common::GrmColumns,
    measure: GrmMeasure,
    options: &GrowthOptions,
) -> Expr {
    let end_members: &[&str] = if options.include_ingrowth {
        &["SURVIVOR", "INGROWTH"]
    } else {
        &["SURVIVOR"]
    };
    let begin_members: &[&str] = if options.include_mortality {
        &["SURVIVOR", "MORTALITY1", "MORTALITY2"]
    } else {
        &["SURVIVOR"]
    };

    let remper_ok = col("REMPER").gt(lit(0.0)).fill_null(lit(false));
    let end_term = when(col("ONEORTWO").eq(lit(2)).and(remper_ok.clone()))
        .then(
            component_indicator(&columns.component, end_members)
                * col("MEASURE_MIDPT").fill_null(lit(0.0))
                * lit(measure.scale())
                / col("REMPER"),
        )
        .otherwise(lit(0.0));
    let begin_term = when(col("ONEORTWO").eq(lit(1)).and(remper_ok))
        .then(
            component_indicator(&columns.component, begin_members)
                * col("MEASURE_BEGIN").fill_null(lit(0.0))
                * lit(-measure.scale())
                / col("REMPER"),
        )
        .otherwise(lit(0.0));

    (col(columns.tpa.as_str()).fill_null(lit(0.0))
        * col(taiga_estimation::adjustment::ADJ_FACTOR)
        * (end_term + begin_term))
        .fill_null(lit(0.0))
        .alias(taiga_estimation::aggregation::TREE_VALUE)
}

/// Net annual-growth estimator.
#[derive(Debug, Clone)]
pub struct GrowthEstimator {
    config: EstimatorConfigV2,
}

impl GrowthEstimator {
    /// New estimator over the given config.
    #[must_use]
    pub const fn new(config: EstimatorConfigV2) -> Self {
        Self { config }
    }

    fn options(&self) -> GrowthOptions {
        match &self.config.module {
            ModuleConfig::Growth(options) => options.clone(),
            _ => GrowthOptions::default(),
        }
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
            None => Ok(GrmMeasure::Volume),
        }
    }
}

impl Estimator for GrowthEstimator {
    fn name(&self) -> &'static str {
        "growth"
    }

    fn metric(&self) -> MetricFamily {
        MetricFamily::Growth
    }

    fn estimate(&self, fia: &Fia) -> Result<DataFrame> {
        let mut state = PipelineState::new("growth");
        let warnings = WarningSink::new();
        let config = &self.config.base;
        config.validate(MetricFamily::Growth, &warnings)?;
        let options = self.options();
        let measure = self.measure()?;

        let ctx = load_grm(fia, config, GrmKind::Growth, measure, &[], &warnings)
            .stage(&state.context())?;
        state.advance(PipelineStage::Loaded)?;

        // The BEGINEND cross-join: one beginning and one ending row per
        // tree observation.
        let beginend = df! { "ONEORTWO" => &[1i64, 2] }?.lazy();
        let mut frame = with_grm_adjustment(ctx.frame.clone(), &ctx.columns)
            .cross_join(beginend, None);
        if ctx.group_cols.iter().any(|c| c == "COMPONENT") {
            frame = frame.with_column(col(ctx.columns.component.as_str()).alias("COMPONENT"));
        }
        state.advance(PipelineStage::Filtered)?;

        frame = frame.with_column(growth_value_expr(&ctx.columns, measure, &options));
        if let Some(domain) = &config.tree_domain {
            let parsed = taiga_traits::expr::DomainExpr::parse(domain)?;
            frame = frame.with_column(
                (col(taiga_estimation::aggregation::TREE_VALUE)
                    * taiga_estimation::domain_indicator(Some(&parsed)))
                .alias(taiga_estimation::aggregation::TREE_VALUE),
            );
        }
        state.advance(PipelineStage::Valued)?;

        let plot_values = LazyPlan::new(
            rollup_grm_to_plot(frame, &ctx.group_cols),
            config.lazy.collection_strategy,
        )
        .collect(&config.lazy)
        .stage(&state.context())?;
        state.advance(PipelineStage::Aggregated)?;

        let ratios = expand_ratio(
            &plot_values,
            &ctx.den_values,
            &ctx.strata,
            &ctx.group_cols,
            &[],
        )
        .stage(&state.context())?;
        state.advance(PipelineStage::Expanded)?;
        state.advance(PipelineStage::Varianced)?;

        let per_acre = format!("GROW_{}_ACRE", measure.stem());
        let total = format!("GROW_{}_TOTAL", measure.stem());
        let output = ratio_output(
            &ctx.group_cols,
            &ratios,
            &per_acre,
            &total,
            config,
            ctx.n_plots,
        )?;
        state.advance(PipelineStage::Formatted)?;
        Ok(output)
    }
}

/// Estimate net annual growth for the active evaluation.
pub fn growth(fia: &Fia, config: &EstimatorConfigV2) -> Result<DataFrame> {
    GrowthEstimator::new(config.clone()).estimate(fia)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::grm_columns;
    use taiga_traits::config::EstimatorConfig;

    fn growth_frame() -> DataFrame {
        // Survivor: end 120, begin 100 over 5 years → +4/year.
        // Ingrowth: end 50 over 5 years → +10/year.
        // Cut tree: contributes nothing to net growth.
        df! {
            "SUBP_COMPONENT_AL_FOREST" => &["SURVIVOR", "INGROWTH", "CUT1"],
            "SUBP_TPAGROW_UNADJ_AL_FOREST" => &[1.0, 1.0, 1.0],
            "SUBP_SUBPTYP_GRM_AL_FOREST" => &[1i64, 1, 1],
            "MEASURE_MIDPT" => &[120.0, 50.0, 300.0],
            "MEASURE_BEGIN" => &[Some(100.0), None, Some(250.0)],
            "REMPER" => &[5.0, 5.0, 5.0],
            "ADJ_FACTOR_SUBP" => &[1.0; 3],
            "ADJ_FACTOR_MICR" => &[1.0; 3],
            "ADJ_FACTOR_MACR" => &[1.0; 3],
            "STRATUM_CN" => &[1i64, 1, 1],
            "PLT_CN" => &[11i64, 11, 12],
        }
        .unwrap()
    }

    fn total_growth(options: &GrowthOptions) -> f64 {
        let config = EstimatorConfig::default();
        let columns = grm_columns(GrmKind::Growth, &config);
        let beginend = df! { "ONEORTWO" => &[1i64, 2] }.unwrap().lazy();
        let frame = with_grm_adjustment(growth_frame().lazy(), &columns)
            .cross_join(beginend, None)
            .with_column(growth_value_expr(&columns, GrmMeasure::Volume, options));
        let rolled = rollup_grm_to_plot(frame, &[]).collect().unwrap();
        rolled
            .column(taiga_estimation::PLOT_VALUE)
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .sum()
    }

    #[test]
    fn test_beginend_differencing() {
        let options = GrowthOptions::default();
        // Survivor (120-100)/5 = 4; ingrowth 50/5 = 10; cut 0.
        let total = total_growth(&options);
        assert!((total - 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_ingrowth_can_be_excluded() {
        let options = GrowthOptions {
            include_ingrowth: false,
            ..Default::default()
        };
        let total = total_growth(&options);
        assert!((total - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimator_identity() {
        let estimator = GrowthEstimator::new(EstimatorConfigV2::default());
        assert_eq!(estimator.name(), "growth");
        assert_eq!(estimator.measure().unwrap(), GrmMeasure::Volume);
    }
}
