//! The shared tree-metric pipeline.
//!
//! TPA, tree count, volume, biomass, and carbon all follow the same seven
//! stages; only the per-tree metric expression and the output naming
//! differ. The engine here runs the pipeline once per call: load the
//! joined frames, attach indicators and values, roll up to plots, expand
//! over the stratification, and format.

use polars::prelude::*;
use taiga_traits::codes::MetricFamily;
use taiga_traits::config::EstimatorConfig;
use taiga_traits::{Result, ResultExt, WarningSink};

use taiga_db::Fia;
use taiga_estimation::{
    complete_with_zero_plots, expand_ratio, expand_totals, rollup_condition_to_plot,
    rollup_tree_to_plot, LazyPlan,
};

use crate::pipeline::{PipelineStage, PipelineState};
use crate::support::{
    load_frames, prepare_condition_frame, prepare_tree_frame, ratio_output, totals_output,
};

/// What a tree-metric estimator computes and how it names its output.
#[derive(Debug, Clone)]
pub struct TreeMetricSpec {
    /// Estimator name for errors and logs.
    pub name: &'static str,
    /// Metric family (drives evaluation-type resolution).
    pub metric: MetricFamily,
    /// TREE columns the metric expression reads.
    pub metric_columns: Vec<String>,
    /// Per-acre output column, `None` for totals-only estimators.
    pub per_acre_name: Option<String>,
    /// Total output column.
    pub total_name: String,
}

/// Run the tree-metric pipeline.
///
/// `metric` is the per-tree metric expression (`VOLCFNET`,
/// `DRYBIO_AG / 2000`, a literal 1 for counts); the engine multiplies it
/// by `TPA_UNADJ`, the selected adjustment factor, and the domain
/// indicator, then aggregates and expands.
pub fn run_tree_metric(
    fia: &Fia,
    config: &EstimatorConfig,
    spec: &TreeMetricSpec,
    metric: Expr,
    warnings: &WarningSink,
) -> Result<DataFrame> {
    let mut state = PipelineState::new(spec.name);
    config.validate(spec.metric, warnings)?;

    let frames = load_frames(
        fia,
        config,
        spec.metric,
        &spec.metric_columns,
        &[],
        &[],
        true,
        warnings,
    )
    .stage(&state.context())?;
    state.advance(PipelineStage::Loaded)?;

    let trees = prepare_tree_frame(&frames, config, metric).stage(&state.context())?;
    state.advance(PipelineStage::Filtered)?;
    state.advance(PipelineStage::Valued)?;

    let plot_values = LazyPlan::new(
        rollup_tree_to_plot(trees, &frames.group_cols),
        config.lazy.collection_strategy,
    )
    .collect(&config.lazy)
    .stage(&state.context())?;
    state.advance(PipelineStage::Aggregated)?;

    // Per-plot output short-circuits the expansion stages.
    if config.by_plot {
        state.advance(PipelineStage::Formatted)?;
        if frames.group_cols.is_empty() {
            return complete_with_zero_plots(&plot_values, &frames.plot_stratum)
                .stage(&state.context());
        }
        return Ok(plot_values);
    }

    let output = if let Some(per_acre_name) = &spec.per_acre_name {
        // Denominator: the land base within the area domain.
        let denominator = prepare_condition_frame(&frames, config, config.land_type, true);
        let denom_values = LazyPlan::new(
            rollup_condition_to_plot(denominator, &frames.denom_group_cols),
            config.lazy.collection_strategy,
        )
        .collect(&config.lazy)
        .stage(&state.context())?;

        let ratios = expand_ratio(
            &plot_values,
            &denom_values,
            &frames.strata,
            &frames.group_cols,
            &frames.denom_group_cols,
        )
        .stage(&state.context())?;
        state.advance(PipelineStage::Expanded)?;
        state.advance(PipelineStage::Varianced)?;

        ratio_output(
            &frames.group_cols,
            &ratios,
            per_acre_name,
            &spec.total_name,
            config,
            frames.n_plots,
        )?
    } else {
        let totals = expand_totals(&plot_values, &frames.strata, &frames.group_cols)
            .stage(&state.context())?;
        state.advance(PipelineStage::Expanded)?;
        state.advance(PipelineStage::Varianced)?;

        totals_output(
            &frames.group_cols,
            &totals,
            &spec.total_name,
            config,
            frames.n_plots,
        )?
    };
    state.advance(PipelineStage::Formatted)?;
    tracing::info!(
        estimator = spec.name,
        groups = output.height(),
        n_plots = frames.n_plots,
        "estimate complete"
    );
    Ok(output)
}
