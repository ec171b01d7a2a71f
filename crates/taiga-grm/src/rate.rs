//! The shared annual-rate pipeline for mortality and removals.
//!
//! Both estimators retain their component set as an indicator, weigh trees
//! by the annualized `SUBP_TPA*_UNADJ_*` column, select the adjustment by
//! `SUBPTYP_GRM`, roll up to plots, and expand. Per-acre values ratio
//! against the land base under the same evaluation.

use polars::prelude::*;
use taiga_traits::config::{EstimatorConfig, VarianceMethod};
use taiga_traits::{Result, ResultExt, WarningSink};

use taiga_db::Fia;
use taiga_estimation::{expand_ratio, LazyPlan, PLOT_VALUE};
use taiga_estimators::support::ratio_output;
use taiga_estimators::{PipelineStage, PipelineState};

use crate::common::{
    annual_rate_value, load_grm, with_grm_adjustment, GrmContext, GrmKind, GrmMeasure,
};

/// Roll a GRM tree frame up to plots (GRM rows carry no condition key, so
/// the condition stage is vacuous).
#[must_use]
pub fn rollup_grm_to_plot(frame: LazyFrame, group_cols: &[String]) -> LazyFrame {
    let mut keys = vec![col("STRATUM_CN"), col("PLT_CN")];
    keys.extend(group_cols.iter().map(|c| col(c.as_str())));
    frame.group_by(keys).agg([col(
        taiga_estimation::aggregation::TREE_VALUE,
    )
    .sum()
    .alias(PLOT_VALUE)])
}

/// Run the annual-rate pipeline for one `(kind, measure, component set)`.
pub fn run_annual_rate(
    fia: &Fia,
    config: &EstimatorConfig,
    kind: GrmKind,
    measure: GrmMeasure,
    members: &[&str],
    extra_group_cols: &[String],
    variance_method: VarianceMethod,
    warnings: &WarningSink,
) -> Result<DataFrame> {
    let name = match kind {
        GrmKind::Growth => "growth",
        GrmKind::Mortality => "mortality",
        GrmKind::Removals => "removals",
    };
    let mut state = PipelineState::new(name);
    config.validate(kind.metric(), warnings)?;

    let ctx: GrmContext =
        load_grm(fia, config, kind, measure, extra_group_cols, warnings).stage(&state.context())?;
    state.advance(PipelineStage::Loaded)?;

    let mut frame = with_grm_adjustment(ctx.frame.clone(), &ctx.columns);
    if ctx.group_cols.iter().any(|c| c == "COMPONENT") {
        frame = frame.with_column(col(ctx.columns.component.as_str()).alias("COMPONENT"));
    }
    state.advance(PipelineStage::Filtered)?;

    frame = frame.with_column(annual_rate_value(&ctx.columns, measure, members));
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

    let mut ratios = expand_ratio(
        &plot_values,
        &ctx.den_values,
        &ctx.strata,
        &ctx.group_cols,
        &[],
    )
    .stage(&state.context())?;
    state.advance(PipelineStage::Expanded)?;

    // The stratified method scales the total variance by the land base
    // instead of using the Taylor ratio form.
    if variance_method == VarianceMethod::Stratified {
        for ratio in &mut ratios {
            let x = ratio.ratio.total_x;
            ratio.ratio.variance = if x > 0.0 {
                ratio.variance_y / (x * x)
            } else {
                0.0
            };
        }
    }
    state.advance(PipelineStage::Varianced)?;

    let per_acre = format!("{}_{}_ACRE", kind.prefix(), measure.stem());
    let total = format!("{}_{}_TOTAL", kind.prefix(), measure.stem());
    let output = ratio_output(
        &ctx.group_cols,
        &ratios,
        &per_acre,
        &total,
        config,
        ctx.n_plots,
    )?;
    state.advance(PipelineStage::Formatted)?;
    tracing::info!(
        estimator = name,
        measure = measure.stem(),
        groups = output.height(),
        "annual-rate estimate complete"
    );
    Ok(output)
}

/// Join two measure outputs (the `both` mortality mode) on their group
/// columns.
pub fn join_measure_outputs(
    left: DataFrame,
    right: DataFrame,
    group_cols: &[String],
) -> Result<DataFrame> {
    if group_cols.is_empty() {
        let mut combined = left;
        for column in right.get_columns() {
            let name = column.name().as_str();
            if name != "N_PLOTS" && combined.column(name).is_err() {
                combined.with_column(column.as_materialized_series().clone())?;
            }
        }
        return Ok(combined);
    }
    let keys: Vec<Expr> = group_cols.iter().map(|c| col(c.as_str())).collect();
    let right = right.drop("N_PLOTS").unwrap_or(right);
    Ok(left
        .lazy()
        .join(right.lazy(), keys.clone(), keys, JoinArgs::new(JoinType::Left))
        .collect()?)
}
