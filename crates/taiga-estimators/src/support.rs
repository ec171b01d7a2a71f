//! Shared estimation machinery.
//!
//! Loads and joins the estimation frames through the query builders and
//! the join optimizer, attaches derived grouping columns and domain
//! indicators, and assembles the formatted output frames. Every estimator
//! drives its pipeline through these helpers.

use std::collections::BTreeSet;

use polars::prelude::*;
use taiga_traits::codes::MetricFamily;
use taiga_traits::config::{EstimatorConfig, LandType};
use taiga_traits::expr::DomainExpr;
use taiga_traits::{Result, TaigaError, WarningSink};

use taiga_db::resolver::EvalidResolver;
use taiga_db::Fia;
use taiga_estimation::{
    combined_indicator, condition_adjustment_expr, condition_value_expr, derived_group_exprs,
    domain_indicator, expansion::Key, keys_to_columns, land_type_indicator, resolve_group_columns,
    total_phase2_plots, tree_adjustment_expr, tree_class_indicator, tree_type_indicator,
    tree_value_expr, GroupRatio, GroupTotal,
};
use taiga_query::{CompositeQueryBuilder, JoinOptimizer, QueryPlan};

/// Plot columns synthesized as nulls when a store lacks them.
const SYNTH_PLOT_COLUMNS: [(&str, DataType); 5] = [
    ("MACRO_BREAKPOINT_DIA", DataType::Float64),
    ("REMPER", DataType::Float64),
    ("PLOT_STATUS_CD", DataType::Int64),
    ("COUNTYCD", DataType::Int64),
    ("INVYR", DataType::Int64),
];

/// Everything an estimator needs after the load stage.
pub struct FrameSet {
    /// Fully joined tree frame (tree × condition × plot × stratum).
    pub trees: Option<LazyFrame>,
    /// Fully joined condition frame (condition × plot × stratum).
    pub conditions: LazyFrame,
    /// Stratum design frame (CN, EXPNS, P2POINTCNT, adjustment factors).
    pub strata: DataFrame,
    /// Plot-to-stratum assignment with plot attributes.
    pub plot_stratum: DataFrame,
    /// Phase-2 plot count for the evaluation, independent of any domain.
    pub n_plots: i64,
    /// Resolved grouping columns for the numerator.
    pub group_cols: Vec<String>,
    /// Grouping columns usable on the condition frame (the denominator).
    pub denom_group_cols: Vec<String>,
    /// Parsed area domain, applied as an indicator (never a row drop).
    pub area_domain: Option<DomainExpr>,
}

impl std::fmt::Debug for FrameSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSet")
            .field("n_plots", &self.n_plots)
            .field("group_cols", &self.group_cols)
            .finish_non_exhaustive()
    }
}

/// The evaluations to estimate over: an explicit clip wins, otherwise the
/// resolver recommends per clipped state (or for the whole catalog).
pub fn resolve_evalids(fia: &Fia, metric: MetricFamily) -> Result<Vec<i64>> {
    if let Some(ids) = fia.evalids() {
        return Ok(ids.to_vec());
    }
    let mut out = Vec::new();
    match fia.states() {
        Some(states) => {
            for state in states {
                out.push(EvalidResolver::recommend(fia.backend(), Some(*state), metric)?.evalid);
            }
        }
        None => {
            out.push(EvalidResolver::recommend(fia.backend(), None, metric)?.evalid);
        }
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

/// The physical column names of a table, uppercased by the mapper.
pub fn schema_names(fia: &Fia, table: &str) -> Result<BTreeSet<String>> {
    Ok(fia
        .backend()
        .schema(table)?
        .into_keys()
        .collect::<BTreeSet<String>>())
}

fn null_column(name: &str, dtype: DataType) -> Expr {
    Expr::Literal(LiteralValue::Null).cast(dtype).alias(name)
}

/// Combine a plan's pushed-down filters for one table into a single
/// predicate.
fn pushed_predicate(plan: &QueryPlan, table: &str) -> Option<DomainExpr> {
    let mut combined: Option<DomainExpr> = None;
    for filter in plan.pushed_filters(table) {
        combined = Some(match combined {
            Some(left) => DomainExpr::And(Box::new(left), Box::new(filter.predicate.clone())),
            None => filter.predicate.clone(),
        });
    }
    combined
}

/// Lower one table of a plan to a lazy scan: intersect the projection with
/// the physical schema, push the plan's filters into the scan, and apply
/// residual filters afterwards.
pub fn lower_table(fia: &Fia, plan: &QueryPlan, table: &str) -> Result<LazyFrame> {
    let schema = schema_names(fia, table)?;
    let mut present = Vec::new();
    for name in plan.projection(table) {
        let required = plan
            .columns
            .iter()
            .any(|c| c.table == table && c.name == name && c.required);
        if schema.contains(&name) {
            present.push(name);
        } else if required && !SYNTH_PLOT_COLUMNS.iter().any(|(n, _)| *n == name) {
            return Err(TaigaError::MissingColumn(format!("{table}.{name}")));
        }
    }

    let filter = pushed_predicate(plan, table);
    if let Some(expr) = &filter {
        for column in expr.columns() {
            if !schema.contains(&column) {
                return Err(TaigaError::MissingColumn(format!("{table}.{column}")));
            }
        }
    }

    let mut lf = fia.scan_table(table, Some(&present), filter.as_ref())?;
    for (name, dtype) in SYNTH_PLOT_COLUMNS {
        if plan.projection(table).iter().any(|c| c == name) && !schema.contains(name) {
            lf = lf.with_column(null_column(name, dtype));
        }
    }
    for residual in plan.residual_filters() {
        if residual.table.as_deref() == Some(table) {
            lf = lf.filter(residual.predicate.to_polars());
        }
    }
    Ok(lf)
}

/// Load, join, and annotate the estimation frames for one run.
pub fn load_frames(
    fia: &Fia,
    config: &EstimatorConfig,
    metric: MetricFamily,
    metric_columns: &[String],
    cond_metric_columns: &[String],
    extra_group_cols: &[String],
    with_trees: bool,
    warnings: &WarningSink,
) -> Result<FrameSet> {
    let evalids = resolve_evalids(fia, metric)?;
    tracing::debug!(?evalids, %metric, "loading estimation frames");

    // Sort requested grouping columns onto the frames that carry them.
    let mut requested: Vec<String> = config.group_columns();
    for extra in extra_group_cols {
        if !requested.contains(extra) {
            requested.push(extra.clone());
        }
    }
    let tree_schema = if with_trees {
        schema_names(fia, "TREE")?
    } else {
        BTreeSet::new()
    };
    let cond_schema = schema_names(fia, "COND")?;
    let mut tree_extra = Vec::new();
    let mut cond_extra = Vec::new();
    for column in &requested {
        if with_trees && tree_schema.contains(column) {
            tree_extra.push(column.clone());
        } else if cond_schema.contains(column) {
            cond_extra.push(column.clone());
        }
    }
    // The tree-class indicators read TREECLCD whenever trees load.
    if with_trees && !tree_extra.iter().any(|c| c == "TREECLCD") {
        tree_extra.push("TREECLCD".to_string());
    }
    for column in cond_metric_columns {
        if cond_schema.contains(column) {
            if !cond_extra.contains(column) {
                cond_extra.push(column.clone());
            }
        } else {
            return Err(TaigaError::MissingColumn(format!("COND.{column}")));
        }
    }

    let tree_domain = config
        .tree_domain
        .as_deref()
        .map(DomainExpr::parse)
        .transpose()?;
    let area_domain = config
        .area_domain
        .as_deref()
        .map(DomainExpr::parse)
        .transpose()?;

    // The area domain stays an indicator so the denominator's land base
    // keeps every sampled condition; only the tree domain pushes down.
    let mut plans = CompositeQueryBuilder::new(evalids.clone())
        .with_states(fia.states().map(<[i64]>::to_vec))
        .with_plot_cns(fia.plot_cns().map(<[i64]>::to_vec))
        .with_tree_domain(tree_domain)
        .with_tree_metric_columns(metric_columns.to_vec())
        .with_tree_extra_columns(tree_extra)
        .with_cond_extra_columns(cond_extra)
        .with_trees(with_trees)
        .build()?;

    JoinOptimizer::optimize(&mut plans.plots);
    JoinOptimizer::optimize(&mut plans.strata);
    JoinOptimizer::optimize(&mut plans.conditions);
    if let Some(trees) = plans.trees.as_mut() {
        JoinOptimizer::optimize(trees);
    }

    // Stratum design frame, served through the instance plan cache since
    // every estimator in a session reads the same stratification.
    let strata = fia
        .cached_plan_frame(plans.strata.cache_key(), || {
            Ok(lower_table(fia, &plans.strata, "POP_STRATUM")?.collect()?)
        })?
        .as_ref()
        .clone();
    if strata.is_empty() {
        return Err(TaigaError::NoData(format!(
            "no strata for EVALID {evalids:?}"
        )));
    }

    // Plot × assignment.
    let ppsa = lower_table(fia, &plans.plots, "POP_PLOT_STRATUM_ASSGN")?;
    let plot = lower_table(fia, &plans.plots, "PLOT")?;
    let plot_stratum = ppsa
        .join(
            plot,
            [col("PLT_CN")],
            [col("CN")],
            JoinArgs::new(JoinType::Inner),
        )
        .collect()?;
    if plot_stratum.is_empty() {
        return Err(TaigaError::NoData(format!(
            "EVALID {evalids:?} has no plot assignments"
        )));
    }

    // Stratum columns needed on the estimation frames.
    let adj_columns = [
        col("CN").alias("STRATUM_CN_KEY"),
        col("ADJ_FACTOR_SUBP"),
        col("ADJ_FACTOR_MICR"),
        col("ADJ_FACTOR_MACR"),
    ];
    let strata_adj = strata.clone().lazy().select(adj_columns.to_vec());

    let cond_scan = lower_table(fia, &plans.conditions, "COND")?;
    let conditions = cond_scan
        .clone()
        .join(
            plot_stratum.clone().lazy(),
            [col("PLT_CN")],
            [col("PLT_CN")],
            JoinArgs::new(JoinType::Inner),
        )
        .join(
            strata_adj.clone(),
            [col("STRATUM_CN")],
            [col("STRATUM_CN_KEY")],
            JoinArgs::new(JoinType::Inner),
        );

    let trees = match &plans.trees {
        Some(tree_plan) => {
            let tree_scan = lower_table(fia, tree_plan, "TREE")?;
            Some(
                tree_scan
                    .join(
                        cond_scan,
                        [col("PLT_CN"), col("CONDID")],
                        [col("PLT_CN"), col("CONDID")],
                        JoinArgs::new(JoinType::Inner),
                    )
                    .join(
                        plot_stratum.clone().lazy(),
                        [col("PLT_CN")],
                        [col("PLT_CN")],
                        JoinArgs::new(JoinType::Inner),
                    )
                    .join(
                        strata_adj,
                        [col("STRATUM_CN")],
                        [col("STRATUM_CN_KEY")],
                        JoinArgs::new(JoinType::Inner),
                    ),
            )
        }
        None => None,
    };

    // Grouping columns that actually exist somewhere on the joined frames.
    let mut available: Vec<String> = Vec::new();
    available.extend(tree_schema.iter().cloned());
    available.extend(cond_schema.iter().cloned());
    available.extend(schema_names(fia, "PLOT")?);
    if with_trees {
        available.push("SPCD".to_string());
        available.push("SIZE_CLASS".to_string());
    }
    available.push("LAND_TYPE".to_string());
    let group_cols = resolve_group_columns(&requested, &available, warnings);
    let denom_group_cols: Vec<String> = group_cols
        .iter()
        .filter(|c| c.as_str() == "LAND_TYPE" || cond_schema.contains(*c))
        .cloned()
        .collect();

    let n_plots = total_phase2_plots(&strata)?;

    Ok(FrameSet {
        trees,
        conditions,
        strata,
        plot_stratum,
        n_plots,
        group_cols,
        denom_group_cols,
        area_domain,
    })
}

/// Attach derived groups, adjustment, domain indicators, and the per-tree
/// value to the joined tree frame.
pub fn prepare_tree_frame(
    frames: &FrameSet,
    config: &EstimatorConfig,
    metric: Expr,
) -> Result<LazyFrame> {
    let trees = frames
        .trees
        .clone()
        .ok_or_else(|| TaigaError::Other("tree frame not loaded".to_string()))?;

    let mut lf = trees;
    for expr in derived_group_exprs(config) {
        lf = lf.with_column(expr);
    }
    let indicator = combined_indicator(vec![
        land_type_indicator(config.land_type),
        tree_type_indicator(config.tree_type),
        tree_class_indicator(config.tree_class),
        domain_indicator(frames.area_domain.as_ref()),
    ]);
    Ok(lf
        .with_column(tree_adjustment_expr())
        .with_column(indicator)
        .with_column(tree_value_expr(metric)))
}

/// Attach derived groups, condition-basis adjustment, the land-base
/// indicator, and the per-condition value to the joined condition frame.
///
/// `land_type` names the land base (the denominator of per-acre values);
/// `with_area_domain` additionally applies the user's area domain, which
/// the area numerator wants and the all-land denominator does not.
pub fn prepare_condition_frame(
    frames: &FrameSet,
    config: &EstimatorConfig,
    land_type: LandType,
    with_area_domain: bool,
) -> LazyFrame {
    let mut lf = frames.conditions.clone();
    // SIZE_CLASS derives from tree diameter and never applies here.
    if config.by_land_type {
        lf = lf.with_column(taiga_estimation::land_type_expr());
    }
    let mut indicators = vec![land_type_indicator(land_type)];
    if with_area_domain {
        indicators.push(domain_indicator(frames.area_domain.as_ref()));
    }
    lf.with_column(condition_adjustment_expr())
        .with_column(combined_indicator(indicators))
        .with_column(condition_value_expr())
}

/// Repeated scalar column helper for `N_PLOTS`.
fn n_plots_column(n_plots: i64, height: usize) -> Column {
    Column::new("N_PLOTS".into(), vec![n_plots; height])
}

/// Whether the config asks for CV columns.
#[must_use]
pub fn wants_cv(config: &EstimatorConfig) -> bool {
    config
        .extra_params
        .get("cv")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

/// Assemble a ratio-based output frame: group keys, the per-acre value,
/// optional totals, dispersion columns, and `N_PLOTS`.
pub fn ratio_output(
    group_cols: &[String],
    ratios: &[GroupRatio],
    per_acre_name: &str,
    total_name: &str,
    config: &EstimatorConfig,
    n_plots: i64,
) -> Result<DataFrame> {
    let keys: Vec<Vec<Key>> = ratios.iter().map(|r| r.key.clone()).collect();
    let mut columns = keys_to_columns(group_cols, &keys);

    let per_acre: Vec<f64> = ratios.iter().map(|r| r.ratio.ratio).collect();
    columns.push(Column::new(per_acre_name.into(), per_acre.clone()));
    push_dispersion(
        &mut columns,
        per_acre_name,
        ratios.iter().map(|r| r.ratio.variance),
        &per_acre,
        config,
    );

    if config.totals {
        let totals: Vec<f64> = ratios.iter().map(|r| r.ratio.total_y).collect();
        columns.push(Column::new(total_name.into(), totals.clone()));
        push_dispersion(
            &mut columns,
            total_name,
            ratios.iter().map(|r| r.variance_y),
            &totals,
            config,
        );
    }

    columns.push(n_plots_column(n_plots, ratios.len()));
    Ok(DataFrame::new(columns)?)
}

/// Assemble a totals-only output frame.
pub fn totals_output(
    group_cols: &[String],
    totals: &[GroupTotal],
    total_name: &str,
    config: &EstimatorConfig,
    n_plots: i64,
) -> Result<DataFrame> {
    let keys: Vec<Vec<Key>> = totals.iter().map(|t| t.key.clone()).collect();
    let mut columns = keys_to_columns(group_cols, &keys);

    let estimates: Vec<f64> = totals.iter().map(|t| t.estimate.total).collect();
    columns.push(Column::new(total_name.into(), estimates.clone()));
    push_dispersion(
        &mut columns,
        total_name,
        totals.iter().map(|t| t.estimate.variance),
        &estimates,
        config,
    );

    columns.push(n_plots_column(n_plots, totals.len()));
    Ok(DataFrame::new(columns)?)
}

fn push_dispersion(
    columns: &mut Vec<Column>,
    stem: &str,
    variances: impl Iterator<Item = f64>,
    estimates: &[f64],
    config: &EstimatorConfig,
) {
    let variances: Vec<f64> = variances.collect();
    if config.variance {
        columns.push(Column::new(format!("{stem}_VAR").into(), variances.clone()));
    } else {
        let se: Vec<f64> = variances
            .iter()
            .map(|v| taiga_estimation::standard_error(*v))
            .collect();
        columns.push(Column::new(format!("{stem}_SE").into(), se));
    }
    if wants_cv(config) {
        let cv: Vec<f64> = variances
            .iter()
            .zip(estimates)
            .map(|(v, e)| taiga_estimation::cv_percent(taiga_estimation::standard_error(*v), *e))
            .collect();
        columns.push(Column::new(format!("{stem}_CV").into(), cv));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taiga_estimation::{RatioEstimate, TotalEstimate};

    fn ratio_fixture() -> Vec<GroupRatio> {
        vec![GroupRatio {
            key: vec![],
            ratio: RatioEstimate {
                ratio: 2.5,
                variance: 0.25,
                total_y: 1000.0,
                total_x: 400.0,
                degenerate: false,
            },
            variance_y: 2500.0,
            variance_x: 100.0,
        }]
    }

    #[test]
    fn test_ratio_output_columns() {
        let config = EstimatorConfig {
            totals: true,
            ..Default::default()
        };
        let df = ratio_output(&[], &ratio_fixture(), "TPA", "TPA_TOTAL", &config, 42).unwrap();
        for column in ["TPA", "TPA_SE", "TPA_TOTAL", "TPA_TOTAL_SE", "N_PLOTS"] {
            assert!(df.column(column).is_ok(), "{column}");
        }
        assert_eq!(df.height(), 1);
        let n = df
            .column("N_PLOTS")
            .unwrap()
            .as_materialized_series()
            .i64()
            .unwrap()
            .get(0);
        assert_eq!(n, Some(42));
    }

    #[test]
    fn test_variance_flag_switches_columns() {
        let config = EstimatorConfig {
            variance: true,
            ..Default::default()
        };
        let df = ratio_output(&[], &ratio_fixture(), "TPA", "TPA_TOTAL", &config, 1).unwrap();
        assert!(df.column("TPA_VAR").is_ok());
        assert!(df.column("TPA_SE").is_err());
    }

    #[test]
    fn test_cv_on_demand() {
        let mut config = EstimatorConfig::default();
        config
            .extra_params
            .insert("cv".to_string(), serde_json::json!(true));
        let df = ratio_output(&[], &ratio_fixture(), "TPA", "TPA_TOTAL", &config, 1).unwrap();
        assert!(df.column("TPA_CV").is_ok());
        let cv = df
            .column("TPA_CV")
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .get(0)
            .unwrap();
        // SE = 0.5, estimate = 2.5 → 20%.
        assert!((cv - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_totals_output() {
        let totals = vec![GroupTotal {
            key: vec![Key::Int(131)],
            estimate: TotalEstimate {
                total: 5000.0,
                variance: 400.0,
            },
        }];
        let config = EstimatorConfig::default();
        let df = totals_output(
            &["SPCD".to_string()],
            &totals,
            "TREE_COUNT",
            &config,
            10,
        )
        .unwrap();
        assert!(df.column("SPCD").is_ok());
        assert!(df.column("TREE_COUNT").is_ok());
        assert!(df.column("TREE_COUNT_SE").is_ok());
        let se = df
            .column("TREE_COUNT_SE")
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .get(0)
            .unwrap();
        assert!((se - 20.0).abs() < 1e-9);
    }
}
