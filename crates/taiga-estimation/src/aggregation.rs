//! Two-stage aggregation.
//!
//! Rolls tree values up to conditions and conditions up to plots. The
//! roll-ups never drop rows for being outside the domain (the indicator
//! already zeroed them), and the plot frame can be completed with explicit
//! zero rows for every sampled plot when a materialized plot list is
//! needed (ungrouped estimates, per-plot output).

use polars::prelude::*;
use taiga_traits::Result;

use crate::expansion::PLOT_VALUE;

/// Column holding the per-tree contribution before roll-up.
pub const TREE_VALUE: &str = "TREE_VALUE";

/// Column holding the per-condition roll-up.
pub const COND_VALUE: &str = "COND_VALUE";

/// Per-tree contribution: `metric · TPA_UNADJ · ADJ_FACTOR · DOMAIN_IND`.
///
/// The metric expression is estimator-specific (`VOLCFNET`,
/// `DRYBIO_AG / 2000`, a literal 1 for counts); adjustment and indicator
/// columns must already be attached.
#[must_use]
pub fn tree_value_expr(metric: Expr) -> Expr {
    (metric
        * col("TPA_UNADJ").fill_null(lit(0.0))
        * col("ADJ_FACTOR").fill_null(lit(0.0))
        * col("DOMAIN_IND"))
    .fill_null(lit(0.0))
    .alias(TREE_VALUE)
}

/// Per-condition contribution for area-type estimates:
/// `CONDPROP_UNADJ · ADJ_FACTOR · DOMAIN_IND`.
#[must_use]
pub fn condition_value_expr() -> Expr {
    (col("CONDPROP_UNADJ").fill_null(lit(0.0))
        * col("ADJ_FACTOR").fill_null(lit(0.0))
        * col("DOMAIN_IND"))
    .fill_null(lit(0.0))
    .alias(COND_VALUE)
}

/// Stage one: tree → condition. Sums [`TREE_VALUE`] over each condition,
/// carrying the stratum key and group columns.
#[must_use]
pub fn rollup_tree_to_condition(trees: LazyFrame, group_cols: &[String]) -> LazyFrame {
    let mut keys = vec![col("STRATUM_CN"), col("PLT_CN"), col("CONDID")];
    keys.extend(group_cols.iter().map(|c| col(c.as_str())));
    trees
        .group_by(keys)
        .agg([col(TREE_VALUE).sum().alias(COND_VALUE)])
}

/// Stage two: condition → plot. Sums [`COND_VALUE`] over each plot into
/// [`PLOT_VALUE`].
#[must_use]
pub fn rollup_condition_to_plot(conditions: LazyFrame, group_cols: &[String]) -> LazyFrame {
    let mut keys = vec![col("STRATUM_CN"), col("PLT_CN")];
    keys.extend(group_cols.iter().map(|c| col(c.as_str())));
    conditions
        .group_by(keys)
        .agg([col(COND_VALUE).sum().alias(PLOT_VALUE)])
}

/// Both stages in sequence for tree-level metrics.
#[must_use]
pub fn rollup_tree_to_plot(trees: LazyFrame, group_cols: &[String]) -> LazyFrame {
    rollup_condition_to_plot(rollup_tree_to_condition(trees, group_cols), group_cols)
}

/// Complete a plot-value frame with explicit zero rows for every sampled
/// plot missing from it.
///
/// `all_plots` is the full assignment list (`STRATUM_CN`, `PLT_CN`) for
/// the evaluation; the result keeps every plot, zero-valued or not, which
/// is what the variance stage requires when it works from a materialized
/// plot list.
pub fn complete_with_zero_plots(
    plot_values: &DataFrame,
    all_plots: &DataFrame,
) -> Result<DataFrame> {
    let completed = all_plots
        .clone()
        .lazy()
        .select([col("STRATUM_CN"), col("PLT_CN")])
        .unique(None, UniqueKeepStrategy::First)
        .join(
            plot_values.clone().lazy(),
            [col("STRATUM_CN"), col("PLT_CN")],
            [col("STRATUM_CN"), col("PLT_CN")],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(col(PLOT_VALUE).fill_null(lit(0.0)))
        .collect()?;
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tree_frame() -> DataFrame {
        // Two plots; plot 11 has two conditions. Tree 4 is outside the
        // domain and contributes zero without being dropped.
        df! {
            "STRATUM_CN" => &[1i64, 1, 1, 1],
            "PLT_CN" => &[11i64, 11, 11, 12],
            "CONDID" => &[1i64, 1, 2, 1],
            "VOLCFNET" => &[10.0, 20.0, 40.0, 100.0],
            "TPA_UNADJ" => &[6.0, 6.0, 6.0, 6.0],
            "ADJ_FACTOR" => &[1.0, 1.0, 1.0, 1.0],
            "DOMAIN_IND" => &[1.0, 1.0, 1.0, 0.0],
        }
        .unwrap()
    }

    fn collect_sorted(lf: LazyFrame) -> DataFrame {
        lf.collect()
            .unwrap()
            .sort(["PLT_CN"], SortMultipleOptions::default())
            .unwrap()
    }

    #[test]
    fn test_two_stage_rollup() {
        let trees = tree_frame()
            .lazy()
            .with_column(tree_value_expr(col("VOLCFNET")));

        let conditions = rollup_tree_to_condition(trees.clone(), &[]);
        let cond_df = conditions
            .collect()
            .unwrap()
            .sort(["PLT_CN", "CONDID"], SortMultipleOptions::default())
            .unwrap();
        assert_eq!(cond_df.height(), 3);
        let h_ic: Vec<f64> = cond_df
            .column(COND_VALUE)
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .collect();
        // (10+20)·6, 40·6, 100·6·0
        assert_eq!(h_ic, vec![180.0, 240.0, 0.0]);

        let plots = collect_sorted(rollup_tree_to_plot(trees, &[]));
        assert_eq!(plots.height(), 2);
        let y_i: Vec<f64> = plots
            .column(PLOT_VALUE)
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .collect();
        // Plot 11 sums both conditions; plot 12 is in-frame with zero.
        assert_eq!(y_i, vec![420.0, 0.0]);
    }

    #[test]
    fn test_rollup_with_groups() {
        let trees = df! {
            "STRATUM_CN" => &[1i64, 1, 1],
            "PLT_CN" => &[11i64, 11, 11],
            "CONDID" => &[1i64, 1, 1],
            "SPCD" => &[131i64, 131, 110],
            "VALUE" => &[1.0, 2.0, 5.0],
            "TPA_UNADJ" => &[1.0, 1.0, 1.0],
            "ADJ_FACTOR" => &[1.0, 1.0, 1.0],
            "DOMAIN_IND" => &[1.0, 1.0, 1.0],
        }
        .unwrap()
        .lazy()
        .with_column(tree_value_expr(col("VALUE")));

        let plots = rollup_tree_to_plot(trees, &["SPCD".to_string()])
            .collect()
            .unwrap()
            .sort(["SPCD"], SortMultipleOptions::default())
            .unwrap();
        assert_eq!(plots.height(), 2);
        let values: Vec<f64> = plots
            .column(PLOT_VALUE)
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .collect();
        assert_eq!(values, vec![5.0, 3.0]);
    }

    #[test]
    fn test_condition_value_expr() {
        let conds = df! {
            "CONDPROP_UNADJ" => &[Some(0.75), Some(0.25), None],
            "ADJ_FACTOR" => &[1.0, 1.0, 1.0],
            "DOMAIN_IND" => &[1.0, 0.0, 1.0],
        }
        .unwrap();
        let out = conds
            .lazy()
            .select([condition_value_expr()])
            .collect()
            .unwrap();
        let values: Vec<f64> = out
            .column(COND_VALUE)
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .collect();
        assert_eq!(values, vec![0.75, 0.0, 0.0]);
    }

    #[test]
    fn test_complete_with_zero_plots() {
        let plot_values = df! {
            "STRATUM_CN" => &[1i64],
            "PLT_CN" => &[11i64],
            "PLOT_VALUE" => &[5.0],
        }
        .unwrap();
        let all_plots = df! {
            "STRATUM_CN" => &[1i64, 1, 2],
            "PLT_CN" => &[11i64, 12, 21],
        }
        .unwrap();
        let completed = complete_with_zero_plots(&plot_values, &all_plots)
            .unwrap()
            .sort(["PLT_CN"], SortMultipleOptions::default())
            .unwrap();
        assert_eq!(completed.height(), 3);
        let values: Vec<f64> = completed
            .column(PLOT_VALUE)
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .collect();
        assert_eq!(values, vec![5.0, 0.0, 0.0]);
    }
}
