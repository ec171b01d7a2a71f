//! Plot-size adjustment selection.
//!
//! Every tree (or condition) record gets exactly one of the stratum's three
//! adjustment factors. The selectors are total functions over the joined
//! frame: null diameters fall through to the subplot factor, a null
//! macroplot breakpoint means the macroplot rule never fires, and the GRM
//! code 0 yields a literal 0.0 adjustment (the row is kept and contributes
//! nothing).

use polars::prelude::*;
use taiga_traits::codes::SubptypGrm;

/// Column name of the selected adjustment factor.
pub const ADJ_FACTOR: &str = "ADJ_FACTOR";

/// Diameter-based selector for standard tree-level estimation:
/// microplot under 5.0", macroplot at or above the plot's breakpoint,
/// subplot otherwise.
#[must_use]
pub fn tree_adjustment_expr() -> Expr {
    when(col("DIA").lt(lit(5.0)).fill_null(lit(false)))
        .then(col("ADJ_FACTOR_MICR"))
        .when(
            col("DIA")
                .gt_eq(col("MACRO_BREAKPOINT_DIA"))
                .fill_null(lit(false)),
        )
        .then(col("ADJ_FACTOR_MACR"))
        .otherwise(col("ADJ_FACTOR_SUBP"))
        .alias(ADJ_FACTOR)
}

/// Condition-basis selector for area estimation, matching the published
/// CASE expression: `PROP_BASIS = 'MACR'` takes the macroplot factor,
/// everything else the subplot factor.
#[must_use]
pub fn condition_adjustment_expr() -> Expr {
    when(col("PROP_BASIS").eq(lit("MACR")).fill_null(lit(false)))
        .then(col("ADJ_FACTOR_MACR"))
        .otherwise(col("ADJ_FACTOR_SUBP"))
        .alias(ADJ_FACTOR)
}

/// GRM selector keyed on a `SUBP_SUBPTYP_GRM_*` column: 1 subplot,
/// 2 microplot, 3 macroplot, anything else (including 0 and null) a
/// literal 0.0 so excluded trees contribute nothing without being dropped.
#[must_use]
pub fn grm_adjustment_expr(subptyp_column: &str) -> Expr {
    when(col(subptyp_column).eq(lit(SubptypGrm::Subp as i64)))
        .then(col("ADJ_FACTOR_SUBP"))
        .when(col(subptyp_column).eq(lit(SubptypGrm::Micr as i64)))
        .then(col("ADJ_FACTOR_MICR"))
        .when(col(subptyp_column).eq(lit(SubptypGrm::Macr as i64)))
        .then(col("ADJ_FACTOR_MACR"))
        .otherwise(lit(0.0))
        .alias(ADJ_FACTOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adj_values(df: DataFrame, expr: Expr) -> Vec<f64> {
        df.lazy()
            .select([expr])
            .collect()
            .unwrap()
            .column(ADJ_FACTOR)
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .collect()
    }

    #[test]
    fn test_tree_adjustment_regions() {
        let trees = df! {
            "DIA" => &[Some(3.0), Some(4.9), Some(5.0), Some(12.0), Some(24.0), Some(30.0), None],
            "MACRO_BREAKPOINT_DIA" => &[Some(24.0), Some(24.0), Some(24.0), Some(24.0), Some(24.0), None, Some(24.0)],
            "ADJ_FACTOR_SUBP" => &[1.0; 7],
            "ADJ_FACTOR_MICR" => &[12.0; 7],
            "ADJ_FACTOR_MACR" => &[0.25; 7],
        }
        .unwrap();
        let values = adj_values(trees, tree_adjustment_expr());
        // Microplot below 5.0".
        assert_eq!(values[0], 12.0);
        assert_eq!(values[1], 12.0);
        // Subplot between 5.0" and the breakpoint.
        assert_eq!(values[2], 1.0);
        assert_eq!(values[3], 1.0);
        // Macroplot at or above the breakpoint.
        assert_eq!(values[4], 0.25);
        // Null breakpoint disables the macroplot rule.
        assert_eq!(values[5], 1.0);
        // Null diameter falls through to subplot; the selector is total.
        assert_eq!(values[6], 1.0);
    }

    #[test]
    fn test_condition_adjustment_prop_basis() {
        let conds = df! {
            "PROP_BASIS" => &[Some("MACR"), Some("SUBP"), None],
            "ADJ_FACTOR_SUBP" => &[1.1; 3],
            "ADJ_FACTOR_MACR" => &[0.3; 3],
        }
        .unwrap();
        let values = adj_values(conds, condition_adjustment_expr());
        assert_eq!(values, vec![0.3, 1.1, 1.1]);
    }

    #[test]
    fn test_grm_adjustment_codes() {
        let grm = df! {
            "SUBP_SUBPTYP_GRM_GS_FOREST" => &[Some(1i64), Some(2), Some(3), Some(0), None],
            "ADJ_FACTOR_SUBP" => &[1.0; 5],
            "ADJ_FACTOR_MICR" => &[12.0; 5],
            "ADJ_FACTOR_MACR" => &[0.25; 5],
        }
        .unwrap();
        let values = adj_values(grm, grm_adjustment_expr("SUBP_SUBPTYP_GRM_GS_FOREST"));
        // Code 0 (and null) zero the contribution instead of dropping rows.
        assert_eq!(values, vec![1.0, 12.0, 0.25, 0.0, 0.0]);
    }
}
