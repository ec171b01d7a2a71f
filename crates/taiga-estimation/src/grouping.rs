//! Grouping-column setup.
//!
//! Builds the derived grouping columns (`SIZE_CLASS`, `LAND_TYPE`) and
//! assembles the final grouping list from user columns plus the `by_*`
//! switches, deduplicated preserving order.

use polars::prelude::*;
use taiga_traits::codes::{LandStatus, ReserveStatus, SiteClass};
use taiga_traits::config::{EstimatorConfig, SizeClassLabels};
use taiga_traits::{WarningKind, WarningSink};

/// Diameter bucket boundaries shared by both label sets.
const SIZE_BREAKS: [f64; 4] = [5.0, 10.0, 20.0, 30.0];

/// `SIZE_CLASS` label expression over a diameter column.
///
/// Both label sets bucket on the same boundaries; `standard` emits the
/// numeric ranges, `descriptive` the named classes (where the two largest
/// numeric buckets collapse into `Large`).
#[must_use]
pub fn size_class_expr(dia_column: &str, labels: SizeClassLabels) -> Expr {
    let dia = col(dia_column);
    match labels {
        SizeClassLabels::Standard => when(dia.clone().lt(lit(SIZE_BREAKS[0])))
            .then(lit("1.0-4.9"))
            .when(dia.clone().lt(lit(SIZE_BREAKS[1])))
            .then(lit("5.0-9.9"))
            .when(dia.clone().lt(lit(SIZE_BREAKS[2])))
            .then(lit("10.0-19.9"))
            .when(dia.lt(lit(SIZE_BREAKS[3])))
            .then(lit("20.0-29.9"))
            .otherwise(lit("30.0+"))
            .alias("SIZE_CLASS"),
        SizeClassLabels::Descriptive => when(dia.clone().lt(lit(SIZE_BREAKS[0])))
            .then(lit("Saplings"))
            .when(dia.clone().lt(lit(SIZE_BREAKS[1])))
            .then(lit("Small"))
            .when(dia.lt(lit(SIZE_BREAKS[2])))
            .then(lit("Medium"))
            .otherwise(lit("Large"))
            .alias("SIZE_CLASS"),
    }
}

/// Numeric lower bounds of the size-class buckets, for tests and docs.
#[must_use]
pub fn size_class_bounds() -> Vec<(f64, Option<f64>)> {
    vec![
        (1.0, Some(4.9)),
        (5.0, Some(9.9)),
        (10.0, Some(19.9)),
        (20.0, Some(29.9)),
        (30.0, None),
    ]
}

/// Derived `LAND_TYPE` category over condition columns.
#[must_use]
pub fn land_type_expr() -> Expr {
    let timber = col("COND_STATUS_CD")
        .eq(lit(LandStatus::FOREST))
        .and(col("SITECLCD").gt_eq(lit(SiteClass::PRODUCTIVE_MIN)))
        .and(col("SITECLCD").lt_eq(lit(SiteClass::PRODUCTIVE_MAX)))
        .and(col("RESERVCD").eq(lit(ReserveStatus::NOT_RESERVED)))
        .fill_null(lit(false));
    when(timber)
        .then(lit("Timber"))
        .when(
            col("COND_STATUS_CD")
                .eq(lit(LandStatus::FOREST))
                .fill_null(lit(false)),
        )
        .then(lit("Non-Timber Forest"))
        .when(
            col("COND_STATUS_CD")
                .eq(lit(LandStatus::NONFOREST))
                .fill_null(lit(false)),
        )
        .then(lit("Non-Forest"))
        .when(
            col("COND_STATUS_CD")
                .eq(lit(LandStatus::NONCENSUS_WATER))
                .or(col("COND_STATUS_CD").eq(lit(LandStatus::CENSUS_WATER)))
                .fill_null(lit(false)),
        )
        .then(lit("Water"))
        .otherwise(lit("Other"))
        .alias("LAND_TYPE")
}

/// The derived columns a config needs on the estimation frame, in the
/// order they should be attached.
#[must_use]
pub fn derived_group_exprs(config: &EstimatorConfig) -> Vec<Expr> {
    let mut exprs = Vec::new();
    if config.by_size_class {
        exprs.push(size_class_expr("DIA", config.size_class_labels));
    }
    if config.by_land_type {
        exprs.push(land_type_expr());
    }
    exprs
}

/// Check the final grouping list against the columns actually present,
/// warning (never failing) about unknown names, and return the usable
/// list.
#[must_use]
pub fn resolve_group_columns(
    requested: &[String],
    available: &[String],
    warnings: &WarningSink,
) -> Vec<String> {
    let mut usable = Vec::with_capacity(requested.len());
    for column in requested {
        if available.iter().any(|a| a == column) {
            usable.push(column.clone());
        } else {
            warnings.push(
                WarningKind::UnknownColumn,
                format!("grouping column '{column}' not found; ignoring"),
            );
        }
    }
    usable
}
