//! Domain indicators.
//!
//! The central invariant of the estimation core: a domain never drops rows.
//! Every sampled condition (and tree) gets a `{0, 1}` indicator column, the
//! effective indicator is the product of the applicable indicators, and
//! rows with indicator 0 contribute zero while keeping stratum sample
//! sizes at the true phase-2 plot counts.

use polars::prelude::*;
use taiga_traits::codes::{LandStatus, ReserveStatus, SiteClass, TreeStatus};
use taiga_traits::config::{LandType, TreeClass, TreeType};
use taiga_traits::expr::DomainExpr;

/// Column name of the combined domain indicator.
pub const DOMAIN_IND: &str = "DOMAIN_IND";

/// Land-type indicator over condition columns.
///
/// forest: `COND_STATUS_CD == 1`; timber additionally requires a productive
/// site class (1..=6) and unreserved status; all: every sampled condition.
#[must_use]
pub fn land_type_indicator(land_type: LandType) -> Expr {
    let expr = match land_type {
        LandType::Forest => col("COND_STATUS_CD").eq(lit(LandStatus::FOREST)),
        LandType::Timber => col("COND_STATUS_CD")
            .eq(lit(LandStatus::FOREST))
            .and(col("SITECLCD").gt_eq(lit(SiteClass::PRODUCTIVE_MIN)))
            .and(col("SITECLCD").lt_eq(lit(SiteClass::PRODUCTIVE_MAX)))
            .and(col("RESERVCD").eq(lit(ReserveStatus::NOT_RESERVED))),
        LandType::All => lit(true),
    };
    indicator(expr)
}

/// Tree-status indicator: `live` is STATUSCD 1, `dead` 2, `gs` live
/// growing stock (TREECLCD 2), `all` unrestricted.
#[must_use]
pub fn tree_type_indicator(tree_type: TreeType) -> Expr {
    let expr = match tree_type {
        TreeType::Live => col("STATUSCD").eq(lit(TreeStatus::Live.code())),
        TreeType::Dead => col("STATUSCD").eq(lit(TreeStatus::Dead.code())),
        TreeType::Gs => col("STATUSCD")
            .eq(lit(TreeStatus::Live.code()))
            .and(col("TREECLCD").eq(lit(2))),
        TreeType::All => lit(true),
    };
    indicator(expr)
}

/// Tree-class indicator. Growing stock and timber quality map to
/// `TREECLCD == 2`; the cull classes cover codes 3 and 4.
#[must_use]
pub fn tree_class_indicator(tree_class: TreeClass) -> Expr {
    let expr = match tree_class {
        TreeClass::All => lit(true),
        TreeClass::GrowingStock | TreeClass::Timber => col("TREECLCD").eq(lit(2)),
        TreeClass::Rotten => col("TREECLCD").gt_eq(lit(3)).and(col("TREECLCD").lt_eq(lit(4))),
        TreeClass::Nonstockable => col("TREECLCD").neq(lit(2)),
    };
    indicator(expr)
}

/// Indicator from a user domain predicate; absent predicate means 1.
#[must_use]
pub fn domain_indicator(domain: Option<&DomainExpr>) -> Expr {
    match domain {
        Some(expr) => indicator(expr.to_polars()),
        None => lit(1.0),
    }
}

/// Product of indicators, aliased to [`DOMAIN_IND`].
#[must_use]
pub fn combined_indicator(indicators: Vec<Expr>) -> Expr {
    let mut iter = indicators.into_iter();
    let first = iter.next().unwrap_or_else(|| lit(1.0));
    iter.fold(first, |acc, ind| acc * ind).alias(DOMAIN_IND)
}

/// `{0.0, 1.0}` from a boolean expression; null predicates (from null
/// inputs) count as outside the domain, keeping the indicator total.
fn indicator(condition: Expr) -> Expr {
    when(condition.fill_null(lit(false)))
        .then(lit(1.0))
        .otherwise(lit(0.0))
}
