//! Typed query builders for the FIA estimation tables.
//!
//! Each builder assembles a [`QueryPlan`] with the projection and filters
//! an estimator needs; the composite builder wires the four plans of a full
//! estimation run (plots, strata, conditions, trees).

use taiga_traits::expr::DomainExpr;
use taiga_traits::{Result, TaigaError};

use crate::plan::{JoinHow, JoinStrategy, QueryColumn, QueryFilter, QueryJoin, QueryPlan};

/// Baseline row-count guesses per table, used by the cost model before any
/// statistics exist.
#[must_use]
pub fn baseline_rows(table: &str) -> u64 {
    match table {
        "TREE" | "TREE_GRM_COMPONENT" => 1_500_000,
        "TREE_GRM_BEGIN" | "TREE_GRM_MIDPT" => 800_000,
        "COND" => 150_000,
        "PLOT" | "POP_PLOT_STRATUM_ASSGN" => 100_000,
        "POP_STRATUM" => 2_000,
        "POP_EVAL" | "POP_EVAL_TYP" | "POP_ESTN_UNIT" => 500,
        "REF_SPECIES" => 2_500,
        "BEGINEND" => 2,
        _ => 50_000,
    }
}

fn in_list_filter(table: &str, column: &str, values: &[i64]) -> Result<QueryFilter> {
    let list = values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let expr = DomainExpr::parse(&format!("{column} IN ({list})"))?;
    Ok(QueryFilter::from_expr(expr, Some(table)))
}

/// Split a user domain into plan filters per the push-down rules:
/// AND-conjuncts become individual filters, OR-compounds stay whole and
/// run after the joins.
#[must_use]
pub fn domain_filters(domain: &DomainExpr, table: &str) -> Vec<QueryFilter> {
    domain
        .split_conjuncts()
        .into_iter()
        .map(|conjunct| QueryFilter::from_expr(conjunct, Some(table)))
        .collect()
}

/// Builder for the stratification plan (`POP_STRATUM`).
#[derive(Debug, Clone)]
pub struct StratificationQueryBuilder {
    evalids: Vec<i64>,
    states: Option<Vec<i64>>,
    include_adjustment_factors: bool,
}

impl StratificationQueryBuilder {
    /// Start a stratification plan for the given evaluations.
    #[must_use]
    pub fn new(evalids: Vec<i64>) -> Self {
        Self {
            evalids,
            states: None,
            include_adjustment_factors: true,
        }
    }

    /// Restrict to states.
    #[must_use]
    pub fn with_states(mut self, states: Vec<i64>) -> Self {
        self.states = Some(states);
        self
    }

    /// Whether to project the `ADJ_FACTOR_*` columns.
    #[must_use]
    pub const fn with_adjustment_factors(mut self, include: bool) -> Self {
        self.include_adjustment_factors = include;
        self
    }

    /// Build the plan.
    pub fn build(self) -> Result<QueryPlan> {
        if self.evalids.is_empty() {
            return Err(TaigaError::InvalidConfig(
                "stratification requires at least one EVALID".to_string(),
            ));
        }
        let mut plan = QueryPlan::new();
        plan.tables.insert("POP_STRATUM".to_string());
        for name in [
            "CN",
            "EVALID",
            "ESTN_UNIT_CN",
            "EXPNS",
            "P1POINTCNT",
            "P2POINTCNT",
        ] {
            plan.columns.push(QueryColumn::required(name, "POP_STRATUM"));
        }
        if self.include_adjustment_factors {
            for name in ["ADJ_FACTOR_SUBP", "ADJ_FACTOR_MICR", "ADJ_FACTOR_MACR"] {
                plan.columns.push(QueryColumn::required(name, "POP_STRATUM"));
            }
        }
        plan.filters
            .push(in_list_filter("POP_STRATUM", "EVALID", &self.evalids)?);
        if let Some(states) = &self.states {
            plan.filters
                .push(in_list_filter("POP_STRATUM", "STATECD", states)?);
        }
        plan.estimated_rows = Some(baseline_rows("POP_STRATUM"));
        Ok(plan)
    }
}

/// Builder for the tree plan (`TREE`).
#[derive(Debug, Clone, Default)]
pub struct TreeQueryBuilder {
    tree_domain: Option<DomainExpr>,
    species: Option<Vec<i64>>,
    dia_range: Option<(f64, f64)>,
    exclude_seedlings: bool,
    metric_columns: Vec<String>,
    extra_columns: Vec<String>,
}

impl TreeQueryBuilder {
    /// Start an empty tree plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a parsed tree domain.
    #[must_use]
    pub fn with_domain(mut self, domain: DomainExpr) -> Self {
        self.tree_domain = Some(domain);
        self
    }

    /// Restrict to species codes.
    #[must_use]
    pub fn with_species(mut self, species: Vec<i64>) -> Self {
        self.species = Some(species);
        self
    }

    /// Restrict diameter to an inclusive range.
    #[must_use]
    pub const fn with_dia_range(mut self, low: f64, high: f64) -> Self {
        self.dia_range = Some((low, high));
        self
    }

    /// Exclude seedlings (`DIA > 0`).
    #[must_use]
    pub const fn exclude_seedlings(mut self, exclude: bool) -> Self {
        self.exclude_seedlings = exclude;
        self
    }

    /// Metric columns the estimator reads (`VOLCFNET`, `DRYBIO_AG`, ...).
    #[must_use]
    pub fn with_metric_columns(mut self, columns: Vec<String>) -> Self {
        self.metric_columns = columns;
        self
    }

    /// User grouping columns that live on TREE.
    #[must_use]
    pub fn with_extra_columns(mut self, columns: Vec<String>) -> Self {
        self.extra_columns = columns;
        self
    }

    /// Build the plan.
    pub fn build(self) -> Result<QueryPlan> {
        let mut plan = QueryPlan::new();
        plan.tables.insert("TREE".to_string());
        for name in ["CN", "PLT_CN", "CONDID", "SPCD", "DIA", "STATUSCD", "TPA_UNADJ"] {
            plan.columns.push(QueryColumn::required(name, "TREE"));
        }
        for name in &self.metric_columns {
            plan.columns.push(QueryColumn::required(name, "TREE"));
        }
        for name in &self.extra_columns {
            plan.columns.push(QueryColumn::optional(name, "TREE"));
        }

        if let Some(domain) = &self.tree_domain {
            plan.filters.extend(domain_filters(domain, "TREE"));
            // Domain columns must be present for residual evaluation.
            for column in domain.columns() {
                plan.columns.push(QueryColumn::optional(&column, "TREE"));
            }
        }
        if let Some(species) = &self.species {
            plan.filters.push(in_list_filter("TREE", "SPCD", species)?);
        }
        if let Some((low, high)) = self.dia_range {
            let expr = DomainExpr::parse(&format!("DIA BETWEEN {low} AND {high}"))?;
            plan.filters.push(QueryFilter::from_expr(expr, Some("TREE")));
        }
        if self.exclude_seedlings {
            let expr = DomainExpr::parse("DIA > 0")?;
            plan.filters.push(QueryFilter::from_expr(expr, Some("TREE")));
        }

        let selectivity = plan.filter_selectivity();
        plan.estimated_rows =
            Some((baseline_rows("TREE") as f64 * selectivity).ceil() as u64);
        Ok(plan)
    }
}

/// Builder for the condition plan (`COND`).
#[derive(Debug, Clone, Default)]
pub struct ConditionQueryBuilder {
    area_domain: Option<DomainExpr>,
    forest_types: Option<Vec<i64>>,
    ownership_groups: Option<Vec<i64>>,
    reserved: Option<i64>,
    extra_columns: Vec<String>,
}

impl ConditionQueryBuilder {
    /// Start an empty condition plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a parsed area domain.
    #[must_use]
    pub fn with_domain(mut self, domain: DomainExpr) -> Self {
        self.area_domain = Some(domain);
        self
    }

    /// Restrict to forest type codes.
    #[must_use]
    pub fn with_forest_types(mut self, types: Vec<i64>) -> Self {
        self.forest_types = Some(types);
        self
    }

    /// Restrict to ownership groups.
    #[must_use]
    pub fn with_ownership_groups(mut self, groups: Vec<i64>) -> Self {
        self.ownership_groups = Some(groups);
        self
    }

    /// Restrict to a reserved-status code.
    #[must_use]
    pub const fn with_reserved(mut self, reservcd: i64) -> Self {
        self.reserved = Some(reservcd);
        self
    }

    /// User grouping columns that live on COND.
    #[must_use]
    pub fn with_extra_columns(mut self, columns: Vec<String>) -> Self {
        self.extra_columns = columns;
        self
    }

    /// Build the plan.
    pub fn build(self) -> Result<QueryPlan> {
        let mut plan = QueryPlan::new();
        plan.tables.insert("COND".to_string());
        for name in [
            "PLT_CN",
            "CONDID",
            "COND_STATUS_CD",
            "CONDPROP_UNADJ",
            "PROP_BASIS",
            "FORTYPCD",
            "OWNGRPCD",
            "SITECLCD",
            "RESERVCD",
            "STDSZCD",
        ] {
            plan.columns.push(QueryColumn::required(name, "COND"));
        }
        for name in &self.extra_columns {
            plan.columns.push(QueryColumn::optional(name, "COND"));
        }

        if let Some(domain) = &self.area_domain {
            plan.filters.extend(domain_filters(domain, "COND"));
            for column in domain.columns() {
                plan.columns.push(QueryColumn::optional(&column, "COND"));
            }
        }
        if let Some(types) = &self.forest_types {
            plan.filters.push(in_list_filter("COND", "FORTYPCD", types)?);
        }
        if let Some(groups) = &self.ownership_groups {
            plan.filters
                .push(in_list_filter("COND", "OWNGRPCD", groups)?);
        }
        if let Some(reservcd) = self.reserved {
            let expr = DomainExpr::parse(&format!("RESERVCD == {reservcd}"))?;
            plan.filters.push(QueryFilter::from_expr(expr, Some("COND")));
        }

        let selectivity = plan.filter_selectivity();
        plan.estimated_rows =
            Some((baseline_rows("COND") as f64 * selectivity).ceil() as u64);
        Ok(plan)
    }
}

/// Builder for the plot plan (`PLOT`, optionally joined to the stratum
/// assignment).
#[derive(Debug, Clone, Default)]
pub struct PlotQueryBuilder {
    evalids: Vec<i64>,
    states: Option<Vec<i64>>,
    counties: Option<Vec<i64>>,
    plot_cns: Option<Vec<i64>>,
    include_strata: bool,
}

impl PlotQueryBuilder {
    /// Start a plot plan for the given evaluations.
    #[must_use]
    pub fn new(evalids: Vec<i64>) -> Self {
        Self {
            evalids,
            states: None,
            counties: None,
            plot_cns: None,
            include_strata: true,
        }
    }

    /// Restrict to states.
    #[must_use]
    pub fn with_states(mut self, states: Vec<i64>) -> Self {
        self.states = Some(states);
        self
    }

    /// Restrict to counties.
    #[must_use]
    pub fn with_counties(mut self, counties: Vec<i64>) -> Self {
        self.counties = Some(counties);
        self
    }

    /// Restrict to spatially-selected plot CNs.
    #[must_use]
    pub fn with_plot_cns(mut self, cns: Vec<i64>) -> Self {
        self.plot_cns = Some(cns);
        self
    }

    /// Join the stratum assignment (default true).
    #[must_use]
    pub const fn include_strata(mut self, include: bool) -> Self {
        self.include_strata = include;
        self
    }

    /// Build the plan.
    pub fn build(self) -> Result<QueryPlan> {
        let mut plan = QueryPlan::new();
        plan.tables.insert("PLOT".to_string());
        for name in [
            "CN",
            "STATECD",
            "COUNTYCD",
            "INVYR",
            "MACRO_BREAKPOINT_DIA",
            "PLOT_STATUS_CD",
            "REMPER",
        ] {
            plan.columns.push(QueryColumn::required(name, "PLOT"));
        }

        if self.include_strata {
            plan.tables.insert("POP_PLOT_STRATUM_ASSGN".to_string());
            for name in ["PLT_CN", "STRATUM_CN", "EVALID"] {
                plan.columns
                    .push(QueryColumn::required(name, "POP_PLOT_STRATUM_ASSGN"));
            }
            plan.joins.push(QueryJoin {
                left: "PLOT".to_string(),
                right: "POP_PLOT_STRATUM_ASSGN".to_string(),
                left_on: vec!["CN".to_string()],
                right_on: vec!["PLT_CN".to_string()],
                how: JoinHow::Inner,
                strategy: JoinStrategy::Auto,
            });
            if !self.evalids.is_empty() {
                plan.filters.push(in_list_filter(
                    "POP_PLOT_STRATUM_ASSGN",
                    "EVALID",
                    &self.evalids,
                )?);
            }
        }
        if let Some(states) = &self.states {
            plan.filters.push(in_list_filter("PLOT", "STATECD", states)?);
        }
        if let Some(counties) = &self.counties {
            plan.filters
                .push(in_list_filter("PLOT", "COUNTYCD", counties)?);
        }
        if let Some(cns) = &self.plot_cns {
            plan.filters.push(in_list_filter("PLOT", "CN", cns)?);
        }
        plan.estimated_rows = Some(baseline_rows("PLOT"));
        Ok(plan)
    }
}

/// The four plans of a full estimation run.
#[derive(Debug, Clone)]
pub struct EstimationPlans {
    /// Plot plan (with stratum assignment).
    pub plots: QueryPlan,
    /// Stratification plan.
    pub strata: QueryPlan,
    /// Condition plan.
    pub conditions: QueryPlan,
    /// Tree plan, absent for condition-only estimators.
    pub trees: Option<QueryPlan>,
}

/// Orchestrates the per-table builders for one estimation.
#[derive(Debug, Clone, Default)]
pub struct CompositeQueryBuilder {
    evalids: Vec<i64>,
    states: Option<Vec<i64>>,
    plot_cns: Option<Vec<i64>>,
    tree_domain: Option<DomainExpr>,
    area_domain: Option<DomainExpr>,
    tree_metric_columns: Vec<String>,
    tree_extra_columns: Vec<String>,
    cond_extra_columns: Vec<String>,
    with_trees: bool,
}

impl CompositeQueryBuilder {
    /// Start a composite build for the given evaluations.
    #[must_use]
    pub fn new(evalids: Vec<i64>) -> Self {
        Self {
            evalids,
            with_trees: true,
            ..Default::default()
        }
    }

    /// Restrict to states.
    #[must_use]
    pub fn with_states(mut self, states: Option<Vec<i64>>) -> Self {
        self.states = states;
        self
    }

    /// Restrict to spatially-selected plots.
    #[must_use]
    pub fn with_plot_cns(mut self, cns: Option<Vec<i64>>) -> Self {
        self.plot_cns = cns;
        self
    }

    /// Attach the tree domain.
    #[must_use]
    pub fn with_tree_domain(mut self, domain: Option<DomainExpr>) -> Self {
        self.tree_domain = domain;
        self
    }

    /// Attach the area domain.
    #[must_use]
    pub fn with_area_domain(mut self, domain: Option<DomainExpr>) -> Self {
        self.area_domain = domain;
        self
    }

    /// Metric columns to project from TREE.
    #[must_use]
    pub fn with_tree_metric_columns(mut self, columns: Vec<String>) -> Self {
        self.tree_metric_columns = columns;
        self
    }

    /// Extra user columns on TREE.
    #[must_use]
    pub fn with_tree_extra_columns(mut self, columns: Vec<String>) -> Self {
        self.tree_extra_columns = columns;
        self
    }

    /// Extra user columns on COND.
    #[must_use]
    pub fn with_cond_extra_columns(mut self, columns: Vec<String>) -> Self {
        self.cond_extra_columns = columns;
        self
    }

    /// Skip the tree plan (area and site-index runs).
    #[must_use]
    pub const fn with_trees(mut self, with_trees: bool) -> Self {
        self.with_trees = with_trees;
        self
    }

    /// Build all plans.
    pub fn build(self) -> Result<EstimationPlans> {
        let plots = {
            let mut builder = PlotQueryBuilder::new(self.evalids.clone());
            if let Some(states) = self.states.clone() {
                builder = builder.with_states(states);
            }
            if let Some(cns) = self.plot_cns.clone() {
                builder = builder.with_plot_cns(cns);
            }
            builder.build()?
        };

        let strata = StratificationQueryBuilder::new(self.evalids.clone()).build()?;

        let conditions = {
            let mut builder = ConditionQueryBuilder::new()
                .with_extra_columns(self.cond_extra_columns.clone());
            if let Some(domain) = self.area_domain.clone() {
                builder = builder.with_domain(domain);
            }
            builder.build()?
        };

        let trees = if self.with_trees {
            let mut builder = TreeQueryBuilder::new()
                .with_metric_columns(self.tree_metric_columns.clone())
                .with_extra_columns(self.tree_extra_columns.clone());
            if let Some(domain) = self.tree_domain.clone() {
                builder = builder.with_domain(domain);
            }
            Some(builder.build()?)
        } else {
            None
        };

        Ok(EstimationPlans {
            plots,
            strata,
            conditions,
            trees,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::FilterOp;

    #[test]
    fn test_stratification_builder() {
        let plan = StratificationQueryBuilder::new(vec![132301])
            .with_states(vec![13])
            .build()
            .unwrap();
        assert!(plan.tables.contains("POP_STRATUM"));
        assert_eq!(plan.filters.len(), 2);
        assert!(plan
            .columns
            .iter()
            .any(|c| c.name == "ADJ_FACTOR_MACR"));
        assert!(plan.columns.iter().any(|c| c.name == "P2POINTCNT"));

        let bare = StratificationQueryBuilder::new(vec![132301])
            .with_adjustment_factors(false)
            .build()
            .unwrap();
        assert!(!bare.columns.iter().any(|c| c.name == "ADJ_FACTOR_SUBP"));

        assert!(StratificationQueryBuilder::new(vec![]).build().is_err());
    }

    #[test]
    fn test_tree_builder_domain_split() {
        let domain =
            DomainExpr::parse("STATUSCD == 1 AND DIA >= 5.0 AND (SPCD == 131 OR SPCD == 110)")
                .unwrap();
        let plan = TreeQueryBuilder::new()
            .with_domain(domain)
            .exclude_seedlings(true)
            .build()
            .unwrap();

        // Three conjuncts plus the seedling exclusion.
        assert_eq!(plan.filters.len(), 4);
        let pushed = plan.pushed_filters("TREE");
        assert_eq!(pushed.len(), 3);
        assert_eq!(plan.residual_filters().len(), 1);
        assert_eq!(plan.residual_filters()[0].op, FilterOp::Compound);
    }

    #[test]
    fn test_tree_builder_projection() {
        let plan = TreeQueryBuilder::new()
            .with_metric_columns(vec!["VOLCFNET".to_string()])
            .with_extra_columns(vec!["TREECLCD".to_string()])
            .build()
            .unwrap();
        let projection = plan.projection("TREE");
        for required in ["PLT_CN", "CONDID", "SPCD", "DIA", "STATUSCD", "TPA_UNADJ", "VOLCFNET"] {
            assert!(projection.contains(&required.to_string()), "{required}");
        }
        assert!(projection.contains(&"TREECLCD".to_string()));
    }

    #[test]
    fn test_condition_builder() {
        let domain = DomainExpr::parse("OWNGRPCD == 40").unwrap();
        let plan = ConditionQueryBuilder::new()
            .with_domain(domain)
            .with_reserved(0)
            .build()
            .unwrap();
        assert!(plan.tables.contains("COND"));
        assert_eq!(plan.filters.len(), 2);
        assert!(plan.projection("COND").contains(&"PROP_BASIS".to_string()));
    }

    #[test]
    fn test_plot_builder_with_strata() {
        let plan = PlotQueryBuilder::new(vec![132301]).build().unwrap();
        assert!(plan.tables.contains("POP_PLOT_STRATUM_ASSGN"));
        assert_eq!(plan.joins.len(), 1);
        assert_eq!(plan.joins[0].how, JoinHow::Inner);
        assert_eq!(
            plan.pushed_filters("POP_PLOT_STRATUM_ASSGN").len(),
            1
        );

        let bare = PlotQueryBuilder::new(vec![])
            .include_strata(false)
            .build()
            .unwrap();
        assert!(bare.joins.is_empty());
    }

    #[test]
    fn test_composite_builder() {
        let plans = CompositeQueryBuilder::new(vec![132301])
            .with_states(Some(vec![13]))
            .with_tree_domain(Some(DomainExpr::parse("STATUSCD == 1").unwrap()))
            .with_tree_metric_columns(vec!["VOLCFNET".to_string()])
            .build()
            .unwrap();
        assert!(plans.trees.is_some());
        assert!(plans.plots.tables.contains("PLOT"));
        assert!(plans.strata.tables.contains("POP_STRATUM"));
        assert!(plans.conditions.tables.contains("COND"));

        let area_only = CompositeQueryBuilder::new(vec![132301])
            .with_trees(false)
            .build()
            .unwrap();
        assert!(area_only.trees.is_none());
    }

    #[test]
    fn test_estimated_rows_shrink_with_filters() {
        let unfiltered = TreeQueryBuilder::new().build().unwrap();
        let filtered = TreeQueryBuilder::new()
            .with_domain(DomainExpr::parse("STATUSCD == 1").unwrap())
            .build()
            .unwrap();
        assert!(filtered.estimated_rows.unwrap() < unfiltered.estimated_rows.unwrap());
    }
}
