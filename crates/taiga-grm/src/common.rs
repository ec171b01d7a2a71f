//! Shared GRM machinery.
//!
//! The three annual-rate estimators consume `TREE_GRM_COMPONENT` joined
//! with the midpoint/beginning value tables and the stratification. The
//! per-land-use column family is selected by `(tree class, land type)`,
//! the adjustment comes from the `SUBP_SUBPTYP_GRM_*` code (0 keeps the
//! row and zeroes the contribution), and the `SUBP_TPA*_UNADJ_*` columns
//! are already annualized, so no remeasurement-period division happens
//! outside the growth differencing.

use std::str::FromStr;

use polars::prelude::*;
use taiga_traits::codes::MetricFamily;
use taiga_traits::config::{EstimatorConfig, LandType, TreeClass, TreeType};
use taiga_traits::{Result, TaigaError, WarningSink};

use taiga_db::Fia;
use taiga_estimation::{
    condition_adjustment_expr, condition_value_expr, grm_adjustment_expr, land_type_indicator,
    resolve_group_columns, rollup_condition_to_plot, size_class_expr, total_phase2_plots, LazyPlan,
};
use taiga_estimators::support::{lower_table, resolve_evalids, schema_names};
use taiga_query::{
    ConditionQueryBuilder, JoinOptimizer, PlotQueryBuilder, StratificationQueryBuilder,
};

/// Which annual rate an estimator computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrmKind {
    /// Net annual growth.
    Growth,
    /// Annual mortality.
    Mortality,
    /// Annual removals.
    Removals,
}

impl GrmKind {
    /// Output column prefix.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Growth => "GROW",
            Self::Mortality => "MORT",
            Self::Removals => "REMV",
        }
    }

    /// The metric family driving evaluation resolution.
    #[must_use]
    pub const fn metric(self) -> MetricFamily {
        match self {
            Self::Growth => MetricFamily::Growth,
            Self::Mortality => MetricFamily::Mortality,
            Self::Removals => MetricFamily::Removals,
        }
    }

    const fn tpa_stem(self) -> &'static str {
        match self {
            Self::Growth => "TPAGROW",
            Self::Mortality => "TPAMORT",
            Self::Removals => "TPAREMV",
        }
    }
}

/// What a GRM estimate measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrmMeasure {
    /// Trees per acre per year.
    Tpa,
    /// Net cubic-foot volume per year.
    Volume,
    /// Aboveground biomass tons per year.
    Biomass,
    /// Carbon tons per year.
    Carbon,
    /// Sawlog volume per year.
    Sawlog,
}

impl GrmMeasure {
    /// Output column stem.
    #[must_use]
    pub const fn stem(self) -> &'static str {
        match self {
            Self::Tpa => "TPA",
            Self::Volume => "VOL",
            Self::Biomass => "BIO",
            Self::Carbon => "CARB",
            Self::Sawlog => "SAW",
        }
    }

    /// The midpoint/beginning table column carrying the measure, if any.
    #[must_use]
    pub const fn source_column(self) -> Option<&'static str> {
        match self {
            Self::Tpa => None,
            Self::Volume => Some("VOLCFNET"),
            Self::Sawlog => Some("VOLCSNET"),
            Self::Biomass | Self::Carbon => Some("DRYBIO_AG"),
        }
    }

    /// Scale from the raw source column to the reported units.
    #[must_use]
    pub const fn scale(self) -> f64 {
        match self {
            Self::Tpa | Self::Volume | Self::Sawlog => 1.0,
            Self::Biomass => 1.0 / 2000.0,
            Self::Carbon => 0.47 / 2000.0,
        }
    }
}

impl FromStr for GrmMeasure {
    type Err = TaigaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tpa" => Ok(Self::Tpa),
            "volume" => Ok(Self::Volume),
            "biomass" => Ok(Self::Biomass),
            "carbon" => Ok(Self::Carbon),
            "sawlog" => Ok(Self::Sawlog),
            other => Err(TaigaError::InvalidConfig(format!(
                "invalid GRM measure '{other}'"
            ))),
        }
    }
}

/// The per-land-use column family selected for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrmColumns {
    /// Component classification column.
    pub component: String,
    /// Annualized TPA column.
    pub tpa: String,
    /// Adjustment-basis code column.
    pub subptyp: String,
}

/// Select the `SUBP_*` column family from the tree class and land type:
/// growing stock picks the `GS` family, everything else `AL`; the timber
/// land base picks `TIMBER`, everything else `FOREST`.
#[must_use]
pub fn grm_columns(kind: GrmKind, config: &EstimatorConfig) -> GrmColumns {
    let class = if config.tree_type == TreeType::Gs
        || matches!(config.tree_class, TreeClass::GrowingStock | TreeClass::Timber)
    {
        "GS"
    } else {
        "AL"
    };
    let land = if config.land_type == LandType::Timber {
        "TIMBER"
    } else {
        "FOREST"
    };
    GrmColumns {
        component: format!("SUBP_COMPONENT_{class}_{land}"),
        tpa: format!("SUBP_{}_UNADJ_{class}_{land}", kind.tpa_stem()),
        subptyp: format!("SUBP_SUBPTYP_GRM_{class}_{land}"),
    }
}

/// Everything a GRM estimator needs after loading.
pub struct GrmContext {
    /// Joined GRM frame with `MEASURE_MIDPT`/`MEASURE_BEGIN` attached.
    pub frame: LazyFrame,
    /// Denominator plot values (the land base).
    pub den_values: DataFrame,
    /// Stratum design frame.
    pub strata: DataFrame,
    /// Phase-2 plot count.
    pub n_plots: i64,
    /// Resolved grouping columns.
    pub group_cols: Vec<String>,
    /// The selected column family.
    pub columns: GrmColumns,
}

impl std::fmt::Debug for GrmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrmContext")
            .field("n_plots", &self.n_plots)
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Load and join the GRM frames for one run.
pub fn load_grm(
    fia: &Fia,
    config: &EstimatorConfig,
    kind: GrmKind,
    measure: GrmMeasure,
    extra_group_cols: &[String],
    warnings: &WarningSink,
) -> Result<GrmContext> {
    let evalids = resolve_evalids(fia, kind.metric())?;
    let columns = grm_columns(kind, config);

    let mut requested = config.group_columns();
    for extra in extra_group_cols {
        if !requested.contains(extra) {
            requested.push(extra.clone());
        }
    }

    let grm_schema = schema_names(fia, "TREE_GRM_COMPONENT")?;
    for needed in [&columns.component, &columns.tpa, &columns.subptyp] {
        if !grm_schema.contains(needed) {
            return Err(TaigaError::MissingColumn(format!(
                "TREE_GRM_COMPONENT.{needed}"
            )));
        }
    }

    // Stratification and plot assignment.
    let mut plot_plan = {
        let mut builder = PlotQueryBuilder::new(evalids.clone());
        if let Some(states) = fia.states() {
            builder = builder.with_states(states.to_vec());
        }
        if let Some(cns) = fia.plot_cns() {
            builder = builder.with_plot_cns(cns.to_vec());
        }
        builder.build()?
    };
    let mut strata_plan = StratificationQueryBuilder::new(evalids.clone()).build()?;
    let mut cond_plan = ConditionQueryBuilder::new().build()?;
    JoinOptimizer::optimize(&mut plot_plan);
    JoinOptimizer::optimize(&mut strata_plan);
    JoinOptimizer::optimize(&mut cond_plan);

    let strata = fia
        .cached_plan_frame(strata_plan.cache_key(), || {
            Ok(lower_table(fia, &strata_plan, "POP_STRATUM")?.collect()?)
        })?
        .as_ref()
        .clone();
    if strata.is_empty() {
        return Err(TaigaError::NoData(format!(
            "no strata for EVALID {evalids:?}"
        )));
    }
    let plot_stratum = lower_table(fia, &plot_plan, "POP_PLOT_STRATUM_ASSGN")?
        .join(
            lower_table(fia, &plot_plan, "PLOT")?,
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

    let strata_adj = strata.clone().lazy().select([
        col("CN").alias("STRATUM_CN_KEY"),
        col("ADJ_FACTOR_SUBP"),
        col("ADJ_FACTOR_MICR"),
        col("ADJ_FACTOR_MACR"),
    ]);

    // GRM component scan plus the measure columns from MIDPT and BEGIN.
    let grm_projection = vec![
        "TRE_CN".to_string(),
        "PLT_CN".to_string(),
        columns.component.clone(),
        columns.tpa.clone(),
        columns.subptyp.clone(),
    ];
    let mut frame = fia.scan_table("TREE_GRM_COMPONENT", Some(&grm_projection), None)?;

    match measure.source_column() {
        Some(source) => {
            let midpt = fia.scan_table(
                "TREE_GRM_MIDPT",
                Some(&["TRE_CN".to_string(), source.to_string()]),
                None,
            )?;
            frame = frame.join(
                midpt.select([col("TRE_CN"), col(source).alias("MEASURE_MIDPT")]),
                [col("TRE_CN")],
                [col("TRE_CN")],
                JoinArgs::new(JoinType::Left),
            );
            let begin = fia.scan_table(
                "TREE_GRM_BEGIN",
                Some(&["TRE_CN".to_string(), source.to_string()]),
                None,
            )?;
            frame = frame.join(
                begin.select([col("TRE_CN"), col(source).alias("MEASURE_BEGIN")]),
                [col("TRE_CN")],
                [col("TRE_CN")],
                JoinArgs::new(JoinType::Left),
            );
        }
        None => {
            frame = frame
                .with_column(lit(1.0).alias("MEASURE_MIDPT"))
                .with_column(lit(1.0).alias("MEASURE_BEGIN"));
        }
    }

    // Tree attributes for species, size-class, and agent grouping.
    let tree_schema = schema_names(fia, "TREE")?;
    let mut tree_projection = vec![
        "CN".to_string(),
        "CONDID".to_string(),
        "SPCD".to_string(),
        "DIA".to_string(),
    ];
    for column in &requested {
        if tree_schema.contains(column) && !tree_projection.contains(column) {
            tree_projection.push(column.clone());
        }
    }
    let tree = fia.scan_table("TREE", Some(&tree_projection), None)?;
    frame = frame.join(
        tree,
        [col("TRE_CN")],
        [col("CN")],
        JoinArgs::new(JoinType::Left),
    );

    // Condition attributes (disturbance, ownership) when requested.
    let cond_schema = schema_names(fia, "COND")?;
    let cond_group_cols: Vec<String> = requested
        .iter()
        .filter(|c| {
            cond_schema.contains(*c)
                && !tree_schema.contains(*c)
                && !grm_schema.contains(*c)
        })
        .cloned()
        .collect();
    if !cond_group_cols.is_empty() {
        let mut projection = vec!["PLT_CN".to_string(), "CONDID".to_string()];
        projection.extend(cond_group_cols.iter().cloned());
        let cond_attrs = fia.scan_table("COND", Some(&projection), None)?;
        frame = frame.join(
            cond_attrs,
            [col("PLT_CN"), col("CONDID")],
            [col("PLT_CN"), col("CONDID")],
            JoinArgs::new(JoinType::Left),
        );
    }
    frame = frame
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

    if config.by_size_class {
        frame = frame.with_column(size_class_expr("DIA", config.size_class_labels));
    }

    // Resolve grouping columns against what the joined frame can serve.
    let mut available: Vec<String> = vec!["SPCD".to_string(), "SIZE_CLASS".to_string()];
    available.extend(grm_schema.iter().cloned());
    available.extend(tree_schema.iter().cloned());
    available.extend(cond_schema.iter().cloned());
    available.extend(schema_names(fia, "PLOT")?);
    available.push("COMPONENT".to_string());
    let group_cols = resolve_group_columns(&requested, &available, warnings);

    // Denominator: the land base under the same evaluation.
    let land_type = config.land_type;
    let den_frame = lower_table(fia, &cond_plan, "COND")?
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
        )
        .with_column(condition_adjustment_expr())
        .with_column(land_type_indicator(land_type).alias(taiga_estimation::DOMAIN_IND))
        .with_column(condition_value_expr());
    let den_values = LazyPlan::new(
        rollup_condition_to_plot(den_frame, &[]),
        config.lazy.collection_strategy,
    )
    .collect(&config.lazy)?;

    let n_plots = total_phase2_plots(&strata)?;

    Ok(GrmContext {
        frame,
        den_values,
        strata,
        n_plots,
        group_cols,
        columns,
    })
}

/// Membership indicator over the component column.
#[must_use]
pub fn component_indicator(component_column: &str, members: &[&str]) -> Expr {
    let values: Vec<String> = members.iter().map(|m| (*m).to_string()).collect();
    let series = Series::new("".into(), values);
    when(col(component_column).is_in(lit(series)).fill_null(lit(false)))
        .then(lit(1.0))
        .otherwise(lit(0.0))
}

/// The per-tree GRM value for mortality/removals:
/// `TPA_annual · ADJ · measure · indicator` (no REMPER division).
#[must_use]
pub fn annual_rate_value(columns: &GrmColumns, measure: GrmMeasure, members: &[&str]) -> Expr {
    let measure_expr = col("MEASURE_MIDPT").fill_null(lit(0.0)) * lit(measure.scale());
    (col(columns.tpa.as_str()).fill_null(lit(0.0))
        * col(taiga_estimation::adjustment::ADJ_FACTOR)
        * measure_expr
        * component_indicator(&columns.component, members))
    .fill_null(lit(0.0))
    .alias(taiga_estimation::aggregation::TREE_VALUE)
}

/// Attach the GRM adjustment to a context frame.
#[must_use]
pub fn with_grm_adjustment(frame: LazyFrame, columns: &GrmColumns) -> LazyFrame {
    frame.with_column(grm_adjustment_expr(&columns.subptyp))
}
