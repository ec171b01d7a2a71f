//! Biomass and carbon estimators.
//!
//! Biomass sums the selected `DRYBIO_*` components (pounds) and reports
//! short tons by default. Carbon multiplies the total biomass by the
//! configured carbon fraction (IPCC 0.47); setting
//! `extra_params["carbon_method"] = "columns"` switches to the published
//! `CARBON_AG + CARBON_BG` component columns instead, which tracks the
//! EVALIDator values within about 2%.

use polars::prelude::*;
use taiga_traits::codes::{MetricFamily, LBS_PER_TON};
use taiga_traits::config::{
    BiomassComponent, BiomassOptions, BiomassUnits, EstimatorConfigV2, ModuleConfig,
};
use taiga_traits::{Result, WarningSink};

use taiga_db::Fia;

use crate::pipeline::Estimator;
use crate::tree_metric::{run_tree_metric, TreeMetricSpec};

/// Pounds to kilograms.
const LBS_TO_KG: f64 = 0.453_592_37;

fn options_of(config: &EstimatorConfigV2) -> BiomassOptions {
    match &config.module {
        ModuleConfig::Biomass(options) => options.clone(),
        _ => BiomassOptions::default(),
    }
}

fn component_columns(options: &BiomassOptions) -> Vec<String> {
    let mut columns: Vec<String> = options
        .component
        .columns()
        .iter()
        .map(|c| (*c).to_string())
        .collect();
    if options.include_foliage && options.component != BiomassComponent::Foliage {
        columns.push("DRYBIO_FOLIAGE".to_string());
    }
    columns
}

fn biomass_metric(options: &BiomassOptions) -> Expr {
    let mut sum: Option<Expr> = None;
    for column in component_columns(options) {
        let term = col(column.as_str()).fill_null(lit(0.0));
        sum = Some(match sum {
            Some(acc) => acc + term,
            None => term,
        });
    }
    let pounds = sum.unwrap_or_else(|| lit(0.0));
    match options.units {
        BiomassUnits::Tons => pounds / lit(LBS_PER_TON),
        BiomassUnits::Kg => pounds * lit(LBS_TO_KG),
    }
}

/// Standing-biomass estimator.
#[derive(Debug, Clone)]
pub struct BiomassEstimator {
    config: EstimatorConfigV2,
}

impl BiomassEstimator {
    /// New estimator over the given config.
    #[must_use]
    pub const fn new(config: EstimatorConfigV2) -> Self {
        Self { config }
    }
}

impl Estimator for BiomassEstimator {
    fn name(&self) -> &'static str {
        "biomass"
    }

    fn metric(&self) -> MetricFamily {
        MetricFamily::Biomass
    }

    fn estimate(&self, fia: &Fia) -> Result<DataFrame> {
        let warnings = WarningSink::new();
        let options = options_of(&self.config);
        let spec = TreeMetricSpec {
            name: "biomass",
            metric: MetricFamily::Biomass,
            metric_columns: component_columns(&options),
            per_acre_name: Some("BIO_ACRE".to_string()),
            total_name: "BIO_TOTAL".to_string(),
        };
        let metric = biomass_metric(&options);
        run_tree_metric(fia, &self.config.base, &spec, metric, &warnings)
    }
}

/// Carbon-stock estimator.
#[derive(Debug, Clone)]
pub struct CarbonEstimator {
    config: EstimatorConfigV2,
}

impl CarbonEstimator {
    /// New estimator over the given config.
    #[must_use]
    pub const fn new(config: EstimatorConfigV2) -> Self {
        Self { config }
    }

    fn use_carbon_columns(&self) -> bool {
        self.config
            .base
            .extra_params
            .get("carbon_method")
            .and_then(serde_json::Value::as_str)
            == Some("columns")
    }
}

impl Estimator for CarbonEstimator {
    fn name(&self) -> &'static str {
        "carbon"
    }

    fn metric(&self) -> MetricFamily {
        MetricFamily::Carbon
    }

    fn estimate(&self, fia: &Fia) -> Result<DataFrame> {
        let warnings = WarningSink::new();
        let options = options_of(&self.config);

        let (metric_columns, metric) = if self.use_carbon_columns() {
            let metric = (col("CARBON_AG").fill_null(lit(0.0))
                + col("CARBON_BG").fill_null(lit(0.0)))
                / lit(LBS_PER_TON);
            (
                vec!["CARBON_AG".to_string(), "CARBON_BG".to_string()],
                metric,
            )
        } else {
            // Biomass components scaled by the carbon fraction.
            let total = BiomassOptions {
                component: BiomassComponent::Total,
                ..options.clone()
            };
            (
                component_columns(&total),
                biomass_metric(&total) * lit(options.carbon_fraction),
            )
        };

        let spec = TreeMetricSpec {
            name: "carbon",
            metric: MetricFamily::Carbon,
            metric_columns,
            per_acre_name: Some("CARB_ACRE".to_string()),
            total_name: "CARB_TOTAL".to_string(),
        };
        run_tree_metric(fia, &self.config.base, &spec, metric, &warnings)
    }
}

/// Estimate standing biomass for the active evaluation.
pub fn biomass(fia: &Fia, config: &EstimatorConfigV2) -> Result<DataFrame> {
    BiomassEstimator::new(config.clone()).estimate(fia)
}

/// Estimate carbon stock for the active evaluation.
pub fn carbon(fia: &Fia, config: &EstimatorConfigV2) -> Result<DataFrame> {
    CarbonEstimator::new(config.clone()).estimate(fia)
}
