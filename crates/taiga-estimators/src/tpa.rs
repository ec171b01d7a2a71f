//! Trees-per-acre and tree-count estimators.

use polars::prelude::*;
use taiga_traits::codes::MetricFamily;
use taiga_traits::config::EstimatorConfig;
use taiga_traits::{Result, WarningSink};

use taiga_db::Fia;

use crate::pipeline::Estimator;
use crate::tree_metric::{run_tree_metric, TreeMetricSpec};

/// Trees-per-acre estimator.
///
/// The per-tree metric is 1; `TPA_UNADJ` carries the count weight, so the
/// expanded numerator is the population tree count and the ratio against
/// the land base is trees per acre.
#[derive(Debug, Clone)]
pub struct TpaEstimator {
    config: EstimatorConfig,
}

impl TpaEstimator {
    /// New estimator over the given config.
    #[must_use]
    pub const fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }
}

impl Estimator for TpaEstimator {
    fn name(&self) -> &'static str {
        "tpa"
    }

    fn metric(&self) -> MetricFamily {
        MetricFamily::Tpa
    }

    fn estimate(&self, fia: &Fia) -> Result<DataFrame> {
        let warnings = WarningSink::new();
        let spec = TreeMetricSpec {
            name: "tpa",
            metric: MetricFamily::Tpa,
            metric_columns: vec![],
            per_acre_name: Some("TPA".to_string()),
            total_name: "TPA_TOTAL".to_string(),
        };
        run_tree_metric(fia, &self.config, &spec, lit(1.0), &warnings)
    }
}

/// Expanded tree-count estimator: the same numerator as TPA, reported as
/// a population total only.
#[derive(Debug, Clone)]
pub struct TreeCountEstimator {
    config: EstimatorConfig,
}

impl TreeCountEstimator {
    /// New estimator over the given config.
    #[must_use]
    pub const fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }
}

impl Estimator for TreeCountEstimator {
    fn name(&self) -> &'static str {
        "tree_count"
    }

    fn metric(&self) -> MetricFamily {
        MetricFamily::TreeCount
    }

    fn estimate(&self, fia: &Fia) -> Result<DataFrame> {
        let warnings = WarningSink::new();
        let spec = TreeMetricSpec {
            name: "tree_count",
            metric: MetricFamily::TreeCount,
            metric_columns: vec![],
            per_acre_name: None,
            total_name: "TREE_COUNT".to_string(),
        };
        run_tree_metric(fia, &self.config, &spec, lit(1.0), &warnings)
    }
}

/// Estimate trees per acre (and totals) for the active evaluation.
pub fn tpa(fia: &Fia, config: &EstimatorConfig) -> Result<DataFrame> {
    TpaEstimator::new(config.clone()).estimate(fia)
}

/// Estimate the expanded population tree count.
pub fn tree_count(fia: &Fia, config: &EstimatorConfig) -> Result<DataFrame> {
    TreeCountEstimator::new(config.clone()).estimate(fia)
}
