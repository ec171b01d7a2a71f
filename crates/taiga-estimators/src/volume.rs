//! Standing-volume estimator.

use polars::prelude::*;
use taiga_traits::codes::MetricFamily;
use taiga_traits::config::{EstimatorConfigV2, ModuleConfig, VolumeOptions};
use taiga_traits::{Result, WarningSink};

use taiga_db::Fia;

use crate::pipeline::Estimator;
use crate::tree_metric::{run_tree_metric, TreeMetricSpec};

/// Standing-volume estimator.
///
/// `vol_type` selects the source column (`VOLCFNET`, `VOLCFGRS`,
/// `VOLCFSND`, `VOLCSNET`); `tree_type = gs` restricts to live growing
/// stock the way the published growing-stock tables do.
#[derive(Debug, Clone)]
pub struct VolumeEstimator {
    config: EstimatorConfigV2,
}

impl VolumeEstimator {
    /// New estimator over the given config.
    #[must_use]
    pub const fn new(config: EstimatorConfigV2) -> Self {
        Self { config }
    }

    fn options(&self) -> VolumeOptions {
        match &self.config.module {
            ModuleConfig::Volume(options) => options.clone(),
            _ => VolumeOptions::default(),
        }
    }
}

impl Estimator for VolumeEstimator {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn metric(&self) -> MetricFamily {
        MetricFamily::Volume
    }

    fn estimate(&self, fia: &Fia) -> Result<DataFrame> {
        let warnings = WarningSink::new();
        let options = self.options();
        let column = options.vol_type.column();
        let spec = TreeMetricSpec {
            name: "volume",
            metric: MetricFamily::Volume,
            metric_columns: vec![column.to_string()],
            per_acre_name: Some(format!("{column}_ACRE")),
            total_name: format!("{column}_TOTAL"),
        };
        let metric = col(column).fill_null(lit(0.0));
        run_tree_metric(fia, &self.config.base, &spec, metric, &warnings)
    }
}

/// Estimate standing volume for the active evaluation.
pub fn volume(fia: &Fia, config: &EstimatorConfigV2) -> Result<DataFrame> {
    VolumeEstimator::new(config.clone()).estimate(fia)
}
