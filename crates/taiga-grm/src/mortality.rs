//! Annual-mortality estimator.

use polars::prelude::DataFrame;
use taiga_traits::codes::MetricFamily;
use taiga_traits::config::{
    EstimatorConfigV2, ModuleConfig, MortalityMeasure, MortalityOptions,
};
use taiga_traits::{Result, WarningSink};

use taiga_db::Fia;
use taiga_estimators::Estimator;

use crate::common::{GrmKind, GrmMeasure};
use crate::rate::{join_measure_outputs, run_annual_rate};

/// Components counted as mortality.
pub const MORTALITY_COMPONENTS: [&str; 2] = ["MORTALITY1", "MORTALITY2"];

/// Annual-mortality estimator over `TREE_GRM_COMPONENT`.
///
/// Trees whose component is `MORTALITY1`/`MORTALITY2` contribute their
/// annualized `SUBP_TPAMORT_UNADJ_*` weight times the measure value from
/// the midpoint table; everything else contributes zero without being
/// dropped.
#[derive(Debug, Clone)]
pub struct MortalityEstimator {
    config: EstimatorConfigV2,
}

impl MortalityEstimator {
    /// New estimator over the given config.
    #[must_use]
    pub const fn new(config: EstimatorConfigV2) -> Self {
        Self { config }
    }

    fn options(&self) -> MortalityOptions {
        match &self.config.module {
            ModuleConfig::Mortality(options) => options.clone(),
            _ => MortalityOptions::default(),
        }
    }

    fn run_measure(&self, fia: &Fia, measure: GrmMeasure) -> Result<DataFrame> {
        let warnings = WarningSink::new();
        let options = self.options();
        let extra_groups = self.config.group_columns();
        let base_groups = self.config.base.group_columns();
        let module_groups: Vec<String> = extra_groups
            .into_iter()
            .filter(|c| !base_groups.contains(c))
            .collect();
        run_annual_rate(
            fia,
            &self.config.base,
            GrmKind::Mortality,
            measure,
            &MORTALITY_COMPONENTS,
            &module_groups,
            options.variance_method,
            &warnings,
        )
    }
}

impl Estimator for MortalityEstimator {
    fn name(&self) -> &'static str {
        "mortality"
    }

    fn metric(&self) -> MetricFamily {
        MetricFamily::Mortality
    }

    fn estimate(&self, fia: &Fia) -> Result<DataFrame> {
        let options = self.options();
        match options.mortality_type {
            MortalityMeasure::Tpa => self.run_measure(fia, GrmMeasure::Tpa),
            MortalityMeasure::Volume => self.run_measure(fia, GrmMeasure::Volume),
            MortalityMeasure::Biomass => self.run_measure(fia, GrmMeasure::Biomass),
            MortalityMeasure::Carbon => self.run_measure(fia, GrmMeasure::Carbon),
            MortalityMeasure::Sawlog => self.run_measure(fia, GrmMeasure::Sawlog),
            MortalityMeasure::Both => {
                let tpa = self.run_measure(fia, GrmMeasure::Tpa)?;
                let volume = self.run_measure(fia, GrmMeasure::Volume)?;
                let group_cols: Vec<String> = self
                    .config
                    .group_columns()
                    .into_iter()
                    .filter(|c| tpa.column(c).is_ok())
                    .collect();
                join_measure_outputs(tpa, volume, &group_cols)
            }
        }
    }
}

/// Estimate annual mortality for the active evaluation.
pub fn mortality(fia: &Fia, config: &EstimatorConfigV2) -> Result<DataFrame> {
    MortalityEstimator::new(config.clone()).estimate(fia)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimator_identity() {
        let estimator = MortalityEstimator::new(EstimatorConfigV2::default());
        assert_eq!(estimator.name(), "mortality");
        assert_eq!(estimator.metric(), MetricFamily::Mortality);
        assert_eq!(
            estimator.options().mortality_type,
            MortalityMeasure::Tpa
        );
    }

    #[test]
    fn test_component_set() {
        assert_eq!(MORTALITY_COMPONENTS, ["MORTALITY1", "MORTALITY2"]);
    }
}
