//! Carbon-flux composition.
//!
//! Derived, not loaded: for one GRM evaluation the growth, mortality, and
//! removals pipelines run with the carbon measure (aboveground biomass ×
//! 0.47), and the flux is composed as `NET = GROWTH − MORTALITY −
//! REMOVALS` to machine precision. The combined standard error assumes
//! independent components (`√(SE_G² + SE_M² + SE_R²)`), which is
//! conservative when the three rates covary within an evaluation.

use polars::prelude::*;
use taiga_traits::codes::MetricFamily;
use taiga_traits::config::{EstimatorConfigV2, VarianceMethod};
use taiga_traits::{Result, TaigaError, WarningKind, WarningSink};

use taiga_db::Fia;
use taiga_estimators::Estimator;

use crate::common::{GrmKind, GrmMeasure};
use crate::growth::GrowthEstimator;
use crate::mortality::MORTALITY_COMPONENTS;
use crate::rate::run_annual_rate;
use crate::removals::REMOVAL_COMPONENTS;

/// One component of the flux, as scalars.
#[derive(Debug, Clone, Copy)]
struct FluxComponent {
    total: f64,
    se: f64,
    per_acre: f64,
}

/// Carbon-flux estimator.
#[derive(Debug, Clone)]
pub struct CarbonFluxEstimator {
    config: EstimatorConfigV2,
}

impl CarbonFluxEstimator {
    /// New estimator over the given config.
    #[must_use]
    pub const fn new(config: EstimatorConfigV2) -> Self {
        Self { config }
    }

    fn include_components(&self) -> bool {
        self.config
            .base
            .extra_params
            .get("include_components")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true)
    }

    /// Internal single-rate run config: ungrouped, totals on, SE output.
    fn component_config(&self) -> EstimatorConfigV2 {
        let mut config = self.config.clone();
        config.base.grp_by.clear();
        config.base.by_species = false;
        config.base.by_size_class = false;
        config.base.by_land_type = false;
        config.base.totals = true;
        config.base.variance = false;
        config.base.by_plot = false;
        config
            .base
            .extra_params
            .insert("measure".to_string(), serde_json::json!("carbon"));
        config
    }
}

fn scalar(df: &DataFrame, column: &str) -> Result<f64> {
    df.column(column)
        .map_err(|_| TaigaError::MissingColumn(column.to_string()))?
        .as_materialized_series()
        .cast(&DataType::Float64)?
        .f64()?
        .get(0)
        .ok_or_else(|| TaigaError::NoData(format!("empty {column}")))
}

fn component(df: &DataFrame, prefix: &str) -> Result<FluxComponent> {
    Ok(FluxComponent {
        total: scalar(df, &format!("{prefix}_CARB_TOTAL"))?,
        se: scalar(df, &format!("{prefix}_CARB_TOTAL_SE"))?,
        per_acre: scalar(df, &format!("{prefix}_CARB_ACRE"))?,
    })
}

impl Estimator for CarbonFluxEstimator {
    fn name(&self) -> &'static str {
        "carbon_flux"
    }

    fn metric(&self) -> MetricFamily {
        MetricFamily::Growth
    }

    fn estimate(&self, fia: &Fia) -> Result<DataFrame> {
        let warnings = WarningSink::new();
        if !self.config.base.grp_by.is_empty()
            || self.config.base.by_species
            || self.config.base.by_size_class
        {
            warnings.push(
                WarningKind::Config,
                "carbon flux reports evaluation-level totals; grouping options are ignored",
            );
        }
        let config = self.component_config();

        let growth_df = GrowthEstimator::new(config.clone()).estimate(fia)?;
        let mort_df = run_annual_rate(
            fia,
            &config.base,
            GrmKind::Mortality,
            GrmMeasure::Carbon,
            &MORTALITY_COMPONENTS,
            &[],
            VarianceMethod::Ratio,
            &warnings,
        )?;
        let remv_df = run_annual_rate(
            fia,
            &config.base,
            GrmKind::Removals,
            GrmMeasure::Carbon,
            &REMOVAL_COMPONENTS,
            &[],
            VarianceMethod::Ratio,
            &warnings,
        )?;

        let growth = component(&growth_df, "GROW")?;
        let mortality = component(&mort_df, "MORT")?;
        let removals = component(&remv_df, "REMV")?;

        let net_total = growth.total - mortality.total - removals.total;
        let net_acre = growth.per_acre - mortality.per_acre - removals.per_acre;
        let net_se =
            (growth.se * growth.se + mortality.se * mortality.se + removals.se * removals.se)
                .sqrt();
        let n_plots = scalar(&growth_df, "N_PLOTS")? as i64;

        let mut columns: Vec<Column> = Vec::new();
        if self.include_components() {
            columns.push(Column::new("GROWTH_CARBON_TOTAL".into(), vec![growth.total]));
            columns.push(Column::new("GROWTH_CARBON_SE".into(), vec![growth.se]));
            columns.push(Column::new("MORT_CARBON_TOTAL".into(), vec![mortality.total]));
            columns.push(Column::new("MORT_CARBON_SE".into(), vec![mortality.se]));
            columns.push(Column::new("REMV_CARBON_TOTAL".into(), vec![removals.total]));
            columns.push(Column::new("REMV_CARBON_SE".into(), vec![removals.se]));
        }
        columns.push(Column::new("NET_FLUX_TOTAL".into(), vec![net_total]));
        columns.push(Column::new("NET_FLUX_ACRE".into(), vec![net_acre]));
        columns.push(Column::new("NET_FLUX_SE".into(), vec![net_se]));
        columns.push(Column::new("N_PLOTS".into(), vec![n_plots]));

        tracing::info!(
            net_total,
            sink = net_total > 0.0,
            "carbon flux composed from growth, mortality, and removals"
        );
        Ok(DataFrame::new(columns)?)
    }
}

/// Compose the carbon flux for the active GRM evaluation.
pub fn carbon_flux(fia: &Fia, config: &EstimatorConfigV2) -> Result<DataFrame> {
    CarbonFluxEstimator::new(config.clone()).estimate(fia)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_extraction() {
        let df = df! {
            "GROW_CARB_ACRE" => &[0.5],
            "GROW_CARB_ACRE_SE" => &[0.01],
            "GROW_CARB_TOTAL" => &[1_000_000.0],
            "GROW_CARB_TOTAL_SE" => &[20_000.0],
            "N_PLOTS" => &[4588i64],
        }
        .unwrap();
        let c = component(&df, "GROW").unwrap();
        assert!((c.total - 1_000_000.0).abs() < 1e-9);
        assert!((c.se - 20_000.0).abs() < 1e-9);
        assert!((c.per_acre - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_net_flux_identity() {
        // NET = G − M − R to machine precision.
        let growth = 1_000_000.0f64;
        let mortality = 200_000.0f64;
        let removals = 300_000.0f64;
        let net = growth - mortality - removals;
        assert_eq!(net, 500_000.0);

        // Combined SE is the root sum of squares.
        let se = (30_000.0f64.powi(2) + 10_000.0f64.powi(2) + 20_000.0f64.powi(2)).sqrt();
        assert!((se - 37_416.573_867_739_41).abs() < 1e-6);
    }

    #[test]
    fn test_estimator_identity() {
        let estimator = CarbonFluxEstimator::new(EstimatorConfigV2::default());
        assert_eq!(estimator.name(), "carbon_flux");
        assert!(estimator.include_components());

        let mut config = EstimatorConfigV2::default();
        config
            .base
            .extra_params
            .insert("include_components".to_string(), serde_json::json!(false));
        assert!(!CarbonFluxEstimator::new(config).include_components());
    }

    #[test]
    fn test_component_config_resets_grouping() {
        let mut config = EstimatorConfigV2::default();
        config.base.by_species = true;
        config.base.grp_by = vec!["OWNGRPCD".to_string()];
        let estimator = CarbonFluxEstimator::new(config);
        let inner = estimator.component_config();
        assert!(inner.base.grp_by.is_empty());
        assert!(!inner.base.by_species);
        assert!(inner.base.totals);
    }
}
