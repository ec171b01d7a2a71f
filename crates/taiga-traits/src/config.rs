//! Estimator configuration model.
//!
//! A base [`EstimatorConfig`] carries the options every estimator
//! understands; module payloads ([`ModuleConfig`]) carry the per-estimator
//! extras. A [`ConfigFactory`] adapts legacy key/value maps (camelCase or
//! snake_case) into typed configs, and conversions between the base, the
//! V2 pair, and the legacy map are total.

use std::collections::BTreeMap;
use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codes::MetricFamily;
use crate::error::{Result, TaigaError};
use crate::types::{WarningKind, WarningSink};
use crate::validation::{validate_domain_expression, validate_sql_identifier};

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* #[display($text)] $variant,)+
        }

        impl FromStr for $name {
            type Err = TaigaError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(TaigaError::InvalidConfig(format!(
                        concat!("invalid ", stringify!($name), " '{}'; expected one of: ", $($text, " ",)+),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum! {
    /// Land base the estimate is restricted to.
    LandType {
        /// Accessible forest land.
        Forest => "forest",
        /// Unreserved, productive forest land.
        Timber => "timber",
        /// All sampled land.
        All => "all",
    }
}

string_enum! {
    /// Tree status restriction.
    TreeType {
        /// Live trees.
        Live => "live",
        /// Standing dead trees.
        Dead => "dead",
        /// Growing-stock trees (live and tree class 2).
        Gs => "gs",
        /// No status restriction.
        All => "all",
    }
}

string_enum! {
    /// Tree class restriction.
    TreeClass {
        /// No restriction.
        All => "all",
        /// Growing stock.
        GrowingStock => "growing_stock",
        /// Rough or rotten culls.
        Rotten => "rotten",
        /// Timber-quality trees (requires the timber land base).
        Timber => "timber",
        /// Nonstockable trees.
        Nonstockable => "nonstockable",
    }
}

string_enum! {
    /// Temporal averaging method.
    TemporalMethod {
        /// Temporally indifferent (the published default).
        Ti => "ti",
        /// Simple moving average.
        Sma => "sma",
        /// Linear moving average.
        Lma => "lma",
        /// Exponential moving average.
        Ema => "ema",
        /// Single panel per year.
        Annual => "annual",
    }
}

string_enum! {
    /// Volume definition.
    VolType {
        /// Net cubic-foot volume.
        Net => "net",
        /// Gross cubic-foot volume.
        Gross => "gross",
        /// Sound cubic-foot volume.
        Sound => "sound",
        /// Net sawlog volume.
        Sawlog => "sawlog",
    }
}

impl VolType {
    /// The TREE column that carries this volume definition.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Net => "VOLCFNET",
            Self::Gross => "VOLCFGRS",
            Self::Sound => "VOLCFSND",
            Self::Sawlog => "VOLCSNET",
        }
    }
}

string_enum! {
    /// Volume equation family.
    VolumeEquation {
        /// National default equations.
        Default => "default",
        /// Regional equations.
        Regional => "regional",
    }
}

string_enum! {
    /// Biomass component.
    BiomassComponent {
        /// Aboveground plus belowground.
        Total => "total",
        /// Aboveground.
        Ag => "ag",
        /// Belowground.
        Bg => "bg",
        /// Merchantable bole.
        Bole => "bole",
        /// Stump.
        Stump => "stump",
        /// Branches.
        Branch => "branch",
        /// Foliage.
        Foliage => "foliage",
    }
}

impl BiomassComponent {
    /// The TREE dry-biomass columns summed for this component.
    #[must_use]
    pub const fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Total => &["DRYBIO_AG", "DRYBIO_BG"],
            Self::Ag => &["DRYBIO_AG"],
            Self::Bg => &["DRYBIO_BG"],
            Self::Bole => &["DRYBIO_BOLE"],
            Self::Stump => &["DRYBIO_STUMP"],
            Self::Branch => &["DRYBIO_BRANCH"],
            Self::Foliage => &["DRYBIO_FOLIAGE"],
        }
    }
}

string_enum! {
    /// Biomass output units.
    BiomassUnits {
        /// Short tons.
        Tons => "tons",
        /// Kilograms.
        Kg => "kg",
    }
}

string_enum! {
    /// Growth accounting definition.
    GrowthType {
        /// Net growth (survivor growth plus ingrowth).
        Net => "net",
        /// Gross growth.
        Gross => "gross",
        /// Per-component reporting.
        Component => "component",
    }
}

string_enum! {
    /// Basis for area estimates.
    AreaBasis {
        /// Condition proportions.
        Condition => "condition",
        /// All land.
        Land => "land",
        /// Forest land.
        Forest => "forest",
    }
}

string_enum! {
    /// What a mortality estimate measures.
    MortalityMeasure {
        /// Trees per acre per year.
        Tpa => "tpa",
        /// Cubic-foot volume per year.
        Volume => "volume",
        /// Biomass tons per year.
        Biomass => "biomass",
        /// Carbon tons per year.
        Carbon => "carbon",
        /// Sawlog volume per year.
        Sawlog => "sawlog",
        /// TPA and volume together.
        Both => "both",
    }
}

string_enum! {
    /// Variance estimator choice for mortality.
    VarianceMethod {
        /// Ratio-of-means variance.
        Ratio => "ratio",
        /// Stratified total variance.
        Stratified => "stratified",
    }
}

string_enum! {
    /// Lazy-evaluation mode.
    LazyMode {
        /// Decide by row-count threshold.
        Auto => "auto",
        /// Always lazy.
        Enabled => "enabled",
        /// Always eager.
        Disabled => "disabled",
    }
}

string_enum! {
    /// How lazy frames are materialized.
    CollectionStrategy {
        /// One frame at a time.
        Sequential => "sequential",
        /// Batch `collect_all`.
        Parallel => "parallel",
        /// Streaming engine.
        Streaming => "streaming",
        /// Pick by estimated size.
        Adaptive => "adaptive",
    }
}

string_enum! {
    /// Label set for diameter size classes.
    SizeClassLabels {
        /// Numeric ranges ("1.0-4.9", ...).
        Standard => "standard",
        /// Descriptive names (Saplings, Small, Medium, Large).
        Descriptive => "descriptive",
    }
}

/// Tuning for the lazy-evaluation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LazyEvaluationConfig {
    /// Lazy-evaluation mode.
    pub mode: LazyMode,
    /// Row count above which `auto` mode goes lazy.
    pub threshold_rows: usize,
    /// Materialization strategy.
    pub collection_strategy: CollectionStrategy,
    /// Parallel collection width.
    pub max_parallel_collections: usize,
    /// Streaming chunk size in rows.
    pub chunk_size: usize,
    /// Optional memory budget in MiB.
    pub memory_limit_mb: Option<usize>,
    /// Push filters into table scans.
    pub enable_predicate_pushdown: bool,
    /// Push projections into table scans.
    pub enable_projection_pushdown: bool,
    /// Push row-range slices into table scans.
    pub enable_slice_pushdown: bool,
    /// Cache compiled expressions between stages.
    pub enable_expression_caching: bool,
}

impl Default for LazyEvaluationConfig {
    fn default() -> Self {
        Self {
            mode: LazyMode::Auto,
            threshold_rows: 10_000,
            collection_strategy: CollectionStrategy::Adaptive,
            max_parallel_collections: 4,
            chunk_size: 50_000,
            memory_limit_mb: None,
            enable_predicate_pushdown: true,
            enable_projection_pushdown: true,
            enable_slice_pushdown: true,
            enable_expression_caching: true,
        }
    }
}

/// Options common to every estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// User grouping columns, in order.
    pub grp_by: Vec<String>,
    /// Group by species code.
    pub by_species: bool,
    /// Group by diameter size class.
    pub by_size_class: bool,
    /// Group by derived land type.
    pub by_land_type: bool,
    /// Land base restriction.
    pub land_type: LandType,
    /// Tree status restriction.
    pub tree_type: TreeType,
    /// Tree class restriction.
    pub tree_class: TreeClass,
    /// Tree-level domain predicate.
    pub tree_domain: Option<String>,
    /// Area-level (condition) domain predicate.
    pub area_domain: Option<String>,
    /// Temporal averaging method.
    pub method: TemporalMethod,
    /// EMA decay parameter; meaningful only for `method = ema`.
    pub lambda_: f64,
    /// Emit expanded totals alongside per-acre values.
    pub totals: bool,
    /// Emit variances instead of standard errors.
    pub variance: bool,
    /// Emit per-plot rows instead of population estimates.
    pub by_plot: bool,
    /// Clip to the most recent evaluation before estimating.
    pub most_recent: bool,
    /// Size-class label set used when `by_size_class` is on.
    pub size_class_labels: SizeClassLabels,
    /// Unrecognized options, preserved round-trip.
    pub extra_params: BTreeMap<String, Value>,
    /// Lazy-evaluation tuning.
    pub lazy: LazyEvaluationConfig,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            grp_by: Vec::new(),
            by_species: false,
            by_size_class: false,
            by_land_type: false,
            land_type: LandType::Forest,
            tree_type: TreeType::Live,
            tree_class: TreeClass::All,
            tree_domain: None,
            area_domain: None,
            method: TemporalMethod::Ti,
            lambda_: 0.5,
            totals: false,
            variance: false,
            by_plot: false,
            most_recent: false,
            size_class_labels: SizeClassLabels::Standard,
            extra_params: BTreeMap::new(),
            lazy: LazyEvaluationConfig::default(),
        }
    }
}

impl EstimatorConfig {
    /// The full, deduplicated grouping-column list: user columns first,
    /// then `SPCD`, `SIZE_CLASS`, and `LAND_TYPE` as requested.
    #[must_use]
    pub fn group_columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = self.grp_by.clone();
        if self.by_species {
            cols.push("SPCD".to_string());
        }
        if self.by_size_class {
            cols.push("SIZE_CLASS".to_string());
        }
        if self.by_land_type {
            cols.push("LAND_TYPE".to_string());
        }
        dedup_preserving_order(cols)
    }

    /// Validate option combinations for the given metric family.
    ///
    /// Fatal conflicts return `InvalidConfig`; advisory issues go to the
    /// warning sink and never abort.
    pub fn validate(&self, metric: MetricFamily, warnings: &WarningSink) -> Result<()> {
        if metric == MetricFamily::Mortality && self.tree_type == TreeType::Live {
            return Err(TaigaError::InvalidConfig(
                "mortality estimation cannot be restricted to live trees".to_string(),
            ));
        }
        if self.tree_class == TreeClass::Timber && self.land_type != LandType::Timber {
            return Err(TaigaError::InvalidConfig(
                "tree_class = timber requires land_type = timber".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.lambda_) {
            return Err(TaigaError::InvalidConfig(format!(
                "lambda_ must lie in [0, 1], got {}",
                self.lambda_
            )));
        }
        if self.method == TemporalMethod::Ema && (self.lambda_ <= 0.0 || self.lambda_ >= 1.0) {
            return Err(TaigaError::InvalidConfig(format!(
                "method = ema requires 0 < lambda_ < 1, got {}",
                self.lambda_
            )));
        }
        if let Some(domain) = &self.tree_domain {
            validate_domain_expression(domain)?;
        }
        if let Some(domain) = &self.area_domain {
            validate_domain_expression(domain)?;
        }
        for column in &self.grp_by {
            validate_sql_identifier(column)?;
        }
        if self.by_plot && self.lazy.mode == LazyMode::Disabled {
            warnings.push(
                WarningKind::Performance,
                "by_plot output without lazy evaluation materializes every plot eagerly",
            );
        }
        Ok(())
    }
}

/// Volume-estimator options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeOptions {
    /// Equation family.
    pub volume_equation: VolumeEquation,
    /// Merchantable top diameter, inches.
    pub merchantable_top_diameter: f64,
    /// Stump height, feet.
    pub stump_height: f64,
    /// Include rotten-cull volume.
    pub include_rotten: bool,
    /// Volume definition.
    pub vol_type: VolType,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            volume_equation: VolumeEquation::Default,
            merchantable_top_diameter: 4.0,
            stump_height: 1.0,
            include_rotten: false,
            vol_type: VolType::Net,
        }
    }
}

/// Biomass-estimator options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiomassOptions {
    /// Biomass component.
    pub component: BiomassComponent,
    /// Add foliage to the selected component.
    pub include_foliage: bool,
    /// Carbon fraction applied by the carbon estimator.
    pub carbon_fraction: f64,
    /// Output units.
    pub units: BiomassUnits,
}

impl Default for BiomassOptions {
    fn default() -> Self {
        Self {
            component: BiomassComponent::Ag,
            include_foliage: false,
            carbon_fraction: crate::codes::CARBON_FRACTION,
            units: BiomassUnits::Tons,
        }
    }
}

/// Growth-estimator options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthOptions {
    /// Growth accounting definition.
    pub growth_type: GrowthType,
    /// Include ingrowth trees.
    pub include_ingrowth: bool,
    /// Include mortality offsets in component reporting.
    pub include_mortality: bool,
    /// Restrict to annual-inventory panels.
    pub annual_only: bool,
}

impl Default for GrowthOptions {
    fn default() -> Self {
        Self {
            growth_type: GrowthType::Net,
            include_ingrowth: true,
            include_mortality: false,
            annual_only: false,
        }
    }
}

/// Area-estimator options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaOptions {
    /// Basis of the area estimate.
    pub area_basis: AreaBasis,
    /// Include nonforest conditions in the land base.
    pub include_nonforest: bool,
    /// Restrict to the given `OWNGRPCD` values (empty = all).
    pub ownership_groups: Vec<i64>,
}

impl Default for AreaOptions {
    fn default() -> Self {
        Self {
            area_basis: AreaBasis::Condition,
            include_nonforest: false,
            ownership_groups: Vec::new(),
        }
    }
}

/// Mortality-estimator options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MortalityOptions {
    /// What the estimate measures.
    pub mortality_type: MortalityMeasure,
    /// Group output by mortality agent.
    pub group_by_agent: bool,
    /// Group output by disturbance code.
    pub group_by_disturbance: bool,
    /// Group output by ownership group.
    pub group_by_ownership: bool,
    /// Group output by species group.
    pub group_by_species_group: bool,
    /// Include natural mortality.
    pub include_natural: bool,
    /// Include harvest-related mortality.
    pub include_harvest: bool,
    /// Emit per-component columns.
    pub include_components: bool,
    /// Variance estimator.
    pub variance_method: VarianceMethod,
}

impl Default for MortalityOptions {
    fn default() -> Self {
        Self {
            mortality_type: MortalityMeasure::Tpa,
            group_by_agent: false,
            group_by_disturbance: false,
            group_by_ownership: false,
            group_by_species_group: false,
            include_natural: true,
            include_harvest: true,
            include_components: false,
            variance_method: VarianceMethod::Ratio,
        }
    }
}

/// Module-specific payload carried next to the base config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "module", rename_all = "snake_case")]
pub enum ModuleConfig {
    /// Volume estimation.
    Volume(VolumeOptions),
    /// Biomass estimation.
    Biomass(BiomassOptions),
    /// Growth estimation.
    Growth(GrowthOptions),
    /// Area estimation.
    Area(AreaOptions),
    /// Mortality estimation.
    Mortality(MortalityOptions),
    /// No module payload.
    Other,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self::Other
    }
}

/// A base config paired with its module payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfigV2 {
    /// Options shared by every estimator.
    pub base: EstimatorConfig,
    /// Module-specific payload.
    pub module: ModuleConfig,
}

impl EstimatorConfigV2 {
    /// Discard the module payload.
    #[must_use]
    pub fn to_base(&self) -> EstimatorConfig {
        self.base.clone()
    }

    /// Wrap a base config with an empty module payload.
    #[must_use]
    pub const fn from_base(base: EstimatorConfig) -> Self {
        Self {
            base,
            module: ModuleConfig::Other,
        }
    }

    /// Group columns including the module's group-by switches.
    #[must_use]
    pub fn group_columns(&self) -> Vec<String> {
        let mut cols = self.base.group_columns();
        if let ModuleConfig::Mortality(m) = &self.module {
            if m.group_by_agent {
                cols.push("AGENTCD".to_string());
            }
            if m.group_by_disturbance {
                cols.push("DSTRBCD1".to_string());
            }
            if m.group_by_ownership {
                cols.push("OWNGRPCD".to_string());
            }
            if m.group_by_species_group {
                cols.push("SPGRPCD".to_string());
            }
        }
        dedup_preserving_order(cols)
    }
}

impl From<EstimatorConfig> for EstimatorConfigV2 {
    fn from(base: EstimatorConfig) -> Self {
        Self::from_base(base)
    }
}

fn dedup_preserving_order(cols: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    cols.into_iter().filter(|c| seen.insert(c.clone())).collect()
}

/// Builds typed configs from estimator names and legacy key/value maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigFactory;

impl ConfigFactory {
    /// Build the module variant for `estimator` from a legacy map.
    ///
    /// Keys are accepted in both snake_case and the legacy camelCase
    /// (`grpBy`, `bySpecies`, `landType`, ...). Unknown keys are preserved
    /// in `extra_params` so the conversion is lossless.
    pub fn for_estimator(estimator: &str, map: &serde_json::Map<String, Value>) -> Result<EstimatorConfigV2> {
        let mut base = EstimatorConfig::default();
        let mut module_fields = serde_json::Map::new();
        let module_keys = Self::module_keys(estimator);

        for (key, value) in map {
            let canonical = legacy_to_snake(key);
            if module_keys.contains(&canonical.as_str()) {
                module_fields.insert(canonical, value.clone());
                continue;
            }
            match canonical.as_str() {
                "grp_by" => base.grp_by = crate::validation::validate_grp_by(value)?,
                "by_species" => base.by_species = crate::validation::validate_boolean(value)?,
                "by_size_class" => base.by_size_class = crate::validation::validate_boolean(value)?,
                "by_land_type" => base.by_land_type = crate::validation::validate_boolean(value)?,
                "land_type" => base.land_type = str_field(value, "land_type")?.parse()?,
                "tree_type" => base.tree_type = str_field(value, "tree_type")?.parse()?,
                "tree_class" => base.tree_class = str_field(value, "tree_class")?.parse()?,
                "tree_domain" => base.tree_domain = opt_str_field(value),
                "area_domain" => base.area_domain = opt_str_field(value),
                "method" => base.method = str_field(value, "method")?.parse()?,
                "lambda_" | "lambda" => {
                    base.lambda_ = value.as_f64().ok_or_else(|| {
                        TaigaError::InvalidConfig("lambda_ must be a number".to_string())
                    })?;
                }
                "totals" => base.totals = crate::validation::validate_boolean(value)?,
                "variance" => base.variance = crate::validation::validate_boolean(value)?,
                "by_plot" => base.by_plot = crate::validation::validate_boolean(value)?,
                "most_recent" => base.most_recent = crate::validation::validate_boolean(value)?,
                "size_class_labels" => {
                    base.size_class_labels = str_field(value, "size_class_labels")?.parse()?;
                }
                "lazy" => {
                    base.lazy = serde_json::from_value(value.clone()).map_err(|e| {
                        TaigaError::InvalidConfig(format!("bad lazy config: {e}"))
                    })?;
                }
                _ => {
                    base.extra_params.insert(key.clone(), value.clone());
                }
            }
        }

        let module = Self::build_module(estimator, module_fields)?;
        Ok(EstimatorConfigV2 { base, module })
    }

    /// Serialize a config back to the canonical legacy map. Converting the
    /// result through [`Self::for_estimator`] reproduces the config.
    #[must_use]
    pub fn to_legacy_map(config: &EstimatorConfigV2) -> serde_json::Map<String, Value> {
        let mut map = match serde_json::to_value(&config.base) {
            Ok(Value::Object(m)) => m,
            _ => serde_json::Map::new(),
        };
        // extras are inlined at the top level of the legacy format
        if let Some(Value::Object(extras)) = map.remove("extra_params") {
            for (k, v) in extras {
                map.insert(k, v);
            }
        }
        if let Ok(Value::Object(module)) = serde_json::to_value(&config.module) {
            for (k, v) in module {
                if k != "module" {
                    map.insert(k, v);
                }
            }
        }
        map
    }

    fn module_keys(estimator: &str) -> &'static [&'static str] {
        match estimator {
            "volume" => &[
                "volume_equation",
                "merchantable_top_diameter",
                "stump_height",
                "include_rotten",
                "vol_type",
            ],
            "biomass" | "carbon" => &["component", "include_foliage", "carbon_fraction", "units"],
            "growth" => &[
                "growth_type",
                "include_ingrowth",
                "include_mortality",
                "annual_only",
            ],
            "area" => &["area_basis", "include_nonforest", "ownership_groups"],
            "mortality" => &[
                "mortality_type",
                "group_by_agent",
                "group_by_disturbance",
                "group_by_ownership",
                "group_by_species_group",
                "include_natural",
                "include_harvest",
                "include_components",
                "variance_method",
            ],
            _ => &[],
        }
    }

    fn build_module(estimator: &str, fields: serde_json::Map<String, Value>) -> Result<ModuleConfig> {
        let value = Value::Object(fields);
        let module = match estimator {
            "volume" => ModuleConfig::Volume(from_value(value)?),
            "biomass" | "carbon" => ModuleConfig::Biomass(from_value(value)?),
            "growth" => ModuleConfig::Growth(from_value(value)?),
            "area" => ModuleConfig::Area(from_value(value)?),
            "mortality" => ModuleConfig::Mortality(from_value(value)?),
            _ => ModuleConfig::Other,
        };
        Ok(module)
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| TaigaError::InvalidConfig(format!("bad module options: {e}")))
}

fn str_field<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| TaigaError::InvalidConfig(format!("{key} must be a string")))
}

fn opt_str_field(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Normalize a legacy camelCase key to snake_case.
fn legacy_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = EstimatorConfig::default();
        assert_eq!(config.land_type, LandType::Forest);
        assert_eq!(config.tree_type, TreeType::Live);
        assert_eq!(config.method, TemporalMethod::Ti);
        assert!((config.lambda_ - 0.5).abs() < f64::EPSILON);
        assert!(!config.totals);
        assert_eq!(config.lazy.mode, LazyMode::Auto);
        assert!(config.lazy.enable_predicate_pushdown);
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("timber".parse::<LandType>().unwrap(), LandType::Timber);
        assert_eq!("GS".parse::<TreeType>().unwrap(), TreeType::Gs);
        assert_eq!("sawlog".parse::<VolType>().unwrap(), VolType::Sawlog);
        assert!("bogus".parse::<LandType>().is_err());
    }

    #[test]
    fn test_vol_type_columns() {
        assert_eq!(VolType::Net.column(), "VOLCFNET");
        assert_eq!(VolType::Gross.column(), "VOLCFGRS");
        assert_eq!(VolType::Sound.column(), "VOLCFSND");
        assert_eq!(VolType::Sawlog.column(), "VOLCSNET");
    }

    #[test]
    fn test_group_columns_order_and_dedup() {
        let config = EstimatorConfig {
            grp_by: vec!["OWNGRPCD".to_string(), "SPCD".to_string()],
            by_species: true,
            by_size_class: true,
            ..Default::default()
        };
        assert_eq!(
            config.group_columns(),
            vec!["OWNGRPCD", "SPCD", "SIZE_CLASS"]
        );
    }

    #[test]
    fn test_mortality_live_rejected() {
        let warnings = WarningSink::new();
        let config = EstimatorConfig {
            tree_type: TreeType::Live,
            ..Default::default()
        };
        assert!(config.validate(MetricFamily::Mortality, &warnings).is_err());

        let config = EstimatorConfig {
            tree_type: TreeType::Dead,
            ..Default::default()
        };
        assert!(config.validate(MetricFamily::Mortality, &warnings).is_ok());
    }

    #[test]
    fn test_timber_class_requires_timber_land() {
        let warnings = WarningSink::new();
        let config = EstimatorConfig {
            tree_class: TreeClass::Timber,
            land_type: LandType::Forest,
            ..Default::default()
        };
        assert!(config.validate(MetricFamily::Volume, &warnings).is_err());

        let config = EstimatorConfig {
            tree_class: TreeClass::Timber,
            land_type: LandType::Timber,
            ..Default::default()
        };
        assert!(config.validate(MetricFamily::Volume, &warnings).is_ok());
    }

    #[test]
    fn test_ema_lambda_bounds() {
        let warnings = WarningSink::new();
        for bad in [0.0, 1.0] {
            let config = EstimatorConfig {
                method: TemporalMethod::Ema,
                lambda_: bad,
                ..Default::default()
            };
            assert!(config.validate(MetricFamily::Tpa, &warnings).is_err());
        }
        let config = EstimatorConfig {
            method: TemporalMethod::Ema,
            lambda_: 0.7,
            ..Default::default()
        };
        assert!(config.validate(MetricFamily::Tpa, &warnings).is_ok());
    }

    #[test]
    fn test_by_plot_without_lazy_warns() {
        let warnings = WarningSink::new();
        let config = EstimatorConfig {
            by_plot: true,
            lazy: LazyEvaluationConfig {
                mode: LazyMode::Disabled,
                ..Default::default()
            },
            ..Default::default()
        };
        config.validate(MetricFamily::Tpa, &warnings).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_bad_domain_rejected_at_validate() {
        let warnings = WarningSink::new();
        let config = EstimatorConfig {
            tree_domain: Some("STATUSCD == 1; DROP TABLE TREE".to_string()),
            ..Default::default()
        };
        assert!(config.validate(MetricFamily::Tpa, &warnings).is_err());
    }

    #[test]
    fn test_factory_legacy_keys() {
        let map = json!({
            "grpBy": "OWNGRPCD",
            "bySpecies": true,
            "landType": "timber",
            "treeType": "gs",
            "volType": "net",
            "totals": true,
            "customKnob": 7,
        });
        let Value::Object(map) = map else { unreachable!() };
        let config = ConfigFactory::for_estimator("volume", &map).unwrap();

        assert_eq!(config.base.grp_by, vec!["OWNGRPCD"]);
        assert!(config.base.by_species);
        assert_eq!(config.base.land_type, LandType::Timber);
        assert_eq!(config.base.tree_type, TreeType::Gs);
        assert!(config.base.totals);
        assert_eq!(config.base.extra_params.get("customKnob"), Some(&json!(7)));
        match &config.module {
            ModuleConfig::Volume(v) => assert_eq!(v.vol_type, VolType::Net),
            other => panic!("expected volume module, got {other:?}"),
        }
    }

    #[test]
    fn test_factory_module_defaults() {
        let map = serde_json::Map::new();
        let config = ConfigFactory::for_estimator("mortality", &map).unwrap();
        match &config.module {
            ModuleConfig::Mortality(m) => {
                assert_eq!(m.mortality_type, MortalityMeasure::Tpa);
                assert_eq!(m.variance_method, VarianceMethod::Ratio);
                assert!(m.include_natural);
            }
            other => panic!("expected mortality module, got {other:?}"),
        }
    }

    #[test]
    fn test_round_trip_conversion() {
        let map = json!({
            "land_type": "timber",
            "tree_type": "gs",
            "totals": true,
            "vol_type": "sawlog",
            "stump_height": 0.5,
        });
        let Value::Object(map) = map else { unreachable!() };
        let config = ConfigFactory::for_estimator("volume", &map).unwrap();
        let legacy = ConfigFactory::to_legacy_map(&config);
        let config2 = ConfigFactory::for_estimator("volume", &legacy).unwrap();
        assert_eq!(config, config2);
    }

    #[test]
    fn test_base_v2_conversions_total() {
        let base = EstimatorConfig {
            totals: true,
            ..Default::default()
        };
        let v2 = EstimatorConfigV2::from_base(base.clone());
        assert_eq!(v2.to_base(), base);
        assert_eq!(v2.module, ModuleConfig::Other);
    }

    #[test]
    fn test_mortality_group_columns() {
        let config = EstimatorConfigV2 {
            base: EstimatorConfig::default(),
            module: ModuleConfig::Mortality(MortalityOptions {
                group_by_agent: true,
                group_by_ownership: true,
                ..Default::default()
            }),
        };
        assert_eq!(config.group_columns(), vec!["AGENTCD", "OWNGRPCD"]);
    }
}
