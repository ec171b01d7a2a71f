//! FIA code constants and enumerations.
//!
//! Named constants for the status codes, site classes, ownership groups,
//! and adjustment-basis codes used by the estimators, so no bare numeric
//! literal leaks into estimation logic. Code values follow the FIA database
//! documentation.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaigaError};

/// IPCC default carbon fraction of dry biomass.
pub const CARBON_FRACTION: f64 = 0.47;

/// Conversion from squared inches of diameter to square feet of basal area.
pub const BASAL_AREA_FACTOR: f64 = std::f64::consts::FRAC_PI_4 / 144.0;

/// Pounds per short ton.
pub const LBS_PER_TON: f64 = 2000.0;

/// `COND.COND_STATUS_CD` land status codes.
#[derive(Debug, Clone, Copy)]
pub struct LandStatus;

impl LandStatus {
    /// Accessible forest land.
    pub const FOREST: i64 = 1;
    /// Nonforest land.
    pub const NONFOREST: i64 = 2;
    /// Noncensus water.
    pub const NONCENSUS_WATER: i64 = 3;
    /// Census water.
    pub const CENSUS_WATER: i64 = 4;

    /// Whether the status code denotes water of either kind.
    #[must_use]
    pub const fn is_water(code: i64) -> bool {
        code == Self::NONCENSUS_WATER || code == Self::CENSUS_WATER
    }
}

/// `COND.SITECLCD` site productivity classes.
#[derive(Debug, Clone, Copy)]
pub struct SiteClass;

impl SiteClass {
    /// Productive site classes (capable of 20+ cubic feet/acre/year).
    pub const PRODUCTIVE: [i64; 6] = [1, 2, 3, 4, 5, 6];
    /// Lowest productive class code.
    pub const PRODUCTIVE_MIN: i64 = 1;
    /// Highest productive class code.
    pub const PRODUCTIVE_MAX: i64 = 6;
    /// Unproductive site class.
    pub const UNPRODUCTIVE: i64 = 7;

    /// Whether the class code denotes a productive site.
    #[must_use]
    pub const fn is_productive(code: i64) -> bool {
        code >= 1 && code <= 6
    }
}

/// `COND.RESERVCD` reserved-status codes.
#[derive(Debug, Clone, Copy)]
pub struct ReserveStatus;

impl ReserveStatus {
    /// Land not withdrawn from timber utilization.
    pub const NOT_RESERVED: i64 = 0;
    /// Reserved land.
    pub const RESERVED: i64 = 1;
}

/// `TREE.STATUSCD` tree status.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeStatus {
    /// Live tree.
    #[display("live")]
    Live = 1,
    /// Standing dead tree.
    #[display("dead")]
    Dead = 2,
    /// Removed (cut) tree.
    #[display("removed")]
    Removed = 3,
}

impl TreeStatus {
    /// The numeric `STATUSCD` value.
    #[must_use]
    pub const fn code(self) -> i64 {
        self as i64
    }

    /// Parse a `STATUSCD` value.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Live),
            2 => Some(Self::Dead),
            3 => Some(Self::Removed),
            _ => None,
        }
    }
}

/// `TREE.AGENTCD` damage/mortality agent groups.
///
/// Agent codes are decade-banded: any code in 10..=19 is an insect agent,
/// 20..=29 disease, and so on.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentCd {
    /// Insect damage.
    #[display("Insect")]
    Insect = 10,
    /// Disease.
    #[display("Disease")]
    Disease = 20,
    /// Fire.
    #[display("Fire")]
    Fire = 30,
    /// Animal damage.
    #[display("Animal")]
    Animal = 40,
    /// Weather damage.
    #[display("Weather")]
    Weather = 50,
    /// Vegetation competition.
    #[display("Vegetation")]
    Vegetation = 60,
    /// Unknown or not sure.
    #[display("Unknown")]
    Unknown = 70,
    /// Silvicultural or land-clearing activity.
    #[display("Silvicultural")]
    Silvicultural = 80,
}

impl AgentCd {
    /// Bucket a raw `AGENTCD` into its decade group.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code / 10 {
            1 => Some(Self::Insect),
            2 => Some(Self::Disease),
            3 => Some(Self::Fire),
            4 => Some(Self::Animal),
            5 => Some(Self::Weather),
            6 => Some(Self::Vegetation),
            7 => Some(Self::Unknown),
            8 => Some(Self::Silvicultural),
            _ => None,
        }
    }
}

/// `SUBPTYP_GRM` adjustment-basis codes for GRM tree observations.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubptypGrm {
    /// Tree is outside the estimate definition; the adjustment is 0 and the
    /// row contributes nothing (but is never dropped).
    #[display("exclude")]
    Exclude = 0,
    /// Subplot adjustment factor applies.
    #[display("subplot")]
    Subp = 1,
    /// Microplot adjustment factor applies.
    #[display("microplot")]
    Micr = 2,
    /// Macroplot adjustment factor applies.
    #[display("macroplot")]
    Macr = 3,
}

impl SubptypGrm {
    /// Total decoding: any unknown code maps to [`Self::Exclude`] so the
    /// selector never produces an undefined adjustment.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Subp,
            2 => Self::Micr,
            3 => Self::Macr,
            _ => Self::Exclude,
        }
    }
}

/// Population evaluation types from `POP_EVAL_TYP.EVAL_TYP`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalType {
    /// All-area evaluation.
    #[display("EXPALL")]
    ExpAll,
    /// Volume evaluation.
    #[display("EXPVOL")]
    ExpVol,
    /// Current-area evaluation.
    #[display("EXPCURR")]
    ExpCurr,
    /// Growth evaluation.
    #[display("EXPGROW")]
    ExpGrow,
    /// Mortality evaluation.
    #[display("EXPMORT")]
    ExpMort,
    /// Removals evaluation.
    #[display("EXPREMV")]
    ExpRemv,
    /// Down-woody-material evaluation.
    #[display("EXPDWM")]
    ExpDwm,
}

impl EvalType {
    /// The `EVAL_TYP` string stored in the evaluation catalog.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExpAll => "EXPALL",
            Self::ExpVol => "EXPVOL",
            Self::ExpCurr => "EXPCURR",
            Self::ExpGrow => "EXPGROW",
            Self::ExpMort => "EXPMORT",
            Self::ExpRemv => "EXPREMV",
            Self::ExpDwm => "EXPDWM",
        }
    }

    /// Parse an `EVAL_TYP` string (case-insensitive, `EXP` prefix optional).
    pub fn parse(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        let normalized = if upper.starts_with("EXP") {
            upper
        } else {
            format!("EXP{upper}")
        };
        match normalized.as_str() {
            "EXPALL" => Ok(Self::ExpAll),
            "EXPVOL" => Ok(Self::ExpVol),
            "EXPCURR" => Ok(Self::ExpCurr),
            "EXPGROW" => Ok(Self::ExpGrow),
            "EXPMORT" => Ok(Self::ExpMort),
            "EXPREMV" => Ok(Self::ExpRemv),
            "EXPDWM" => Ok(Self::ExpDwm),
            _ => Err(TaigaError::InvalidConfig(format!(
                "unknown evaluation type '{s}'"
            ))),
        }
    }

    /// The evaluation types that can serve a metric family, in preference
    /// order.
    #[must_use]
    pub const fn for_metric(metric: MetricFamily) -> &'static [Self] {
        match metric {
            MetricFamily::Area => &[Self::ExpCurr, Self::ExpAll],
            MetricFamily::Volume
            | MetricFamily::Biomass
            | MetricFamily::Carbon
            | MetricFamily::Tpa
            | MetricFamily::TreeCount
            | MetricFamily::SiteIndex => &[Self::ExpVol],
            MetricFamily::Growth => &[Self::ExpGrow],
            MetricFamily::Mortality => &[Self::ExpMort],
            MetricFamily::Removals => &[Self::ExpRemv],
            MetricFamily::DownWoody => &[Self::ExpDwm],
        }
    }
}

/// Families of statistical metrics the engine can estimate.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricFamily {
    /// Land area.
    #[display("area")]
    Area,
    /// Standing volume.
    #[display("volume")]
    Volume,
    /// Standing biomass.
    #[display("biomass")]
    Biomass,
    /// Carbon stock.
    #[display("carbon")]
    Carbon,
    /// Trees per acre.
    #[display("tpa")]
    Tpa,
    /// Expanded tree count.
    #[display("tree_count")]
    TreeCount,
    /// Site index.
    #[display("site_index")]
    SiteIndex,
    /// Annual net growth.
    #[display("growth")]
    Growth,
    /// Annual mortality.
    #[display("mortality")]
    Mortality,
    /// Annual removals.
    #[display("removals")]
    Removals,
    /// Down woody material.
    #[display("down_woody")]
    DownWoody,
}

/// The state FIPS code embedded in an `EVALID` (leading digits).
#[must_use]
pub const fn evalid_state(evalid: i64) -> i64 {
    evalid / 10_000
}

/// The evaluation type code embedded in an `EVALID` (trailing two digits).
#[must_use]
pub const fn evalid_type_code(evalid: i64) -> i64 {
    evalid % 100
}

/// The inventory year embedded in an `EVALID` (middle two digits), windowed
/// around Y2K: `yy <= 30` maps to `20yy`, otherwise to `19yy`. Year
/// inference never consults the clock.
#[must_use]
pub const fn evalid_year(evalid: i64) -> i64 {
    let yy = (evalid / 100) % 100;
    if yy <= 30 { 2000 + yy } else { 1900 + yy }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_land_status_codes() {
        assert_eq!(LandStatus::FOREST, 1);
        assert_eq!(LandStatus::NONFOREST, 2);
        assert!(LandStatus::is_water(3));
        assert!(LandStatus::is_water(4));
        assert!(!LandStatus::is_water(1));
    }

    #[test]
    fn test_productive_classes() {
        for code in 1..=6 {
            assert!(SiteClass::is_productive(code));
        }
        assert!(!SiteClass::is_productive(SiteClass::UNPRODUCTIVE));
        assert!(!SiteClass::is_productive(0));
    }

    #[test]
    fn test_tree_status_round_trip() {
        for status in [TreeStatus::Live, TreeStatus::Dead, TreeStatus::Removed] {
            assert_eq!(TreeStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(TreeStatus::from_code(9), None);
    }

    #[test]
    fn test_agent_decade_banding() {
        assert_eq!(AgentCd::from_code(10), Some(AgentCd::Insect));
        assert_eq!(AgentCd::from_code(17), Some(AgentCd::Insect));
        assert_eq!(AgentCd::from_code(30), Some(AgentCd::Fire));
        assert_eq!(AgentCd::from_code(85), Some(AgentCd::Silvicultural));
        assert_eq!(AgentCd::from_code(0), None);
        assert_eq!(AgentCd::from_code(95), None);
    }

    #[test]
    fn test_subptyp_total_decoding() {
        assert_eq!(SubptypGrm::from_code(0), SubptypGrm::Exclude);
        assert_eq!(SubptypGrm::from_code(1), SubptypGrm::Subp);
        assert_eq!(SubptypGrm::from_code(2), SubptypGrm::Micr);
        assert_eq!(SubptypGrm::from_code(3), SubptypGrm::Macr);
        // Unknown codes must exclude, never panic.
        assert_eq!(SubptypGrm::from_code(99), SubptypGrm::Exclude);
        assert_eq!(SubptypGrm::from_code(-1), SubptypGrm::Exclude);
    }

    #[test]
    fn test_eval_type_parse() {
        assert_eq!(EvalType::parse("EXPVOL").unwrap(), EvalType::ExpVol);
        assert_eq!(EvalType::parse("vol").unwrap(), EvalType::ExpVol);
        assert_eq!(EvalType::parse("grow").unwrap(), EvalType::ExpGrow);
        assert!(EvalType::parse("bogus").is_err());
    }

    #[test]
    fn test_metric_eval_type_mapping() {
        assert_eq!(
            EvalType::for_metric(MetricFamily::Area),
            &[EvalType::ExpCurr, EvalType::ExpAll]
        );
        assert_eq!(
            EvalType::for_metric(MetricFamily::Volume),
            &[EvalType::ExpVol]
        );
        assert_eq!(
            EvalType::for_metric(MetricFamily::Mortality),
            &[EvalType::ExpMort]
        );
    }

    #[test]
    fn test_evalid_digits() {
        // Georgia 2023 current-area evaluation.
        assert_eq!(evalid_state(132301), 13);
        assert_eq!(evalid_year(132301), 2023);
        assert_eq!(evalid_type_code(132301), 1);
        // Y2K window.
        assert_eq!(evalid_year(139901), 1999);
        assert_eq!(evalid_year(133001), 2030);
        assert_eq!(evalid_year(139001), 1990);
    }

    #[test]
    fn test_math_constants() {
        assert!((BASAL_AREA_FACTOR - 0.005454).abs() < 1e-6);
        assert!((CARBON_FRACTION - 0.47).abs() < f64::EPSILON);
    }
}
