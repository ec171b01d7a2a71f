//! Stratified expansion.
//!
//! Turns plot-level rollups into population estimates: per-stratum moment
//! sums (with plots absent from a group completed as zeros against the
//! stratum's `P2POINTCNT`), expansion by `EXPNS`, and the variance
//! calculators. Group keys are handled generically so any combination of
//! integer and text grouping columns works.

use std::collections::HashMap;

use polars::prelude::*;
use taiga_traits::{Result, TaigaError};

use crate::variance::{ratio_of_means, stratified_total, RatioEstimate, StratumMoments, TotalEstimate};

/// Column produced by the aggregator for plot-level values.
pub const PLOT_VALUE: &str = "PLOT_VALUE";

/// A grouping-key component, normalized for hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Null group value.
    Null,
    /// Integer-valued key.
    Int(i64),
    /// Text-valued key (also used for float group values).
    Str(String),
}

impl Key {
    fn from_any(value: &AnyValue<'_>) -> Self {
        match value {
            AnyValue::Null => Self::Null,
            AnyValue::Int8(v) => Self::Int(i64::from(*v)),
            AnyValue::Int16(v) => Self::Int(i64::from(*v)),
            AnyValue::Int32(v) => Self::Int(i64::from(*v)),
            AnyValue::Int64(v) => Self::Int(*v),
            AnyValue::UInt8(v) => Self::Int(i64::from(*v)),
            AnyValue::UInt16(v) => Self::Int(i64::from(*v)),
            AnyValue::UInt32(v) => Self::Int(i64::from(*v)),
            AnyValue::UInt64(v) => Self::Int(*v as i64),
            AnyValue::Boolean(v) => Self::Int(i64::from(*v)),
            AnyValue::String(v) => Self::Str((*v).to_string()),
            AnyValue::StringOwned(v) => Self::Str(v.to_string()),
            other => Self::Str(format!("{other}")),
        }
    }
}

/// Per-stratum design information: `(EXPNS, P2POINTCNT)`.
pub type StratumInfo = HashMap<Key, (f64, f64)>;

/// Extract the per-stratum expansion factor and phase-2 plot count,
/// deduplicated by stratum CN.
pub fn stratum_info(strata: &DataFrame) -> Result<StratumInfo> {
    let cn = strata.column("CN")?.as_materialized_series().clone();
    let expns = strata
        .column("EXPNS")?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    let expns = expns.f64()?;
    let p2 = strata
        .column("P2POINTCNT")?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    let p2 = p2.f64()?;

    let mut out = HashMap::with_capacity(strata.height());
    for idx in 0..strata.height() {
        let key = Key::from_any(&cn.get(idx)?);
        let weight = expns.get(idx).unwrap_or(0.0);
        let n = p2.get(idx).unwrap_or(0.0);
        out.entry(key).or_insert((weight, n));
    }
    Ok(out)
}

/// Total phase-2 plots across the evaluation: `Σ_h P2POINTCNT`,
/// independent of any domain indicator.
pub fn total_phase2_plots(strata: &DataFrame) -> Result<i64> {
    let info = stratum_info(strata)?;
    Ok(info.values().map(|(_, n)| *n).sum::<f64>().round() as i64)
}

/// One group's expanded totals.
#[derive(Debug, Clone)]
pub struct GroupTotal {
    /// Group key values, ordered like the grouping columns.
    pub key: Vec<Key>,
    /// Expanded total and variance.
    pub estimate: TotalEstimate,
}

/// One group's ratio-of-means estimate.
#[derive(Debug, Clone)]
pub struct GroupRatio {
    /// Group key values, ordered like the grouping columns.
    pub key: Vec<Key>,
    /// Ratio estimate with totals.
    pub ratio: RatioEstimate,
    /// Variance of the numerator total.
    pub variance_y: f64,
    /// Variance of the denominator total.
    pub variance_x: f64,
}

struct MomentAccumulator {
    by_stratum: HashMap<Key, StratumMoments>,
}

impl MomentAccumulator {
    fn new() -> Self {
        Self {
            by_stratum: HashMap::new(),
        }
    }

    fn entry(&mut self, stratum: Key, info: &StratumInfo) -> &mut StratumMoments {
        let (weight, n) = info.get(&stratum).copied().unwrap_or((0.0, 0.0));
        self.by_stratum.entry(stratum).or_insert(StratumMoments {
            weight,
            n,
            ..Default::default()
        })
    }
}

fn read_group_row(df: &DataFrame, group_cols: &[String], idx: usize) -> Result<Vec<Key>> {
    let mut key = Vec::with_capacity(group_cols.len());
    for column in group_cols {
        let any = df.column(column)?.as_materialized_series().get(idx)?;
        key.push(Key::from_any(&any));
    }
    Ok(key)
}

fn read_f64_column(df: &DataFrame, name: &str) -> Result<Float64Chunked> {
    let series = df
        .column(name)
        .map_err(|_| TaigaError::MissingColumn(name.to_string()))?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    Ok(series.f64()?.clone())
}

fn read_key_column(df: &DataFrame, name: &str) -> Result<Vec<Key>> {
    let series = df
        .column(name)
        .map_err(|_| TaigaError::MissingColumn(name.to_string()))?
        .as_materialized_series()
        .clone();
    let mut out = Vec::with_capacity(series.len());
    for idx in 0..series.len() {
        out.push(Key::from_any(&series.get(idx)?));
    }
    Ok(out)
}

/// Expand grouped plot values into population totals.
///
/// `plot_values` carries `STRATUM_CN`, `PLT_CN`, the group columns, and
/// [`PLOT_VALUE`]; plots absent from a group complete as zeros against the
/// stratum's `P2POINTCNT`, which keeps every sampled plot in the variance.
pub fn expand_totals(
    plot_values: &DataFrame,
    strata: &DataFrame,
    group_cols: &[String],
) -> Result<Vec<GroupTotal>> {
    let info = stratum_info(strata)?;
    let stratum_keys = read_key_column(plot_values, "STRATUM_CN")?;
    let values = read_f64_column(plot_values, PLOT_VALUE)?;

    let mut groups: HashMap<Vec<Key>, MomentAccumulator> = HashMap::new();
    for idx in 0..plot_values.height() {
        let group = read_group_row(plot_values, group_cols, idx)?;
        let value = values.get(idx).unwrap_or(0.0);
        let moments = groups
            .entry(group)
            .or_insert_with(MomentAccumulator::new)
            .entry(stratum_keys[idx].clone(), &info);
        moments.sum_y += value;
        moments.sum_y2 += value * value;
    }

    // The ungrouped estimate still yields one row even with no plot rows.
    if groups.is_empty() && group_cols.is_empty() {
        groups.insert(Vec::new(), MomentAccumulator::new());
    }

    let mut out: Vec<GroupTotal> = groups
        .into_iter()
        .map(|(key, acc)| {
            let moments: Vec<StratumMoments> = acc.by_stratum.into_values().collect();
            GroupTotal {
                key,
                estimate: stratified_total(&moments),
            }
        })
        .collect();
    out.sort_by(|a, b| a.key.partial_cmp(&b.key).unwrap_or(std::cmp::Ordering::Equal));
    Ok(out)
}

/// Expand grouped numerator values against denominator values into
/// ratio-of-means estimates.
///
/// The denominator is grouped by `denom_group_cols`, which must be the
/// leading subset of `group_cols` that lives on the condition frame
/// (tree-level groups never partition the land base). Every stratum
/// present in the denominator enters the variance even when the group has
/// no numerator plots there.
pub fn expand_ratio(
    num_values: &DataFrame,
    den_values: &DataFrame,
    strata: &DataFrame,
    group_cols: &[String],
    denom_group_cols: &[String],
) -> Result<Vec<GroupRatio>> {
    for denom_col in denom_group_cols {
        if !group_cols.contains(denom_col) {
            return Err(TaigaError::InvalidConfig(format!(
                "denominator group column '{denom_col}' is not a grouping column"
            )));
        }
    }
    let denom_positions: Vec<usize> = denom_group_cols
        .iter()
        .map(|c| group_cols.iter().position(|g| g == c).unwrap_or_default())
        .collect();

    let info = stratum_info(strata)?;

    // Denominator: per denom-group, per-stratum sums and the per-plot x
    // values needed for the joint moment.
    let den_strata = read_key_column(den_values, "STRATUM_CN")?;
    let den_plots = read_key_column(den_values, "PLT_CN")?;
    let den_x = read_f64_column(den_values, PLOT_VALUE)?;

    struct DenomGroup {
        sums: HashMap<Key, (f64, f64)>,
        per_plot: HashMap<(Key, Key), f64>,
    }
    let mut denominators: HashMap<Vec<Key>, DenomGroup> = HashMap::new();
    for idx in 0..den_values.height() {
        let denom_key = read_group_row(den_values, denom_group_cols, idx)?;
        let x = den_x.get(idx).unwrap_or(0.0);
        let entry = denominators.entry(denom_key).or_insert_with(|| DenomGroup {
            sums: HashMap::new(),
            per_plot: HashMap::new(),
        });
        let sums = entry.sums.entry(den_strata[idx].clone()).or_insert((0.0, 0.0));
        sums.0 += x;
        sums.1 += x * x;
        entry
            .per_plot
            .insert((den_strata[idx].clone(), den_plots[idx].clone()), x);
    }

    // Numerator: per full group, per-stratum y sums plus the joint term.
    let num_strata = read_key_column(num_values, "STRATUM_CN")?;
    let num_plots = read_key_column(num_values, "PLT_CN")?;
    let num_y = read_f64_column(num_values, PLOT_VALUE)?;

    struct NumGroup {
        sums: HashMap<Key, (f64, f64, f64)>,
    }
    let mut numerators: HashMap<Vec<Key>, NumGroup> = HashMap::new();
    for idx in 0..num_values.height() {
        let group = read_group_row(num_values, group_cols, idx)?;
        let y = num_y.get(idx).unwrap_or(0.0);
        let denom_key: Vec<Key> = denom_positions.iter().map(|p| group[*p].clone()).collect();
        let x = denominators
            .get(&denom_key)
            .and_then(|d| {
                d.per_plot
                    .get(&(num_strata[idx].clone(), num_plots[idx].clone()))
            })
            .copied()
            .unwrap_or(0.0);
        let entry = numerators.entry(group).or_insert_with(|| NumGroup {
            sums: HashMap::new(),
        });
        let sums = entry
            .sums
            .entry(num_strata[idx].clone())
            .or_insert((0.0, 0.0, 0.0));
        sums.0 += y;
        sums.1 += y * y;
        sums.2 += y * x;
    }

    if numerators.is_empty() && group_cols.is_empty() {
        numerators.insert(Vec::new(), NumGroup { sums: HashMap::new() });
    }

    let mut out = Vec::with_capacity(numerators.len());
    for (group, num) in numerators {
        let denom_key: Vec<Key> = denom_positions.iter().map(|p| group[*p].clone()).collect();
        let empty = DenomGroup {
            sums: HashMap::new(),
            per_plot: HashMap::new(),
        };
        let denom = denominators.get(&denom_key).unwrap_or(&empty);

        // Union of strata seen on either side.
        let mut strata_keys: Vec<Key> = denom.sums.keys().cloned().collect();
        for key in num.sums.keys() {
            if !strata_keys.contains(key) {
                strata_keys.push(key.clone());
            }
        }

        let moments: Vec<StratumMoments> = strata_keys
            .into_iter()
            .map(|stratum| {
                let (weight, n) = info.get(&stratum).copied().unwrap_or((0.0, 0.0));
                let (sum_y, sum_y2, sum_xy) =
                    num.sums.get(&stratum).copied().unwrap_or((0.0, 0.0, 0.0));
                let (sum_x, sum_x2) = denom.sums.get(&stratum).copied().unwrap_or((0.0, 0.0));
                StratumMoments {
                    weight,
                    n,
                    sum_y,
                    sum_y2,
                    sum_x,
                    sum_x2,
                    sum_xy,
                }
            })
            .collect();

        let total = stratified_total(&moments);
        let denom_total = stratified_total(
            &moments
                .iter()
                .map(|m| StratumMoments {
                    sum_y: m.sum_x,
                    sum_y2: m.sum_x2,
                    ..*m
                })
                .collect::<Vec<_>>(),
        );
        out.push(GroupRatio {
            key: group,
            ratio: ratio_of_means(&moments),
            variance_y: total.variance,
            variance_x: denom_total.variance,
        });
    }
    out.sort_by(|a, b| a.key.partial_cmp(&b.key).unwrap_or(std::cmp::Ordering::Equal));
    Ok(out)
}

/// Build output columns from group keys, one Series per grouping column.
/// Integer-only keys become `Int64` columns, anything else text.
pub fn keys_to_columns(group_cols: &[String], keys: &[Vec<Key>]) -> Vec<Column> {
    let mut out = Vec::with_capacity(group_cols.len());
    for (pos, name) in group_cols.iter().enumerate() {
        let all_int = keys
            .iter()
            .all(|k| matches!(k[pos], Key::Int(_) | Key::Null));
        if all_int {
            let values: Vec<Option<i64>> = keys
                .iter()
                .map(|k| match k[pos] {
                    Key::Int(v) => Some(v),
                    _ => None,
                })
                .collect();
            out.push(Column::new(name.as_str().into(), values));
        } else {
            let values: Vec<Option<String>> = keys
                .iter()
                .map(|k| match &k[pos] {
                    Key::Str(v) => Some(v.clone()),
                    Key::Int(v) => Some(v.to_string()),
                    Key::Null => None,
                })
                .collect();
            out.push(Column::new(name.as_str().into(), values));
        }
    }
    out
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        use Key::{Int, Null, Str};
        match (self, other) {
            (Null, Null) => Some(std::cmp::Ordering::Equal),
            (Null, _) => Some(std::cmp::Ordering::Less),
            (_, Null) => Some(std::cmp::Ordering::Greater),
            (Int(a), Int(b)) => a.partial_cmp(b),
            (Str(a), Str(b)) => a.partial_cmp(b),
            (Int(a), Str(b)) => a.to_string().partial_cmp(b),
            (Str(a), Int(b)) => a.partial_cmp(&b.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn strata_fixture() -> DataFrame {
        df! {
            "CN" => &[1i64, 2],
            "EXPNS" => &[100.0, 50.0],
            "P2POINTCNT" => &[2i64, 2],
        }
        .unwrap()
    }

    #[test]
    fn test_stratum_info_dedup() {
        let strata = df! {
            "CN" => &[1i64, 1, 2],
            "EXPNS" => &[100.0, 100.0, 50.0],
            "P2POINTCNT" => &[2i64, 2, 3],
        }
        .unwrap();
        let info = stratum_info(&strata).unwrap();
        assert_eq!(info.len(), 2);
        assert_eq!(info.get(&Key::Int(2)), Some(&(50.0, 3.0)));
        assert_eq!(total_phase2_plots(&strata).unwrap(), 5);
    }

    #[test]
    fn test_expand_totals_ungrouped() {
        // Stratum 1: plots y = 1, 3 (both present); stratum 2: one plot
        // y = 4, the second plot has no rows (zero-completed).
        let plot_values = df! {
            "STRATUM_CN" => &[1i64, 1, 2],
            "PLT_CN" => &[11i64, 12, 21],
            "PLOT_VALUE" => &[1.0, 3.0, 4.0],
        }
        .unwrap();
        let totals = expand_totals(&plot_values, &strata_fixture(), &[]).unwrap();
        assert_eq!(totals.len(), 1);
        assert_relative_eq!(totals[0].estimate.total, 600.0);
        assert_relative_eq!(totals[0].estimate.variance, 80_000.0);
    }

    #[test]
    fn test_expand_totals_grouped_sums_to_ungrouped() {
        let plot_values = df! {
            "STRATUM_CN" => &[1i64, 1, 1, 2],
            "PLT_CN" => &[11i64, 11, 12, 21],
            "SPCD" => &[131i64, 110, 131, 131],
            "PLOT_VALUE" => &[1.0, 0.5, 3.0, 4.0],
        }
        .unwrap();
        let grouped = expand_totals(
            &plot_values,
            &strata_fixture(),
            &["SPCD".to_string()],
        )
        .unwrap();
        assert_eq!(grouped.len(), 2);
        let group_sum: f64 = grouped.iter().map(|g| g.estimate.total).sum();

        let ungrouped_values = df! {
            "STRATUM_CN" => &[1i64, 1, 2],
            "PLT_CN" => &[11i64, 12, 21],
            "PLOT_VALUE" => &[1.5, 3.0, 4.0],
        }
        .unwrap();
        let ungrouped = expand_totals(&ungrouped_values, &strata_fixture(), &[]).unwrap();
        assert_relative_eq!(group_sum, ungrouped[0].estimate.total, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_domain_yields_zero_with_plots_intact() {
        let plot_values = df! {
            "STRATUM_CN" => Vec::<i64>::new(),
            "PLT_CN" => Vec::<i64>::new(),
            "PLOT_VALUE" => Vec::<f64>::new(),
        }
        .unwrap();
        let totals = expand_totals(&plot_values, &strata_fixture(), &[]).unwrap();
        assert_eq!(totals.len(), 1);
        assert_relative_eq!(totals[0].estimate.total, 0.0);
        assert_relative_eq!(totals[0].estimate.variance, 0.0);
        // N_PLOTS comes from the strata, untouched by the empty domain.
        assert_eq!(total_phase2_plots(&strata_fixture()).unwrap(), 4);
    }

    #[test]
    fn test_expand_ratio_per_acre() {
        // Numerator: volume per plot; denominator: forest proportion.
        let num = df! {
            "STRATUM_CN" => &[1i64, 1],
            "PLT_CN" => &[11i64, 12],
            "PLOT_VALUE" => &[2.0, 4.0],
        }
        .unwrap();
        let den = df! {
            "STRATUM_CN" => &[1i64, 1],
            "PLT_CN" => &[11i64, 12],
            "PLOT_VALUE" => &[1.0, 1.0],
        }
        .unwrap();
        let strata = df! {
            "CN" => &[1i64],
            "EXPNS" => &[10.0],
            "P2POINTCNT" => &[2i64],
        }
        .unwrap();
        let ratios = expand_ratio(&num, &den, &strata, &[], &[]).unwrap();
        assert_eq!(ratios.len(), 1);
        let r = &ratios[0].ratio;
        assert_relative_eq!(r.ratio, 3.0);
        assert_relative_eq!(r.total_y, 60.0);
        assert_relative_eq!(r.total_x, 20.0);
        assert_relative_eq!(r.variance, 1.0);
    }

    #[test]
    fn test_expand_ratio_stratum_only_in_denominator() {
        // Stratum 2 has forest area but no numerator plots; its s²_x term
        // must still enter the ratio variance.
        let num = df! {
            "STRATUM_CN" => &[1i64],
            "PLT_CN" => &[11i64],
            "PLOT_VALUE" => &[2.0],
        }
        .unwrap();
        let den = df! {
            "STRATUM_CN" => &[1i64, 2, 2],
            "PLT_CN" => &[11i64, 21, 22],
            "PLOT_VALUE" => &[1.0, 1.0, 0.5],
        }
        .unwrap();
        let ratios = expand_ratio(&num, &den, &strata_fixture(), &[], &[]).unwrap();
        let r = &ratios[0];
        assert_relative_eq!(r.ratio.total_x, 100.0 + 75.0);
        // Denominator variance sees stratum 2's spread.
        assert!(r.variance_x > 0.0);
    }

    #[test]
    fn test_expand_ratio_denominator_groups_must_be_group_cols() {
        let num = df! {
            "STRATUM_CN" => &[1i64],
            "PLT_CN" => &[11i64],
            "PLOT_VALUE" => &[2.0],
        }
        .unwrap();
        let err = expand_ratio(
            &num,
            &num,
            &strata_fixture(),
            &[],
            &["OWNGRPCD".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, TaigaError::InvalidConfig(_)));
    }

    #[test]
    fn test_keys_to_columns_types() {
        let keys = vec![
            vec![Key::Int(131), Key::Str("Timber".to_string())],
            vec![Key::Null, Key::Str("Water".to_string())],
        ];
        let cols = keys_to_columns(
            &["SPCD".to_string(), "LAND_TYPE".to_string()],
            &keys,
        );
        assert_eq!(cols.len(), 2);
        assert_eq!(
            cols[0].as_materialized_series().dtype(),
            &DataType::Int64
        );
        assert_eq!(
            cols[1].as_materialized_series().dtype(),
            &DataType::String
        );
    }

    #[test]
    fn test_constant_group_column_matches_ungrouped() {
        // Adding a redundant constant group column leaves totals alone.
        let plot_values = df! {
            "STRATUM_CN" => &[1i64, 1, 2],
            "PLT_CN" => &[11i64, 12, 21],
            "CONSTANT" => &[7i64, 7, 7],
            "PLOT_VALUE" => &[1.0, 3.0, 4.0],
        }
        .unwrap();
        let grouped = expand_totals(
            &plot_values,
            &strata_fixture(),
            &["CONSTANT".to_string()],
        )
        .unwrap();
        assert_eq!(grouped.len(), 1);
        assert_relative_eq!(grouped[0].estimate.total, 600.0);
        assert_relative_eq!(grouped[0].estimate.variance, 80_000.0);
    }
}
