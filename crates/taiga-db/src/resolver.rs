//! Evaluation resolution.
//!
//! Given a state and a metric family, picks the recommended `EVALID`:
//! statewide evaluations beat regional ones, newer end years beat older,
//! and a candidate only qualifies when it actually has assigned plots.
//! Year inference always comes from the EVALID digits, never the clock.

use polars::prelude::*;
use taiga_traits::codes::{evalid_year, EvalType, MetricFamily};
use taiga_traits::{DomainExpr, Result, TaigaError};

use crate::backend::Backend;

/// A recommended evaluation with the reasoning that selected it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendedEvalid {
    /// The selected evaluation.
    pub evalid: i64,
    /// End inventory year of the evaluation.
    pub end_invyr: i64,
    /// Whether the evaluation covers the whole state.
    pub statewide: bool,
    /// Phase-2 plots assigned to the evaluation.
    pub plot_count: i64,
    /// The evaluation type that matched.
    pub eval_type: EvalType,
    /// The criterion that fired, for display.
    pub explanation: String,
}

/// One evaluation candidate before ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Evaluation identifier.
    pub evalid: i64,
    /// End inventory year (from the catalog, or the EVALID digits).
    pub end_invyr: i64,
    /// No regional qualifier in the description.
    pub statewide: bool,
    /// Assigned plot count.
    pub plot_count: i64,
}

/// Resolves recommended evaluations against a backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalidResolver;

impl EvalidResolver {
    /// Recommend an `EVALID` for the metric, optionally restricted to one
    /// state.
    pub fn recommend(
        backend: &dyn Backend,
        state_code: Option<i64>,
        metric: MetricFamily,
    ) -> Result<RecommendedEvalid> {
        for eval_type in EvalType::for_metric(metric) {
            let candidates = Self::candidates(backend, state_code, *eval_type)?;
            if let Some(best) = rank_candidates(&candidates) {
                let criterion = if best.statewide {
                    "statewide evaluation preferred over regional"
                } else {
                    "no statewide evaluation; best regional candidate"
                };
                return Ok(RecommendedEvalid {
                    evalid: best.evalid,
                    end_invyr: best.end_invyr,
                    statewide: best.statewide,
                    plot_count: best.plot_count,
                    eval_type: *eval_type,
                    explanation: format!(
                        "{criterion}; most recent END_INVYR {} for {}",
                        best.end_invyr,
                        eval_type.as_str()
                    ),
                });
            }
        }
        Err(TaigaError::NoEvalid(format!(
            "no {metric} evaluation with assigned plots{}",
            state_code
                .map(|s| format!(" for state {s}"))
                .unwrap_or_default()
        )))
    }

    /// Validate that an explicitly-chosen evaluation exists and has plots.
    pub fn validate(backend: &dyn Backend, evalid: i64) -> Result<i64> {
        let filter = DomainExpr::parse(&format!("EVALID == {evalid}"))?;
        let count = backend
            .read_table(
                "POP_PLOT_STRATUM_ASSGN",
                Some(&["EVALID".to_string()]),
                Some(&filter),
                Some(1),
            )?
            .height();
        if count == 0 {
            return Err(TaigaError::NoEvalid(format!(
                "EVALID {evalid} has no plot assignments"
            )));
        }
        Ok(evalid)
    }

    /// Fetch candidate evaluations of one type for a state.
    pub fn candidates(
        backend: &dyn Backend,
        state_code: Option<i64>,
        eval_type: EvalType,
    ) -> Result<Vec<Candidate>> {
        let eval_filter = state_code
            .map(|s| DomainExpr::parse(&format!("STATECD == {s}")))
            .transpose()?;

        let wanted = ["CN", "EVALID", "EVAL_DESCR", "END_INVYR", "STATECD"];
        let available = backend.schema("POP_EVAL")?;
        let columns: Vec<String> = wanted
            .iter()
            .filter(|c| available.contains_key(**c))
            .map(|c| (*c).to_string())
            .collect();

        let pop_eval = backend.read_table("POP_EVAL", Some(&columns), eval_filter.as_ref(), None)?;
        let type_filter = DomainExpr::parse(&format!("EVAL_TYP == '{}'", eval_type.as_str()))?;
        let pop_eval_typ = backend.read_table(
            "POP_EVAL_TYP",
            Some(&["EVAL_CN".to_string(), "EVAL_TYP".to_string()]),
            Some(&type_filter),
            None,
        )?;
        let assignments = backend.read_table(
            "POP_PLOT_STRATUM_ASSGN",
            Some(&["EVALID".to_string()]),
            None,
            None,
        )?;

        candidates_from_frames(&pop_eval, &pop_eval_typ, &assignments)
    }
}

/// Join the catalog frames into ranked candidates.
pub fn candidates_from_frames(
    pop_eval: &DataFrame,
    pop_eval_typ: &DataFrame,
    assignments: &DataFrame,
) -> Result<Vec<Candidate>> {
    let counts = assignments
        .clone()
        .lazy()
        .group_by([col("EVALID")])
        .agg([len().alias("PLOT_COUNT")])
        .collect()?;

    let joined = pop_eval
        .clone()
        .lazy()
        .join(
            pop_eval_typ.clone().lazy(),
            [col("CN")],
            [col("EVAL_CN")],
            JoinArgs::new(JoinType::Inner),
        )
        .join(
            counts.lazy(),
            [col("EVALID")],
            [col("EVALID")],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    let evalid = joined
        .column("EVALID")?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let evalid = evalid.i64()?;
    let plot_count = joined
        .column("PLOT_COUNT")?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let plot_count = plot_count.i64()?;
    let end_invyr = match joined.column("END_INVYR") {
        Ok(column) => Some(column.as_materialized_series().cast(&DataType::Int64)?),
        Err(_) => None,
    };
    let end_invyr = end_invyr.as_ref().map(|c| c.i64()).transpose()?;
    let descr = joined
        .column("EVAL_DESCR")
        .ok()
        .and_then(|c| c.as_materialized_series().str().ok().cloned());

    let mut out = Vec::with_capacity(joined.height());
    for idx in 0..joined.height() {
        let Some(evalid) = evalid.get(idx) else {
            continue;
        };
        let statewide = descr
            .as_ref()
            .and_then(|d| d.get(idx))
            .map_or(true, |d| !d.contains('('));
        out.push(Candidate {
            evalid,
            end_invyr: end_invyr
                .and_then(|col| col.get(idx))
                .unwrap_or_else(|| evalid_year(evalid)),
            statewide,
            plot_count: plot_count.get(idx).unwrap_or(0),
        });
    }
    Ok(out)
}

/// Order candidates by `(statewide DESC, END_INVYR DESC, EVALID DESC)` and
/// return the first with assigned plots.
#[must_use]
pub fn rank_candidates(candidates: &[Candidate]) -> Option<Candidate> {
    let mut sorted: Vec<&Candidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| {
        b.statewide
            .cmp(&a.statewide)
            .then(b.end_invyr.cmp(&a.end_invyr))
            .then(b.evalid.cmp(&a.evalid))
    });
    sorted.into_iter().find(|c| c.plot_count > 0).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(evalid: i64, end_invyr: i64, statewide: bool, plot_count: i64) -> Candidate {
        Candidate {
            evalid,
            end_invyr,
            statewide,
            plot_count,
        }
    }

    #[test]
    fn test_statewide_beats_regional_same_year() {
        // Texas: the statewide evaluation outranks the east/west regional
        // evaluations from the same cycle.
        let candidates = vec![
            candidate(482201, 2022, true, 10_000),
            candidate(482221, 2022, false, 6_000),
            candidate(482222, 2022, false, 4_000),
        ];
        let best = rank_candidates(&candidates).unwrap();
        assert_eq!(best.evalid, 482201);
    }

    #[test]
    fn test_most_recent_year_wins() {
        let candidates = vec![
            candidate(132101, 2021, true, 5_000),
            candidate(132301, 2023, true, 5_100),
        ];
        assert_eq!(rank_candidates(&candidates).unwrap().evalid, 132301);
    }

    #[test]
    fn test_candidates_without_plots_skipped() {
        let candidates = vec![
            candidate(132301, 2023, true, 0),
            candidate(132101, 2021, true, 5_000),
        ];
        assert_eq!(rank_candidates(&candidates).unwrap().evalid, 132101);
    }

    #[test]
    fn test_empty_candidates() {
        assert!(rank_candidates(&[]).is_none());
        assert!(rank_candidates(&[candidate(1, 2020, true, 0)]).is_none());
    }

    #[test]
    fn test_evalid_breaks_ties() {
        let candidates = vec![
            candidate(132302, 2023, true, 100),
            candidate(132303, 2023, true, 100),
        ];
        assert_eq!(rank_candidates(&candidates).unwrap().evalid, 132303);
    }

    #[test]
    fn test_candidates_from_frames() {
        let pop_eval = df! {
            "CN" => &[1i64, 2, 3],
            "EVALID" => &[132301i64, 132201, 132321],
            "EVAL_DESCR" => &["GEORGIA 2023", "GEORGIA 2022", "GEORGIA 2023 (NORTH)"],
            "END_INVYR" => &[2023i64, 2022, 2023],
            "STATECD" => &[13i64, 13, 13],
        }
        .unwrap();
        let pop_eval_typ = df! {
            "EVAL_CN" => &[1i64, 2, 3],
            "EVAL_TYP" => &["EXPCURR", "EXPCURR", "EXPCURR"],
        }
        .unwrap();
        let assignments = df! {
            "EVALID" => &[132301i64, 132301, 132201, 132321],
        }
        .unwrap();

        let candidates =
            candidates_from_frames(&pop_eval, &pop_eval_typ, &assignments).unwrap();
        assert_eq!(candidates.len(), 3);

        let best = rank_candidates(&candidates).unwrap();
        assert_eq!(best.evalid, 132301);
        assert!(best.statewide);
        assert_eq!(best.plot_count, 2);

        // The regional candidate was detected by its parenthetical.
        let regional = candidates.iter().find(|c| c.evalid == 132321).unwrap();
        assert!(!regional.statewide);
    }

    #[test]
    fn test_end_invyr_falls_back_to_evalid_digits() {
        let pop_eval = df! {
            "CN" => &[1i64],
            "EVALID" => &[132301i64],
            "EVAL_DESCR" => &["GEORGIA"],
            "STATECD" => &[13i64],
        }
        .unwrap();
        let pop_eval_typ = df! {
            "EVAL_CN" => &[1i64],
            "EVAL_TYP" => &["EXPCURR"],
        }
        .unwrap();
        let assignments = df! { "EVALID" => &[132301i64] }.unwrap();

        let candidates =
            candidates_from_frames(&pop_eval, &pop_eval_typ, &assignments).unwrap();
        assert_eq!(candidates[0].end_invyr, 2023);
    }
}
