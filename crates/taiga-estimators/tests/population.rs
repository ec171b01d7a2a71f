//! End-to-end estimation over a synthetic two-stratum population.
//!
//! The fixture is small enough to hand-compute every expansion: two strata
//! (EXPNS 1000 and 500 acres/plot, two plots each), four plots with mixed
//! forest/nonforest conditions, and four trees spanning the microplot and
//! subplot diameter ranges.

use approx::assert_relative_eq;
use polars::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use taiga_db::Fia;
use taiga_estimators::{area, site_index, tpa, tree_count, volume};
use taiga_traits::config::{EstimatorConfig, EstimatorConfigV2, LandType, TreeType};

static FIXTURE_ID: AtomicUsize = AtomicUsize::new(0);

fn write_table(dir: &std::path::Path, name: &str, mut df: DataFrame) {
    let file = std::fs::File::create(dir.join(format!("{name}.parquet"))).unwrap();
    ParquetWriter::new(file).finish(&mut df).unwrap();
}

/// Build the synthetic population store and open it with the evaluation
/// clipped.
fn open_population() -> Fia {
    let dir = std::env::temp_dir().join(format!(
        "taiga-population-{}-{}",
        std::process::id(),
        FIXTURE_ID.fetch_add(1, Ordering::SeqCst)
    ));
    let _ = std::fs::create_dir_all(&dir);

    write_table(
        &dir,
        "POP_EVAL",
        df! {
            "CN" => &[1i64],
            "EVALID" => &[132301i64],
            "EVAL_DESCR" => &["GEORGIA 2023"],
            "END_INVYR" => &[2023i64],
            "STATECD" => &[13i64],
        }
        .unwrap(),
    );
    write_table(
        &dir,
        "POP_EVAL_TYP",
        df! {
            "EVAL_CN" => &[1i64, 1],
            "EVAL_TYP" => &["EXPCURR", "EXPVOL"],
        }
        .unwrap(),
    );
    write_table(
        &dir,
        "POP_STRATUM",
        df! {
            "CN" => &[100i64, 200],
            "EVALID" => &[132301i64, 132301],
            "ESTN_UNIT_CN" => &[1i64, 1],
            "EXPNS" => &[1000.0, 500.0],
            "P1POINTCNT" => &[20i64, 10],
            "P2POINTCNT" => &[2i64, 2],
            "ADJ_FACTOR_SUBP" => &[1.0, 1.0],
            "ADJ_FACTOR_MICR" => &[12.0, 12.0],
            "ADJ_FACTOR_MACR" => &[0.25, 0.25],
        }
        .unwrap(),
    );
    write_table(
        &dir,
        "POP_PLOT_STRATUM_ASSGN",
        df! {
            "PLT_CN" => &[11i64, 12, 21, 22],
            "STRATUM_CN" => &[100i64, 100, 200, 200],
            "EVALID" => &[132301i64; 4],
        }
        .unwrap(),
    );
    write_table(
        &dir,
        "PLOT",
        df! {
            "CN" => &[11i64, 12, 21, 22],
            "STATECD" => &[13i64; 4],
            "COUNTYCD" => &[1i64; 4],
            "INVYR" => &[2023i64; 4],
            "MACRO_BREAKPOINT_DIA" => &[None::<f64>, None, None, None],
            "PLOT_STATUS_CD" => &[1i64; 4],
            "REMPER" => &[5.0; 4],
            "LAT" => &[33.0, 33.5, 34.0, 34.5],
            "LON" => &[-83.0, -83.5, -84.0, -84.5],
        }
        .unwrap(),
    );
    write_table(
        &dir,
        "COND",
        df! {
            "PLT_CN" => &[11i64, 12, 12, 21, 22],
            "CONDID" => &[1i64, 1, 2, 1, 1],
            "COND_STATUS_CD" => &[1i64, 1, 2, 1, 2],
            "CONDPROP_UNADJ" => &[1.0, 0.5, 0.5, 1.0, 1.0],
            "PROP_BASIS" => &["SUBP", "SUBP", "SUBP", "SUBP", "SUBP"],
            "FORTYPCD" => &[Some(161i64), Some(161), None, Some(503), None],
            "OWNGRPCD" => &[Some(40i64), Some(40), Some(40), Some(30), Some(30)],
            "SITECLCD" => &[Some(3i64), Some(3), None, Some(4), None],
            "RESERVCD" => &[Some(0i64), Some(0), Some(0), Some(0), Some(0)],
            "STDSZCD" => &[Some(1i64), Some(1), None, Some(2), None],
            "SICOND" => &[Some(70.0), Some(80.0), None, Some(60.0), None],
            "SIBASE" => &[Some(25i64), Some(25), None, Some(25), None],
        }
        .unwrap(),
    );
    write_table(
        &dir,
        "TREE",
        df! {
            "CN" => &[1001i64, 1002, 1003, 1004],
            "PLT_CN" => &[11i64, 11, 12, 21],
            "CONDID" => &[1i64, 1, 1, 1],
            "SPCD" => &[131i64, 110, 131, 131],
            "DIA" => &[10.0, 4.0, 15.0, 20.0],
            "STATUSCD" => &[1i64, 1, 2, 1],
            "TPA_UNADJ" => &[6.0, 75.0, 6.0, 6.0],
            "TREECLCD" => &[2i64, 2, 2, 2],
            "VOLCFNET" => &[20.0, 1.0, 30.0, 50.0],
            "DRYBIO_AG" => &[2000.0, 100.0, 3000.0, 5000.0],
            "DRYBIO_BG" => &[500.0, 25.0, 750.0, 1250.0],
        }
        .unwrap(),
    );

    let mut fia = Fia::open(&dir).unwrap();
    fia.clip_by_evalid(&[132301]).unwrap();
    fia
}

fn f64_at(df: &DataFrame, column: &str, idx: usize) -> f64 {
    df.column(column)
        .unwrap()
        .as_materialized_series()
        .cast(&DataType::Float64)
        .unwrap()
        .f64()
        .unwrap()
        .get(idx)
        .unwrap()
}

fn i64_at(df: &DataFrame, column: &str, idx: usize) -> i64 {
    df.column(column)
        .unwrap()
        .as_materialized_series()
        .cast(&DataType::Int64)
        .unwrap()
        .i64()
        .unwrap()
        .get(idx)
        .unwrap()
}

#[test]
fn tpa_totals_match_hand_expansion() {
    let fia = open_population();
    let config = EstimatorConfig {
        totals: true,
        ..Default::default()
    };
    let frame = tpa(&fia, &config).unwrap();
    assert_eq!(frame.height(), 1);

    // Plot values: plot 11 = 6·1 + 75·12 = 906 (dead tree on plot 12
    // contributes zero but keeps the plot), plot 21 = 6.
    // Total = 1000·906 + 500·6.
    assert_relative_eq!(f64_at(&frame, "TPA_TOTAL", 0), 909_000.0, epsilon = 1e-6);

    // Forest land base: 1000·(1.0 + 0.5) + 500·1.0 = 2000 acres.
    assert_relative_eq!(f64_at(&frame, "TPA", 0), 454.5, epsilon = 1e-9);

    // Phase-2 plots, independent of the domain.
    assert_eq!(i64_at(&frame, "N_PLOTS", 0), 4);

    // Hand-computed stratified variance of the total:
    // stratum 100: s² = 2·453² = 410418 → 1000²·2·410418
    // stratum 200: s² = 18            → 500²·2·18
    let expected_var = 1000.0f64.powi(2) * 2.0 * 410_418.0 + 500.0f64.powi(2) * 2.0 * 18.0;
    let se = f64_at(&frame, "TPA_TOTAL_SE", 0);
    assert_relative_eq!(se, expected_var.sqrt(), epsilon = 1e-6);
}

#[test]
fn per_acre_equals_total_over_area() {
    let fia = open_population();
    let config = EstimatorConfig {
        totals: true,
        ..Default::default()
    };
    let frame = tpa(&fia, &config).unwrap();

    let area_config = EstimatorConfigV2::from_base(EstimatorConfig {
        totals: true,
        ..Default::default()
    });
    let area_frame = area(&fia, &area_config).unwrap();

    let ratio = f64_at(&frame, "TPA_TOTAL", 0) / f64_at(&area_frame, "AREA_TOTAL", 0);
    assert_relative_eq!(f64_at(&frame, "TPA", 0), ratio, epsilon = 1e-6);
}

#[test]
fn area_proportion_and_total() {
    let fia = open_population();
    let config = EstimatorConfigV2::from_base(EstimatorConfig {
        totals: true,
        ..Default::default()
    });
    let frame = area(&fia, &config).unwrap();
    assert_eq!(frame.height(), 1);

    // Forest acres: 1000·1.5 + 500·1.0.
    assert_relative_eq!(f64_at(&frame, "AREA_TOTAL", 0), 2_000.0, epsilon = 1e-6);
    // All sampled land: 1000·2 + 500·2 = 3000 → proportion 2/3.
    assert_relative_eq!(f64_at(&frame, "AREA", 0), 2.0 / 3.0, epsilon = 1e-9);
    assert_eq!(i64_at(&frame, "N_PLOTS", 0), 4);
    assert!(f64_at(&frame, "AREA_SE", 0) >= 0.0);
}

#[test]
fn volume_growing_stock_totals() {
    let fia = open_population();
    let config = EstimatorConfigV2::from_base(EstimatorConfig {
        tree_type: TreeType::Gs,
        totals: true,
        ..Default::default()
    });
    let frame = volume(&fia, &config).unwrap();

    // Growing stock: trees 1001 (20·6), 1002 (1·75·12), 1004 (50·6); the
    // dead tree 1003 is out. Plots: 11 → 1020, 21 → 300.
    assert_relative_eq!(
        f64_at(&frame, "VOLCFNET_TOTAL", 0),
        1000.0 * 1020.0 + 500.0 * 300.0,
        epsilon = 1e-6
    );
}

#[test]
fn tree_count_with_species_domain() {
    let fia = open_population();
    let config = EstimatorConfig {
        tree_domain: Some("SPCD == 131".to_string()),
        ..Default::default()
    };
    let frame = tree_count(&fia, &config).unwrap();

    // Live loblolly: tree 1001 (6/acre) and 1004 (6/acre).
    assert_relative_eq!(
        f64_at(&frame, "TREE_COUNT", 0),
        1000.0 * 6.0 + 500.0 * 6.0,
        epsilon = 1e-6
    );
    assert_eq!(i64_at(&frame, "N_PLOTS", 0), 4);
}

#[test]
fn empty_domain_yields_zero_not_error() {
    let fia = open_population();
    let config = EstimatorConfig {
        tree_domain: Some("SPCD == 9999".to_string()),
        ..Default::default()
    };
    let frame = tree_count(&fia, &config).unwrap();
    assert_eq!(frame.height(), 1);
    assert_relative_eq!(f64_at(&frame, "TREE_COUNT", 0), 0.0);
    assert_relative_eq!(f64_at(&frame, "TREE_COUNT_SE", 0), 0.0);
    // The phase-2 plot count never reacts to the domain.
    assert_eq!(i64_at(&frame, "N_PLOTS", 0), 4);
}

#[test]
fn species_groups_sum_to_ungrouped_total() {
    let fia = open_population();
    let grouped_config = EstimatorConfig {
        by_species: true,
        totals: true,
        ..Default::default()
    };
    let grouped = tpa(&fia, &grouped_config).unwrap();
    assert_eq!(grouped.height(), 2);

    let group_sum: f64 = (0..grouped.height())
        .map(|idx| f64_at(&grouped, "TPA_TOTAL", idx))
        .sum();
    assert_relative_eq!(group_sum, 909_000.0, epsilon = 1e-6);

    // Groups come out sorted by key.
    assert_eq!(i64_at(&grouped, "SPCD", 0), 110);
    assert_eq!(i64_at(&grouped, "SPCD", 1), 131);
}

#[test]
fn redundant_constant_group_changes_nothing() {
    let fia = open_population();
    let config = EstimatorConfig {
        grp_by: vec!["STATECD".to_string()],
        totals: true,
        ..Default::default()
    };
    let frame = tpa(&fia, &config).unwrap();
    assert_eq!(frame.height(), 1);
    assert_relative_eq!(f64_at(&frame, "TPA_TOTAL", 0), 909_000.0, epsilon = 1e-6);
    assert_eq!(i64_at(&frame, "STATECD", 0), 13);
}

#[test]
fn size_class_grouping_buckets_by_diameter() {
    let fia = open_population();
    let config = EstimatorConfig {
        by_size_class: true,
        totals: true,
        ..Default::default()
    };
    let frame = tpa(&fia, &config).unwrap();

    let classes: Vec<String> = (0..frame.height())
        .map(|idx| {
            frame
                .column("SIZE_CLASS")
                .unwrap()
                .as_materialized_series()
                .str()
                .unwrap()
                .get(idx)
                .unwrap()
                .to_string()
        })
        .collect();
    // Live trees at 4.0", 10.0", and 20.0".
    assert!(classes.contains(&"1.0-4.9".to_string()));
    assert!(classes.contains(&"10.0-19.9".to_string()));
    assert!(classes.contains(&"20.0-29.9".to_string()));
}

#[test]
fn timber_land_base_shrinks_area() {
    let fia = open_population();
    let forest = area(&fia, &EstimatorConfigV2::from_base(EstimatorConfig {
        totals: true,
        ..Default::default()
    }))
    .unwrap();
    let timber = area(&fia, &EstimatorConfigV2::from_base(EstimatorConfig {
        land_type: LandType::Timber,
        totals: true,
        ..Default::default()
    }))
    .unwrap();
    // Every forest condition in the fixture is productive and unreserved,
    // so timber equals forest here; both stay positive and ordered.
    assert!(f64_at(&timber, "AREA_TOTAL", 0) <= f64_at(&forest, "AREA_TOTAL", 0));
    assert!(f64_at(&timber, "AREA_TOTAL", 0) > 0.0);
}

#[test]
fn repeated_estimates_are_identical() {
    let fia = open_population();
    let config = EstimatorConfig {
        by_species: true,
        totals: true,
        ..Default::default()
    };
    let first = tpa(&fia, &config).unwrap();
    let second = tpa(&fia, &config).unwrap();
    assert!(first.equals_missing(&second));
}

#[test]
fn site_index_weighted_mean() {
    let fia = open_population();
    let config = EstimatorConfig::default();
    let frame = site_index(&fia, &config).unwrap();
    assert_eq!(frame.height(), 1);
    assert_eq!(i64_at(&frame, "SIBASE", 0), 25);

    // Weighted by forest condition proportion within each plot:
    // numerator plots: 70·1.0, 80·0.5, 60·1.0; denominator 1.0, 0.5, 1.0.
    // Ŷ = 1000·(70 + 40) + 500·60 = 140000; X̂ = 2000 → mean 70.
    assert_relative_eq!(f64_at(&frame, "SI_MEAN", 0), 70.0, epsilon = 1e-9);
}

#[test]
fn variance_flag_emits_var_columns() {
    let fia = open_population();
    let config = EstimatorConfig {
        variance: true,
        totals: true,
        ..Default::default()
    };
    let frame = tpa(&fia, &config).unwrap();
    assert!(frame.column("TPA_VAR").is_ok());
    assert!(frame.column("TPA_TOTAL_VAR").is_ok());
    assert!(frame.column("TPA_SE").is_err());

    // Var = SE² against the SE run.
    let se_frame = tpa(
        &fia,
        &EstimatorConfig {
            totals: true,
            ..Default::default()
        },
    )
    .unwrap();
    let var = f64_at(&frame, "TPA_TOTAL_VAR", 0);
    let se = f64_at(&se_frame, "TPA_TOTAL_SE", 0);
    assert_relative_eq!(var, se * se, epsilon = 1e-6 * var.max(1.0));
}
