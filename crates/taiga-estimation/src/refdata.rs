//! In-memory reference lookups.
//!
//! Small static snapshots of the FIA reference tables used for grouping
//! enrichment: ownership-group names, forest-type-group bands, and common
//! species names. Lookups are pure functions with deterministic fallbacks;
//! a full `REF_SPECIES` table from the database takes precedence when the
//! caller joins one.

use polars::prelude::*;
use taiga_traits::Result;

/// `OWNGRPCD` display names.
pub const OWNERSHIP_GROUPS: [(i64, &str); 4] = [
    (10, "Forest Service"),
    (20, "Other federal"),
    (30, "State and local government"),
    (40, "Private"),
];

/// Ownership-group name for a code.
#[must_use]
pub fn ownership_group_name(code: i64) -> &'static str {
    OWNERSHIP_GROUPS
        .iter()
        .find(|(c, _)| *c == code)
        .map_or("Unknown", |(_, name)| name)
}

/// Forest-type-group bands: `(band_start, band_end, group_code, name)`.
/// A `FORTYPCD` belongs to the band containing it.
pub const FOREST_TYPE_GROUPS: [(i64, i64, i64, &str); 28] = [
    (100, 119, 100, "White / red / jack pine group"),
    (120, 139, 120, "Spruce / fir group"),
    (140, 159, 140, "Longleaf / slash pine group"),
    (160, 169, 160, "Loblolly / shortleaf pine group"),
    (170, 179, 170, "Other eastern softwoods group"),
    (180, 199, 180, "Pinyon / juniper group"),
    (200, 219, 200, "Douglas-fir group"),
    (220, 239, 220, "Ponderosa pine group"),
    (240, 259, 240, "Western white pine group"),
    (260, 279, 260, "Fir / spruce / mountain hemlock group"),
    (280, 299, 280, "Lodgepole pine group"),
    (300, 319, 300, "Hemlock / Sitka spruce group"),
    (320, 339, 320, "Western larch group"),
    (340, 359, 340, "Redwood group"),
    (360, 369, 360, "Other western softwoods group"),
    (370, 379, 370, "California mixed conifer group"),
    (380, 399, 380, "Exotic softwoods group"),
    (400, 499, 400, "Oak / pine group"),
    (500, 599, 500, "Oak / hickory group"),
    (600, 699, 600, "Oak / gum / cypress group"),
    (700, 799, 700, "Elm / ash / cottonwood group"),
    (800, 899, 800, "Maple / beech / birch group"),
    (900, 919, 900, "Aspen / birch group"),
    (920, 939, 920, "Western oak group"),
    (940, 949, 940, "Tanoak / laurel group"),
    (950, 979, 950, "Other western hardwoods group"),
    (980, 989, 980, "Tropical hardwoods group"),
    (990, 998, 990, "Exotic hardwoods group"),
];

/// Forest-type group `(code, name)` for a `FORTYPCD`.
///
/// Code 999 and anything outside the bands falls back to the nonstocked
/// group.
#[must_use]
pub fn forest_type_group(fortypcd: i64) -> (i64, &'static str) {
    FOREST_TYPE_GROUPS
        .iter()
        .find(|(lo, hi, _, _)| (*lo..=*hi).contains(&fortypcd))
        .map_or((999, "Nonstocked"), |(_, _, code, name)| (*code, name))
}

/// Common species names for frequently-reported `SPCD` values.
const SPECIES_NAMES: [(i64, &str); 24] = [
    (12, "balsam fir"),
    (68, "eastern redcedar"),
    (110, "shortleaf pine"),
    (111, "slash pine"),
    (121, "longleaf pine"),
    (126, "pitch pine"),
    (129, "eastern white pine"),
    (131, "loblolly pine"),
    (132, "Virginia pine"),
    (202, "Douglas-fir"),
    (122, "ponderosa pine"),
    (261, "eastern hemlock"),
    (316, "red maple"),
    (318, "sugar maple"),
    (371, "yellow birch"),
    (531, "American beech"),
    (611, "sweetgum"),
    (621, "yellow-poplar"),
    (694, "black cherry"),
    (802, "white oak"),
    (806, "scarlet oak"),
    (812, "southern red oak"),
    (833, "northern red oak"),
    (837, "black oak"),
];

/// Common name for a species code, or a code-derived descriptor when the
/// species is absent from the snapshot.
#[must_use]
pub fn species_common_name(spcd: i64) -> String {
    SPECIES_NAMES
        .iter()
        .find(|(code, _)| *code == spcd)
        .map_or_else(|| format!("Species {spcd}"), |(_, name)| (*name).to_string())
}

/// The species snapshot as a joinable frame (`SPCD`, `COMMON_NAME`).
pub fn species_frame() -> Result<DataFrame> {
    let codes: Vec<i64> = SPECIES_NAMES.iter().map(|(c, _)| *c).collect();
    let names: Vec<&str> = SPECIES_NAMES.iter().map(|(_, n)| *n).collect();
    Ok(df! {
        "SPCD" => codes,
        "COMMON_NAME" => names,
    }?)
}

/// Enrich a frame carrying `OWNGRPCD` with an `OWNERSHIP_GROUP` column.
pub fn with_ownership_group(df: DataFrame) -> Result<DataFrame> {
    let codes = df
        .column("OWNGRPCD")?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let codes = codes.i64()?;
    let names: Vec<&str> = codes
        .into_iter()
        .map(|code| code.map_or("Unknown", ownership_group_name))
        .collect();
    let mut df = df;
    df.with_column(Series::new("OWNERSHIP_GROUP".into(), names))?;
    Ok(df)
}

/// Enrich a frame carrying `FORTYPCD` with `FORTYPGRP` (group code) and
/// `FOREST_TYPE_GROUP` (group name) columns.
pub fn with_forest_type_group(df: DataFrame) -> Result<DataFrame> {
    let codes = df
        .column("FORTYPCD")?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let codes = codes.i64()?;
    let mut group_codes = Vec::with_capacity(codes.len());
    let mut group_names = Vec::with_capacity(codes.len());
    for code in codes {
        match code {
            Some(code) => {
                let (grp, name) = forest_type_group(code);
                group_codes.push(Some(grp));
                group_names.push(Some(name));
            }
            None => {
                group_codes.push(None);
                group_names.push(None);
            }
        }
    }
    let mut df = df;
    df.with_column(Series::new("FORTYPGRP".into(), group_codes))?;
    df.with_column(Series::new("FOREST_TYPE_GROUP".into(), group_names))?;
    Ok(df)
}

/// Enrich a frame carrying `SPCD` with a `COMMON_NAME` column via a left
/// join against the snapshot (weak relationship: unknown codes fall back
/// to a code-derived descriptor).
pub fn with_species_names(df: DataFrame) -> Result<DataFrame> {
    let species = species_frame()?;
    let joined = df
        .lazy()
        .join(
            species.lazy(),
            [col("SPCD")],
            [col("SPCD")],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(
            when(col("COMMON_NAME").is_null())
                .then(concat_str(
                    [lit("Species "), col("SPCD").cast(DataType::String)],
                    "",
                    true,
                ))
                .otherwise(col("COMMON_NAME"))
                .alias("COMMON_NAME"),
        )
        .collect()?;
    Ok(joined)
}
