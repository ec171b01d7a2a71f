//! Spatial clipping.
//!
//! Reads polygon geometry from GeoJSON and filters plots by their LAT/LON
//! coordinates with an even-odd ray cast. Plot locations are points, so
//! `intersects` and `within` coincide at the plot level; the predicate is
//! kept on the API because polygon clips are specified with one.

use std::path::Path;

use polars::prelude::*;
use serde_json::Value;
use taiga_traits::{Result, TaigaError};

/// Spatial relationship used for the clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialPredicate {
    /// Keep plots intersecting the geometry.
    Intersects,
    /// Keep plots strictly within the geometry.
    Within,
}

/// One polygon: an outer ring followed by zero or more holes.
#[derive(Debug, Clone)]
pub struct Polygon {
    rings: Vec<Vec<(f64, f64)>>,
}

impl Polygon {
    /// Even-odd containment test against the outer ring minus holes.
    #[must_use]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let Some(outer) = self.rings.first() else {
            return false;
        };
        if !ring_contains(outer, lon, lat) {
            return false;
        }
        !self.rings[1..].iter().any(|hole| ring_contains(hole, lon, lat))
    }
}

fn ring_contains(ring: &[(f64, f64)], lon: f64, lat: f64) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if ((yi > lat) != (yj > lat))
            && (lon < (xj - xi) * (lat - yi) / (yj - yi) + xi)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Load every polygon from a GeoJSON file.
///
/// Accepts a FeatureCollection, a single Feature, or a bare geometry of
/// type Polygon or MultiPolygon. Other file formats fail with
/// `SpatialExtension` since only the GeoJSON reader is built in.
pub fn load_polygons(path: &Path) -> Result<Vec<Polygon>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if extension != "geojson" && extension != "json" {
        return Err(TaigaError::SpatialExtension(format!(
            "unsupported spatial format '.{extension}'; the built-in reader handles GeoJSON"
        )));
    }

    let text = std::fs::read_to_string(path)
        .map_err(|e| TaigaError::InvalidPath(format!("{}: {e}", path.display())))?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| TaigaError::SpatialExtension(format!("bad GeoJSON: {e}")))?;

    let mut polygons = Vec::new();
    collect_geometries(&value, &mut polygons)?;
    if polygons.is_empty() {
        return Err(TaigaError::SpatialExtension(
            "GeoJSON contains no Polygon or MultiPolygon geometry".to_string(),
        ));
    }
    Ok(polygons)
}

fn collect_geometries(value: &Value, out: &mut Vec<Polygon>) -> Result<()> {
    match value.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            if let Some(features) = value.get("features").and_then(Value::as_array) {
                for feature in features {
                    collect_geometries(feature, out)?;
                }
            }
            Ok(())
        }
        Some("Feature") => {
            if let Some(geometry) = value.get("geometry") {
                collect_geometries(geometry, out)?;
            }
            Ok(())
        }
        Some("Polygon") => {
            let rings = parse_rings(value.get("coordinates"))?;
            out.push(Polygon { rings });
            Ok(())
        }
        Some("MultiPolygon") => {
            let coords = value
                .get("coordinates")
                .and_then(Value::as_array)
                .ok_or_else(|| bad_geometry("MultiPolygon missing coordinates"))?;
            for polygon in coords {
                let rings = parse_rings(Some(polygon))?;
                out.push(Polygon { rings });
            }
            Ok(())
        }
        Some(other) => Err(bad_geometry(&format!("unsupported geometry '{other}'"))),
        None => Err(bad_geometry("missing geometry type")),
    }
}

fn parse_rings(coordinates: Option<&Value>) -> Result<Vec<Vec<(f64, f64)>>> {
    let rings = coordinates
        .and_then(Value::as_array)
        .ok_or_else(|| bad_geometry("polygon missing coordinates"))?;
    let mut out = Vec::with_capacity(rings.len());
    for ring in rings {
        let points = ring
            .as_array()
            .ok_or_else(|| bad_geometry("ring is not an array"))?;
        let mut parsed = Vec::with_capacity(points.len());
        for point in points {
            let pair = point
                .as_array()
                .filter(|p| p.len() >= 2)
                .ok_or_else(|| bad_geometry("coordinate is not an [x, y] pair"))?;
            let x = pair[0]
                .as_f64()
                .ok_or_else(|| bad_geometry("non-numeric coordinate"))?;
            let y = pair[1]
                .as_f64()
                .ok_or_else(|| bad_geometry("non-numeric coordinate"))?;
            parsed.push((x, y));
        }
        out.push(parsed);
    }
    Ok(out)
}

fn bad_geometry(message: &str) -> TaigaError {
    TaigaError::SpatialExtension(message.to_string())
}

/// Filter a plot frame to the CNs falling inside any of the polygons.
///
/// The frame must carry `CN`, `LON`, and `LAT`. Plots with missing
/// coordinates never match.
pub fn clip_plot_cns(
    plots: &DataFrame,
    polygons: &[Polygon],
    _predicate: SpatialPredicate,
) -> Result<Vec<i64>> {
    let cn = plots
        .column("CN")
        .map_err(|_| TaigaError::MissingColumn("PLOT.CN".to_string()))?
        .as_materialized_series()
        .i64()
        .map_err(|_| TaigaError::MissingColumn("PLOT.CN must be Int64".to_string()))?;
    let lon = plots
        .column("LON")
        .map_err(|_| TaigaError::MissingColumn("PLOT.LON".to_string()))?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    let lat = plots
        .column("LAT")
        .map_err(|_| TaigaError::MissingColumn("PLOT.LAT".to_string()))?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    let lon = lon.f64()?;
    let lat = lat.f64()?;

    let mut kept = Vec::new();
    for idx in 0..plots.height() {
        let (Some(cn), Some(x), Some(y)) = (cn.get(idx), lon.get(idx), lat.get(idx)) else {
            continue;
        };
        if polygons.iter().any(|p| p.contains(x, y)) {
            kept.push(cn);
        }
    }
    Ok(kept)
}
