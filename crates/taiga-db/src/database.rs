//! The `Fia` database handle.
//!
//! Owns one backend connection, the active clip state (EVALIDs, states,
//! spatially-selected plots), and the instance caches. Estimators receive a
//! `&Fia` and read everything through it; nothing here is global.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use polars::prelude::*;
use taiga_traits::codes::MetricFamily;
use taiga_traits::{DomainExpr, InventoryFrame, Result, TaigaError};

use crate::backend::{Backend, EngineKind};
use crate::columnar::ColumnarBackend;
use crate::resolver::{EvalidResolver, RecommendedEvalid};
use crate::spatial::{self, SpatialPredicate};
use crate::sqlite::SqliteBackend;

/// An open FIA database with its clip state.
#[derive(Debug)]
pub struct Fia {
    backend: Box<dyn Backend>,
    evalids: Option<Vec<i64>>,
    states: Option<Vec<i64>>,
    plot_cns: Option<Vec<i64>>,
    last_recommendation: Option<RecommendedEvalid>,
    ref_cache: Mutex<HashMap<String, Arc<DataFrame>>>,
    plan_cache: Mutex<HashMap<u128, Arc<DataFrame>>>,
    closed: bool,
}

impl Fia {
    /// Open a database, detecting the engine from the path: a directory is
    /// a columnar parquet store, a file is a SQLite database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let kind = if path.is_dir() {
            EngineKind::Columnar
        } else {
            EngineKind::Sqlite
        };
        Self::open_with(path, kind)
    }

    /// Open a database with an explicit engine.
    pub fn open_with(path: impl AsRef<Path>, kind: EngineKind) -> Result<Self> {
        let path = path.as_ref();
        let backend: Box<dyn Backend> = match kind {
            EngineKind::Sqlite => Box::new(SqliteBackend::open(path)?),
            EngineKind::Columnar => Box::new(ColumnarBackend::open(path)?),
        };
        tracing::debug!(path = %path.display(), ?kind, "opened FIA database");
        Ok(Self {
            backend,
            evalids: None,
            states: None,
            plot_cns: None,
            last_recommendation: None,
            ref_cache: Mutex::new(HashMap::new()),
            plan_cache: Mutex::new(HashMap::new()),
            closed: false,
        })
    }

    /// Close the handle. Further reads fail with `QueryError`.
    pub fn close(&mut self) {
        self.closed = true;
        if let Ok(mut cache) = self.ref_cache.lock() {
            cache.clear();
        }
        if let Ok(mut cache) = self.plan_cache.lock() {
            cache.clear();
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TaigaError::QueryError("connection closed".to_string()));
        }
        Ok(())
    }

    /// The backend behind this handle.
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// The engine kind behind this handle.
    pub fn engine(&self) -> EngineKind {
        self.backend.engine()
    }

    /// Set the per-query timeout on the backend.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.backend.set_timeout(timeout);
    }

    /// Active EVALID clip, if any.
    #[must_use]
    pub fn evalids(&self) -> Option<&[i64]> {
        self.evalids.as_deref()
    }

    /// Active state clip, if any.
    #[must_use]
    pub fn states(&self) -> Option<&[i64]> {
        self.states.as_deref()
    }

    /// Active spatial plot clip, if any.
    #[must_use]
    pub fn plot_cns(&self) -> Option<&[i64]> {
        self.plot_cns.as_deref()
    }

    /// The resolver's reasoning from the last `clip_most_recent` call.
    #[must_use]
    pub fn last_recommendation(&self) -> Option<&RecommendedEvalid> {
        self.last_recommendation.as_ref()
    }

    /// Restrict to the given state FIPS codes.
    pub fn clip_by_state(&mut self, states: &[i64]) -> Result<&mut Self> {
        self.ensure_open()?;
        if states.is_empty() {
            return Err(TaigaError::InvalidConfig(
                "clip_by_state requires at least one state code".to_string(),
            ));
        }
        let mut sorted = states.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        self.states = Some(sorted);
        Ok(self)
    }

    /// Restrict to explicit evaluations, bypassing the resolver. The clip
    /// is idempotent: applying the same set twice is a no-op.
    pub fn clip_by_evalid(&mut self, evalids: &[i64]) -> Result<&mut Self> {
        self.ensure_open()?;
        if evalids.is_empty() {
            return Err(TaigaError::InvalidConfig(
                "clip_by_evalid requires at least one EVALID".to_string(),
            ));
        }
        let mut sorted = evalids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if self.evalids.as_deref() == Some(&sorted) {
            return Ok(self);
        }
        self.evalids = Some(sorted);
        self.last_recommendation = None;
        Ok(self)
    }

    /// Resolve and clip to the most recent evaluation(s) for a metric.
    ///
    /// With a state clip active, one evaluation is resolved per state;
    /// otherwise the whole catalog is ranked at once.
    pub fn clip_most_recent(&mut self, metric: MetricFamily) -> Result<&mut Self> {
        self.ensure_open()?;
        let states = self.states.clone();
        let mut evalids = Vec::new();
        match states {
            Some(states) => {
                for state in states {
                    let rec = EvalidResolver::recommend(self.backend(), Some(state), metric)?;
                    tracing::info!(evalid = rec.evalid, "{}", rec.explanation);
                    evalids.push(rec.evalid);
                    self.last_recommendation = Some(rec);
                }
            }
            None => {
                let rec = EvalidResolver::recommend(self.backend(), None, metric)?;
                tracing::info!(evalid = rec.evalid, "{}", rec.explanation);
                evalids.push(rec.evalid);
                self.last_recommendation = Some(rec);
            }
        }
        evalids.sort_unstable();
        evalids.dedup();
        self.evalids = Some(evalids);
        Ok(self)
    }

    /// Clip plots to a polygon file (GeoJSON).
    pub fn clip_by_polygon(
        &mut self,
        path: impl AsRef<Path>,
        predicate: SpatialPredicate,
    ) -> Result<&mut Self> {
        self.ensure_open()?;
        self.backend.load_spatial_extension()?;
        let polygons = spatial::load_polygons(path.as_ref())?;

        let filter = self.state_filter_expr();
        let plots = self.backend.read_table(
            "PLOT",
            Some(&[
                "CN".to_string(),
                "LON".to_string(),
                "LAT".to_string(),
                "STATECD".to_string(),
            ]),
            filter.as_ref(),
            None,
        )?;
        let kept = spatial::clip_plot_cns(&plots, &polygons, predicate)?;
        if kept.is_empty() {
            return Err(TaigaError::NoSpatialFilter(format!(
                "polygon {} selected no plots",
                path.as_ref().display()
            )));
        }
        tracing::info!(plots = kept.len(), "spatial clip selected plots");
        self.plot_cns = Some(kept);
        Ok(self)
    }

    fn state_filter_expr(&self) -> Option<DomainExpr> {
        let states = self.states.as_ref()?;
        let list = states
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        DomainExpr::parse(&format!("STATECD IN ({list})")).ok()
    }

    /// Read a table eagerly through the backend.
    pub fn read_table(
        &self,
        name: &str,
        columns: Option<&[String]>,
        filter: Option<&DomainExpr>,
    ) -> Result<InventoryFrame> {
        self.ensure_open()?;
        Ok(InventoryFrame::new(self.backend.read_table(
            name, columns, filter, None,
        )?))
    }

    /// Materialize a frame through the instance plan cache.
    ///
    /// `key` is a query-plan cache key; the first caller
    /// computes, later callers get the cached frame. Single-writer upsert
    /// behind a mutex.
    pub fn cached_plan_frame(
        &self,
        key: u128,
        compute: impl FnOnce() -> Result<DataFrame>,
    ) -> Result<Arc<DataFrame>> {
        self.ensure_open()?;
        if let Ok(cache) = self.plan_cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return Ok(Arc::clone(hit));
            }
        }
        let frame = Arc::new(compute()?);
        if let Ok(mut cache) = self.plan_cache.lock() {
            cache.insert(key, Arc::clone(&frame));
        }
        Ok(frame)
    }

    /// Scan a table lazily through the backend.
    pub fn scan_table(
        &self,
        name: &str,
        columns: Option<&[String]>,
        filter: Option<&DomainExpr>,
    ) -> Result<LazyFrame> {
        self.ensure_open()?;
        self.backend.scan_table(name, columns, filter)
    }

    /// Read a small reference table through the instance cache.
    ///
    /// Single-writer upsert behind a mutex; entries live for the process
    /// lifetime.
    pub fn read_ref_table(&self, name: &str) -> Result<Arc<DataFrame>> {
        self.ensure_open()?;
        if let Ok(cache) = self.ref_cache.lock() {
            if let Some(hit) = cache.get(name) {
                return Ok(Arc::clone(hit));
            }
        }
        let df = Arc::new(self.backend.read_table(name, None, None, None)?);
        if let Ok(mut cache) = self.ref_cache.lock() {
            cache.insert(name.to_string(), Arc::clone(&df));
        }
        Ok(df)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FIXTURE_ID: AtomicUsize = AtomicUsize::new(0);

    fn fixture_store() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "taiga-fia-test-{}-{}",
            std::process::id(),
            FIXTURE_ID.fetch_add(1, Ordering::SeqCst)
        ));
        let _ = std::fs::create_dir_all(&dir);
        let mut plot = df! {
            "CN" => &[101i64, 102],
            "STATECD" => &[13i64, 48],
            "LON" => &[-83.0, -97.0],
            "LAT" => &[33.0, 31.0],
        }
        .unwrap();
        let file = std::fs::File::create(dir.join("PLOT.parquet")).unwrap();
        ParquetWriter::new(file).finish(&mut plot).unwrap();
        dir
    }

    #[test]
    fn test_open_detects_columnar_dir() {
        let fia = Fia::open(fixture_store()).unwrap();
        assert_eq!(fia.engine(), EngineKind::Columnar);
    }

    #[test]
    fn test_clip_by_evalid_idempotent() {
        let mut fia = Fia::open(fixture_store()).unwrap();
        fia.clip_by_evalid(&[132301, 132301, 131700]).unwrap();
        assert_eq!(fia.evalids(), Some(&[131700i64, 132301][..]));
        // Same set again is a no-op.
        fia.clip_by_evalid(&[131700, 132301]).unwrap();
        assert_eq!(fia.evalids(), Some(&[131700i64, 132301][..]));
        assert!(fia.clip_by_evalid(&[]).is_err());
    }

    #[test]
    fn test_clip_by_state_dedup() {
        let mut fia = Fia::open(fixture_store()).unwrap();
        fia.clip_by_state(&[48, 13, 13]).unwrap();
        assert_eq!(fia.states(), Some(&[13i64, 48][..]));
    }

    #[test]
    fn test_close_blocks_reads() {
        let mut fia = Fia::open(fixture_store()).unwrap();
        fia.close();
        assert!(fia.read_table("PLOT", None, None).is_err());
        assert!(fia.clip_by_state(&[13]).is_err());
    }

    #[test]
    fn test_ref_cache_reuses_frame() {
        let fia = Fia::open(fixture_store()).unwrap();
        let a = fia.read_ref_table("PLOT").unwrap();
        let b = fia.read_ref_table("PLOT").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_clip_by_polygon() {
        let dir = fixture_store();
        let geojson = dir.join("clip.geojson");
        std::fs::write(
            &geojson,
            r#"{"type": "Polygon", "coordinates": [[[-85.0, 30.0], [-80.0, 30.0], [-80.0, 35.0], [-85.0, 35.0], [-85.0, 30.0]]]}"#,
        )
        .unwrap();

        let mut fia = Fia::open(&dir).unwrap();
        fia.clip_by_polygon(&geojson, SpatialPredicate::Intersects)
            .unwrap();
        assert_eq!(fia.plot_cns(), Some(&[101i64][..]));

        // A polygon over the open ocean selects nothing.
        let empty = dir.join("empty.geojson");
        std::fs::write(
            &empty,
            r#"{"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]}"#,
        )
        .unwrap();
        let err = fia
            .clip_by_polygon(&empty, SpatialPredicate::Within)
            .unwrap_err();
        assert!(matches!(err, TaigaError::NoSpatialFilter(_)));
    }
}
