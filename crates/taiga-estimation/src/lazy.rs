//! Lazy-frame wrapper.
//!
//! A [`LazyPlan`] carries a polars `LazyFrame` together with the collection
//! strategy that should materialize it. The wrapper is threaded through the
//! pipeline explicitly, with no ambient frame registry, and
//! `collect()` is the only place materialization happens.

use polars::prelude::*;
use taiga_traits::config::{CollectionStrategy, LazyEvaluationConfig, LazyMode};
use taiga_traits::Result;

/// A deferred frame plus its materialization strategy.
#[derive(Clone)]
pub struct LazyPlan {
    frame: LazyFrame,
    strategy: CollectionStrategy,
    estimated_rows: Option<u64>,
}

impl std::fmt::Debug for LazyPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyPlan")
            .field("strategy", &self.strategy)
            .field("estimated_rows", &self.estimated_rows)
            .finish_non_exhaustive()
    }
}

impl LazyPlan {
    /// Wrap a lazy frame with a strategy.
    #[must_use]
    pub const fn new(frame: LazyFrame, strategy: CollectionStrategy) -> Self {
        Self {
            frame,
            strategy,
            estimated_rows: None,
        }
    }

    /// Wrap with a row estimate for the adaptive strategy.
    #[must_use]
    pub const fn with_estimated_rows(mut self, rows: Option<u64>) -> Self {
        self.estimated_rows = rows;
        self
    }

    /// The underlying lazy frame.
    #[must_use]
    pub fn frame(&self) -> &LazyFrame {
        &self.frame
    }

    /// Apply a transformation to the underlying lazy frame.
    #[must_use]
    pub fn map(self, f: impl FnOnce(LazyFrame) -> LazyFrame) -> Self {
        Self {
            frame: f(self.frame),
            ..self
        }
    }

    /// The effective strategy once `adaptive` is resolved against the
    /// configured threshold.
    #[must_use]
    pub fn effective_strategy(&self, config: &LazyEvaluationConfig) -> CollectionStrategy {
        match self.strategy {
            CollectionStrategy::Adaptive => {
                let big = self
                    .estimated_rows
                    .is_some_and(|rows| rows as usize > config.threshold_rows);
                if big {
                    CollectionStrategy::Streaming
                } else {
                    CollectionStrategy::Sequential
                }
            }
            other => other,
        }
    }

    /// Materialize the frame.
    ///
    /// With lazy mode disabled the plan collects sequentially regardless of
    /// strategy; otherwise `streaming` engages the streaming engine and
    /// `adaptive` resolves by the row-count threshold. `parallel` batches
    /// belong to [`collect_all_plans`]; a lone parallel plan collects
    /// sequentially.
    pub fn collect(self, config: &LazyEvaluationConfig) -> Result<DataFrame> {
        let strategy = if config.mode == LazyMode::Disabled {
            CollectionStrategy::Sequential
        } else {
            self.effective_strategy(config)
        };
        let frame = match strategy {
            CollectionStrategy::Streaming => self.frame.with_streaming(true),
            _ => self.frame,
        };
        Ok(frame.collect()?)
    }
}

/// Collect a batch of plans.
///
/// Parallelism across plans comes from the engine's own thread pool; the
/// batch is bounded by `max_parallel_collections` chunks so memory stays
/// within the configured budget.
pub fn collect_all_plans(
    plans: Vec<LazyPlan>,
    config: &LazyEvaluationConfig,
) -> Result<Vec<DataFrame>> {
    let width = config.max_parallel_collections.max(1);
    let mut out = Vec::with_capacity(plans.len());
    for chunk in plans.chunks(width) {
        for plan in chunk {
            out.push(plan.clone().collect(config)?);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LazyFrame {
        df! {
            "PLT_CN" => &[1i64, 2, 3],
            "VALUE" => &[1.0, 2.0, 3.0],
        }
        .unwrap()
        .lazy()
    }

    #[test]
    fn test_collect_sequential() {
        let plan = LazyPlan::new(sample(), CollectionStrategy::Sequential);
        let df = plan.collect(&LazyEvaluationConfig::default()).unwrap();
        assert_eq!(df.height(), 3);
    }

    #[test]
    fn test_adaptive_resolves_by_threshold() {
        let config = LazyEvaluationConfig {
            threshold_rows: 100,
            ..Default::default()
        };
        let small = LazyPlan::new(sample(), CollectionStrategy::Adaptive)
            .with_estimated_rows(Some(10));
        assert_eq!(
            small.effective_strategy(&config),
            CollectionStrategy::Sequential
        );
        let large = LazyPlan::new(sample(), CollectionStrategy::Adaptive)
            .with_estimated_rows(Some(1_000));
        assert_eq!(
            large.effective_strategy(&config),
            CollectionStrategy::Streaming
        );
        // Still materializes correctly either way.
        assert_eq!(large.collect(&config).unwrap().height(), 3);
    }

    #[test]
    fn test_disabled_mode_forces_sequential_collect() {
        let config = LazyEvaluationConfig {
            mode: LazyMode::Disabled,
            ..Default::default()
        };
        let plan = LazyPlan::new(sample(), CollectionStrategy::Streaming);
        assert_eq!(plan.collect(&config).unwrap().height(), 3);
    }

    #[test]
    fn test_collect_all_plans() {
        let config = LazyEvaluationConfig::default();
        let plans = vec![
            LazyPlan::new(sample(), CollectionStrategy::Parallel),
            LazyPlan::new(sample(), CollectionStrategy::Parallel),
        ];
        let frames = collect_all_plans(plans, &config).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].height(), 3);
    }

    #[test]
    fn test_map_transforms_frame() {
        let plan = LazyPlan::new(sample(), CollectionStrategy::Sequential)
            .map(|lf| lf.filter(col("VALUE").gt(lit(1.5))));
        let df = plan.collect(&LazyEvaluationConfig::default()).unwrap();
        assert_eq!(df.height(), 2);
    }
}
