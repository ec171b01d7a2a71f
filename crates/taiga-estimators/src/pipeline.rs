//! The estimation pipeline state machine.
//!
//! Every estimator is a linear pipeline: INIT → LOADED → FILTERED →
//! VALUED → AGGREGATED → EXPANDED → VARIANCED → FORMATTED. A failure at
//! any stage terminates the run with the stage name attached to the error;
//! there are no retries.

use polars::prelude::DataFrame;
use taiga_traits::codes::MetricFamily;
use taiga_traits::{Result, TaigaError};

use taiga_db::Fia;

/// The stages of an estimation run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    /// Config validated, nothing loaded.
    Init,
    /// Frames loaded from the backend.
    Loaded,
    /// Domain indicators attached (no rows dropped).
    Filtered,
    /// Per-record values computed.
    Valued,
    /// Tree → condition → plot roll-up done.
    Aggregated,
    /// Stratified expansion done.
    Expanded,
    /// Variances computed.
    Varianced,
    /// Output frame assembled.
    Formatted,
}

impl PipelineStage {
    /// Stage name for error context and tracing.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Loaded => "load",
            Self::Filtered => "filter",
            Self::Valued => "value",
            Self::Aggregated => "aggregate",
            Self::Expanded => "expand",
            Self::Varianced => "variance",
            Self::Formatted => "format",
        }
    }
}

/// Tracks pipeline progress for one estimation run.
///
/// Stages only advance forward; skipping or revisiting a stage is a
/// programming error surfaced as `Other`.
#[derive(Debug)]
pub struct PipelineState {
    estimator: &'static str,
    stage: PipelineStage,
}

impl PipelineState {
    /// A fresh pipeline at INIT.
    #[must_use]
    pub const fn new(estimator: &'static str) -> Self {
        Self {
            estimator,
            stage: PipelineStage::Init,
        }
    }

    /// Current stage.
    #[must_use]
    pub const fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Advance to the next stage, which must follow the current one.
    pub fn advance(&mut self, to: PipelineStage) -> Result<()> {
        if to <= self.stage {
            return Err(TaigaError::Other(format!(
                "{}: pipeline cannot move from {} back to {}",
                self.estimator,
                self.stage.name(),
                to.name()
            )));
        }
        tracing::debug!(estimator = self.estimator, stage = to.name(), "pipeline stage");
        self.stage = to;
        Ok(())
    }

    /// Context string for error wrapping at the current stage.
    #[must_use]
    pub fn context(&self) -> String {
        format!("{} {}", self.estimator, self.stage.name())
    }
}

/// The estimator interface: one linear `estimate` run per invocation.
pub trait Estimator {
    /// Estimator name used in errors and logs.
    fn name(&self) -> &'static str;

    /// The metric family, which determines the required evaluation type.
    fn metric(&self) -> MetricFamily;

    /// Run the full pipeline and return the formatted frame.
    fn estimate(&self, fia: &Fia) -> Result<DataFrame>;
}
