#![forbid(unsafe_code)]

//! Query planning for the taiga estimation engine.
//!
//! Typed builders produce [`QueryPlan`]s for the plot, condition, tree, and
//! stratification tables with projection and predicate push-down; the
//! [`JoinOptimizer`] resolves physical join strategies with a cost model
//! specialized to the join shapes FIA estimation always produces.

/// The version of the taiga-query crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod builders;
pub mod optimizer;
pub mod plan;

pub use builders::{
    CompositeQueryBuilder, ConditionQueryBuilder, EstimationPlans, PlotQueryBuilder,
    StratificationQueryBuilder, TreeQueryBuilder,
};
pub use optimizer::{JoinInput, JoinNode, JoinOptimizer, OptimizeReport};
pub use plan::{FilterOp, JoinHow, JoinStrategy, QueryColumn, QueryFilter, QueryJoin, QueryPlan};
