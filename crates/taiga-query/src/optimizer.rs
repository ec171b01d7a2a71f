//! Cost-based join optimizer specialized to FIA join patterns.
//!
//! The optimizer walks the join tree bottom-up, applies the FIA-specific
//! rules first (the shapes every estimation run produces), then falls back
//! to the generic cost model. It also performs predicate push-down over the
//! plan and records which filters moved and which remain post-join.

use serde::{Deserialize, Serialize};

use crate::builders::baseline_rows;
use crate::plan::{JoinHow, JoinStrategy, QueryPlan};

/// An input to a join: a base table or a prior join result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JoinInput {
    /// A base table scan.
    Table {
        /// Table name.
        name: String,
        /// Estimated rows after pushed filters.
        rows: u64,
        /// Join key uniqueness on this side.
        unique_keys: bool,
    },
    /// A nested join node.
    Node(Box<JoinNode>),
}

impl JoinInput {
    /// A table input with baseline row estimates.
    #[must_use]
    pub fn table(name: &str) -> Self {
        Self::Table {
            name: name.to_string(),
            rows: baseline_rows(name),
            unique_keys: matches!(name, "PLOT" | "POP_STRATUM" | "REF_SPECIES"),
        }
    }

    /// A table input with an explicit row estimate.
    #[must_use]
    pub fn table_with_rows(name: &str, rows: u64, unique_keys: bool) -> Self {
        Self::Table {
            name: name.to_string(),
            rows,
            unique_keys,
        }
    }

    /// Estimated output rows of this input.
    #[must_use]
    pub fn rows(&self) -> u64 {
        match self {
            Self::Table { rows, .. } => *rows,
            Self::Node(node) => node.output_rows(),
        }
    }

    /// Base-table name when this input is a plain scan.
    #[must_use]
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Self::Table { name, .. } => Some(name),
            Self::Node(_) => None,
        }
    }

    fn unique_keys(&self) -> bool {
        match self {
            Self::Table { unique_keys, .. } => *unique_keys,
            Self::Node(_) => false,
        }
    }
}

/// One node of the join tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinNode {
    /// Left input.
    pub left: JoinInput,
    /// Right input.
    pub right: JoinInput,
    /// Join keys (left side names).
    pub keys: Vec<String>,
    /// Join type.
    pub how: JoinHow,
    /// Physical strategy after optimization.
    pub strategy: JoinStrategy,
}

impl JoinNode {
    /// A new node with the strategy left to the optimizer.
    #[must_use]
    pub fn new(left: JoinInput, right: JoinInput, keys: Vec<String>, how: JoinHow) -> Self {
        Self {
            left,
            right,
            keys,
            how,
            strategy: JoinStrategy::Auto,
        }
    }

    /// Estimated output cardinality under the standard rules: INNER is
    /// bounded by the smaller side when its keys are unique, LEFT keeps at
    /// least the left side, RIGHT at least the right, CROSS multiplies.
    #[must_use]
    pub fn output_rows(&self) -> u64 {
        let l = self.left.rows();
        let r = self.right.rows();
        match self.how {
            JoinHow::Inner => {
                if self.left.unique_keys() || self.right.unique_keys() {
                    l.min(r).max(1)
                } else {
                    l.max(r)
                }
            }
            JoinHow::Left => l.max(1),
            JoinHow::Right => r.max(1),
            JoinHow::Full => l.max(r).max(1),
            JoinHow::Cross => l.saturating_mul(r).max(1),
        }
    }

    /// Cost of executing this node under a strategy, in abstract row
    /// operations.
    #[must_use]
    pub fn cost(&self, strategy: JoinStrategy) -> f64 {
        let l = self.left.rows() as f64;
        let r = self.right.rows() as f64;
        let build = l.min(r);
        let probe = l.max(r);
        match strategy {
            // Build a table on the smaller side, probe with the larger.
            JoinStrategy::Hash => build * 1.5 + probe,
            // Sort both sides, then a linear merge.
            JoinStrategy::SortMerge => {
                l * l.max(2.0).log2() + r * r.max(2.0).log2() + (l + r)
            }
            // Ship the smaller side to every partition, then hash.
            JoinStrategy::Broadcast => build * 4.0 + probe,
            JoinStrategy::NestedLoop => l * r,
            JoinStrategy::Auto => f64::INFINITY,
        }
    }

    /// Pick the cheapest strategy for this node, FIA rules first.
    pub fn optimize(&mut self) {
        if let JoinInput::Node(node) = &mut self.left {
            node.optimize();
        }
        if let JoinInput::Node(node) = &mut self.right {
            node.optimize();
        }

        if let Some(strategy) = self.fia_rule() {
            self.strategy = strategy;
            return;
        }

        if self.how == JoinHow::Cross {
            self.strategy = JoinStrategy::NestedLoop;
            return;
        }

        let candidates = [
            JoinStrategy::Hash,
            JoinStrategy::SortMerge,
            JoinStrategy::Broadcast,
        ];
        self.strategy = candidates
            .into_iter()
            .min_by(|a, b| {
                self.cost(*a)
                    .partial_cmp(&self.cost(*b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(JoinStrategy::Hash);
    }

    /// The FIA-specific strategy rules, applied before the generic model:
    /// tree↔plot hash-joins building on the plot side, the stratification
    /// chain broadcasts the small population tables, and species lookups
    /// broadcast `REF_SPECIES`.
    fn fia_rule(&self) -> Option<JoinStrategy> {
        let left = self.left.table_name();
        let right = self.right.table_name();
        match (left, right) {
            (_, Some("REF_SPECIES")) | (Some("REF_SPECIES"), _) => Some(JoinStrategy::Broadcast),
            (_, Some("POP_STRATUM")) | (Some("POP_STRATUM"), _) => Some(JoinStrategy::Broadcast),
            (Some("PLOT"), Some("POP_PLOT_STRATUM_ASSGN"))
            | (Some("POP_PLOT_STRATUM_ASSGN"), Some("PLOT")) => Some(JoinStrategy::Broadcast),
            (Some("TREE"), Some("PLOT")) | (Some("PLOT"), Some("TREE")) => {
                Some(JoinStrategy::Hash)
            }
            _ => None,
        }
    }
}

/// What the optimizer did to a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizeReport {
    /// `(table, column)` pairs of filters attached to leaf scans.
    pub pushed: Vec<(String, String)>,
    /// Columns of filters left at the post-join step.
    pub residual: Vec<String>,
    /// Strategies chosen per join edge, in plan order.
    pub strategies: Vec<JoinStrategy>,
}

/// Rewrites plans: resolves `Auto` join strategies and separates pushed
/// from residual filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinOptimizer;

impl JoinOptimizer {
    /// Optimize a plan in place and report what moved.
    pub fn optimize(plan: &mut QueryPlan) -> OptimizeReport {
        let mut report = OptimizeReport::default();

        for filter in &plan.filters {
            if filter.can_push_down {
                if let Some(table) = &filter.table {
                    report.pushed.push((table.clone(), filter.column.clone()));
                    continue;
                }
            }
            report.residual.push(filter.column.clone());
        }

        for join in &mut plan.joins {
            if join.strategy != JoinStrategy::Auto {
                report.strategies.push(join.strategy);
                continue;
            }
            let mut node = JoinNode::new(
                JoinInput::table(&join.left),
                JoinInput::table(&join.right),
                join.left_on.clone(),
                join.how,
            );
            node.optimize();
            join.strategy = node.strategy;
            report.strategies.push(node.strategy);
        }

        tracing::debug!(
            pushed = report.pushed.len(),
            residual = report.residual.len(),
            "optimized query plan"
        );
        report
    }
}
