//! Query-plan model.
//!
//! Builders emit a [`QueryPlan`]: the tables touched, projected columns,
//! filters with push-down annotations, join edges with a chosen strategy,
//! and size estimates. Plans are plain data, lowered to the columnar
//! engine at the estimator layer, so they can be hashed for the
//! plan cache and inspected in tests.

use std::collections::BTreeSet;

use polars::prelude::Expr;
use serde::{Deserialize, Serialize};
use taiga_traits::expr::DomainExpr;

/// Operator carried by a [`QueryFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Membership in a literal list.
    In,
    /// Inclusive range.
    Between,
    /// Null check.
    IsNull,
    /// Non-null check.
    IsNotNull,
    /// An OR-compound or otherwise unsplittable predicate.
    Compound,
}

/// One filter in a plan. The predicate itself is kept as a domain
/// expression so it can compile to either engine; `op`/`column` summarize
/// it for costing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Primary column the filter constrains (first column for compounds).
    pub column: String,
    /// Summarized operator.
    pub op: FilterOp,
    /// The full predicate.
    pub predicate: DomainExpr,
    /// Table scope, when known.
    pub table: Option<String>,
    /// Whether the filter may move into the table scan.
    pub can_push_down: bool,
}

impl QueryFilter {
    /// Classify a parsed conjunct into a filter.
    ///
    /// Single-column predicates push down; OR-compounds and multi-column
    /// predicates stay at the post-join step.
    #[must_use]
    pub fn from_expr(predicate: DomainExpr, table: Option<&str>) -> Self {
        let columns = predicate.columns();
        let column = columns.iter().next().cloned().unwrap_or_default();
        let (op, can_push_down) = match &predicate {
            DomainExpr::Cmp { op, .. } => {
                use taiga_traits::expr::CmpOp;
                let op = match op {
                    CmpOp::Eq => FilterOp::Eq,
                    CmpOp::Ne => FilterOp::Ne,
                    CmpOp::Lt => FilterOp::Lt,
                    CmpOp::Le => FilterOp::Le,
                    CmpOp::Gt => FilterOp::Gt,
                    CmpOp::Ge => FilterOp::Ge,
                };
                (op, true)
            }
            DomainExpr::In { .. } => (FilterOp::In, true),
            DomainExpr::Between { .. } => (FilterOp::Between, true),
            DomainExpr::IsNull { negated: false, .. } => (FilterOp::IsNull, true),
            DomainExpr::IsNull { negated: true, .. } => (FilterOp::IsNotNull, true),
            DomainExpr::And(..) | DomainExpr::Or(..) => {
                (FilterOp::Compound, false)
            }
        };
        // A predicate spanning several columns cannot be attached to a
        // single leaf scan column, but still pushes down when its table
        // scope is known and it is not a compound.
        Self {
            column,
            op,
            predicate,
            table: table.map(str::to_string),
            can_push_down,
        }
    }

    /// Estimated fraction of rows passing this filter.
    #[must_use]
    pub fn selectivity(&self) -> f64 {
        match self.op {
            FilterOp::Eq => 0.1,
            FilterOp::Ne => 0.9,
            FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => 0.3,
            FilterOp::Between => 0.3,
            FilterOp::In => {
                let k = match &self.predicate {
                    DomainExpr::In { values, .. } => values.len(),
                    _ => 1,
                };
                (0.1 * k as f64).min(0.9)
            }
            FilterOp::IsNull => 0.05,
            FilterOp::IsNotNull => 0.9,
            FilterOp::Compound => 0.5,
        }
    }

    /// Lower to a polars boolean expression.
    #[must_use]
    pub fn to_polars(&self) -> Expr {
        self.predicate.to_polars()
    }
}

/// A projected column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryColumn {
    /// Column name.
    pub name: String,
    /// Owning table.
    pub table: String,
    /// Required for correctness (false = user extra).
    pub required: bool,
}

impl QueryColumn {
    /// A required projection.
    #[must_use]
    pub fn required(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            required: true,
        }
    }

    /// An optional (user-requested) projection.
    #[must_use]
    pub fn optional(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            required: false,
        }
    }
}

/// Join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinHow {
    /// Inner join.
    Inner,
    /// Left outer join.
    Left,
    /// Right outer join.
    Right,
    /// Full outer join.
    Full,
    /// Cross join.
    Cross,
}

/// Physical join strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinStrategy {
    /// Let the optimizer decide.
    Auto,
    /// Hash join, building on the smaller side.
    Hash,
    /// Sort-merge join.
    SortMerge,
    /// Broadcast the smaller side.
    Broadcast,
    /// Nested loop (cross products only).
    NestedLoop,
}

/// A join edge between two tables (or prior join results).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryJoin {
    /// Left input table.
    pub left: String,
    /// Right input table.
    pub right: String,
    /// Join keys on the left.
    pub left_on: Vec<String>,
    /// Join keys on the right.
    pub right_on: Vec<String>,
    /// Join type.
    pub how: JoinHow,
    /// Physical strategy (possibly `Auto` until optimized).
    pub strategy: JoinStrategy,
}

/// A complete query plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Tables touched.
    pub tables: BTreeSet<String>,
    /// Projected columns.
    pub columns: Vec<QueryColumn>,
    /// Filters, both push-downable and residual.
    pub filters: Vec<QueryFilter>,
    /// Join edges in application order.
    pub joins: Vec<QueryJoin>,
    /// Grouping columns.
    pub group_by: Vec<String>,
    /// Estimated input rows of the driving table.
    pub estimated_rows: Option<u64>,
}

impl QueryPlan {
    /// An empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: BTreeSet::new(),
            columns: Vec::new(),
            filters: Vec::new(),
            joins: Vec::new(),
            group_by: Vec::new(),
            estimated_rows: None,
        }
    }

    /// Combined selectivity of every filter, floored at `1e-4`.
    #[must_use]
    pub fn filter_selectivity(&self) -> f64 {
        let combined = self
            .filters
            .iter()
            .map(QueryFilter::selectivity)
            .product::<f64>();
        combined.max(1e-4)
    }

    /// Filters that push into the scan of `table`.
    #[must_use]
    pub fn pushed_filters(&self, table: &str) -> Vec<&QueryFilter> {
        self.filters
            .iter()
            .filter(|f| f.can_push_down && f.table.as_deref() == Some(table))
            .collect()
    }

    /// Filters applied after the joins.
    #[must_use]
    pub fn residual_filters(&self) -> Vec<&QueryFilter> {
        self.filters.iter().filter(|f| !f.can_push_down).collect()
    }

    /// Projected column names for `table`.
    #[must_use]
    pub fn projection(&self, table: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.columns
            .iter()
            .filter(|c| c.table == table)
            .map(|c| c.name.clone())
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    /// Stable 128-bit cache key over the canonicalized plan.
    ///
    /// Two FNV-1a passes with different offsets; the canonical text
    /// includes every field that changes the result set.
    #[must_use]
    pub fn cache_key(&self) -> u128 {
        let canonical = self.canonical_text();
        let lo = fnv1a64(canonical.as_bytes(), 0xcbf2_9ce4_8422_2325);
        let hi = fnv1a64(canonical.as_bytes(), 0x6c62_272e_07bb_0142);
        (u128::from(hi) << 64) | u128::from(lo)
    }

    fn canonical_text(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            out.push_str("t:");
            out.push_str(table);
            out.push('\n');
        }
        let mut cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("c:{}.{}:{}", c.table, c.name, c.required))
            .collect();
        cols.sort();
        for c in cols {
            out.push_str(&c);
            out.push('\n');
        }
        let mut filters: Vec<String> = self
            .filters
            .iter()
            .map(|f| {
                let (sql, params) = f.predicate.to_sql();
                format!("f:{}:{sql}:{params:?}", f.table.as_deref().unwrap_or("_"))
            })
            .collect();
        filters.sort();
        for f in filters {
            out.push_str(&f);
            out.push('\n');
        }
        for j in &self.joins {
            out.push_str(&format!(
                "j:{}->{}:{:?}->{:?}:{:?}\n",
                j.left, j.right, j.left_on, j.right_on, j.how
            ));
        }
        for g in &self.group_by {
            out.push_str("g:");
            out.push_str(g);
            out.push('\n');
        }
        out
    }
}

impl Default for QueryPlan {
    fn default() -> Self {
        Self::new()
    }
}

fn fnv1a64(bytes: &[u8], offset: u64) -> u64 {
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = offset;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
