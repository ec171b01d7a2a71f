#![forbid(unsafe_code)]

//! Estimation kernels for the taiga engine.
//!
//! Everything between the loaded frames and the formatted output lives
//! here: the lazy-frame wrapper and collection strategies, grouping and
//! domain-indicator construction, plot-size adjustment selection, the
//! two-stage tree → condition → plot aggregation, stratified expansion,
//! and the variance calculators.

/// The version of the taiga-estimation crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod adjustment;
pub mod aggregation;
pub mod domain;
pub mod expansion;
pub mod grouping;
pub mod lazy;
pub mod refdata;
pub mod variance;

pub use adjustment::{condition_adjustment_expr, grm_adjustment_expr, tree_adjustment_expr};
pub use aggregation::{
    complete_with_zero_plots, condition_value_expr, rollup_condition_to_plot,
    rollup_tree_to_condition, rollup_tree_to_plot, tree_value_expr,
};
pub use domain::{
    combined_indicator, domain_indicator, land_type_indicator, tree_class_indicator,
    tree_type_indicator, DOMAIN_IND,
};
pub use expansion::{
    expand_ratio, expand_totals, keys_to_columns, stratum_info, total_phase2_plots, GroupRatio,
    GroupTotal, Key, PLOT_VALUE,
};
pub use grouping::{derived_group_exprs, land_type_expr, resolve_group_columns, size_class_expr};
pub use lazy::{collect_all_plans, LazyPlan};
pub use variance::{
    cv_percent, ratio_of_means, standard_error, stratified_total, RatioEstimate, StratumMoments,
    TotalEstimate,
};
