//! Statistical computations and parallel reduction operations
//!
//! This module provides the numerical building blocks of the indicator
//! functions: NaN-skipping reductions, resampling into time buckets,
//! quantiles and run-length encoding.
//!
//! # Organization
//!
//! This module is organized into submodules:
//! - [`operations`]: Core statistical operations and traits
//! - [`parallel`]: Parallel computation implementations
//! - [`resample`]: Bucketed and grouped reductions over the time axis
//! - [`quantile`]: Sample quantiles
//! - [`run_length`]: Spell detection and rolling windows

pub mod operations;
pub mod parallel;
pub mod quantile;
pub mod resample;
pub mod run_length;

// Re-export the main types and functions for convenience
pub use operations::{QuantileInterpolation, StatOperation, StatisticalReduction};
pub use parallel::{
    map_time_lanes, parallel_max_axis, parallel_mean_axis, parallel_min_axis, parallel_std_axis,
    parallel_sum_axis,
};
pub use quantile::{percentiles, quantile};
pub use resample::{group_reduce, resample, resample_op, resample_with_events};
pub use run_length::{run_lengths, trailing_window};
