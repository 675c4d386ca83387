//! climind: a generic climate index engine
//!
//! climind computes climate indices over gridded time series. An index is a
//! small pipeline: every input is compared to a [`Threshold`], the resulting
//! exceedances (or the raw values) are reduced over the buckets of an output
//! [`Frequency`], and the result is masked where inputs are missing and
//! labelled with generated metadata.
//!
//! ## Key Features
//!
//! - **Thresholds**: scalar, per-value sequence, per-grid-cell, day of year or
//!   period percentiles (with bootstrapping of in-base years), and bounded
//!   pairs joined by AND/OR, all buildable from a query such as `"> 90 doy_per"`
//! - **Generic indicators**: twenty reducers from `count_occurrences` to
//!   `difference_of_means`, shared by every standard index
//! - **Calendar-aware resampling**: years, months, seasons (including seasons
//!   spanning the new year) and month selections, with time bounds
//! - **Missing-value policies**: `any`, `at_least_n`, `pct`, `wmo`, `skip`
//! - **Parallel processing**: every reduction runs per grid cell on Rayon
//!
//! ## Module Organization
//!
//! - [`threshold`]: threshold kinds, operators, logical links and the query factory
//! - [`generic`]: reducers, the indicator registry and orchestration
//! - [`climate_variable`]: studied variables with their threshold and reference
//! - [`index_config`]: per-index configuration
//! - [`frequency`]: output frequencies and bucketing
//! - [`data_array`]: the labelled array type
//! - [`statistics`]: parallel bucketed reductions and quantiles
//! - [`units`], [`calendar`]: unit conversion and calendar helpers
//! - [`parallel`]: thread pool configuration
//! - [`errors`]: centralized error handling
//!
//! ## Usage
//!
//! ```rust,no_run
//! use climind::prelude::*;
//! # fn daily_tasmax() -> DataArray { unimplemented!() }
//!
//! // Number of summer days per year
//! let tasmax = ClimateVariable::builder("tasmax", daily_tasmax())
//!     .threshold_query("> 25 degC")
//!     .build()?;
//! let config = IndexConfig::new(Frequency::year(), vec![tasmax]);
//! let su = GenericIndicator::lookup("count_occurrences")?.prepare(config)?;
//! let result = su.compute()?;
//! # Ok::<(), ClimIndError>(())
//! ```

// Core modules
pub mod calendar;
pub mod climate_variable;
pub mod data_array;
pub mod errors;
pub mod frequency;
pub mod generic;
pub mod index_config;
pub mod parallel;
pub mod statistics;
pub mod threshold;
pub mod units;

// Direct re-exports for the public API
pub use climate_variable::{ClimateVariable, ClimateVariableBuilder};
pub use data_array::{DataArray, TimeIndex};
pub use errors::{ClimIndError, Result};
pub use frequency::Frequency;
pub use generic::{compute_batch, GenericIndicator, MissingPolicy, PendingIndex};
pub use index_config::{IndexConfig, IndexParameters, SamplingMethod};
pub use parallel::ParallelConfig;
pub use threshold::{build_threshold, LogicalLink, Operator, Threshold};

pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::climate_variable::{ClimateVariable, ClimateVariableBuilder};
    pub use crate::data_array::{time_dims, DataArray, TimeIndex};
    pub use crate::errors::{ClimIndError, Result};
    pub use crate::frequency::Frequency;
    pub use crate::generic::{compute_batch, GenericIndicator, MissingPolicy, PendingIndex};
    pub use crate::index_config::{IndexConfig, IndexParameters, SamplingMethod};
    pub use crate::parallel::ParallelConfig;
    pub use crate::statistics::StatOperation;
    pub use crate::threshold::{build_threshold, LogicalLink, Threshold};
}
