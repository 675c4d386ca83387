//! Climate variables: the prepared inputs of an indicator
//!
//! A [`ClimateVariable`] groups the studied data of one physical variable,
//! the threshold it is compared with and whether it is a reference slice of
//! another variable. Variables are built once per computation with
//! [`ClimateVariableBuilder`] and only unit conversions (which produce new
//! arrays) happen afterwards.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::data_array::DataArray;
use crate::errors::{ClimIndError, Result};
use crate::frequency::Frequency;
use crate::threshold::{build_threshold, Threshold, ThresholdMetadata, ThresholdSpec};

/// Names describing a variable in indicator metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableMetadata {
    pub standard_name: String,
    pub long_name: String,
    pub short_name: String,
    pub threshold: Option<ThresholdMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClimateVariable {
    pub name: String,
    pub studied_data: DataArray,
    pub threshold: Option<Threshold>,
    /// Base period a reference variable was sliced from
    pub reference_period: Option<(NaiveDate, NaiveDate)>,
    pub is_reference: bool,
    pub source_frequency: Frequency,
    pub standard_name: Option<String>,
    pub long_name: Option<String>,
}

impl ClimateVariable {
    /// Variable without threshold, sampling frequency inferred from its dates
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when `data` has no time axis.
    pub fn new(name: impl Into<String>, data: DataArray) -> Result<Self> {
        ClimateVariableBuilder::new(name, data).build()
    }

    #[must_use]
    pub fn builder(name: impl Into<String>, data: DataArray) -> ClimateVariableBuilder {
        ClimateVariableBuilder::new(name, data)
    }

    /// Same variable with its studied data replaced
    #[must_use]
    pub fn with_data(&self, studied_data: DataArray) -> Self {
        Self {
            studied_data,
            ..self.clone()
        }
    }

    /// True when the percentile exceedances of this variable must be bootstrapped
    #[must_use]
    pub fn must_run_bootstrap(&self) -> bool {
        must_run_bootstrap(&self.studied_data, self.threshold.as_ref())
    }

    /// Metadata fed to the indicator templates
    #[must_use]
    pub fn metadata(&self) -> VariableMetadata {
        let attr = |key: &str| {
            self.studied_data
                .attrs
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };
        VariableMetadata {
            standard_name: self
                .standard_name
                .clone()
                .or_else(|| attr("standard_name"))
                .unwrap_or_else(|| "unknown_variable".to_string()),
            long_name: self
                .long_name
                .clone()
                .or_else(|| attr("long_name"))
                .unwrap_or_else(|| "unknown variable".to_string()),
            short_name: if self.name.is_empty() { "input".to_string() } else { self.name.clone() },
            threshold: self.threshold.as_ref().map(Threshold::metadata),
        }
    }
}

/// Threshold given to a builder, either ready or still to be parsed
#[derive(Debug, Clone)]
enum PendingThreshold {
    Built(Threshold),
    Spec(ThresholdSpec),
}

/// Builds a [`ClimateVariable`] from raw data.
///
/// Feb 29 is dropped first when asked, percentile thresholds are then
/// computed on the whole input (so a reference period outside `time_range`
/// still works), and the studied data is finally restricted to `time_range`.
#[derive(Debug, Clone)]
pub struct ClimateVariableBuilder {
    name: String,
    data: DataArray,
    threshold: Option<PendingThreshold>,
    time_range: Option<(NaiveDate, NaiveDate)>,
    ignore_feb29: bool,
    standard_name: Option<String>,
    long_name: Option<String>,
}

impl ClimateVariableBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>, data: DataArray) -> Self {
        Self {
            name: name.into(),
            data,
            threshold: None,
            time_range: None,
            ignore_feb29: false,
            standard_name: None,
            long_name: None,
        }
    }

    #[must_use]
    pub fn threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = Some(PendingThreshold::Built(threshold));
        self
    }

    /// Threshold built by the factory when the variable is built
    #[must_use]
    pub fn threshold_spec(mut self, spec: ThresholdSpec) -> Self {
        self.threshold = Some(PendingThreshold::Spec(spec));
        self
    }

    /// Threshold parsed from a query such as `"> 90 doy_per"`
    #[must_use]
    pub fn threshold_query(self, query: &str) -> Self {
        self.threshold_spec(ThresholdSpec::from_query(query))
    }

    #[must_use]
    pub const fn time_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.time_range = Some((start, end));
        self
    }

    #[must_use]
    pub const fn ignore_feb29(mut self, ignore: bool) -> Self {
        self.ignore_feb29 = ignore;
        self
    }

    #[must_use]
    pub fn standard_name(mut self, name: &str) -> Self {
        self.standard_name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn long_name(mut self, name: &str) -> Self {
        self.long_name = Some(name.to_string());
        self
    }

    fn prepared_data(&self) -> Result<DataArray> {
        self.data.require_dates()?;
        Ok(if self.ignore_feb29 {
            self.data.drop_feb29()
        } else {
            self.data.clone()
        })
    }

    /// Build the studied variable
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when the data has no dates,
    /// the time range selects nothing or the threshold cannot be built or
    /// prepared.
    pub fn build(&self) -> Result<ClimateVariable> {
        let data = self.prepared_data()?;
        let studied_data = match self.time_range {
            Some((start, end)) => data.slice_period(start, end),
            None => data.clone(),
        };
        if studied_data.dates().map_or(true, <[NaiveDate]>::is_empty) {
            return Err(ClimIndError::invalid(format!(
                "the time range {:?} selects no data of '{}'",
                self.time_range, self.name
            )));
        }
        let threshold = match &self.threshold {
            None => None,
            Some(pending) => {
                let threshold = match pending {
                    PendingThreshold::Built(t) => t.clone(),
                    PendingThreshold::Spec(spec) => build_threshold(spec)?,
                };
                let threshold = if threshold.needs_preparation() {
                    debug!(variable = %self.name, "preparing threshold from the whole input");
                    threshold.prepared(&data)?
                } else {
                    threshold
                };
                Some(match studied_data.units() {
                    Some(unit) if threshold.unit().is_some() => threshold.converted_to(unit)?,
                    _ => threshold,
                })
            }
        };
        let source_frequency = studied_data.infer_frequency().unwrap_or_else(Frequency::day);
        Ok(ClimateVariable {
            name: self.name.clone(),
            studied_data,
            threshold,
            reference_period: None,
            is_reference: false,
            source_frequency,
            standard_name: self.standard_name.clone(),
            long_name: self.long_name.clone(),
        })
    }

    /// Reference variable: the same input restricted to a base period
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when the base period selects
    /// no data.
    pub fn build_reference(&self, start: NaiveDate, end: NaiveDate) -> Result<ClimateVariable> {
        let data = self.prepared_data()?.slice_period(start, end);
        let dates = data.require_dates()?;
        let (Some(first), Some(last)) = (dates.first().copied(), dates.last().copied()) else {
            return Err(ClimIndError::invalid(format!(
                "the base period {start} to {end} selects no data of '{}'",
                self.name
            )));
        };
        let source_frequency = data.infer_frequency().unwrap_or_else(Frequency::day);
        Ok(ClimateVariable {
            name: format!("{}_reference", self.name),
            studied_data: data,
            threshold: None,
            reference_period: Some((first, last)),
            is_reference: true,
            source_frequency,
            standard_name: self.standard_name.clone(),
            long_name: self.long_name.clone(),
        })
    }
}

/// Bootstrap day of year percentiles only when more than one, but not every,
/// studied year lies in the reference period.
#[must_use]
pub fn must_run_bootstrap(data: &DataArray, threshold: Option<&Threshold>) -> bool {
    let Some(threshold) = threshold.filter(|t| t.is_doy_percentile()) else {
        return false;
    };
    let Some((start, end)) = threshold.reference_period() else {
        return false;
    };
    let dates = data.dates().unwrap_or_default();
    let study_years: BTreeSet<i32> = dates.iter().map(|d| d.year()).collect();
    let overlapping_years: BTreeSet<i32> = dates
        .iter()
        .filter(|d| start <= **d && **d <= end)
        .map(|d| d.year())
        .collect();
    1 < overlapping_years.len() && overlapping_years.len() < study_years.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_array::time_dims;
    use ndarray::{Array, IxDyn};

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn series(start: NaiveDate, days: usize) -> DataArray {
        let values: Vec<f64> = (0..days).map(|i| 270.0 + (i % 30) as f64).collect();
        DataArray::daily(
            "tas",
            time_dims(&["cell"]),
            Array::from_shape_vec(IxDyn(&[days, 1]), values).unwrap(),
            start,
            "K",
        )
        .unwrap()
    }

    #[test]
    fn bootstrap_needs_partial_overlap() {
        let data = series(ymd(2040, 1, 1), 365 * 4 + 1);
        let partial = ClimateVariable::builder("tas", data.clone())
            .threshold_query("> 90 doy_per")
            .build()
            .unwrap();
        // the reference is the whole input: every year overlaps
        assert!(!partial.must_run_bootstrap());

        let spec = ThresholdSpec::from_query("> 90 doy_per").with_reference_period(ymd(2040, 1, 1), ymd(2041, 12, 31));
        let var = ClimateVariable::builder("tas", data.clone()).threshold_spec(spec).build().unwrap();
        assert!(var.must_run_bootstrap());

        let spec = ThresholdSpec::from_query("> 90 doy_per").with_reference_period(ymd(2040, 1, 1), ymd(2040, 12, 31));
        let single = ClimateVariable::builder("tas", data.clone()).threshold_spec(spec).build().unwrap();
        assert!(!single.must_run_bootstrap(), "a single overlapping year is not bootstrapped");

        let period = ClimateVariable::builder("tas", data).threshold_query("> 90 period_per").build().unwrap();
        assert!(!period.must_run_bootstrap());
    }

    #[test]
    fn time_range_and_feb29() {
        let data = series(ymd(2040, 1, 1), 366);
        let var = ClimateVariable::builder("tas", data.clone())
            .ignore_feb29(true)
            .time_range(ymd(2040, 2, 1), ymd(2040, 3, 31))
            .build()
            .unwrap();
        assert_eq!(var.studied_data.dates().unwrap().len(), 29 + 31 - 1);
        assert!(var.studied_data.time_position(ymd(2040, 2, 29)).is_none());
        assert_eq!(var.source_frequency.name, "DAY");

        let empty = ClimateVariable::builder("tas", data).time_range(ymd(2050, 1, 1), ymd(2050, 2, 1)).build();
        assert!(empty.unwrap_err().is_invalid_argument());
    }

    #[test]
    fn reference_variable_is_flagged() {
        let builder = ClimateVariable::builder("tas", series(ymd(2040, 1, 1), 730));
        let reference = builder.build_reference(ymd(2040, 6, 1), ymd(2040, 6, 30)).unwrap();
        assert!(reference.is_reference);
        assert_eq!(reference.reference_period, Some((ymd(2040, 6, 1), ymd(2040, 6, 30))));
        assert!(builder.build_reference(ymd(1990, 1, 1), ymd(1990, 12, 31)).is_err());
    }

    #[test]
    fn thresholds_follow_data_units() {
        let var = ClimateVariable::builder("tas", series(ymd(2040, 1, 1), 10))
            .threshold_query("> 10 degC")
            .standard_name("air_temperature")
            .build()
            .unwrap();
        let threshold = var.threshold.as_ref().unwrap();
        assert_eq!(threshold.unit(), Some("K"));
        let meta = var.metadata();
        assert_eq!(meta.standard_name, "air_temperature");
        assert_eq!(meta.long_name, "unknown variable");
        assert!(meta.threshold.is_some());
    }
}
