//! Thresholds and their exceedances
//!
//! A [`Threshold`] turns a data array into an exceedance array: 1 where the
//! comparison holds, 0 where it does not and NaN where data is missing.
//! Three kinds exist:
//!
//! - [`BasicThreshold`]: scalars, scalar lists or per grid cell values
//! - [`PercentileThreshold`]: day of year or period percentiles of a reference
//! - [`BoundedThreshold`]: two thresholds joined by `AND` / `OR`
//!
//! Thresholds are usually built from a query such as `"> 90 doy_per"` or
//! `">= 1 mm/day"` through [`factory::build_threshold`].

pub mod basic;
pub mod bounded;
pub mod factory;
pub mod logical_link;
pub mod operator;
pub mod percentile;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use basic::{BasicThreshold, ThresholdValue, THRESHOLD_DIM};
pub use bounded::BoundedThreshold;
pub use factory::{build_threshold, build_unresolved_threshold, ThresholdInput, ThresholdSpec};
pub use logical_link::LogicalLink;
pub use operator::Operator;
pub use percentile::{Granularity, PercentileThreshold};

use crate::data_array::DataArray;
use crate::errors::{ClimIndError, Result};
use crate::units::{convert_value, Unit};

/// A value with an optional unit, e.g. a minimum value or an offset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
}

impl Quantity {
    #[must_use]
    pub fn new(value: f64, unit: Option<&str>) -> Self {
        Self {
            value,
            unit: unit.map(str::to_string),
        }
    }

    /// Parse `"1 mm/day"` or `"5"`
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when no number leads the text
    /// or the unit is unknown.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let split = text.find(char::is_whitespace).unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let value = number
            .parse::<f64>()
            .map_err(|_| ClimIndError::invalid(format!("'{text}' is not a quantity")))?;
        let unit = unit.trim();
        if unit.is_empty() {
            return Ok(Self::new(value, None));
        }
        Unit::parse(unit)?;
        Ok(Self::new(value, Some(unit)))
    }

    /// Value expressed in `unit`; unitless quantities are taken as is
    ///
    /// # Errors
    ///
    /// Returns unit errors when the conversion is impossible.
    pub fn in_unit(&self, unit: Option<&str>) -> Result<f64> {
        match (self.unit.as_deref(), unit) {
            (Some(from), Some(to)) if from != to => convert_value(self.value, from, to),
            _ => Ok(self.value),
        }
    }

    pub(crate) fn considered_template(&self, unit: &str) -> String {
        let value = self.in_unit(Some(unit).filter(|u| !u.is_empty())).unwrap_or(self.value);
        format!("(only values >= {value} {unit} were considered to compute thresholds)")
    }
}

/// Names describing a threshold in output metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThresholdMetadata {
    pub standard_name: String,
    pub long_name: String,
    pub short_name: String,
}

pub(crate) fn format_values(values: &[f64]) -> String {
    let inner: Vec<String> = values.iter().map(f64::to_string).collect();
    format!("[{}]", inner.join(", "))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Threshold {
    Basic(BasicThreshold),
    Percentile(PercentileThreshold),
    Bounded(BoundedThreshold),
}

impl Threshold {
    /// Exceedance of `data`.
    ///
    /// With `override_op`, `override_op(value, threshold)` replaces the
    /// comparison (excess and deficit use a clipped difference). `bootstrap`
    /// only matters for day of year percentiles.
    ///
    /// # Errors
    ///
    /// Returns the errors of the underlying threshold kind.
    pub fn compute(&self, data: &DataArray, override_op: Option<fn(f64, f64) -> f64>, bootstrap: bool) -> Result<DataArray> {
        match self {
            Self::Basic(t) => t.compute(data, override_op),
            Self::Percentile(t) => t.compute(data, override_op, bootstrap),
            Self::Bounded(t) => t.compute(data, override_op, bootstrap),
        }
    }

    /// Comparison operator, `None` for bounded thresholds
    #[must_use]
    pub fn operator(&self) -> Option<Operator> {
        match self {
            Self::Basic(t) => Some(t.operator()),
            Self::Percentile(t) => Some(t.operator()),
            Self::Bounded(_) => None,
        }
    }

    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::Basic(t) => t.unit(),
            Self::Percentile(t) => t.unit(),
            Self::Bounded(t) => t.left().unit(),
        }
    }

    #[must_use]
    pub fn threshold_min_value(&self) -> Option<&Quantity> {
        match self {
            Self::Basic(t) => t.threshold_min_value(),
            Self::Percentile(t) => t.threshold_min_value(),
            Self::Bounded(_) => None,
        }
    }

    /// True for thresholds relying on day of year percentiles
    #[must_use]
    pub fn is_doy_percentile(&self) -> bool {
        match self {
            Self::Percentile(t) => t.granularity() == Granularity::DayOfYear,
            Self::Bounded(t) => t.left().is_doy_percentile() || t.right().is_doy_percentile(),
            Self::Basic(_) => false,
        }
    }

    /// Reference period of percentile thresholds
    #[must_use]
    pub fn reference_period(&self) -> Option<(chrono::NaiveDate, chrono::NaiveDate)> {
        match self {
            Self::Percentile(t) => t.reference_period(),
            Self::Bounded(t) => t.left().reference_period().or_else(|| t.right().reference_period()),
            Self::Basic(_) => None,
        }
    }

    /// True while percentiles still have to be computed from data
    #[must_use]
    pub fn needs_preparation(&self) -> bool {
        match self {
            Self::Percentile(t) => !t.is_ready(),
            Self::Bounded(t) => t.left().needs_preparation() || t.right().needs_preparation(),
            Self::Basic(_) => false,
        }
    }

    /// Compute pending percentiles from `data`
    ///
    /// # Errors
    ///
    /// See [`PercentileThreshold::prepared`].
    pub fn prepared(&self, data: &DataArray) -> Result<Self> {
        match self {
            Self::Percentile(t) if !t.is_ready() => Ok(Self::Percentile(t.prepared(data)?)),
            Self::Bounded(t) => Ok(Self::Bounded(t.try_map(|side| side.prepared(data))?)),
            other => Ok(other.clone()),
        }
    }

    /// Same threshold with values expressed in `unit`
    ///
    /// # Errors
    ///
    /// Returns unit errors when the conversion is impossible.
    pub fn converted_to(&self, unit: &str) -> Result<Self> {
        match self {
            Self::Basic(t) => Ok(Self::Basic(t.converted_to(unit)?)),
            Self::Percentile(t) => Ok(Self::Percentile(t.converted_to(unit)?)),
            Self::Bounded(t) => Ok(Self::Bounded(t.try_map(|side| side.converted_to(unit))?)),
        }
    }

    #[must_use]
    pub fn metadata(&self) -> ThresholdMetadata {
        match self {
            Self::Basic(t) => t.metadata(),
            Self::Percentile(t) => t.metadata(),
            Self::Bounded(t) => t.metadata(),
        }
    }

    /// `self AND other`
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when both are equal.
    pub fn and(self, other: Self) -> Result<Self> {
        Ok(Self::Bounded(BoundedThreshold::new(vec![self, other], LogicalLink::And)?))
    }

    /// `self OR other`
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when both are equal.
    pub fn or(self, other: Self) -> Result<Self> {
        Ok(Self::Bounded(BoundedThreshold::new(vec![self, other], LogicalLink::Or)?))
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic(t) => fmt::Display::fmt(t, f),
            Self::Percentile(t) => fmt::Display::fmt(t, f),
            Self::Bounded(t) => fmt::Display::fmt(t, f),
        }
    }
}

impl std::str::FromStr for Threshold {
    type Err = ClimIndError;

    fn from_str(query: &str) -> Result<Self> {
        build_threshold(&ThresholdSpec::from_query(query))
    }
}

/// Threshold whose per grid cell value is only known later.
///
/// Holds everything but the value; [`UnresolvedThreshold::resolve`] builds
/// the actual [`Threshold`] once the grid is available.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedThreshold {
    pub operator: Operator,
    pub unit: Option<String>,
    pub threshold_min_value: Option<Quantity>,
    pub offset: Option<Quantity>,
}

impl UnresolvedThreshold {
    /// Build the threshold around `value`
    ///
    /// # Errors
    ///
    /// See [`BasicThreshold::new`].
    pub fn resolve(&self, value: DataArray) -> Result<Threshold> {
        Ok(Threshold::Basic(BasicThreshold::new(
            self.operator,
            ThresholdValue::Grid(value),
            self.unit.as_deref(),
            self.threshold_min_value.clone(),
            self.offset.clone(),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn quantity_parsing() {
        assert_eq!(Quantity::parse("1 mm/day").unwrap(), Quantity::new(1.0, Some("mm/day")));
        assert_eq!(Quantity::parse("5").unwrap(), Quantity::new(5.0, None));
        assert!(Quantity::parse("mm").is_err());
    }

    #[test]
    fn unresolved_threshold_takes_its_grid_later() {
        let pending = UnresolvedThreshold {
            operator: Operator::Greater,
            unit: Some("K".into()),
            threshold_min_value: None,
            offset: None,
        };
        let grid = DataArray::new("t", vec!["cell".into()], arr1(&[280.0, 290.0]).into_dyn()).unwrap();
        let threshold = pending.resolve(grid).unwrap();
        assert_eq!(threshold.unit(), Some("K"));
        assert_eq!(threshold.operator(), Some(Operator::Greater));
    }

    #[test]
    fn bounded_equality_ignores_order() {
        let a: Threshold = "> 10 degC".parse().unwrap();
        let b: Threshold = "< 20 degC".parse().unwrap();
        let ab = a.clone().and(b.clone()).unwrap();
        let ba = b.and(a.clone()).unwrap();
        assert_eq!(ab, ba);
        assert!(a.clone().or(a).is_err());
    }
}
