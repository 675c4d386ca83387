//! Two thresholds joined by a logical link, e.g. `"> -20 degC AND < 0 degC"`

use std::fmt;

use super::logical_link::LogicalLink;
use super::{Threshold, ThresholdMetadata};
use crate::data_array::DataArray;
use crate::errors::{ClimIndError, Result};

#[derive(Debug, Clone)]
pub struct BoundedThreshold {
    left: Box<Threshold>,
    right: Box<Threshold>,
    link: LogicalLink,
}

impl BoundedThreshold {
    /// Join exactly two distinct thresholds
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when `thresholds` does not
    /// hold exactly two thresholds or when both are equal.
    pub fn new(thresholds: Vec<Threshold>, link: LogicalLink) -> Result<Self> {
        let count = thresholds.len();
        let Ok([left, right]) = <[Threshold; 2]>::try_from(thresholds) else {
            return Err(ClimIndError::invalid(format!(
                "a bounded threshold is made of exactly 2 thresholds, got {count}"
            )));
        };
        if left == right {
            return Err(ClimIndError::invalid(format!(
                "the two thresholds of a bounded threshold must differ, got '{left}' twice"
            )));
        }
        Ok(Self {
            left: Box::new(left),
            right: Box::new(right),
            link,
        })
    }

    #[must_use]
    pub fn left(&self) -> &Threshold {
        &self.left
    }

    #[must_use]
    pub fn right(&self) -> &Threshold {
        &self.right
    }

    #[must_use]
    pub const fn link(&self) -> LogicalLink {
        self.link
    }

    /// Apply `f` to both sides
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `f`.
    pub fn try_map(&self, f: impl Fn(&Threshold) -> Result<Threshold>) -> Result<Self> {
        Ok(Self {
            left: Box::new(f(&self.left)?),
            right: Box::new(f(&self.right)?),
            link: self.link,
        })
    }

    /// Both exceedances combined with the link
    ///
    /// # Errors
    ///
    /// Propagates errors of either side.
    pub fn compute(&self, data: &DataArray, override_op: Option<fn(f64, f64) -> f64>, bootstrap: bool) -> Result<DataArray> {
        let left = self.left.compute(data, override_op, bootstrap)?;
        let right = self.right.compute(data, override_op, bootstrap)?;
        self.link.combine(&[left, right])
    }

    #[must_use]
    pub fn metadata(&self) -> ThresholdMetadata {
        let left = self.left.metadata();
        let right = self.right.metadata();
        let link = self.link.standard_name();
        ThresholdMetadata {
            standard_name: format!("{}_{link}_{}", left.standard_name, right.standard_name),
            long_name: format!("{} {link} {}", left.long_name, right.long_name),
            short_name: format!("{}_{link}_{}", left.short_name, right.short_name),
        }
    }
}

/// Links are symmetric, so sides may be swapped
impl PartialEq for BoundedThreshold {
    fn eq(&self, other: &Self) -> bool {
        self.link == other.link
            && ((self.left == other.left && self.right == other.right)
                || (self.left == other.right && self.right == other.left))
    }
}

impl fmt::Display for BoundedThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.link, self.right)
    }
}
