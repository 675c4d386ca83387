//! Core statistical operations and traits
//!
//! This module defines the NaN-skipping reductions applied to resampling
//! buckets and along array axes.

use ndarray::ArrayD;

use crate::errors::{ClimIndError, Result};

/// Supported statistical operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatOperation {
    /// Arithmetic mean
    Mean,
    /// Sum of values
    Sum,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Population standard deviation
    Std,
}

impl StatOperation {
    /// Get the string representation of the operation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Min => "minimum",
            Self::Max => "maximum",
            Self::Std => "standard_deviation",
        }
    }

    /// Reduce a bucket, ignoring NaN.
    ///
    /// An empty bucket is NaN. A bucket holding only NaN sums to zero and is
    /// NaN for every other operation.
    #[must_use]
    pub fn apply(self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return f64::NAN;
        }
        let mut valid = values.iter().copied().filter(|v| !v.is_nan()).peekable();
        if valid.peek().is_none() {
            return if self == Self::Sum { 0.0 } else { f64::NAN };
        }
        match self {
            Self::Sum => valid.sum(),
            Self::Mean => {
                let (sum, count) = valid.fold((0.0, 0_usize), |(s, c), v| (s + v, c + 1));
                sum / count as f64
            }
            Self::Min => valid.fold(f64::INFINITY, f64::min),
            Self::Max => valid.fold(f64::NEG_INFINITY, f64::max),
            Self::Std => {
                let kept: Vec<f64> = valid.collect();
                let n = kept.len() as f64;
                let mean = kept.iter().sum::<f64>() / n;
                (kept.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
            }
        }
    }

    /// Position of the extreme value in a bucket, for [`StatOperation::Min`]
    /// and [`StatOperation::Max`]. Ties resolve to the first occurrence.
    #[must_use]
    pub fn arg(self, values: &[f64]) -> Option<usize> {
        let better: fn(f64, f64) -> bool = match self {
            Self::Max => |candidate, best| candidate > best,
            Self::Min => |candidate, best| candidate < best,
            _ => return None,
        };
        values
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nan())
            .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
                Some((_, b)) if !better(v, b) => best,
                _ => Some((i, v)),
            })
            .map(|(i, _)| i)
    }
}

/// Quantile estimator, in Hyndman & Fan's classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantileInterpolation {
    /// Hyndman & Fan type 7 (alpha = beta = 1)
    Linear,
    /// Hyndman & Fan type 8 (alpha = beta = 1/3)
    #[default]
    MedianUnbiased,
}

impl QuantileInterpolation {
    /// Plotting positions `(alpha, beta)`
    #[must_use]
    pub const fn alpha_beta(self) -> (f64, f64) {
        match self {
            Self::Linear => (1.0, 1.0),
            Self::MedianUnbiased => (1.0 / 3.0, 1.0 / 3.0),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::MedianUnbiased => "median_unbiased",
        }
    }

    /// Parse `linear` or `median_unbiased`
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] for any other name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "median_unbiased" | "hyndman_fan" => Ok(Self::MedianUnbiased),
            other => Err(ClimIndError::invalid(format!(
                "Unknown interpolation '{other}', use 'linear' or 'median_unbiased'"
            ))),
        }
    }
}

/// Trait for types that can perform statistical reductions along an axis
pub trait StatisticalReduction<T> {
    /// Perform a statistical reduction along the specified axis
    ///
    /// # Errors
    ///
    /// Returns an error if the axis is out of bounds for the array.
    fn reduce_along_axis(&self, axis: usize, operation: StatOperation) -> Result<ArrayD<T>>;
}

impl StatisticalReduction<f64> for ArrayD<f64> {
    fn reduce_along_axis(&self, axis: usize, operation: StatOperation) -> Result<ArrayD<f64>> {
        if axis >= self.ndim() {
            return Err(ClimIndError::invalid(format!(
                "Axis {axis} is out of bounds for array with {} dimensions",
                self.ndim()
            )));
        }

        match operation {
            StatOperation::Mean => super::parallel::parallel_mean_axis(self, axis),
            StatOperation::Sum => super::parallel::parallel_sum_axis(self, axis),
            StatOperation::Min => super::parallel::parallel_min_axis(self, axis),
            StatOperation::Max => super::parallel::parallel_max_axis(self, axis),
            StatOperation::Std => super::parallel::parallel_std_axis(self, axis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn nan_skipping() {
        let v = [1.0, f64::NAN, 3.0];
        assert_eq!(StatOperation::Sum.apply(&v), 4.0);
        assert_eq!(StatOperation::Mean.apply(&v), 2.0);
        assert_eq!(StatOperation::Max.apply(&v), 3.0);
        assert_eq!(StatOperation::Sum.apply(&[f64::NAN]), 0.0);
        assert!(StatOperation::Max.apply(&[f64::NAN]).is_nan());
        assert!(StatOperation::Sum.apply(&[]).is_nan());
        assert_abs_diff_eq!(StatOperation::Std.apply(&[1.0, 3.0]), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn arg_extreme_takes_first_tie() {
        assert_eq!(StatOperation::Max.arg(&[1.0, 5.0, 5.0]), Some(1));
        assert_eq!(StatOperation::Min.arg(&[f64::NAN, 2.0, 1.0]), Some(2));
        assert_eq!(StatOperation::Min.arg(&[f64::NAN]), None);
        assert_eq!(StatOperation::Sum.arg(&[1.0]), None);
    }

    #[test]
    fn reduce_out_of_bounds_axis() {
        let data = ArrayD::<f64>::zeros(ndarray::IxDyn(&[2, 2]));
        assert!(data.reduce_along_axis(2, StatOperation::Mean).is_err());
    }
}
