//! Sample quantiles with Hyndman & Fan plotting positions

use super::operations::QuantileInterpolation;

/// Quantile of `values` at probability `p` in `[0, 1]`, NaN entries dropped.
///
/// Returns NaN when no valid value remains.
#[must_use]
pub fn quantile(values: &[f64], p: f64, interpolation: QuantileInterpolation) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    quantile_sorted(&sorted, p, interpolation)
}

/// Same as [`quantile`] for already sorted, NaN-free values
#[must_use]
pub fn quantile_sorted(sorted: &[f64], p: f64, interpolation: QuantileInterpolation) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let (alpha, beta) = interpolation.alpha_beta();
    let virtual_index = (n as f64 * p + alpha + p * (1.0 - alpha - beta) - 1.0).clamp(0.0, (n - 1) as f64);
    let lower = virtual_index.floor();
    let fraction = virtual_index - lower;
    let below = sorted[lower as usize];
    let above = sorted[(lower as usize + 1).min(n - 1)];
    below + (above - below) * fraction
}

/// Several quantiles of the same sample, `ranks` given in percent
#[must_use]
pub fn percentiles(values: &[f64], ranks: &[f64], interpolation: QuantileInterpolation) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    ranks
        .iter()
        .map(|r| quantile_sorted(&sorted, r / 100.0, interpolation))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn linear_is_type_7() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(quantile(&v, 0.5, QuantileInterpolation::Linear), 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(quantile(&v, 0.9, QuantileInterpolation::Linear), 3.7, epsilon = 1e-12);
    }

    #[test]
    fn median_unbiased_is_type_8() {
        // 4 * 0.9 + 1/3 + 0.9 / 3 - 1 = 3.23, clipped to the maximum
        let v = [4.0, 1.0, f64::NAN, 3.0, 2.0];
        assert_abs_diff_eq!(quantile(&v, 0.9, QuantileInterpolation::MedianUnbiased), 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(quantile(&v, 0.5, QuantileInterpolation::MedianUnbiased), 2.5, epsilon = 1e-12);
        // 0.1 * (4 + 1/3) - 2/3 = -0.2333 clipped to the minimum
        assert_abs_diff_eq!(quantile(&v, 0.1, QuantileInterpolation::MedianUnbiased), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn monotonic_in_rank() {
        let v: Vec<f64> = (0..50).map(|i| f64::from(i * 7 % 13)).collect();
        let p = percentiles(&v, &[10.0, 50.0, 90.0], QuantileInterpolation::MedianUnbiased);
        assert!(p[0] <= p[1] && p[1] <= p[2]);
        assert!(quantile(&[f64::NAN], 0.5, QuantileInterpolation::Linear).is_nan());
    }
}
