//! Run-length encoding and trailing rolling windows over time series

use ndarray::ArrayView1;

/// Length of each run of true values, written at the run's first position.
///
/// Values greater than zero are true; zero and NaN are false. Every other
/// position holds 0, so a per-bucket maximum credits a spell to the bucket
/// where it started.
#[must_use]
pub fn run_lengths(series: ArrayView1<'_, f64>) -> Vec<f64> {
    let mut out = vec![0.0; series.len()];
    let mut start: Option<usize> = None;
    for (i, &v) in series.iter().enumerate() {
        match (v > 0.0, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                out[s] = (i - s) as f64;
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out[s] = (series.len() - s) as f64;
    }
    out
}

/// Trailing window reduction: position `i` reduces `series[i + 1 - width ..= i]`.
///
/// The first `width - 1` positions and every window containing NaN are NaN.
#[must_use]
pub fn trailing_window(series: ArrayView1<'_, f64>, width: usize, reduce: impl Fn(&[f64]) -> f64) -> Vec<f64> {
    let values: Vec<f64> = series.to_vec();
    let mut out = vec![f64::NAN; values.len()];
    if width == 0 {
        return out;
    }
    for (end, slot) in out.iter_mut().enumerate().skip(width - 1) {
        let window = &values[end + 1 - width..=end];
        if window.iter().all(|v| !v.is_nan()) {
            *slot = reduce(window);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn runs_credited_to_first_index() {
        let s = arr1(&[1.0, 1.0, 0.0, f64::NAN, 1.0, 1.0, 1.0]);
        assert_eq!(run_lengths(s.view()), vec![2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0]);
        assert!(run_lengths(arr1(&[0.0, 0.0]).view()).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn trailing_sum() {
        let s = arr1(&[1.0, 2.0, 3.0, f64::NAN, 5.0]);
        let out = trailing_window(s.view(), 2, |w| w.iter().sum());
        assert!(out[0].is_nan());
        assert_eq!(out[1], 3.0);
        assert_eq!(out[2], 5.0);
        assert!(out[3].is_nan() && out[4].is_nan());
    }
}
