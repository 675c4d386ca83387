//! Parallel computation implementations for statistical operations
//!
//! Reductions along an axis use ndarray's `fold_axis`; per-cell time series
//! work is spread over the rayon pool by zipping the time lanes of the input
//! with the time lanes of the output.

use chrono::NaiveDate;
use ndarray::{ArrayD, ArrayView1, ArrayViewMut1, Axis, IxDyn, Zip};

use crate::errors::Result;

/// Computes the NaN-skipping mean along an axis
///
/// # Errors
///
/// Returns an error if the axis is invalid.
pub fn parallel_mean_axis(data: &ArrayD<f64>, axis: usize) -> Result<ArrayD<f64>> {
    let sums = data.fold_axis(Axis(axis), (0.0_f64, 0_usize), |&(sum, count), &x| {
        if x.is_nan() {
            (sum, count)
        } else {
            (sum + x, count + 1)
        }
    });
    Ok(sums.mapv(|(sum, count)| if count > 0 { sum / count as f64 } else { f64::NAN }))
}

/// Computes sum along an axis, skipping NaN
///
/// # Errors
///
/// Returns an error if the axis is invalid.
pub fn parallel_sum_axis(data: &ArrayD<f64>, axis: usize) -> Result<ArrayD<f64>> {
    let result = data.fold_axis(Axis(axis), 0.0_f64, |&acc, &x| if x.is_nan() { acc } else { acc + x });
    Ok(result)
}

/// Computes minimum along an axis, NaN where a lane has no valid value
///
/// # Errors
///
/// Returns an error if the axis is invalid.
pub fn parallel_min_axis(data: &ArrayD<f64>, axis: usize) -> Result<ArrayD<f64>> {
    let result = data.fold_axis(Axis(axis), f64::INFINITY, |&acc, &x| if x.is_nan() { acc } else { acc.min(x) });
    Ok(result.mapv(|x| if x == f64::INFINITY { f64::NAN } else { x }))
}

/// Computes maximum along an axis, NaN where a lane has no valid value
///
/// # Errors
///
/// Returns an error if the axis is invalid.
pub fn parallel_max_axis(data: &ArrayD<f64>, axis: usize) -> Result<ArrayD<f64>> {
    let result = data.fold_axis(Axis(axis), f64::NEG_INFINITY, |&acc, &x| {
        if x.is_nan() {
            acc
        } else {
            acc.max(x)
        }
    });
    Ok(result.mapv(|x| if x == f64::NEG_INFINITY { f64::NAN } else { x }))
}

/// Population standard deviation along an axis, skipping NaN
///
/// # Errors
///
/// Returns an error if the axis is invalid.
pub fn parallel_std_axis(data: &ArrayD<f64>, axis: usize) -> Result<ArrayD<f64>> {
    let mean = parallel_mean_axis(data, axis)?;
    let mut out = ArrayD::from_elem(mean.raw_dim(), f64::NAN);
    Zip::from(&mut out)
        .and(&mean)
        .and(data.lanes(Axis(axis)))
        .par_for_each(|o, &m, lane| {
            let (sq, n) = lane
                .iter()
                .filter(|v| !v.is_nan())
                .fold((0.0, 0_usize), |(s, c), v| (s + (v - m).powi(2), c + 1));
            if n > 0 {
                *o = (sq / n as f64).sqrt();
            }
        });
    Ok(out)
}

/// Output array shaped like `values` with axis 0 resized to `len`
fn time_resized<T: Clone>(values: &ArrayD<f64>, len: usize, fill: T) -> ArrayD<T> {
    let mut shape = values.shape().to_vec();
    if let Some(first) = shape.first_mut() {
        *first = len;
    }
    ArrayD::from_elem(IxDyn(&shape), fill)
}

/// Apply `f` to every time series of `values` in parallel.
///
/// Axis 0 is time. `f` receives the input series and an output series of
/// length `out_len`, pre-filled with NaN.
pub fn map_time_lanes<F>(values: &ArrayD<f64>, out_len: usize, f: F) -> ArrayD<f64>
where
    F: Fn(ArrayView1<'_, f64>, ArrayViewMut1<'_, f64>) + Sync + Send,
{
    let mut out = time_resized(values, out_len, f64::NAN);
    Zip::from(out.lanes_mut(Axis(0)))
        .and(values.lanes(Axis(0)))
        .par_for_each(|o, i| f(i, o));
    out
}

/// Event dates recorded alongside a reduction
pub type EventLanes = (ArrayD<Option<NaiveDate>>, ArrayD<Option<NaiveDate>>);

/// Like [`map_time_lanes`], also filling a start and an end date per output step
pub fn map_time_lanes_with_events<F>(values: &ArrayD<f64>, out_len: usize, f: F) -> (ArrayD<f64>, EventLanes)
where
    F: Fn(
            ArrayView1<'_, f64>,
            ArrayViewMut1<'_, f64>,
            ArrayViewMut1<'_, Option<NaiveDate>>,
            ArrayViewMut1<'_, Option<NaiveDate>>,
        ) + Sync
        + Send,
{
    let mut out = time_resized(values, out_len, f64::NAN);
    let mut starts = time_resized(values, out_len, None);
    let mut ends = time_resized(values, out_len, None);
    Zip::from(out.lanes_mut(Axis(0)))
        .and(starts.lanes_mut(Axis(0)))
        .and(ends.lanes_mut(Axis(0)))
        .and(values.lanes(Axis(0)))
        .par_for_each(|o, s, e, i| f(i, o, s, e));
    (out, (starts, ends))
}
