//! Bucketed reductions over the time axis of a [`DataArray`]

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use super::operations::{StatOperation, StatisticalReduction};
use super::parallel::{map_time_lanes, map_time_lanes_with_events, EventLanes};
use crate::data_array::{DataArray, TimeIndex};
use crate::errors::{ClimIndError, Result};
use crate::frequency::{Bucket, Frequency, GroupByKey};

fn labelled(data: &DataArray, values: ndarray::ArrayD<f64>, buckets: &[Bucket]) -> DataArray {
    let labels = buckets.iter().map(|b| b.label).collect();
    let mut out = data.with_values(values, Some(TimeIndex::Dates(labels)));
    out.time_bounds = Some(buckets.iter().map(|b| (b.start, b.end)).collect());
    out
}

/// Reduce every bucket of every cell with `f`
///
/// # Errors
///
/// Returns an error when `data` has no dates or the frequency cannot bucket them.
pub fn resample(data: &DataArray, freq: &Frequency, f: impl Fn(&[f64]) -> f64 + Sync + Send) -> Result<DataArray> {
    let buckets = freq.buckets(data.require_dates()?)?;
    let values = map_time_lanes(&data.values, buckets.len(), |lane, mut out| {
        let mut scratch = Vec::new();
        for (slot, bucket) in out.iter_mut().zip(&buckets) {
            scratch.clear();
            scratch.extend(bucket.indices.iter().map(|&i| lane[i]));
            *slot = f(&scratch);
        }
    });
    Ok(labelled(data, values, &buckets))
}

/// [`resample`] with one of the standard operations
///
/// # Errors
///
/// See [`resample`].
pub fn resample_op(data: &DataArray, freq: &Frequency, op: StatOperation) -> Result<DataArray> {
    resample(data, freq, |bucket| op.apply(bucket))
}

/// Reduce buckets while recording a start and an end event date per bucket.
///
/// `f` receives the bucket values and their dates.
///
/// # Errors
///
/// See [`resample`].
pub fn resample_with_events<F>(data: &DataArray, freq: &Frequency, f: F) -> Result<(DataArray, EventLanes)>
where
    F: Fn(&[f64], &[NaiveDate]) -> (f64, Option<NaiveDate>, Option<NaiveDate>) + Sync + Send,
{
    let dates = data.require_dates()?;
    let buckets = freq.buckets(dates)?;
    let bucket_dates: Vec<Vec<NaiveDate>> = buckets
        .iter()
        .map(|b| b.indices.iter().map(|&i| dates[i]).collect())
        .collect();
    let (values, events) = map_time_lanes_with_events(&data.values, buckets.len(), |lane, mut out, mut starts, mut ends| {
        let mut scratch = Vec::new();
        for (b, bucket) in buckets.iter().enumerate() {
            scratch.clear();
            scratch.extend(bucket.indices.iter().map(|&i| lane[i]));
            let (value, start, end) = f(&scratch, &bucket_dates[b]);
            out[b] = value;
            starts[b] = start;
            ends[b] = end;
        }
    });
    Ok((labelled(data, values, &buckets), events))
}

/// Positions of the time steps sharing each group key, keys sorted
///
/// # Errors
///
/// Returns [`ClimIndError::NotImplemented`] for hourly grouping.
pub fn group_indices(dates: &[NaiveDate], key: GroupByKey) -> Result<BTreeMap<i32, Vec<usize>>> {
    let key_of: fn(&NaiveDate) -> i32 = match key {
        GroupByKey::Month => |d| d.month() as i32,
        GroupByKey::DayOfYear => |d| d.ordinal() as i32,
        GroupByKey::Year => |d| d.year(),
        GroupByKey::RunIndexer => |_| 0,
        GroupByKey::Hour => {
            return Err(ClimIndError::not_implemented(
                "grouping a date-based time axis by hour",
            ))
        }
    };
    let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (i, d) in dates.iter().enumerate() {
        groups.entry(key_of(d)).or_default().push(i);
    }
    Ok(groups)
}

/// Climatology of `data` grouped by `key`.
///
/// [`GroupByKey::RunIndexer`] collapses the whole time axis; the other keys
/// yield one step per distinct month, day of year or year.
///
/// # Errors
///
/// Returns [`ClimIndError::NotImplemented`] for hourly grouping, or an error
/// when `data` has no dates.
pub fn group_reduce(data: &DataArray, key: GroupByKey, op: StatOperation) -> Result<DataArray> {
    let dates = data.require_dates()?;
    if key == GroupByKey::RunIndexer {
        let values = data.values.reduce_along_axis(0, op)?;
        let mut out = data.with_values(values, None);
        out.dims.remove(0);
        return Ok(out);
    }
    let groups = group_indices(dates, key)?;
    let members: Vec<&Vec<usize>> = groups.values().collect();
    let values = map_time_lanes(&data.values, groups.len(), |lane, mut out| {
        for (slot, indices) in out.iter_mut().zip(&members) {
            let bucket: Vec<f64> = indices.iter().map(|&i| lane[i]).collect();
            *slot = op.apply(&bucket);
        }
    });
    let keys = groups.keys().copied();
    let time = match key {
        GroupByKey::Month => TimeIndex::Months(keys.map(|k| k as u32).collect()),
        GroupByKey::DayOfYear => TimeIndex::DaysOfYear(keys.map(|k| k as u32).collect()),
        _ => TimeIndex::Years(keys.collect()),
    };
    let mut out = data.with_values(values, None);
    out.dims[0] = time.dim_name().to_string();
    out.time = Some(time);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_array::time_dims;
    use ndarray::{Array, IxDyn};

    fn daily(values: Vec<f64>) -> DataArray {
        let n = values.len();
        DataArray::daily(
            "pr",
            time_dims(&[]),
            Array::from_shape_vec(IxDyn(&[n]), values).unwrap(),
            NaiveDate::from_ymd_opt(2042, 1, 30).unwrap(),
            "mm",
        )
        .unwrap()
    }

    #[test]
    fn monthly_sum_with_bounds() {
        let da = daily(vec![1.0, 2.0, 3.0, 4.0]);
        let out = resample_op(&da, &Frequency::month(), StatOperation::Sum).unwrap();
        assert_eq!(out.values.as_slice().unwrap(), &[3.0, 7.0]);
        assert_eq!(out.time_bounds.as_ref().unwrap()[1].1, NaiveDate::from_ymd_opt(2042, 2, 28).unwrap());
        assert_eq!(out.units(), Some("mm"));
    }

    #[test]
    fn events_follow_bucket_dates() {
        let da = daily(vec![1.0, 5.0, 3.0, 4.0]);
        let (out, (starts, _)) = resample_with_events(&da, &Frequency::year(), |values, dates| {
            let i = StatOperation::Max.arg(values);
            (StatOperation::Max.apply(values), i.map(|i| dates[i]), None)
        })
        .unwrap();
        assert_eq!(out.values[[0]], 5.0);
        assert_eq!(starts[[0]], NaiveDate::from_ymd_opt(2042, 1, 31));
    }

    #[test]
    fn grouping_by_month() {
        let da = daily(vec![1.0, 3.0, 10.0, 20.0]);
        let out = group_reduce(&da, GroupByKey::Month, StatOperation::Mean).unwrap();
        assert_eq!(out.time, Some(TimeIndex::Months(vec![1, 2])));
        assert_eq!(out.values.as_slice().unwrap(), &[2.0, 15.0]);
        let whole = group_reduce(&da, GroupByKey::RunIndexer, StatOperation::Max).unwrap();
        assert_eq!(whole.values.ndim(), 0);
        assert!(group_reduce(&da, GroupByKey::Hour, StatOperation::Mean).is_err());
    }
}
