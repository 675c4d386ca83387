//! Labelled N-dimensional arrays
//!
//! [`DataArray`] is the in-memory form of a gridded climate variable: an
//! `ndarray` of `f64` values, a name per axis, an optional time index on axis 0,
//! extra coordinates and a bag of attributes. Missing values are NaN.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use ndarray::{ArrayD, Axis, IxDyn, Zip};
use serde_json::Value;

use crate::errors::{ClimIndError, Result};
use crate::frequency::{Frequency, Indexer};
use crate::units::Unit;

/// Name of the time dimension
pub const TIME: &str = "time";

/// Labels of axis 0
#[derive(Debug, Clone, PartialEq)]
pub enum TimeIndex {
    /// Calendar dates, one per time step
    Dates(Vec<NaiveDate>),
    /// Month numbers of a month-grouped climatology
    Months(Vec<u32>),
    /// Aligned days of year of a day-grouped climatology
    DaysOfYear(Vec<u32>),
    /// Years of a year-grouped climatology
    Years(Vec<i32>),
}

impl TimeIndex {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Dates(v) => v.len(),
            Self::Months(v) | Self::DaysOfYear(v) => v.len(),
            Self::Years(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the dimension these labels belong to
    #[must_use]
    pub const fn dim_name(&self) -> &'static str {
        match self {
            Self::Dates(_) => TIME,
            Self::Months(_) => "month",
            Self::DaysOfYear(_) => "dayofyear",
            Self::Years(_) => "year",
        }
    }
}

/// Auxiliary coordinate
#[derive(Debug, Clone, PartialEq)]
pub enum Coordinate {
    /// Numeric labels along one dimension (threshold values, percentile ranks)
    Labels { dim: String, values: Vec<f64> },
    /// Dates laid out like the data, NaT being `None`
    Dates {
        dims: Vec<String>,
        values: ArrayD<Option<NaiveDate>>,
    },
}

/// A named, labelled array of `f64`
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    pub name: String,
    pub dims: Vec<String>,
    pub values: ArrayD<f64>,
    pub time: Option<TimeIndex>,
    /// Inclusive first and last day of each resampled time step
    pub time_bounds: Option<Vec<(NaiveDate, NaiveDate)>>,
    pub coords: BTreeMap<String, Coordinate>,
    pub attrs: BTreeMap<String, Value>,
}

impl DataArray {
    /// Array without a time index
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when the number of dimension
    /// names does not match the array rank.
    pub fn new(name: impl Into<String>, dims: Vec<String>, values: ArrayD<f64>) -> Result<Self> {
        if dims.len() != values.ndim() {
            return Err(ClimIndError::invalid(format!(
                "{} dimension names given for an array of rank {}",
                dims.len(),
                values.ndim()
            )));
        }
        Ok(Self {
            name: name.into(),
            dims,
            values,
            time: None,
            time_bounds: None,
            coords: BTreeMap::new(),
            attrs: BTreeMap::new(),
        })
    }

    /// Time series whose first axis is labelled by `dates`
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when the first dimension is not
    /// `time` or its length differs from the number of dates.
    pub fn from_dates(
        name: impl Into<String>,
        dims: Vec<String>,
        values: ArrayD<f64>,
        dates: Vec<NaiveDate>,
    ) -> Result<Self> {
        let mut array = Self::new(name, dims, values)?;
        if array.dims.first().map(String::as_str) != Some(TIME) {
            return Err(ClimIndError::invalid("the first dimension of a time series must be 'time'"));
        }
        if array.values.len_of(Axis(0)) != dates.len() {
            return Err(ClimIndError::invalid(format!(
                "{} dates given for a time axis of length {}",
                dates.len(),
                array.values.len_of(Axis(0))
            )));
        }
        array.time = Some(TimeIndex::Dates(dates));
        Ok(array)
    }

    /// Daily series starting at `start`, one date per step of axis 0
    ///
    /// # Errors
    ///
    /// Same as [`DataArray::from_dates`].
    pub fn daily(
        name: impl Into<String>,
        dims: Vec<String>,
        values: ArrayD<f64>,
        start: NaiveDate,
        units: &str,
    ) -> Result<Self> {
        let len = values.shape().first().copied().unwrap_or(0);
        let dates = start.iter_days().take(len).collect();
        Ok(Self::from_dates(name, dims, values, dates)?.with_units(units))
    }

    #[must_use]
    pub fn with_units(mut self, units: &str) -> Self {
        self.set_units(units);
        self
    }

    #[must_use]
    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn set_units(&mut self, units: &str) {
        self.attrs.insert("units".to_string(), Value::String(units.to_string()));
    }

    #[must_use]
    pub fn units(&self) -> Option<&str> {
        self.attrs.get("units").and_then(Value::as_str)
    }

    /// Parsed units
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when the array has no units.
    pub fn unit(&self) -> Result<Unit> {
        let units = self.units().ok_or_else(|| {
            ClimIndError::invalid(format!("'{}' has no 'units' attribute", self.name))
        })?;
        Unit::parse(units)
    }

    #[must_use]
    pub fn dates(&self) -> Option<&[NaiveDate]> {
        match &self.time {
            Some(TimeIndex::Dates(d)) => Some(d),
            _ => None,
        }
    }

    /// Dates of the time axis
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when the array is not a dated series.
    pub fn require_dates(&self) -> Result<&[NaiveDate]> {
        self.dates()
            .ok_or_else(|| ClimIndError::invalid(format!("'{}' has no time axis", self.name)))
    }

    #[must_use]
    pub fn has_time(&self) -> bool {
        self.time.is_some()
    }

    #[must_use]
    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Shape of the non-time axes
    #[must_use]
    pub fn cell_shape(&self) -> Vec<usize> {
        let skip = usize::from(self.has_time());
        self.values.shape()[skip..].to_vec()
    }

    /// Distinct years present on the time axis, sorted
    #[must_use]
    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.dates().unwrap_or_default().iter().map(Datelike::year).collect();
        years.dedup();
        years
    }

    /// Same metadata, new values and time labels
    #[must_use]
    pub fn with_values(&self, values: ArrayD<f64>, time: Option<TimeIndex>) -> Self {
        let keep_time_coords = time == self.time;
        Self {
            name: self.name.clone(),
            dims: self.dims.clone(),
            values,
            time_bounds: if keep_time_coords { self.time_bounds.clone() } else { None },
            time,
            coords: self
                .coords
                .iter()
                .filter(|(_, c)| keep_time_coords || !c.depends_on(TIME))
                .map(|(k, c)| (k.clone(), c.clone()))
                .collect(),
            attrs: self.attrs.clone(),
        }
    }

    /// Elementwise map keeping metadata
    #[must_use]
    pub fn map(&self, f: impl Fn(f64) -> f64 + Sync + Send) -> Self {
        let mut values = self.values.clone();
        values.par_mapv_inplace(f);
        self.with_values(values, self.time.clone())
    }

    /// Keep the time steps at `indices`
    #[must_use]
    pub fn select_time(&self, indices: &[usize]) -> Self {
        let values = self.values.select(Axis(0), indices);
        let time = self.time.as_ref().map(|t| match t {
            TimeIndex::Dates(v) => TimeIndex::Dates(indices.iter().map(|&i| v[i]).collect()),
            TimeIndex::Months(v) => TimeIndex::Months(indices.iter().map(|&i| v[i]).collect()),
            TimeIndex::DaysOfYear(v) => TimeIndex::DaysOfYear(indices.iter().map(|&i| v[i]).collect()),
            TimeIndex::Years(v) => TimeIndex::Years(indices.iter().map(|&i| v[i]).collect()),
        });
        let mut out = self.with_values(values, time);
        out.time_bounds = self
            .time_bounds
            .as_ref()
            .map(|b| indices.iter().map(|&i| b[i]).collect());
        out
    }

    /// Keep the dates for which `keep` is true
    #[must_use]
    pub fn filter_dates(&self, keep: impl Fn(NaiveDate) -> bool) -> Self {
        let indices: Vec<usize> = self
            .dates()
            .unwrap_or_default()
            .iter()
            .enumerate()
            .filter(|(_, d)| keep(**d))
            .map(|(i, _)| i)
            .collect();
        self.select_time(&indices)
    }

    /// Time steps between two dates, both inclusive
    #[must_use]
    pub fn slice_period(&self, start: NaiveDate, end: NaiveDate) -> Self {
        self.filter_dates(|d| start <= d && d <= end)
    }

    /// Time steps whose year lies in `first..=last`
    #[must_use]
    pub fn slice_years(&self, first: i32, last: i32) -> Self {
        self.filter_dates(|d| (first..=last).contains(&d.year()))
    }

    #[must_use]
    pub fn select_indexer(&self, indexer: &Indexer) -> Self {
        self.filter_dates(|d| indexer.matches(d))
    }

    #[must_use]
    pub fn drop_feb29(&self) -> Self {
        self.filter_dates(|d| !(d.month() == 2 && d.day() == 29))
    }

    /// Sampling frequency inferred from the dates
    #[must_use]
    pub fn infer_frequency(&self) -> Option<Frequency> {
        self.dates().and_then(Frequency::infer)
    }

    /// Copy expressed in `target` units
    ///
    /// # Errors
    ///
    /// Returns an error when the current or target unit is unknown or when the
    /// two are incompatible.
    pub fn convert_units(&self, target: &str) -> Result<Self> {
        let current = self.unit()?;
        let target_unit = Unit::parse(target)?;
        let conversion = current.conversion_to(&target_unit)?;
        let mut out = if conversion.is_identity() {
            self.clone()
        } else {
            self.map(move |v| conversion.apply(v))
        };
        out.set_units(target);
        Ok(out)
    }

    /// Integrate a rate over its time step, `kg m-2 s-1` becoming `kg m-2`
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when the unit is not a rate.
    pub fn rate_to_amount(&self, step_seconds: f64) -> Result<Self> {
        let (amount, factor) = self.unit()?.to_amount(step_seconds)?;
        let mut out = self.map(move |v| v * factor);
        out.set_units(amount.symbol());
        Ok(out)
    }

    /// Combine two arrays elementwise after broadcasting them by dimension name.
    ///
    /// Dated series are first restricted to their common dates. The result
    /// keeps the name, attributes and time axis of `self`; dimensions only
    /// present in `other` are inserted right after the time axis.
    ///
    /// # Errors
    ///
    /// Returns an error when a shared dimension has incompatible lengths.
    pub fn zip_with(&self, other: &Self, f: impl Fn(f64, f64) -> f64 + Sync + Send) -> Result<Self> {
        let (left, right) = align_time(self, other);
        let dims = broadcast_dims(&left, &right);
        let shape = broadcast_shape(&left, &right, &dims)?;
        let mut values = expand_to(&left.values, &left.dims, &dims, &shape)?;
        let rhs = expand_to(&right.values, &right.dims, &dims, &shape)?;
        Zip::from(&mut values).and(&rhs).par_for_each(|a, &b| *a = f(*a, b));
        let mut out = left.with_values(values, left.time.clone());
        out.dims = dims;
        for (key, coord) in &right.coords {
            out.coords.entry(key.clone()).or_insert_with(|| coord.clone());
        }
        if out.time.is_none() {
            out.time = right.time.clone();
            out.time_bounds = right.time_bounds.clone();
        }
        Ok(out)
    }

    /// Elementwise `a - b`
    ///
    /// # Errors
    ///
    /// See [`DataArray::zip_with`].
    pub fn sub(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Set values to NaN where `mask` is true (mask broadcast against `self`)
    ///
    /// # Errors
    ///
    /// See [`DataArray::zip_with`].
    pub fn masked_where(&self, mask: &Self) -> Result<Self> {
        self.zip_with(mask, |v, m| if m != 0.0 && !m.is_nan() { f64::NAN } else { v })
    }

    /// Keep values where the exceedance is true, NaN elsewhere
    ///
    /// # Errors
    ///
    /// See [`DataArray::zip_with`].
    pub fn where_true(&self, exceedance: &Self) -> Result<Self> {
        self.zip_with(exceedance, |v, e| if e > 0.0 { v } else { f64::NAN })
    }

    /// Attach labels to a non-time dimension
    pub fn set_labels(&mut self, dim: &str, values: Vec<f64>) {
        self.coords.insert(
            dim.to_string(),
            Coordinate::Labels {
                dim: dim.to_string(),
                values,
            },
        );
    }

    #[must_use]
    pub fn labels(&self, dim: &str) -> Option<&[f64]> {
        match self.coords.get(dim) {
            Some(Coordinate::Labels { values, .. }) => Some(values),
            _ => None,
        }
    }

    /// Value at a multi-index, `None` when out of bounds
    #[must_use]
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        self.values.get(IxDyn(index)).copied()
    }

    /// Position of `date` on the time axis
    #[must_use]
    pub fn time_position(&self, date: NaiveDate) -> Option<usize> {
        self.dates()?.iter().position(|d| *d == date)
    }
}

impl Coordinate {
    #[must_use]
    pub fn depends_on(&self, dim: &str) -> bool {
        match self {
            Self::Labels { dim: d, .. } => d == dim,
            Self::Dates { dims, .. } => dims.iter().any(|d| d == dim),
        }
    }
}

fn align_time(a: &DataArray, b: &DataArray) -> (DataArray, DataArray) {
    match (a.dates(), b.dates()) {
        (Some(da), Some(db)) if da != db => {
            let common_a: Vec<usize> = (0..da.len()).filter(|&i| db.binary_search(&da[i]).is_ok()).collect();
            let common_b: Vec<usize> = (0..db.len()).filter(|&i| da.binary_search(&db[i]).is_ok()).collect();
            (a.select_time(&common_a), b.select_time(&common_b))
        }
        _ => (a.clone(), b.clone()),
    }
}

fn broadcast_dims(a: &DataArray, b: &DataArray) -> Vec<String> {
    let mut dims = a.dims.clone();
    let extra: Vec<String> = b.dims.iter().filter(|d| !a.dims.contains(d)).cloned().collect();
    let at = if a.has_time() { 1.min(dims.len()) } else { 0 };
    for (i, dim) in extra.into_iter().enumerate() {
        dims.insert(at + i, dim);
    }
    // a time axis coming from `b` must stay first
    if let Some(pos) = b.time.as_ref().and_then(|t| dims.iter().position(|d| d == t.dim_name())) {
        if pos != 0 && !a.has_time() {
            let time = dims.remove(pos);
            dims.insert(0, time);
        }
    }
    dims
}

fn broadcast_shape(a: &DataArray, b: &DataArray, dims: &[String]) -> Result<Vec<usize>> {
    dims.iter()
        .map(|dim| {
            let la = a.axis_of(dim).map(|i| a.values.shape()[i]);
            let lb = b.axis_of(dim).map(|i| b.values.shape()[i]);
            match (la, lb) {
                (Some(x), Some(y)) if x == y || y == 1 => Ok(x),
                (Some(1), Some(y)) => Ok(y),
                (Some(x), Some(y)) => Err(ClimIndError::invalid(format!(
                    "dimension '{dim}' has length {x} and {y}, cannot broadcast"
                ))),
                (Some(x), None) | (None, Some(x)) => Ok(x),
                (None, None) => Ok(1),
            }
        })
        .collect()
}

/// Reorder and pad `values` so that it broadcasts to `target_dims`
fn expand_to(
    values: &ArrayD<f64>,
    dims: &[String],
    target_dims: &[String],
    target_shape: &[usize],
) -> Result<ArrayD<f64>> {
    let mut order: Vec<usize> = (0..dims.len()).collect();
    order.sort_by_key(|&i| target_dims.iter().position(|d| *d == dims[i]).unwrap_or(usize::MAX));
    let permuted = values.view().permuted_axes(IxDyn(&order));
    let standard = permuted.as_standard_layout().into_owned();
    let mut padded_shape = vec![1; target_dims.len()];
    for (axis, dim) in dims.iter().enumerate() {
        if let Some(pos) = target_dims.iter().position(|d| d == dim) {
            padded_shape[pos] = values.shape()[axis];
        }
    }
    let padded = standard.into_shape(IxDyn(&padded_shape))?;
    padded
        .broadcast(IxDyn(target_shape))
        .map(|view| view.to_owned())
        .ok_or_else(|| {
            ClimIndError::invalid(format!(
                "cannot broadcast shape {padded_shape:?} to {target_shape:?}"
            ))
        })
}

/// Dimension names for a series shaped `(time, d1, d2, ...)`
#[must_use]
pub fn time_dims(spatial: &[&str]) -> Vec<String> {
    std::iter::once(TIME)
        .chain(spatial.iter().copied())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, Array};

    fn series(values: Vec<f64>) -> DataArray {
        let n = values.len();
        let values = Array::from_shape_vec(IxDyn(&[n, 1]), values).unwrap();
        DataArray::daily(
            "tas",
            time_dims(&["cell"]),
            values,
            NaiveDate::from_ymd_opt(2044, 2, 27).unwrap(),
            "K",
        )
        .unwrap()
    }

    #[test]
    fn rejects_mismatched_dates() {
        let values = Array::zeros(IxDyn(&[3]));
        let dates = vec![NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()];
        assert!(DataArray::from_dates("x", time_dims(&[]), values, dates).is_err());
    }

    #[test]
    fn drop_feb29_and_convert() {
        let da = series(vec![273.15, 274.15, 275.15, 276.15]);
        let no_leap = da.drop_feb29();
        assert_eq!(no_leap.dates().unwrap().len(), 3);
        let celsius = no_leap.convert_units("degC").unwrap();
        assert_eq!(celsius.units(), Some("degC"));
        assert_abs_diff_eq!(celsius.values[[0, 0]], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(celsius.values[[2, 0]], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn broadcasting_inserts_threshold_axis() {
        let da = series(vec![1.0, 2.0, 3.0]);
        let thresholds = DataArray::new("t", vec!["threshold".into()], arr1(&[1.5, 2.5]).into_dyn()).unwrap();
        let out = da.zip_with(&thresholds, |v, t| f64::from(u8::from(v > t))).unwrap();
        assert_eq!(out.dims, vec!["time", "threshold", "cell"]);
        assert_eq!(out.values.shape(), &[3, 2, 1]);
        assert_eq!(out.values[[1, 0, 0]], 1.0);
        assert_eq!(out.values[[1, 1, 0]], 0.0);
    }

    #[test]
    fn zip_aligns_on_common_dates() {
        let a = series(vec![1.0, 2.0, 3.0, 4.0]);
        let b = a.select_time(&[1, 2]);
        let diff = a.sub(&b).unwrap();
        assert_eq!(diff.dates().unwrap().len(), 2);
        assert!(diff.values.iter().all(|v| *v == 0.0));
    }
}
