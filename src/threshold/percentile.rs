//! Percentile thresholds
//!
//! Percentiles are computed from a reference period, either per day of year
//! with a centred window of `doy_window_width` days (`doy_per`), or once per
//! grid cell over the whole period (`period_per`). Day of year percentiles
//! are laid out on a leap-aligned 366-slot axis so that February 29 never
//! leaks into a common year.
//!
//! When a studied period overlaps the reference period, exceedances of the
//! overlapping years are bootstrapped (Zhang et al., 2005): each in-base year
//! is compared with percentiles computed after replacing that year by each
//! other reference year in turn, and the exceedances are averaged.

use std::collections::HashMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use ndarray::{ArrayD, Axis, IxDyn};
use rayon::prelude::*;
use serde_json::json;
use tracing::debug;

use super::operator::Operator;
use super::{format_values, Quantity, ThresholdMetadata};
use crate::calendar::{aligned_day_of_year, is_leap, DAYS_IN_ALIGNED_YEAR};
use crate::data_array::{DataArray, TimeIndex};
use crate::errors::{ClimIndError, Result};
use crate::statistics::quantile::percentiles;
use crate::statistics::{map_time_lanes, QuantileInterpolation};
use crate::units::Unit;

/// Name of the dimension holding percentile ranks
pub const PERCENTILES_DIM: &str = "percentiles";
/// Name of the day of year dimension of doy percentiles
pub const DAY_OF_YEAR_DIM: &str = "dayofyear";
/// Sentinel unit of day of year percentile queries
pub const DOY_PERCENTILE_UNIT: &str = "doy_per";
/// Sentinel unit of period percentile queries
pub const PERIOD_PERCENTILE_UNIT: &str = "period_per";
/// Default width of the day of year aggregation window
pub const DEFAULT_DOY_WINDOW_WIDTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// One percentile per day of year
    DayOfYear,
    /// One percentile per grid cell for the whole reference period
    Period,
}

impl Granularity {
    #[must_use]
    pub const fn sentinel(self) -> &'static str {
        match self {
            Self::DayOfYear => DOY_PERCENTILE_UNIT,
            Self::Period => PERIOD_PERCENTILE_UNIT,
        }
    }

    #[must_use]
    pub fn from_sentinel(unit: &str) -> Option<Self> {
        match unit {
            DOY_PERCENTILE_UNIT => Some(Self::DayOfYear),
            PERIOD_PERCENTILE_UNIT => Some(Self::Period),
            _ => None,
        }
    }
}

/// How a data value is compared with its threshold
#[derive(Debug, Clone, Copy)]
enum Comparison {
    Operator(Operator),
    Override(fn(f64, f64) -> f64),
}

impl Comparison {
    fn new(operator: Operator, override_op: Option<fn(f64, f64) -> f64>) -> Result<Self> {
        match (override_op, operator) {
            (Some(op), _) => Ok(Self::Override(op)),
            (None, op) => {
                op.compare(0.0, 0.0)?;
                Ok(Self::Operator(op))
            }
        }
    }

    fn eval(self, value: f64, threshold: f64) -> f64 {
        match self {
            Self::Override(f) => f(value, threshold),
            Self::Operator(_) if value.is_nan() => f64::NAN,
            Self::Operator(op) => f64::from(u8::from(op.compare(value, threshold).unwrap_or(false))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PercentileThreshold {
    operator: Operator,
    ranks: Vec<f64>,
    granularity: Granularity,
    doy_window_width: usize,
    only_leap_years: bool,
    interpolation: QuantileInterpolation,
    reference_period: Option<(NaiveDate, NaiveDate)>,
    threshold_min_value: Option<Quantity>,
    unit: Option<String>,
    percentiles: Option<DataArray>,
    reference: Option<DataArray>,
}

impl PercentileThreshold {
    /// Percentile threshold waiting for its reference data
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when no rank is given or a
    /// rank lies outside `[0, 100]`.
    pub fn new(operator: Operator, ranks: Vec<f64>, granularity: Granularity) -> Result<Self> {
        if ranks.is_empty() {
            return Err(ClimIndError::invalid("a percentile threshold needs at least one rank"));
        }
        if let Some(bad) = ranks.iter().find(|r| !(0.0..=100.0).contains(*r)) {
            return Err(ClimIndError::invalid(format!("percentile rank {bad} is not within [0, 100]")));
        }
        Ok(Self {
            operator,
            ranks,
            granularity,
            doy_window_width: DEFAULT_DOY_WINDOW_WIDTH,
            only_leap_years: false,
            interpolation: QuantileInterpolation::default(),
            reference_period: None,
            threshold_min_value: None,
            unit: None,
            percentiles: None,
            reference: None,
        })
    }

    /// Threshold around already computed percentiles.
    ///
    /// `per` needs a `percentiles` coordinate and a `climatology_bounds`
    /// attribute; a `dayofyear` dimension makes it a day of year threshold.
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when the array is not shaped
    /// like a percentile array.
    pub fn from_percentiles(operator: Operator, per: DataArray) -> Result<Self> {
        if !is_percentile_array(&per) {
            return Err(ClimIndError::invalid(
                "a percentile array needs a 'percentiles' coordinate and 'climatology_bounds'",
            ));
        }
        let granularity = if per.axis_of(DAY_OF_YEAR_DIM).is_some() {
            Granularity::DayOfYear
        } else {
            Granularity::Period
        };
        let ranks = per.labels(PERCENTILES_DIM).unwrap_or_default().to_vec();
        let mut threshold = Self::new(operator, ranks, granularity)?;
        threshold.unit = per.units().map(str::to_string);
        threshold.reference_period = climatology_bounds(&per);
        threshold.percentiles = Some(per);
        Ok(threshold)
    }

    #[must_use]
    pub const fn with_doy_window_width(mut self, width: usize) -> Self {
        self.doy_window_width = width;
        self
    }

    #[must_use]
    pub const fn with_only_leap_years(mut self, only_leap_years: bool) -> Self {
        self.only_leap_years = only_leap_years;
        self
    }

    #[must_use]
    pub const fn with_interpolation(mut self, interpolation: QuantileInterpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    #[must_use]
    pub const fn with_reference_period(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.reference_period = Some((start, end));
        self
    }

    #[must_use]
    pub fn with_threshold_min_value(mut self, min: Option<Quantity>) -> Self {
        self.threshold_min_value = min;
        self
    }

    #[must_use]
    pub const fn operator(&self) -> Operator {
        self.operator
    }

    #[must_use]
    pub fn ranks(&self) -> &[f64] {
        &self.ranks
    }

    #[must_use]
    pub const fn granularity(&self) -> Granularity {
        self.granularity
    }

    #[must_use]
    pub const fn interpolation(&self) -> QuantileInterpolation {
        self.interpolation
    }

    #[must_use]
    pub const fn doy_window_width(&self) -> usize {
        self.doy_window_width
    }

    #[must_use]
    pub const fn reference_period(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.reference_period
    }

    #[must_use]
    pub const fn threshold_min_value(&self) -> Option<&Quantity> {
        self.threshold_min_value.as_ref()
    }

    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.percentiles.is_some()
    }

    /// Computed percentiles, once ready
    #[must_use]
    pub const fn percentiles(&self) -> Option<&DataArray> {
        self.percentiles.as_ref()
    }

    /// Compute the percentiles from `data`, restricted to the reference period.
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when the reference slice is
    /// empty or `data` has no dates.
    pub fn prepared(&self, data: &DataArray) -> Result<Self> {
        data.require_dates()?;
        let mut reference = match self.reference_period {
            Some((start, end)) => data.slice_period(start, end),
            None => data.clone(),
        };
        if self.only_leap_years {
            reference = reference.filter_dates(|d| is_leap(d.year()));
        }
        let ref_dates = reference.require_dates()?.to_vec();
        let (Some(first), Some(last)) = (ref_dates.first().copied(), ref_dates.last().copied()) else {
            return Err(ClimIndError::invalid(format!(
                "the reference period {:?} does not overlap the data of '{}'",
                self.reference_period, data.name
            )));
        };
        if let Some(min) = &self.threshold_min_value {
            let min = min.in_unit(reference.units())?;
            reference = reference.map(move |v| if v >= min { v } else { f64::NAN });
        }
        debug!(
            ranks = ?self.ranks,
            granularity = ?self.granularity,
            reference_steps = ref_dates.len(),
            "computing percentiles"
        );
        let mut per = match self.granularity {
            Granularity::DayOfYear => self.doy_percentiles(&reference)?,
            Granularity::Period => self.period_percentiles(&reference)?,
        };
        per.set_labels(PERCENTILES_DIM, self.ranks.clone());
        per.attrs.insert(
            "climatology_bounds".to_string(),
            json!([first.to_string(), last.to_string()]),
        );
        let mut out = self.clone();
        out.unit = reference.units().map(str::to_string);
        out.reference_period = Some((first, last));
        out.percentiles = Some(per);
        out.reference = Some(reference);
        Ok(out)
    }

    fn doy_percentiles(&self, reference: &DataArray) -> Result<DataArray> {
        let windows = doy_windows(reference.require_dates()?, self.doy_window_width);
        let n_ranks = self.ranks.len();
        let flat = map_time_lanes(&reference.values, DAYS_IN_ALIGNED_YEAR * n_ranks, |lane, mut out| {
            let lane = lane.to_vec();
            let per = doy_percentiles_of(&lane, &windows, &self.ranks, self.interpolation);
            for (slot, value) in out.iter_mut().zip(per) {
                *slot = value;
            }
        });
        let mut shape = vec![DAYS_IN_ALIGNED_YEAR, n_ranks];
        shape.extend(reference.cell_shape());
        let values = flat.into_shape(IxDyn(&shape))?;
        let mut dims = vec![DAY_OF_YEAR_DIM.to_string(), PERCENTILES_DIM.to_string()];
        dims.extend(reference.dims.iter().skip(1).cloned());
        let mut per = reference.with_values(values, None);
        per.dims = dims;
        per.time = Some(TimeIndex::DaysOfYear((1..=DAYS_IN_ALIGNED_YEAR as u32).collect()));
        Ok(per)
    }

    fn period_percentiles(&self, reference: &DataArray) -> Result<DataArray> {
        let values = map_time_lanes(&reference.values, self.ranks.len(), |lane, mut out| {
            let lane = lane.to_vec();
            for (slot, value) in out.iter_mut().zip(percentiles(&lane, &self.ranks, self.interpolation)) {
                *slot = value;
            }
        });
        let mut per = reference.with_values(values, None);
        per.dims[0] = PERCENTILES_DIM.to_string();
        Ok(per)
    }

    /// Same threshold with percentiles expressed in `unit`
    ///
    /// # Errors
    ///
    /// Returns unit errors when the conversion is impossible.
    pub fn converted_to(&self, unit: &str) -> Result<Self> {
        if !self.is_ready() || self.unit.as_deref() == Some(unit) {
            return Ok(self.clone());
        }
        Ok(Self {
            percentiles: self.percentiles.as_ref().map(|p| p.convert_units(unit)).transpose()?,
            reference: self.reference.as_ref().map(|r| r.convert_units(unit)).transpose()?,
            unit: Some(unit.to_string()),
            ..self.clone()
        })
    }

    fn floor(&self) -> Result<Option<f64>> {
        self.threshold_min_value
            .as_ref()
            .map(|min| min.in_unit(self.unit.as_deref()))
            .transpose()
    }

    /// Exceedance of `data` against the percentiles.
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when the percentiles are not
    /// computed yet, when bootstrapping without `median_unbiased`
    /// interpolation, or on unit and shape errors.
    pub fn compute(&self, data: &DataArray, override_op: Option<fn(f64, f64) -> f64>, bootstrap: bool) -> Result<DataArray> {
        let comparison = Comparison::new(self.operator, override_op)?;
        let threshold = match (data.units(), self.unit.as_deref()) {
            (Some(data_unit), Some(unit)) if data_unit != unit => self.converted_to(data_unit)?,
            _ => self.clone(),
        };
        let per = threshold.percentiles.as_ref().ok_or_else(|| {
            ClimIndError::invalid("percentiles must be computed from reference data before use")
        })?;
        let floor = threshold.floor()?;
        let per = match floor {
            Some(min) => per.map(move |v| if v > min { v } else { min }),
            None => per.clone(),
        };
        let mut out = if bootstrap && self.granularity == Granularity::DayOfYear {
            if self.interpolation != QuantileInterpolation::MedianUnbiased {
                return Err(ClimIndError::invalid(
                    "the bootstrap of doy percentiles only supports the 'median_unbiased' interpolation",
                ));
            }
            let mut out = threshold.bootstrapped(data, &per, comparison, floor)?;
            if let Some((start, end)) = threshold.reference_period {
                out.attrs.insert("reference_period".to_string(), json!([start.to_string(), end.to_string()]));
            }
            out
        } else {
            let values = match self.granularity {
                Granularity::DayOfYear => doy_threshold_at(&per, data.require_dates()?)?,
                Granularity::Period => squeeze_ranks(&per, 0)?,
            };
            data.zip_with(&values, move |v, t| comparison.eval(v, t))?
        };
        if override_op.is_none() {
            out.attrs.remove("units");
        }
        Ok(out)
    }

    fn bootstrapped(&self, study: &DataArray, per: &DataArray, comparison: Comparison, floor: Option<f64>) -> Result<DataArray> {
        let reference = self
            .reference
            .as_ref()
            .ok_or_else(|| ClimIndError::invalid("bootstrapping needs the reference data the percentiles came from"))?;
        if reference.cell_shape() != study.cell_shape() {
            return Err(ClimIndError::invalid("studied and reference data do not share the same grid"));
        }
        let study_dates = study.require_dates()?;
        let ref_dates = reference.require_dates()?;
        let windows = doy_windows(ref_dates, self.doy_window_width);
        let ref_years = reference.years();
        let positions: HashMap<(i32, u32), usize> = ref_dates
            .iter()
            .enumerate()
            .map(|(i, d)| ((d.year(), aligned_day_of_year(*d)), i))
            .collect();
        let slots: Vec<usize> = study_dates.iter().map(|d| aligned_day_of_year(*d) as usize - 1).collect();
        let n_time = study_dates.len();
        let n_ranks = self.ranks.len();
        let n_cells: usize = study.cell_shape().iter().product();
        debug!(in_base_years = ?ref_years, cells = n_cells, "bootstrapping doy percentiles");

        let study2 = study.values.as_standard_layout().into_owned().into_shape((n_time, n_cells))?;
        let ref2 = reference
            .values
            .as_standard_layout()
            .into_owned()
            .into_shape((ref_dates.len(), n_cells))?;
        let per3 = per.values.as_standard_layout().into_owned().into_shape((DAYS_IN_ALIGNED_YEAR, n_ranks, n_cells))?;

        let cells: Vec<Vec<f64>> = (0..n_cells)
            .into_par_iter()
            .map(|c| {
                let study_lane = study2.column(c).to_vec();
                let ref_lane = ref2.column(c).to_vec();
                let mut out = vec![f64::NAN; n_time * n_ranks];
                for (t, &v) in study_lane.iter().enumerate() {
                    for r in 0..n_ranks {
                        out[t * n_ranks + r] = comparison.eval(v, per3[[slots[t], r, c]]);
                    }
                }
                for &year in &ref_years {
                    let in_year: Vec<usize> = (0..n_time).filter(|&t| study_dates[t].year() == year).collect();
                    if in_year.is_empty() {
                        continue;
                    }
                    let mut sums = vec![0.0; in_year.len() * n_ranks];
                    let mut replacements = 0_usize;
                    for &other in ref_years.iter().filter(|&&y| y != year) {
                        let mut replaced = ref_lane.clone();
                        for (i, d) in ref_dates.iter().enumerate().filter(|(_, d)| d.year() == year) {
                            replaced[i] = positions
                                .get(&(other, aligned_day_of_year(*d)))
                                .map_or(f64::NAN, |&j| ref_lane[j]);
                        }
                        let per = doy_percentiles_of(&replaced, &windows, &self.ranks, self.interpolation);
                        for (k, &t) in in_year.iter().enumerate() {
                            for r in 0..n_ranks {
                                let mut p = per[slots[t] * n_ranks + r];
                                if let Some(min) = floor {
                                    p = p.max(min);
                                }
                                sums[k * n_ranks + r] += comparison.eval(study_lane[t], p);
                            }
                        }
                        replacements += 1;
                    }
                    if replacements > 0 {
                        for (k, &t) in in_year.iter().enumerate() {
                            for r in 0..n_ranks {
                                out[t * n_ranks + r] = sums[k * n_ranks + r] / replacements as f64;
                            }
                        }
                    }
                }
                out
            })
            .collect();

        let mut values = ArrayD::from_elem(IxDyn(&[n_time, n_ranks, n_cells]), f64::NAN);
        for (c, cell) in cells.iter().enumerate() {
            for t in 0..n_time {
                for r in 0..n_ranks {
                    values[[t, r, c]] = cell[t * n_ranks + r];
                }
            }
        }
        let mut shape = vec![n_time, n_ranks];
        shape.extend(study.cell_shape());
        let values = values.into_shape(IxDyn(&shape))?;
        let mut dims = vec![study.dims[0].clone(), PERCENTILES_DIM.to_string()];
        dims.extend(study.dims.iter().skip(1).cloned());
        let mut out = study.with_values(values, study.time.clone());
        out.dims = dims;
        out.set_labels(PERCENTILES_DIM, self.ranks.clone());
        squeeze_ranks(&out, 1)
    }

    #[must_use]
    pub fn metadata(&self) -> ThresholdMetadata {
        let op = self.operator;
        let (kind, short) = match self.granularity {
            Granularity::DayOfYear => ("doy", "doy_per"),
            Granularity::Period => ("period", "period_per"),
        };
        let label = match self.granularity {
            Granularity::DayOfYear => "day of year",
            Granularity::Period => "period",
        };
        let single = self.ranks.len() == 1;
        let mut long_name = if single {
            format!("{} {}th {label} percentile", op.long_name(), self.ranks[0])
        } else {
            format!("{} {} {label} percentiles", op.long_name(), format_values(&self.ranks))
        };
        if let Some(min) = &self.threshold_min_value {
            long_name.push_str(&format!(" {}", min.considered_template(self.unit.as_deref().unwrap_or(""))));
        }
        let plural = if single { "" } else { "s" };
        ThresholdMetadata {
            standard_name: format!("{}_{kind}_percentile_threshold{plural}", op.standard_name()),
            long_name: long_name.trim_start().to_string(),
            short_name: format!("{short}_threshold{plural}"),
        }
    }
}

/// True when `per` looks like the output of a percentile computation
#[must_use]
pub fn is_percentile_array(per: &DataArray) -> bool {
    per.labels(PERCENTILES_DIM).is_some() && per.attrs.contains_key("climatology_bounds")
}

fn climatology_bounds(per: &DataArray) -> Option<(NaiveDate, NaiveDate)> {
    let bounds = per.attrs.get("climatology_bounds")?.as_array()?;
    let parse = |v: &serde_json::Value| v.as_str().and_then(|s| s.parse::<NaiveDate>().ok());
    Some((parse(bounds.first()?)?, parse(bounds.get(1)?)?))
}

/// Indices of the reference time steps contributing to each aligned day of year
fn doy_windows(dates: &[NaiveDate], width: usize) -> Vec<Vec<usize>> {
    let before = width / 2;
    let after = width.saturating_sub(1) / 2;
    let mut windows = vec![Vec::new(); DAYS_IN_ALIGNED_YEAR];
    let n = dates.len();
    for (t, date) in dates.iter().enumerate() {
        let slot = aligned_day_of_year(*date) as usize - 1;
        let lo = t.saturating_sub(before);
        let hi = (t + after).min(n.saturating_sub(1));
        windows[slot].extend(lo..=hi);
    }
    windows
}

/// Flattened `[slot][rank]` percentiles of one series
fn doy_percentiles_of(lane: &[f64], windows: &[Vec<usize>], ranks: &[f64], interpolation: QuantileInterpolation) -> Vec<f64> {
    let mut out = Vec::with_capacity(windows.len() * ranks.len());
    let mut sample = Vec::new();
    for window in windows {
        sample.clear();
        sample.extend(window.iter().map(|&i| lane[i]));
        out.extend(percentiles(&sample, ranks, interpolation));
    }
    out
}

/// Day of year percentiles picked for each date, shaped `(time, [percentiles,] cells...)`
fn doy_threshold_at(per: &DataArray, dates: &[NaiveDate]) -> Result<DataArray> {
    let slots: Vec<usize> = dates.iter().map(|d| aligned_day_of_year(*d) as usize - 1).collect();
    let values = per.values.select(Axis(0), &slots);
    let mut dims = per.dims.clone();
    dims[0] = crate::data_array::TIME.to_string();
    let mut out = DataArray::from_dates(per.name.clone(), dims, values, dates.to_vec())?;
    out.coords = per.coords.clone();
    out.attrs = per.attrs.clone();
    squeeze_ranks(&out, 1)
}

/// Drop the percentile axis when a single rank was asked for
fn squeeze_ranks(array: &DataArray, axis: usize) -> Result<DataArray> {
    if array.dims.get(axis).map(String::as_str) != Some(PERCENTILES_DIM) || array.values.len_of(Axis(axis)) != 1 {
        return Ok(array.clone());
    }
    let values = array.values.index_axis(Axis(axis), 0).to_owned();
    let mut out = array.with_values(values, array.time.clone());
    out.dims.remove(axis);
    out.coords.remove(PERCENTILES_DIM);
    out.time_bounds = array.time_bounds.clone();
    Ok(out)
}

impl fmt::Display for PercentileThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranks.len() == 1 {
            write!(f, "{} {} {}", self.operator, self.ranks[0], self.granularity.sentinel())
        } else {
            write!(f, "{} {} {}", self.operator, format_values(&self.ranks), self.granularity.sentinel())
        }
    }
}

/// Unit check used by the factory for explicit units on percentile thresholds
pub(crate) fn validate_unit(unit: Option<&str>) -> Result<()> {
    match unit {
        Some(u) if Granularity::from_sentinel(u).is_none() => Unit::parse(u).map(|_| ()),
        _ => Ok(()),
    }
}
