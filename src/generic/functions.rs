//! Generic reduction functions
//!
//! Every reducer turns prepared climate variables into a result resampled to
//! the output frequency. Reducers share the [`Reducer`] signature and hold no
//! state: everything they need comes from the variables and the
//! [`ReducerContext`].

use chrono::{Datelike, Duration, Months, NaiveDate};
use ndarray::{ArrayD, Axis, IxDyn};
use serde_json::json;
use tracing::{debug, warn};

use crate::calendar::{days_in_month, days_in_year, is_leap};
use crate::climate_variable::ClimateVariable;
use crate::data_array::{Coordinate, DataArray, TimeIndex};
use crate::errors::{ClimIndError, Result};
use crate::frequency::{Delta, Frequency, GroupByKey, Resample};
use crate::index_config::{IndexConfig, SamplingMethod};
use crate::statistics::resample::group_indices;
use crate::statistics::{
    group_reduce, map_time_lanes, percentiles, resample_op, resample_with_events, run_lengths, trailing_window,
    StatOperation,
};
use crate::threshold::percentile::PERCENTILES_DIM;
use crate::threshold::{LogicalLink, Operator, Threshold};
use crate::units::Unit;

/// Parameters shared by every reducer
#[derive(Debug, Clone, PartialEq)]
pub struct ReducerContext {
    pub resample_freq: Frequency,
    pub min_spell_length: usize,
    pub rolling_window_width: usize,
    pub group_by_key: GroupByKey,
    pub is_compared_to_reference: bool,
    pub logical_link: LogicalLink,
    pub date_event: bool,
    pub source_freq_delta: Delta,
    pub to_percent: bool,
    pub sampling_method: SamplingMethod,
}

impl ReducerContext {
    /// Context with default parameters for `freq`
    #[must_use]
    pub fn new(resample_freq: Frequency) -> Self {
        let group_by_key = resample_freq.group_by_key;
        Self {
            resample_freq,
            min_spell_length: crate::index_config::DEFAULT_MIN_SPELL_LENGTH,
            rolling_window_width: crate::index_config::DEFAULT_ROLLING_WINDOW_WIDTH,
            group_by_key,
            is_compared_to_reference: false,
            logical_link: LogicalLink::And,
            date_event: false,
            source_freq_delta: Delta::Days(1),
            to_percent: false,
            sampling_method: SamplingMethod::Resample,
        }
    }

    #[must_use]
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            resample_freq: config.frequency.clone(),
            min_spell_length: config.min_spell_length,
            rolling_window_width: config.rolling_window_width,
            group_by_key: config.frequency.group_by_key,
            is_compared_to_reference: config.is_compared_to_reference,
            logical_link: config.logical_link,
            date_event: config.date_event,
            source_freq_delta: config.source_frequency().delta,
            to_percent: config.out_unit.as_deref() == Some("%"),
            sampling_method: config.sampling_method,
        }
    }
}

/// Signature shared by all reducers
pub type Reducer = fn(&[ClimateVariable], &ReducerContext) -> Result<DataArray>;

fn threshold_of(cv: &ClimateVariable) -> Result<&Threshold> {
    cv.threshold
        .as_ref()
        .ok_or_else(|| ClimIndError::invalid(format!("'{}' needs a threshold", cv.name)))
}

/// Exceedance of a variable against its threshold, bootstrapped when needed
///
/// # Errors
///
/// Returns [`ClimIndError::InvalidArgument`] when the variable has no
/// threshold, plus the threshold's own errors.
pub fn compute_exceedance(cv: &ClimateVariable) -> Result<DataArray> {
    let threshold = threshold_of(cv)?;
    let bootstrap = cv.must_run_bootstrap();
    if bootstrap {
        debug!(variable = %cv.name, "bootstrapping percentile exceedances");
    }
    let mut exceedance = threshold.compute(&cv.studied_data, None, bootstrap)?;
    if let (true, Some((start, end))) = (bootstrap, threshold.reference_period()) {
        exceedance
            .attrs
            .insert("reference_epoch".to_string(), json!([start.to_string(), end.to_string()]));
    }
    Ok(exceedance)
}

/// Exceedances of every studied variable joined with `link`
///
/// Reference variables are skipped: they carry no threshold and only feed
/// the reducers comparing a study period to a base period.
///
/// # Errors
///
/// See [`compute_exceedance`] and [`LogicalLink::combine`].
pub fn compute_exceedances(vars: &[ClimateVariable], link: LogicalLink) -> Result<DataArray> {
    let exceedances = vars
        .iter()
        .filter(|cv| !cv.is_reference)
        .map(compute_exceedance)
        .collect::<Result<Vec<_>>>()?;
    link.combine(&exceedances)
}

/// First variable, the one single-variable indicators work on
///
/// # Errors
///
/// Returns [`ClimIndError::InvalidArgument`] for an empty list.
pub fn get_single_var(vars: &[ClimateVariable]) -> Result<&ClimateVariable> {
    vars.first()
        .ok_or_else(|| ClimIndError::invalid("no climate variable given"))
}

/// Studied and reference data of a two-variable indicator, both in the
/// reference's units
///
/// # Errors
///
/// Returns [`ClimIndError::VariableCount`] unless exactly two variables are
/// given, [`ClimIndError::InvalidArgument`] if either has a threshold, plus
/// unit conversion errors.
pub fn get_couple_of_var(vars: &[ClimateVariable], indicator: &str) -> Result<(DataArray, DataArray)> {
    let [study, reference] = vars else {
        return Err(ClimIndError::VariableCount {
            indicator: indicator.to_string(),
            expected: "two variables, or one variable and a reference period,".to_string(),
            actual: vars.len(),
        });
    };
    if study.threshold.is_some() || reference.threshold.is_some() {
        return Err(ClimIndError::invalid(format!("{indicator} cannot be computed with thresholds")));
    }
    let study_data = match (study.studied_data.units(), reference.studied_data.units()) {
        (Some(from), Some(to)) if from != to => study.studied_data.convert_units(to)?,
        _ => study.studied_data.clone(),
    };
    Ok((study_data, reference.studied_data.clone()))
}

fn with_event_dates(mut out: DataArray, key: &str, dates: ArrayD<Option<NaiveDate>>) -> DataArray {
    out.coords.insert(
        key.to_string(),
        Coordinate::Dates {
            dims: out.dims.clone(),
            values: dates,
        },
    );
    out
}

/// `date` moved by `steps` time steps of `delta`
fn advance(date: NaiveDate, delta: Delta, steps: i64) -> Option<NaiveDate> {
    let months = |n: u32| u32::try_from(i64::from(n) * steps.abs()).ok().map(Months::new);
    match delta {
        Delta::Days(n) => date.checked_add_signed(Duration::days(i64::from(n) * steps)),
        Delta::Hours(n) => date.checked_add_signed(Duration::hours(i64::from(n) * steps)),
        Delta::Months(n) if steps >= 0 => date.checked_add_months(months(n)?),
        Delta::Months(n) => date.checked_sub_months(months(n)?),
        Delta::Years(n) if steps >= 0 => date.checked_add_months(months(n * 12)?),
        Delta::Years(n) => date.checked_sub_months(months(n * 12)?),
    }
}

/// Same array with `f` applied to every time lane
fn map_lanes(data: &DataArray, f: impl Fn(ndarray::ArrayView1<'_, f64>) -> Vec<f64> + Sync + Send) -> DataArray {
    let len = data.values.len_of(Axis(0));
    let values = map_time_lanes(&data.values, len, |lane, mut out| {
        for (slot, v) in out.iter_mut().zip(f(lane)) {
            *slot = v;
        }
    });
    data.with_values(values, data.time.clone())
}

fn set_count_units(out: &mut DataArray, ctx: &ReducerContext) {
    out.set_units(ctx.source_freq_delta.count_unit());
}

/// Number of days in the bucket labelled `label`
fn bucket_day_count(freq: &Frequency, label: NaiveDate) -> Option<f64> {
    let leap = is_leap(label.year());
    let days = match freq.name.as_str() {
        "MONTH" => days_in_month(label.year(), label.month()),
        "YEAR" => days_in_year(label.year()),
        "AMJJAS" => 183,
        "ONDJFM" if leap => 183,
        "ONDJFM" => 182,
        "DJF" if leap => 91,
        "DJF" => 90,
        "MAM" | "JJA" => 92,
        "SON" => 91,
        _ => return None,
    };
    Some(f64::from(days))
}

/// Counts turned into a percentage of the days of each bucket
fn percent_of_bucket_days(result: DataArray, ctx: &ReducerContext) -> Result<DataArray> {
    let labels = result.require_dates()?;
    let lengths: Option<Vec<f64>> = labels.iter().map(|l| bucket_day_count(&ctx.resample_freq, *l)).collect();
    let Some(lengths) = lengths else {
        warn!(frequency = %ctx.resample_freq, "no day count known for this frequency, result left as a count");
        let mut result = result;
        set_count_units(&mut result, ctx);
        return Ok(result);
    };
    let mut values = result.values.clone();
    for (mut step, days) in values.axis_iter_mut(Axis(0)).zip(&lengths) {
        step.mapv_inplace(|v| v / days * 100.0);
    }
    let mut out = result.with_values(values, result.time.clone());
    out.set_units("%");
    Ok(out)
}

pub fn count_occurrences(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    let exceedances = compute_exceedances(vars, ctx.logical_link)?;
    let result = if ctx.date_event {
        let (out, (starts, ends)) = resample_with_events(&exceedances, &ctx.resample_freq, |values, dates| {
            let mut hits = values.iter().zip(dates).filter(|(v, _)| **v > 0.0).map(|(_, d)| *d);
            let first = hits.next();
            let last = hits.last().or(first);
            (StatOperation::Sum.apply(values), first, last)
        })?;
        with_event_dates(with_event_dates(out, "event_date_start", starts), "event_date_end", ends)
    } else {
        resample_op(&exceedances, &ctx.resample_freq, StatOperation::Sum)?
    };
    if ctx.to_percent {
        return percent_of_bucket_days(result, ctx);
    }
    let mut result = result;
    set_count_units(&mut result, ctx);
    Ok(result)
}

pub fn max_consecutive_occurrence(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    let exceedances = compute_exceedances(vars, ctx.logical_link)?;
    let rle = map_lanes(&exceedances, run_lengths);
    let mut result = if ctx.date_event {
        let delta = ctx.source_freq_delta;
        let (out, (starts, ends)) = resample_with_events(&rle, &ctx.resample_freq, move |values, dates| {
            let longest = StatOperation::Max.apply(values);
            let Some(i) = StatOperation::Max.arg(values).filter(|_| longest > 0.0) else {
                return (longest, None, None);
            };
            let start = dates[i];
            (longest, Some(start), advance(start, delta, longest as i64 - 1))
        })?;
        with_event_dates(with_event_dates(out, "event_date_start", starts), "event_date_end", ends)
    } else {
        resample_op(&rle, &ctx.resample_freq, StatOperation::Max)?
    };
    set_count_units(&mut result, ctx);
    Ok(result)
}

pub fn sum_of_spell_lengths(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    let exceedances = compute_exceedances(vars, ctx.logical_link)?;
    let min = ctx.min_spell_length as f64;
    let cropped = map_lanes(&exceedances, |lane| {
        run_lengths(lane)
            .into_iter()
            .map(|len| if len >= min { len } else { 0.0 })
            .collect()
    });
    let mut result = resample_op(&cropped, &ctx.resample_freq, StatOperation::Max)?;
    set_count_units(&mut result, ctx);
    Ok(result)
}

/// Clipped difference to a `reach` threshold, summed per bucket
fn reach_difference(vars: &[ClimateVariable], ctx: &ReducerContext, name: &str, op: fn(f64, f64) -> f64) -> Result<DataArray> {
    let cv = get_single_var(vars)?;
    let threshold = threshold_of(cv)?;
    if threshold.operator() != Some(Operator::Reach) {
        return Err(ClimIndError::invalid(format!(
            "{name} can only be computed with the 'reach' operator, got '{threshold}'"
        )));
    }
    let difference = threshold.compute(&cv.studied_data, Some(op), false)?;
    let clipped = difference.map(|v| if v.is_nan() { v } else { v.max(0.0) });
    let mut result = resample_op(&clipped, &ctx.resample_freq, StatOperation::Sum)?;
    if let Some(units) = cv.studied_data.units() {
        result.set_units(Unit::parse(units)?.delta().symbol());
    }
    Ok(result)
}

pub fn excess(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    reach_difference(vars, ctx, "excess", |value, threshold| value - threshold)
}

pub fn deficit(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    reach_difference(vars, ctx, "deficit", |value, threshold| threshold - value)
}

pub fn fraction_of_total(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    let cv = get_single_var(vars)?;
    let threshold = threshold_of(cv)?;
    let study = &cv.studied_data;
    let counted = match threshold.threshold_min_value() {
        Some(min) => {
            let min = min.in_unit(study.units())?;
            let op = threshold
                .operator()
                .filter(|op| *op != Operator::Reach)
                .unwrap_or(Operator::GreaterOrEqual);
            study.map(move |v| if op.compare(v, min).unwrap_or(false) { v } else { f64::NAN })
        }
        None => study.clone(),
    };
    let total = resample_op(&counted, &ctx.resample_freq, StatOperation::Sum)?;
    let exceedance = compute_exceedance(cv)?;
    let over = study.zip_with(&exceedance, |v, e| if e > 0.0 { v } else { 0.0 })?;
    let over = resample_op(&over, &ctx.resample_freq, StatOperation::Sum)?;
    let scale = if ctx.to_percent { 100.0 } else { 1.0 };
    let mut result = over.zip_with(&total, move |o, t| if t == 0.0 { f64::NAN } else { o / t * scale })?;
    result.set_units(if ctx.to_percent { "%" } else { "1" });
    Ok(result)
}

/// Studied data, masked by its threshold when it has one
fn filtered_study(cv: &ClimateVariable) -> Result<DataArray> {
    match &cv.threshold {
        Some(_) => cv.studied_data.where_true(&compute_exceedance(cv)?),
        None => Ok(cv.studied_data.clone()),
    }
}

fn simple_reduction(vars: &[ClimateVariable], ctx: &ReducerContext, op: StatOperation) -> Result<DataArray> {
    let cv = get_single_var(vars)?;
    let study = filtered_study(cv)?;
    if ctx.date_event && matches!(op, StatOperation::Max | StatOperation::Min) {
        let (out, (dates, _)) = resample_with_events(&study, &ctx.resample_freq, move |values, dates| {
            (op.apply(values), op.arg(values).map(|i| dates[i]), None)
        })?;
        return Ok(with_event_dates(out, "event_date", dates));
    }
    resample_op(&study, &ctx.resample_freq, op)
}

pub fn maximum(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    simple_reduction(vars, ctx, StatOperation::Max)
}

pub fn minimum(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    simple_reduction(vars, ctx, StatOperation::Min)
}

pub fn average(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    simple_reduction(vars, ctx, StatOperation::Mean)
}

pub fn standard_deviation(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    simple_reduction(vars, ctx, StatOperation::Std)
}

/// Sum per bucket; rates are first integrated over their time step
pub fn sum(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    let cv = get_single_var(vars)?;
    let mut study = filtered_study(cv)?;
    if study.unit().map_or(false, |u| u.is_rate()) {
        match ctx.source_freq_delta.seconds() {
            Some(seconds) => study = study.rate_to_amount(seconds)?,
            None => warn!(variable = %cv.name, "cannot integrate a rate over a variable length time step"),
        }
    }
    resample_op(&study, &ctx.resample_freq, StatOperation::Sum)
}

fn rolling_reduction(vars: &[ClimateVariable], ctx: &ReducerContext, average: bool, extreme: StatOperation) -> Result<DataArray> {
    let cv = get_single_var(vars)?;
    let study = filtered_study(cv)?;
    let width = ctx.rolling_window_width;
    if width == 0 {
        return Err(ClimIndError::invalid("rolling_window_width must be at least 1"));
    }
    let rolled = map_lanes(&study, |lane| {
        trailing_window(lane, width, |window| {
            let total: f64 = window.iter().sum();
            if average {
                total / width as f64
            } else {
                total
            }
        })
    });
    if !ctx.date_event {
        return resample_op(&rolled, &ctx.resample_freq, extreme);
    }
    let delta = ctx.source_freq_delta;
    let (out, (starts, ends)) = resample_with_events(&rolled, &ctx.resample_freq, move |values, dates| {
        let end = extreme.arg(values).map(|i| dates[i]);
        let start = end.and_then(|e| advance(e, delta, 1 - width as i64));
        (extreme.apply(values), start, end)
    })?;
    Ok(with_event_dates(with_event_dates(out, "event_date_start", starts), "event_date_end", ends))
}

pub fn max_of_rolling_sum(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    rolling_reduction(vars, ctx, false, StatOperation::Max)
}

pub fn min_of_rolling_sum(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    rolling_reduction(vars, ctx, false, StatOperation::Min)
}

pub fn max_of_rolling_average(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    rolling_reduction(vars, ctx, true, StatOperation::Max)
}

pub fn min_of_rolling_average(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    rolling_reduction(vars, ctx, true, StatOperation::Min)
}

fn with_units_of(mut result: DataArray, source: &DataArray) -> DataArray {
    if let Some(units) = source.units() {
        result.set_units(units);
    }
    result
}

pub fn mean_of_difference(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    let (study, reference) = get_couple_of_var(vars, "mean_of_difference")?;
    let result = resample_op(&study.sub(&reference)?, &ctx.resample_freq, StatOperation::Mean)?;
    Ok(with_units_of(result, &study))
}

pub fn difference_of_extremes(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    let (study, reference) = get_couple_of_var(vars, "difference_of_extremes")?;
    let max_study = resample_op(&study, &ctx.resample_freq, StatOperation::Max)?;
    let min_reference = resample_op(&reference, &ctx.resample_freq, StatOperation::Min)?;
    Ok(with_units_of(max_study.sub(&min_reference)?, &study))
}

pub fn mean_of_absolute_one_time_step_difference(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    let (study, reference) = get_couple_of_var(vars, "mean_of_absolute_one_time_step_difference")?;
    let difference = study.sub(&reference)?;
    let steps = difference.values.len_of(Axis(0));
    if steps < 2 {
        return Err(ClimIndError::invalid("a one time step difference needs at least two time steps"));
    }
    // the difference between steps i and i + 1 is dated at i + 1
    let values = map_time_lanes(&difference.values, steps - 1, |lane, mut out| {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = (lane[i + 1] - lane[i]).abs();
        }
    });
    let later: Vec<usize> = (1..steps).collect();
    let shifted = difference.select_time(&later);
    let variation = shifted.with_values(values, shifted.time.clone());
    let result = resample_op(&variation, &ctx.resample_freq, StatOperation::Mean)?;
    Ok(with_units_of(result, &study))
}

/// Whole series collapsed into one value per cell
fn collapse(data: &DataArray, op: StatOperation) -> Result<DataArray> {
    group_reduce(data, GroupByKey::RunIndexer, op)
}

fn grouped_key(date: NaiveDate, key: GroupByKey) -> Result<i32> {
    let groups = group_indices(&[date], key)?;
    groups
        .keys()
        .next()
        .copied()
        .ok_or_else(|| ClimIndError::invalid(format!("no group for {date}")))
}

/// Each resampled study bucket minus the reference group sharing its month or day of year
fn resampled_minus_grouped(study: &DataArray, reference: &DataArray, ctx: &ReducerContext, to_percent: bool) -> Result<DataArray> {
    let key = match ctx.resample_freq.resample {
        Resample::Monthly => GroupByKey::Month,
        Resample::Daily => GroupByKey::DayOfYear,
        _ => {
            return Err(ClimIndError::not_implemented(format!(
                "{} cannot be used with the {} frequency",
                SamplingMethod::GroupByRefAndResampleStudy,
                ctx.resample_freq.long_name
            )))
        }
    };
    let reduced_study = resample_op(study, &ctx.resample_freq, StatOperation::Mean)?;
    let reduced_reference = group_reduce(reference, key, StatOperation::Mean)?;
    let reference_keys: Vec<i32> = match &reduced_reference.time {
        Some(TimeIndex::Months(months)) => months.iter().map(|m| *m as i32).collect(),
        Some(TimeIndex::DaysOfYear(days)) => days.iter().map(|d| *d as i32).collect(),
        _ => Vec::new(),
    };
    let labels = reduced_study.require_dates()?;
    let slots: Vec<Option<usize>> = labels
        .iter()
        .map(|label| grouped_key(*label, key).map(|k| reference_keys.iter().position(|r| *r == k)))
        .collect::<Result<_>>()?;
    let mut values = reduced_study.values.clone();
    for (mut step, slot) in values.axis_iter_mut(Axis(0)).zip(&slots) {
        match slot {
            Some(slot) => {
                let reference_step = reduced_reference.values.index_axis(Axis(0), *slot);
                step.zip_mut_with(&reference_step, |s, r| {
                    let diff = *s - *r;
                    *s = if to_percent { diff / *r * 100.0 } else { diff };
                });
            }
            None => step.fill(f64::NAN),
        }
    }
    Ok(reduced_study.with_values(values, reduced_study.time.clone()))
}

pub fn difference_of_means(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    let (study, reference) = get_couple_of_var(vars, "difference_of_means")?;
    if ctx.is_compared_to_reference && ctx.sampling_method == SamplingMethod::Resample {
        return Err(ClimIndError::invalid(format!(
            "the reference is already a subset of the studied variable, it cannot be resampled; use sampling_method '{}' instead",
            SamplingMethod::GroupByRefAndResampleStudy
        )));
    }
    let mean = StatOperation::Mean;
    let (reduced_study, reduced_reference) = match ctx.sampling_method {
        SamplingMethod::GroupBy if ctx.group_by_key == GroupByKey::RunIndexer => {
            (collapse(&study, mean)?, collapse(&reference, mean)?)
        }
        SamplingMethod::GroupBy => (
            group_reduce(&study, ctx.group_by_key, mean)?,
            group_reduce(&reference, ctx.group_by_key, mean)?,
        ),
        SamplingMethod::Resample => (
            resample_op(&study, &ctx.resample_freq, mean)?,
            resample_op(&reference, &ctx.resample_freq, mean)?,
        ),
        SamplingMethod::GroupByRefAndResampleStudy
            if ctx.group_by_key == GroupByKey::RunIndexer || ctx.resample_freq.name == "YEAR" =>
        {
            (resample_op(&study, &ctx.resample_freq, mean)?, collapse(&reference, mean)?)
        }
        SamplingMethod::GroupByRefAndResampleStudy => {
            let result = resampled_minus_grouped(&study, &reference, ctx, ctx.to_percent)?;
            return Ok(anomaly_units(result, &study, ctx.to_percent));
        }
    };
    let result = if ctx.to_percent {
        reduced_study.zip_with(&reduced_reference, |s, r| (s - r) / r * 100.0)?
    } else {
        reduced_study.sub(&reduced_reference)?
    };
    Ok(anomaly_units(result, &study, ctx.to_percent))
}

fn anomaly_units(mut result: DataArray, study: &DataArray, to_percent: bool) -> DataArray {
    if to_percent {
        result.set_units("%");
        result
    } else {
        with_units_of(result, study)
    }
}

/// Per bucket percentiles of the studied variable.
///
/// The ranks and interpolation come from the variable's percentile threshold;
/// the result gains a `percentiles` dimension right after time.
pub fn percentile(vars: &[ClimateVariable], ctx: &ReducerContext) -> Result<DataArray> {
    let cv = get_single_var(vars)?;
    let Some(Threshold::Percentile(threshold)) = &cv.threshold else {
        return Err(ClimIndError::invalid(
            "percentile needs a percentile threshold such as '> 90 period_per' giving its ranks",
        ));
    };
    let study = &cv.studied_data;
    let dates = study.require_dates()?;
    let buckets = ctx.resample_freq.buckets(dates)?;
    let ranks = threshold.ranks().to_vec();
    let interpolation = threshold.interpolation();
    let n_ranks = ranks.len();
    let flat = map_time_lanes(&study.values, buckets.len() * n_ranks, |lane, mut out| {
        let mut scratch = Vec::new();
        for (b, bucket) in buckets.iter().enumerate() {
            scratch.clear();
            scratch.extend(bucket.indices.iter().map(|&i| lane[i]));
            for (r, value) in percentiles(&scratch, &ranks, interpolation).into_iter().enumerate() {
                out[b * n_ranks + r] = value;
            }
        }
    });
    let mut shape = vec![buckets.len(), n_ranks];
    shape.extend(study.cell_shape());
    let values = flat.into_shape(IxDyn(&shape))?;
    let labels = buckets.iter().map(|b| b.label).collect();
    let mut result = study.with_values(values, Some(TimeIndex::Dates(labels)));
    result.dims.insert(1, PERCENTILES_DIM.to_string());
    result.time_bounds = Some(buckets.iter().map(|b| (b.start, b.end)).collect());
    result.set_labels(PERCENTILES_DIM, ranks);
    if let (Some(first), Some(last)) = (dates.first(), dates.last()) {
        result
            .attrs
            .insert("climatology_bounds".to_string(), json!([first.to_string(), last.to_string()]));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate_variable::ClimateVariableBuilder;
    use crate::data_array::time_dims;
    use approx::assert_abs_diff_eq;
    use ndarray::Array;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn series(values: Vec<f64>, start: NaiveDate, units: &str) -> DataArray {
        let n = values.len();
        DataArray::daily("tas", time_dims(&[]), Array::from_shape_vec(IxDyn(&[n]), values).unwrap(), start, units)
            .unwrap()
    }

    fn var(values: Vec<f64>, query: Option<&str>) -> ClimateVariable {
        let builder = ClimateVariableBuilder::new("tas", series(values, ymd(2042, 1, 1), "K"));
        match query {
            Some(q) => builder.threshold_query(q).build().unwrap(),
            None => builder.build().unwrap(),
        }
    }

    fn ctx(freq: Frequency) -> ReducerContext {
        ReducerContext::new(freq)
    }

    #[test]
    fn counts_follow_the_operator_boundary() {
        let v = var(vec![1.0, 2.0, 3.0, 2.0], Some("> 2 K"));
        let out = count_occurrences(&[v], &ctx(Frequency::year())).unwrap();
        assert_eq!(out.values.as_slice().unwrap(), &[1.0]);
        assert_eq!(out.units(), Some("d"));

        let v = var(vec![1.0, 2.0, 3.0, 2.0], Some(">= 2 K"));
        let out = count_occurrences(&[v], &ctx(Frequency::year())).unwrap();
        assert_eq!(out.values.as_slice().unwrap(), &[3.0]);
    }

    #[test]
    fn reference_variables_are_not_counted() {
        let study = var(vec![1.0, 2.0, 3.0, 2.0], Some("> 2 K"));
        let mut reference = var(vec![5.0; 4], None);
        reference.is_reference = true;
        let out = count_occurrences(&[study, reference], &ctx(Frequency::year())).unwrap();
        assert_eq!(out.values.as_slice().unwrap(), &[1.0]);
    }

    #[test]
    fn count_with_dates_and_percent() {
        let mut values = vec![0.0; 31];
        values[3] = 5.0;
        values[10] = 5.0;
        let v = var(values, Some("> 1 K"));
        let mut c = ctx(Frequency::month());
        c.date_event = true;
        c.to_percent = true;
        let out = count_occurrences(&[v], &c).unwrap();
        assert_abs_diff_eq!(out.values[[0]], 2.0 / 31.0 * 100.0, epsilon = 1e-9);
        assert_eq!(out.units(), Some("%"));
        let Some(Coordinate::Dates { values, .. }) = out.coords.get("event_date_end") else {
            panic!("missing end dates");
        };
        assert_eq!(values[[0]], Some(ymd(2042, 1, 11)));
    }

    #[test]
    fn longest_spell_is_credited_to_its_start() {
        let values = vec![1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0];
        let v = var(values, Some(">= 1 K"));
        let mut c = ctx(Frequency::year());
        c.date_event = true;
        let out = max_consecutive_occurrence(&[v], &c).unwrap();
        assert_eq!(out.values[[0]], 3.0);
        let Some(Coordinate::Dates { values, .. }) = out.coords.get("event_date_start") else {
            panic!("missing start dates");
        };
        assert_eq!(values[[0]], Some(ymd(2042, 1, 4)));
        let Some(Coordinate::Dates { values, .. }) = out.coords.get("event_date_end") else {
            panic!("missing end dates");
        };
        assert_eq!(values[[0]], Some(ymd(2042, 1, 6)));
    }

    #[test]
    fn short_spells_are_dropped() {
        let values = vec![1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0];
        let mut c = ctx(Frequency::year());
        c.min_spell_length = 3;
        let out = sum_of_spell_lengths(&[var(values.clone(), Some(">= 1 K"))], &c).unwrap();
        assert_eq!(out.values[[0]], 3.0);
        c.min_spell_length = 4;
        let out = sum_of_spell_lengths(&[var(values, Some(">= 1 K"))], &c).unwrap();
        assert_eq!(out.values[[0]], 0.0);
    }

    #[test]
    fn excess_needs_reach() {
        let v = var(vec![280.0, 290.0, f64::NAN], Some("reach 285 K"));
        let out = excess(&[v.clone()], &ctx(Frequency::year())).unwrap();
        assert_abs_diff_eq!(out.values[[0]], 5.0, epsilon = 1e-9);
        let out = deficit(&[v], &ctx(Frequency::year())).unwrap();
        assert_abs_diff_eq!(out.values[[0]], 5.0, epsilon = 1e-9);

        let wrong = var(vec![280.0], Some("> 285 K"));
        assert!(excess(&[wrong], &ctx(Frequency::year())).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn fraction_of_total_in_percent() {
        let v = var(vec![1.0, 3.0, 6.0], Some("> 2 K"));
        let mut c = ctx(Frequency::year());
        let out = fraction_of_total(&[v.clone()], &c).unwrap();
        assert_abs_diff_eq!(out.values[[0]], 0.9, epsilon = 1e-9);
        c.to_percent = true;
        let out = fraction_of_total(&[v], &c).unwrap();
        assert_abs_diff_eq!(out.values[[0]], 90.0, epsilon = 1e-9);
        let zero = var(vec![0.0, 0.0], Some("> 2 K"));
        assert!(fraction_of_total(&[zero], &c).unwrap().values[[0]].is_nan());
    }

    #[test]
    fn maximum_records_its_date() {
        let v = var(vec![1.0, 7.0, 3.0, 7.0], None);
        let mut c = ctx(Frequency::year());
        c.date_event = true;
        let out = maximum(&[v], &c).unwrap();
        assert_eq!(out.values[[0]], 7.0);
        let Some(Coordinate::Dates { values, .. }) = out.coords.get("event_date") else {
            panic!("missing event date");
        };
        assert_eq!(values[[0]], Some(ymd(2042, 1, 2)));
    }

    #[test]
    fn threshold_masks_simple_reductions() {
        let v = var(vec![1.0, 7.0, 3.0, 9.0], Some("> 2 K"));
        let out = minimum(&[v.clone()], &ctx(Frequency::year())).unwrap();
        assert_eq!(out.values[[0]], 3.0);
        let out = average(&[v], &ctx(Frequency::year())).unwrap();
        assert_abs_diff_eq!(out.values[[0]], 19.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn sum_turns_rates_into_amounts() {
        let data = series(vec![1.0 / 86_400.0; 3], ymd(2042, 1, 1), "kg m-2 s-1");
        let v = ClimateVariableBuilder::new("pr", data).build().unwrap();
        let out = sum(&[v], &ctx(Frequency::year())).unwrap();
        assert_abs_diff_eq!(out.values[[0]], 3.0, epsilon = 1e-9);
        assert!(out.unit().unwrap().is_amount());
    }

    #[test]
    fn rolling_windows_report_their_span() {
        let v = var(vec![1.0, 2.0, 9.0, 1.0, 1.0], None);
        let mut c = ctx(Frequency::year());
        c.rolling_window_width = 2;
        c.date_event = true;
        let out = max_of_rolling_sum(&[v.clone()], &c).unwrap();
        assert_eq!(out.values[[0]], 11.0);
        let Some(Coordinate::Dates { values, .. }) = out.coords.get("event_date_start") else {
            panic!("missing start dates");
        };
        assert_eq!(values[[0]], Some(ymd(2042, 1, 2)));
        let out = min_of_rolling_average(&[v], &c).unwrap();
        assert_eq!(out.values[[0]], 1.0);
    }

    #[test]
    fn two_variable_reducers() {
        let study = var(vec![10.0, 12.0, 11.0], None);
        let reference = var(vec![5.0, 6.0, 9.0], None);
        let c = ctx(Frequency::year());
        let vars = [study.clone(), reference.clone()];
        assert_abs_diff_eq!(mean_of_difference(&vars, &c).unwrap().values[[0]], 13.0 / 3.0, epsilon = 1e-9);
        assert_eq!(difference_of_extremes(&vars, &c).unwrap().values[[0]], 7.0);
        // |(6 - 5) - (5 - 5)| = 1, |(2) - (6)| = 4
        let variation = mean_of_absolute_one_time_step_difference(&vars, &c).unwrap();
        assert_abs_diff_eq!(variation.values[[0]], 2.5, epsilon = 1e-9);
        assert!(matches!(
            mean_of_difference(&[study], &c),
            Err(ClimIndError::VariableCount { actual: 1, .. })
        ));
    }

    #[test]
    fn difference_of_means_sampling_methods_agree_on_whole_years() {
        let study = var(vec![4.0; 365], None);
        let reference = var(vec![1.0; 365], None);
        let vars = [study, reference];
        let mut c = ctx(Frequency::year());
        let resampled = difference_of_means(&vars, &c).unwrap();
        c.sampling_method = SamplingMethod::GroupByRefAndResampleStudy;
        let grouped = difference_of_means(&vars, &c).unwrap();
        assert_eq!(resampled.values[[0]], 3.0);
        assert_eq!(grouped.values[[0]], 3.0);
        c.to_percent = true;
        assert_eq!(difference_of_means(&vars, &c).unwrap().values[[0]], 300.0);
    }

    #[test]
    fn compared_reference_cannot_be_resampled() {
        let vars = [var(vec![1.0; 10], None), var(vec![1.0; 10], None)];
        let mut c = ctx(Frequency::year());
        c.is_compared_to_reference = true;
        assert!(difference_of_means(&vars, &c).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn percentiles_gain_a_dimension() {
        let v = var((1..=10).map(f64::from).collect(), Some("> 50 period_per"));
        let out = percentile(&[v], &ctx(Frequency::year())).unwrap();
        assert_eq!(out.dims[1], PERCENTILES_DIM);
        assert_eq!(out.values.shape(), &[1, 1]);
        assert_abs_diff_eq!(out.values[[0, 0]], 5.5, epsilon = 1e-9);
        assert!(out.attrs.contains_key("climatology_bounds"));
    }
}
