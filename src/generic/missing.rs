//! Missing-value policies
//!
//! After an index is computed, every output step whose input bucket lacks too
//! much data is set to NaN. The policy decides what "too much" means. Counts
//! are made against the time steps the bucket should contain, so a season cut
//! by the start or end of the input is missing under the default policy.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde_json::Value;
use tracing::debug;

use crate::data_array::{DataArray, TimeIndex};
use crate::errors::{ClimIndError, Result};
use crate::frequency::{Bucket, Frequency, Resample};
use crate::statistics::map_time_lanes;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MissingPolicy {
    /// A bucket is missing as soon as one step is missing
    #[default]
    Any,
    /// A bucket needs at least `n` valid steps
    AtLeastN { n: usize },
    /// A bucket may miss at most `tolerance` (a fraction) of its steps
    Pct { tolerance: f64 },
    /// WMO rule, per month: at most `nm` missing days and no more than `nc`
    /// consecutive missing days
    Wmo { nm: usize, nc: usize },
    /// Never mask
    Skip,
    /// Use the policy of the index configuration
    FromConfig,
}

fn option_usize(options: Option<&Value>, key: &str, default: usize) -> Result<usize> {
    match options.and_then(|o| o.get(key)) {
        None => Ok(default),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| ClimIndError::invalid(format!("missing option '{key}' must be a positive integer, got {v}"))),
    }
}

impl MissingPolicy {
    /// Build a policy from its name and options, validating the options
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] for unknown names, options
    /// given to a policy inherited from the configuration, unknown option
    /// keys or out of range values.
    pub fn from_name(name: &str, options: Option<&Value>) -> Result<Self> {
        let options = options.filter(|o| !o.is_null());
        if let Some(o) = options {
            if !o.is_object() {
                return Err(ClimIndError::invalid(format!("missing options must be a mapping, got {o}")));
            }
        }
        let name = name.trim().to_ascii_lowercase();
        let allowed: &[&str] = match name.as_str() {
            "at_least_n" => &["n"],
            "pct" => &["tolerance"],
            "wmo" => &["nm", "nc"],
            _ => &[],
        };
        if let Some(map) = options.and_then(Value::as_object) {
            if let Some(key) = map.keys().find(|k| !allowed.contains(&k.as_str())) {
                return Err(ClimIndError::invalid(format!(
                    "'{key}' is not an option of the '{name}' missing method"
                )));
            }
        }
        match name.as_str() {
            "any" => Ok(Self::Any),
            "skip" => Ok(Self::Skip),
            "from_config" | "from_context" => {
                if options.is_some() {
                    return Err(ClimIndError::invalid(
                        "missing_options cannot be set when the missing method is taken from the configuration",
                    ));
                }
                Ok(Self::FromConfig)
            }
            "at_least_n" => {
                let n = option_usize(options, "n", 20)?;
                if n == 0 {
                    return Err(ClimIndError::invalid("at_least_n needs n >= 1"));
                }
                Ok(Self::AtLeastN { n })
            }
            "pct" => {
                let tolerance = match options.and_then(|o| o.get("tolerance")) {
                    None => 0.05,
                    Some(v) => v
                        .as_f64()
                        .ok_or_else(|| ClimIndError::invalid(format!("tolerance must be a number, got {v}")))?,
                };
                if !(0.0..=1.0).contains(&tolerance) {
                    return Err(ClimIndError::invalid(format!(
                        "tolerance must lie between 0 and 1, got {tolerance}"
                    )));
                }
                Ok(Self::Pct { tolerance })
            }
            "wmo" => {
                let nm = option_usize(options, "nm", 11)?;
                let nc = option_usize(options, "nc", 5)?;
                if nm > 31 || nc > 31 {
                    return Err(ClimIndError::invalid(format!("wmo needs nm and nc <= 31, got {nm} and {nc}")));
                }
                Ok(Self::Wmo { nm, nc })
            }
            other => Err(ClimIndError::invalid(format!(
                "Unknown missing method '{other}', use any, at_least_n, pct, wmo, skip or from_config"
            ))),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::AtLeastN { .. } => "at_least_n",
            Self::Pct { .. } => "pct",
            Self::Wmo { .. } => "wmo",
            Self::Skip => "skip",
            Self::FromConfig => "from_config",
        }
    }

    /// Policy actually applied, `FromConfig` taking the configuration's one
    #[must_use]
    pub fn resolve(self, config: Self) -> Self {
        match (self, config) {
            (Self::FromConfig, Self::FromConfig) => Self::Any,
            (Self::FromConfig, config) => config,
            (own, _) => own,
        }
    }

    fn bucket_is_missing(self, flags: &[bool], dates: &[NaiveDate]) -> bool {
        let expected = flags.len();
        let missing = flags.iter().filter(|m| **m).count();
        match self {
            Self::Skip | Self::FromConfig => false,
            Self::Any => missing > 0 || expected == 0,
            Self::AtLeastN { n } => expected - missing < n,
            Self::Pct { tolerance } => expected == 0 || missing as f64 / expected as f64 > tolerance,
            Self::Wmo { nm, nc } => {
                let mut per_month: BTreeMap<(i32, u32), (usize, usize, usize)> = BTreeMap::new();
                for (flag, date) in flags.iter().zip(dates) {
                    let (count, run, longest) = per_month.entry((date.year(), date.month())).or_default();
                    if *flag {
                        *count += 1;
                        *run += 1;
                        *longest = (*longest).max(*run);
                    } else {
                        *run = 0;
                    }
                }
                expected == 0 || per_month.values().any(|(count, _, longest)| *count > nm || *longest > nc)
            }
        }
    }

    /// Per bucket mask of `data` (1 where missing, 0 elsewhere) for the
    /// resampling `freq`, `data` being sampled at `source`
    ///
    /// # Errors
    ///
    /// Returns an error when `data` has no dates or cannot be bucketed.
    pub fn mask(self, data: &DataArray, freq: &Frequency, source: &Frequency) -> Result<DataArray> {
        let dates = data.require_dates()?;
        let buckets = freq.buckets(dates)?;
        let step_key = |d: NaiveDate| -> NaiveDate {
            match source.resample {
                Resample::Monthly => d.with_day(1).unwrap_or(d),
                Resample::Yearly { .. } => NaiveDate::from_ymd_opt(d.year(), 1, 1).unwrap_or(d),
                Resample::Daily | Resample::Hourly => d,
            }
        };
        let positions: BTreeMap<NaiveDate, usize> = dates.iter().enumerate().map(|(i, d)| (step_key(*d), i)).collect();
        let expected: Vec<Vec<(NaiveDate, Option<usize>)>> = buckets
            .iter()
            .map(|bucket| expected_steps(bucket, freq, &step_key, &positions))
            .collect();
        debug!(policy = self.name(), buckets = buckets.len(), "computing missing-value mask");
        let values = map_time_lanes(&data.values, buckets.len(), |lane, mut out| {
            let mut flags = Vec::new();
            let mut step_dates = Vec::new();
            for (slot, steps) in out.iter_mut().zip(&expected) {
                flags.clear();
                step_dates.clear();
                for (date, position) in steps {
                    flags.push(position.map_or(true, |i| lane[i].is_nan()));
                    step_dates.push(*date);
                }
                *slot = f64::from(u8::from(self.bucket_is_missing(&flags, &step_dates)));
            }
        });
        let labels = buckets.iter().map(|b| b.label).collect();
        let mut mask = data.with_values(values, Some(TimeIndex::Dates(labels)));
        mask.name = "missing".to_string();
        mask.attrs.clear();
        Ok(mask)
    }
}

/// Steps a bucket should hold, with their position in the data when present
fn expected_steps(
    bucket: &Bucket,
    freq: &Frequency,
    step_key: &impl Fn(NaiveDate) -> NaiveDate,
    positions: &BTreeMap<NaiveDate, usize>,
) -> Vec<(NaiveDate, Option<usize>)> {
    let mut steps: Vec<(NaiveDate, Option<usize>)> = Vec::new();
    for day in bucket.start.iter_days().take_while(|d| *d <= bucket.end) {
        if !freq.indexer.as_ref().map_or(true, |ix| ix.matches(day)) {
            continue;
        }
        let key = step_key(day);
        if steps.last().map_or(true, |(last, _)| *last != key) {
            steps.push((key, positions.get(&key).copied()));
        }
    }
    steps
}

/// Union of the masks of several inputs
///
/// # Errors
///
/// Propagates mask and broadcasting errors.
pub fn combined_mask(policy: MissingPolicy, inputs: &[&DataArray], freq: &Frequency, source: &Frequency) -> Result<Option<DataArray>> {
    let mut combined: Option<DataArray> = None;
    for data in inputs.iter().filter(|d| d.dates().is_some()) {
        let mask = policy.mask(data, freq, source)?;
        combined = Some(match combined {
            None => mask,
            Some(acc) => acc.zip_with(&mask, f64::max)?,
        });
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_array::time_dims;
    use ndarray::{Array, IxDyn};

    fn daily(values: Vec<f64>, start: NaiveDate) -> DataArray {
        let n = values.len();
        DataArray::daily("tas", time_dims(&[]), Array::from_shape_vec(IxDyn(&[n]), values).unwrap(), start, "K")
            .unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn options_are_validated() {
        assert_eq!(MissingPolicy::from_name("any", None).unwrap(), MissingPolicy::Any);
        let opts = serde_json::json!({"n": 10});
        assert_eq!(MissingPolicy::from_name("at_least_n", Some(&opts)).unwrap(), MissingPolicy::AtLeastN { n: 10 });
        assert!(MissingPolicy::from_name("pct", Some(&serde_json::json!({"tolerance": 2.0}))).is_err());
        assert!(MissingPolicy::from_name("wmo", Some(&serde_json::json!({"n": 3}))).is_err());
        assert!(MissingPolicy::from_name("from_config", Some(&serde_json::json!({"n": 3}))).is_err());
        assert!(MissingPolicy::from_name("sometimes", None).is_err());
    }

    #[test]
    fn from_config_inherits() {
        let own = MissingPolicy::FromConfig;
        assert_eq!(own.resolve(MissingPolicy::Skip), MissingPolicy::Skip);
        assert_eq!(own.resolve(MissingPolicy::FromConfig), MissingPolicy::Any);
        assert_eq!(MissingPolicy::Pct { tolerance: 0.1 }.resolve(MissingPolicy::Skip), MissingPolicy::Pct { tolerance: 0.1 });
    }

    #[test]
    fn partial_months_are_missing_under_any() {
        // 2042-01-15 to 2042-03-31
        let data = daily(vec![1.0; 76], ymd(2042, 1, 15));
        let mask = MissingPolicy::Any.mask(&data, &Frequency::month(), &Frequency::day()).unwrap();
        assert_eq!(mask.values.as_slice().unwrap(), &[1.0, 0.0, 0.0]);
        let lenient = MissingPolicy::AtLeastN { n: 10 }.mask(&data, &Frequency::month(), &Frequency::day()).unwrap();
        assert_eq!(lenient.values.as_slice().unwrap(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn nan_values_count_as_missing() {
        let mut values = vec![1.0; 31];
        values[3] = f64::NAN;
        values[4] = f64::NAN;
        let data = daily(values, ymd(2042, 1, 1));
        let freq = Frequency::month();
        let src = Frequency::day();
        assert_eq!(MissingPolicy::Any.mask(&data, &freq, &src).unwrap().values[[0]], 1.0);
        assert_eq!(MissingPolicy::Pct { tolerance: 0.1 }.mask(&data, &freq, &src).unwrap().values[[0]], 0.0);
        assert_eq!(MissingPolicy::Wmo { nm: 11, nc: 1 }.mask(&data, &freq, &src).unwrap().values[[0]], 1.0);
        assert_eq!(MissingPolicy::Wmo { nm: 11, nc: 5 }.mask(&data, &freq, &src).unwrap().values[[0]], 0.0);
    }

    #[test]
    fn seasons_count_indexed_days_only() {
        let season = Frequency::season(&[12, 1]).unwrap();
        let data = daily(vec![1.0; 365], ymd(2042, 1, 1)).select_indexer(season.indexer.as_ref().unwrap());
        let mask = MissingPolicy::Any.mask(&data, &season, &Frequency::day()).unwrap();
        // Dec 2041 is absent, Dec 2042 has no January 2043
        assert_eq!(mask.values.as_slice().unwrap(), &[1.0, 1.0]);
    }
}
