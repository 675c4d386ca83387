//! Resampling frequencies
//!
//! A [`Frequency`] tells the engine how to slice a daily (or hourly) time
//! series into buckets: calendar months, years starting at a given month, or
//! seasons restricted by an [`Indexer`]. Named frequencies live in a static
//! registry with an alias index; custom seasons and month filters are built
//! from a [`FrequencySpec`].

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::calendar::{self, add_months, last_day_of_month, month_abbreviation};
use crate::errors::{ClimIndError, Result};

/// Time-of-year selection applied before resampling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indexer {
    /// Keep only the listed months
    Months(Vec<u32>),
    /// Keep dates between two `(month, day)` pairs, both inclusive.
    /// The range may wrap around the new year.
    DateBounds { start: (u32, u32), end: (u32, u32) },
}

impl Indexer {
    #[must_use]
    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            Self::Months(months) => months.contains(&date.month()),
            Self::DateBounds { start, end } => {
                let md = (date.month(), date.day());
                if start <= end {
                    *start <= md && md <= *end
                } else {
                    md >= *start || md <= *end
                }
            }
        }
    }
}

/// How values are grouped when a reference climatology is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupByKey {
    Hour,
    DayOfYear,
    Month,
    Year,
    /// The whole (already indexed) series is a single group
    RunIndexer,
}

/// Nominal length of one time step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Hours(u32),
    Days(u32),
    Months(u32),
    Years(u32),
}

impl Delta {
    /// Length in seconds, when fixed
    #[must_use]
    pub fn seconds(self) -> Option<f64> {
        match self {
            Self::Hours(n) => Some(f64::from(n) * 3600.0),
            Self::Days(n) => Some(f64::from(n) * 86_400.0),
            Self::Months(_) | Self::Years(_) => None,
        }
    }

    /// Unit used when counting time steps of this length
    #[must_use]
    pub const fn count_unit(self) -> &'static str {
        match self {
            Self::Hours(_) => "h",
            Self::Days(_) => "d",
            Self::Months(_) | Self::Years(_) => "1",
        }
    }
}

/// Bucketing rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resample {
    Hourly,
    Daily,
    Monthly,
    /// Years starting on the first day of `start_month`
    Yearly { start_month: u32 },
}

/// A resampling frequency with the metadata used in output attributes
#[derive(Debug, Clone, PartialEq)]
pub struct Frequency {
    pub name: String,
    pub offset_alias: String,
    pub accepted_values: Vec<String>,
    pub adjective: String,
    pub units: String,
    pub long_name: String,
    pub indexer: Option<Indexer>,
    pub group_by_key: GroupByKey,
    pub delta: Delta,
    pub resample: Resample,
}

/// One resampling bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Label of the bucket, its first calendar day
    pub label: NaiveDate,
    /// First day covered by the bucket
    pub start: NaiveDate,
    /// Last day covered by the bucket, inclusive
    pub end: NaiveDate,
    /// Positions of the time steps falling in the bucket
    pub indices: Vec<usize>,
}

/// Frequency as written in a configuration
///
/// Either a name (`"YS"`, `"month"`, `"DJF"`) or a custom list such as
/// `["season", [12, 1, 2]]`, `["season", ["12-01", "02-28"]]` or
/// `["months", [1, 11]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrequencySpec {
    Name(String),
    Custom(String, Vec<serde_json::Value>),
}

impl From<&str> for FrequencySpec {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl Default for FrequencySpec {
    fn default() -> Self {
        Self::Name("YEAR".to_string())
    }
}

struct Entry {
    name: &'static str,
    offset_alias: &'static str,
    aliases: &'static [&'static str],
    adjective: &'static str,
    units: &'static str,
    long_name: &'static str,
    months: Option<&'static [u32]>,
    group_by_key: GroupByKey,
    delta: Delta,
    resample: Resample,
}

const REGISTRY: &[Entry] = &[
    Entry {
        name: "HOUR",
        offset_alias: "h",
        aliases: &["h", "hour", "hourly", "1h"],
        adjective: "hourly",
        units: "hours",
        long_name: "hourly time series",
        months: None,
        group_by_key: GroupByKey::Hour,
        delta: Delta::Hours(1),
        resample: Resample::Hourly,
    },
    Entry {
        name: "DAY",
        offset_alias: "D",
        aliases: &["d", "day", "days", "daily", "1d"],
        adjective: "daily",
        units: "days",
        long_name: "daily time series",
        months: None,
        group_by_key: GroupByKey::DayOfYear,
        delta: Delta::Days(1),
        resample: Resample::Daily,
    },
    Entry {
        name: "MONTH",
        offset_alias: "MS",
        aliases: &["month", "monthly", "ms", "m", "mon"],
        adjective: "monthly",
        units: "months",
        long_name: "monthly time series",
        months: None,
        group_by_key: GroupByKey::Month,
        delta: Delta::Months(1),
        resample: Resample::Monthly,
    },
    Entry {
        name: "YEAR",
        offset_alias: "YS",
        aliases: &["year", "yearly", "annual", "ys", "y", "as", "ys-jan", "as-jan"],
        adjective: "annual",
        units: "years",
        long_name: "annual time series",
        months: None,
        group_by_key: GroupByKey::Year,
        delta: Delta::Years(1),
        resample: Resample::Yearly { start_month: 1 },
    },
    Entry {
        name: "AMJJAS",
        offset_alias: "YS-APR",
        aliases: &["amjjas"],
        adjective: "summer half-year",
        units: "half_year_summers",
        long_name: "summer half-year time series",
        months: Some(&[4, 5, 6, 7, 8, 9]),
        group_by_key: GroupByKey::RunIndexer,
        delta: Delta::Years(1),
        resample: Resample::Yearly { start_month: 4 },
    },
    Entry {
        name: "ONDJFM",
        offset_alias: "YS-OCT",
        aliases: &["ondjfm"],
        adjective: "winter half-year",
        units: "half_year_winters",
        long_name: "winter half-year time series",
        months: Some(&[10, 11, 12, 1, 2, 3]),
        group_by_key: GroupByKey::RunIndexer,
        delta: Delta::Years(1),
        resample: Resample::Yearly { start_month: 10 },
    },
    Entry {
        name: "DJF",
        offset_alias: "YS-DEC",
        aliases: &["djf", "winter"],
        adjective: "winter",
        units: "winters",
        long_name: "winter time series",
        months: Some(&[12, 1, 2]),
        group_by_key: GroupByKey::RunIndexer,
        delta: Delta::Years(1),
        resample: Resample::Yearly { start_month: 12 },
    },
    Entry {
        name: "MAM",
        offset_alias: "YS-MAR",
        aliases: &["mam", "spring"],
        adjective: "spring",
        units: "springs",
        long_name: "spring time series",
        months: Some(&[3, 4, 5]),
        group_by_key: GroupByKey::RunIndexer,
        delta: Delta::Years(1),
        resample: Resample::Yearly { start_month: 3 },
    },
    Entry {
        name: "JJA",
        offset_alias: "YS-JUN",
        aliases: &["jja", "summer"],
        adjective: "summer",
        units: "summers",
        long_name: "summer time series",
        months: Some(&[6, 7, 8]),
        group_by_key: GroupByKey::RunIndexer,
        delta: Delta::Years(1),
        resample: Resample::Yearly { start_month: 6 },
    },
    Entry {
        name: "SON",
        offset_alias: "YS-SEP",
        aliases: &["son", "autumn", "fall"],
        adjective: "autumn",
        units: "autumns",
        long_name: "autumn time series",
        months: Some(&[9, 10, 11]),
        group_by_key: GroupByKey::RunIndexer,
        delta: Delta::Years(1),
        resample: Resample::Yearly { start_month: 9 },
    },
];

impl Entry {
    fn to_frequency(&self) -> Frequency {
        Frequency {
            name: self.name.to_string(),
            offset_alias: self.offset_alias.to_string(),
            accepted_values: self.aliases.iter().map(|a| (*a).to_string()).collect(),
            adjective: self.adjective.to_string(),
            units: self.units.to_string(),
            long_name: self.long_name.to_string(),
            indexer: self.months.map(|m| Indexer::Months(m.to_vec())),
            group_by_key: self.group_by_key,
            delta: self.delta,
            resample: self.resample,
        }
    }
}

fn registry_entry(name: &str) -> Option<&'static Entry> {
    let lower = name.trim().to_ascii_lowercase();
    REGISTRY
        .iter()
        .find(|e| e.name.eq_ignore_ascii_case(&lower) || e.aliases.contains(&lower.as_str()))
}

impl Frequency {
    /// Look up a frequency by canonical name, alias or offset string such as `YS-OCT`
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] for unknown names.
    pub fn lookup(name: &str) -> Result<Self> {
        if let Some(entry) = registry_entry(name) {
            return Ok(entry.to_frequency());
        }
        let upper = name.trim().to_ascii_uppercase();
        if let Some(month) = upper
            .strip_prefix("YS-")
            .or_else(|| upper.strip_prefix("AS-"))
            .and_then(calendar::month_from_abbreviation)
        {
            return Ok(Self::yearly_from(month));
        }
        Err(ClimIndError::invalid(format!(
            "Unknown frequency '{name}'. Use one of {} or a custom ['season', [...]] / ['months', [...]]",
            REGISTRY.iter().map(|e| e.name).collect::<Vec<_>>().join(", ")
        )))
    }

    /// Convenience accessors for the most used registry entries
    #[must_use]
    pub fn year() -> Self {
        REGISTRY[3].to_frequency()
    }

    #[must_use]
    pub fn month() -> Self {
        REGISTRY[2].to_frequency()
    }

    #[must_use]
    pub fn day() -> Self {
        REGISTRY[1].to_frequency()
    }

    #[must_use]
    pub fn hour() -> Self {
        REGISTRY[0].to_frequency()
    }

    fn yearly_from(month: u32) -> Self {
        let abbreviation = month_abbreviation(month).unwrap_or("JAN");
        Self {
            name: format!("YS-{abbreviation}"),
            offset_alias: format!("YS-{abbreviation}"),
            accepted_values: Vec::new(),
            adjective: "annual".to_string(),
            units: "years".to_string(),
            long_name: format!("annual time series starting in {abbreviation}"),
            indexer: None,
            group_by_key: GroupByKey::Year,
            delta: Delta::Years(1),
            resample: Resample::Yearly { start_month: month },
        }
    }

    /// Build a frequency from its configuration form
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] for unknown names, non
    /// consecutive season months or malformed month-day bounds.
    pub fn from_spec(spec: &FrequencySpec) -> Result<Self> {
        match spec {
            FrequencySpec::Name(name) => Self::lookup(name),
            FrequencySpec::Custom(kind, values) => match kind.to_ascii_lowercase().as_str() {
                "season" | "seasons" => {
                    if values.iter().all(serde_json::Value::is_string) {
                        let bounds = values
                            .iter()
                            .filter_map(serde_json::Value::as_str)
                            .collect::<Vec<_>>();
                        Self::season_between(&bounds)
                    } else {
                        Self::season(&json_months(values)?)
                    }
                }
                "month" | "months" => Self::months(&json_months(values)?),
                other => Err(ClimIndError::invalid(format!(
                    "Unknown custom frequency '{other}', expected 'season' or 'months'"
                ))),
            },
        }
    }

    /// A season made of consecutive months, wrapping from December to January
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when the months are empty,
    /// out of range or not consecutive.
    pub fn season(months: &[u32]) -> Result<Self> {
        validate_months(months)?;
        let consecutive = months.windows(2).all(|w| w[1] == w[0] % 12 + 1);
        if !consecutive || months.len() > 12 {
            return Err(ClimIndError::invalid(format!(
                "The months of a season must be consecutive, got {months:?}"
            )));
        }
        let first = month_abbreviation(months[0]).unwrap_or("JAN");
        let last = month_abbreviation(months[months.len() - 1]).unwrap_or("DEC");
        Ok(Self {
            name: "season".to_string(),
            offset_alias: format!("YS-{first}"),
            accepted_values: Vec::new(),
            adjective: "seasonal".to_string(),
            units: format!("{first}_{last}_seasons"),
            long_name: format!("seasonal time series (season: {months:?})"),
            indexer: Some(Indexer::Months(months.to_vec())),
            group_by_key: GroupByKey::RunIndexer,
            delta: Delta::Years(1),
            resample: Resample::Yearly {
                start_month: months[0],
            },
        })
    }

    /// A season bounded by two `"MM-DD"` dates
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when there are not exactly two
    /// well formed bounds.
    pub fn season_between(bounds: &[&str]) -> Result<Self> {
        let [start, end] = bounds else {
            return Err(ClimIndError::invalid(format!(
                "A season bounded by dates needs exactly two 'MM-DD' values, got {bounds:?}"
            )));
        };
        let start_md = parse_month_day(start)?;
        let end_md = parse_month_day(end)?;
        let first = month_abbreviation(start_md.0).unwrap_or("JAN");
        Ok(Self {
            name: "season".to_string(),
            offset_alias: format!("YS-{first}"),
            accepted_values: Vec::new(),
            adjective: "seasonal".to_string(),
            units: format!("{start}_{end}_seasons"),
            long_name: format!("seasonal time series (season: from {start} to {end})"),
            indexer: Some(Indexer::DateBounds {
                start: start_md,
                end: end_md,
            }),
            group_by_key: GroupByKey::RunIndexer,
            delta: Delta::Years(1),
            resample: Resample::Yearly {
                start_month: start_md.0,
            },
        })
    }

    /// Monthly resampling restricted to a subset of months
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] for empty or out of range months.
    pub fn months(months: &[u32]) -> Result<Self> {
        validate_months(months)?;
        Ok(Self {
            name: "months".to_string(),
            offset_alias: "MS".to_string(),
            accepted_values: Vec::new(),
            adjective: "monthly".to_string(),
            units: "months".to_string(),
            long_name: format!("monthly time series (months: {months:?})"),
            indexer: Some(Indexer::Months(months.to_vec())),
            group_by_key: GroupByKey::Month,
            delta: Delta::Months(1),
            resample: Resample::Monthly,
        })
    }

    /// Guess the sampling frequency of a series from the median spacing of its dates
    #[must_use]
    pub fn infer(dates: &[NaiveDate]) -> Option<Self> {
        if dates.len() < 2 {
            return None;
        }
        let mut diffs: Vec<i64> = dates
            .windows(2)
            .map(|w| (w[1] - w[0]).num_days())
            .collect();
        diffs.sort_unstable();
        match diffs[diffs.len() / 2] {
            1 => Some(Self::day()),
            28..=31 => Some(Self::month()),
            365 | 366 => Some(Self::year()),
            _ => None,
        }
    }

    /// First day of the bucket containing `date`
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::NotImplemented`] for hourly buckets, the time
    /// axis only carries dates.
    pub fn bucket_start(&self, date: NaiveDate) -> Result<NaiveDate> {
        let start = match self.resample {
            Resample::Hourly => {
                return Err(ClimIndError::not_implemented(
                    "hourly resampling of a date-based time axis",
                ))
            }
            Resample::Daily => Some(date),
            Resample::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
            Resample::Yearly { start_month } => {
                let year = if date.month() >= start_month {
                    date.year()
                } else {
                    date.year() - 1
                };
                NaiveDate::from_ymd_opt(year, start_month, 1)
            }
        };
        start.ok_or_else(|| ClimIndError::invalid(format!("no bucket for date {date}")))
    }

    fn next_bucket_start(&self, start: NaiveDate) -> Option<NaiveDate> {
        match self.resample {
            Resample::Hourly | Resample::Daily => start.succ_opt(),
            Resample::Monthly => {
                let (y, m) = add_months(start.year(), start.month(), 1);
                NaiveDate::from_ymd_opt(y, m, 1)
            }
            Resample::Yearly { .. } => NaiveDate::from_ymd_opt(start.year() + 1, start.month(), 1),
        }
    }

    /// Inclusive first and last days covered by the bucket starting at `start`.
    ///
    /// Seasons end on the last day of their last month (or on their end
    /// bound), not at the end of the resampling year.
    #[must_use]
    pub fn bucket_bounds(&self, start: NaiveDate) -> (NaiveDate, NaiveDate) {
        let year_end = || {
            self.next_bucket_start(start)
                .and_then(|n| n.pred_opt())
                .unwrap_or(start)
        };
        match (&self.resample, &self.indexer) {
            (Resample::Yearly { .. }, Some(Indexer::Months(months))) => {
                let (y, m) = add_months(start.year(), start.month(), months.len() as i32 - 1);
                (start, last_day_of_month(y, m).unwrap_or(start))
            }
            (Resample::Yearly { .. }, Some(Indexer::DateBounds { start: s, end: e })) => {
                let first = NaiveDate::from_ymd_opt(start.year(), s.0, s.1).unwrap_or(start);
                let end_year = if e < s { start.year() + 1 } else { start.year() };
                let last = NaiveDate::from_ymd_opt(end_year, e.0, e.1)
                    .or_else(|| last_day_of_month(end_year, e.0))
                    .unwrap_or(start);
                (first, last)
            }
            _ => (start, year_end()),
        }
    }

    /// Split sorted dates into consecutive buckets, empty ones included
    ///
    /// # Errors
    ///
    /// Propagates [`Frequency::bucket_start`] errors.
    pub fn buckets(&self, dates: &[NaiveDate]) -> Result<Vec<Bucket>> {
        let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
            return Ok(Vec::new());
        };
        let last_start = self.bucket_start(*last)?;
        let mut starts = Vec::new();
        let mut current = Some(self.bucket_start(*first)?);
        while let Some(start) = current.filter(|s| *s <= last_start) {
            starts.push(start);
            current = self.next_bucket_start(start);
        }
        let mut buckets: Vec<Bucket> = starts
            .iter()
            .map(|&label| {
                let (start, end) = self.bucket_bounds(label);
                Bucket {
                    label,
                    start,
                    end,
                    indices: Vec::new(),
                }
            })
            .collect();
        for (i, date) in dates.iter().enumerate() {
            let start = self.bucket_start(*date)?;
            let position = starts.partition_point(|s| *s < start);
            if let Some(bucket) = buckets.get_mut(position) {
                bucket.indices.push(i);
            }
        }
        Ok(buckets)
    }

    /// True when both frequencies bucket data the same way
    #[must_use]
    pub fn same_sampling(&self, other: &Self) -> bool {
        self.resample == other.resample && self.delta == other.delta
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn validate_months(months: &[u32]) -> Result<()> {
    if months.is_empty() {
        return Err(ClimIndError::invalid("A month selection cannot be empty"));
    }
    if let Some(bad) = months.iter().find(|m| !(1..=12).contains(*m)) {
        return Err(ClimIndError::invalid(format!("{bad} is not a valid month")));
    }
    Ok(())
}

fn json_months(values: &[serde_json::Value]) -> Result<Vec<u32>> {
    values
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|m| u32::try_from(m).ok())
                .ok_or_else(|| ClimIndError::invalid(format!("{v} is not a month number")))
        })
        .collect()
}

fn parse_month_day(text: &str) -> Result<(u32, u32)> {
    let invalid = || ClimIndError::invalid(format!("'{text}' is not a valid 'MM-DD' date"));
    let (month, day) = text.split_once('-').ok_or_else(invalid)?;
    let month: u32 = month.trim().parse().map_err(|_| invalid())?;
    let day: u32 = day.trim().parse().map_err(|_| invalid())?;
    // 2000 is a leap year so Feb 29 is accepted
    NaiveDate::from_ymd_opt(2000, month, day).ok_or_else(invalid)?;
    Ok((month, day))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn lookup_by_alias() {
        assert_eq!(Frequency::lookup("YS").unwrap().name, "YEAR");
        assert_eq!(Frequency::lookup("monthly").unwrap().name, "MONTH");
        assert_eq!(Frequency::lookup("djf").unwrap().offset_alias, "YS-DEC");
        assert_eq!(Frequency::lookup("YS-OCT").unwrap().resample, Resample::Yearly { start_month: 10 });
        assert!(Frequency::lookup("fortnight").is_err());
    }

    #[test]
    fn season_must_be_consecutive() {
        assert!(Frequency::season(&[11, 12, 1, 2]).is_ok());
        let err = Frequency::season(&[1, 3]).unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(Frequency::season(&[13]).is_err());
    }

    #[test]
    fn custom_spec_from_json() {
        let spec: FrequencySpec = serde_json::from_str(r#"["season", [12, 1]]"#).unwrap();
        let freq = Frequency::from_spec(&spec).unwrap();
        assert_eq!(freq.offset_alias, "YS-DEC");
        assert_eq!(freq.indexer, Some(Indexer::Months(vec![12, 1])));

        let spec: FrequencySpec = serde_json::from_str(r#"["season", ["07-19", "08-14"]]"#).unwrap();
        let freq = Frequency::from_spec(&spec).unwrap();
        assert!(freq.indexer.as_ref().unwrap().matches(ymd(2042, 8, 1)));
        assert!(!freq.indexer.as_ref().unwrap().matches(ymd(2042, 8, 15)));

        let spec: FrequencySpec = serde_json::from_str(r#""MS""#).unwrap();
        assert_eq!(Frequency::from_spec(&spec).unwrap().name, "MONTH");
    }

    #[test]
    fn season_buckets_cover_partial_years() {
        let freq = Frequency::season(&[11, 12, 1, 2]).unwrap();
        let dates: Vec<NaiveDate> = ymd(2042, 1, 1).iter_days().take(730).collect();
        let buckets = freq.buckets(&dates).unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].label, ymd(2041, 11, 1));
        assert_eq!(buckets[0].end, ymd(2042, 2, 28));
        assert_eq!(buckets[0].indices.len(), 304);
    }

    #[test]
    fn monthly_buckets_keep_empty_months() {
        let freq = Frequency::months(&[1, 11]).unwrap();
        let dates = vec![ymd(2042, 1, 5), ymd(2042, 11, 2)];
        let buckets = freq.buckets(&dates).unwrap();
        assert_eq!(buckets.len(), 11);
        assert!(buckets[1].indices.is_empty());
        assert_eq!(buckets[0].end, ymd(2042, 1, 31));
    }

    #[test]
    fn infer_daily() {
        let dates: Vec<NaiveDate> = ymd(2042, 1, 1).iter_days().take(10).collect();
        assert_eq!(Frequency::infer(&dates).unwrap().name, "DAY");
        assert!(Frequency::hour().bucket_start(dates[0]).is_err());
    }
}
