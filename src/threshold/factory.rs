//! Building thresholds from queries or from their components
//!
//! The query language is `<operator> <value> <unit>`, for instance
//! `"> 25 degC"`, `">= 1 mm/day"`, `"> 90 doy_per"` or
//! `"> [10, 20] degC"`. Two queries joined by `AND` or `OR` make a bounded
//! threshold: `"> -20 degC AND < 0 degC"`.

use chrono::NaiveDate;

use super::basic::{BasicThreshold, ThresholdValue};
use super::bounded::BoundedThreshold;
use super::logical_link::LogicalLink;
use super::operator::Operator;
use super::percentile::{is_percentile_array, validate_unit, Granularity, PercentileThreshold};
use super::{Quantity, Threshold, UnresolvedThreshold};
use crate::data_array::DataArray;
use crate::errors::{ClimIndError, Result};
use crate::statistics::QuantileInterpolation;
use crate::units::Unit;

/// Value given to the factory
#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdInput {
    Scalar(f64),
    Sequence(Vec<f64>),
    /// Per grid cell values or precomputed percentiles
    Array(DataArray),
}

impl From<f64> for ThresholdInput {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<f64>> for ThresholdInput {
    fn from(values: Vec<f64>) -> Self {
        Self::Sequence(values)
    }
}

impl From<DataArray> for ThresholdInput {
    fn from(value: DataArray) -> Self {
        Self::Array(value)
    }
}

/// Everything a threshold can be built from
#[derive(Debug, Clone, Default)]
pub struct ThresholdSpec {
    pub query: Option<String>,
    pub operator: Option<String>,
    pub value: Option<ThresholdInput>,
    pub unit: Option<String>,
    pub threshold_min_value: Option<Quantity>,
    pub offset: Option<Quantity>,
    pub thresholds: Vec<Threshold>,
    pub logical_link: Option<LogicalLink>,
    pub doy_window_width: Option<usize>,
    pub only_leap_years: bool,
    pub interpolation: Option<QuantileInterpolation>,
    pub reference_period: Option<(NaiveDate, NaiveDate)>,
}

impl ThresholdSpec {
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        Self {
            query: Some(query.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_parts(operator: &str, value: impl Into<ThresholdInput>, unit: Option<&str>) -> Self {
        Self {
            operator: Some(operator.to_string()),
            value: Some(value.into()),
            unit: unit.map(str::to_string),
            ..Self::default()
        }
    }

    /// Two existing thresholds joined by `link`
    #[must_use]
    pub fn from_thresholds(thresholds: Vec<Threshold>, link: LogicalLink) -> Self {
        Self {
            thresholds,
            logical_link: Some(link),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_threshold_min_value(mut self, min: Quantity) -> Self {
        self.threshold_min_value = Some(min);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: Quantity) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub const fn with_doy_window_width(mut self, width: usize) -> Self {
        self.doy_window_width = Some(width);
        self
    }

    #[must_use]
    pub const fn with_only_leap_years(mut self, only_leap_years: bool) -> Self {
        self.only_leap_years = only_leap_years;
        self
    }

    #[must_use]
    pub const fn with_interpolation(mut self, interpolation: QuantileInterpolation) -> Self {
        self.interpolation = Some(interpolation);
        self
    }

    #[must_use]
    pub const fn with_reference_period(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.reference_period = Some((start, end));
        self
    }
}

/// Operator text, values and unit read from a single query
#[derive(Debug, Clone, PartialEq)]
struct ParsedQuery {
    operator: Option<String>,
    values: Vec<f64>,
    unit: Option<String>,
}

/// Length of the number starting at `text[0]`, matching `-?\d+\.?\d*`
fn number_len(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = usize::from(bytes.first() == Some(&b'-'));
    let digits_start = i;
    while bytes.get(i).map_or(false, u8::is_ascii_digit) {
        i += 1;
    }
    if i == digits_start {
        return None;
    }
    if bytes.get(i) == Some(&b'.') {
        i += 1;
        while bytes.get(i).map_or(false, u8::is_ascii_digit) {
            i += 1;
        }
    }
    Some(i)
}

fn parse_query(query: &str) -> Result<ParsedQuery> {
    let cannot = || ClimIndError::invalid(format!("Cannot build a threshold from '{query}'"));
    let list_start = query.find('[');
    let number_start = query
        .char_indices()
        .find(|(i, _)| number_len(&query[*i..]).is_some())
        .map(|(i, _)| i);
    let (value_start, value_end, values) = match (list_start, number_start) {
        (Some(open), Some(first)) if open < first => {
            let close = query[open..].find(']').map(|c| open + c).ok_or_else(cannot)?;
            let values = query[open + 1..close]
                .split(',')
                .map(|v| v.trim().parse::<f64>().map_err(|_| cannot()))
                .collect::<Result<Vec<f64>>>()?;
            (open, close + 1, values)
        }
        (_, Some(first)) => {
            let len = number_len(&query[first..]).ok_or_else(cannot)?;
            let value = query[first..first + len].parse::<f64>().map_err(|_| cannot())?;
            (first, first + len, vec![value])
        }
        _ => return Err(cannot()),
    };
    let operator = query[..value_start].trim();
    let unit = query[value_end..].trim();
    Ok(ParsedQuery {
        operator: (!operator.is_empty()).then(|| operator.to_string()),
        values,
        unit: (!unit.is_empty()).then(|| unit.to_string()),
    })
}

/// Split `"a AND b"` into its sides and link
fn split_bounded(query: &str) -> Result<Option<(String, String, LogicalLink)>> {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    let links: Vec<(usize, LogicalLink)> = tokens
        .iter()
        .enumerate()
        .filter_map(|(i, t)| LogicalLink::lookup(t).ok().map(|l| (i, l)))
        .collect();
    match links.as_slice() {
        [] => Ok(None),
        [(at, link)] if *at > 0 && *at + 1 < tokens.len() => Ok(Some((
            tokens[..*at].join(" "),
            tokens[at + 1..].join(" "),
            *link,
        ))),
        _ => Err(ClimIndError::invalid(format!(
            "'{query}' must be made of exactly two thresholds joined by a single AND or OR"
        ))),
    }
}

fn check_unit(unit: Option<&str>) -> Result<()> {
    validate_unit(unit).map_err(|e| match e {
        ClimIndError::UnknownUnit { unit } => ClimIndError::invalid(format!("Unknown threshold unit '{unit}'")),
        other => other,
    })
}

/// Build a [`Threshold`].
///
/// Dispatch order: percentile sentinel unit with scalar values, precomputed
/// percentile array, pair of thresholds (or a query containing `AND`/`OR`),
/// per grid cell array, scalar values.
///
/// # Errors
///
/// Returns [`ClimIndError::InvalidArgument`] when the query cannot be parsed,
/// the unit is unknown, a bounded query does not split into two thresholds,
/// the value is missing, or nothing usable was given.
pub fn build_threshold(spec: &ThresholdSpec) -> Result<Threshold> {
    if let Some(query) = &spec.query {
        if let Some((left, right, link)) = split_bounded(query)? {
            let side = |q: String| {
                build_threshold(&ThresholdSpec {
                    query: Some(q),
                    thresholds: Vec::new(),
                    ..spec.clone()
                })
            };
            return Ok(Threshold::Bounded(BoundedThreshold::new(vec![side(left)?, side(right)?], link)?));
        }
        let parsed = parse_query(query)?;
        let value = match parsed.values.as_slice() {
            [single] => ThresholdInput::Scalar(*single),
            _ => ThresholdInput::Sequence(parsed.values.clone()),
        };
        return build_threshold(&ThresholdSpec {
            query: None,
            operator: parsed.operator.or_else(|| spec.operator.clone()),
            value: Some(value),
            unit: parsed.unit.or_else(|| spec.unit.clone()),
            ..spec.clone()
        });
    }

    let operator = spec
        .operator
        .as_deref()
        .map(Operator::lookup)
        .transpose()?
        .unwrap_or(Operator::Reach);
    check_unit(spec.unit.as_deref())?;
    let granularity = spec.unit.as_deref().and_then(Granularity::from_sentinel);

    match (&spec.value, granularity) {
        (Some(ThresholdInput::Scalar(_) | ThresholdInput::Sequence(_)), Some(granularity)) => {
            let ranks = match &spec.value {
                Some(ThresholdInput::Scalar(v)) => vec![*v],
                Some(ThresholdInput::Sequence(v)) => v.clone(),
                _ => Vec::new(),
            };
            let mut threshold = PercentileThreshold::new(operator, ranks, granularity)?
                .with_only_leap_years(spec.only_leap_years)
                .with_threshold_min_value(spec.threshold_min_value.clone());
            if let Some(width) = spec.doy_window_width {
                threshold = threshold.with_doy_window_width(width);
            }
            if let Some(interpolation) = spec.interpolation {
                threshold = threshold.with_interpolation(interpolation);
            }
            if let Some((start, end)) = spec.reference_period {
                threshold = threshold.with_reference_period(start, end);
            }
            return Ok(Threshold::Percentile(threshold));
        }
        (Some(ThresholdInput::Array(per)), _) if is_percentile_array(per) => {
            let threshold = PercentileThreshold::from_percentiles(operator, per.clone())?
                .with_threshold_min_value(spec.threshold_min_value.clone());
            return Ok(Threshold::Percentile(threshold));
        }
        _ => {}
    }

    if !spec.thresholds.is_empty() {
        let link = spec.logical_link.ok_or_else(|| {
            ClimIndError::invalid("a logical link (AND / OR) is needed to combine thresholds")
        })?;
        return Ok(Threshold::Bounded(BoundedThreshold::new(spec.thresholds.clone(), link)?));
    }

    let value = match &spec.value {
        Some(ThresholdInput::Array(grid)) => ThresholdValue::Grid(grid.clone()),
        Some(ThresholdInput::Scalar(v)) => ThresholdValue::Scalars(vec![*v]),
        Some(ThresholdInput::Sequence(v)) => ThresholdValue::Scalars(v.clone()),
        None if spec.operator.is_some() => {
            return Err(ClimIndError::invalid(
                "the threshold value is missing; build an UnresolvedThreshold to provide it later",
            ))
        }
        None => {
            return Err(ClimIndError::invalid(
                "a threshold needs a query, an operator with a value, or two thresholds with a logical link",
            ))
        }
    };
    Ok(Threshold::Basic(BasicThreshold::new(
        operator,
        value,
        spec.unit.as_deref(),
        spec.threshold_min_value.clone(),
        spec.offset.clone(),
    )?))
}

/// Build a per grid cell threshold whose values will be given later
///
/// # Errors
///
/// Returns [`ClimIndError::InvalidArgument`] when a value is already present
/// or the operator or unit is unknown.
pub fn build_unresolved_threshold(spec: &ThresholdSpec) -> Result<UnresolvedThreshold> {
    if spec.value.is_some() || spec.query.is_some() {
        return Err(ClimIndError::invalid(
            "an unresolved threshold cannot carry a value, use build_threshold instead",
        ));
    }
    if let Some(unit) = spec.unit.as_deref() {
        Unit::parse(unit).map_err(|_| ClimIndError::invalid(format!("Unknown threshold unit '{unit}'")))?;
    }
    Ok(UnresolvedThreshold {
        operator: spec
            .operator
            .as_deref()
            .map(Operator::lookup)
            .transpose()?
            .unwrap_or(Operator::Reach),
        unit: spec.unit.clone(),
        threshold_min_value: spec.threshold_min_value.clone(),
        offset: spec.offset.clone(),
    })
}
