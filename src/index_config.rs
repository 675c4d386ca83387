//! Index configuration
//!
//! [`IndexParameters`] is the serializable surface callers fill in (from JSON
//! or by hand). [`IndexConfig`] is its resolved, immutable form: frequency
//! looked up, logical link and missing policy parsed, climate variables
//! built. One `IndexConfig` drives exactly one index computation.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::climate_variable::{ClimateVariable, ClimateVariableBuilder};
use crate::errors::{ClimIndError, Result};
use crate::frequency::{Frequency, FrequencySpec};
use crate::generic::missing::MissingPolicy;
use crate::parallel::ParallelConfig;
use crate::threshold::LogicalLink;

pub const DEFAULT_ROLLING_WINDOW_WIDTH: usize = 5;
pub const DEFAULT_MIN_SPELL_LENGTH: usize = 6;

/// How studied and reference data are sampled before being compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    /// Both are resampled to the output frequency
    #[default]
    Resample,
    /// Both are grouped by the frequency's group key (climatologies)
    #[serde(alias = "groupby")]
    GroupBy,
    /// The reference is grouped, the study is resampled
    #[serde(alias = "groupby_ref_and_resample_study")]
    GroupByRefAndResampleStudy,
}

impl SamplingMethod {
    pub const ALL: [Self; 3] = [Self::Resample, Self::GroupBy, Self::GroupByRefAndResampleStudy];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resample => "resample",
            Self::GroupBy => "groupby",
            Self::GroupByRefAndResampleStudy => "groupby_ref_and_resample_study",
        }
    }

    /// Parse a sampling method, underscores optional
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] for unknown methods.
    pub fn parse(name: &str) -> Result<Self> {
        let squashed: String = name.trim().to_ascii_lowercase().chars().filter(|c| *c != '_').collect();
        match squashed.as_str() {
            "resample" => Ok(Self::Resample),
            "groupby" => Ok(Self::GroupBy),
            "groupbyrefandresamplestudy" => Ok(Self::GroupByRefAndResampleStudy),
            _ => Err(ClimIndError::invalid(format!(
                "Unknown sampling method '{name}', use one of {}",
                Self::ALL.map(Self::as_str).join(", ")
            ))),
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn default_rolling_window_width() -> usize {
    DEFAULT_ROLLING_WINDOW_WIDTH
}

const fn default_min_spell_length() -> usize {
    DEFAULT_MIN_SPELL_LENGTH
}

fn default_logical_link() -> String {
    LogicalLink::And.name().to_string()
}

fn default_missing() -> String {
    MissingPolicy::Any.name().to_string()
}

/// Parameters of one index computation, as read from a configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexParameters {
    #[serde(default, alias = "slice_mode")]
    pub frequency: FrequencySpec,
    #[serde(default = "default_rolling_window_width")]
    pub rolling_window_width: usize,
    #[serde(default = "default_min_spell_length")]
    pub min_spell_length: usize,
    #[serde(default)]
    pub out_unit: Option<String>,
    #[serde(default = "default_logical_link")]
    pub logical_link: String,
    #[serde(default = "default_missing")]
    pub missing: String,
    #[serde(default)]
    pub missing_options: Option<Value>,
    #[serde(default)]
    pub coef: Option<f64>,
    #[serde(default)]
    pub date_event: bool,
    #[serde(default)]
    pub sampling_method: SamplingMethod,
    /// Base period used to build the reference variable
    #[serde(default, alias = "base_period_time_range")]
    pub reference_period: Option<(NaiveDate, NaiveDate)>,
    #[serde(default)]
    pub is_compared_to_reference: bool,
    /// Threads used to materialize the index, the global pool when absent
    #[serde(default)]
    pub threads: Option<usize>,
}

impl Default for IndexParameters {
    fn default() -> Self {
        Self {
            frequency: FrequencySpec::default(),
            rolling_window_width: DEFAULT_ROLLING_WINDOW_WIDTH,
            min_spell_length: DEFAULT_MIN_SPELL_LENGTH,
            out_unit: None,
            logical_link: default_logical_link(),
            missing: default_missing(),
            missing_options: None,
            coef: None,
            date_event: false,
            sampling_method: SamplingMethod::Resample,
            reference_period: None,
            is_compared_to_reference: false,
            threads: None,
        }
    }
}

impl IndexParameters {
    /// Parse parameters from JSON
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] on malformed JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ClimIndError::invalid(format!("invalid index parameters: {e}")))
    }
}

/// Resolved configuration of one index computation
#[derive(Debug, Clone, PartialEq)]
pub struct IndexConfig {
    pub frequency: Frequency,
    pub climate_variables: Vec<ClimateVariable>,
    pub rolling_window_width: usize,
    pub min_spell_length: usize,
    pub out_unit: Option<String>,
    pub logical_link: LogicalLink,
    pub missing: MissingPolicy,
    pub coef: Option<f64>,
    pub date_event: bool,
    pub sampling_method: SamplingMethod,
    pub reference_period: Option<(NaiveDate, NaiveDate)>,
    pub is_compared_to_reference: bool,
    pub parallel: ParallelConfig,
}

impl IndexConfig {
    /// Configuration with default parameters
    #[must_use]
    pub fn new(frequency: Frequency, climate_variables: Vec<ClimateVariable>) -> Self {
        Self {
            frequency,
            climate_variables,
            rolling_window_width: DEFAULT_ROLLING_WINDOW_WIDTH,
            min_spell_length: DEFAULT_MIN_SPELL_LENGTH,
            out_unit: None,
            logical_link: LogicalLink::And,
            missing: MissingPolicy::Any,
            coef: None,
            date_event: false,
            sampling_method: SamplingMethod::Resample,
            reference_period: None,
            is_compared_to_reference: false,
            parallel: ParallelConfig::default(),
        }
    }

    /// Resolve `params` around already built variables
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when the frequency, logical
    /// link or missing policy cannot be resolved, or no variable is given.
    pub fn from_parameters(params: &IndexParameters, climate_variables: Vec<ClimateVariable>) -> Result<Self> {
        if climate_variables.is_empty() {
            return Err(ClimIndError::invalid("an index needs at least one climate variable"));
        }
        let missing = MissingPolicy::from_name(&params.missing, params.missing_options.as_ref())?;
        let reference_period = params.reference_period.or_else(|| {
            climate_variables
                .iter()
                .find(|cv| cv.is_reference)
                .and_then(|cv| cv.reference_period)
        });
        Ok(Self {
            frequency: Frequency::from_spec(&params.frequency)?,
            climate_variables,
            rolling_window_width: params.rolling_window_width,
            min_spell_length: params.min_spell_length,
            out_unit: params.out_unit.clone(),
            logical_link: LogicalLink::lookup(&params.logical_link)?,
            missing,
            coef: params.coef,
            date_event: params.date_event,
            sampling_method: params.sampling_method,
            reference_period,
            is_compared_to_reference: params.is_compared_to_reference,
            parallel: ParallelConfig::new(params.threads),
        })
    }

    /// Build the variables and resolve `params`.
    ///
    /// When the index compares a single variable to a reference, the
    /// reference variable is sliced from the same input over
    /// `params.reference_period`.
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when a comparison to a
    /// reference lacks its base period, plus the errors of
    /// [`ClimateVariableBuilder::build`] and [`IndexConfig::from_parameters`].
    pub fn build(params: &IndexParameters, builders: &[ClimateVariableBuilder]) -> Result<Self> {
        let mut climate_variables = builders.iter().map(ClimateVariableBuilder::build).collect::<Result<Vec<_>>>()?;
        if params.is_compared_to_reference && builders.len() == 1 {
            let (start, end) = params.reference_period.ok_or_else(|| {
                ClimIndError::invalid("a comparison to a reference needs a reference_period")
            })?;
            debug!(%start, %end, "building reference variable");
            climate_variables.push(builders[0].build_reference(start, end)?);
        }
        Self::from_parameters(params, climate_variables)
    }

    /// Source frequency of the inputs, the first variable's one
    #[must_use]
    pub fn source_frequency(&self) -> Frequency {
        self.climate_variables
            .first()
            .map_or_else(Frequency::day, |cv| cv.source_frequency.clone())
    }

    #[must_use]
    pub fn with_out_unit(mut self, unit: &str) -> Self {
        self.out_unit = Some(unit.to_string());
        self
    }

    #[must_use]
    pub const fn with_date_event(mut self, date_event: bool) -> Self {
        self.date_event = date_event;
        self
    }

    #[must_use]
    pub const fn with_sampling_method(mut self, method: SamplingMethod) -> Self {
        self.sampling_method = method;
        self
    }

    #[must_use]
    pub const fn with_rolling_window_width(mut self, width: usize) -> Self {
        self.rolling_window_width = width;
        self
    }

    #[must_use]
    pub const fn with_min_spell_length(mut self, length: usize) -> Self {
        self.min_spell_length = length;
        self
    }

    #[must_use]
    pub const fn with_missing(mut self, missing: MissingPolicy) -> Self {
        self.missing = missing;
        self
    }

    #[must_use]
    pub const fn with_logical_link(mut self, link: LogicalLink) -> Self {
        self.logical_link = link;
        self
    }

    #[must_use]
    pub const fn with_coef(mut self, coef: f64) -> Self {
        self.coef = Some(coef);
        self
    }

    #[must_use]
    pub const fn compared_to_reference(mut self, compared: bool) -> Self {
        self.is_compared_to_reference = compared;
        self
    }

    #[must_use]
    pub const fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = parallel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_method_names() {
        assert_eq!(SamplingMethod::parse("group_by").unwrap(), SamplingMethod::GroupBy);
        assert_eq!(
            SamplingMethod::parse("groupby_ref_and_resample_study").unwrap(),
            SamplingMethod::GroupByRefAndResampleStudy
        );
        assert!(SamplingMethod::parse("window").unwrap_err().is_invalid_argument());
    }

    #[test]
    fn parameters_from_json() {
        let params = IndexParameters::from_json(
            r#"{
                "frequency": ["season", [12, 1, 2]],
                "out_unit": "degC",
                "missing": "pct",
                "missing_options": {"tolerance": 0.1},
                "sampling_method": "group_by_ref_and_resample_study",
                "reference_period": ["2042-01-01", "2043-12-31"],
                "is_compared_to_reference": true
            }"#,
        )
        .unwrap();
        assert_eq!(params.min_spell_length, 6);
        assert_eq!(params.rolling_window_width, 5);
        assert_eq!(params.sampling_method, SamplingMethod::GroupByRefAndResampleStudy);
        assert_eq!(
            params.reference_period.map(|(s, _)| s),
            NaiveDate::from_ymd_opt(2042, 1, 1)
        );
        assert_eq!(params.logical_link, "and");
    }

    #[test]
    fn missing_options_with_from_config_are_rejected() {
        let params = IndexParameters {
            missing: "from_config".into(),
            missing_options: Some(serde_json::json!({"n": 3})),
            ..IndexParameters::default()
        };
        assert!(MissingPolicy::from_name(&params.missing, params.missing_options.as_ref()).is_err());
    }
}
