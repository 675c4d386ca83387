//! Generic indicator orchestration
//!
//! A [`GenericIndicator`] is a read-only descriptor binding a reducer to the
//! checks and conversions run around it. Evaluation is split in two:
//! [`GenericIndicator::prepare`] validates the configuration and renders the
//! metadata without touching the data, and [`PendingIndex::compute`]
//! materializes the result. Descriptors are `Copy` and can be shared freely
//! between threads.

use std::fmt;

use ndarray::{ArrayD, Axis, IxDyn};
use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::functions::{Reducer, ReducerContext};
use super::missing::{combined_mask, MissingPolicy};
use super::templates::{template_for, IndicatorMetadata, ScopeContext, TemplateScope};
use crate::climate_variable::ClimateVariable;
use crate::data_array::{DataArray, TimeIndex};
use crate::errors::{ClimIndError, Result};
use crate::index_config::{IndexConfig, SamplingMethod};
use crate::parallel::get_parallel_info;
use crate::units::Unit;

/// Properties an indicator requires from its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// Exactly one studied variable
    SingleVariable,
    /// Exactly two variables sharing a unit
    CoupleOfVariables,
    /// Computes a difference, inputs are converted to the output unit first
    Difference,
}

/// Stateless description of a generic indicator
#[derive(Clone, Copy)]
pub struct GenericIndicator {
    name: &'static str,
    definition: &'static str,
    reducer: Reducer,
    sampling_methods: &'static [SamplingMethod],
    qualifiers: &'static [Qualifier],
    missing: MissingPolicy,
}

impl fmt::Debug for GenericIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericIndicator")
            .field("name", &self.name)
            .field("sampling_methods", &self.sampling_methods)
            .field("qualifiers", &self.qualifiers)
            .field("missing", &self.missing)
            .finish_non_exhaustive()
    }
}

impl PartialEq for GenericIndicator {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.missing == other.missing
    }
}

impl fmt::Display for GenericIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

const RESAMPLE_ONLY: &[SamplingMethod] = &[SamplingMethod::Resample];

impl GenericIndicator {
    pub(crate) const fn new(name: &'static str, definition: &'static str, reducer: Reducer) -> Self {
        Self {
            name,
            definition,
            reducer,
            sampling_methods: RESAMPLE_ONLY,
            qualifiers: &[],
            missing: MissingPolicy::FromConfig,
        }
    }

    pub(crate) const fn with_qualifiers(mut self, qualifiers: &'static [Qualifier]) -> Self {
        self.qualifiers = qualifiers;
        self
    }

    pub(crate) const fn with_sampling_methods(mut self, methods: &'static [SamplingMethod]) -> Self {
        self.sampling_methods = methods;
        self
    }

    /// Look an indicator up by canonical name or alias
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] for unknown names.
    pub fn lookup(name: &str) -> Result<Self> {
        super::registry::lookup(name)
    }

    /// Same indicator with its own missing-value policy
    ///
    /// # Errors
    ///
    /// See [`MissingPolicy::from_name`]; options combined with the
    /// `from_config` policy are rejected here.
    pub fn with_missing(self, method: &str, options: Option<&Value>) -> Result<Self> {
        Ok(Self {
            missing: MissingPolicy::from_name(method, options)?,
            ..self
        })
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn definition(&self) -> &'static str {
        self.definition
    }

    #[must_use]
    pub const fn sampling_methods(&self) -> &'static [SamplingMethod] {
        self.sampling_methods
    }

    #[must_use]
    pub const fn missing(&self) -> MissingPolicy {
        self.missing
    }

    #[must_use]
    pub fn has_qualifier(&self, qualifier: Qualifier) -> bool {
        self.qualifiers.contains(&qualifier)
    }

    /// Validate `config` and render the metadata, without computing
    ///
    /// # Errors
    ///
    /// Returns the first failed precondition: frequency mismatch between the
    /// inputs, wrong number of variables, unsupported sampling method or an
    /// unparseable output unit.
    #[instrument(skip_all, fields(indicator = self.name))]
    pub fn prepare(&self, config: IndexConfig) -> Result<PendingIndex> {
        self.validate(&config)?;
        let metadata = self.render_metadata(&config)?;
        debug!(standard_name = %metadata.standard_name, "index prepared");
        Ok(PendingIndex {
            indicator: *self,
            config,
            metadata,
        })
    }

    /// Prepare and compute in one go
    ///
    /// # Errors
    ///
    /// See [`GenericIndicator::prepare`] and [`PendingIndex::compute`].
    pub fn compute(&self, config: IndexConfig) -> Result<DataArray> {
        self.prepare(config)?.compute()
    }

    fn validate(&self, config: &IndexConfig) -> Result<()> {
        let vars = &config.climate_variables;
        let Some(first) = vars.first() else {
            return Err(ClimIndError::VariableCount {
                indicator: self.name.to_string(),
                expected: "at least one".to_string(),
                actual: 0,
            });
        };
        if let Some(other) = vars.iter().find(|cv| !cv.source_frequency.same_sampling(&first.source_frequency)) {
            return Err(ClimIndError::FrequencyMismatch {
                message: format!(
                    "all variables must share the same time frequency to be compared, '{}' is {} but '{}' is {}",
                    first.name, first.source_frequency.long_name, other.name, other.source_frequency.long_name
                ),
            });
        }
        if self.has_qualifier(Qualifier::SingleVariable) && vars.len() > 1 {
            return Err(ClimIndError::VariableCount {
                indicator: self.name.to_string(),
                expected: "a single".to_string(),
                actual: vars.len(),
            });
        }
        if self.has_qualifier(Qualifier::CoupleOfVariables) && vars.len() != 2 {
            return Err(ClimIndError::VariableCount {
                indicator: self.name.to_string(),
                expected: "two variables sharing the same unit, or one variable and a reference period,".to_string(),
                actual: vars.len(),
            });
        }
        if !self.sampling_methods.contains(&config.sampling_method) {
            let allowed: Vec<&str> = self.sampling_methods.iter().map(|m| m.as_str()).collect();
            return Err(ClimIndError::SamplingMethod {
                indicator: self.name.to_string(),
                method: config.sampling_method.to_string(),
                allowed: allowed.join(", "),
            });
        }
        if let Some(out_unit) = &config.out_unit {
            Unit::parse(out_unit)?;
        }
        Ok(())
    }

    fn render_metadata(&self, config: &IndexConfig) -> Result<IndicatorMetadata> {
        let template = template_for(self.name)
            .ok_or_else(|| ClimIndError::invalid(format!("no metadata template for '{}'", self.name)))?;
        let source = config.source_frequency();
        let variables: Vec<_> = config.climate_variables.iter().map(ClimateVariable::metadata).collect();
        let scope = TemplateScope::new(
            ScopeContext {
                output_freq: &config.frequency,
                source_freq: &source,
                min_spell_length: config.min_spell_length,
                rolling_window_width: config.rolling_window_width,
                is_compared_to_reference: config.is_compared_to_reference,
                reference_period: config.reference_period,
            },
            &variables,
        );
        Ok(scope.render_template(&template))
    }

    /// Unit conversions, coefficient and time-of-year selection
    fn preprocess(&self, config: &IndexConfig) -> Result<Vec<ClimateVariable>> {
        let source = config.source_frequency();
        let mut vars = config.climate_variables.clone();
        if let Some(out_unit) = config.out_unit.as_deref() {
            let target = Unit::parse(out_unit)?;
            if target.is_amount() {
                for cv in &mut vars {
                    cv.studied_data = to_amount(&cv.studied_data, out_unit, source.delta.seconds())?;
                }
            } else if self.has_qualifier(Qualifier::Difference) && out_unit != "%" {
                for cv in &mut vars {
                    cv.studied_data = cv.studied_data.convert_units(out_unit)?;
                }
            }
        }
        if let Some(coef) = config.coef {
            for cv in &mut vars {
                cv.studied_data = cv.studied_data.map(|v| v * coef);
            }
        }
        if let Some(indexer) = &config.frequency.indexer {
            for cv in &mut vars {
                cv.studied_data = cv.studied_data.select_indexer(indexer);
            }
        }
        check_cf(&vars);
        Ok(vars)
    }

    /// Output unit, missing-value mask and metadata
    fn postprocess(&self, mut result: DataArray, vars: &[ClimateVariable], config: &IndexConfig, metadata: &IndicatorMetadata) -> Result<DataArray> {
        if let Some(out_unit) = config.out_unit.as_deref() {
            if out_unit != "%" && result.units() != Some(out_unit) {
                result = result.convert_units(out_unit)?;
            }
        }
        let policy = self.missing.resolve(config.missing);
        if policy != MissingPolicy::Skip && config.frequency.indexer.is_some() && result.dates().is_some() {
            // the reference is a subset of the studied variable
            let inputs: Vec<&DataArray> = vars.iter().filter(|cv| !cv.is_reference).map(|cv| &cv.studied_data).collect();
            match combined_mask(policy, &inputs, &config.frequency, &config.source_frequency())? {
                Some(mask) => result = apply_mask(result, &mask)?,
                None => warn!(indicator = self.name, "no input with a time axis, missing values not masked"),
            }
        }
        result.attrs.insert("standard_name".to_string(), Value::from(metadata.standard_name.as_str()));
        result.attrs.insert("long_name".to_string(), Value::from(metadata.long_name.as_str()));
        result.attrs.insert("cell_methods".to_string(), Value::from(metadata.cell_methods.as_str()));
        result.attrs.insert("history".to_string(), Value::from(""));
        Ok(result)
    }
}

fn to_amount(data: &DataArray, out_unit: &str, step_seconds: Option<f64>) -> Result<DataArray> {
    let Some(units) = data.units() else {
        return Ok(data.clone());
    };
    let unit = Unit::parse(units)?;
    if unit.is_amount() {
        debug!(units, "already an amount, no rate conversion");
        return Ok(data.clone());
    }
    if !unit.is_rate() {
        warn!(units, out_unit, "not a rate, cannot be turned into an amount");
        return Ok(data.clone());
    }
    let seconds = step_seconds.ok_or_else(|| {
        ClimIndError::invalid("rates can only be turned into amounts for hourly or daily inputs")
    })?;
    data.rate_to_amount(seconds)?.convert_units(out_unit)
}

fn check_cf(vars: &[ClimateVariable]) {
    for cv in vars.iter().filter(|cv| cv.studied_data.units().is_none()) {
        warn!(variable = %cv.name, "variable has no units attribute");
    }
}

/// Set result steps to NaN where `mask` is set. Steps missing from the mask
/// count as masked.
fn apply_mask(result: DataArray, mask: &DataArray) -> Result<DataArray> {
    let labels = result.require_dates()?;
    if mask.dates() == Some(labels) {
        return result.masked_where(mask);
    }
    let mut shape = mask.values.shape().to_vec();
    shape[0] = labels.len();
    let mut values = ArrayD::from_elem(IxDyn(&shape), 1.0);
    for (i, label) in labels.iter().enumerate() {
        if let Some(p) = mask.time_position(*label) {
            values.index_axis_mut(Axis(0), i).assign(&mask.values.index_axis(Axis(0), p));
        }
    }
    let reindexed = mask.with_values(values, Some(TimeIndex::Dates(labels.to_vec())));
    result.masked_where(&reindexed)
}

/// A validated index computation, evaluated on [`PendingIndex::compute`]
#[derive(Debug, Clone)]
pub struct PendingIndex {
    indicator: GenericIndicator,
    config: IndexConfig,
    metadata: IndicatorMetadata,
}

impl PendingIndex {
    #[must_use]
    pub const fn indicator(&self) -> &GenericIndicator {
        &self.indicator
    }

    #[must_use]
    pub const fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Metadata the result will carry
    #[must_use]
    pub const fn metadata(&self) -> &IndicatorMetadata {
        &self.metadata
    }

    /// Materialize the index on the configured thread pool
    ///
    /// # Errors
    ///
    /// Returns the reducer's errors, unit conversion errors and
    /// [`ClimIndError::ThreadPoolError`] when the pool cannot be built.
    #[instrument(skip_all, fields(indicator = self.indicator.name))]
    pub fn compute(&self) -> Result<DataArray> {
        self.config.parallel.install(|| self.evaluate())?
    }

    fn evaluate(&self) -> Result<DataArray> {
        let indicator = &self.indicator;
        let vars = indicator.preprocess(&self.config)?;
        let context = ReducerContext::from_config(&self.config);
        let result = (indicator.reducer)(&vars, &context)?;
        let result = indicator.postprocess(result, &vars, &self.config, &self.metadata)?;
        info!(shape = ?result.values.shape(), "index computed");
        Ok(result)
    }
}

/// Compute independent indices in parallel, keeping their order
#[must_use]
pub fn compute_batch(pending: Vec<PendingIndex>) -> Vec<Result<DataArray>> {
    get_parallel_info().log();
    debug!(indices = pending.len(), "computing a batch of indices");
    pending.into_par_iter().map(|p| p.compute()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate_variable::ClimateVariableBuilder;
    use crate::data_array::time_dims;
    use crate::frequency::Frequency;
    use chrono::NaiveDate;
    use ndarray::Array;

    fn tas(values: Vec<f64>) -> ClimateVariable {
        let n = values.len();
        let start = NaiveDate::from_ymd_opt(2042, 1, 1).unwrap();
        let data = DataArray::daily("tas", time_dims(&[]), Array::from_shape_vec(IxDyn(&[n]), values).unwrap(), start, "K")
            .unwrap();
        ClimateVariableBuilder::new("tas", data).build().unwrap()
    }

    #[test]
    fn sampling_method_is_checked_before_computing() {
        let config = IndexConfig::new(Frequency::year(), vec![tas(vec![1.0; 10])])
            .with_sampling_method(SamplingMethod::GroupBy);
        let err = GenericIndicator::lookup("maximum").unwrap().prepare(config).unwrap_err();
        assert!(matches!(err, ClimIndError::SamplingMethod { .. }));
    }

    #[test]
    fn variable_counts() {
        let two = IndexConfig::new(Frequency::year(), vec![tas(vec![1.0; 10]), tas(vec![2.0; 10])]);
        let err = GenericIndicator::lookup("excess").unwrap().prepare(two).unwrap_err();
        assert!(matches!(err, ClimIndError::VariableCount { actual: 2, .. }));
        let one = IndexConfig::new(Frequency::year(), vec![tas(vec![1.0; 10])]);
        let err = GenericIndicator::lookup("mean_of_difference").unwrap().prepare(one).unwrap_err();
        assert!(matches!(err, ClimIndError::VariableCount { actual: 1, .. }));
    }

    #[test]
    fn metadata_is_rendered_at_preparation() {
        let config = IndexConfig::new(Frequency::year(), vec![tas(vec![1.0; 10])]);
        let pending = GenericIndicator::lookup("max").unwrap().prepare(config).unwrap();
        assert!(!pending.metadata().long_name.contains("{{"));
        let out = pending.compute().unwrap();
        assert_eq!(out.attrs["history"], Value::from(""));
        assert_eq!(out.attrs["long_name"], Value::from(pending.metadata().long_name.as_str()));
    }

    #[test]
    fn missing_options_with_inherited_policy_fail() {
        let indicator = GenericIndicator::lookup("sum").unwrap();
        assert!(indicator.with_missing("from_config", Some(&serde_json::json!({"n": 2}))).is_err());
        let strict = indicator.with_missing("at_least_n", Some(&serde_json::json!({"n": 2}))).unwrap();
        assert_eq!(strict.missing(), MissingPolicy::AtLeastN { n: 2 });
    }

    #[test]
    fn batches_keep_their_order() {
        let pending: Vec<PendingIndex> = [1.0, 2.0, 3.0]
            .into_iter()
            .map(|v| {
                let config = IndexConfig::new(Frequency::year(), vec![tas(vec![v; 5])]);
                GenericIndicator::lookup("average").unwrap().prepare(config).unwrap()
            })
            .collect();
        let results = compute_batch(pending);
        let means: Vec<f64> = results.into_iter().map(|r| r.unwrap().values[[0]]).collect();
        assert_eq!(means, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn masked_steps_missing_from_the_mask_become_nan() {
        let result = tas(vec![1.0, 2.0]).studied_data;
        let mask = result.select_time(&[0]).map(|_| 0.0);
        let out = apply_mask(result, &mask).unwrap();
        assert_eq!(out.values[[0]], 1.0);
        assert!(out.values[[1]].is_nan());
    }
}
