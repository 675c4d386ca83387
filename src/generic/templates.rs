//! English metadata templates of the generic indicators
//!
//! Templates hold `{{placeholder}}` markers substituted from a
//! [`TemplateScope`]. Conditional fragments (threshold clauses, reference
//! clauses) are resolved while the scope is built, so rendering is a plain
//! substitution.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::climate_variable::VariableMetadata;
use crate::frequency::Frequency;

/// `standard_name`, `long_name` and `cell_methods` of an indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorTemplate {
    pub standard_name: &'static str,
    pub long_name: &'static str,
    pub cell_methods: &'static str,
}

/// Rendered [`IndicatorTemplate`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct IndicatorMetadata {
    pub standard_name: String,
    pub long_name: String,
    pub cell_methods: String,
}

const TEMPLATES: &[(&str, IndicatorTemplate)] = &[
    (
        "count_occurrences",
        IndicatorTemplate {
            standard_name: "number_of_{{source_freq_units}}_when_{{combined_standard_name}}",
            long_name: "Number of {{source_freq_units}} when {{combined_long_name}}",
            cell_methods: "time: sum over {{source_freq_units}}",
        },
    ),
    (
        "max_consecutive_occurrence",
        IndicatorTemplate {
            standard_name: "spell_length_of_{{source_freq_units}}_with_{{combined_standard_name}}",
            long_name: "Maximum number of consecutive {{source_freq_units}} when {{combined_long_name}}",
            cell_methods: "time: maximum over {{source_freq_units}}",
        },
    ),
    (
        "sum_of_spell_lengths",
        IndicatorTemplate {
            standard_name: "spell_length_of_{{source_freq_units}}_with_{{combined_standard_name}}",
            long_name: "Sum of spell lengths of at least {{min_spell_length}} {{source_freq_units}} when {{combined_long_name}}",
            cell_methods: "time: sum over {{source_freq_units}}",
        },
    ),
    (
        "excess",
        IndicatorTemplate {
            standard_name: "integral_of_{{var0_standard_name}}_excess_wrt_time",
            long_name: "Excess of {{single_var_long_name}}",
            cell_methods: "time: difference over {{source_freq_units}}",
        },
    ),
    (
        "deficit",
        IndicatorTemplate {
            standard_name: "integral_of_{{var0_standard_name}}_deficit_wrt_time",
            long_name: "Deficit of {{single_var_long_name}}",
            cell_methods: "time: difference over {{source_freq_units}}",
        },
    ),
    (
        "fraction_of_total",
        IndicatorTemplate {
            standard_name: "fraction_of_thresholded_{{var0_standard_name}}_on_total",
            long_name: "Fraction of {{single_var_long_name}}",
            cell_methods: "time: fraction over {{source_freq_units}}",
        },
    ),
    (
        "maximum",
        IndicatorTemplate {
            standard_name: "{{var0_standard_name}}",
            long_name: "Maximum of {{exceedance_long_name}}",
            cell_methods: "time: maximum over {{source_freq_units}}",
        },
    ),
    (
        "minimum",
        IndicatorTemplate {
            standard_name: "{{var0_standard_name}}",
            long_name: "Minimum of {{exceedance_long_name}}",
            cell_methods: "time: minimum over {{source_freq_units}}",
        },
    ),
    (
        "average",
        IndicatorTemplate {
            standard_name: "{{var0_standard_name}}",
            long_name: "Average of {{exceedance_long_name}}",
            cell_methods: "time: mean over {{source_freq_units}}",
        },
    ),
    (
        "sum",
        IndicatorTemplate {
            standard_name: "{{var0_standard_name}}",
            long_name: "Sum of {{exceedance_long_name}}",
            cell_methods: "time: sum over {{source_freq_units}}",
        },
    ),
    (
        "standard_deviation",
        IndicatorTemplate {
            standard_name: "{{var0_standard_name}}",
            long_name: "Standard deviation of {{exceedance_long_name}}",
            cell_methods: "time: standard_deviation over {{source_freq_units}}",
        },
    ),
    (
        "max_of_rolling_sum",
        IndicatorTemplate {
            standard_name: "{{var0_standard_name}}",
            long_name: "Maximum {{rolling_window_width}} {{source_freq_units}} rolling sum of {{exceedance_long_name}}",
            cell_methods: "time: sum over {{source_freq_units}}",
        },
    ),
    (
        "min_of_rolling_sum",
        IndicatorTemplate {
            standard_name: "{{var0_standard_name}}",
            long_name: "Minimum {{rolling_window_width}} {{source_freq_units}} rolling sum of {{exceedance_long_name}}",
            cell_methods: "time: sum over {{source_freq_units}}",
        },
    ),
    (
        "max_of_rolling_average",
        IndicatorTemplate {
            standard_name: "{{var0_standard_name}}",
            long_name: "Maximum {{rolling_window_width}} {{source_freq_units}} rolling average of {{exceedance_long_name}}",
            cell_methods: "time: mean over {{source_freq_units}}",
        },
    ),
    (
        "min_of_rolling_average",
        IndicatorTemplate {
            standard_name: "{{var0_standard_name}}",
            long_name: "Minimum {{rolling_window_width}} {{source_freq_units}} rolling average of {{exceedance_long_name}}",
            cell_methods: "time: mean over {{source_freq_units}}",
        },
    ),
    (
        "mean_of_difference",
        IndicatorTemplate {
            standard_name: "range_between_{{var0_standard_name}}_and_{{var1_standard_name}}",
            long_name: "Mean of difference between {{var0_long_name}} and {{var1_long_name}} for each {{output_freq_long_name}}.",
            cell_methods: "time: range within {{source_freq_units}} time: mean over {{source_freq_units}}",
        },
    ),
    (
        "difference_of_extremes",
        IndicatorTemplate {
            standard_name: "range_of_extremes_between_{{var0_standard_name}}_and_{{var1_standard_name}}",
            long_name: "Difference between maximum of {{source_freq_adjective}} {{var0_long_name}} and minimum of {{source_freq_adjective}} {{var1_long_name}} for each {{output_freq_long_name}}.",
            cell_methods: "time: range within {{source_freq_units}} time: maximum over {{source_freq_units}} time: minimum over {{source_freq_units}}",
        },
    ),
    (
        "mean_of_absolute_one_time_step_difference",
        IndicatorTemplate {
            standard_name: "variability_range_between_{{var0_standard_name}}_and_{{var1_standard_name}}",
            long_name: "Average of the absolute {{source_freq_long_name}} to {{source_freq_long_name}} difference of the {{source_freq_adjective}} variation between {{var0_long_name}} and {{var1_long_name}} for each {{output_freq_long_name}}.",
            cell_methods: "time: range within {{source_freq_units}} time: difference over {{source_freq_units}} time: mean over {{source_freq_units}}",
        },
    ),
    (
        "difference_of_means",
        IndicatorTemplate {
            standard_name: "{{var0_standard_name}}{{anomaly_target_standard_name}}_anomaly",
            long_name: "{{output_freq_adjective}} difference between the averaged {{source_freq_adjective}} {{var0_long_name}} and {{anomaly_target_long_name}}",
            cell_methods: "time: mean over {{source_freq_units}} time: difference over {{source_freq_units}}",
        },
    ),
    (
        "percentile",
        IndicatorTemplate {
            standard_name: "percentile_of_{{var0_standard_name}}",
            long_name: "Percentiles of {{source_freq_adjective}} {{var0_long_name}} for each {{output_freq_long_name}}.",
            cell_methods: "time: percentile over {{source_freq_units}}",
        },
    ),
];

/// Template of a canonical indicator name
#[must_use]
pub fn template_for(name: &str) -> Option<IndicatorTemplate> {
    TEMPLATES.iter().find(|(n, _)| *n == name).map(|(_, t)| *t)
}

/// Values substituted into templates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateScope {
    values: BTreeMap<String, String>,
}

/// What an index compares, as needed by the templates
#[derive(Debug, Clone, Copy)]
pub struct ScopeContext<'a> {
    pub output_freq: &'a Frequency,
    pub source_freq: &'a Frequency,
    pub min_spell_length: usize,
    pub rolling_window_width: usize,
    pub is_compared_to_reference: bool,
    pub reference_period: Option<(chrono::NaiveDate, chrono::NaiveDate)>,
}

impl TemplateScope {
    #[must_use]
    pub fn new(context: ScopeContext<'_>, variables: &[VariableMetadata]) -> Self {
        let mut scope = Self::default();
        let out = context.output_freq;
        let src = context.source_freq;
        scope.set("output_freq_long_name", &out.long_name);
        scope.set("output_freq_adjective", &out.adjective);
        scope.set("source_freq_units", &src.units);
        scope.set("source_freq_adjective", &src.adjective);
        scope.set("source_freq_long_name", &src.long_name);
        scope.set("min_spell_length", &context.min_spell_length.to_string());
        scope.set("rolling_window_width", &context.rolling_window_width.to_string());
        let reference_period = context
            .reference_period
            .map_or_else(|| "reference".to_string(), |(s, e)| format!("{s}_{e}"));
        scope.set("reference_period", &reference_period);

        for (i, var) in variables.iter().enumerate().take(2) {
            scope.set(&format!("var{i}_standard_name"), &var.standard_name);
            scope.set(&format!("var{i}_long_name"), &var.long_name);
        }

        let combined_long: Vec<String> = variables
            .iter()
            .map(|v| match &v.threshold {
                Some(t) => format!("{} is {}", v.long_name, t.long_name),
                None => v.long_name.clone(),
            })
            .collect();
        scope.set(
            "combined_long_name",
            &format!("{} for each {}.", combined_long.join(" And "), out.long_name),
        );
        let combined_standard: Vec<String> = variables
            .iter()
            .map(|v| match &v.threshold {
                Some(t) => format!("{}_is_{}", v.standard_name, t.standard_name),
                None => v.standard_name.clone(),
            })
            .collect();
        scope.set("combined_standard_name", &combined_standard.join("_and_"));

        if let Some(first) = variables.first() {
            let related = first
                .threshold
                .as_ref()
                .map(|t| format!(" related to {}", t.long_name))
                .unwrap_or_default();
            scope.set(
                "single_var_long_name",
                &format!("{} {}{related} for each {}.", src.adjective, first.long_name, out.long_name),
            );
            let when = first
                .threshold
                .as_ref()
                .map(|t| format!(" when {} is {}", first.long_name, t.long_name))
                .unwrap_or_default();
            scope.set(
                "exceedance_long_name",
                &format!("{} {}{when} for each {}.", src.adjective, first.long_name, out.long_name),
            );
        }

        if context.is_compared_to_reference || variables.len() < 2 {
            scope.set("anomaly_target_standard_name", "");
            scope.set(
                "anomaly_target_long_name",
                &format!("its averaged {} values for the {reference_period} period.", src.adjective),
            );
        } else {
            scope.set("anomaly_target_standard_name", &format!("_to_{}", variables[1].standard_name));
            scope.set(
                "anomaly_target_long_name",
                &format!(
                    "the {} averaged {} {}",
                    out.adjective, src.adjective, variables[1].long_name
                ),
            );
        }
        scope
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Substitute every `{{key}}` of `template`.
    ///
    /// Unknown keys are left in place.
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                out.push_str(&rest[open..]);
                return out;
            };
            let key = after[..close].trim();
            match self.get(key) {
                Some(value) => out.push_str(value),
                None => {
                    warn!(key, "unknown template placeholder");
                    out.push_str(&rest[open..open + 2 + close + 2]);
                }
            }
            rest = &after[close + 2..];
        }
        out.push_str(rest);
        out
    }

    #[must_use]
    pub fn render_template(&self, template: &IndicatorTemplate) -> IndicatorMetadata {
        IndicatorMetadata {
            standard_name: self.render(template.standard_name),
            long_name: self.render(template.long_name),
            cell_methods: self.render(template.cell_methods),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::ThresholdMetadata;

    fn tas(threshold: bool) -> VariableMetadata {
        VariableMetadata {
            standard_name: "air_temperature".into(),
            long_name: "near-surface air temperature".into(),
            short_name: "tas".into(),
            threshold: threshold.then(|| ThresholdMetadata {
                standard_name: "greater_than_25_degree_Celsius".into(),
                long_name: "greater than 25 degree_Celsius".into(),
                short_name: "gt_25_degC".into(),
            }),
        }
    }

    fn context<'a>(out: &'a Frequency, src: &'a Frequency) -> ScopeContext<'a> {
        ScopeContext {
            output_freq: out,
            source_freq: src,
            min_spell_length: 6,
            rolling_window_width: 5,
            is_compared_to_reference: false,
            reference_period: None,
        }
    }

    #[test]
    fn count_occurrences_metadata() {
        let (out, src) = (Frequency::year(), Frequency::day());
        let scope = TemplateScope::new(context(&out, &src), &[tas(true)]);
        let meta = scope.render_template(&template_for("count_occurrences").unwrap());
        assert_eq!(
            meta.standard_name,
            "number_of_days_when_air_temperature_is_greater_than_25_degree_Celsius"
        );
        assert_eq!(
            meta.long_name,
            "Number of days when near-surface air temperature is greater than 25 degree_Celsius for each annual time series."
        );
        assert_eq!(meta.cell_methods, "time: sum over days");
    }

    #[test]
    fn exceedance_clause_is_optional() {
        let (out, src) = (Frequency::month(), Frequency::day());
        let scope = TemplateScope::new(context(&out, &src), &[tas(false)]);
        let meta = scope.render_template(&template_for("maximum").unwrap());
        assert_eq!(meta.long_name, "Maximum of daily near-surface air temperature for each monthly time series.");
    }

    #[test]
    fn unknown_placeholders_survive() {
        let scope = TemplateScope::default();
        assert_eq!(scope.render("a {{missing}} b"), "a {{missing}} b");
        assert_eq!(scope.render("open {{ only"), "open {{ only");
    }

    #[test]
    fn every_indicator_has_a_template() {
        for name in crate::generic::registry::CANONICAL_NAMES {
            assert!(template_for(name).is_some(), "{name}");
        }
    }
}
