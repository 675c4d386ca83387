//! Registry of the generic indicators
//!
//! Indicators are looked up by canonical name; a separate alias table maps
//! legacy operation names onto canonical ones. Lookups ignore case and
//! surrounding whitespace.

use super::functions as f;
use super::indicator::{GenericIndicator, Qualifier};
use crate::errors::{ClimIndError, Result};
use crate::index_config::SamplingMethod;

const SINGLE: &[Qualifier] = &[Qualifier::SingleVariable];
const COUPLE: &[Qualifier] = &[Qualifier::CoupleOfVariables, Qualifier::Difference];

pub const CANONICAL_NAMES: [&str; 20] = [
    "count_occurrences",
    "max_consecutive_occurrence",
    "sum_of_spell_lengths",
    "excess",
    "deficit",
    "fraction_of_total",
    "maximum",
    "minimum",
    "average",
    "sum",
    "standard_deviation",
    "max_of_rolling_sum",
    "min_of_rolling_sum",
    "max_of_rolling_average",
    "min_of_rolling_average",
    "mean_of_difference",
    "difference_of_extremes",
    "mean_of_absolute_one_time_step_difference",
    "difference_of_means",
    "percentile",
];

/// Legacy operation names
const ALIASES: &[(&str, &str)] = &[
    ("max", "maximum"),
    ("min", "minimum"),
    ("mean", "average"),
    ("nb_events", "count_occurrences"),
    ("max_nb_consecutive_events", "max_consecutive_occurrence"),
    ("run_mean", "max_of_rolling_average"),
    ("run_sum", "max_of_rolling_sum"),
    ("anomaly", "difference_of_means"),
];

static INDICATORS: [GenericIndicator; 20] = [
    GenericIndicator::new(
        "count_occurrences",
        "Count occurrences where threshold(s) are met (e.g. SU, Tx90p, RR1).",
        f::count_occurrences,
    ),
    GenericIndicator::new(
        "max_consecutive_occurrence",
        "Count the maximum number of consecutive occurrences when threshold(s) are met (e.g. CDD, CSU, CWD).",
        f::max_consecutive_occurrence,
    ),
    GenericIndicator::new(
        "sum_of_spell_lengths",
        "Sum the lengths of each consecutive occurrence spell when threshold(s) are met, \
         spells shorter than min_spell_length are ignored (e.g. WSDI, CSDI).",
        f::sum_of_spell_lengths,
    ),
    GenericIndicator::new(
        "excess",
        "Excess over the threshold, sum(x[x > t] - t) (e.g. GD4).",
        f::excess,
    )
    .with_qualifiers(SINGLE),
    GenericIndicator::new(
        "deficit",
        "Deficit below the threshold, sum(t - x[x < t]) (e.g. HD17).",
        f::deficit,
    )
    .with_qualifiers(SINGLE),
    GenericIndicator::new(
        "fraction_of_total",
        "Fraction of the values meeting threshold(s) over the sum of every value (e.g. R75pTOT, R95pTOT).",
        f::fraction_of_total,
    )
    .with_qualifiers(SINGLE),
    GenericIndicator::new(
        "maximum",
        "Maximum of the values meeting threshold(s), if any are given (e.g. TXx, TNx).",
        f::maximum,
    ),
    GenericIndicator::new(
        "minimum",
        "Minimum of the values meeting threshold(s), if any are given (e.g. TXn, TNn).",
        f::minimum,
    ),
    GenericIndicator::new(
        "average",
        "Average of the values meeting threshold(s), if any are given (e.g. TX, TN).",
        f::average,
    ),
    GenericIndicator::new(
        "sum",
        "Sum of the values meeting threshold(s), if any are given (e.g. PRCPTOT, RR).",
        f::sum,
    ),
    GenericIndicator::new(
        "standard_deviation",
        "Standard deviation of the values meeting threshold(s), if any are given.",
        f::standard_deviation,
    ),
    GenericIndicator::new(
        "max_of_rolling_sum",
        "Maximum of the rolling sum over time (e.g. RX5day).",
        f::max_of_rolling_sum,
    )
    .with_qualifiers(SINGLE),
    GenericIndicator::new(
        "min_of_rolling_sum",
        "Minimum of the rolling sum over time.",
        f::min_of_rolling_sum,
    )
    .with_qualifiers(SINGLE),
    GenericIndicator::new(
        "max_of_rolling_average",
        "Maximum of the rolling average over time.",
        f::max_of_rolling_average,
    )
    .with_qualifiers(SINGLE),
    GenericIndicator::new(
        "min_of_rolling_average",
        "Minimum of the rolling average over time.",
        f::min_of_rolling_average,
    )
    .with_qualifiers(SINGLE),
    GenericIndicator::new(
        "mean_of_difference",
        "Average of the difference between two variables, or one variable and its reference period \
         values (e.g. DTR: mean(tasmax - tasmin)).",
        f::mean_of_difference,
    )
    .with_qualifiers(COUPLE),
    GenericIndicator::new(
        "difference_of_extremes",
        "Maximum of the first variable minus minimum of the second (e.g. ETR: max(tasmax) - min(tasmin)).",
        f::difference_of_extremes,
    )
    .with_qualifiers(COUPLE),
    GenericIndicator::new(
        "mean_of_absolute_one_time_step_difference",
        "Average of the absolute step to step change of the difference between two variables \
         (e.g. vDTR).",
        f::mean_of_absolute_one_time_step_difference,
    )
    .with_qualifiers(COUPLE),
    GenericIndicator::new(
        "difference_of_means",
        "Difference of the averages of two variables, or one variable and its reference period values \
         (e.g. anomaly: mean(tasmax) - mean(tasmax_ref)).",
        f::difference_of_means,
    )
    .with_qualifiers(COUPLE)
    .with_sampling_methods(&SamplingMethod::ALL),
    GenericIndicator::new(
        "percentile",
        "Percentiles of the values of each period, the ranks come from a percentile threshold.",
        f::percentile,
    )
    .with_qualifiers(SINGLE),
];

/// Canonical name of `name`, resolving aliases
#[must_use]
pub fn canonical_name(name: &str) -> Option<&'static str> {
    let key = name.trim().to_ascii_lowercase();
    CANONICAL_NAMES
        .iter()
        .copied()
        .find(|n| *n == key)
        .or_else(|| ALIASES.iter().find(|(alias, _)| *alias == key).map(|(_, n)| *n))
}

/// Indicator registered under `name` or one of its aliases
///
/// # Errors
///
/// Returns [`ClimIndError::InvalidArgument`] for unknown names.
pub fn lookup(name: &str) -> Result<GenericIndicator> {
    canonical_name(name)
        .and_then(|canonical| INDICATORS.iter().find(|i| i.name() == canonical))
        .copied()
        .ok_or_else(|| {
            ClimIndError::invalid(format!(
                "Unknown generic indicator '{name}', use one of: {}",
                CANONICAL_NAMES.join(", ")
            ))
        })
}

/// Every registered indicator
pub fn all() -> impl Iterator<Item = &'static GenericIndicator> {
    INDICATORS.iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_matches_canonical_names() {
        let names: Vec<&str> = all().map(GenericIndicator::name).collect();
        assert_eq!(names, CANONICAL_NAMES);
    }

    #[test]
    fn aliases_and_case() {
        assert_eq!(lookup("MAX").unwrap().name(), "maximum");
        assert_eq!(lookup(" anomaly ").unwrap().name(), "difference_of_means");
        assert_eq!(lookup("run_sum").unwrap().name(), "max_of_rolling_sum");
        assert!(lookup("TX90p").unwrap_err().is_invalid_argument());
    }

    #[test]
    fn only_difference_of_means_groups() {
        for indicator in all() {
            let groups = indicator.sampling_methods().contains(&SamplingMethod::GroupBy);
            assert_eq!(groups, indicator.name() == "difference_of_means", "{indicator}");
        }
    }

    #[test]
    fn difference_indicators_are_flagged() {
        assert!(lookup("mean_of_difference").unwrap().has_qualifier(Qualifier::Difference));
        assert!(!lookup("sum").unwrap().has_qualifier(Qualifier::Difference));
    }
}
