//! End-to-end index computations on a five year daily stub

use approx::assert_abs_diff_eq;
use chrono::NaiveDate;
use climind::prelude::*;
use climind::frequency::FrequencySpec;
use climind::threshold::ThresholdSpec;
use ndarray::{Array, IxDyn};
use serde_json::json;

/// Number of days from 2042-01-01 to 2046-12-31
const STUB_DAYS: usize = 1826;

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Constant daily series shaped time x lat x lon (1 x 1 cell), in K
fn stub_tas(value: f64) -> DataArray {
    let values = Array::from_elem(IxDyn(&[STUB_DAYS, 1, 1]), value);
    DataArray::daily("tas", time_dims(&["lat", "lon"]), values, ymd(2042, 1, 1), "K").unwrap()
}

fn set(data: &mut DataArray, date: NaiveDate, value: f64) {
    let i = data.time_position(date).unwrap();
    data.values[[i, 0, 0]] = value;
}

fn at(result: &DataArray, i: usize) -> f64 {
    result.values[[i, 0, 0]]
}

fn season(months: &[u32]) -> FrequencySpec {
    FrequencySpec::Custom("season".to_string(), months.iter().map(|m| json!(m)).collect())
}

fn months(months: &[u32]) -> FrequencySpec {
    FrequencySpec::Custom("months".to_string(), months.iter().map(|m| json!(m)).collect())
}

fn run(indicator: &str, params: &IndexParameters, builders: &[ClimateVariableBuilder]) -> Result<DataArray> {
    let config = IndexConfig::build(params, builders)?;
    GenericIndicator::lookup(indicator)?.prepare(config)?.compute()
}

#[test]
fn txx_on_a_season_across_the_new_year() {
    let mut tas = stub_tas(1.0);
    set(&mut tas, ymd(2043, 2, 2), 295.0);
    set(&mut tas, ymd(2043, 1, 1), 303.15);
    let params = IndexParameters {
        frequency: season(&[11, 12, 1, 2]),
        out_unit: Some("degC".to_string()),
        ..IndexParameters::default()
    };
    let result = run("max", &params, &[ClimateVariableBuilder::new("tas", tas)]).unwrap();

    // the first season starts before the data
    assert!(at(&result, 0).is_nan());
    assert_abs_diff_eq!(at(&result, 1), 30.0, epsilon = 1e-6);
    assert_eq!(result.units(), Some("degC"));
    let bounds = result.time_bounds.as_ref().unwrap();
    assert_eq!(bounds[0], (ymd(2041, 11, 1), ymd(2042, 2, 28)));
}

#[test]
fn txx_on_selected_months() {
    let mut tas = stub_tas(1.0);
    set(&mut tas, ymd(2042, 11, 2), 295.0);
    set(&mut tas, ymd(2042, 1, 1), 303.15);
    let params = IndexParameters {
        frequency: months(&[11, 1]),
        out_unit: Some("degC".to_string()),
        ..IndexParameters::default()
    };
    let result = run("maximum", &params, &[ClimateVariableBuilder::new("tas", tas)]).unwrap();

    assert_abs_diff_eq!(at(&result, 0), 30.0, epsilon = 1e-6);
    // February is not selected
    assert!(at(&result, 1).is_nan());
    let november = result.time_position(ymd(2042, 11, 1)).unwrap();
    assert_abs_diff_eq!(at(&result, november), 21.85, epsilon = 1e-6);
    let bounds = result.time_bounds.as_ref().unwrap();
    assert_eq!(bounds[0], (ymd(2042, 1, 1), ymd(2042, 1, 31)));
}

#[test]
fn custom_indices_with_a_threshold_on_a_season() {
    let mut tas = stub_tas(275.0);
    set(&mut tas, ymd(2043, 1, 1), 303.15);
    set(&mut tas, ymd(2043, 12, 1), 280.15);
    let params = IndexParameters {
        frequency: season(&[12, 1]),
        ..IndexParameters::default()
    };
    let builder = ClimateVariableBuilder::new("tas", tas).threshold_query("> 275 K");
    let cases = [
        ("minimum", 303.15, 280.15),
        ("maximum", 303.15, 280.15),
        ("sum", 303.15, 280.15),
        ("average", 303.15, 280.15),
        ("count_occurrences", 1.0, 1.0),
        ("max_consecutive_occurrence", 1.0, 1.0),
    ];
    for (indicator, first, second) in cases {
        let result = run(indicator, &params, &[builder.clone()]).unwrap();
        let last = result.values.shape()[0] - 1;
        assert!(at(&result, 0).is_nan(), "{indicator}");
        assert!(at(&result, last).is_nan(), "{indicator}");
        assert_abs_diff_eq!(at(&result, 1), first, epsilon = 1e-9);
        assert_abs_diff_eq!(at(&result, 2), second, epsilon = 1e-9);
    }
}

#[test]
fn rolling_windows_on_a_season() {
    let mut tas = stub_tas(275.0);
    set(&mut tas, ymd(2043, 12, 1), 282.0);
    let params = IndexParameters {
        frequency: season(&[12, 1]),
        rolling_window_width: 7,
        ..IndexParameters::default()
    };
    let builder = ClimateVariableBuilder::new("tas", tas);
    let mean = run("run_mean", &params, &[builder.clone()]).unwrap();
    assert_abs_diff_eq!(at(&mean, 1), 275.0, epsilon = 1e-9);
    assert_abs_diff_eq!(at(&mean, 2), 276.0, epsilon = 1e-9);
    let sum = run("max_of_rolling_sum", &params, &[builder]).unwrap();
    assert_abs_diff_eq!(at(&sum, 1), 1925.0, epsilon = 1e-9);
    assert_abs_diff_eq!(at(&sum, 2), 1932.0, epsilon = 1e-9);
}

fn anomaly_stub() -> ClimateVariableBuilder {
    let mut tas = stub_tas(2.0);
    set(&mut tas, ymd(2045, 1, 1), 300.0);
    ClimateVariableBuilder::new("tas", tas)
}

fn anomaly_params(frequency: FrequencySpec, method: SamplingMethod, reference: (NaiveDate, NaiveDate)) -> IndexParameters {
    IndexParameters {
        frequency,
        sampling_method: method,
        reference_period: Some(reference),
        is_compared_to_reference: true,
        ..IndexParameters::default()
    }
}

#[test]
fn anomaly_of_a_season_against_its_reference() {
    let params = anomaly_params(
        season(&[12, 1]),
        SamplingMethod::GroupByRefAndResampleStudy,
        (ymd(2014, 1, 1), ymd(2044, 12, 31)),
    );
    let result = run("anomaly", &params, &[anomaly_stub()]).unwrap();
    let expected = [f64::NAN, 0.0, 0.0, 4.806_451_61, 0.0, f64::NAN];
    assert_eq!(result.values.shape()[0], expected.len());
    for (i, want) in expected.iter().enumerate() {
        if want.is_nan() {
            assert!(at(&result, i).is_nan(), "step {i}");
        } else {
            assert_abs_diff_eq!(at(&result, i), *want, epsilon = 1e-6);
        }
    }
    assert_eq!(result.dates().unwrap()[3], ymd(2044, 12, 1));
}

#[test]
fn anomaly_of_months_years_and_days() {
    let reference = (ymd(2014, 1, 1), ymd(2044, 12, 31));
    let method = SamplingMethod::GroupByRefAndResampleStudy;
    let cases = [("MONTH", ymd(2045, 1, 1), 9.612_903_23), ("YEAR", ymd(2045, 1, 1), 0.816_438_36), ("DAY", ymd(2045, 1, 1), 298.0)];
    for (frequency, label, want) in cases {
        let params = anomaly_params(frequency.into(), method, reference);
        let result = run("difference_of_means", &params, &[anomaly_stub()]).unwrap();
        let i = result.time_position(label).unwrap();
        assert_abs_diff_eq!(at(&result, i), want, epsilon = 1e-6);
    }
}

#[test]
fn hourly_anomaly_is_not_implemented() {
    let params = anomaly_params("HOUR".into(), SamplingMethod::GroupByRefAndResampleStudy, (ymd(2042, 1, 1), ymd(2044, 12, 31)));
    let err = run("anomaly", &params, &[anomaly_stub()]).unwrap_err();
    assert!(matches!(err, ClimIndError::NotImplemented { .. }), "{err}");
}

#[test]
fn grouped_anomalies_have_no_time_axis() {
    let reference = (ymd(2042, 1, 1), ymd(2044, 12, 31));
    let params = anomaly_params(season(&[12, 1]), SamplingMethod::GroupBy, reference);
    let result = run("anomaly", &params, &[anomaly_stub()]).unwrap();
    assert!(!result.has_time());
    assert_abs_diff_eq!(result.values[[0, 0]], 0.961_290_32, epsilon = 1e-6);

    let params = anomaly_params("MONTH".into(), SamplingMethod::GroupBy, reference);
    let result = run("anomaly", &params, &[anomaly_stub()]).unwrap();
    assert_eq!(result.time, Some(TimeIndex::Months((1..=12).collect())));
    assert_abs_diff_eq!(at(&result, 0), 1.922_580_65, epsilon = 1e-6);
    assert_abs_diff_eq!(at(&result, 1), 0.0, epsilon = 1e-9);
}

#[test]
fn anomaly_preconditions() {
    let reference = (ymd(2042, 1, 1), ymd(2044, 12, 31));
    let params = anomaly_params("YEAR".into(), SamplingMethod::Resample, reference);
    let err = run("anomaly", &params, &[anomaly_stub()]).unwrap_err();
    assert!(err.is_invalid_argument(), "{err}");

    let params = IndexParameters {
        is_compared_to_reference: true,
        ..IndexParameters::default()
    };
    let err = run("anomaly", &params, &[anomaly_stub()]).unwrap_err();
    assert!(err.is_invalid_argument(), "{err}");

    let err = run("anomaly", &IndexParameters::default(), &[anomaly_stub()]).unwrap_err();
    assert!(matches!(err, ClimIndError::VariableCount { actual: 1, .. }), "{err}");
}

#[test]
fn differences_convert_inputs_before_subtracting() {
    let tasmax = ClimateVariableBuilder::new("tasmax", stub_tas(300.0));
    let tasmin = ClimateVariableBuilder::new("tasmin", stub_tas(290.0));
    let params = IndexParameters {
        out_unit: Some("degC".to_string()),
        ..IndexParameters::default()
    };
    let result = run("mean_of_difference", &params, &[tasmax, tasmin]).unwrap();
    // a 10 K spread is a 10 degC spread
    assert_abs_diff_eq!(at(&result, 0), 10.0, epsilon = 1e-9);
    assert_eq!(result.units(), Some("degC"));
}

#[test]
fn bootstrapped_percentile_counts() {
    let spec = ThresholdSpec {
        reference_period: Some((ymd(2042, 1, 1), ymd(2043, 12, 31))),
        ..ThresholdSpec::from_query("> 90 doy_per")
    };
    let builder = ClimateVariableBuilder::new("tas", stub_tas(280.0)).threshold_spec(spec);
    let tas = builder.build().unwrap();
    assert!(tas.must_run_bootstrap());
    let result = run("count_occurrences", &IndexParameters::default(), &[builder]).unwrap();
    assert_eq!(result.values.shape()[0], 5);
    assert!(result.values.iter().all(|v| *v == 0.0));
    assert!(result.attrs.contains_key("reference_epoch"));
}

#[test]
fn computing_twice_gives_the_same_index() {
    let mut data = stub_tas(2.0);
    set(&mut data, ymd(2043, 7, 14), 310.0);
    let params = IndexParameters {
        frequency: "MONTH".into(),
        date_event: true,
        ..IndexParameters::default()
    };
    let config = IndexConfig::build(&params, &[ClimateVariableBuilder::new("tas", data)]).unwrap();
    let pending = GenericIndicator::lookup("max").unwrap().prepare(config).unwrap();
    let first = pending.compute().unwrap();
    let second = pending.compute().unwrap();
    assert_eq!(first.values, second.values);
    assert_eq!(first.attrs, second.attrs);
    assert_eq!(first.dates(), second.dates());
    assert_eq!(at(&first, 18), 310.0);
}

#[test]
fn batch_computation_matches_single_ones() {
    let frequencies = ["YEAR", "MONTH", "DJF"];
    let pending: Vec<PendingIndex> = frequencies
        .iter()
        .map(|f| {
            let params = IndexParameters {
                frequency: (*f).into(),
                threads: Some(2),
                ..IndexParameters::default()
            };
            let config = IndexConfig::build(&params, &[anomaly_stub()]).unwrap();
            GenericIndicator::lookup("max").unwrap().prepare(config).unwrap()
        })
        .collect();
    let singles: Vec<DataArray> = pending.iter().map(|p| p.compute().unwrap()).collect();
    let batch: Vec<DataArray> = compute_batch(pending).into_iter().map(|r| r.unwrap()).collect();
    for (single, batched) in singles.iter().zip(&batch) {
        assert_eq!(single.values.shape(), batched.values.shape());
        assert_eq!(single.dates(), batched.dates());
    }
    let yearly = &batch[0];
    assert_eq!(at(yearly, 3), 300.0);
}
