//! Thresholds made of plain values: a scalar, a list of scalars or one
//! value per grid cell

use std::fmt;

use ndarray::{arr0, Array1};

use super::operator::Operator;
use super::{format_values, Quantity, ThresholdMetadata};
use crate::data_array::DataArray;
use crate::errors::{ClimIndError, Result};
use crate::units::Unit;

/// Name of the dimension added when a threshold holds several values
pub const THRESHOLD_DIM: &str = "threshold";

#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdValue {
    /// One or more scalar values; several values add a `threshold` dimension
    Scalars(Vec<f64>),
    /// One value per grid cell, possibly with extra dimensions
    Grid(DataArray),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicThreshold {
    operator: Operator,
    value: ThresholdValue,
    unit: Option<String>,
    threshold_min_value: Option<Quantity>,
}

impl BasicThreshold {
    /// Build a threshold from its value.
    ///
    /// A grid keeps its own `units` attribute when `unit` is not given, and is
    /// converted to `unit` otherwise. `threshold_min_value` only applies to
    /// grids: cells not above it become NaN. A dimensionless `offset` is added
    /// in the threshold unit, a dimensioned one is converted first.
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] when a min value is combined
    /// with scalar values or when the value list is empty, and unit errors
    /// when conversions fail.
    pub fn new(
        operator: Operator,
        value: ThresholdValue,
        unit: Option<&str>,
        threshold_min_value: Option<Quantity>,
        offset: Option<Quantity>,
    ) -> Result<Self> {
        if let Some(unit) = unit {
            Unit::parse(unit)?;
        }
        let (value, unit) = match value {
            ThresholdValue::Scalars(values) => {
                if values.is_empty() {
                    return Err(ClimIndError::invalid("a threshold needs at least one value"));
                }
                if threshold_min_value.is_some() {
                    return Err(ClimIndError::invalid(
                        "threshold_min_value cannot be used with scalar thresholds, \
                         it only filters per grid cell or percentile thresholds",
                    ));
                }
                let shift = offset_in(offset.as_ref(), unit)?;
                let values = values.into_iter().map(|v| v + shift).collect();
                (ThresholdValue::Scalars(values), unit.map(str::to_string))
            }
            ThresholdValue::Grid(grid) => {
                let mut grid = match (unit, grid.units()) {
                    (Some(target), Some(current)) if target != current => grid.convert_units(target)?,
                    (Some(target), None) => grid.with_units(target),
                    _ => grid,
                };
                let unit = grid.units().map(str::to_string);
                let shift = offset_in(offset.as_ref(), unit.as_deref())?;
                if shift != 0.0 {
                    grid = grid.map(move |v| v + shift);
                }
                if let Some(min) = &threshold_min_value {
                    let min = min.in_unit(unit.as_deref())?;
                    grid = grid.map(move |v| if v > min { v } else { f64::NAN });
                }
                (ThresholdValue::Grid(grid), unit)
            }
        };
        Ok(Self {
            operator,
            value,
            unit,
            threshold_min_value,
        })
    }

    #[must_use]
    pub const fn operator(&self) -> Operator {
        self.operator
    }

    #[must_use]
    pub const fn value(&self) -> &ThresholdValue {
        &self.value
    }

    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    #[must_use]
    pub const fn threshold_min_value(&self) -> Option<&Quantity> {
        self.threshold_min_value.as_ref()
    }

    /// Threshold values as an array ready to broadcast against data
    ///
    /// # Errors
    ///
    /// Returns an error if the scalar array cannot be built.
    pub fn as_array(&self) -> Result<DataArray> {
        let mut array = match &self.value {
            ThresholdValue::Scalars(values) if values.len() == 1 => {
                DataArray::new("threshold", Vec::new(), arr0(values[0]).into_dyn())?
            }
            ThresholdValue::Scalars(values) => {
                let mut array = DataArray::new(
                    "threshold",
                    vec![THRESHOLD_DIM.to_string()],
                    Array1::from(values.clone()).into_dyn(),
                )?;
                array.set_labels(THRESHOLD_DIM, values.clone());
                array
            }
            ThresholdValue::Grid(grid) => grid.clone(),
        };
        if let Some(unit) = &self.unit {
            array.set_units(unit);
        }
        Ok(array)
    }

    /// Same threshold expressed in `unit`
    ///
    /// # Errors
    ///
    /// Returns unit errors when the current unit cannot be converted.
    pub fn converted_to(&self, unit: &str) -> Result<Self> {
        let Some(current) = self.unit.as_deref() else {
            return Ok(Self {
                unit: Some(unit.to_string()),
                ..self.clone()
            });
        };
        if current == unit {
            return Ok(self.clone());
        }
        let conversion = Unit::parse(current)?.conversion_to(&Unit::parse(unit)?)?;
        let value = match &self.value {
            ThresholdValue::Scalars(values) => {
                ThresholdValue::Scalars(values.iter().map(|v| conversion.apply(*v)).collect())
            }
            ThresholdValue::Grid(grid) => ThresholdValue::Grid(grid.convert_units(unit)?),
        };
        Ok(Self {
            value,
            unit: Some(unit.to_string()),
            ..self.clone()
        })
    }

    /// Exceedance of `data`, or `override_op(data, threshold)` when given
    ///
    /// # Errors
    ///
    /// Returns an error when units are incompatible, when the operator is
    /// `reach` without override, or when shapes cannot be broadcast.
    pub fn compute(&self, data: &DataArray, override_op: Option<fn(f64, f64) -> f64>) -> Result<DataArray> {
        let threshold = match (data.units(), self.unit.as_deref()) {
            (Some(data_unit), Some(unit)) if data_unit != unit => self.converted_to(data_unit)?.as_array()?,
            _ => self.as_array()?,
        };
        match override_op {
            Some(op) => data.zip_with(&threshold, op),
            None => self.operator.apply(data, &threshold),
        }
    }

    #[must_use]
    pub fn metadata(&self) -> ThresholdMetadata {
        let op = self.operator;
        let unit = self.unit.as_deref().unwrap_or("");
        let single = match &self.value {
            ThresholdValue::Scalars(values) => values.len() == 1,
            ThresholdValue::Grid(grid) => grid.values.len() == 1,
        };
        if single {
            let value = match &self.value {
                ThresholdValue::Scalars(values) => values[0],
                ThresholdValue::Grid(grid) => grid.values.iter().copied().next().unwrap_or(f64::NAN),
            };
            return ThresholdMetadata {
                standard_name: format!("{}_threshold", op.standard_name()),
                long_name: format!("{} {value} {unit}", op.long_name()).trim_end().to_string(),
                short_name: format!("{}_threshold", op.short_name()),
            };
        }
        let values: Vec<f64> = match &self.value {
            ThresholdValue::Scalars(values) => values.clone(),
            ThresholdValue::Grid(grid) => grid.values.iter().copied().collect(),
        };
        let mut long_name = if values.len() < 10 {
            format!("{} {} {unit}", op.long_name(), format_values(&values))
        } else {
            let valid = values.iter().copied().filter(|v| !v.is_nan());
            let (min, max) = valid.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
            format!(
                "{} per grid cell values between {:.3} {unit} and {:.3} {unit}.",
                op.long_name(),
                min,
                max
            )
        };
        if let Some(min) = &self.threshold_min_value {
            long_name.push_str(&format!(" {}", min.considered_template(unit)));
        }
        ThresholdMetadata {
            standard_name: format!("{}_thresholds", op.standard_name()),
            long_name: long_name.trim_end().to_string(),
            short_name: format!("{}_threshold", op.short_name()),
        }
    }
}

fn offset_in(offset: Option<&Quantity>, unit: Option<&str>) -> Result<f64> {
    let Some(offset) = offset else {
        return Ok(0.0);
    };
    match (offset.unit.as_deref(), unit) {
        (Some(from), Some(to)) => {
            let conversion = Unit::parse(from)?.delta().conversion_to(&Unit::parse(to)?.delta())?;
            Ok(offset.value * conversion.scale)
        }
        _ => Ok(offset.value),
    }
}

impl fmt::Display for BasicThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            ThresholdValue::Scalars(values) if values.len() == 1 => write!(f, "{} {}", self.operator, values[0])?,
            ThresholdValue::Scalars(values) => write!(f, "{} {}", self.operator, format_values(values))?,
            ThresholdValue::Grid(_) => write!(f, "{} per_grid_cell", self.operator)?,
        }
        if let Some(unit) = &self.unit {
            write!(f, " {unit}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_array::time_dims;
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;
    use ndarray::{arr1, Array, IxDyn};

    fn tas(values: Vec<f64>) -> DataArray {
        let n = values.len();
        DataArray::daily(
            "tas",
            time_dims(&["cell"]),
            Array::from_shape_vec(IxDyn(&[n, 1]), values).unwrap(),
            NaiveDate::from_ymd_opt(2042, 1, 1).unwrap(),
            "K",
        )
        .unwrap()
    }

    #[test]
    fn scalar_threshold_converts_to_data_unit() {
        let t = BasicThreshold::new(Operator::Greater, ThresholdValue::Scalars(vec![20.0]), Some("degC"), None, None).unwrap();
        let out = t.compute(&tas(vec![290.0, 295.0, f64::NAN]), None).unwrap();
        assert_eq!(out.values[[0, 0]], 0.0);
        assert_eq!(out.values[[1, 0]], 1.0);
        assert!(out.values[[2, 0]].is_nan());
    }

    #[test]
    fn min_value_needs_a_grid() {
        let err = BasicThreshold::new(
            Operator::Greater,
            ThresholdValue::Scalars(vec![1.0]),
            Some("mm/day"),
            Some(Quantity::new(1.0, Some("mm/day"))),
            None,
        )
        .unwrap_err();
        assert!(err.is_invalid_argument());

        let grid = DataArray::new("t", vec!["cell".into()], arr1(&[0.5, 2.0]).into_dyn())
            .unwrap()
            .with_units("mm/day");
        let t = BasicThreshold::new(
            Operator::Greater,
            ThresholdValue::Grid(grid),
            None,
            Some(Quantity::new(1.0, Some("mm/day"))),
            None,
        )
        .unwrap();
        let ThresholdValue::Grid(g) = t.value() else { panic!("grid expected") };
        assert!(g.values[[0]].is_nan());
        assert_eq!(g.values[[1]], 2.0);
    }

    #[test]
    fn offsets_follow_units() {
        let t = BasicThreshold::new(
            Operator::Greater,
            ThresholdValue::Scalars(vec![273.15]),
            Some("K"),
            None,
            Some(Quantity::new(5.0, Some("degC"))),
        )
        .unwrap();
        let ThresholdValue::Scalars(v) = t.value() else { panic!("scalars expected") };
        assert_abs_diff_eq!(v[0], 278.15, epsilon = 1e-9);
        let t = BasicThreshold::new(
            Operator::Greater,
            ThresholdValue::Scalars(vec![10.0]),
            Some("degC"),
            None,
            Some(Quantity::new(2.0, None)),
        )
        .unwrap();
        let ThresholdValue::Scalars(v) = t.converted_to("K").unwrap().value().clone() else { panic!() };
        assert_abs_diff_eq!(v[0], 285.15, epsilon = 1e-9);
    }

    #[test]
    fn several_values_add_a_dimension() {
        let t = BasicThreshold::new(Operator::GreaterOrEqual, ThresholdValue::Scalars(vec![280.0, 290.0]), Some("K"), None, None).unwrap();
        let out = t.compute(&tas(vec![285.0]), None).unwrap();
        assert_eq!(out.dims, vec!["time", THRESHOLD_DIM, "cell"]);
        assert_eq!(out.values.as_slice().unwrap(), &[1.0, 0.0]);
        assert_eq!(t.to_string(), ">= [280, 290] K");
        assert_eq!(t.metadata().standard_name, "greater_or_equal_to_thresholds");
    }
}
