//! Logical links combining several exceedances

use std::fmt;

use crate::data_array::DataArray;
use crate::errors::{ClimIndError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LogicalLink {
    #[default]
    And,
    Or,
}

impl LogicalLink {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
        }
    }

    /// Standard, long and short names are all the upper case keyword
    #[must_use]
    pub const fn standard_name(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    /// Parse `and` / `or`, case insensitive
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] for anything else.
    pub fn lookup(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "and" | "&&" | "logical_and" => Ok(Self::And),
            "or" | "||" | "logical_or" => Ok(Self::Or),
            other => Err(ClimIndError::invalid(format!("Unknown logical link '{other}'"))),
        }
    }

    fn combine_values(self, a: f64, b: f64) -> f64 {
        if a.is_nan() || b.is_nan() {
            return f64::NAN;
        }
        let hit = match self {
            Self::And => a > 0.0 && b > 0.0,
            Self::Or => a > 0.0 || b > 0.0,
        };
        f64::from(u8::from(hit))
    }

    /// Fold a list of exceedances into one
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] for an empty list, or a
    /// broadcasting error.
    pub fn combine(self, exceedances: &[DataArray]) -> Result<DataArray> {
        let (first, rest) = exceedances
            .split_first()
            .ok_or_else(|| ClimIndError::invalid("no exceedance to combine"))?;
        rest.iter().try_fold(first.clone(), |acc, next| {
            acc.zip_with(next, move |a, b| self.combine_values(a, b))
        })
    }
}

impl fmt::Display for LogicalLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.standard_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn flags(values: &[f64]) -> DataArray {
        DataArray::new("e", vec!["cell".into()], arr1(values).into_dyn()).unwrap()
    }

    #[test]
    fn and_or() {
        let a = flags(&[1.0, 1.0, 0.0, f64::NAN]);
        let b = flags(&[1.0, 0.0, 0.0, 1.0]);
        let and = LogicalLink::And.combine(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(&and.values.as_slice().unwrap()[..3], &[1.0, 0.0, 0.0]);
        assert!(and.values[[3]].is_nan());
        let or = LogicalLink::lookup("OR").unwrap().combine(&[a, b]).unwrap();
        assert_eq!(&or.values.as_slice().unwrap()[..3], &[1.0, 1.0, 0.0]);
        assert!(LogicalLink::And.combine(&[]).is_err());
    }
}
