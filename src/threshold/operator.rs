//! Comparison operators used by thresholds

use std::fmt;

use crate::data_array::DataArray;
use crate::errors::{ClimIndError, Result};

/// Comparison between a value and its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Greater,
    Lower,
    GreaterOrEqual,
    LowerOrEqual,
    Equal,
    /// The threshold is reached: the reducer decides what to compute
    /// (excess and deficit). Comparing with it is an error.
    Reach,
}

impl Operator {
    pub const ALL: [Self; 6] = [
        Self::Greater,
        Self::Lower,
        Self::GreaterOrEqual,
        Self::LowerOrEqual,
        Self::Equal,
        Self::Reach,
    ];

    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::Greater => "gt",
            Self::Lower => "lt",
            Self::GreaterOrEqual => "get",
            Self::LowerOrEqual => "let",
            Self::Equal => "e",
            Self::Reach => "reach",
        }
    }

    #[must_use]
    pub const fn long_name(self) -> &'static str {
        match self {
            Self::Greater => "greater than",
            Self::Lower => "lower than",
            Self::GreaterOrEqual => "greater or equal to",
            Self::LowerOrEqual => "lower or equal to",
            Self::Equal => "equal to",
            Self::Reach => "",
        }
    }

    #[must_use]
    pub const fn standard_name(self) -> &'static str {
        match self {
            Self::Greater => "greater_than",
            Self::Lower => "lower_than",
            Self::GreaterOrEqual => "greater_or_equal_to",
            Self::LowerOrEqual => "lower_or_equal_to",
            Self::Equal => "equal_to",
            Self::Reach => "reaching",
        }
    }

    #[must_use]
    pub const fn operand(self) -> &'static str {
        match self {
            Self::Greater => ">",
            Self::Lower => "<",
            Self::GreaterOrEqual => ">=",
            Self::LowerOrEqual => "<=",
            Self::Equal => "==",
            Self::Reach => "reach",
        }
    }

    #[must_use]
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Greater => &["gt", ">"],
            Self::Lower => &["lt", "<"],
            Self::GreaterOrEqual => &["get", "ge", ">=", "=>"],
            Self::LowerOrEqual => &["let", "le", "<=", "=<"],
            Self::Equal => &["e", "equal", "eq", "=", "=="],
            Self::Reach => &["r", "reach"],
        }
    }

    /// Find an operator by alias, case insensitive
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] for unknown operators.
    pub fn lookup(name: &str) -> Result<Self> {
        let lower = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|op| op.aliases().contains(&lower.as_str()))
            .ok_or_else(|| ClimIndError::invalid(format!("Unknown operator '{name}'")))
    }

    /// Compare two values
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] for [`Operator::Reach`].
    pub fn compare(self, value: f64, threshold: f64) -> Result<bool> {
        Ok(match self {
            Self::Greater => value > threshold,
            Self::Lower => value < threshold,
            Self::GreaterOrEqual => value >= threshold,
            Self::LowerOrEqual => value <= threshold,
            Self::Equal => value == threshold,
            Self::Reach => return Err(reach_error()),
        })
    }

    /// Exceedance of `data` against `threshold`: 1 where the comparison
    /// holds, 0 where it does not, NaN where `data` is missing.
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::InvalidArgument`] for [`Operator::Reach`] or
    /// when the arrays cannot be broadcast.
    pub fn apply(self, data: &DataArray, threshold: &DataArray) -> Result<DataArray> {
        if self == Self::Reach {
            return Err(reach_error());
        }
        let mut out = data.zip_with(threshold, move |v, t| {
            if v.is_nan() {
                f64::NAN
            } else {
                f64::from(u8::from(self.compare(v, t).unwrap_or(false)))
            }
        })?;
        out.attrs.remove("units");
        Ok(out)
    }
}

fn reach_error() -> ClimIndError {
    ClimIndError::invalid(
        "the 'reach' operator cannot compare values, it is only meant for excess and deficit",
    )
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operand())
    }
}

impl std::str::FromStr for Operator {
    type Err = ClimIndError;

    fn from_str(s: &str) -> Result<Self> {
        Self::lookup(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve() {
        assert_eq!(Operator::lookup(">=").unwrap(), Operator::GreaterOrEqual);
        assert_eq!(Operator::lookup("=<").unwrap(), Operator::LowerOrEqual);
        assert_eq!(Operator::lookup("EQ").unwrap(), Operator::Equal);
        assert_eq!(Operator::lookup("r").unwrap(), Operator::Reach);
        assert!(Operator::lookup("!=").is_err());
    }

    #[test]
    fn reach_cannot_compare() {
        assert!(Operator::Reach.compare(1.0, 0.0).is_err());
        assert!(Operator::Greater.compare(1.0, 0.0).unwrap());
        assert!(!Operator::Lower.compare(1.0, f64::NAN).unwrap());
    }
}
