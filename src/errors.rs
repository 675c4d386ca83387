//! Centralized error handling for climind
//!
//! Every fallible operation in the crate returns [`Result`]. Validation happens
//! eagerly: a computation is rejected before any array is reduced, and the
//! error variant names the precondition that failed. Numerically undefined
//! outcomes (empty buckets, division by zero) are not errors, they are NaN.

/// Main error type for climind operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClimIndError {
    /// A caller supplied an argument or combination of arguments that cannot work
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the argument
        message: String,
    },

    /// A unit string could not be parsed
    #[error("Unknown unit '{unit}'")]
    UnknownUnit {
        /// The offending unit string
        unit: String,
    },

    /// Two units do not share a dimension and cannot be converted
    #[error("Cannot convert from '{from}' to '{to}'")]
    IncompatibleUnits {
        /// Source unit
        from: String,
        /// Target unit
        to: String,
    },

    /// An indicator received the wrong number of climate variables
    #[error("{indicator} needs {expected} variable(s), got {actual}")]
    VariableCount {
        /// Indicator name
        indicator: String,
        /// Description of the expected count
        expected: String,
        /// Number of variables actually given
        actual: usize,
    },

    /// An indicator does not support the requested sampling method
    #[error("{indicator} can only be computed with the following sampling_method(s): {allowed}, not '{method}'")]
    SamplingMethod {
        /// Indicator name
        indicator: String,
        /// Requested sampling method
        method: String,
        /// Comma separated list of supported methods
        allowed: String,
    },

    /// Input variables were not sampled at the same frequency
    #[error("Frequency mismatch: {message}")]
    FrequencyMismatch {
        /// Details about the frequencies involved
        message: String,
    },

    /// The requested combination is recognised but not supported
    #[error("Not implemented: {message}")]
    NotImplemented {
        /// What is unsupported
        message: String,
    },

    /// Array shape or dimension error
    #[error("Array error: {0}")]
    ArrayError(#[from] ndarray::ShapeError),

    /// Thread pool configuration error
    #[error("Thread pool error: {0}")]
    ThreadPoolError(String),
}

impl ClimIndError {
    /// Shorthand for [`ClimIndError::InvalidArgument`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Shorthand for [`ClimIndError::NotImplemented`]
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    /// True for every error caused by bad caller input.
    ///
    /// Not-implemented combinations, shape errors and thread pool failures
    /// are excluded.
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. }
                | Self::UnknownUnit { .. }
                | Self::IncompatibleUnits { .. }
                | Self::VariableCount { .. }
                | Self::SamplingMethod { .. }
                | Self::FrequencyMismatch { .. }
        )
    }
}

/// Result type alias for climind operations
pub type Result<T> = std::result::Result<T, ClimIndError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_family() {
        assert!(ClimIndError::invalid("x").is_invalid_argument());
        assert!(ClimIndError::UnknownUnit { unit: "foo".into() }.is_invalid_argument());
        assert!(!ClimIndError::not_implemented("hourly anomaly").is_invalid_argument());
        assert!(!ClimIndError::ThreadPoolError("boom".into()).is_invalid_argument());
    }

    #[test]
    fn messages_name_the_precondition() {
        let err = ClimIndError::VariableCount {
            indicator: "excess".into(),
            expected: "exactly 1".into(),
            actual: 2,
        };
        assert_eq!(format!("{err}"), "excess needs exactly 1 variable(s), got 2");
    }
}
