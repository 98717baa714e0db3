//! Error type shared by every stage of the filter.
//!
//! Only precondition violations are reported as errors. Numerical degeneracies (all-zero weights,
//! particles that see no landmarks) have defined fallbacks inside the stages themselves and never
//! surface here.
use std::fmt::{self, Display};

#[derive(Clone, Debug, PartialEq)]
pub enum FilterError {
    /// A prediction, update or resampling step was requested before `init`.
    NotInitialized,
    /// `init` was called on a filter that already holds a particle set.
    AlreadyInitialized,
    /// A noise parameter list had the wrong number of entries.
    NoiseDimension { expected: usize, found: usize },
    /// A standard deviation was negative, non-finite, or zero where it must be positive.
    InvalidNoise(String),
    /// Any other out-of-range argument (time step, particle count, sensor range).
    InvalidParameter(String),
}

impl Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::NotInitialized => {
                write!(f, "particle filter has not been initialized; call init() first")
            }
            FilterError::AlreadyInitialized => {
                write!(f, "particle filter has already been initialized")
            }
            FilterError::NoiseDimension { expected, found } => write!(
                f,
                "expected {} noise standard deviations, found {}",
                expected, found
            ),
            FilterError::InvalidNoise(msg) => write!(f, "invalid noise parameter: {}", msg),
            FilterError::InvalidParameter(msg) => write!(f, "invalid parameter: {}", msg),
        }
    }
}

impl std::error::Error for FilterError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert!(
            FilterError::NotInitialized
                .to_string()
                .contains("has not been initialized")
        );
        assert_eq!(
            FilterError::NoiseDimension {
                expected: 3,
                found: 2
            }
            .to_string(),
            "expected 3 noise standard deviations, found 2"
        );
        assert_eq!(
            FilterError::InvalidParameter("dt must be positive".to_string()).to_string(),
            "invalid parameter: dt must be positive"
        );
    }

    #[test]
    fn test_boxes_as_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(FilterError::AlreadyInitialized);
        assert_eq!(err.to_string(), "particle filter has already been initialized");
    }
}
