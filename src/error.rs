//! Defines experiment errors.

use std::{error, fmt};

/// An error type for every failure mode of the experiment.
///
/// All variants are fatal: they propagate to the top level and terminate the
/// run. There is no retry policy and no partial-result recovery.
#[derive(Clone, Debug)]
pub enum ExperimentError {
    /// An input file was missing or unreadable, or a configuration value was invalid.
    Configuration(String),
    /// A tensor dimension was incompatible with the reshape parameters or the architecture.
    ShapeMismatch {
        /// The dimensions that were required.
        expected: Vec<usize>,
        /// The dimensions that were found.
        actual: Vec<usize>,
    },
    /// The training set was not larger than the configured validation slice.
    InsufficientData {
        /// The minimum number of training rows required.
        required: usize,
        /// The number of training rows available.
        available: usize,
    },
    /// A fatal numerical error surfaced while fitting, e.g. a non-finite loss.
    Training(String),
    /// A chart could not be rendered.
    Plot(String),
}

impl error::Error for ExperimentError {}

impl fmt::Display for ExperimentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(s) => write!(f, "Configuration error: {}.", s),
            Self::ShapeMismatch { expected, actual } => write!(
                f,
                "Shape mismatch (want {:?}, but got {:?}).",
                expected, actual
            ),
            Self::InsufficientData {
                required,
                available,
            } => write!(
                f,
                "Insufficient data (need more than {} training rows, but got {}).",
                required, available
            ),
            Self::Training(s) => write!(f, "Training failure: {}.", s),
            Self::Plot(s) => write!(f, "Plot error: {}.", s),
        }
    }
}

impl From<std::io::Error> for ExperimentError {
    fn from(err: std::io::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}
