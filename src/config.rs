//! The experiment's configuration surface.
//!
//! Every knob that the training script exposes lives here, with defaults
//! matching the original experiment. A configuration can be loaded from a
//! JSON file, and every field can be overridden from the command line.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::ExperimentError;

/// Configuration of a single experiment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Path to the training feature array, shaped `(samples, timesteps, features)`.
    pub train_features_path: PathBuf,
    /// Path to the training label array, shaped `(samples, n_outputs)`.
    pub train_labels_path: PathBuf,
    /// Path to the test feature array, shaped `(samples, timesteps, features)`.
    pub test_features_path: PathBuf,
    /// Path to the test label array, shaped `(samples, n_outputs)`.
    pub test_labels_path: PathBuf,

    /// Number of passes over the training set per trial.
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Number of samples per gradient update.
    ///
    /// The default approximates one full pass per batch for the dataset the
    /// experiment was designed around, effectively disabling mini-batching.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Number of subsequences each sample is split into.
    #[serde(default = "default_n_steps")]
    pub n_steps: usize,
    /// Number of timesteps per subsequence.
    #[serde(default = "default_n_length")]
    pub n_length: usize,
    /// Number of train+evaluate cycles to aggregate over.
    #[serde(default = "default_n_trials")]
    pub n_trials: usize,
    /// Number of leading training rows reserved for validation.
    #[serde(default = "default_validation_size")]
    pub validation_size: usize,
    /// Whether to render loss/accuracy curves after each trial.
    #[serde(default = "default_plot")]
    pub plot: bool,
    /// Directory that rendered charts are written into.
    #[serde(default = "default_plot_dir")]
    pub plot_dir: PathBuf,
    /// Optional path for a JSON summary of the aggregated scores.
    #[serde(default)]
    pub summary_path: Option<PathBuf>,
}

fn default_epochs() -> usize {
    1000
}

fn default_batch_size() -> usize {
    1502
}

fn default_n_steps() -> usize {
    6
}

fn default_n_length() -> usize {
    5
}

fn default_n_trials() -> usize {
    1
}

fn default_validation_size() -> usize {
    450
}

fn default_plot() -> bool {
    true
}

fn default_plot_dir() -> PathBuf {
    PathBuf::from("plots")
}

impl ExperimentConfig {
    /// Create a configuration with default hyperparameters for the given
    /// input array paths.
    pub fn new(
        train_features_path: impl Into<PathBuf>,
        train_labels_path: impl Into<PathBuf>,
        test_features_path: impl Into<PathBuf>,
        test_labels_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            train_features_path: train_features_path.into(),
            train_labels_path: train_labels_path.into(),
            test_features_path: test_features_path.into(),
            test_labels_path: test_labels_path.into(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            n_steps: default_n_steps(),
            n_length: default_n_length(),
            n_trials: default_n_trials(),
            validation_size: default_validation_size(),
            plot: default_plot(),
            plot_dir: default_plot_dir(),
            summary_path: None,
        }
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ExperimentError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            ExperimentError::Configuration(format!("can't read {}: {}", path.display(), err))
        })?;
        serde_json::from_str(&contents).map_err(|err| {
            ExperimentError::Configuration(format!("can't parse {}: {}", path.display(), err))
        })
    }

    /// Check the configuration before any data is touched.
    ///
    /// The four input arrays must exist and be readable, and the numeric
    /// knobs must be non-zero.
    pub fn validate(&self) -> Result<(), ExperimentError> {
        for path in [
            &self.train_features_path,
            &self.train_labels_path,
            &self.test_features_path,
            &self.test_labels_path,
        ] {
            fs::metadata(path).map_err(|err| {
                ExperimentError::Configuration(format!(
                    "input array {} is not readable: {}",
                    path.display(),
                    err
                ))
            })?;
        }
        for (name, value) in [
            ("epochs", self.epochs),
            ("batch_size", self.batch_size),
            ("n_steps", self.n_steps),
            ("n_length", self.n_length),
            ("n_trials", self.n_trials),
            ("validation_size", self.validation_size),
        ] {
            if value == 0 {
                return Err(ExperimentError::Configuration(format!(
                    "{} must be non-zero",
                    name
                )));
            }
        }
        Ok(())
    }

    /// The raw timestep count the reshape parameters imply.
    pub fn timesteps(&self) -> usize {
        self.n_steps * self.n_length
    }
}
