//! Loading and shaping of the movement-sequence arrays.
//!
//! The raw inputs are `.npy` arrays of pre-extracted skeletal features and
//! one-hot (or multi-label) encoded labels. Before a model can consume them
//! they are L2-normalized, reshaped into a time-distributed subsequence
//! layout, and split into a fixed validation slice plus a training-proper
//! remainder.

use std::{fs::File, path::Path};

use ndarray::{s, Array2, Array3, Array4, Axis};
use ndarray_npy::ReadNpyExt;

use crate::{config::ExperimentConfig, error::ExperimentError};

/// The four arrays exactly as loaded from disk.
#[derive(Debug, Clone)]
pub struct RawDataset {
    /// Training features, shaped `(samples, timesteps, features)`.
    pub train_features: Array3<f32>,
    /// Training labels, shaped `(samples, n_outputs)`.
    pub train_labels: Array2<f32>,
    /// Test features, shaped `(samples, timesteps, features)`.
    pub test_features: Array3<f32>,
    /// Test labels, shaped `(samples, n_outputs)`.
    pub test_labels: Array2<f32>,
}

impl RawDataset {
    /// Load the four arrays named by the configuration.
    pub fn load(config: &ExperimentConfig) -> Result<Self, ExperimentError> {
        Ok(Self {
            train_features: read_array3(&config.train_features_path)?,
            train_labels: read_array2(&config.train_labels_path)?,
            test_features: read_array3(&config.test_features_path)?,
            test_labels: read_array2(&config.test_labels_path)?,
        })
    }
}

/// Normalized, reshaped, and split tensors ready for model consumption.
#[derive(Debug, Clone)]
pub struct PreparedData {
    /// Training-proper features, shaped `(samples, n_steps, n_length, features)`.
    pub train_features: Array4<f32>,
    /// Training-proper labels.
    pub train_labels: Array2<f32>,
    /// Validation features: the first `validation_size` training rows.
    pub val_features: Array4<f32>,
    /// Validation labels.
    pub val_labels: Array2<f32>,
    /// Test features, shaped `(samples, n_steps, n_length, features)`.
    pub test_features: Array4<f32>,
    /// Test labels.
    pub test_labels: Array2<f32>,
}

impl PreparedData {
    /// The number of output units the labels imply.
    pub fn n_outputs(&self) -> usize {
        self.train_labels.ncols()
    }

    /// The per-sample input shape, excluding the batch axis.
    pub fn input_shape(&self) -> [usize; 3] {
        let s = self.train_features.shape();
        [s[1], s[2], s[3]]
    }
}

/// Run the full preparation pipeline on a raw dataset.
///
/// Training and test features must agree on the feature dimension, and
/// training and test labels on the output dimension. Features are
/// L2-normalized, reshaped into `(samples, n_steps, n_length, features)`,
/// and the first `validation_size` training rows are carved off for
/// per-epoch monitoring.
pub fn prepare(
    raw: RawDataset,
    config: &ExperimentConfig,
) -> Result<PreparedData, ExperimentError> {
    let train_shape = raw.train_features.shape().to_vec();
    let test_shape = raw.test_features.shape().to_vec();
    if train_shape[2] != test_shape[2] {
        return Err(ExperimentError::ShapeMismatch {
            expected: vec![train_shape[2]],
            actual: vec![test_shape[2]],
        });
    }
    if raw.train_labels.ncols() != raw.test_labels.ncols() {
        return Err(ExperimentError::ShapeMismatch {
            expected: vec![raw.train_labels.ncols()],
            actual: vec![raw.test_labels.ncols()],
        });
    }
    if raw.train_features.len_of(Axis(0)) != raw.train_labels.nrows() {
        return Err(ExperimentError::ShapeMismatch {
            expected: vec![raw.train_features.len_of(Axis(0))],
            actual: vec![raw.train_labels.nrows()],
        });
    }
    if raw.test_features.len_of(Axis(0)) != raw.test_labels.nrows() {
        return Err(ExperimentError::ShapeMismatch {
            expected: vec![raw.test_features.len_of(Axis(0))],
            actual: vec![raw.test_labels.nrows()],
        });
    }

    let mut train_features = raw.train_features;
    let mut test_features = raw.test_features;
    normalize(&mut train_features);
    normalize(&mut test_features);

    let train_features = into_subsequences(train_features, config.n_steps, config.n_length)?;
    let test_features = into_subsequences(test_features, config.n_steps, config.n_length)?;

    let rows = train_features.shape()[0];
    if rows <= config.validation_size {
        return Err(ExperimentError::InsufficientData {
            required: config.validation_size,
            available: rows,
        });
    }

    let val_features = train_features
        .slice(s![..config.validation_size, .., .., ..])
        .to_owned();
    let val_labels = raw
        .train_labels
        .slice(s![..config.validation_size, ..])
        .to_owned();
    let train_labels = raw
        .train_labels
        .slice(s![config.validation_size.., ..])
        .to_owned();
    let train_features = train_features
        .slice(s![config.validation_size.., .., .., ..])
        .to_owned();

    Ok(PreparedData {
        train_features,
        train_labels,
        val_features,
        val_labels,
        test_features,
        test_labels: raw.test_labels,
    })
}

/// Rescale every feature vector to unit L2 norm along the last axis.
///
/// Zero vectors are left untouched.
pub fn normalize(features: &mut Array3<f32>) {
    for mut lane in features.lanes_mut(Axis(2)) {
        let norm = lane.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            lane.mapv_inplace(|x| x / norm);
        }
    }
}

/// Reshape `(samples, timesteps, features)` into subsequences of shape
/// `(samples, n_steps, n_length, features)`.
///
/// The flattened element order is unchanged. Fails with a shape mismatch if
/// the timestep axis does not divide exactly into `n_steps * n_length`;
/// silently truncating or padding would corrupt the temporal layout.
pub fn into_subsequences(
    features: Array3<f32>,
    n_steps: usize,
    n_length: usize,
) -> Result<Array4<f32>, ExperimentError> {
    let shape = features.shape().to_vec();
    let (samples, timesteps, n_features) = (shape[0], shape[1], shape[2]);
    if timesteps != n_steps * n_length {
        return Err(ExperimentError::ShapeMismatch {
            expected: vec![samples, n_steps * n_length, n_features],
            actual: shape,
        });
    }
    let reshaped = features
        .as_standard_layout()
        .to_owned()
        .into_shape((samples, n_steps, n_length, n_features))
        .map_err(|_| ExperimentError::ShapeMismatch {
            expected: vec![samples, n_steps, n_length, n_features],
            actual: shape,
        })?;
    Ok(reshaped)
}

fn read_array3(path: &Path) -> Result<Array3<f32>, ExperimentError> {
    let file = File::open(path).map_err(|err| {
        ExperimentError::Configuration(format!("can't open {}: {}", path.display(), err))
    })?;
    Array3::<f32>::read_npy(file).map_err(|err| {
        ExperimentError::Configuration(format!("can't read {}: {}", path.display(), err))
    })
}

fn read_array2(path: &Path) -> Result<Array2<f32>, ExperimentError> {
    let file = File::open(path).map_err(|err| {
        ExperimentError::Configuration(format!("can't open {}: {}", path.display(), err))
    })?;
    Array2::<f32>::read_npy(file).map_err(|err| {
        ExperimentError::Configuration(format!("can't read {}: {}", path.display(), err))
    })
}
