//! Mini-batch training with binary cross-entropy.

use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use ndarray::{Array2, Array4, Axis, Ix2};
use rand::seq::SliceRandom;

use crate::{error::ExperimentError, model::Network};

/// Bounds applied to predictions before taking logarithms.
const PROBABILITY_CLAMP: (f32, f32) = (1e-7, 1.0 - 1e-7);

/// Per-epoch training and validation metrics, one entry per epoch.
#[derive(Debug, Clone, Default)]
pub struct History {
    /// Training loss.
    pub loss: Vec<f32>,
    /// Training accuracy.
    pub acc: Vec<f32>,
    /// Validation loss.
    pub val_loss: Vec<f32>,
    /// Validation accuracy.
    pub val_acc: Vec<f32>,
}

impl History {
    /// The names of the recorded metrics, in recording order.
    pub const KEYS: [&'static str; 4] = ["loss", "acc", "val_loss", "val_acc"];
}

/// Mean binary cross-entropy over all elements of a batch.
///
/// Predictions are clamped away from 0 and 1 so the logarithms stay finite.
pub fn binary_crossentropy(predictions: &Array2<f32>, targets: &Array2<f32>) -> f32 {
    let (lo, hi) = PROBABILITY_CLAMP;
    let mut total = 0.0;
    for (&p, &y) in predictions.iter().zip(targets.iter()) {
        let p = p.clamp(lo, hi);
        total -= y * p.ln() + (1.0 - y) * (1.0 - p).ln();
    }
    total / predictions.len() as f32
}

/// Gradient of [`binary_crossentropy`] with respect to the predictions.
pub fn binary_crossentropy_grad(predictions: &Array2<f32>, targets: &Array2<f32>) -> Array2<f32> {
    let (lo, hi) = PROBABILITY_CLAMP;
    let scale = 1.0 / predictions.len() as f32;
    let mut grad = predictions.clone();
    grad.zip_mut_with(targets, |p, &y| {
        let clamped = p.clamp(lo, hi);
        *p = scale * (-(y / clamped) + (1.0 - y) / (1.0 - clamped));
    });
    grad
}

/// Fraction of elements whose thresholded prediction matches the target.
pub fn binary_accuracy(predictions: &Array2<f32>, targets: &Array2<f32>) -> f32 {
    let correct = predictions
        .iter()
        .zip(targets.iter())
        .filter(|(&p, &y)| (p >= 0.5) == (y >= 0.5))
        .count();
    correct as f32 / predictions.len() as f32
}

/// Train the network, validating after every epoch.
///
/// Rows are shuffled once per epoch and consumed in batches of at most
/// `batch_size`; a short final batch is kept rather than dropped. Training
/// aborts with [`ExperimentError::Training`] if an epoch's loss stops being
/// finite.
pub fn fit(
    network: &mut Network,
    features: &Array4<f32>,
    labels: &Array2<f32>,
    val_features: &Array4<f32>,
    val_labels: &Array2<f32>,
    epochs: usize,
    batch_size: usize,
) -> Result<History, ExperimentError> {
    let rows = features.dim().0;
    if rows == 0 || batch_size == 0 {
        return Err(ExperimentError::Training(format!(
            "cannot train on {} rows with batch size {}",
            rows, batch_size
        )));
    }

    let mut history = History::default();
    let mut indices: Vec<usize> = (0..rows).collect();
    let mut rng = rand::thread_rng();
    let bar = ProgressBar::new(epochs as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{bar:40.cyan/blue} {pos:>5}/{len:5} epochs {msg}",
        )
        .expect("progress bar template is valid"),
    );

    for epoch in 0..epochs {
        indices.shuffle(&mut rng);
        let mut epoch_loss = 0.0;
        let mut epoch_acc = 0.0;
        for chunk in indices.chunks(batch_size) {
            let batch_x = features.select(Axis(0), chunk);
            let batch_y = labels.select(Axis(0), chunk);
            let predictions = network
                .forward(&batch_x.into_dyn(), true)?
                .into_dimensionality::<Ix2>()
                .map_err(|err| ExperimentError::Training(err.to_string()))?;
            let loss = binary_crossentropy(&predictions, &batch_y);
            let acc = binary_accuracy(&predictions, &batch_y);
            let grad = binary_crossentropy_grad(&predictions, &batch_y);
            network.backward(&grad.into_dyn());
            epoch_loss += loss * chunk.len() as f32;
            epoch_acc += acc * chunk.len() as f32;
        }
        epoch_loss /= rows as f32;
        epoch_acc /= rows as f32;
        if !epoch_loss.is_finite() {
            return Err(ExperimentError::Training(format!(
                "loss diverged at epoch {} ({})",
                epoch + 1,
                epoch_loss
            )));
        }

        let (val_loss, val_acc) = evaluate(network, val_features, val_labels, batch_size)?;
        debug!(
            "epoch {}: loss {:.4} acc {:.4} val_loss {:.4} val_acc {:.4}",
            epoch + 1,
            epoch_loss,
            epoch_acc,
            val_loss,
            val_acc
        );
        history.loss.push(epoch_loss);
        history.acc.push(epoch_acc);
        history.val_loss.push(val_loss);
        history.val_acc.push(val_acc);
        bar.set_message(format!("loss {:.4} val_loss {:.4}", epoch_loss, val_loss));
        bar.inc(1);
    }
    bar.finish();
    Ok(history)
}

/// Compute loss and accuracy in inference mode, batched to bound memory.
pub fn evaluate(
    network: &mut Network,
    features: &Array4<f32>,
    labels: &Array2<f32>,
    batch_size: usize,
) -> Result<(f32, f32), ExperimentError> {
    let rows = features.dim().0;
    if rows == 0 || batch_size == 0 {
        return Err(ExperimentError::Training(format!(
            "cannot evaluate on {} rows with batch size {}",
            rows, batch_size
        )));
    }
    let indices: Vec<usize> = (0..rows).collect();
    let mut total_loss = 0.0;
    let mut total_acc = 0.0;
    for chunk in indices.chunks(batch_size) {
        let batch_x = features.select(Axis(0), chunk);
        let batch_y = labels.select(Axis(0), chunk);
        let predictions = network
            .forward(&batch_x.into_dyn(), false)?
            .into_dimensionality::<Ix2>()
            .map_err(|err| ExperimentError::Training(err.to_string()))?;
        total_loss += binary_crossentropy(&predictions, &batch_y) * chunk.len() as f32;
        total_acc += binary_accuracy(&predictions, &batch_y) * chunk.len() as f32;
    }
    Ok((total_loss / rows as f32, total_acc / rows as f32))
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, Array4};

    use super::{binary_accuracy, binary_crossentropy, binary_crossentropy_grad, evaluate, fit};
    use crate::model::{activation::Activation, cnn_lstm, LayerSpec, Network};

    #[test]
    fn crossentropy_of_a_perfect_prediction_is_near_zero() {
        let predictions = Array2::from_shape_vec((2, 1), vec![1.0, 0.0]).unwrap();
        let targets = Array2::from_shape_vec((2, 1), vec![1.0, 0.0]).unwrap();
        assert!(binary_crossentropy(&predictions, &targets) < 1e-5);
    }

    #[test]
    fn crossentropy_matches_a_hand_computed_value() {
        let predictions = Array2::from_shape_vec((1, 2), vec![0.8, 0.3]).unwrap();
        let targets = Array2::from_shape_vec((1, 2), vec![1.0, 0.0]).unwrap();
        let expected = (-(0.8f32.ln()) - (0.7f32.ln())) / 2.0;
        assert!((binary_crossentropy(&predictions, &targets) - expected).abs() < 1e-6);
    }

    #[test]
    fn crossentropy_grad_points_toward_the_target() {
        let predictions = Array2::from_shape_vec((1, 2), vec![0.8, 0.3]).unwrap();
        let targets = Array2::from_shape_vec((1, 2), vec![1.0, 0.0]).unwrap();
        let grad = binary_crossentropy_grad(&predictions, &targets);
        // Underestimated positive: negative gradient. Overestimated negative:
        // positive gradient.
        assert!(grad[[0, 0]] < 0.0);
        assert!(grad[[0, 1]] > 0.0);
    }

    #[test]
    fn accuracy_thresholds_at_a_half() {
        let predictions = Array2::from_shape_vec((2, 2), vec![0.9, 0.4, 0.5, 0.1]).unwrap();
        let targets = Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!((binary_accuracy(&predictions, &targets) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn fit_records_one_entry_per_epoch() {
        let mut network = Network::build(&cnn_lstm(2), &[2, 5, 3]).unwrap();
        let features = Array4::from_elem((8, 2, 5, 3), 0.1f32);
        let labels = Array2::from_elem((8, 2), 1.0f32);
        let val_features = Array4::from_elem((4, 2, 5, 3), 0.1f32);
        let val_labels = Array2::from_elem((4, 2), 1.0f32);
        let history = fit(
            &mut network,
            &features,
            &labels,
            &val_features,
            &val_labels,
            3,
            4,
        )
        .unwrap();
        assert_eq!(history.loss.len(), 3);
        assert_eq!(history.acc.len(), 3);
        assert_eq!(history.val_loss.len(), 3);
        assert_eq!(history.val_acc.len(), 3);
        assert!(history.loss.iter().all(|l| l.is_finite()));
    }

    #[test]
    fn fit_reduces_the_loss_on_a_separable_problem() {
        let specs = vec![
            LayerSpec::Flatten,
            LayerSpec::Dense {
                units: 8,
                activation: Activation::Relu,
            },
            LayerSpec::Dense {
                units: 1,
                activation: Activation::Sigmoid,
            },
        ];
        let mut network = Network::build(&specs, &[1, 1, 2]).unwrap();
        // AND gate replicated over the batch.
        let mut features = Array4::<f32>::zeros((16, 1, 1, 2));
        let mut labels = Array2::<f32>::zeros((16, 1));
        for i in 0..16 {
            let a = (i % 4 / 2) as f32;
            let b = (i % 2) as f32;
            features[[i, 0, 0, 0]] = a;
            features[[i, 0, 0, 1]] = b;
            labels[[i, 0]] = a * b;
        }
        let history = fit(
            &mut network,
            &features,
            &labels,
            &features,
            &labels,
            200,
            16,
        )
        .unwrap();
        let first = history.loss[0];
        let last = *history.loss.last().unwrap();
        assert!(last < first, "loss did not improve: {} -> {}", first, last);
    }

    #[test]
    fn evaluate_matches_the_loss_functions() {
        let specs = vec![LayerSpec::Flatten];
        let mut network = Network::build(&specs, &[1, 1, 1]).unwrap();
        let features = Array4::from_elem((4, 1, 1, 1), 0.5f32);
        let labels = Array2::from_elem((4, 1), 1.0f32);
        let (loss, acc) = evaluate(&mut network, &features, &labels, 2).unwrap();
        assert!((loss - (-(0.5f32.ln()))).abs() < 1e-6);
        assert!((acc - 1.0).abs() < 1e-6);
    }

    #[test]
    fn fit_rejects_an_empty_batch_size() {
        let mut network = Network::build(&cnn_lstm(1), &[2, 5, 3]).unwrap();
        let features = Array4::from_elem((4, 2, 5, 3), 0.1f32);
        let labels = Array2::from_elem((4, 1), 1.0f32);
        assert!(fit(&mut network, &features, &labels, &features, &labels, 1, 0).is_err());
    }
}
