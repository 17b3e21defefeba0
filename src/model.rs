//! Model definition: declarative layer descriptors and a generic network builder.
//!
//! The architecture is expressed as an ordered list of [`LayerSpec`]s instead
//! of an imperative construction sequence. [`Network::build`] consumes the
//! list, propagates the per-sample element shape (the batch axis excluded)
//! through every descriptor, and instantiates the layers; any incompatibility
//! between the descriptors and the prepared tensors therefore surfaces as a
//! shape mismatch before training starts.

use ndarray::ArrayD;

use crate::error::ExperimentError;

pub mod activation;
pub mod conv;
pub mod dense;
pub mod optim;
pub mod recurrent;

use activation::Activation;
use conv::{Conv1d, MaxPool1d};
use dense::{Dense, Dropout, Flatten, TimeDistributed};
use recurrent::Lstm;

/// A single transformation in a feed-forward stack.
///
/// `backward` consumes the gradient of the loss with respect to the layer's
/// output, applies the parameter update in place, and returns the gradient
/// with respect to the layer's input. It must be called after `forward` on
/// the same batch.
pub trait Layer {
    /// The layer's name, for model summaries.
    fn name(&self) -> String;

    /// Apply the layer to a batch of inputs.
    fn forward(
        &mut self,
        input: &ArrayD<f32>,
        training: bool,
    ) -> Result<ArrayD<f32>, ExperimentError>;

    /// Propagate the output gradient and update the layer's parameters.
    fn backward(&mut self, grad: &ArrayD<f32>) -> ArrayD<f32>;

    /// The number of learnable parameters the layer holds.
    fn parameter_count(&self) -> usize {
        0
    }
}

/// A declarative description of one layer.
#[derive(Debug, Clone)]
pub enum LayerSpec {
    /// Apply the inner layer independently to each subsequence along the
    /// leading element axis.
    TimeDistributed(Box<LayerSpec>),
    /// A 1-D convolution over the temporal axis with valid padding.
    Conv1d {
        /// Number of output channels.
        filters: usize,
        /// Width of the convolution window.
        kernel_size: usize,
        /// Activation applied to the convolution output.
        activation: Activation,
    },
    /// Max-pooling over the temporal axis.
    MaxPool1d {
        /// Width of the pooling window.
        pool_size: usize,
    },
    /// Randomly zero inputs during training, rescaling the survivors.
    Dropout {
        /// Fraction of inputs to drop, in `[0, 1)`.
        rate: f32,
    },
    /// Collapse all element axes into one.
    Flatten,
    /// A recurrent layer returning its final hidden state.
    Lstm {
        /// Size of the hidden state.
        units: usize,
    },
    /// A fully connected layer.
    Dense {
        /// Number of output units.
        units: usize,
        /// Activation applied to the affine output.
        activation: Activation,
    },
}

impl LayerSpec {
    /// Instantiate the layer for the given input element shape, returning it
    /// together with its output element shape.
    fn build(&self, input: &[usize]) -> Result<(Box<dyn Layer>, Vec<usize>), ExperimentError> {
        match self {
            Self::TimeDistributed(inner) => {
                let (steps, rest) = input.split_first().ok_or_else(|| mismatch(&[1], input))?;
                let (layer, inner_out) = inner.build(rest)?;
                let mut output = vec![*steps];
                output.extend_from_slice(&inner_out);
                Ok((Box::new(TimeDistributed::new(layer)), output))
            }
            Self::Conv1d {
                filters,
                kernel_size,
                activation,
            } => {
                let &[length, channels] = input else {
                    return Err(mismatch(&[0, 0], input));
                };
                if *kernel_size == 0 || *filters == 0 || length < *kernel_size {
                    return Err(mismatch(&[*kernel_size, channels], input));
                }
                let layer = Conv1d::new(channels, *filters, *kernel_size, *activation);
                Ok((Box::new(layer), vec![length - kernel_size + 1, *filters]))
            }
            Self::MaxPool1d { pool_size } => {
                let &[length, channels] = input else {
                    return Err(mismatch(&[0, 0], input));
                };
                if *pool_size == 0 || length < *pool_size {
                    return Err(mismatch(&[*pool_size, channels], input));
                }
                let layer = MaxPool1d::new(*pool_size);
                Ok((Box::new(layer), vec![length / pool_size, channels]))
            }
            Self::Dropout { rate } => {
                let layer = Dropout::new(*rate)?;
                Ok((Box::new(layer), input.to_vec()))
            }
            Self::Flatten => {
                if input.is_empty() {
                    return Err(mismatch(&[1], input));
                }
                Ok((Box::new(Flatten::new()), vec![input.iter().product()]))
            }
            Self::Lstm { units } => {
                let &[steps, features] = input else {
                    return Err(mismatch(&[0, 0], input));
                };
                if *units == 0 || steps == 0 {
                    return Err(mismatch(&[1, features], input));
                }
                let layer = Lstm::new(features, *units);
                Ok((Box::new(layer), vec![*units]))
            }
            Self::Dense { units, activation } => {
                let &[features] = input else {
                    return Err(mismatch(&[0], input));
                };
                if *units == 0 {
                    return Err(mismatch(&[1], &[features]));
                }
                let layer = Dense::new(features, *units, *activation);
                Ok((Box::new(layer), vec![*units]))
            }
        }
    }
}

fn mismatch(expected: &[usize], actual: &[usize]) -> ExperimentError {
    ExperimentError::ShapeMismatch {
        expected: expected.to_vec(),
        actual: actual.to_vec(),
    }
}

/// The fixed CNN-LSTM architecture of the experiment.
///
/// Two stacked time-distributed 1-D convolutions extract per-subsequence
/// embeddings, an LSTM consumes the resulting sequence, and a sigmoid output
/// head supports multi-label classification. The pool size of 1 makes the
/// max-pooling step a no-op; it is retained for architectural symmetry.
pub fn cnn_lstm(n_outputs: usize) -> Vec<LayerSpec> {
    vec![
        LayerSpec::TimeDistributed(Box::new(LayerSpec::Conv1d {
            filters: 64,
            kernel_size: 3,
            activation: Activation::Relu,
        })),
        LayerSpec::TimeDistributed(Box::new(LayerSpec::Conv1d {
            filters: 64,
            kernel_size: 3,
            activation: Activation::Relu,
        })),
        LayerSpec::TimeDistributed(Box::new(LayerSpec::Dropout { rate: 0.5 })),
        LayerSpec::TimeDistributed(Box::new(LayerSpec::MaxPool1d { pool_size: 1 })),
        LayerSpec::TimeDistributed(Box::new(LayerSpec::Flatten)),
        LayerSpec::Lstm { units: 100 },
        LayerSpec::Dropout { rate: 0.5 },
        LayerSpec::Dense {
            units: 100,
            activation: Activation::Relu,
        },
        LayerSpec::Dense {
            units: n_outputs,
            activation: Activation::Sigmoid,
        },
    ]
}

/// A feed-forward stack of layers built from a list of descriptors.
pub struct Network {
    layers: Vec<Box<dyn Layer>>,
    shapes: Vec<Vec<usize>>,
    output_shape: Vec<usize>,
}

impl Network {
    /// Build a network from layer descriptors for the given input element
    /// shape (excluding the batch axis).
    pub fn build(specs: &[LayerSpec], input_shape: &[usize]) -> Result<Self, ExperimentError> {
        let mut layers = Vec::with_capacity(specs.len());
        let mut shapes = Vec::with_capacity(specs.len());
        let mut shape = input_shape.to_vec();
        for spec in specs {
            let (layer, output) = spec.build(&shape)?;
            layers.push(layer);
            shapes.push(output.clone());
            shape = output;
        }
        Ok(Self {
            layers,
            shapes,
            output_shape: shape,
        })
    }

    /// The element shape of the network's output.
    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    /// Apply the network to a batch of inputs.
    pub fn forward(
        &mut self,
        input: &ArrayD<f32>,
        training: bool,
    ) -> Result<ArrayD<f32>, ExperimentError> {
        let mut out = input.clone();
        for layer in &mut self.layers {
            out = layer.forward(&out, training)?;
        }
        Ok(out)
    }

    /// Backpropagate the output gradient through every layer, updating all
    /// parameters in place.
    pub fn backward(&mut self, grad: &ArrayD<f32>) {
        let mut grad = grad.clone();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad);
        }
    }

    /// The total number of learnable parameters.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.parameter_count()).sum()
    }

    /// A per-layer description of the network, one line per layer with the
    /// output element shape and parameter count.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:<32} {:<16} {:>10}\n",
            "layer", "output shape", "params"
        ));
        for (layer, shape) in self.layers.iter().zip(&self.shapes) {
            out.push_str(&format!(
                "{:<32} {:<16} {:>10}\n",
                layer.name(),
                format!("{:?}", shape),
                layer.parameter_count()
            ));
        }
        out.push_str(&format!("total params: {}", self.parameter_count()));
        out
    }
}

#[cfg(test)]
mod tests {
    use ndarray::ArrayD;

    use super::{cnn_lstm, Activation, LayerSpec, Network};
    use crate::error::ExperimentError;

    #[test]
    fn builds_the_fixed_architecture() {
        let network = Network::build(&cnn_lstm(5), &[6, 5, 10]).unwrap();
        assert_eq!(network.output_shape(), &[5]);
        // conv1: 3*10*64 + 64, conv2: 3*64*64 + 64,
        // lstm: 4 * (64*100 + 100*100 + 100), dense: 100*100 + 100, out: 100*5 + 5
        let expected = (3 * 10 * 64 + 64)
            + (3 * 64 * 64 + 64)
            + 4 * (64 * 100 + 100 * 100 + 100)
            + (100 * 100 + 100)
            + (100 * 5 + 5);
        assert_eq!(network.parameter_count(), expected);
    }

    #[test]
    fn propagates_intermediate_shapes() {
        let mut network = Network::build(&cnn_lstm(3), &[6, 5, 10]).unwrap();
        let input = ArrayD::zeros(ndarray::IxDyn(&[4, 6, 5, 10]));
        let output = network.forward(&input, false).unwrap();
        assert_eq!(output.shape(), &[4, 3]);
    }

    #[test]
    fn summary_lists_every_layer() {
        let network = Network::build(&cnn_lstm(5), &[6, 5, 10]).unwrap();
        let summary = network.summary();
        assert_eq!(summary.lines().count(), 1 + 9 + 1);
        assert!(summary.contains("lstm"));
        assert!(summary.contains("total params"));
    }

    #[test]
    fn rejects_too_short_subsequences() {
        // kernel size 3 cannot slide over a length-2 window
        let result = Network::build(&cnn_lstm(5), &[6, 2, 10]);
        assert!(matches!(
            result.map(|_| ()),
            Err(ExperimentError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_invalid_dropout_rate() {
        let specs = vec![LayerSpec::Dropout { rate: 1.0 }];
        assert!(Network::build(&specs, &[4]).is_err());
    }

    #[test]
    fn custom_stacks_are_buildable() {
        let specs = vec![
            LayerSpec::Dense {
                units: 4,
                activation: Activation::Relu,
            },
            LayerSpec::Dense {
                units: 1,
                activation: Activation::Sigmoid,
            },
        ];
        let network = Network::build(&specs, &[2]).unwrap();
        assert_eq!(network.output_shape(), &[1]);
        assert_eq!(network.parameter_count(), 2 * 4 + 4 + 4 + 1);
    }
}
