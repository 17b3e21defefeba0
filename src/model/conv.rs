//! 1-D convolution and pooling over the temporal axis.

use ndarray::{Array1, Array3, ArrayD, Ix1, Ix3};
use ndarray_rand::{rand_distr::Uniform, RandomExt};

use crate::{
    error::ExperimentError,
    model::{activation::Activation, optim::Adam, Layer},
};

/// A 1-D convolution with valid padding and unit stride.
///
/// Inputs are shaped `(batch, length, channels)`; outputs are
/// `(batch, length - kernel_size + 1, filters)`.
pub struct Conv1d {
    kernel_size: usize,
    activation: Activation,
    weights: Array3<f32>,
    bias: Array1<f32>,
    weights_opt: Adam<Ix3>,
    bias_opt: Adam<Ix1>,
    input: Option<Array3<f32>>,
    output: Option<Array3<f32>>,
}

impl Conv1d {
    /// Create a convolution with uniformly initialized weights and zero bias.
    pub fn new(
        in_channels: usize,
        filters: usize,
        kernel_size: usize,
        activation: Activation,
    ) -> Self {
        let limit = (1.0 / (kernel_size * in_channels) as f32).sqrt();
        let weights = Array3::random(
            (kernel_size, in_channels, filters),
            Uniform::new(-limit, limit),
        );
        let bias = Array1::zeros(filters);
        let weights_opt = Adam::new(weights.raw_dim());
        let bias_opt = Adam::new(bias.raw_dim());
        Self {
            kernel_size,
            activation,
            weights,
            bias,
            weights_opt,
            bias_opt,
            input: None,
            output: None,
        }
    }
}

impl Layer for Conv1d {
    fn name(&self) -> String {
        "conv1d".to_string()
    }

    fn forward(
        &mut self,
        input: &ArrayD<f32>,
        _training: bool,
    ) -> Result<ArrayD<f32>, ExperimentError> {
        let x = input
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|_| ExperimentError::ShapeMismatch {
                expected: vec![0, 0, 0],
                actual: input.shape().to_vec(),
            })?
            .to_owned();
        let (batch, length, channels) = x.dim();
        let filters = self.bias.len();
        if length < self.kernel_size || channels != self.weights.dim().1 {
            return Err(ExperimentError::ShapeMismatch {
                expected: vec![batch, self.kernel_size, self.weights.dim().1],
                actual: vec![batch, length, channels],
            });
        }
        let out_length = length - self.kernel_size + 1;
        let mut out = Array3::zeros((batch, out_length, filters));
        for b in 0..batch {
            for t in 0..out_length {
                for j in 0..filters {
                    let mut acc = self.bias[j];
                    for k in 0..self.kernel_size {
                        for c in 0..channels {
                            acc += x[[b, t + k, c]] * self.weights[[k, c, j]];
                        }
                    }
                    out[[b, t, j]] = self.activation.apply(acc);
                }
            }
        }
        self.input = Some(x);
        self.output = Some(out.clone());
        Ok(out.into_dyn())
    }

    fn backward(&mut self, grad: &ArrayD<f32>) -> ArrayD<f32> {
        let dy = grad
            .view()
            .into_dimensionality::<Ix3>()
            .expect("gradient must match the convolution output");
        let x = self.input.take().expect("forward must be called first");
        let y = self.output.take().expect("forward must be called first");
        let (batch, length, channels) = x.dim();
        let filters = self.bias.len();
        let out_length = length - self.kernel_size + 1;

        let mut weights_grad = Array3::<f32>::zeros(self.weights.raw_dim());
        let mut bias_grad = Array1::<f32>::zeros(filters);
        let mut dx = Array3::<f32>::zeros((batch, length, channels));
        for b in 0..batch {
            for t in 0..out_length {
                for j in 0..filters {
                    let dz = dy[[b, t, j]] * self.activation.grad_from_output(y[[b, t, j]]);
                    if dz == 0.0 {
                        continue;
                    }
                    bias_grad[j] += dz;
                    for k in 0..self.kernel_size {
                        for c in 0..channels {
                            weights_grad[[k, c, j]] += x[[b, t + k, c]] * dz;
                            dx[[b, t + k, c]] += self.weights[[k, c, j]] * dz;
                        }
                    }
                }
            }
        }
        self.weights_opt.step(&mut self.weights, &weights_grad);
        self.bias_opt.step(&mut self.bias, &bias_grad);
        dx.into_dyn()
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }
}

/// Max-pooling over the temporal axis.
///
/// A pool size of 1 reduces to the identity; the experiment's architecture
/// keeps such a layer for symmetry with larger configurations.
pub struct MaxPool1d {
    pool_size: usize,
    input_shape: Option<(usize, usize, usize)>,
    switches: Option<Array3<usize>>,
}

impl MaxPool1d {
    /// Create a pooling layer with the given window width.
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            input_shape: None,
            switches: None,
        }
    }
}

impl Layer for MaxPool1d {
    fn name(&self) -> String {
        "max_pooling1d".to_string()
    }

    fn forward(
        &mut self,
        input: &ArrayD<f32>,
        _training: bool,
    ) -> Result<ArrayD<f32>, ExperimentError> {
        let x = input
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|_| ExperimentError::ShapeMismatch {
                expected: vec![0, 0, 0],
                actual: input.shape().to_vec(),
            })?;
        let (batch, length, channels) = x.dim();
        if length < self.pool_size {
            return Err(ExperimentError::ShapeMismatch {
                expected: vec![batch, self.pool_size, channels],
                actual: vec![batch, length, channels],
            });
        }
        let out_length = length / self.pool_size;
        let mut out = Array3::zeros((batch, out_length, channels));
        let mut switches = Array3::zeros((batch, out_length, channels));
        for b in 0..batch {
            for t in 0..out_length {
                for c in 0..channels {
                    let start = t * self.pool_size;
                    let mut best = start;
                    for k in start + 1..start + self.pool_size {
                        if x[[b, k, c]] > x[[b, best, c]] {
                            best = k;
                        }
                    }
                    out[[b, t, c]] = x[[b, best, c]];
                    switches[[b, t, c]] = best;
                }
            }
        }
        self.input_shape = Some((batch, length, channels));
        self.switches = Some(switches);
        Ok(out.into_dyn())
    }

    fn backward(&mut self, grad: &ArrayD<f32>) -> ArrayD<f32> {
        let dy = grad
            .view()
            .into_dimensionality::<Ix3>()
            .expect("gradient must match the pooling output");
        let (batch, length, channels) = self.input_shape.take().expect("forward must be called first");
        let switches = self.switches.take().expect("forward must be called first");
        let mut dx = Array3::<f32>::zeros((batch, length, channels));
        for b in 0..batch {
            for t in 0..dy.dim().1 {
                for c in 0..channels {
                    dx[[b, switches[[b, t, c]], c]] += dy[[b, t, c]];
                }
            }
        }
        dx.into_dyn()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array3, Array4};

    use super::{Conv1d, MaxPool1d};
    use crate::model::{activation::Activation, Layer};

    #[test]
    fn conv_output_shape() {
        let mut conv = Conv1d::new(10, 64, 3, Activation::Relu);
        let input = Array3::<f32>::zeros((2, 5, 10)).into_dyn();
        let out = conv.forward(&input, true).unwrap();
        assert_eq!(out.shape(), &[2, 3, 64]);
    }

    #[test]
    fn conv_rejects_short_inputs() {
        let mut conv = Conv1d::new(10, 64, 3, Activation::Relu);
        let input = Array3::<f32>::zeros((2, 2, 10)).into_dyn();
        assert!(conv.forward(&input, true).is_err());
    }

    #[test]
    fn conv_rejects_wrong_rank() {
        let mut conv = Conv1d::new(10, 64, 3, Activation::Relu);
        let input = Array4::<f32>::zeros((2, 6, 5, 10)).into_dyn();
        assert!(conv.forward(&input, true).is_err());
    }

    #[test]
    fn conv_backward_preserves_input_shape() {
        let mut conv = Conv1d::new(4, 8, 3, Activation::Relu);
        let input = Array3::<f32>::from_elem((2, 5, 4), 0.5).into_dyn();
        let out = conv.forward(&input, true).unwrap();
        let dx = conv.backward(&out.mapv(|_| 1.0));
        assert_eq!(dx.shape(), input.shape());
    }

    #[test]
    fn pool_size_one_is_the_identity() {
        let mut pool = MaxPool1d::new(1);
        let input = Array3::from_shape_vec((1, 3, 2), vec![1.0, -2.0, 3.0, 4.0, -5.0, 6.0])
            .unwrap()
            .into_dyn();
        let out = pool.forward(&input, true).unwrap();
        assert_eq!(out, input);
        let dx = pool.backward(&out);
        assert_eq!(dx, input);
    }

    #[test]
    fn pool_picks_the_window_maximum() {
        let mut pool = MaxPool1d::new(2);
        let input = Array3::from_shape_vec((1, 4, 1), vec![1.0, 3.0, -1.0, -2.0])
            .unwrap()
            .into_dyn();
        let out = pool.forward(&input, true).unwrap();
        assert_eq!(out.shape(), &[1, 2, 1]);
        assert_eq!(out[[0, 0, 0]], 3.0);
        assert_eq!(out[[0, 1, 0]], -1.0);
        let dy = out.mapv(|_| 1.0);
        let dx = pool.backward(&dy);
        assert_eq!(dx[[0, 0, 0]], 0.0);
        assert_eq!(dx[[0, 1, 0]], 1.0);
        assert_eq!(dx[[0, 2, 0]], 1.0);
        assert_eq!(dx[[0, 3, 0]], 0.0);
    }
}
