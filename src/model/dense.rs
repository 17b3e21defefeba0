//! Fully connected and structural layers.

use ndarray::{Array1, Array2, ArrayD, Axis, Ix1, Ix2, IxDyn};
use ndarray_rand::{rand_distr::Uniform, RandomExt};
use rand::Rng;
use rand_distr::Bernoulli;

use crate::{
    error::ExperimentError,
    model::{activation::Activation, optim::Adam, Layer},
};

/// A fully connected layer over `(batch, features)` inputs.
pub struct Dense {
    activation: Activation,
    weights: Array2<f32>,
    bias: Array1<f32>,
    weights_opt: Adam<Ix2>,
    bias_opt: Adam<Ix1>,
    input: Option<Array2<f32>>,
    output: Option<Array2<f32>>,
}

impl Dense {
    /// Create a layer with uniformly initialized weights and zero bias.
    pub fn new(in_features: usize, units: usize, activation: Activation) -> Self {
        let limit = (1.0 / in_features as f32).sqrt();
        let weights = Array2::random((in_features, units), Uniform::new(-limit, limit));
        let bias = Array1::zeros(units);
        let weights_opt = Adam::new(weights.raw_dim());
        let bias_opt = Adam::new(bias.raw_dim());
        Self {
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

impl Layer for Dense {
    fn name(&self) -> String {
        "dense".to_string()
    }

    fn forward(
        &mut self,
        input: &ArrayD<f32>,
        _training: bool,
    ) -> Result<ArrayD<f32>, ExperimentError> {
        let x = input
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| ExperimentError::ShapeMismatch {
                expected: vec![0, self.weights.nrows()],
                actual: input.shape().to_vec(),
            })?
            .to_owned();
        if x.ncols() != self.weights.nrows() {
            return Err(ExperimentError::ShapeMismatch {
                expected: vec![x.nrows(), self.weights.nrows()],
                actual: vec![x.nrows(), x.ncols()],
            });
        }
        let z = x.dot(&self.weights) + &self.bias;
        let y = z.mapv(|v| self.activation.apply(v));
        self.input = Some(x);
        self.output = Some(y.clone());
        Ok(y.into_dyn())
    }

    fn backward(&mut self, grad: &ArrayD<f32>) -> ArrayD<f32> {
        let dy = grad
            .view()
            .into_dimensionality::<Ix2>()
            .expect("gradient must match the dense output");
        let x = self.input.take().expect("forward must be called first");
        let y = self.output.take().expect("forward must be called first");
        let dz = &dy * &y.mapv(|v| self.activation.grad_from_output(v));
        let weights_grad = x.t().dot(&dz);
        let bias_grad = dz.sum_axis(Axis(0));
        let dx = dz.dot(&self.weights.t());
        self.weights_opt.step(&mut self.weights, &weights_grad);
        self.bias_opt.step(&mut self.bias, &bias_grad);
        dx.into_dyn()
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }
}

/// Inverted dropout: surviving activations are rescaled during training so
/// that inference needs no adjustment.
pub struct Dropout {
    rate: f32,
    distribution: Bernoulli,
    mask: Option<ArrayD<f32>>,
}

impl Dropout {
    /// Create a dropout layer. The rate must lie in `[0, 1)`.
    pub fn new(rate: f32) -> Result<Self, ExperimentError> {
        if !(0.0..1.0).contains(&rate) {
            return Err(ExperimentError::Configuration(format!(
                "dropout rate {} must be in [0, 1)",
                rate
            )));
        }
        let distribution = Bernoulli::new(f64::from(1.0 - rate)).map_err(|err| {
            ExperimentError::Configuration(format!("dropout rate {}: {}", rate, err))
        })?;
        Ok(Self {
            rate,
            distribution,
            mask: None,
        })
    }
}

impl Layer for Dropout {
    fn name(&self) -> String {
        "dropout".to_string()
    }

    fn forward(
        &mut self,
        input: &ArrayD<f32>,
        training: bool,
    ) -> Result<ArrayD<f32>, ExperimentError> {
        if !training || self.rate == 0.0 {
            self.mask = None;
            return Ok(input.clone());
        }
        let mut rng = rand::thread_rng();
        let scale = 1.0 / (1.0 - self.rate);
        let mask = ArrayD::from_shape_fn(input.raw_dim(), |_| {
            if rng.sample(self.distribution) {
                scale
            } else {
                0.0
            }
        });
        let out = input * &mask;
        self.mask = Some(mask);
        Ok(out)
    }

    fn backward(&mut self, grad: &ArrayD<f32>) -> ArrayD<f32> {
        match self.mask.take() {
            Some(mask) => grad * &mask,
            None => grad.clone(),
        }
    }
}

/// Collapse all element axes into a single feature axis.
pub struct Flatten {
    input_shape: Option<Vec<usize>>,
}

impl Flatten {
    /// Create a flattening layer.
    pub fn new() -> Self {
        Self { input_shape: None }
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for Flatten {
    fn name(&self) -> String {
        "flatten".to_string()
    }

    fn forward(
        &mut self,
        input: &ArrayD<f32>,
        _training: bool,
    ) -> Result<ArrayD<f32>, ExperimentError> {
        let shape = input.shape().to_vec();
        let batch = shape[0];
        let rest: usize = shape[1..].iter().product();
        let out = input
            .as_standard_layout()
            .into_owned()
            .into_shape(IxDyn(&[batch, rest]))
            .map_err(|_| ExperimentError::ShapeMismatch {
                expected: vec![batch, rest],
                actual: shape.clone(),
            })?;
        self.input_shape = Some(shape);
        Ok(out)
    }

    fn backward(&mut self, grad: &ArrayD<f32>) -> ArrayD<f32> {
        let shape = self.input_shape.take().expect("forward must be called first");
        grad.as_standard_layout()
            .into_owned()
            .into_shape(IxDyn(&shape))
            .expect("gradient must match the flattened output")
    }
}

/// Apply an inner layer independently to each subsequence.
///
/// An input shaped `(batch, steps, ...)` is folded into
/// `(batch * steps, ...)`, passed through the inner layer, and unfolded
/// back, so the inner layer never observes the subsequence axis.
pub struct TimeDistributed {
    inner: Box<dyn Layer>,
    folded: Option<(usize, usize)>,
}

impl TimeDistributed {
    /// Wrap a layer.
    pub fn new(inner: Box<dyn Layer>) -> Self {
        Self {
            inner,
            folded: None,
        }
    }
}

impl Layer for TimeDistributed {
    fn name(&self) -> String {
        format!("time_distributed({})", self.inner.name())
    }

    fn forward(
        &mut self,
        input: &ArrayD<f32>,
        training: bool,
    ) -> Result<ArrayD<f32>, ExperimentError> {
        let shape = input.shape().to_vec();
        if shape.len() < 2 {
            return Err(ExperimentError::ShapeMismatch {
                expected: vec![0, 0],
                actual: shape,
            });
        }
        let (batch, steps) = (shape[0], shape[1]);
        let mut folded_shape = vec![batch * steps];
        folded_shape.extend_from_slice(&shape[2..]);
        let folded = input
            .as_standard_layout()
            .into_owned()
            .into_shape(IxDyn(&folded_shape))
            .map_err(|_| ExperimentError::ShapeMismatch {
                expected: folded_shape.clone(),
                actual: shape.clone(),
            })?;
        let out = self.inner.forward(&folded, training)?;
        let mut unfolded_shape = vec![batch, steps];
        unfolded_shape.extend_from_slice(&out.shape()[1..]);
        let out = out
            .into_shape(IxDyn(&unfolded_shape))
            .expect("inner output must keep the folded batch axis");
        self.folded = Some((batch, steps));
        Ok(out)
    }

    fn backward(&mut self, grad: &ArrayD<f32>) -> ArrayD<f32> {
        let (batch, steps) = self.folded.take().expect("forward must be called first");
        let shape = grad.shape().to_vec();
        let mut folded_shape = vec![batch * steps];
        folded_shape.extend_from_slice(&shape[2..]);
        let folded = grad
            .as_standard_layout()
            .into_owned()
            .into_shape(IxDyn(&folded_shape))
            .expect("gradient must match the unfolded output");
        let dx = self.inner.backward(&folded);
        let mut unfolded_shape = vec![batch, steps];
        unfolded_shape.extend_from_slice(&dx.shape()[1..]);
        dx.into_shape(IxDyn(&unfolded_shape))
            .expect("inner gradient must keep the folded batch axis")
    }

    fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, Array3};

    use super::{Dense, Dropout, Flatten, TimeDistributed};
    use crate::model::{activation::Activation, Layer};

    #[test]
    fn dense_output_shape() {
        let mut dense = Dense::new(4, 7, Activation::Relu);
        let input = Array2::<f32>::zeros((3, 4)).into_dyn();
        let out = dense.forward(&input, true).unwrap();
        assert_eq!(out.shape(), &[3, 7]);
    }

    #[test]
    fn dense_rejects_wrong_width() {
        let mut dense = Dense::new(4, 7, Activation::Relu);
        let input = Array2::<f32>::zeros((3, 5)).into_dyn();
        assert!(dense.forward(&input, true).is_err());
    }

    #[test]
    fn dropout_is_identity_at_inference() {
        let mut dropout = Dropout::new(0.5).unwrap();
        let input = Array2::from_elem((4, 8), 1.5f32).into_dyn();
        let out = dropout.forward(&input, false).unwrap();
        assert_eq!(out, input);
        let dx = dropout.backward(&out);
        assert_eq!(dx, input);
    }

    #[test]
    fn dropout_masks_and_rescales_in_training() {
        let mut dropout = Dropout::new(0.5).unwrap();
        let input = Array2::from_elem((16, 16), 1.0f32).into_dyn();
        let out = dropout.forward(&input, true).unwrap();
        assert!(out.iter().all(|&v| v == 0.0 || (v - 2.0).abs() <= 1e-6));
    }

    #[test]
    fn invalid_dropout_rates_are_rejected() {
        assert!(Dropout::new(1.0).is_err());
        assert!(Dropout::new(-0.1).is_err());
        assert!(Dropout::new(0.0).is_ok());
    }

    #[test]
    fn flatten_round_trips() {
        let mut flatten = Flatten::new();
        let input = Array3::from_shape_vec((2, 3, 4), (0..24).map(|x| x as f32).collect())
            .unwrap()
            .into_dyn();
        let out = flatten.forward(&input, true).unwrap();
        assert_eq!(out.shape(), &[2, 12]);
        let dx = flatten.backward(&out);
        assert_eq!(dx, input);
    }

    #[test]
    fn time_distributed_folds_the_subsequence_axis() {
        let mut layer = TimeDistributed::new(Box::new(Flatten::new()));
        let input = Array3::from_shape_vec((2, 3, 4), (0..24).map(|x| x as f32).collect())
            .unwrap()
            .into_dyn();
        let out = layer.forward(&input, true).unwrap();
        assert_eq!(out.shape(), &[2, 3, 4]);
        let dx = layer.backward(&out);
        assert_eq!(dx, input);
    }

    #[test]
    fn time_distributed_applies_the_inner_layer_per_step() {
        let mut layer = TimeDistributed::new(Box::new(Dense::new(4, 2, Activation::Linear)));
        let input = Array3::<f32>::zeros((5, 3, 4)).into_dyn();
        let out = layer.forward(&input, true).unwrap();
        assert_eq!(out.shape(), &[5, 3, 2]);
        assert_eq!(layer.parameter_count(), 4 * 2 + 2);
    }
}
