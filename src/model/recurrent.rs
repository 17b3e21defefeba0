//! Recurrent layers.

use ndarray::{s, Array1, Array2, Array3, ArrayD, Axis, Ix1, Ix2, Ix3};
use ndarray_rand::{rand_distr::Uniform, RandomExt};

use crate::{
    error::ExperimentError,
    model::{optim::Adam, Layer},
};

/// Weights and optimizer state for one LSTM gate.
struct Gate {
    input_weights: Array2<f32>,
    hidden_weights: Array2<f32>,
    bias: Array1<f32>,
    input_opt: Adam<Ix2>,
    hidden_opt: Adam<Ix2>,
    bias_opt: Adam<Ix1>,
}

impl Gate {
    fn new(input_size: usize, units: usize, bias_init: f32) -> Self {
        let limit = (1.0 / units as f32).sqrt();
        let input_weights = Array2::random((input_size, units), Uniform::new(-limit, limit));
        let hidden_weights = Array2::random((units, units), Uniform::new(-limit, limit));
        let bias = Array1::from_elem(units, bias_init);
        let input_opt = Adam::new(input_weights.raw_dim());
        let hidden_opt = Adam::new(hidden_weights.raw_dim());
        let bias_opt = Adam::new(bias.raw_dim());
        Self {
            input_weights,
            hidden_weights,
            bias,
            input_opt,
            hidden_opt,
            bias_opt,
        }
    }

    /// The gate's pre-activation: `x W_x + h W_h + b`.
    fn linear(&self, x: &Array2<f32>, h: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.input_weights) + h.dot(&self.hidden_weights) + &self.bias
    }

    fn len(&self) -> usize {
        self.input_weights.len() + self.hidden_weights.len() + self.bias.len()
    }
}

/// Per-gate gradient accumulators mirroring [`Gate`].
struct GateGrads {
    input_weights: Array2<f32>,
    hidden_weights: Array2<f32>,
    bias: Array1<f32>,
}

impl GateGrads {
    fn zeros(gate: &Gate) -> Self {
        Self {
            input_weights: Array2::zeros(gate.input_weights.raw_dim()),
            hidden_weights: Array2::zeros(gate.hidden_weights.raw_dim()),
            bias: Array1::zeros(gate.bias.raw_dim()),
        }
    }

    fn accumulate(&mut self, x: &Array2<f32>, h_prev: &Array2<f32>, dz: &Array2<f32>) {
        self.input_weights = &self.input_weights + &x.t().dot(dz);
        self.hidden_weights = &self.hidden_weights + &h_prev.t().dot(dz);
        self.bias = &self.bias + &dz.sum_axis(Axis(0));
    }
}

/// Activations cached for one timestep of the forward pass.
struct StepCache {
    x: Array2<f32>,
    h_prev: Array2<f32>,
    c_prev: Array2<f32>,
    input_gate: Array2<f32>,
    forget_gate: Array2<f32>,
    cell_candidate: Array2<f32>,
    output_gate: Array2<f32>,
    tanh_cell: Array2<f32>,
}

/// A single-layer LSTM that consumes a `(batch, steps, features)` sequence
/// and returns its final hidden state, shaped `(batch, units)`.
pub struct Lstm {
    input_size: usize,
    units: usize,
    input_gate: Gate,
    forget_gate: Gate,
    cell_gate: Gate,
    output_gate: Gate,
    cache: Option<Vec<StepCache>>,
}

impl Lstm {
    /// Create an LSTM with uniformly initialized weights.
    ///
    /// The forget-gate bias starts at 1.0 so early training does not
    /// immediately discard cell state.
    pub fn new(input_size: usize, units: usize) -> Self {
        Self {
            input_size,
            units,
            input_gate: Gate::new(input_size, units, 0.0),
            forget_gate: Gate::new(input_size, units, 1.0),
            cell_gate: Gate::new(input_size, units, 0.0),
            output_gate: Gate::new(input_size, units, 0.0),
            cache: None,
        }
    }
}

fn sigmoid(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

fn tanh(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(f32::tanh)
}

impl Layer for Lstm {
    fn name(&self) -> String {
        "lstm".to_string()
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
                expected: vec![0, 0, self.input_size],
                actual: input.shape().to_vec(),
            })?;
        let (batch, steps, features) = x.dim();
        if features != self.input_size || steps == 0 {
            return Err(ExperimentError::ShapeMismatch {
                expected: vec![batch, 1, self.input_size],
                actual: vec![batch, steps, features],
            });
        }

        let mut h = Array2::<f32>::zeros((batch, self.units));
        let mut c = Array2::<f32>::zeros((batch, self.units));
        let mut cache = Vec::with_capacity(steps);
        for t in 0..steps {
            let x_t = x.slice(s![.., t, ..]).to_owned();
            let input_gate = sigmoid(&self.input_gate.linear(&x_t, &h));
            let forget_gate = sigmoid(&self.forget_gate.linear(&x_t, &h));
            let cell_candidate = tanh(&self.cell_gate.linear(&x_t, &h));
            let output_gate = sigmoid(&self.output_gate.linear(&x_t, &h));
            let c_next = &forget_gate * &c + &input_gate * &cell_candidate;
            let tanh_cell = tanh(&c_next);
            let h_next = &output_gate * &tanh_cell;
            cache.push(StepCache {
                x: x_t,
                h_prev: h,
                c_prev: c,
                input_gate,
                forget_gate,
                cell_candidate,
                output_gate,
                tanh_cell,
            });
            h = h_next;
            c = c_next;
        }
        self.cache = Some(cache);
        Ok(h.into_dyn())
    }

    fn backward(&mut self, grad: &ArrayD<f32>) -> ArrayD<f32> {
        let cache = self.cache.take().expect("forward must be called first");
        let mut dh = grad
            .view()
            .into_dimensionality::<Ix2>()
            .expect("gradient must match the final hidden state")
            .to_owned();
        let steps = cache.len();
        let batch = dh.nrows();

        let mut input_grads = GateGrads::zeros(&self.input_gate);
        let mut forget_grads = GateGrads::zeros(&self.forget_gate);
        let mut cell_grads = GateGrads::zeros(&self.cell_gate);
        let mut output_grads = GateGrads::zeros(&self.output_gate);
        let mut dx = Array3::<f32>::zeros((batch, steps, self.input_size));
        let mut dc = Array2::<f32>::zeros((batch, self.units));

        for (t, step) in cache.iter().enumerate().rev() {
            // Only the last timestep receives an external hidden-state
            // gradient; earlier steps get it through the recurrence.
            let d_output = &dh * &step.tanh_cell;
            dc = &dc + &(&dh * &step.output_gate * &step.tanh_cell.mapv(|v| 1.0 - v * v));
            let d_forget = &dc * &step.c_prev;
            let d_input = &dc * &step.cell_candidate;
            let d_candidate = &dc * &step.input_gate;

            let dz_output = &d_output * &step.output_gate.mapv(|v| v * (1.0 - v));
            let dz_forget = &d_forget * &step.forget_gate.mapv(|v| v * (1.0 - v));
            let dz_input = &d_input * &step.input_gate.mapv(|v| v * (1.0 - v));
            let dz_candidate = &d_candidate * &step.cell_candidate.mapv(|v| 1.0 - v * v);

            input_grads.accumulate(&step.x, &step.h_prev, &dz_input);
            forget_grads.accumulate(&step.x, &step.h_prev, &dz_forget);
            cell_grads.accumulate(&step.x, &step.h_prev, &dz_candidate);
            output_grads.accumulate(&step.x, &step.h_prev, &dz_output);

            let dx_t = dz_input.dot(&self.input_gate.input_weights.t())
                + dz_forget.dot(&self.forget_gate.input_weights.t())
                + dz_candidate.dot(&self.cell_gate.input_weights.t())
                + dz_output.dot(&self.output_gate.input_weights.t());
            dx.slice_mut(s![.., t, ..]).assign(&dx_t);

            dh = dz_input.dot(&self.input_gate.hidden_weights.t())
                + dz_forget.dot(&self.forget_gate.hidden_weights.t())
                + dz_candidate.dot(&self.cell_gate.hidden_weights.t())
                + dz_output.dot(&self.output_gate.hidden_weights.t());
            dc = &dc * &step.forget_gate;
        }

        for (gate, grads) in [
            (&mut self.input_gate, &input_grads),
            (&mut self.forget_gate, &forget_grads),
            (&mut self.cell_gate, &cell_grads),
            (&mut self.output_gate, &output_grads),
        ] {
            gate.input_opt
                .step(&mut gate.input_weights, &grads.input_weights);
            gate.hidden_opt
                .step(&mut gate.hidden_weights, &grads.hidden_weights);
            gate.bias_opt.step(&mut gate.bias, &grads.bias);
        }
        dx.into_dyn()
    }

    fn parameter_count(&self) -> usize {
        self.input_gate.len() + self.forget_gate.len() + self.cell_gate.len()
            + self.output_gate.len()
    }
}
