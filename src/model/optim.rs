//! Parameter updates.

use ndarray::{Array, Dimension, Zip};

/// Adam state for a single parameter tensor.
///
/// Uses the framework defaults the original experiment relied on: learning
/// rate 1e-3, beta1 0.9, beta2 0.999, epsilon 1e-7. Each parameterized layer
/// owns one instance per parameter tensor.
#[derive(Debug, Clone)]
pub struct Adam<D: Dimension> {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    steps: i32,
    mean: Array<f32, D>,
    variance: Array<f32, D>,
}

impl<D: Dimension> Adam<D> {
    /// Create zeroed optimizer state for a parameter tensor of the given
    /// dimensions.
    pub fn new(dim: D) -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            steps: 0,
            mean: Array::zeros(dim.clone()),
            variance: Array::zeros(dim),
        }
    }

    /// Apply one bias-corrected Adam update to `param` given its gradient.
    pub fn step(&mut self, param: &mut Array<f32, D>, grad: &Array<f32, D>) {
        self.steps += 1;
        let beta1 = self.beta1;
        let beta2 = self.beta2;
        self.mean
            .zip_mut_with(grad, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        self.variance
            .zip_mut_with(grad, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);
        let correction1 = 1.0 - beta1.powi(self.steps);
        let correction2 = 1.0 - beta2.powi(self.steps);
        let learning_rate = self.learning_rate;
        let epsilon = self.epsilon;
        Zip::from(param)
            .and(&self.mean)
            .and(&self.variance)
            .for_each(|p, &m, &v| {
                let m_hat = m / correction1;
                let v_hat = v / correction2;
                *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
            });
    }
}
