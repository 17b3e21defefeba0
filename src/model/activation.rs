//! Element-wise nonlinearities.

use serde::{Deserialize, Serialize};

/// An element-wise activation function.
///
/// Derivatives are computed from the activation's *output*, which every
/// supported function permits; layers therefore only need to cache their
/// post-activation values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    /// The identity function.
    Linear,
    /// `max(0, x)`.
    Relu,
    /// `1 / (1 + exp(-x))`.
    Sigmoid,
    /// The hyperbolic tangent.
    Tanh,
}

impl Activation {
    /// Apply the activation to a single element.
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Self::Linear => x,
            Self::Relu => x.max(0.0),
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
        }
    }

    /// The derivative of the activation at the point whose *output* is `y`.
    pub fn grad_from_output(self, y: f32) -> f32 {
        match self {
            Self::Linear => 1.0,
            Self::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Sigmoid => y * (1.0 - y),
            Self::Tanh => 1.0 - y * y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Activation;

    #[test]
    fn sigmoid_is_bounded() {
        let a = Activation::Sigmoid;
        assert!((a.apply(0.0) - 0.5).abs() <= f32::EPSILON);
        assert!(a.apply(100.0) <= 1.0);
        assert!(a.apply(-100.0) >= 0.0);
    }

    #[test]
    fn relu_clamps_negatives() {
        let a = Activation::Relu;
        assert_eq!(a.apply(-3.0), 0.0);
        assert_eq!(a.apply(2.5), 2.5);
        assert_eq!(a.grad_from_output(0.0), 0.0);
        assert_eq!(a.grad_from_output(2.5), 1.0);
    }

    #[test]
    fn derivatives_match_outputs() {
        let y = Activation::Sigmoid.apply(0.3);
        assert!((Activation::Sigmoid.grad_from_output(y) - y * (1.0 - y)).abs() <= f32::EPSILON);
        let y = Activation::Tanh.apply(0.3);
        assert!((Activation::Tanh.grad_from_output(y) - (1.0 - y * y)).abs() <= f32::EPSILON);
    }
}
