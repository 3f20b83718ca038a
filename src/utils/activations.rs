//! Activation functions for neural networks
//!
//! This module provides the pointwise nonlinearities a layer can apply to its
//! output, together with their derivatives:
//! - Linear, Logistic, ReLU, Leaky ReLU and Tanh, whose derivative is computed
//!   from the activated output
//! - Parametric ReLU, whose negative slope is learned per channel and whose
//!   derivative needs the cached pre-activation values

use crate::error::Error;
use std::fmt;
use std::str::FromStr;

/// Negative-side slope of the fixed leaky ReLU.
pub const LEAKY_SLOPE: f32 = 0.1;

/// Initial negative-side slope of the parametric ReLU.
pub const PRELU_INIT_SLOPE: f32 = 0.25;

/// Activation kind selected per layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Logistic,
    Relu,
    Leaky,
    Tanh,
    /// ReLU with a learned per-channel negative slope.
    Prelu,
}

impl Activation {
    /// Name used in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Linear => "linear",
            Activation::Logistic => "logistic",
            Activation::Relu => "relu",
            Activation::Leaky => "leaky",
            Activation::Tanh => "tanh",
            Activation::Prelu => "prelu",
        }
    }

    /// True for activations with learnable parameters.
    pub fn is_parametric(&self) -> bool {
        matches!(self, Activation::Prelu)
    }

    /// Apply the activation to a single pre-activation value.
    ///
    /// # Panics
    ///
    /// Panics for `Prelu`, which needs a channel slope; use [`prelu_forward`].
    pub fn activate(&self, x: f32) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::Logistic => 1.0 / (1.0 + (-x).exp()),
            Activation::Relu => x.max(0.0),
            Activation::Leaky => {
                if x > 0.0 {
                    x
                } else {
                    LEAKY_SLOPE * x
                }
            }
            Activation::Tanh => x.tanh(),
            Activation::Prelu => panic!("prelu is applied per channel through prelu_forward"),
        }
    }

    /// Derivative of the activation, expressed in terms of its output `y`.
    ///
    /// # Panics
    ///
    /// Panics for `Prelu`; use [`prelu_backward`].
    pub fn gradient(&self, y: f32) -> f32 {
        match self {
            Activation::Linear => 1.0,
            Activation::Logistic => y * (1.0 - y),
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Leaky => {
                if y > 0.0 {
                    1.0
                } else {
                    LEAKY_SLOPE
                }
            }
            Activation::Tanh => 1.0 - y * y,
            Activation::Prelu => panic!("prelu gradient is computed through prelu_backward"),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Activation::Linear),
            "logistic" | "sigmoid" => Ok(Activation::Logistic),
            "relu" => Ok(Activation::Relu),
            "leaky" | "leaky_relu" => Ok(Activation::Leaky),
            "tanh" => Ok(Activation::Tanh),
            "prelu" => Ok(Activation::Prelu),
            _ => Err(Error::UnknownActivation(s.to_string())),
        }
    }
}

/// Activate every element of `data` in place.
///
/// # Panics
///
/// Panics for `Prelu`, whose slopes live in the layer; use [`prelu_forward`].
pub fn activate_array(data: &mut [f32], activation: Activation) {
    if activation == Activation::Linear {
        return;
    }
    for value in data.iter_mut() {
        *value = activation.activate(*value);
    }
}

/// Multiply `delta` in place by the activation derivative at `output`.
///
/// # Panics
///
/// Panics for `Prelu`; use [`prelu_backward`].
pub fn gradient_array(output: &[f32], activation: Activation, delta: &mut [f32]) {
    assert_eq!(output.len(), delta.len(), "output/delta length mismatch");
    if activation == Activation::Linear {
        return;
    }
    for (d, &y) in delta.iter_mut().zip(output) {
        *d *= activation.gradient(y);
    }
}

/// Parametric ReLU forward over a `batch × channels × spatial` buffer.
///
/// Copies the pre-activation values into `pre_activation` before activating.
pub fn prelu_forward(data: &mut [f32], slopes: &[f32], spatial: usize, pre_activation: &mut [f32]) {
    assert_eq!(data.len(), pre_activation.len(), "prelu cache length mismatch");
    pre_activation.copy_from_slice(data);
    let channels = slopes.len();
    for (i, value) in data.iter_mut().enumerate() {
        if *value <= 0.0 {
            *value *= slopes[(i / spatial) % channels];
        }
    }
}

/// Parametric ReLU backward.
///
/// Accumulates `Σ delta · x` over non-positive inputs into `slope_grad`, then
/// scales `delta` by the local derivative (1 or the channel slope).
pub fn prelu_backward(
    pre_activation: &[f32],
    slopes: &[f32],
    spatial: usize,
    delta: &mut [f32],
    slope_grad: &mut [f32],
) {
    assert_eq!(pre_activation.len(), delta.len(), "prelu cache length mismatch");
    let channels = slopes.len();
    for (i, (d, &x)) in delta.iter_mut().zip(pre_activation).enumerate() {
        if x <= 0.0 {
            let channel = (i / spatial) % channels;
            slope_grad[channel] += *d * x;
            *d *= slopes[channel];
        }
    }
}
