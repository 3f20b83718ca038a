//! Optimizer abstractions for neural network parameter updates
//!
//! Every learnable tensor of a layer is stored as a [`Parameter`]: its values,
//! the gradient accumulated by backward passes, and the velocity carried
//! between updates. Layers group their parameters (weights, biases, batch-norm
//! scales, activation slopes) and hand each group to an [`Optimizer`] together
//! with the group's learning-rate and decay multipliers.
//!
//! # Example
//!
//! ```
//! use rust_convnet::optimizers::{GroupRate, MomentumSgd, Optimizer, Parameter};
//!
//! let optimizer = MomentumSgd::new(0.1, 0.9, 0.0);
//! let mut bias = Parameter::new(vec![0.0; 2]);
//! bias.grad_mut().copy_from_slice(&[1.0, -1.0]);
//!
//! optimizer.update(&mut bias, GroupRate::default(), 1, 1);
//! assert_eq!(bias.values(), &[0.1, -0.1]);
//! assert_eq!(bias.grad(), &[0.0, 0.0]);
//! ```

pub mod sgd;

pub use sgd::MomentumSgd;

/// Learnable tensor with its gradient accumulator and momentum state.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    values: Vec<f32>,
    grad: Vec<f32>,
    velocity: Vec<f32>,
}

impl Parameter {
    /// Wrap initial values; gradient and velocity start at zero.
    pub fn new(values: Vec<f32>) -> Self {
        let len = values.len();
        Self {
            values,
            grad: vec![0.0; len],
            velocity: vec![0.0; len],
        }
    }

    /// Parameter of `len` elements all set to `value`.
    pub fn filled(len: usize, value: f32) -> Self {
        Self::new(vec![value; len])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Gradient accumulated since the last update.
    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    pub fn grad_mut(&mut self) -> &mut [f32] {
        &mut self.grad
    }

    pub fn velocity(&self) -> &[f32] {
        &self.velocity
    }

    /// Split borrow used by optimizers: (values, grad, velocity).
    pub fn parts_mut(&mut self) -> (&mut [f32], &mut [f32], &mut [f32]) {
        (&mut self.values, &mut self.grad, &mut self.velocity)
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }
}

/// Per-group multipliers applied on top of the optimizer's global rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupRate {
    pub lr_mult: f32,
    pub decay_mult: f32,
}

impl GroupRate {
    pub fn new(lr_mult: f32, decay_mult: f32) -> Self {
        Self {
            lr_mult,
            decay_mult,
        }
    }
}

impl Default for GroupRate {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

/// Core trait for optimizers.
///
/// The optimizer holds the global hyperparameters; all per-parameter state
/// lives in the [`Parameter`] itself, so one optimizer instance can update
/// every layer of a network.
pub trait Optimizer {
    /// Apply one update to `parameter` and reset its gradient accumulator.
    ///
    /// `batch` is the layer's mini-batch size and `subdivisions` the number of
    /// mini-batches whose gradients were accumulated before this update.
    fn update(&self, parameter: &mut Parameter, rate: GroupRate, batch: usize, subdivisions: usize);

    /// Base learning rate.
    fn learning_rate(&self) -> f32;

    /// Replace the base learning rate, e.g. from a scheduler.
    fn set_learning_rate(&mut self, lr: f32);
}
