//! Stochastic Gradient Descent with momentum and weight decay
//!
//! For a parameter `p` with accumulated gradient `g` and velocity `v`:
//!
//! ```text
//! lr    = learning_rate · lr_mult
//! decay = decay · decay_mult
//! v'    = lr · (g / (batch · subdivisions) − decay · batch · p) + momentum · v
//! p'    = p + v'
//! g     = 0
//! ```
//!
//! Gradients follow the descent-direction convention of the layers (the cost
//! layer emits `truth − prediction`), which is why the step is added.

use crate::optimizers::{GroupRate, Optimizer, Parameter};

/// Momentum SGD hyperparameters shared by every layer of a network.
///
/// # Example
///
/// ```
/// use rust_convnet::optimizers::{GroupRate, MomentumSgd, Optimizer, Parameter};
///
/// let optimizer = MomentumSgd::new(0.5, 0.0, 0.0);
/// let mut weights = Parameter::new(vec![1.0]);
/// weights.grad_mut()[0] = 4.0;
///
/// // batch 2, subdivisions 2: the gradient is averaged over 4 samples
/// optimizer.update(&mut weights, GroupRate::default(), 2, 2);
/// assert_eq!(weights.values(), &[1.5]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentumSgd {
    learning_rate: f32,
    momentum: f32,
    decay: f32,
}

impl MomentumSgd {
    /// Creates a new optimizer.
    ///
    /// # Arguments
    ///
    /// * `learning_rate` - Base step size
    /// * `momentum` - Fraction of the previous velocity carried into the next step
    /// * `decay` - L2 weight-decay coefficient
    pub fn new(learning_rate: f32, momentum: f32, decay: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            decay,
        }
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    pub fn decay(&self) -> f32 {
        self.decay
    }
}

impl Optimizer for MomentumSgd {
    fn update(&self, parameter: &mut Parameter, rate: GroupRate, batch: usize, subdivisions: usize) {
        assert!(
            batch > 0 && subdivisions > 0,
            "batch and subdivisions must be positive"
        );
        let lr = self.learning_rate * rate.lr_mult;
        let decay = self.decay * rate.decay_mult * batch as f32;
        let divisor = (batch * subdivisions) as f32;

        let (values, grad, velocity) = parameter.parts_mut();
        for ((p, g), v) in values.iter_mut().zip(grad.iter()).zip(velocity.iter_mut()) {
            *v = lr * (*g / divisor - decay * *p) + self.momentum * *v;
            *p += *v;
        }
        parameter.zero_grad();
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sgd_new() {
        let optimizer = MomentumSgd::new(0.01, 0.9, 0.0005);
        assert_eq!(optimizer.learning_rate(), 0.01);
        assert_eq!(optimizer.momentum(), 0.9);
        assert_eq!(optimizer.decay(), 0.0005);
    }

    #[test]
    fn test_sgd_update_resets_gradient() {
        let optimizer = MomentumSgd::new(0.1, 0.0, 0.0);
        let mut param = Parameter::new(vec![1.0, 2.0, 3.0]);
        param.grad_mut().copy_from_slice(&[0.1, 0.2, 0.3]);

        optimizer.update(&mut param, GroupRate::default(), 1, 1);

        assert!((param.values()[0] - 1.01).abs() < 1e-6);
        assert!((param.values()[1] - 2.02).abs() < 1e-6);
        assert!((param.values()[2] - 3.03).abs() < 1e-6);
        assert_eq!(param.grad(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_sgd_momentum_carries_velocity() {
        let optimizer = MomentumSgd::new(1.0, 0.5, 0.0);
        let mut param = Parameter::new(vec![0.0]);

        param.grad_mut()[0] = 1.0;
        optimizer.update(&mut param, GroupRate::default(), 1, 1);
        assert_eq!(param.values(), &[1.0]);
        assert_eq!(param.velocity(), &[1.0]);

        // No new gradient: the step is momentum · previous velocity.
        optimizer.update(&mut param, GroupRate::default(), 1, 1);
        assert_eq!(param.velocity(), &[0.5]);
        assert_eq!(param.values(), &[1.5]);
    }

    #[test]
    fn test_sgd_zero_gradient_no_decay_is_noop() {
        let optimizer = MomentumSgd::new(0.1, 0.9, 0.0);
        let mut param = Parameter::new(vec![0.3, -0.7]);
        let original = param.values().to_vec();

        optimizer.update(&mut param, GroupRate::default(), 4, 2);

        assert_eq!(param.values(), original.as_slice());
    }

    #[test]
    fn test_sgd_decay_scaled_by_batch_and_multiplier() {
        let optimizer = MomentumSgd::new(0.01, 0.0, 0.1);
        let mut param = Parameter::new(vec![2.0]);
        let rate = GroupRate::new(1.0, 0.5);

        optimizer.update(&mut param, rate, 4, 1);

        // p' = p - lr · decay_mult · batch · decay · p = 2 - 0.01·0.5·4·0.1·2
        assert!((param.values()[0] - 1.996).abs() < 1e-6);
    }

    #[test]
    fn test_sgd_lr_multiplier_zero_freezes_group() {
        let optimizer = MomentumSgd::new(0.1, 0.9, 0.01);
        let mut param = Parameter::new(vec![1.0]);
        param.grad_mut()[0] = 10.0;

        optimizer.update(&mut param, GroupRate::new(0.0, 1.0), 1, 1);

        assert_eq!(param.values(), &[1.0]);
        assert_eq!(param.grad(), &[0.0]);
    }

    #[test]
    fn test_sgd_learning_rate_update() {
        let mut optimizer = MomentumSgd::new(0.1, 0.0, 0.0);
        optimizer.set_learning_rate(0.01);
        assert_eq!(optimizer.learning_rate(), 0.01);

        let mut param = Parameter::new(vec![1.0]);
        param.grad_mut()[0] = 1.0;
        optimizer.update(&mut param, GroupRate::default(), 1, 1);
        assert!((param.values()[0] - 1.01).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "batch and subdivisions must be positive")]
    fn test_sgd_zero_batch_panics() {
        let optimizer = MomentumSgd::new(0.1, 0.0, 0.0);
        let mut param = Parameter::new(vec![1.0]);
        optimizer.update(&mut param, GroupRate::default(), 0, 1);
    }
}
