//! Batch normalization for convolutional feature maps
//!
//! Normalizes each channel of a `batch × channels × spatial` buffer and applies
//! a learnable per-channel scale. The shift is the owning layer's bias, added
//! after this stage.
//!
//! # Batch Normalization Theory
//!
//! 1. Compute batch statistics per channel: mean μ and biased variance σ²
//!    over batch × spatial
//! 2. Normalize: x_norm = (x - μ) / sqrt(σ² + ε)
//! 3. Scale: y = γ * x_norm
//!
//! During training the batch statistics are used and folded into rolling
//! averages; during inference the rolling averages are used instead and no
//! state is written.
//!
//! # References
//!
//! Ioffe, S., & Szegedy, C. (2015). Batch Normalization: Accelerating Deep Network Training
//! by Reducing Internal Covariate Shift. ICML.

use crate::layers::Mode;
use crate::optimizers::{GroupRate, Optimizer, Parameter};

/// Added to the variance before every square root.
pub const EPSILON: f32 = 1e-5;

/// Weight of the previous rolling statistic in the moving average.
pub const ROLLING_MOMENTUM: f32 = 0.99;

/// Per-channel batch normalization state embedded in a layer.
///
/// # Example
///
/// ```
/// use rust_convnet::layers::batchnorm::BatchNorm;
/// use rust_convnet::layers::Mode;
///
/// // batch 2, one channel, two pixels per plane
/// let mut bn = BatchNorm::new(1, 2, 2);
/// let mut data = vec![1.0, 3.0, 1.0, 3.0];
/// bn.forward(&mut data, Mode::Train);
///
/// assert_eq!(bn.mean(), &[2.0]);
/// assert!((data[0] + 1.0).abs() < 1e-4);
/// assert!((data[1] - 1.0).abs() < 1e-4);
/// ```
#[derive(Debug, Clone)]
pub struct BatchNorm {
    channels: usize,
    spatial: usize,
    batch: usize,

    scales: Parameter,

    // Statistics of the last training batch
    mean: Vec<f32>,
    variance: Vec<f32>,
    mean_delta: Vec<f32>,
    variance_delta: Vec<f32>,

    rolling_mean: Vec<f32>,
    rolling_variance: Vec<f32>,

    // Backward caches, valid between a training forward and the next backward
    x: Vec<f32>,
    x_norm: Vec<f32>,
    cache_valid: bool,
}

impl BatchNorm {
    /// Scales start at 1, rolling statistics at 0.
    pub fn new(channels: usize, spatial: usize, batch: usize) -> Self {
        let total = batch * channels * spatial;
        Self {
            channels,
            spatial,
            batch,
            scales: Parameter::filled(channels, 1.0),
            mean: vec![0.0; channels],
            variance: vec![0.0; channels],
            mean_delta: vec![0.0; channels],
            variance_delta: vec![0.0; channels],
            rolling_mean: vec![0.0; channels],
            rolling_variance: vec![0.0; channels],
            x: vec![0.0; total],
            x_norm: vec![0.0; total],
            cache_valid: false,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn scales(&self) -> &[f32] {
        self.scales.values()
    }

    pub fn scales_mut(&mut self) -> &mut [f32] {
        self.scales.values_mut()
    }

    pub fn scale_grad(&self) -> &[f32] {
        self.scales.grad()
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn variance(&self) -> &[f32] {
        &self.variance
    }

    pub fn rolling_mean(&self) -> &[f32] {
        &self.rolling_mean
    }

    pub fn rolling_mean_mut(&mut self) -> &mut [f32] {
        &mut self.rolling_mean
    }

    pub fn rolling_variance(&self) -> &[f32] {
        &self.rolling_variance
    }

    pub fn rolling_variance_mut(&mut self) -> &mut [f32] {
        &mut self.rolling_variance
    }

    /// True when a backward pass may consume the cached activations.
    pub fn cache_valid(&self) -> bool {
        self.cache_valid
    }

    fn check_len(&self, data: &[f32]) {
        let expected = self.batch * self.channels * self.spatial;
        assert_eq!(
            data.len(),
            expected,
            "batch norm buffer len mismatch: expected {}, got {}",
            expected,
            data.len()
        );
    }

    /// Normalize and scale `data` in place.
    pub fn forward(&mut self, data: &mut [f32], mode: Mode) {
        self.check_len(data);
        match mode {
            Mode::Train => {
                self.compute_statistics(data);
                for c in 0..self.channels {
                    self.rolling_mean[c] = ROLLING_MOMENTUM * self.rolling_mean[c]
                        + (1.0 - ROLLING_MOMENTUM) * self.mean[c];
                    self.rolling_variance[c] = ROLLING_MOMENTUM * self.rolling_variance[c]
                        + (1.0 - ROLLING_MOMENTUM) * self.variance[c];
                }
                self.x.copy_from_slice(data);
                normalize(data, &self.mean, &self.variance, self.spatial);
                self.x_norm.copy_from_slice(data);
                self.cache_valid = true;
            }
            Mode::Inference => {
                normalize(data, &self.rolling_mean, &self.rolling_variance, self.spatial);
                self.cache_valid = false;
            }
        }
        scale_channels(data, self.scales.values(), self.spatial);
    }

    fn compute_statistics(&mut self, data: &[f32]) {
        let count = (self.batch * self.spatial) as f32;
        self.mean.fill(0.0);
        self.variance.fill(0.0);

        for (i, &value) in data.iter().enumerate() {
            self.mean[(i / self.spatial) % self.channels] += value;
        }
        for m in &mut self.mean {
            *m /= count;
        }

        for (i, &value) in data.iter().enumerate() {
            let c = (i / self.spatial) % self.channels;
            let diff = value - self.mean[c];
            self.variance[c] += diff * diff;
        }
        for v in &mut self.variance {
            *v /= count;
        }
    }

    /// Propagate `delta` (gradient w.r.t. the scaled output) to the
    /// gradient w.r.t. the pre-normalization input, accumulating the scale
    /// gradient on the way.
    ///
    /// # Panics
    ///
    /// Panics when the caches were not filled by a training forward.
    pub fn backward(&mut self, delta: &mut [f32]) {
        assert!(
            self.cache_valid,
            "batch norm backward requires a preceding training forward"
        );
        self.check_len(delta);
        let spatial = self.spatial;
        let channels = self.channels;
        let m = (self.batch * spatial) as f32;

        {
            let scale_grad = self.scales.grad_mut();
            for (i, (&d, &xn)) in delta.iter().zip(&self.x_norm).enumerate() {
                scale_grad[(i / spatial) % channels] += d * xn;
            }
        }

        scale_channels(delta, self.scales.values(), spatial);

        self.mean_delta.fill(0.0);
        self.variance_delta.fill(0.0);
        for (i, (&d, &x)) in delta.iter().zip(&self.x).enumerate() {
            let c = (i / spatial) % channels;
            let var_eps = self.variance[c] + EPSILON;
            self.mean_delta[c] += d * (-1.0 / var_eps.sqrt());
            self.variance_delta[c] += d * (x - self.mean[c]) * -0.5 * var_eps.powf(-1.5);
        }

        for (i, (d, &x)) in delta.iter_mut().zip(&self.x).enumerate() {
            let c = (i / spatial) % channels;
            let std = (self.variance[c] + EPSILON).sqrt();
            *d = *d / std
                + self.variance_delta[c] * 2.0 * (x - self.mean[c]) / m
                + self.mean_delta[c] / m;
        }
        self.cache_valid = false;
    }

    pub fn update(&mut self, optimizer: &dyn Optimizer, rate: GroupRate, subdivisions: usize) {
        optimizer.update(&mut self.scales, rate, self.batch, subdivisions);
    }
}

fn normalize(data: &mut [f32], mean: &[f32], variance: &[f32], spatial: usize) {
    let channels = mean.len();
    for (i, value) in data.iter_mut().enumerate() {
        let c = (i / spatial) % channels;
        *value = (*value - mean[c]) / (variance[c] + EPSILON).sqrt();
    }
}

fn scale_channels(data: &mut [f32], scales: &[f32], spatial: usize) {
    let channels = scales.len();
    for (i, value) in data.iter_mut().enumerate() {
        *value *= scales[(i / spatial) % channels];
    }
}
