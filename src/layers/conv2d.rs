//! 2D Convolutional layer implementation
//!
//! Convolution is lowered to a matrix product: each sample is unrolled with
//! im2col into a `(c·size·size) × (out_h·out_w)` column matrix held in the
//! shared workspace, then multiplied by the `filters × (c·size·size)` weight
//! matrix. The result is optionally batch-normalized, shifted by a per-filter
//! bias and passed through the activation.

use crate::error::{Error, Result};
use crate::layers::batchnorm::BatchNorm;
use crate::layers::{ImageShape, Layer, LayerKind, PassState};
use crate::ops::{col2im, gemm, im2col, ConvGeometry};
use crate::optimizers::{GroupRate, Optimizer, Parameter};
use crate::utils::activations::{
    activate_array, gradient_array, prelu_backward, prelu_forward, PRELU_INIT_SLOPE,
};
use crate::utils::{Activation, SimpleRng};
use crate::weights::{read_floats, write_floats};
use std::io::{Read, Write};
use std::mem;

/// Initial weight distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightFiller {
    /// Uniform in `[-limit, limit]`, `limit = sqrt(6 / (fan_in + fan_out))`.
    Xavier,
    /// Zero-mean normal with the given standard deviation.
    Gaussian { sigma: f32 },
}

impl WeightFiller {
    /// Parse a filler name; `sigma` is required for `gaussian`.
    pub fn from_name(name: &str, sigma: Option<f32>) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "xavier" => Ok(WeightFiller::Xavier),
            "gaussian" => match sigma {
                Some(sigma) if sigma > 0.0 => Ok(WeightFiller::Gaussian { sigma }),
                Some(sigma) => Err(Error::Config(format!(
                    "gaussian filler sigma must be positive, got {}",
                    sigma
                ))),
                None => Err(Error::Config("gaussian filler requires sigma".to_string())),
            },
            _ => Err(Error::UnknownFiller(name.to_string())),
        }
    }

    fn fill(&self, weights: &mut [f32], fan_in: usize, fan_out: usize, rng: &mut SimpleRng) {
        match *self {
            WeightFiller::Xavier => {
                let limit = (6.0f32 / (fan_in + fan_out) as f32).sqrt();
                for value in weights.iter_mut() {
                    *value = rng.gen_range_f32(-limit, limit);
                }
            }
            WeightFiller::Gaussian { sigma } => {
                for value in weights.iter_mut() {
                    *value = rng.gen_normal_f32(0.0, sigma);
                }
            }
        }
    }
}

/// Static configuration of a convolutional layer.
///
/// `ConvConfig::new` fills the optional fields with their defaults; override
/// them with struct update syntax:
///
/// ```
/// use rust_convnet::layers::conv2d::ConvConfig;
/// use rust_convnet::utils::Activation;
///
/// let config = ConvConfig {
///     pad: 1,
///     activation: Activation::Leaky,
///     batch_normalize: true,
///     ..ConvConfig::new(28, 28, 1, 16, 3)
/// };
/// assert_eq!(config.stride, 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ConvConfig {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub filters: usize,
    pub size: usize,
    pub stride: usize,
    pub pad: usize,
    pub batch: usize,
    pub activation: Activation,
    pub batch_normalize: bool,
    pub filler: WeightFiller,
    pub lr_mult: f32,
    pub lr_decay_mult: f32,
    pub bias_mult: f32,
    pub bias_decay_mult: f32,
    pub scale_mult: f32,
    pub scale_decay_mult: f32,
    pub slope_mult: f32,
    pub slope_decay_mult: f32,
    /// Mini-batches accumulated per update.
    pub subdivisions: usize,
}

impl ConvConfig {
    pub fn new(height: usize, width: usize, channels: usize, filters: usize, size: usize) -> Self {
        Self {
            height,
            width,
            channels,
            filters,
            size,
            stride: 1,
            pad: 0,
            batch: 1,
            activation: Activation::Logistic,
            batch_normalize: false,
            filler: WeightFiller::Xavier,
            lr_mult: 1.0,
            lr_decay_mult: 1.0,
            bias_mult: 1.0,
            bias_decay_mult: 0.0,
            scale_mult: 1.0,
            scale_decay_mult: 0.0,
            slope_mult: 1.0,
            slope_decay_mult: 0.0,
            subdivisions: 1,
        }
    }

    fn geometry(&self) -> ConvGeometry {
        ConvGeometry::new(
            self.channels,
            self.height,
            self.width,
            self.size,
            self.stride,
            self.pad,
        )
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("height", self.height),
            ("width", self.width),
            ("channels", self.channels),
            ("filters", self.filters),
            ("size", self.size),
            ("stride", self.stride),
            ("batch", self.batch),
            ("subdivisions", self.subdivisions),
        ];
        for (name, value) in required {
            if value == 0 {
                return Err(Error::Config(format!(
                    "convolutional {} must be greater than zero",
                    name
                )));
            }
        }
        if self.size > self.height + 2 * self.pad || self.size > self.width + 2 * self.pad {
            return Err(Error::Config(format!(
                "kernel size {} exceeds padded input {} x {} (pad {})",
                self.size, self.height, self.width, self.pad
            )));
        }
        Ok(())
    }
}

/// Learning-rate and decay multipliers per parameter group.
#[derive(Debug, Clone, Copy)]
struct GroupRates {
    weights: GroupRate,
    biases: GroupRate,
    scales: GroupRate,
    slopes: GroupRate,
}

/// Convolutional layer with learnable filters, optional batch normalization
/// and optional per-channel parametric ReLU.
///
/// # Example
///
/// ```
/// use rust_convnet::layers::conv2d::{ConvConfig, ConvolutionalLayer};
/// use rust_convnet::layers::Layer;
/// use rust_convnet::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let layer = ConvolutionalLayer::new(ConvConfig::new(4, 4, 1, 2, 3), &mut rng).unwrap();
///
/// let shape = layer.output_shape();
/// assert_eq!((shape.height, shape.width, shape.channels), (2, 2, 2));
/// assert_eq!(layer.workspace_size(), 9 * 4 * 4);
/// ```
pub struct ConvolutionalLayer {
    config: ConvConfig,
    geometry: ConvGeometry,
    input_shape: ImageShape,
    output_shape: ImageShape,
    rates: GroupRates,

    weights: Parameter, // [filters * channels * size * size]
    biases: Parameter,  // [filters]
    batch_norm: Option<BatchNorm>,
    slopes: Option<Parameter>, // [filters], prelu only
    pre_activation: Vec<f32>,

    output: Vec<f32>,
    delta: Vec<f32>,
}

impl ConvolutionalLayer {
    /// Build a layer from its configuration, drawing initial weights from `rng`.
    ///
    /// Biases start at zero. Returns `Error::Config` for zero dimensions or a
    /// kernel that does not fit the padded input.
    pub fn new(config: ConvConfig, rng: &mut SimpleRng) -> Result<Self> {
        config.validate()?;

        let geometry = config.geometry();
        let input_shape = ImageShape::new(config.height, config.width, config.channels);
        let output_shape = ImageShape::new(geometry.out_height(), geometry.out_width(), config.filters);
        let kernel_area = config.size * config.size;

        let mut weights = vec![0.0f32; config.filters * geometry.column_rows()];
        config.filler.fill(
            &mut weights,
            config.channels * kernel_area,
            config.filters * kernel_area,
            rng,
        );

        let outputs = config.batch * output_shape.len();
        let batch_norm = config
            .batch_normalize
            .then(|| BatchNorm::new(config.filters, output_shape.spatial(), config.batch));
        let (slopes, pre_activation) = if config.activation.is_parametric() {
            (
                Some(Parameter::filled(config.filters, PRELU_INIT_SLOPE)),
                vec![0.0; outputs],
            )
        } else {
            (None, Vec::new())
        };

        let rates = GroupRates {
            weights: GroupRate::new(config.lr_mult, config.lr_decay_mult),
            biases: GroupRate::new(config.bias_mult, config.bias_decay_mult),
            scales: GroupRate::new(config.scale_mult, config.scale_decay_mult),
            slopes: GroupRate::new(config.slope_mult, config.slope_decay_mult),
        };

        log::info!(
            "convolutional: {} image, {} filters size {} stride {} pad {} -> {} image ({})",
            input_shape,
            config.filters,
            config.size,
            config.stride,
            config.pad,
            output_shape,
            config.activation
        );

        Ok(Self {
            biases: Parameter::new(vec![0.0; config.filters]),
            weights: Parameter::new(weights),
            batch_norm,
            slopes,
            pre_activation,
            output: vec![0.0; outputs],
            delta: vec![0.0; outputs],
            config,
            geometry,
            input_shape,
            output_shape,
            rates,
        })
    }

    pub fn config(&self) -> &ConvConfig {
        &self.config
    }

    pub fn input_shape(&self) -> ImageShape {
        self.input_shape
    }

    pub fn batch(&self) -> usize {
        self.config.batch
    }

    pub fn activation(&self) -> Activation {
        self.config.activation
    }

    pub fn weights(&self) -> &[f32] {
        self.weights.values()
    }

    pub fn weights_mut(&mut self) -> &mut [f32] {
        self.weights.values_mut()
    }

    pub fn weight_grad(&self) -> &[f32] {
        self.weights.grad()
    }

    pub fn biases(&self) -> &[f32] {
        self.biases.values()
    }

    pub fn biases_mut(&mut self) -> &mut [f32] {
        self.biases.values_mut()
    }

    pub fn bias_grad(&self) -> &[f32] {
        self.biases.grad()
    }

    pub fn batch_norm(&self) -> Option<&BatchNorm> {
        self.batch_norm.as_ref()
    }

    pub fn batch_norm_mut(&mut self) -> Option<&mut BatchNorm> {
        self.batch_norm.as_mut()
    }

    /// Parametric ReLU slopes, present only for `prelu` layers.
    pub fn slopes(&self) -> Option<&[f32]> {
        self.slopes.as_ref().map(Parameter::values)
    }

    pub fn slopes_mut(&mut self) -> Option<&mut [f32]> {
        self.slopes.as_mut().map(Parameter::values_mut)
    }

    pub fn slope_grad(&self) -> Option<&[f32]> {
        self.slopes.as_ref().map(Parameter::grad)
    }

    fn column_floats(&self) -> usize {
        if self.geometry.is_pointwise() {
            0
        } else {
            self.geometry.column_len()
        }
    }

    fn check_input(&self, input: &[f32]) {
        let expected = self.config.batch * self.input_shape.len();
        assert_eq!(
            input.len(),
            expected,
            "convolutional input len mismatch: expected {}, got {}",
            expected,
            input.len()
        );
    }
}

fn add_bias(output: &mut [f32], biases: &[f32], spatial: usize) {
    let filters = biases.len();
    for (i, value) in output.iter_mut().enumerate() {
        *value += biases[(i / spatial) % filters];
    }
}

fn accumulate_bias_grad(bias_grad: &mut [f32], delta: &[f32], spatial: usize) {
    let filters = bias_grad.len();
    for (i, &d) in delta.iter().enumerate() {
        bias_grad[(i / spatial) % filters] += d;
    }
}

impl Layer for ConvolutionalLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Convolutional
    }

    fn forward(&mut self, input: &[f32], state: &mut PassState<'_>) {
        self.check_input(input);

        let filters = self.config.filters;
        let in_len = self.input_shape.len();
        let out_hw = self.output_shape.spatial();
        let k_rows = self.geometry.column_rows();
        let pointwise = self.geometry.is_pointwise();
        let workspace = state.workspace.slice_mut(self.column_floats());

        for b in 0..self.config.batch {
            let image = &input[b * in_len..(b + 1) * in_len];
            let columns: &[f32] = if pointwise {
                image
            } else {
                im2col(image, &self.geometry, workspace);
                &*workspace
            };
            let out = &mut self.output[b * filters * out_hw..(b + 1) * filters * out_hw];
            gemm(
                filters,
                out_hw,
                k_rows,
                self.weights.values(),
                k_rows,
                columns,
                out_hw,
                out,
                out_hw,
                false,
                false,
                1.0,
                0.0,
            );
        }

        if let Some(bn) = self.batch_norm.as_mut() {
            bn.forward(&mut self.output, state.mode);
        }
        add_bias(&mut self.output, self.biases.values(), out_hw);

        match self.slopes.as_ref() {
            Some(slopes) => prelu_forward(
                &mut self.output,
                slopes.values(),
                out_hw,
                &mut self.pre_activation,
            ),
            None => activate_array(&mut self.output, self.config.activation),
        }
    }

    fn backward(&mut self, input: &[f32], mut upstream: Option<&mut [f32]>, state: &mut PassState<'_>) {
        self.check_input(input);

        let filters = self.config.filters;
        let in_len = self.input_shape.len();
        let out_hw = self.output_shape.spatial();
        let k_rows = self.geometry.column_rows();
        let pointwise = self.geometry.is_pointwise();

        match self.slopes.as_mut() {
            Some(slopes) => {
                let (values, grad, _) = slopes.parts_mut();
                prelu_backward(&self.pre_activation, values, out_hw, &mut self.delta, grad);
            }
            None => gradient_array(&self.output, self.config.activation, &mut self.delta),
        }

        accumulate_bias_grad(self.biases.grad_mut(), &self.delta, out_hw);

        if let Some(bn) = self.batch_norm.as_mut() {
            assert!(
                state.is_training(),
                "batch norm backward called in inference mode"
            );
            bn.backward(&mut self.delta);
        }

        if let Some(up) = upstream.as_deref() {
            assert_eq!(
                up.len(),
                input.len(),
                "upstream delta len mismatch: expected {}, got {}",
                input.len(),
                up.len()
            );
        }

        let workspace = state.workspace.slice_mut(self.column_floats());
        for b in 0..self.config.batch {
            let image = &input[b * in_len..(b + 1) * in_len];
            let delta_b = &self.delta[b * filters * out_hw..(b + 1) * filters * out_hw];

            let columns: &[f32] = if pointwise {
                image
            } else {
                im2col(image, &self.geometry, workspace);
                &*workspace
            };
            gemm(
                filters,
                k_rows,
                out_hw,
                delta_b,
                out_hw,
                columns,
                out_hw,
                self.weights.grad_mut(),
                k_rows,
                false,
                true,
                1.0,
                1.0,
            );

            if let Some(up) = upstream.as_deref_mut() {
                let up_b = &mut up[b * in_len..(b + 1) * in_len];
                if pointwise {
                    gemm(
                        k_rows,
                        out_hw,
                        filters,
                        self.weights.values(),
                        k_rows,
                        delta_b,
                        out_hw,
                        up_b,
                        out_hw,
                        true,
                        false,
                        1.0,
                        0.0,
                    );
                } else {
                    gemm(
                        k_rows,
                        out_hw,
                        filters,
                        self.weights.values(),
                        k_rows,
                        delta_b,
                        out_hw,
                        workspace,
                        out_hw,
                        true,
                        false,
                        1.0,
                        0.0,
                    );
                    up_b.fill(0.0);
                    col2im(workspace, &self.geometry, up_b);
                }
            }
        }
    }

    fn update(&mut self, optimizer: &dyn Optimizer) {
        let batch = self.config.batch;
        let subdivisions = self.config.subdivisions;
        optimizer.update(&mut self.biases, self.rates.biases, batch, subdivisions);
        if let Some(bn) = self.batch_norm.as_mut() {
            bn.update(optimizer, self.rates.scales, subdivisions);
        }
        optimizer.update(&mut self.weights, self.rates.weights, batch, subdivisions);
        if let Some(slopes) = self.slopes.as_mut() {
            optimizer.update(slopes, self.rates.slopes, batch, subdivisions);
        }
    }

    fn output_shape(&self) -> ImageShape {
        self.output_shape
    }

    fn output(&self) -> &[f32] {
        &self.output
    }

    fn delta(&self) -> &[f32] {
        &self.delta
    }

    fn delta_mut(&mut self) -> &mut [f32] {
        &mut self.delta
    }

    fn output_and_delta_mut(&mut self) -> (&[f32], &mut [f32]) {
        (&self.output, &mut self.delta)
    }

    /// Zero on the pointwise path, which multiplies the input directly.
    fn workspace_size(&self) -> usize {
        self.column_floats() * mem::size_of::<f32>()
    }

    fn parameter_count(&self) -> usize {
        let extra = self.batch_norm.as_ref().map_or(0, BatchNorm::channels)
            + self.slopes.as_ref().map_or(0, Parameter::len);
        self.weights.len() + self.biases.len() + extra
    }

    fn weights_len(&self) -> usize {
        let bn = self.batch_norm.as_ref().map_or(0, |bn| 3 * bn.channels());
        self.biases.len() + bn + self.weights.len() + self.slopes.as_ref().map_or(0, Parameter::len)
    }

    fn write_weights(&self, writer: &mut dyn Write) -> Result<()> {
        write_floats(writer, self.biases.values())?;
        if let Some(bn) = self.batch_norm.as_ref() {
            write_floats(writer, bn.scales())?;
            write_floats(writer, bn.rolling_mean())?;
            write_floats(writer, bn.rolling_variance())?;
        }
        write_floats(writer, self.weights.values())?;
        if let Some(slopes) = self.slopes.as_ref() {
            write_floats(writer, slopes.values())?;
        }
        Ok(())
    }

    fn read_weights(&mut self, reader: &mut dyn Read) -> Result<()> {
        read_floats(reader, self.biases.values_mut())?;
        if let Some(bn) = self.batch_norm.as_mut() {
            read_floats(reader, bn.scales_mut())?;
            read_floats(reader, bn.rolling_mean_mut())?;
            read_floats(reader, bn.rolling_variance_mut())?;
        }
        read_floats(reader, self.weights.values_mut())?;
        if let Some(slopes) = self.slopes.as_mut() {
            read_floats(reader, slopes.values_mut())?;
        }
        Ok(())
    }
}
