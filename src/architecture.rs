//! Architecture configuration structures
//!
//! This module describes a network as JSON: the input image dimensions and an
//! ordered list of layers. Each layer's input shape is the previous layer's
//! output shape, so only the first layer sees the configured dimensions.

use crate::config::{validate_config, TrainingConfig};
use crate::error::{Error, Result};
use crate::layers::{
    ConvConfig, ConvolutionalLayer, CostLayer, CostType, ImageShape, Layer, NormalizeLayer,
    WeightFiller,
};
use crate::network::Network;
use crate::utils::{Activation, SimpleRng};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_ACTIVATION: &str = "logistic";
pub const DEFAULT_FILLER: &str = "xavier";

/// Configuration for a single layer.
///
/// Different layer types read different fields:
///
/// - **convolutional**: Requires `filters` and `size`; optional `stride`
///   (default 1), `pad` (default 0), `activation` (default "logistic"),
///   `batch_normalize` (default false), `filler` ("xavier" or "gaussian" with
///   `sigma`), and the `*_mult` learning-rate / decay multipliers
/// - **normalize**: No parameters
/// - **cost**: Optional `cost_type` ("sse", "masked" or "smooth", default
///   "sse") and `scale` (default 1.0); must be the last layer
///
/// # Examples
///
/// ```json
/// {
///   "layer_type": "convolutional",
///   "filters": 16,
///   "size": 3,
///   "pad": 1,
///   "activation": "leaky",
///   "batch_normalize": true
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayerConfig {
    /// Type of layer: "convolutional", "normalize" or "cost"
    pub layer_type: String,

    // Convolutional layer parameters
    pub filters: Option<usize>,
    /// Square kernel size
    pub size: Option<usize>,
    pub stride: Option<usize>,
    pub pad: Option<usize>,
    pub activation: Option<String>,
    pub batch_normalize: Option<bool>,
    /// Weight initialization: "xavier" or "gaussian"
    pub filler: Option<String>,
    /// Standard deviation for the gaussian filler
    pub sigma: Option<f32>,
    pub lr_mult: Option<f32>,
    pub lr_decay_mult: Option<f32>,
    pub bias_mult: Option<f32>,
    pub bias_decay_mult: Option<f32>,
    pub scale_mult: Option<f32>,
    pub scale_decay_mult: Option<f32>,
    pub slope_mult: Option<f32>,
    pub slope_decay_mult: Option<f32>,

    // Cost layer parameters
    pub cost_type: Option<String>,
    /// Multiplier on the delta handed to the previous layer
    pub scale: Option<f32>,
}

/// Configuration for the entire network.
///
/// # Example
///
/// ```json
/// {
///   "height": 8,
///   "width": 8,
///   "channels": 1,
///   "layers": [
///     { "layer_type": "convolutional", "filters": 4, "size": 3, "pad": 1, "activation": "relu" },
///     { "layer_type": "convolutional", "filters": 1, "size": 1, "activation": "linear" },
///     { "layer_type": "cost", "cost_type": "sse" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ArchitectureConfig {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    /// Sequence of layer configurations defining the network structure
    pub layers: Vec<LayerConfig>,
}

impl ArchitectureConfig {
    pub fn input_shape(&self) -> ImageShape {
        ImageShape::new(self.height, self.width, self.channels)
    }
}

/// Loads an architecture configuration from a JSON file.
///
/// # Examples
///
/// ```no_run
/// use rust_convnet::architecture::load_architecture;
///
/// let arch = load_architecture("config/architectures/small_cnn.json").unwrap();
/// assert!(!arch.layers.is_empty());
/// ```
pub fn load_architecture<P: AsRef<Path>>(path: P) -> Result<ArchitectureConfig> {
    let contents = fs::read_to_string(path)?;
    let config: ArchitectureConfig = serde_json::from_str(&contents)?;
    validate_architecture(&config)?;
    Ok(config)
}

/// Validates an architecture configuration.
///
/// Checks that:
/// - Input dimensions are non-zero and there is at least one layer
/// - Each layer has the required fields for its type and values in range
/// - A cost layer, if any, is the last layer
///
/// Shape chaining is checked when the network is built.
pub fn validate_architecture(config: &ArchitectureConfig) -> Result<()> {
    if config.height == 0 || config.width == 0 || config.channels == 0 {
        return Err(Error::Config(format!(
            "Input dimensions must be greater than 0, got {}",
            config.input_shape()
        )));
    }
    if config.layers.is_empty() {
        return Err(Error::Config(
            "Architecture must have at least one layer".to_string(),
        ));
    }

    let last = config.layers.len() - 1;
    for (i, layer) in config.layers.iter().enumerate() {
        validate_layer(layer, i)?;
        if i != last && layer.layer_type.eq_ignore_ascii_case("cost") {
            return Err(Error::Config(format!(
                "Layer {}: cost layer must be the last layer",
                i
            )));
        }
    }

    Ok(())
}

fn require_positive(value: Option<usize>, name: &str, index: usize) -> Result<()> {
    match value {
        None => Err(Error::Config(format!(
            "Layer {}: convolutional layer requires '{}'",
            index, name
        ))),
        Some(0) => Err(Error::Config(format!(
            "Layer {}: {} must be greater than 0",
            index, name
        ))),
        Some(_) => Ok(()),
    }
}

/// Validates a single layer configuration.
fn validate_layer(layer: &LayerConfig, index: usize) -> Result<()> {
    match layer.layer_type.to_lowercase().as_str() {
        "convolutional" => {
            require_positive(layer.filters, "filters", index)?;
            require_positive(layer.size, "size", index)?;
            if layer.stride == Some(0) {
                return Err(Error::Config(format!(
                    "Layer {}: stride must be greater than 0",
                    index
                )));
            }
            if let Some(ref activation) = layer.activation {
                activation.parse::<Activation>()?;
            }
            WeightFiller::from_name(
                layer.filler.as_deref().unwrap_or(DEFAULT_FILLER),
                layer.sigma,
            )?;

            let multipliers = [
                ("lr_mult", layer.lr_mult),
                ("lr_decay_mult", layer.lr_decay_mult),
                ("bias_mult", layer.bias_mult),
                ("bias_decay_mult", layer.bias_decay_mult),
                ("scale_mult", layer.scale_mult),
                ("scale_decay_mult", layer.scale_decay_mult),
                ("slope_mult", layer.slope_mult),
                ("slope_decay_mult", layer.slope_decay_mult),
            ];
            for (name, value) in multipliers {
                if let Some(value) = value {
                    if value < 0.0 {
                        return Err(Error::Config(format!(
                            "Layer {}: {} must be non-negative",
                            index, name
                        )));
                    }
                }
            }
        }
        "normalize" => {}
        "cost" => {
            if let Some(ref cost_type) = layer.cost_type {
                cost_type.parse::<CostType>()?;
            }
        }
        _ => {
            return Err(Error::Config(format!(
                "Layer {}: Invalid layer type '{}'. Must be one of: convolutional, normalize, cost",
                index, layer.layer_type
            )));
        }
    }

    Ok(())
}

/// Convolutional layer configuration for `input`, with defaults filled in.
pub fn conv_config(layer: &LayerConfig, input: ImageShape, training: &TrainingConfig) -> Result<ConvConfig> {
    let defaults = ConvConfig::new(
        input.height,
        input.width,
        input.channels,
        layer.filters.unwrap_or(0),
        layer.size.unwrap_or(0),
    );
    let activation = layer
        .activation
        .as_deref()
        .unwrap_or(DEFAULT_ACTIVATION)
        .parse::<Activation>()?;
    let filler = WeightFiller::from_name(
        layer.filler.as_deref().unwrap_or(DEFAULT_FILLER),
        layer.sigma,
    )?;

    Ok(ConvConfig {
        stride: layer.stride.unwrap_or(defaults.stride),
        pad: layer.pad.unwrap_or(defaults.pad),
        batch: training.batch(),
        activation,
        batch_normalize: layer.batch_normalize.unwrap_or(false),
        filler,
        lr_mult: layer.lr_mult.unwrap_or(defaults.lr_mult),
        lr_decay_mult: layer.lr_decay_mult.unwrap_or(defaults.lr_decay_mult),
        bias_mult: layer.bias_mult.unwrap_or(defaults.bias_mult),
        bias_decay_mult: layer.bias_decay_mult.unwrap_or(defaults.bias_decay_mult),
        scale_mult: layer.scale_mult.unwrap_or(defaults.scale_mult),
        scale_decay_mult: layer.scale_decay_mult.unwrap_or(defaults.scale_decay_mult),
        slope_mult: layer.slope_mult.unwrap_or(defaults.slope_mult),
        slope_decay_mult: layer.slope_decay_mult.unwrap_or(defaults.slope_decay_mult),
        subdivisions: training.subdivisions(),
        ..defaults
    })
}

fn with_layer_index(err: Error, index: usize) -> Error {
    match err {
        Error::Config(msg) => Error::Config(format!("Layer {}: {}", index, msg)),
        other => other,
    }
}

/// Builds a network from architecture and training configuration.
///
/// Layers are created in order, each sized from the previous layer's output
/// shape, and initialized with `rng`.
///
/// # Errors
///
/// Returns an error if either configuration is invalid or a layer cannot be
/// constructed for the shape it receives.
///
/// # Examples
///
/// ```no_run
/// use rust_convnet::architecture::{build_network, load_architecture};
/// use rust_convnet::config::load_config;
/// use rust_convnet::utils::SimpleRng;
///
/// let arch = load_architecture("config/architectures/small_cnn.json").unwrap();
/// let training = load_config("config/train.json").unwrap();
/// let mut rng = SimpleRng::new(42);
/// let network = build_network(&arch, &training, &mut rng).unwrap();
/// assert_eq!(network.len(), arch.layers.len());
/// ```
pub fn build_network(
    config: &ArchitectureConfig,
    training: &TrainingConfig,
    rng: &mut SimpleRng,
) -> Result<Network> {
    validate_architecture(config)?;
    validate_config(training)?;

    let batch = training.batch();
    let mut network = Network::new(
        config.input_shape(),
        batch,
        training.subdivisions(),
        training.optimizer(),
        training.scheduler()?,
    );

    let mut shape = config.input_shape();
    for (i, layer_config) in config.layers.iter().enumerate() {
        let layer: Box<dyn Layer> = match layer_config.layer_type.to_lowercase().as_str() {
            "convolutional" => {
                let conv = conv_config(layer_config, shape, training)
                    .and_then(|conv| ConvolutionalLayer::new(conv, rng))
                    .map_err(|err| with_layer_index(err, i))?;
                Box::new(conv)
            }
            "normalize" => Box::new(NormalizeLayer::new(shape, batch)),
            "cost" => {
                let cost_type = match layer_config.cost_type.as_deref() {
                    Some(name) => name.parse::<CostType>()?,
                    None => CostType::Sse,
                };
                Box::new(CostLayer::new(
                    shape,
                    batch,
                    cost_type,
                    layer_config.scale.unwrap_or(1.0),
                ))
            }
            other => {
                return Err(Error::Config(format!(
                    "Layer {}: Invalid layer type '{}'",
                    i, other
                )))
            }
        };
        shape = layer.output_shape();
        network.push(layer);
    }

    log::info!(
        "built network: {} layers, {} parameters, workspace {} bytes",
        network.len(),
        network.parameter_count(),
        network.workspace().size_bytes()
    );
    Ok(network)
}
