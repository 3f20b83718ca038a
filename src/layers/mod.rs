//! Layer abstractions for convolutional networks
//!
//! This module provides the Layer trait, the per-pass context shared by layer
//! calls, and the layer types a network is built from.

mod r#trait;
pub mod batchnorm;
pub mod conv2d;
pub mod cost;
pub mod normalize;

// Re-export the Layer trait for convenience
pub use r#trait::{ImageShape, Layer, LayerKind, Mode, PassState};
pub use batchnorm::BatchNorm;
pub use conv2d::{ConvConfig, ConvolutionalLayer, WeightFiller};
pub use cost::{CostLayer, CostType};
pub use normalize::NormalizeLayer;
