//! Rust ConvNet Library
//!
//! A small CPU training engine for feed-forward convolutional networks. The
//! convolutional layer lowers convolution to GEMM through im2col, optionally
//! batch-normalizes its output, and learns with momentum SGD.
//!
//! # Modules
//!
//! - `ops`: GEMM kernel and im2col / col2im transforms
//! - `layers`: Layer trait and implementations (Convolutional, Normalize, Cost)
//! - `optimizers`: Parameter storage and the momentum SGD update rule
//! - `network`: Network driver, shared workspace and training step
//! - `weights`: Binary weights file reader and writer
//! - `utils`: Shared utilities (RNG, activation functions, LR schedulers)
//! - `config`: Training hyperparameter configuration
//! - `architecture`: Layer list configuration and model building

#[cfg(feature = "blas")]
extern crate blas_src;

pub mod architecture;
pub mod config;
pub mod error;
pub mod layers;
pub mod network;
pub mod ops;
pub mod optimizers;
pub mod utils;
pub mod weights;

pub use error::{Error, Result};
pub use network::{Network, Workspace};
