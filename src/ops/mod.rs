//! Dense compute kernels shared by the layers.
//!
//! - `gemm`: row-major matrix multiply with transpose flags and alpha/beta
//! - `im2col`: image ↔ column-matrix transforms that lower convolution to GEMM

pub mod gemm;
pub mod im2col;

pub use gemm::gemm;
pub use im2col::{col2im, im2col, ConvGeometry};
