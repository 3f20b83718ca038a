//! Shared utilities for neural network implementations
//!
//! This module provides common utilities like random number generation,
//! activation functions, and learning rate schedules used across layers.

pub mod activations;
pub mod lr_scheduler;
pub mod rng;

pub use activations::Activation;
pub use lr_scheduler::{ConstantLr, LRScheduler, StepsLr};
pub use rng::SimpleRng;
