//! Configuration structures for training
//!
//! This module provides the training hyperparameters read from JSON: batch
//! geometry, momentum SGD settings and the learning-rate policy.

use crate::error::{Error, Result};
use crate::optimizers::MomentumSgd;
use crate::utils::{ConstantLr, LRScheduler, StepsLr};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_BATCH: usize = 1;
pub const DEFAULT_SUBDIVISIONS: usize = 1;
pub const DEFAULT_LEARNING_RATE: f32 = 0.001;
pub const DEFAULT_MOMENTUM: f32 = 0.9;
pub const DEFAULT_DECAY: f32 = 0.0001;

/// Training hyperparameters
///
/// Every field is optional; missing values take the `DEFAULT_*` constants.
/// The learning-rate policy selects which optional fields are required:
///
/// - **constant**: No parameters (default)
/// - **steps**: Requires `steps` and `scales` of equal length; once `steps[i]`
///   updates have been applied the rate is multiplied by `scales[i]`
///
/// # Example
///
/// ```json
/// {
///   "batch": 8,
///   "subdivisions": 2,
///   "learning_rate": 0.01,
///   "momentum": 0.9,
///   "decay": 0.0005,
///   "policy": "steps",
///   "steps": [100, 200],
///   "scales": [0.1, 0.1]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrainingConfig {
    /// Samples per forward/backward pass
    pub batch: Option<usize>,

    /// Passes whose gradients are accumulated before each update
    pub subdivisions: Option<usize>,

    pub learning_rate: Option<f32>,

    pub momentum: Option<f32>,

    /// L2 weight decay
    pub decay: Option<f32>,

    /// Learning-rate policy: "constant" or "steps"
    pub policy: Option<String>,

    /// Update counts at which the steps policy rescales the learning rate
    pub steps: Option<Vec<usize>>,

    /// Factor applied at each entry of `steps`
    pub scales: Option<Vec<f32>>,
}

impl TrainingConfig {
    pub fn batch(&self) -> usize {
        self.batch.unwrap_or(DEFAULT_BATCH)
    }

    pub fn subdivisions(&self) -> usize {
        self.subdivisions.unwrap_or(DEFAULT_SUBDIVISIONS)
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate.unwrap_or(DEFAULT_LEARNING_RATE)
    }

    pub fn momentum(&self) -> f32 {
        self.momentum.unwrap_or(DEFAULT_MOMENTUM)
    }

    pub fn decay(&self) -> f32 {
        self.decay.unwrap_or(DEFAULT_DECAY)
    }

    pub fn optimizer(&self) -> MomentumSgd {
        MomentumSgd::new(self.learning_rate(), self.momentum(), self.decay())
    }

    /// Build the learning-rate policy.
    pub fn scheduler(&self) -> Result<Box<dyn LRScheduler>> {
        let policy = self.policy.as_deref().unwrap_or("constant").to_lowercase();
        match policy.as_str() {
            "constant" => Ok(Box::new(ConstantLr::new(self.learning_rate()))),
            "steps" => {
                let steps = self.steps.clone().unwrap_or_default();
                let scales = self.scales.clone().unwrap_or_default();
                if steps.len() != scales.len() {
                    return Err(Error::Config(format!(
                        "steps policy needs as many scales as steps ({} vs {})",
                        scales.len(),
                        steps.len()
                    )));
                }
                Ok(Box::new(StepsLr::new(self.learning_rate(), steps, scales)))
            }
            other => Err(Error::Config(format!(
                "Invalid learning rate policy '{}'. Must be one of: constant, steps",
                other
            ))),
        }
    }
}

/// Loads a training configuration from a JSON file.
///
/// Reads the file at `path`, deserializes its JSON contents into a
/// `TrainingConfig` and validates it.
///
/// # Examples
///
/// ```no_run
/// use rust_convnet::config::load_config;
///
/// let cfg = load_config("config/train.json").unwrap();
/// assert!(cfg.batch() > 0);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TrainingConfig> {
    let contents = fs::read_to_string(path)?;
    let config: TrainingConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &TrainingConfig) -> Result<()> {
    if config.batch == Some(0) {
        return Err(Error::Config("batch must be greater than 0".to_string()));
    }
    if config.subdivisions == Some(0) {
        return Err(Error::Config(
            "subdivisions must be greater than 0".to_string(),
        ));
    }

    if let Some(lr) = config.learning_rate {
        if lr < 0.0 {
            return Err(Error::Config(
                "learning_rate must be non-negative".to_string(),
            ));
        }
    }

    if let Some(momentum) = config.momentum {
        if !(0.0..1.0).contains(&momentum) {
            return Err(Error::Config(
                "momentum must be in range [0.0, 1.0)".to_string(),
            ));
        }
    }

    if let Some(decay) = config.decay {
        if decay < 0.0 {
            return Err(Error::Config("decay must be non-negative".to_string()));
        }
    }

    // Validate the policy and its parameters
    if config.policy.as_deref().map(str::to_lowercase).as_deref() == Some("steps") {
        let steps = config
            .steps
            .as_ref()
            .ok_or_else(|| Error::Config("steps policy requires 'steps'".to_string()))?;
        if config.scales.is_none() {
            return Err(Error::Config("steps policy requires 'scales'".to_string()));
        }
        if steps.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(Error::Config(
                "steps must be strictly increasing".to_string(),
            ));
        }
    }
    config.scheduler()?;

    Ok(())
}
