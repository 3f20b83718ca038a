//! Learning rate scheduler trait and implementations
//!
//! This module defines the LRScheduler trait for adjusting the learning rate as
//! training progresses. The network advances its scheduler once per parameter
//! update, so one scheduler "step" is one trained batch.

/// Core trait for learning rate schedulers.
///
/// # Example
///
/// ```ignore
/// let mut scheduler = StepsLr::new(0.1, vec![100, 200], vec![0.1, 0.1]);
///
/// for batch in 0..num_batches {
///     let lr = scheduler.get_lr();
///     // ... train one batch with `lr` ...
///     scheduler.step();
/// }
/// ```
pub trait LRScheduler {
    /// Learning rate for the current batch.
    fn get_lr(&self) -> f32;

    /// Advance to the next batch.
    fn step(&mut self);

    /// Return to the initial learning rate and batch counter.
    fn reset(&mut self);
}

/// Constant learning rate.
pub struct ConstantLr {
    learning_rate: f32,
}

impl ConstantLr {
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl LRScheduler for ConstantLr {
    fn get_lr(&self) -> f32 {
        self.learning_rate
    }

    fn step(&mut self) {}

    fn reset(&mut self) {}
}

/// Piecewise-constant schedule.
///
/// Once `steps[i]` batches have been trained the learning rate is multiplied
/// by `scales[i]`. Factors compound, so after passing every step the rate is
/// `initial_lr · Π scales`.
///
/// # Example
///
/// ```
/// use rust_convnet::utils::lr_scheduler::{LRScheduler, StepsLr};
///
/// let mut scheduler = StepsLr::new(0.1, vec![2, 4], vec![0.5, 0.1]);
/// scheduler.step();
/// assert_eq!(scheduler.get_lr(), 0.1);
/// scheduler.step();
/// assert!((scheduler.get_lr() - 0.05).abs() < 1e-7);
/// ```
pub struct StepsLr {
    initial_lr: f32,
    steps: Vec<usize>,
    scales: Vec<f32>,
    current_batch: usize,
    current_lr: f32,
}

impl StepsLr {
    /// # Panics
    ///
    /// Panics if `steps` and `scales` differ in length.
    pub fn new(initial_lr: f32, steps: Vec<usize>, scales: Vec<f32>) -> Self {
        assert_eq!(
            steps.len(),
            scales.len(),
            "steps and scales must have the same length"
        );
        Self {
            initial_lr,
            steps,
            scales,
            current_batch: 0,
            current_lr: initial_lr,
        }
    }
}

impl LRScheduler for StepsLr {
    fn get_lr(&self) -> f32 {
        self.current_lr
    }

    fn step(&mut self) {
        self.current_batch += 1;
        let batch = self.current_batch;
        if self.steps.contains(&batch) {
            self.current_lr = self
                .steps
                .iter()
                .zip(&self.scales)
                .filter(|&(&step, _)| step <= batch)
                .fold(self.initial_lr, |lr, (_, &scale)| lr * scale);
            log::info!(
                "learning rate step at batch {}: now {}",
                batch,
                self.current_lr
            );
        }
    }

    fn reset(&mut self) {
        self.current_batch = 0;
        self.current_lr = self.initial_lr;
    }
}
