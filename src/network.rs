//! Feed-forward network driver
//!
//! A [`Network`] owns an ordered list of layers, the scratch [`Workspace`]
//! they share, the optimizer and the learning-rate schedule. Each layer reads
//! the previous layer's output as its input; during backward it writes the
//! gradient w.r.t. that input into the previous layer's delta buffer.

use crate::error::{Error, Result};
use crate::layers::{ImageShape, Layer, LayerKind, Mode, PassState};
use crate::optimizers::{MomentumSgd, Optimizer};
use crate::utils::LRScheduler;
use crate::weights::{self, WeightsHeader};
use std::mem;
use std::path::Path;

/// Scratch buffer shared by all layers of a network.
///
/// Sized in bytes to the largest `workspace_size()` of its layers and lent
/// to one layer call at a time.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    buffer: Vec<f32>,
}

impl Workspace {
    pub fn new(bytes: usize) -> Self {
        Self {
            buffer: vec![0.0; floats_for(bytes)],
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.buffer.len() * mem::size_of::<f32>()
    }

    /// Grow to at least `bytes`.
    pub fn ensure(&mut self, bytes: usize) {
        let floats = floats_for(bytes);
        if floats > self.buffer.len() {
            self.buffer.resize(floats, 0.0);
        }
    }

    /// First `len` floats of the buffer.
    ///
    /// # Panics
    ///
    /// Panics when the workspace holds fewer than `len` floats.
    pub fn slice_mut(&mut self, len: usize) -> &mut [f32] {
        assert!(
            len <= self.buffer.len(),
            "workspace too small: need {} floats, have {}",
            len,
            self.buffer.len()
        );
        &mut self.buffer[..len]
    }
}

fn floats_for(bytes: usize) -> usize {
    let width = mem::size_of::<f32>();
    (bytes + width - 1) / width
}

/// Ordered layer stack with its training state.
pub struct Network {
    layers: Vec<Box<dyn Layer>>,
    input_shape: ImageShape,
    batch: usize,
    subdivisions: usize,
    optimizer: MomentumSgd,
    scheduler: Box<dyn LRScheduler>,
    workspace: Workspace,
    seen: u64,
    pending: usize,
}

impl Network {
    /// Empty network for `batch` samples of `input_shape` per pass.
    pub fn new(
        input_shape: ImageShape,
        batch: usize,
        subdivisions: usize,
        optimizer: MomentumSgd,
        scheduler: Box<dyn LRScheduler>,
    ) -> Self {
        assert!(batch > 0 && subdivisions > 0, "batch and subdivisions must be positive");
        Self {
            layers: Vec::new(),
            input_shape,
            batch,
            subdivisions,
            optimizer,
            scheduler,
            workspace: Workspace::default(),
            seen: 0,
            pending: 0,
        }
    }

    /// Append a layer, growing the workspace to fit it.
    pub fn push(&mut self, layer: Box<dyn Layer>) {
        self.workspace.ensure(layer.workspace_size());
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Box<dyn Layer>] {
        &mut self.layers
    }

    pub fn layer(&self, index: usize) -> &dyn Layer {
        self.layers[index].as_ref()
    }

    pub fn layer_mut(&mut self, index: usize) -> &mut dyn Layer {
        self.layers[index].as_mut()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn input_shape(&self) -> ImageShape {
        self.input_shape
    }

    /// Shape of the last layer's output, or the input shape when empty.
    pub fn output_shape(&self) -> ImageShape {
        self.layers
            .last()
            .map_or(self.input_shape, |layer| layer.output_shape())
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn subdivisions(&self) -> usize {
        self.subdivisions
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Training samples processed so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn set_seen(&mut self, seen: u64) {
        self.seen = seen;
    }

    /// Learning rate the next update will use.
    pub fn learning_rate(&self) -> f32 {
        self.scheduler.get_lr()
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|layer| layer.parameter_count()).sum()
    }

    /// Sum of the costs reported by cost layers after the last training forward.
    pub fn cost(&self) -> Option<f32> {
        self.layers
            .iter()
            .filter_map(|layer| layer.cost())
            .fold(None, |total, cost| Some(total.unwrap_or(0.0) + cost))
    }

    fn check_input(&self, input: &[f32]) {
        let expected = self.batch * self.input_shape.len();
        assert_eq!(
            input.len(),
            expected,
            "network input len mismatch: expected {}, got {}",
            expected,
            input.len()
        );
    }

    /// Run every layer in order. Training passes clear all deltas first.
    pub fn forward(&mut self, input: &[f32], mode: Mode, truth: Option<&[f32]>) {
        self.check_input(input);
        if mode == Mode::Train {
            for layer in &mut self.layers {
                layer.delta_mut().fill(0.0);
            }
        }

        let mut state = PassState {
            workspace: &mut self.workspace,
            mode,
            truth,
        };
        for i in 0..self.layers.len() {
            let (previous, rest) = self.layers.split_at_mut(i);
            let layer_input = match previous.last() {
                Some(layer) => layer.output(),
                None => input,
            };
            rest[0].forward(layer_input, &mut state);
        }
    }

    /// Run every layer in reverse, propagating deltas toward the input.
    pub fn backward(&mut self, input: &[f32]) {
        self.check_input(input);
        let mut state = PassState::new(&mut self.workspace, Mode::Train);
        for i in (0..self.layers.len()).rev() {
            let (previous, rest) = self.layers.split_at_mut(i);
            match previous.last_mut() {
                Some(upstream) => {
                    let (layer_input, upstream_delta) = upstream.output_and_delta_mut();
                    rest[0].backward(layer_input, Some(upstream_delta), &mut state);
                }
                None => rest[0].backward(input, None, &mut state),
            }
        }
    }

    /// Apply accumulated gradients with the scheduled learning rate, then
    /// advance the schedule.
    pub fn update(&mut self) {
        self.optimizer.set_learning_rate(self.scheduler.get_lr());
        for layer in &mut self.layers {
            layer.update(&self.optimizer);
        }
        self.scheduler.step();
    }

    /// Inference forward; returns the output of the last non-cost layer.
    pub fn predict(&mut self, input: &[f32]) -> &[f32] {
        self.forward(input, Mode::Inference, None);
        self.layers
            .iter()
            .rev()
            .find(|layer| layer.kind() != LayerKind::Cost)
            .map(|layer| layer.output())
            .unwrap_or(&[])
    }

    /// One training step on a mini-batch: forward, backward and, every
    /// `subdivisions` calls, a parameter update. Returns the batch cost.
    pub fn train_batch(&mut self, input: &[f32], truth: &[f32]) -> Result<f32> {
        let cost_shape = self
            .layers
            .iter()
            .find(|layer| layer.kind() == LayerKind::Cost)
            .map(|layer| layer.output_shape())
            .ok_or_else(|| Error::Config("network has no cost layer".to_string()))?;
        let expected = self.batch * cost_shape.len();
        if truth.len() != expected {
            return Err(Error::ShapeMismatch {
                expected: vec![self.batch, cost_shape.channels, cost_shape.height, cost_shape.width],
                actual: vec![truth.len()],
            });
        }

        self.forward(input, Mode::Train, Some(truth));
        let cost = self.cost().unwrap_or(0.0);
        self.backward(input);

        self.seen += self.batch as u64;
        self.pending += 1;
        if self.pending == self.subdivisions {
            self.update();
            self.pending = 0;
        }

        log::debug!(
            "seen {}: cost {:.6}, learning rate {}",
            self.seen,
            cost,
            self.scheduler.get_lr()
        );
        Ok(cost)
    }

    pub fn save_weights<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        weights::save_weights(self, path)
    }

    pub fn load_weights<P: AsRef<Path>>(&mut self, path: P) -> Result<WeightsHeader> {
        weights::load_weights(self, path)
    }
}
