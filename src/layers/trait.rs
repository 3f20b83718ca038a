//! Layer trait definition for network layers
//!
//! This module defines the core Layer trait that all layer types implement,
//! together with the per-pass context handed to every layer call. Layers own
//! their output and delta buffers; the network lends each layer the previous
//! layer's output as input and, during backward, the previous layer's delta as
//! the upstream gradient buffer.

use crate::error::Result;
use crate::network::Workspace;
use crate::optimizers::Optimizer;
use std::fmt;
use std::io::{Read, Write};

/// Shape of one sample of a `channels × height × width` tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Values per sample.
    pub fn len(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values per channel plane.
    pub fn spatial(&self) -> usize {
        self.height * self.width
    }
}

impl fmt::Display for ImageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} x {}", self.height, self.width, self.channels)
    }
}

/// Whether a pass updates training state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Batch statistics, rolling-average updates and backward caches.
    Train,
    /// Frozen statistics; no layer state is written.
    Inference,
}

/// Layer variants known to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Convolutional,
    Normalize,
    Cost,
}

impl LayerKind {
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Convolutional => "convolutional",
            LayerKind::Normalize => "normalize",
            LayerKind::Cost => "cost",
        }
    }
}

/// Context shared by every layer during one forward or backward pass.
///
/// The workspace is a scratch buffer owned by the network and lent to one
/// layer call at a time. `truth` is only present for training passes over a
/// network that ends in a cost layer.
pub struct PassState<'a> {
    pub workspace: &'a mut Workspace,
    pub mode: Mode,
    pub truth: Option<&'a [f32]>,
}

impl<'a> PassState<'a> {
    pub fn new(workspace: &'a mut Workspace, mode: Mode) -> Self {
        Self {
            workspace,
            mode,
            truth: None,
        }
    }

    pub fn with_truth(mut self, truth: &'a [f32]) -> Self {
        self.truth = Some(truth);
        self
    }

    pub fn is_training(&self) -> bool {
        self.mode == Mode::Train
    }
}

/// Core trait for network layers.
///
/// # Example
///
/// ```ignore
/// let mut state = PassState::new(&mut workspace, Mode::Train);
/// layer.forward(&input, &mut state);
///
/// // gradient w.r.t. the output goes into the layer's own delta buffer
/// layer.delta_mut().copy_from_slice(&grad_output);
/// layer.backward(&input, Some(&mut grad_input), &mut state);
/// layer.update(&optimizer);
/// ```
pub trait Layer {
    fn kind(&self) -> LayerKind;

    /// Forward propagation.
    ///
    /// Fully overwrites the output buffer from `input`, which holds
    /// `batch × input_shape.len()` values.
    ///
    /// # Panics
    ///
    /// Implementations panic if `input` has the wrong length or the workspace
    /// is smaller than [`Layer::workspace_size`].
    fn forward(&mut self, input: &[f32], state: &mut PassState<'_>);

    /// Backward propagation.
    ///
    /// Consumes the layer's delta buffer (transformed in place), accumulates
    /// parameter gradients and, when `upstream` is present, writes or
    /// accumulates the gradient w.r.t. `input` into it.
    fn backward(&mut self, input: &[f32], upstream: Option<&mut [f32]>, state: &mut PassState<'_>);

    /// Apply accumulated gradients and reset them.
    fn update(&mut self, _optimizer: &dyn Optimizer) {}

    fn output_shape(&self) -> ImageShape;

    fn output(&self) -> &[f32];

    fn delta(&self) -> &[f32];

    fn delta_mut(&mut self) -> &mut [f32];

    /// Split borrow of the output (read) and delta (write) buffers.
    fn output_and_delta_mut(&mut self) -> (&[f32], &mut [f32]);

    /// Scratch bytes needed from the shared workspace.
    fn workspace_size(&self) -> usize {
        0
    }

    fn parameter_count(&self) -> usize {
        0
    }

    /// Cost computed by the last training forward, for cost layers.
    fn cost(&self) -> Option<f32> {
        None
    }

    /// Floats written by [`Layer::write_weights`].
    fn weights_len(&self) -> usize {
        0
    }

    /// Serialize learned state in weights-file order.
    fn write_weights(&self, _writer: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    /// Restore learned state written by [`Layer::write_weights`].
    fn read_weights(&mut self, _reader: &mut dyn Read) -> Result<()> {
        Ok(())
    }
}
