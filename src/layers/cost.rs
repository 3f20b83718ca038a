//! Cost layer
//!
//! Compares its input with the truth of a training pass. The output buffer
//! holds the per-element error, the delta buffer the descent direction
//! (`truth − prediction`, or its clipped form for smooth L1), and
//! [`Layer::cost`] the summed error.

use crate::error::{Error, Result};
use crate::layers::{ImageShape, Layer, LayerKind, PassState};
use std::fmt;
use std::str::FromStr;

/// Truth value marking an element that `masked` cost ignores.
pub const MASK_VALUE: f32 = -1234.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostType {
    /// Sum of squared errors.
    Sse,
    /// Squared error, skipping elements whose truth is [`MASK_VALUE`].
    Masked,
    /// Smooth L1: squared below an absolute error of 1, linear above.
    Smooth,
}

impl CostType {
    pub fn name(&self) -> &'static str {
        match self {
            CostType::Sse => "sse",
            CostType::Masked => "masked",
            CostType::Smooth => "smooth",
        }
    }
}

impl fmt::Display for CostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CostType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sse" => Ok(CostType::Sse),
            "masked" => Ok(CostType::Masked),
            "smooth" => Ok(CostType::Smooth),
            _ => Err(Error::UnknownCostType(s.to_string())),
        }
    }
}

/// Terminal layer computing the training cost.
///
/// # Example
///
/// ```
/// use rust_convnet::layers::cost::{CostLayer, CostType};
/// use rust_convnet::layers::{ImageShape, Layer, Mode, PassState};
/// use rust_convnet::Workspace;
///
/// let mut layer = CostLayer::new(ImageShape::new(1, 1, 2), 1, CostType::Sse, 1.0);
/// let mut workspace = Workspace::new(0);
/// let truth = [1.0, 0.0];
/// let mut state = PassState::new(&mut workspace, Mode::Train).with_truth(&truth);
///
/// layer.forward(&[0.5, 0.5], &mut state);
/// assert_eq!(layer.cost(), Some(0.5));
/// assert_eq!(layer.delta(), &[0.5, -0.5]);
/// ```
pub struct CostLayer {
    shape: ImageShape,
    batch: usize,
    cost_type: CostType,
    scale: f32,
    output: Vec<f32>,
    delta: Vec<f32>,
    cost: Option<f32>,
}

impl CostLayer {
    /// `scale` multiplies the delta handed upstream during backward.
    pub fn new(shape: ImageShape, batch: usize, cost_type: CostType, scale: f32) -> Self {
        let inputs = shape.len();
        log::info!("cost: {} inputs ({}, scale {})", inputs, cost_type, scale);
        Self {
            shape,
            batch,
            cost_type,
            scale,
            output: vec![0.0; batch * inputs],
            delta: vec![0.0; batch * inputs],
            cost: None,
        }
    }

    pub fn cost_type(&self) -> CostType {
        self.cost_type
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }
}

impl Layer for CostLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Cost
    }

    /// Without truth (inference) the layer does nothing and reports no cost.
    fn forward(&mut self, input: &[f32], state: &mut PassState<'_>) {
        assert_eq!(
            input.len(),
            self.output.len(),
            "cost input len mismatch: expected {}, got {}",
            self.output.len(),
            input.len()
        );
        let truth = match state.truth {
            Some(truth) if state.is_training() => truth,
            _ => {
                self.cost = None;
                return;
            }
        };
        assert_eq!(
            truth.len(),
            input.len(),
            "truth len mismatch: expected {}, got {}",
            input.len(),
            truth.len()
        );

        for (((error, delta), &pred), &target) in self
            .output
            .iter_mut()
            .zip(self.delta.iter_mut())
            .zip(input)
            .zip(truth)
        {
            let diff = if self.cost_type == CostType::Masked && target == MASK_VALUE {
                0.0
            } else {
                target - pred
            };
            if self.cost_type == CostType::Smooth && diff.abs() >= 1.0 {
                *error = 2.0 * diff.abs() - 1.0;
                *delta = diff.signum();
            } else {
                *error = diff * diff;
                *delta = diff;
            }
        }
        self.cost = Some(self.output.iter().sum());
    }

    /// Adds `scale · delta` into the upstream delta.
    fn backward(&mut self, _input: &[f32], upstream: Option<&mut [f32]>, _state: &mut PassState<'_>) {
        if let Some(upstream) = upstream {
            assert_eq!(
                upstream.len(),
                self.delta.len(),
                "upstream delta len mismatch: expected {}, got {}",
                self.delta.len(),
                upstream.len()
            );
            for (up, &d) in upstream.iter_mut().zip(&self.delta) {
                *up += self.scale * d;
            }
        }
    }

    fn output_shape(&self) -> ImageShape {
        self.shape
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

    fn cost(&self) -> Option<f32> {
        self.cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Mode;
    use crate::network::Workspace;

    fn run(cost_type: CostType, input: &[f32], truth: &[f32]) -> CostLayer {
        let mut layer = CostLayer::new(ImageShape::new(1, input.len(), 1), 1, cost_type, 1.0);
        let mut workspace = Workspace::new(0);
        let mut state = PassState::new(&mut workspace, Mode::Train).with_truth(truth);
        layer.forward(input, &mut state);
        layer
    }

    #[test]
    fn test_parse_cost_types() {
        assert_eq!("sse".parse::<CostType>().unwrap(), CostType::Sse);
        assert_eq!("MASKED".parse::<CostType>().unwrap(), CostType::Masked);
        assert_eq!("smooth".parse::<CostType>().unwrap(), CostType::Smooth);
        assert!(matches!(
            "l3".parse::<CostType>(),
            Err(Error::UnknownCostType(ref name)) if name == "l3"
        ));
    }

    #[test]
    fn test_sse_cost_and_delta() {
        let layer = run(CostType::Sse, &[1.0, 2.0, 3.0], &[1.0, 0.0, 5.0]);
        assert_eq!(layer.output(), &[0.0, 4.0, 4.0]);
        assert_eq!(layer.delta(), &[0.0, -2.0, 2.0]);
        assert_eq!(layer.cost(), Some(8.0));
    }

    #[test]
    fn test_masked_cost_skips_sentinel() {
        let layer = run(CostType::Masked, &[1.0, 2.0], &[MASK_VALUE, 0.0]);
        assert_eq!(layer.delta(), &[0.0, -2.0]);
        assert_eq!(layer.cost(), Some(4.0));
    }

    #[test]
    fn test_smooth_l1_switches_to_linear() {
        let layer = run(CostType::Smooth, &[0.0, 0.0, 0.0], &[0.5, 3.0, -2.0]);
        assert_eq!(layer.output(), &[0.25, 5.0, 3.0]);
        assert_eq!(layer.delta(), &[0.5, 1.0, -1.0]);
        assert_eq!(layer.cost(), Some(8.25));
    }

    #[test]
    fn test_inference_reports_no_cost() {
        let mut layer = CostLayer::new(ImageShape::new(1, 2, 1), 1, CostType::Sse, 1.0);
        let mut workspace = Workspace::new(0);
        let mut state = PassState::new(&mut workspace, Mode::Inference);
        layer.forward(&[1.0, 2.0], &mut state);
        assert_eq!(layer.cost(), None);
    }

    #[test]
    fn test_backward_accumulates_scaled_delta() {
        let mut layer = CostLayer::new(ImageShape::new(1, 2, 1), 1, CostType::Sse, 0.5);
        let mut workspace = Workspace::new(0);
        let truth = [2.0, 0.0];
        let mut state = PassState::new(&mut workspace, Mode::Train).with_truth(&truth);
        layer.forward(&[0.0, 1.0], &mut state);

        let mut upstream = vec![1.0, 1.0];
        layer.backward(&[0.0, 1.0], Some(&mut upstream), &mut state);
        assert_eq!(upstream, vec![2.0, 0.5]);
    }
}
