//! L2 normalization across channels
//!
//! For every sample and spatial position the channel vector is scaled to unit
//! Euclidean length: `y = x / ‖x‖`.

use crate::layers::{ImageShape, Layer, LayerKind, PassState};

pub struct NormalizeLayer {
    shape: ImageShape,
    batch: usize,
    output: Vec<f32>,
    delta: Vec<f32>,
    // ‖x‖ per (sample, position), 1 where the input vector is zero
    norms: Vec<f32>,
}

impl NormalizeLayer {
    pub fn new(shape: ImageShape, batch: usize) -> Self {
        log::info!("normalize: {} image, {} inputs", shape, shape.len());
        Self {
            shape,
            batch,
            output: vec![0.0; batch * shape.len()],
            delta: vec![0.0; batch * shape.len()],
            norms: vec![1.0; batch * shape.spatial()],
        }
    }

    fn index(&self, b: usize, c: usize, s: usize) -> usize {
        (b * self.shape.channels + c) * self.shape.spatial() + s
    }
}

impl Layer for NormalizeLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Normalize
    }

    fn forward(&mut self, input: &[f32], _state: &mut PassState<'_>) {
        assert_eq!(
            input.len(),
            self.output.len(),
            "normalize input len mismatch: expected {}, got {}",
            self.output.len(),
            input.len()
        );
        self.output.copy_from_slice(input);

        let spatial = self.shape.spatial();
        for b in 0..self.batch {
            for s in 0..spatial {
                let sum: f32 = (0..self.shape.channels)
                    .map(|c| self.output[self.index(b, c, s)].powi(2))
                    .sum();
                let norm = if sum > 0.0 { sum.sqrt() } else { 1.0 };
                self.norms[b * spatial + s] = norm;
                for c in 0..self.shape.channels {
                    let idx = self.index(b, c, s);
                    self.output[idx] /= norm;
                }
            }
        }
    }

    /// Writes `(δ − y·(y·δ)) / ‖x‖` into the upstream delta.
    fn backward(&mut self, _input: &[f32], upstream: Option<&mut [f32]>, _state: &mut PassState<'_>) {
        let upstream = match upstream {
            Some(upstream) => upstream,
            None => return,
        };
        assert_eq!(
            upstream.len(),
            self.delta.len(),
            "upstream delta len mismatch: expected {}, got {}",
            self.delta.len(),
            upstream.len()
        );

        let spatial = self.shape.spatial();
        for b in 0..self.batch {
            for s in 0..spatial {
                let norm = self.norms[b * spatial + s];
                let dot: f32 = (0..self.shape.channels)
                    .map(|c| {
                        let idx = self.index(b, c, s);
                        self.output[idx] * self.delta[idx]
                    })
                    .sum();
                for c in 0..self.shape.channels {
                    let idx = self.index(b, c, s);
                    upstream[idx] = (self.delta[idx] - self.output[idx] * dot) / norm;
                }
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
}
