//! im2col / col2im transforms for GEMM-based convolution.
//!
//! `im2col` unrolls every receptive field of a `channels × height × width`
//! image into one column of a `(channels·size·size) × (out_h·out_w)` matrix,
//! so that convolution becomes `weights · columns`. `col2im` is its adjoint:
//! it scatters a column matrix back onto the image, summing overlapping
//! contributions.

/// Geometry shared by the forward transform and its adjoint.
///
/// Output dimensions use the padding-aware formula
/// `(dim + 2·pad − size) / stride + 1` everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub size: usize,
    pub stride: usize,
    pub pad: usize,
}

impl ConvGeometry {
    pub fn new(
        channels: usize,
        height: usize,
        width: usize,
        size: usize,
        stride: usize,
        pad: usize,
    ) -> Self {
        Self {
            channels,
            height,
            width,
            size,
            stride,
            pad,
        }
    }

    /// Output height, or 0 when the kernel does not fit the padded input.
    pub fn out_height(&self) -> usize {
        output_dim(self.height, self.size, self.stride, self.pad)
    }

    /// Output width, or 0 when the kernel does not fit the padded input.
    pub fn out_width(&self) -> usize {
        output_dim(self.width, self.size, self.stride, self.pad)
    }

    /// Rows of the column matrix: one per (channel, kernel row, kernel col).
    pub fn column_rows(&self) -> usize {
        self.channels * self.size * self.size
    }

    /// Columns of the column matrix: one per output position.
    pub fn column_cols(&self) -> usize {
        self.out_height() * self.out_width()
    }

    pub fn column_len(&self) -> usize {
        self.column_rows() * self.column_cols()
    }

    pub fn image_len(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// True when the transform is the identity and can be skipped.
    pub fn is_pointwise(&self) -> bool {
        self.size == 1 && self.stride == 1 && self.pad == 0
    }
}

fn output_dim(dim: usize, size: usize, stride: usize, pad: usize) -> usize {
    let padded = dim + 2 * pad;
    if stride == 0 || padded < size {
        0
    } else {
        (padded - size) / stride + 1
    }
}

/// Maps a padded coordinate to an image coordinate, `None` when it falls in the padding.
#[inline]
fn unpad(coord: usize, pad: usize, limit: usize) -> Option<usize> {
    coord.checked_sub(pad).filter(|&c| c < limit)
}

/// Expand `image` into `columns` (overwriting every element).
///
/// # Panics
///
/// Panics if `image` or `columns` is shorter than the geometry requires.
pub fn im2col(image: &[f32], geometry: &ConvGeometry, columns: &mut [f32]) {
    assert!(
        image.len() >= geometry.image_len(),
        "im2col: image has {} elements, expected {}",
        image.len(),
        geometry.image_len()
    );
    assert!(
        columns.len() >= geometry.column_len(),
        "im2col: column buffer has {} elements, expected {}",
        columns.len(),
        geometry.column_len()
    );

    let ConvGeometry {
        height,
        width,
        size,
        stride,
        pad,
        ..
    } = *geometry;
    let out_h = geometry.out_height();
    let out_w = geometry.out_width();

    for row in 0..geometry.column_rows() {
        let kx = row % size;
        let ky = (row / size) % size;
        let channel = row / size / size;
        let plane = &image[channel * height * width..(channel + 1) * height * width];
        let dst = &mut columns[row * out_h * out_w..(row + 1) * out_h * out_w];

        for oy in 0..out_h {
            let iy = unpad(oy * stride + ky, pad, height);
            for ox in 0..out_w {
                let ix = unpad(ox * stride + kx, pad, width);
                dst[oy * out_w + ox] = match (iy, ix) {
                    (Some(y), Some(x)) => plane[y * width + x],
                    _ => 0.0,
                };
            }
        }
    }
}

/// Scatter `columns` back onto `image`, accumulating overlapping entries.
///
/// `image` is not cleared: callers zero it first when they want the plain adjoint.
/// Contributions that land in the padding are dropped.
///
/// # Panics
///
/// Panics if `image` or `columns` is shorter than the geometry requires.
pub fn col2im(columns: &[f32], geometry: &ConvGeometry, image: &mut [f32]) {
    assert!(
        image.len() >= geometry.image_len(),
        "col2im: image has {} elements, expected {}",
        image.len(),
        geometry.image_len()
    );
    assert!(
        columns.len() >= geometry.column_len(),
        "col2im: column buffer has {} elements, expected {}",
        columns.len(),
        geometry.column_len()
    );

    let ConvGeometry {
        height,
        width,
        size,
        stride,
        pad,
        ..
    } = *geometry;
    let out_h = geometry.out_height();
    let out_w = geometry.out_width();

    for row in 0..geometry.column_rows() {
        let kx = row % size;
        let ky = (row / size) % size;
        let channel = row / size / size;
        let plane = &mut image[channel * height * width..(channel + 1) * height * width];
        let src = &columns[row * out_h * out_w..(row + 1) * out_h * out_w];

        for oy in 0..out_h {
            let Some(y) = unpad(oy * stride + ky, pad, height) else {
                continue;
            };
            for ox in 0..out_w {
                if let Some(x) = unpad(ox * stride + kx, pad, width) {
                    plane[y * width + x] += src[oy * out_w + ox];
                }
            }
        }
    }
}
