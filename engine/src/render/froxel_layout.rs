//! Froxel Grid Layout
//!
//! Computes the square froxel pixel size and the X/Y/Z froxel counts for a viewport
//! under a fixed froxel budget.
//!
//! The budget is split evenly across depth slices; the XY plane then gets as many
//! square froxels as fit while keeping the viewport's aspect ratio. The froxel size
//! is rounded up to a multiple of 8 pixels, which can only lower the counts.

use serde::{Deserialize, Serialize};

use super::froxel_config::{FROXEL_DIMENSION_ALIGNMENT, FROXEL_SLICE_COUNT, MIN_VIEWPORT_DIMENSION};

/// Viewport size in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The viewport with both dimensions clamped to [`MIN_VIEWPORT_DIMENSION`].
    #[inline]
    pub fn clamped(&self) -> Self {
        Self {
            width: self.width.max(MIN_VIEWPORT_DIMENSION),
            height: self.height.max(MIN_VIEWPORT_DIMENSION),
        }
    }
}

/// Dimensions of the froxel grid.
///
/// Froxels are indexed X fastest, then Y, then Z:
/// `index = z * (count_x * count_y) + y * count_x + x`.
/// Row `y = 0` is the bottom of the viewport (clip-space y = -1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FroxelGrid {
    /// Froxel width and height in pixels (froxels are square)
    pub dimension: u32,
    pub count_x: u32,
    pub count_y: u32,
    pub count_z: u32,
}

impl Default for FroxelGrid {
    fn default() -> Self {
        Self {
            dimension: MIN_VIEWPORT_DIMENSION,
            count_x: 1,
            count_y: 1,
            count_z: FROXEL_SLICE_COUNT,
        }
    }
}

impl FroxelGrid {
    /// Total number of froxels in the grid.
    #[inline]
    pub fn froxel_count(&self) -> usize {
        (self.count_x * self.count_y * self.count_z) as usize
    }

    /// Number of froxels in one depth slice.
    #[inline]
    pub fn slice_stride(&self) -> usize {
        (self.count_x * self.count_y) as usize
    }

    /// Calculate the linear index for a froxel at (x, y, z) grid coordinates.
    #[inline]
    pub fn froxel_index(&self, x: u32, y: u32, z: u32) -> usize {
        debug_assert!(x < self.count_x && y < self.count_y && z < self.count_z);
        (z * self.count_x * self.count_y + y * self.count_x + x) as usize
    }

    /// Inverse of [`froxel_index`](Self::froxel_index).
    #[inline]
    pub fn froxel_coords(&self, index: usize) -> (u32, u32, u32) {
        let index = index as u32;
        let stride = self.count_x * self.count_y;
        let z = index / stride;
        let rest = index % stride;
        (rest % self.count_x, rest / self.count_x, z)
    }
}

#[inline]
fn round_up_to_alignment(value: u32) -> u32 {
    value.div_ceil(FROXEL_DIMENSION_ALIGNMENT) * FROXEL_DIMENSION_ALIGNMENT
}

/// Compute the froxel grid for a viewport.
///
/// # Arguments
///
/// * `viewport` - Viewport size (each dimension clamped to at least 16 pixels)
/// * `froxel_buffer_entry_count` - Maximum total froxel count, a multiple of
///   16 × [`FROXEL_SLICE_COUNT`]
///
/// # Returns
///
/// A grid with `count_x * count_y * count_z <= froxel_buffer_entry_count` and at
/// least one froxel along X and Y.
pub fn compute_froxel_layout(viewport: Viewport, froxel_buffer_entry_count: u32) -> FroxelGrid {
    let Viewport { width, height } = viewport.clamped();
    let (w, h) = (width as f64, height as f64);

    let plane_count = (froxel_buffer_entry_count / FROXEL_SLICE_COUNT).max(1);

    // solve countX * countY == plane_count with countX / countY == width / height,
    // rounding down so the product stays within the budget
    let count_x = ((plane_count as f64 * w / h).sqrt() as u32).clamp(1, plane_count);
    let count_y = ((plane_count as f64 * h / w).sqrt() as u32).clamp(1, plane_count / count_x);

    // froxels are square: keep the larger of the two sizes
    let size_x = width.div_ceil(count_x);
    let size_y = height.div_ceil(count_y);
    let dimension = round_up_to_alignment(size_x.max(size_y));

    // a larger dimension can only reduce the counts
    FroxelGrid {
        dimension,
        count_x: width.div_ceil(dimension),
        count_y: height.div_ceil(dimension),
        count_z: FROXEL_SLICE_COUNT,
    }
}
