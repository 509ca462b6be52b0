//! Froxel Configuration Module
//!
//! This module defines constants and configuration for the froxel (frustum + voxel)
//! grid used for clustered light culling.
//!
//! Froxels divide the view frustum into a 3D grid:
//! - X/Y: Square screen-space cells whose pixel size is derived from the viewport
//! - Z: Logarithmically distributed depth slices (FROXEL_SLICE_COUNT)
//!
//! The logarithmic depth distribution places more slices near the camera, where
//! light influence is densest on screen, and fewer slices in the distance.

use serde::{Deserialize, Serialize};

/// Number of depth slices for froxel partitioning.
pub const FROXEL_SLICE_COUNT: u32 = 16;

/// Default maximum number of froxels (cell descriptors) in the froxel buffer.
///
/// 8192 entries × 4 bytes = 32 KiB, which fits the minimum uniform buffer
/// binding size guaranteed by every backend.
pub const FROXEL_BUFFER_MAX_ENTRY_COUNT: u32 = 8192;

/// Default capacity of the record (light index) buffer, in single-byte entries.
pub const RECORD_BUFFER_ENTRY_COUNT: u32 = 16384;

/// Hard ceiling on the record buffer: cell descriptors store a 16-bit offset.
pub const MAX_RECORD_BUFFER_ENTRY_COUNT: u32 = 65536;

/// Number of light bits held by one shard word.
pub const LIGHT_PER_GROUP: usize = 32;

/// Number of shards the light assignment is split into.
/// Shard `g` owns light indices `g, g + GROUP_COUNT, g + 2 * GROUP_COUNT, ...`
pub const GROUP_COUNT: usize = 8;

/// Width of a per-froxel light bitset.
pub const LIGHT_BITSET_WIDTH: usize = LIGHT_PER_GROUP * GROUP_COUNT;

/// Maximum number of visible positional lights per frame.
///
/// Cell descriptors store an 8-bit light count, so one less than the bitset width.
pub const MAX_LIGHT_COUNT: usize = LIGHT_BITSET_WIDTH - 1;

/// Smallest viewport dimension (in pixels) used for the layout.
pub const MIN_VIEWPORT_DIMENSION: u32 = 16;

/// Froxel pixel dimensions are rounded up to a multiple of this.
pub const FROXEL_DIMENSION_ALIGNMENT: u32 = 8;

/// The froxel buffer entry count must be a multiple of this (and of the slice count).
pub const FROXEL_BUFFER_ENTRY_ALIGNMENT: u32 = 16;

/// Smallest spot light outer angle, in degrees.
pub const MIN_SPOT_OUTER_ANGLE_DEGREES: f32 = 0.5;

/// Default distance of the first "real" depth slice boundary (meters).
pub const DEFAULT_LIGHT_NEAR: f32 = 5.0;

/// Default distance of the last depth slice boundary (meters).
pub const DEFAULT_LIGHT_FAR: f32 = 100.0;

/// Errors produced while validating a [`FroxelizerConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FroxelConfigError {
    #[error("froxel buffer entry count {count} must be a non-zero multiple of {alignment}")]
    EntryCountAlignment { count: u32, alignment: u32 },
    #[error("record buffer entry count {count} must be within [{min}, {max}]")]
    RecordBufferSize { count: u32, min: u32, max: u32 },
    #[error("uniform buffer binding limit of {limit} bytes is too small for a froxel buffer")]
    UniformLimitTooSmall { limit: u32 },
}

/// Runtime configuration of a [`Froxelizer`](super::froxelizer::Froxelizer).
///
/// Sizes are fixed for the lifetime of the froxelizer: every scratch array and GPU
/// buffer is allocated once from these ceilings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FroxelizerConfig {
    /// Maximum number of froxels (countX × countY × countZ never exceeds it)
    pub froxel_buffer_entry_count: u32,
    /// Capacity of the record buffer in bytes (one byte per light index)
    pub record_buffer_entry_count: u32,
    /// Test every froxel of the grid for every light instead of the projected range
    pub exhaustive_scan: bool,
}

impl Default for FroxelizerConfig {
    fn default() -> Self {
        Self {
            froxel_buffer_entry_count: FROXEL_BUFFER_MAX_ENTRY_COUNT,
            record_buffer_entry_count: RECORD_BUFFER_ENTRY_COUNT,
            exhaustive_scan: false,
        }
    }
}

impl FroxelizerConfig {
    /// Create a configuration with explicit buffer ceilings.
    pub fn new(froxel_buffer_entry_count: u32, record_buffer_entry_count: u32) -> Self {
        Self {
            froxel_buffer_entry_count,
            record_buffer_entry_count,
            exhaustive_scan: false,
        }
    }

    /// Derive the buffer ceilings from the device's uniform buffer binding limit.
    ///
    /// Both GPU buffers are bound as uniform buffers, so neither may exceed
    /// `max_uniform_buffer_binding_size`. The froxel count is rounded down to a
    /// valid multiple and never exceeds [`FROXEL_BUFFER_MAX_ENTRY_COUNT`].
    pub fn from_limits(limits: &wgpu::Limits) -> Result<Self, FroxelConfigError> {
        let limit = limits.max_uniform_buffer_binding_size;
        let alignment = entry_count_alignment();

        let entries = (limit / 4).min(FROXEL_BUFFER_MAX_ENTRY_COUNT);
        let entries = entries - entries % alignment;
        if entries == 0 {
            return Err(FroxelConfigError::UniformLimitTooSmall { limit });
        }

        let records = limit.min(RECORD_BUFFER_ENTRY_COUNT);
        let config = Self::new(entries, records);
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the layout and packing code rely on.
    pub fn validate(&self) -> Result<(), FroxelConfigError> {
        let alignment = entry_count_alignment();
        if self.froxel_buffer_entry_count == 0 || self.froxel_buffer_entry_count % alignment != 0
        {
            return Err(FroxelConfigError::EntryCountAlignment {
                count: self.froxel_buffer_entry_count,
                alignment,
            });
        }

        let min = MAX_LIGHT_COUNT as u32;
        if self.record_buffer_entry_count < min
            || self.record_buffer_entry_count > MAX_RECORD_BUFFER_ENTRY_COUNT
        {
            return Err(FroxelConfigError::RecordBufferSize {
                count: self.record_buffer_entry_count,
                min,
                max: MAX_RECORD_BUFFER_ENTRY_COUNT,
            });
        }
        Ok(())
    }

    /// Number of froxels available in a single depth slice (the XY plane budget).
    #[inline]
    pub fn plane_entry_count(&self) -> u32 {
        self.froxel_buffer_entry_count / FROXEL_SLICE_COUNT
    }
}

/// Smallest multiple of both the entry alignment and the slice count.
const fn entry_count_alignment() -> u32 {
    let (mut a, mut b) = (FROXEL_BUFFER_ENTRY_ALIGNMENT, FROXEL_SLICE_COUNT);
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    FROXEL_BUFFER_ENTRY_ALIGNMENT / a * FROXEL_SLICE_COUNT
}

/// User-facing light range options.
///
/// The depth slices are distributed between `light_near` and `light_far`; lights
/// entirely beyond `light_far` are ignored. Values are clamped to the camera's
/// near/far range when the Z distribution is computed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FroxelOptions {
    /// Far edge of the first depth slice (meters)
    pub light_near: f32,
    /// Far edge of the last depth slice (meters)
    pub light_far: f32,
}

impl Default for FroxelOptions {
    fn default() -> Self {
        Self {
            light_near: DEFAULT_LIGHT_NEAR,
            light_far: DEFAULT_LIGHT_FAR,
        }
    }
}

impl FroxelOptions {
    pub fn new(light_near: f32, light_far: f32) -> Self {
        Self {
            light_near,
            light_far,
        }
    }

    /// Clamp the options into the camera's `[near, far]` range.
    ///
    /// Inverted values are swapped. A degenerate (empty) range falls back to
    /// the camera's own near/far distances.
    pub fn sanitized(&self, camera_near: f32, camera_far: f32) -> Self {
        let mut light_near = self.light_near.clamp(camera_near, camera_far);
        let mut light_far = self.light_far.clamp(camera_near, camera_far);
        if light_near > light_far {
            std::mem::swap(&mut light_near, &mut light_far);
        }
        if !(light_near < light_far) {
            light_near = camera_near;
            light_far = camera_far;
        }
        Self {
            light_near,
            light_far,
        }
    }
}

/// Log2 spacing between consecutive depth slice boundaries.
///
/// `max(1, count - 1)` keeps a single-slice grid from dividing by zero.
#[inline]
pub fn z_linearizer(light_near: f32, light_far: f32, slice_count: u32) -> f32 {
    (light_far / light_near).log2() / (slice_count.saturating_sub(1).max(1)) as f32
}

/// Calculate the far distance of depth slice boundary `index`.
///
/// Uses a logarithmic distribution: `d[i] = far * 2^((i - N) * linearizer)`, with
/// `d[0] = 0` (the camera) and `d[1] = light_near`, `d[N] = light_far`.
///
/// # Arguments
///
/// * `index` - Boundary index (0 to `slice_count`)
/// * `light_near` - Far edge of the first slice
/// * `light_far` - Far edge of the last slice
/// * `slice_count` - Number of depth slices
///
/// # Example
///
/// ```
/// use clustered_lights::render::froxel_config::depth_slice_boundary;
///
/// assert_eq!(depth_slice_boundary(0, 5.0, 100.0, 16), 0.0);
/// assert_eq!(depth_slice_boundary(16, 5.0, 100.0, 16), 100.0);
/// ```
pub fn depth_slice_boundary(index: u32, light_near: f32, light_far: f32, slice_count: u32) -> f32 {
    if index == 0 {
        return 0.0;
    }
    let linearizer = z_linearizer(light_near, light_far, slice_count);
    light_far * ((index as f32 - slice_count as f32) * linearizer).exp2()
}

/// Calculate the near and far depth bounds for a given depth slice.
///
/// # Returns
///
/// A tuple `(slice_near, slice_far)` of positive view distances.
pub fn depth_slice_bounds(slice: u32, light_near: f32, light_far: f32, slice_count: u32) -> (f32, f32) {
    (
        depth_slice_boundary(slice, light_near, light_far, slice_count),
        depth_slice_boundary(slice + 1, light_near, light_far, slice_count),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(LIGHT_BITSET_WIDTH, 256);
        assert_eq!(MAX_LIGHT_COUNT, 255);
        assert_eq!(FROXEL_BUFFER_MAX_ENTRY_COUNT % (16 * FROXEL_SLICE_COUNT), 0);
        assert!(RECORD_BUFFER_ENTRY_COUNT <= MAX_RECORD_BUFFER_ENTRY_COUNT);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(FroxelizerConfig::default().validate(), Ok(()));
        assert_eq!(FroxelizerConfig::default().plane_entry_count(), 512);
    }

    #[test]
    fn test_config_rejects_unaligned_entry_count() {
        let config = FroxelizerConfig::new(1000, RECORD_BUFFER_ENTRY_COUNT);
        assert!(matches!(
            config.validate(),
            Err(FroxelConfigError::EntryCountAlignment { count: 1000, .. })
        ));

        let config = FroxelizerConfig::new(0, RECORD_BUFFER_ENTRY_COUNT);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_bad_record_capacity() {
        let too_small = FroxelizerConfig::new(1024, 16);
        assert!(matches!(
            too_small.validate(),
            Err(FroxelConfigError::RecordBufferSize { count: 16, .. })
        ));

        let too_large = FroxelizerConfig::new(1024, MAX_RECORD_BUFFER_ENTRY_COUNT + 1);
        assert!(too_large.validate().is_err());
    }

    #[test]
    fn test_config_from_default_limits() {
        let config = FroxelizerConfig::from_limits(&wgpu::Limits::default()).unwrap();
        assert_eq!(config.froxel_buffer_entry_count, FROXEL_BUFFER_MAX_ENTRY_COUNT);
        assert_eq!(config.record_buffer_entry_count, RECORD_BUFFER_ENTRY_COUNT);
    }

    #[test]
    fn test_config_from_small_limits() {
        let limits = wgpu::Limits {
            max_uniform_buffer_binding_size: 4096,
            ..wgpu::Limits::default()
        };
        let config = FroxelizerConfig::from_limits(&limits).unwrap();
        assert_eq!(config.froxel_buffer_entry_count, 1024);
        assert_eq!(config.record_buffer_entry_count, 4096);

        let limits = wgpu::Limits {
            max_uniform_buffer_binding_size: 64,
            ..wgpu::Limits::default()
        };
        assert!(FroxelizerConfig::from_limits(&limits).is_err());
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: FroxelizerConfig =
            serde_json::from_str(r#"{ "froxel_buffer_entry_count": 1024 }"#).unwrap();
        assert_eq!(config.froxel_buffer_entry_count, 1024);
        assert_eq!(config.record_buffer_entry_count, RECORD_BUFFER_ENTRY_COUNT);
        assert!(!config.exhaustive_scan);
    }

    #[test]
    fn test_options_sanitized_clamps_and_swaps() {
        let options = FroxelOptions::new(500.0, 0.01).sanitized(0.1, 200.0);
        assert_eq!(options.light_near, 0.1);
        assert_eq!(options.light_far, 200.0);

        let options = FroxelOptions::new(10.0, 2.0).sanitized(0.1, 200.0);
        assert_eq!(options.light_near, 2.0);
        assert_eq!(options.light_far, 10.0);
    }

    #[test]
    fn test_options_sanitized_degenerate_range() {
        let options = FroxelOptions::new(300.0, 400.0).sanitized(0.1, 200.0);
        assert_eq!(options.light_near, 0.1);
        assert_eq!(options.light_far, 200.0);
    }

    #[test]
    fn test_depth_slice_boundaries_endpoints() {
        assert_eq!(depth_slice_boundary(0, 1.0, 100.0, 16), 0.0);
        assert!((depth_slice_boundary(1, 1.0, 100.0, 16) - 1.0).abs() < 1e-4);
        assert_eq!(depth_slice_boundary(16, 1.0, 100.0, 16), 100.0);
    }

    #[test]
    fn test_depth_slice_bounds_continuity() {
        for i in 0..FROXEL_SLICE_COUNT - 1 {
            let (_, this_far) = depth_slice_bounds(i, 5.0, 100.0, FROXEL_SLICE_COUNT);
            let (next_near, _) = depth_slice_bounds(i + 1, 5.0, 100.0, FROXEL_SLICE_COUNT);
            assert_eq!(this_far, next_near, "Slice {} far should match slice {} near", i, i + 1);
        }
    }

    #[test]
    fn test_single_slice_linearizer_is_finite() {
        let linearizer = z_linearizer(1.0, 100.0, 1);
        assert!(linearizer.is_finite());
        assert_eq!(depth_slice_boundary(1, 1.0, 100.0, 1), 100.0);
    }
}
