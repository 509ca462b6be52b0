//! Froxel Update Tracker
//!
//! Tracks which inputs of the froxel grid changed since the last `prepare` and
//! which derived arrays therefore need recomputing.
//!
//! # Dirty Reasons
//!
//! | Reason | Layout | XY planes | Z distances | Bounding spheres |
//! |--------|--------|-----------|-------------|------------------|
//! | viewport | yes | yes | | yes |
//! | projection (incl. camera near/far) | | yes | yes | yes |
//! | options (light near/far) | | | yes | yes |
//!
//! Setters compare the incoming value bit-exactly against the stored one, so a
//! value that round-trips unchanged never marks anything dirty.
//!
//! # Example
//!
//! ```
//! use clustered_lights::render::froxel_layout::Viewport;
//! use clustered_lights::render::froxel_tracker::{DirtyFlags, FroxelUpdateTracker};
//!
//! let mut tracker = FroxelUpdateTracker::new();
//! tracker.take_dirty();
//!
//! assert!(tracker.set_viewport(Viewport::new(1280, 720)));
//! assert!(!tracker.set_viewport(Viewport::new(1280, 720)));
//! assert_eq!(tracker.take_dirty(), DirtyFlags::VIEWPORT);
//! ```

use glam::Mat4;

use super::froxel_config::FroxelOptions;
use super::froxel_layout::Viewport;

/// Set of dirty reasons.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DirtyFlags(u8);

impl DirtyFlags {
    pub const NONE: Self = Self(0);
    pub const VIEWPORT: Self = Self(1 << 0);
    pub const PROJECTION: Self = Self(1 << 1);
    pub const OPTIONS: Self = Self(1 << 2);
    pub const ALL: Self = Self(0b111);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any bit of `other` is set.
    #[inline]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for DirtyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Stages a `prepare` call re-ran.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrepareReport {
    pub layout: bool,
    pub planes_xy: bool,
    pub distances_z: bool,
    pub bounding_spheres: bool,
}

impl PrepareReport {
    /// Stages that depend on the given dirty reasons.
    pub fn from_dirty(dirty: DirtyFlags) -> Self {
        Self {
            layout: dirty.contains(DirtyFlags::VIEWPORT),
            planes_xy: dirty.intersects(DirtyFlags::VIEWPORT | DirtyFlags::PROJECTION),
            distances_z: dirty.intersects(DirtyFlags::PROJECTION | DirtyFlags::OPTIONS),
            bounding_spheres: !dirty.is_empty(),
        }
    }

    #[inline]
    pub fn any(&self) -> bool {
        self.layout || self.planes_xy || self.distances_z || self.bounding_spheres
    }
}

impl std::fmt::Display for PrepareReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages = [
            ("layout", self.layout),
            ("planes_xy", self.planes_xy),
            ("distances_z", self.distances_z),
            ("bounding_spheres", self.bounding_spheres),
        ];
        let mut first = true;
        for (name, ran) in stages {
            if ran {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("nothing")?;
        }
        Ok(())
    }
}

/// Stored froxelizer inputs plus their dirty bits.
///
/// Everything starts dirty so the first `prepare` builds all derived state.
#[derive(Clone, Debug)]
pub struct FroxelUpdateTracker {
    dirty: DirtyFlags,
    viewport: Viewport,
    projection: Mat4,
    camera_near: f32,
    camera_far: f32,
    options: FroxelOptions,
}

impl Default for FroxelUpdateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FroxelUpdateTracker {
    pub fn new() -> Self {
        Self {
            dirty: DirtyFlags::ALL,
            viewport: Viewport::default(),
            projection: Mat4::IDENTITY,
            camera_near: 0.1,
            camera_far: 100.0,
            options: FroxelOptions::default(),
        }
    }

    /// Store a new viewport; returns true when it differs from the stored one.
    pub fn set_viewport(&mut self, viewport: Viewport) -> bool {
        if viewport == self.viewport {
            return false;
        }
        self.viewport = viewport;
        self.dirty.insert(DirtyFlags::VIEWPORT);
        true
    }

    /// Store a new projection and camera clip range; returns true on any bit change.
    pub fn set_projection(&mut self, projection: Mat4, camera_near: f32, camera_far: f32) -> bool {
        let unchanged = matrix_bits(&projection) == matrix_bits(&self.projection)
            && camera_near.to_bits() == self.camera_near.to_bits()
            && camera_far.to_bits() == self.camera_far.to_bits();
        if unchanged {
            return false;
        }
        self.projection = projection;
        self.camera_near = camera_near;
        self.camera_far = camera_far;
        self.dirty.insert(DirtyFlags::PROJECTION);
        true
    }

    /// Store new light range options; returns true on any bit change.
    pub fn set_options(&mut self, options: FroxelOptions) -> bool {
        if options.light_near.to_bits() == self.options.light_near.to_bits()
            && options.light_far.to_bits() == self.options.light_far.to_bits()
        {
            return false;
        }
        self.options = options;
        self.dirty.insert(DirtyFlags::OPTIONS);
        true
    }

    /// Return and clear the pending dirty reasons.
    pub fn take_dirty(&mut self) -> DirtyFlags {
        std::mem::take(&mut self.dirty)
    }

    #[inline]
    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    #[inline]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    #[inline]
    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    #[inline]
    pub fn camera_near(&self) -> f32 {
        self.camera_near
    }

    #[inline]
    pub fn camera_far(&self) -> f32 {
        self.camera_far
    }

    /// Options as set, before clamping to the camera range.
    #[inline]
    pub fn options(&self) -> FroxelOptions {
        self.options
    }
}

fn matrix_bits(m: &Mat4) -> [u32; 16] {
    m.to_cols_array().map(f32::to_bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_tracker() -> FroxelUpdateTracker {
        let mut tracker = FroxelUpdateTracker::new();
        tracker.set_viewport(Viewport::new(800, 600));
        tracker.set_projection(Mat4::perspective_rh(1.0, 4.0 / 3.0, 0.1, 100.0), 0.1, 100.0);
        tracker.take_dirty();
        tracker
    }

    #[test]
    fn test_starts_all_dirty() {
        let tracker = FroxelUpdateTracker::new();
        assert_eq!(tracker.dirty(), DirtyFlags::ALL);
        assert_eq!(
            PrepareReport::from_dirty(tracker.dirty()),
            PrepareReport {
                layout: true,
                planes_xy: true,
                distances_z: true,
                bounding_spheres: true,
            }
        );
    }

    #[test]
    fn test_take_dirty_clears() {
        let mut tracker = FroxelUpdateTracker::new();
        assert_eq!(tracker.take_dirty(), DirtyFlags::ALL);
        assert!(tracker.dirty().is_empty());
        assert!(!PrepareReport::from_dirty(tracker.dirty()).any());
    }

    #[test]
    fn test_same_values_stay_clean() {
        let mut tracker = clean_tracker();
        assert!(!tracker.set_viewport(Viewport::new(800, 600)));
        assert!(!tracker.set_projection(
            Mat4::perspective_rh(1.0, 4.0 / 3.0, 0.1, 100.0),
            0.1,
            100.0
        ));
        assert!(!tracker.set_options(FroxelOptions::default()));
        assert!(tracker.dirty().is_empty());
    }

    #[test]
    fn test_options_only_skips_planes() {
        let mut tracker = clean_tracker();
        assert!(tracker.set_options(FroxelOptions::new(2.0, 50.0)));
        let report = PrepareReport::from_dirty(tracker.take_dirty());
        assert!(!report.layout);
        assert!(!report.planes_xy);
        assert!(report.distances_z);
        assert!(report.bounding_spheres);
        assert_eq!(report.to_string(), "distances_z, bounding_spheres");
    }

    #[test]
    fn test_projection_change() {
        let mut tracker = clean_tracker();
        assert!(tracker.set_projection(Mat4::perspective_rh(1.2, 4.0 / 3.0, 0.1, 100.0), 0.1, 100.0));
        // camera range alone is a projection change too
        assert!(tracker.set_projection(Mat4::perspective_rh(1.2, 4.0 / 3.0, 0.1, 100.0), 0.2, 100.0));
        let dirty = tracker.take_dirty();
        assert_eq!(dirty, DirtyFlags::PROJECTION);
        let report = PrepareReport::from_dirty(dirty);
        assert!(!report.layout && report.planes_xy && report.distances_z);
    }

    #[test]
    fn test_viewport_change_skips_z() {
        let mut tracker = clean_tracker();
        assert!(tracker.set_viewport(Viewport::new(1024, 768)));
        let report = PrepareReport::from_dirty(tracker.take_dirty());
        assert!(report.layout && report.planes_xy && report.bounding_spheres);
        assert!(!report.distances_z);
    }

    #[test]
    fn test_signed_zero_counts_as_change() {
        let mut tracker = clean_tracker();
        let mut m = tracker.projection();
        m.w_axis.x = -0.0;
        assert!(tracker.set_projection(m, 0.1, 100.0));
    }

    #[test]
    fn test_flag_ops() {
        let flags = DirtyFlags::VIEWPORT | DirtyFlags::OPTIONS;
        assert!(flags.contains(DirtyFlags::VIEWPORT));
        assert!(!flags.contains(DirtyFlags::PROJECTION));
        assert!(flags.intersects(DirtyFlags::OPTIONS | DirtyFlags::PROJECTION));
        assert!(!flags.intersects(DirtyFlags::PROJECTION));
        assert_eq!(PrepareReport::default().to_string(), "nothing");
    }
}
