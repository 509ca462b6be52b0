//! Froxel Bounds Calculation Module
//!
//! Slices the view frustum into froxels. The slicing is stored as shared per-axis
//! boundaries rather than per-froxel geometry:
//!
//! - **X/Y planes**: `count + 1` view-space planes per axis, obtained by transforming the
//!   clip-space slice boundaries through the transposed projection matrix
//! - **Z distances**: `count_z + 1` view distances, `0` followed by a log2 distribution
//!   between the light near and light far distances
//! - **Bounding spheres**: one `(center, radius)` per froxel, fitted around its 8 corners;
//!   only spot lights use them
//!
//! ## Coordinate System
//!
//! View space is right-handed: +X right, +Y up, the camera looks toward -Z. X planes
//! are positive to the right of their boundary, Y planes above it.

use glam::{Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};

use super::froxel_config::{FroxelOptions, depth_slice_boundary, z_linearizer};
use super::froxel_geometry::{plane_distance, plane_intersection};
use super::froxel_layout::{FroxelGrid, Viewport};

/// The six view-space planes of a single froxel, all facing outward.
///
/// Only built on demand (debugging, visualization); the froxelizer itself works
/// from the shared per-axis boundaries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Froxel {
    pub planes: [Vec4; 6],
}

impl Froxel {
    pub const LEFT: usize = 0;
    pub const RIGHT: usize = 1;
    pub const BOTTOM: usize = 2;
    pub const TOP: usize = 3;
    pub const NEAR: usize = 4;
    pub const FAR: usize = 5;

    /// Check if a view-space point is inside the froxel (boundaries included).
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|&plane| plane_distance(plane, point) <= 1e-5)
    }

    /// The 8 corners of the froxel, near face first.
    pub fn corners(&self) -> [Vec3; 8] {
        let p = &self.planes;
        std::array::from_fn(|i| {
            plane_intersection(
                p[Self::LEFT + (i & 1)],
                p[Self::BOTTOM + ((i >> 1) & 1)],
                p[Self::NEAR + (i >> 2)],
            )
        })
    }
}

/// The sliced view frustum: grid layout, boundaries and bounding spheres.
#[derive(Clone, Debug)]
pub struct FroxelFrustum {
    grid: FroxelGrid,
    viewport: Viewport,
    projection: Mat4,
    camera_near: f32,
    camera_far: f32,
    options: FroxelOptions,
    clip_to_froxel: Vec2,
    linearizer: f32,
    /// `(1 / linearizer, count_z - log2(light_far) / linearizer)`
    z_params: Vec2,
    planes_x: Vec<Vec4>,
    planes_y: Vec<Vec4>,
    distances_z: Vec<f32>,
    bounding_spheres: Vec<Vec4>,
}

impl FroxelFrustum {
    /// Create an empty frustum; `bounding_sphere_capacity` is the largest froxel
    /// count it will ever hold.
    pub fn new(bounding_sphere_capacity: usize) -> Self {
        Self {
            grid: FroxelGrid::default(),
            viewport: Viewport::default().clamped(),
            projection: Mat4::IDENTITY,
            camera_near: 0.1,
            camera_far: 100.0,
            options: FroxelOptions::default(),
            clip_to_froxel: Vec2::ONE,
            linearizer: 1.0,
            z_params: Vec2::ZERO,
            planes_x: Vec::new(),
            planes_y: Vec::new(),
            distances_z: Vec::new(),
            bounding_spheres: Vec::with_capacity(bounding_sphere_capacity),
        }
    }

    /// Install a new grid layout for `viewport`.
    ///
    /// Planes and bounding spheres are stale afterwards.
    pub fn set_layout(&mut self, grid: FroxelGrid, viewport: Viewport) {
        let viewport = viewport.clamped();
        self.grid = grid;
        self.viewport = viewport;
        self.clip_to_froxel = Vec2::new(
            0.5 * viewport.width as f32 / grid.dimension as f32,
            0.5 * viewport.height as f32 / grid.dimension as f32,
        );
    }

    /// Install a new projection and camera clip range.
    pub fn set_projection(&mut self, projection: Mat4, camera_near: f32, camera_far: f32) {
        self.projection = projection;
        self.camera_near = camera_near;
        self.camera_far = camera_far;
    }

    /// Compute the X and Y boundary planes from the projection.
    pub fn compute_planes_xy(&mut self) {
        let grid = self.grid;
        let transposed = self.projection.transpose();
        let froxel_width_in_clip = 2.0 * grid.dimension as f32 / self.viewport.width as f32;
        let froxel_height_in_clip = 2.0 * grid.dimension as f32 / self.viewport.height as f32;

        self.planes_x.clear();
        self.planes_x.extend((0..=grid.count_x).map(|i| {
            let x = i as f32 * froxel_width_in_clip - 1.0;
            normalize_plane(transposed * Vec4::new(1.0, 0.0, 0.0, -x))
        }));

        self.planes_y.clear();
        self.planes_y.extend((0..=grid.count_y).map(|i| {
            let y = i as f32 * froxel_height_in_clip - 1.0;
            normalize_plane(transposed * Vec4::new(0.0, 1.0, 0.0, -y))
        }));
    }

    /// Compute the Z boundary distances from the (unsanitized) light options.
    ///
    /// Options are clamped to the camera range first.
    pub fn compute_distances_z(&mut self, options: FroxelOptions) {
        let options = options.sanitized(self.camera_near, self.camera_far);
        let count_z = self.grid.count_z;
        self.options = options;

        self.linearizer = z_linearizer(options.light_near, options.light_far, count_z);
        let inv_linearizer = 1.0 / self.linearizer;
        self.z_params = Vec2::new(
            inv_linearizer,
            count_z as f32 - options.light_far.log2() * inv_linearizer,
        );

        self.distances_z.clear();
        self.distances_z.extend(
            (0..=count_z)
                .map(|i| depth_slice_boundary(i, options.light_near, options.light_far, count_z)),
        );
    }

    /// Fit a bounding sphere around each froxel's 8 corners.
    pub fn compute_bounding_spheres(&mut self) {
        let grid = self.grid;
        self.bounding_spheres.clear();
        for iz in 0..grid.count_z as usize {
            for iy in 0..grid.count_y as usize {
                for ix in 0..grid.count_x as usize {
                    let corners: [Vec3; 8] = std::array::from_fn(|i| {
                        plane_intersection(
                            self.planes_x[ix + (i & 1)],
                            self.planes_y[iy + ((i >> 1) & 1)],
                            z_plane(self.distances_z[iz + (i >> 2)]),
                        )
                    });
                    self.bounding_spheres.push(bounding_sphere(&corners));
                }
            }
        }
        debug_assert_eq!(self.bounding_spheres.len(), grid.froxel_count());
    }

    /// Depth slice containing view-space `z`.
    ///
    /// `z >= 0` (behind the camera) maps to slice 0; the result is clamped to
    /// `[0, count_z - 1]`.
    #[inline]
    pub fn find_slice_z(&self, z: f32) -> u32 {
        if z >= 0.0 {
            return 0;
        }
        let s = ((-z).log2() * self.z_params.x + self.z_params.y).floor();
        (s.max(0.0) as u32).min(self.grid.count_z - 1)
    }

    /// Froxel column containing clip-space `x`, clamped to the grid.
    #[inline]
    pub fn find_slice_x(&self, clip_x: f32) -> u32 {
        let s = ((clip_x + 1.0) * self.clip_to_froxel.x).floor();
        (s.max(0.0) as u32).min(self.grid.count_x - 1)
    }

    /// Froxel row containing clip-space `y`, clamped to the grid.
    #[inline]
    pub fn find_slice_y(&self, clip_y: f32) -> u32 {
        let s = ((clip_y + 1.0) * self.clip_to_froxel.y).floor();
        (s.max(0.0) as u32).min(self.grid.count_y - 1)
    }

    /// Project a view-space point to clip-space x/y.
    #[inline]
    pub fn project(&self, point: Vec3) -> Vec2 {
        let clip = self.projection * point.extend(1.0);
        clip.xy() / clip.w
    }

    /// Build the six planes of froxel (x, y, z).
    pub fn froxel_at(&self, x: u32, y: u32, z: u32) -> Froxel {
        let (x, y, z) = (x as usize, y as usize, z as usize);
        let mut planes = [Vec4::ZERO; 6];
        planes[Froxel::LEFT] = -self.planes_x[x];
        planes[Froxel::RIGHT] = self.planes_x[x + 1];
        planes[Froxel::BOTTOM] = -self.planes_y[y];
        planes[Froxel::TOP] = self.planes_y[y + 1];
        planes[Froxel::NEAR] = z_plane(self.distances_z[z]);
        planes[Froxel::FAR] = -z_plane(self.distances_z[z + 1]);
        Froxel { planes }
    }

    #[inline]
    pub fn grid(&self) -> FroxelGrid {
        self.grid
    }

    #[inline]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    #[inline]
    pub fn projection(&self) -> &Mat4 {
        &self.projection
    }

    #[inline]
    pub fn camera_near(&self) -> f32 {
        self.camera_near
    }

    /// Light range after clamping to the camera range.
    #[inline]
    pub fn options(&self) -> FroxelOptions {
        self.options
    }

    #[inline]
    pub fn linearizer(&self) -> f32 {
        self.linearizer
    }

    #[inline]
    pub fn z_params(&self) -> Vec2 {
        self.z_params
    }

    #[inline]
    pub fn clip_to_froxel(&self) -> Vec2 {
        self.clip_to_froxel
    }

    #[inline]
    pub fn planes_x(&self) -> &[Vec4] {
        &self.planes_x
    }

    #[inline]
    pub fn planes_y(&self) -> &[Vec4] {
        &self.planes_y
    }

    #[inline]
    pub fn distances_z(&self) -> &[f32] {
        &self.distances_z
    }

    #[inline]
    pub fn bounding_spheres(&self) -> &[Vec4] {
        &self.bounding_spheres
    }
}

#[inline]
fn normalize_plane(plane: Vec4) -> Vec4 {
    plane / plane.xyz().length()
}

/// The plane `z = -distance`, positive toward the camera.
#[inline]
fn z_plane(distance: f32) -> Vec4 {
    Vec4::new(0.0, 0.0, 1.0, distance)
}

fn bounding_sphere(corners: &[Vec3; 8]) -> Vec4 {
    let center = corners.iter().copied().sum::<Vec3>() / 8.0;
    let radius_sqr = corners
        .iter()
        .map(|corner| corner.distance_squared(center))
        .fold(0.0f32, f32::max);
    center.extend(radius_sqr.sqrt())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::froxel_layout::compute_froxel_layout;
    use approx::assert_relative_eq;

    fn frustum(width: u32, height: u32, entries: u32, options: FroxelOptions) -> FroxelFrustum {
        let viewport = Viewport::new(width, height);
        let grid = compute_froxel_layout(viewport, entries);
        let projection =
            Mat4::perspective_rh_gl(60f32.to_radians(), width as f32 / height as f32, 0.1, 200.0);
        let mut frustum = FroxelFrustum::new(grid.froxel_count());
        frustum.set_layout(grid, viewport);
        frustum.set_projection(projection, 0.1, 200.0);
        frustum.compute_planes_xy();
        frustum.compute_distances_z(options);
        frustum.compute_bounding_spheres();
        frustum
    }

    #[test]
    fn test_plane_counts() {
        let f = frustum(256, 256, 1024, FroxelOptions::default());
        assert_eq!(f.planes_x().len(), 9);
        assert_eq!(f.planes_y().len(), 9);
        assert_eq!(f.distances_z().len(), 17);
        assert_eq!(f.bounding_spheres().len(), 1024);
    }

    #[test]
    fn test_planes_are_normalized_and_ordered() {
        let f = frustum(640, 480, 2048, FroxelOptions::default());
        let point = Vec3::new(0.3, -0.2, -10.0);
        let dx: Vec<f32> = f.planes_x().iter().map(|&p| plane_distance(p, point)).collect();
        for plane in f.planes_x().iter().chain(f.planes_y()) {
            assert_relative_eq!(plane.xyz().length(), 1.0, epsilon = 1e-5);
        }
        // a point in front of the camera is right of the first boundaries, left of the last
        assert!(dx.first().copied().unwrap() > 0.0);
        assert!(dx.last().copied().unwrap() < 0.0);
        assert!(dx.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_z_distances_monotonic() {
        let f = frustum(256, 256, 1024, FroxelOptions::new(1.0, 100.0));
        let d = f.distances_z();
        assert_eq!(d[0], 0.0);
        assert_eq!(d[d.len() - 1], 100.0);
        assert_relative_eq!(d[1], 1.0, epsilon = 1e-4);
        assert!(d.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_options_are_clamped_to_camera() {
        let f = frustum(256, 256, 1024, FroxelOptions::new(0.001, 5000.0));
        assert_eq!(f.options(), FroxelOptions::new(0.1, 200.0));
        assert_eq!(*f.distances_z().last().unwrap(), 200.0);
    }

    #[test]
    fn test_find_slice_z_inverse() {
        let f = frustum(256, 256, 1024, FroxelOptions::new(1.0, 100.0));
        let d = f.distances_z().to_vec();
        for i in 1..d.len() - 1 {
            let mid = (d[i] * d[i + 1]).sqrt();
            assert_eq!(f.find_slice_z(-mid), i as u32, "slice {} midpoint {}", i, mid);
        }
        assert_eq!(f.find_slice_z(-0.5), 0);
        assert_eq!(f.find_slice_z(0.0), 0);
        assert_eq!(f.find_slice_z(3.0), 0);
        assert_eq!(f.find_slice_z(-1000.0), 15);
    }

    #[test]
    fn test_find_slice_xy() {
        let f = frustum(256, 256, 1024, FroxelOptions::default());
        assert_eq!(f.find_slice_x(-1.0), 0);
        assert_eq!(f.find_slice_x(0.01), 4);
        assert_eq!(f.find_slice_x(5.0), 7);
        assert_eq!(f.find_slice_y(-0.99), 0);
        assert_eq!(f.find_slice_y(0.99), 7);
    }

    #[test]
    fn test_froxel_contains_projected_point() {
        let f = frustum(256, 256, 1024, FroxelOptions::new(1.0, 100.0));
        let point = Vec3::new(1.5, -0.7, -12.0);
        let clip = f.project(point);
        let (x, y, z) = (f.find_slice_x(clip.x), f.find_slice_y(clip.y), f.find_slice_z(point.z));
        assert!(f.froxel_at(x, y, z).contains_point(point));
        assert!(!f.froxel_at((x + 1) % 8, y, z).contains_point(point));
    }

    #[test]
    fn test_bounding_spheres_contain_corners() {
        let f = frustum(320, 200, 1024, FroxelOptions::new(1.0, 100.0));
        let grid = f.grid();
        for (index, sphere) in f.bounding_spheres().iter().enumerate() {
            let (x, y, z) = grid.froxel_coords(index);
            for corner in f.froxel_at(x, y, z).corners() {
                let distance = corner.distance(sphere.xyz());
                assert!(distance <= sphere.w * 1.0001 + 1e-5);
            }
        }
    }

    #[test]
    fn test_far_froxels_larger_than_near() {
        let f = frustum(256, 256, 1024, FroxelOptions::new(1.0, 100.0));
        let grid = f.grid();
        let near = f.bounding_spheres()[grid.froxel_index(4, 4, 1)];
        let far = f.bounding_spheres()[grid.froxel_index(4, 4, 15)];
        assert!(far.w > near.w * 10.0);
    }
}
