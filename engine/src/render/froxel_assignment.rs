//! Froxel Light Assignment
//!
//! Determines, for every visible positional light, which froxels it touches and
//! records the result in per-shard light bitmasks.
//!
//! ## Sharding
//!
//! Lights are split across [`GROUP_COUNT`] shards with a stride: shard `g` handles
//! lights `g, g + 8, g + 16, ...`. Each shard owns one `u32` word per froxel, so
//! light `j` is bit `j / 8` of shard `j % 8`. Shards never write the same memory,
//! which lets a [`ShardScheduler`] run them on any number of threads without
//! locking.
//!
//! ## Per-Light Algorithm
//!
//! 1. Reject lights beyond the light far distance or entirely in front of the
//!    camera near plane
//! 2. Project the light's view-space box (clipped to the near plane) to get a
//!    conservative froxel range
//! 3. March the light sphere through the range: intersect it with the nearest
//!    Z boundary of each slice, then each Y slab, then find the first and last
//!    X slab that still intersects
//! 4. Point lights mark the whole X span; spot lights also test each froxel's
//!    bounding sphere against the cone

use glam::{Vec2, Vec3};
use rayon::prelude::*;

use super::froxel_bounds::FroxelFrustum;
use super::froxel_buffers::LightBitset;
use super::froxel_config::{GROUP_COUNT, LIGHT_PER_GROUP};
use super::froxel_geometry::{
    sphere_cone_intersection_fast, sphere_plane_intersection_z, sphere_slab_intersection,
};
use super::froxel_lights::FroxelLight;

// ============================================================================
// Scheduling
// ============================================================================

/// Fork-join primitive used to run the assignment shards.
///
/// Implementations call `job(shard_index, shard_words)` exactly once for every
/// shard and return only after all calls have completed.
pub trait ShardScheduler {
    fn run_shards(&self, shards: &mut [Vec<u32>], job: &(dyn Fn(usize, &mut [u32]) + Sync));
}

/// Runs every shard inline on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialScheduler;

impl ShardScheduler for SerialScheduler {
    fn run_shards(&self, shards: &mut [Vec<u32>], job: &(dyn Fn(usize, &mut [u32]) + Sync)) {
        for (index, shard) in shards.iter_mut().enumerate() {
            job(index, shard);
        }
    }
}

/// Runs the shards on a rayon thread pool.
///
/// Uses the global pool unless built with [`RayonScheduler::with_threads`].
#[derive(Debug, Default)]
pub struct RayonScheduler {
    pool: Option<rayon::ThreadPool>,
}

impl RayonScheduler {
    /// Schedule on rayon's global pool.
    pub fn new() -> Self {
        Self { pool: None }
    }

    /// Schedule on a dedicated pool of `threads` workers, each pinned to its own
    /// core when the platform reports core ids.
    pub fn with_threads(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let builder = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|index| format!("froxel-shard-{}", index));

        #[cfg(not(target_arch = "wasm32"))]
        let builder = {
            let cores = core_affinity::get_core_ids().unwrap_or_default();
            builder.start_handler(move |index| {
                if cores.len() > 1 {
                    let _ = core_affinity::set_for_current(cores[index % cores.len()]);
                }
            })
        };

        Ok(Self {
            pool: Some(builder.build()?),
        })
    }

    /// Number of worker threads shards are spread over.
    pub fn thread_count(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }
}

impl ShardScheduler for RayonScheduler {
    fn run_shards(&self, shards: &mut [Vec<u32>], job: &(dyn Fn(usize, &mut [u32]) + Sync)) {
        let mut run = || {
            shards
                .par_iter_mut()
                .enumerate()
                .for_each(|(index, shard)| job(index, shard));
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

// ============================================================================
// Shard scratch arena
// ============================================================================

/// Per-shard light words, allocated once at the froxel ceiling.
#[derive(Clone, Debug)]
pub struct FroxelShardData {
    shards: Vec<Vec<u32>>,
}

impl FroxelShardData {
    /// Allocate [`GROUP_COUNT`] shards of `froxel_capacity` words.
    pub fn new(froxel_capacity: usize) -> Self {
        Self {
            shards: vec![vec![0u32; froxel_capacity]; GROUP_COUNT],
        }
    }

    /// Words of shard `group`.
    #[inline]
    pub fn shard(&self, group: usize) -> &[u32] {
        &self.shards[group]
    }

    /// Run the assignment for `lights` over the current frustum.
    ///
    /// Only the first `froxel_count` words of each shard are cleared and written.
    pub fn assign(
        &mut self,
        frustum: &FroxelFrustum,
        lights: &[FroxelLight],
        exhaustive_scan: bool,
        scheduler: &dyn ShardScheduler,
    ) {
        let froxel_count = frustum.grid().froxel_count();
        debug_assert!(lights.len() <= GROUP_COUNT * LIGHT_PER_GROUP);

        scheduler.run_shards(&mut self.shards, &|group: usize, words: &mut [u32]| {
            let words = &mut words[..froxel_count];
            words.fill(0);
            for (slot, light) in lights.iter().enumerate().skip(group).step_by(GROUP_COUNT) {
                let bit = 1u32 << (slot / GROUP_COUNT);
                froxelize_light(frustum, light, bit, words, exhaustive_scan);
            }
        });
    }

    /// Merge the shard words into one bitset per froxel.
    ///
    /// Merged bit `l` holds light `(l % 32) * 8 + l / 32`.
    pub fn merge_into(&self, records: &mut [LightBitset]) {
        for (index, record) in records.iter_mut().enumerate() {
            for (word, pair) in record.words.iter_mut().zip(self.shards.chunks_exact(2)) {
                *word = pair[0][index] as u64 | (pair[1][index] as u64) << 32;
            }
        }
    }
}

// ============================================================================
// Per-light assignment
// ============================================================================

/// Inclusive froxel index range touched by a light.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FroxelRange {
    pub x: (usize, usize),
    pub y: (usize, usize),
    pub z: (usize, usize),
}

/// Conservative froxel range of `light`, or `None` when it cannot touch the grid.
pub fn light_froxel_range(frustum: &FroxelFrustum, light: &FroxelLight) -> Option<FroxelRange> {
    let center = light.position;
    let radius = light.radius;
    let light_far = frustum.options().light_far;
    let camera_near = frustum.camera_near();

    if center.z + radius < -light_far {
        return None;
    }
    if light.far_extent() <= camera_near {
        return None;
    }

    let z_near = (-camera_near).min(center.z + radius);
    let z_far = -light.far_extent();

    let mut min = Vec2::splat(f32::INFINITY);
    let mut max = Vec2::splat(f32::NEG_INFINITY);
    for z in [z_near, z_far] {
        for (dx, dy) in [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)] {
            let corner = Vec3::new(center.x + dx * radius, center.y + dy * radius, z);
            let clip = frustum.project(corner);
            min = min.min(clip);
            max = max.max(clip);
        }
    }
    if max.x < -1.0 || min.x > 1.0 || max.y < -1.0 || min.y > 1.0 {
        return None;
    }

    Some(FroxelRange {
        x: (
            frustum.find_slice_x(min.x) as usize,
            frustum.find_slice_x(max.x) as usize,
        ),
        y: (
            frustum.find_slice_y(min.y) as usize,
            frustum.find_slice_y(max.y) as usize,
        ),
        z: (
            frustum.find_slice_z(z_near) as usize,
            frustum.find_slice_z(z_far) as usize,
        ),
    })
}

/// Set `bit` in every froxel word of `words` the light intersects.
pub fn froxelize_light(
    frustum: &FroxelFrustum,
    light: &FroxelLight,
    bit: u32,
    words: &mut [u32],
    exhaustive_scan: bool,
) {
    let Some(bounded) = light_froxel_range(frustum, light) else {
        return;
    };
    let grid = frustum.grid();
    let range = if exhaustive_scan {
        FroxelRange {
            x: (0, grid.count_x as usize - 1),
            y: (0, grid.count_y as usize - 1),
            z: (0, grid.count_z as usize - 1),
        }
    } else {
        bounded
    };

    let planes_x = frustum.planes_x();
    let planes_y = frustum.planes_y();
    let distances_z = frustum.distances_z();
    let bounding_spheres = frustum.bounding_spheres();
    let (count_x, stride) = (grid.count_x as usize, grid.slice_stride());

    let sphere = light.marching_sphere();
    let z_center = frustum.find_slice_z(light.position.z) as usize;

    for iz in range.z.0..=range.z.1 {
        let mut cz = sphere;
        if iz != z_center {
            // nearest boundary of this slice to the light center
            let distance = if iz < z_center {
                distances_z[iz + 1]
            } else {
                distances_z[iz]
            };
            cz = sphere_plane_intersection_z(sphere, distance);
            if cz.w <= 0.0 {
                continue;
            }
        }

        for iy in range.y.0..=range.y.1 {
            let cy = sphere_slab_intersection(cz, planes_y[iy], planes_y[iy + 1]);
            if cy.w <= 0.0 {
                continue;
            }

            let intersects_column =
                |ix: usize| sphere_slab_intersection(cy, planes_x[ix], planes_x[ix + 1]).w > 0.0;

            let mut bx = range.x.0;
            while bx <= range.x.1 && !intersects_column(bx) {
                bx += 1;
            }
            if bx > range.x.1 {
                continue;
            }
            let mut ex = range.x.1;
            while ex > bx && !intersects_column(ex) {
                ex -= 1;
            }

            let row = iz * stride + iy * count_x;
            if light.is_spot() {
                for index in row + bx..=row + ex {
                    if sphere_cone_intersection_fast(
                        bounding_spheres[index],
                        light.position,
                        light.axis,
                        light.inv_sin,
                        light.cos_sqr,
                    ) {
                        words[index] |= bit;
                    }
                }
            } else {
                for word in &mut words[row + bx..=row + ex] {
                    *word |= bit;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::froxel_config::FroxelOptions;
    use crate::render::froxel_layout::{Viewport, compute_froxel_layout};
    use crate::render::froxel_lights::PositionalLight;
    use glam::Mat4;

    fn frustum() -> FroxelFrustum {
        let viewport = Viewport::new(256, 256);
        let grid = compute_froxel_layout(viewport, 1024);
        let mut frustum = FroxelFrustum::new(grid.froxel_count());
        frustum.set_layout(grid, viewport);
        frustum.set_projection(
            Mat4::perspective_rh_gl(90f32.to_radians(), 1.0, 0.1, 200.0),
            0.1,
            200.0,
        );
        frustum.compute_planes_xy();
        frustum.compute_distances_z(FroxelOptions::new(1.0, 100.0));
        frustum.compute_bounding_spheres();
        frustum
    }

    fn view_light(light: PositionalLight) -> FroxelLight {
        FroxelLight::from_light(&light, &Mat4::IDENTITY)
    }

    fn marked(words: &[u32]) -> Vec<usize> {
        words
            .iter()
            .enumerate()
            .filter(|(_, w)| **w != 0)
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn test_center_light_marks_center_froxels() {
        let frustum = frustum();
        let grid = frustum.grid();
        let mut words = vec![0u32; grid.froxel_count()];
        let light = view_light(PositionalLight::point(Vec3::new(0.0, 0.0, -10.0), 1.0));
        froxelize_light(&frustum, &light, 1, &mut words, false);

        let slice = frustum.find_slice_z(-10.0);
        for (x, y) in [(3, 3), (3, 4), (4, 3), (4, 4)] {
            assert_eq!(words[grid.froxel_index(x, y, slice)], 1);
        }
        assert_eq!(words[grid.froxel_index(0, 0, slice)], 0);
        assert_eq!(words[grid.froxel_index(4, 4, 15)], 0);
    }

    #[test]
    fn test_light_beyond_far_is_rejected() {
        let frustum = frustum();
        let light = view_light(PositionalLight::point(Vec3::new(0.0, 0.0, -150.0), 10.0));
        assert_eq!(light_froxel_range(&frustum, &light), None);
        let mut words = vec![0u32; frustum.grid().froxel_count()];
        froxelize_light(&frustum, &light, 1, &mut words, true);
        assert!(marked(&words).is_empty());
    }

    #[test]
    fn test_light_behind_camera_is_rejected() {
        let frustum = frustum();
        let light = view_light(PositionalLight::point(Vec3::new(0.0, 0.0, 5.0), 2.0));
        assert_eq!(light_froxel_range(&frustum, &light), None);
    }

    #[test]
    fn test_light_around_camera_touches_slice_zero() {
        let frustum = frustum();
        let grid = frustum.grid();
        let mut words = vec![0u32; grid.froxel_count()];
        let light = view_light(PositionalLight::point(Vec3::new(0.0, 0.0, 0.5), 2.0));
        froxelize_light(&frustum, &light, 1, &mut words, false);
        let hits = marked(&words);
        assert!(!hits.is_empty());
        assert!(hits.contains(&grid.froxel_index(4, 4, 0)));
    }

    #[test]
    fn test_offscreen_light_is_rejected() {
        let frustum = frustum();
        let light = view_light(PositionalLight::point(Vec3::new(100.0, 0.0, -10.0), 1.0));
        assert_eq!(light_froxel_range(&frustum, &light), None);
    }

    #[test]
    fn test_bounded_range_keeps_every_froxel() {
        let frustum = frustum();
        let lights = [
            PositionalLight::point(Vec3::new(0.0, 0.0, -5.0), 2.0),
            PositionalLight::point(Vec3::new(3.0, -2.0, -12.0), 4.0),
            PositionalLight::point(Vec3::new(-20.0, 10.0, -30.0), 8.0),
            PositionalLight::point(Vec3::new(1.0, 0.5, 1.5), 3.0),
            PositionalLight::point(Vec3::new(0.0, 0.0, -98.0), 6.0),
            PositionalLight::spot(Vec3::new(1.0, 1.0, -3.0), Vec3::new(0.2, 0.0, -1.0), 25.0, 0.3),
            PositionalLight::spot(Vec3::new(0.0, -1.0, 0.5), Vec3::NEG_Z, 12.0, 0.5),
        ];
        for (i, light) in lights.iter().map(|l| view_light(*l)).enumerate() {
            let mut bounded = vec![0u32; frustum.grid().froxel_count()];
            let mut exhaustive = bounded.clone();
            froxelize_light(&frustum, &light, 1, &mut bounded, false);
            froxelize_light(&frustum, &light, 1, &mut exhaustive, true);
            assert!(!marked(&exhaustive).is_empty(), "light {} marks nothing", i);
            for index in marked(&exhaustive) {
                assert_eq!(bounded[index], 1, "light {}: froxel {} dropped by the bounded range", i, index);
            }
            assert_eq!(marked(&bounded), marked(&exhaustive), "light {}", i);
        }
    }

    #[test]
    fn test_narrow_spot_marks_fewer_froxels_than_point() {
        let frustum = frustum();
        let count = frustum.grid().froxel_count();
        let position = Vec3::new(0.0, 0.0, -4.0);
        let spot = view_light(PositionalLight::spot(position, Vec3::NEG_Z, 30.0, 2f32.to_radians()));
        let point = view_light(PositionalLight::point(position, 30.0));

        let mut spot_words = vec![0u32; count];
        let mut point_words = vec![0u32; count];
        froxelize_light(&frustum, &spot, 1, &mut spot_words, false);
        froxelize_light(&frustum, &point, 1, &mut point_words, false);

        let spot_hits = marked(&spot_words);
        assert!(!spot_hits.is_empty());
        assert!(spot_hits.len() * 4 < marked(&point_words).len());
        assert!(spot_hits.iter().all(|i| point_words[*i] == 1));
    }

    #[test]
    fn test_shards_are_strided() {
        let frustum = frustum();
        let lights: Vec<FroxelLight> = (0..20)
            .map(|i| view_light(PositionalLight::point(Vec3::new(0.0, 0.0, -10.0), 1.0 + i as f32 * 0.01)))
            .collect();
        let mut shards = FroxelShardData::new(frustum.grid().froxel_count());
        shards.assign(&frustum, &lights, false, &SerialScheduler);

        let index = frustum.grid().froxel_index(4, 4, frustum.find_slice_z(-10.0));
        // 20 lights: shards 0..4 hold 3 lights, shards 4..8 hold 2
        for group in 0..GROUP_COUNT {
            let expected = if group < 4 { 0b111 } else { 0b11 };
            assert_eq!(shards.shard(group)[index], expected, "shard {}", group);
        }

        let mut records = vec![LightBitset::default(); frustum.grid().froxel_count()];
        shards.merge_into(&mut records);
        let lights_in_cell: Vec<u8> = records[index].light_indices().collect();
        assert_eq!(lights_in_cell.len(), 20);
        let mut sorted = lights_in_cell.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<u8>>());
    }

    #[test]
    fn test_rayon_global_pool_matches_serial() {
        let frustum = frustum();
        let lights: Vec<FroxelLight> = (0..24)
            .map(|i| view_light(PositionalLight::point(Vec3::new(i as f32 - 12.0, 0.0, -10.0), 3.0)))
            .collect();

        let mut serial = FroxelShardData::new(frustum.grid().froxel_count());
        serial.assign(&frustum, &lights, false, &SerialScheduler);
        let mut parallel = FroxelShardData::new(frustum.grid().froxel_count());
        parallel.assign(&frustum, &lights, false, &RayonScheduler::new());

        for group in 0..GROUP_COUNT {
            assert_eq!(serial.shard(group), parallel.shard(group));
        }
    }

    #[test]
    fn test_rayon_matches_serial() {
        let frustum = frustum();
        let lights: Vec<FroxelLight> = (0..64)
            .map(|i| {
                let angle = i as f32 * 0.37;
                view_light(PositionalLight::point(
                    Vec3::new(angle.cos() * 8.0, angle.sin() * 5.0, -3.0 - i as f32),
                    2.0 + (i % 5) as f32,
                ))
            })
            .collect();

        let mut serial = FroxelShardData::new(frustum.grid().froxel_count());
        serial.assign(&frustum, &lights, false, &SerialScheduler);

        let scheduler = RayonScheduler::with_threads(4).unwrap();
        assert_eq!(scheduler.thread_count(), 4);
        let mut parallel = FroxelShardData::new(frustum.grid().froxel_count());
        parallel.assign(&frustum, &lights, false, &scheduler);

        for group in 0..GROUP_COUNT {
            assert_eq!(serial.shard(group), parallel.shard(group));
        }
    }
}
