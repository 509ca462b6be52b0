//! Froxelizer
//!
//! Ties the froxel pipeline together. One frame runs, in order:
//!
//! 1. [`Froxelizer::prepare`]: recompute the layout, planes, Z distances and
//!    bounding spheres that the tracked inputs invalidated
//! 2. [`Froxelizer::froxelize_lights`]: assign lights to froxels across the shards,
//!    join, merge and compact into the froxel and record buffers
//! 3. [`Froxelizer::commit`]: upload the buffers through a [`GpuBufferService`]
//!
//! Every buffer is sized from the [`FroxelizerConfig`] ceilings when the froxelizer
//! is created; nothing is allocated per frame.
//!
//! # Example
//!
//! ```
//! use clustered_lights::render::froxelizer::Froxelizer;
//! use clustered_lights::render::froxel_config::{FroxelOptions, FroxelizerConfig};
//! use clustered_lights::render::froxel_layout::Viewport;
//! use clustered_lights::render::froxel_lights::PositionalLight;
//! use clustered_lights::render::froxel_assignment::SerialScheduler;
//! use glam::{Mat4, Vec3};
//!
//! let mut froxelizer = Froxelizer::new(FroxelizerConfig::default()).unwrap();
//! froxelizer.set_viewport(Viewport::new(1280, 720));
//! froxelizer.set_projection(Mat4::perspective_rh(1.0, 1280.0 / 720.0, 0.1, 200.0), 0.1, 200.0);
//! froxelizer.set_options(FroxelOptions::new(1.0, 100.0));
//! froxelizer.prepare();
//!
//! let lights = [PositionalLight::point(Vec3::new(0.0, 0.0, -10.0), 3.0)];
//! froxelizer.froxelize_lights(&Mat4::IDENTITY, &lights, &SerialScheduler);
//! assert!(froxelizer.stats().records_written > 0);
//! ```

use glam::{Mat4, Vec2, Vec3, Vec4};
use log::{debug, info, trace, warn};

use super::froxel_assignment::{FroxelShardData, ShardScheduler};
use super::froxel_bounds::{Froxel, FroxelFrustum};
use super::froxel_buffers::{CompactionStats, FroxelEntry, LightBitset, compact_records};
use super::froxel_config::{FroxelConfigError, FroxelOptions, FroxelizerConfig, MAX_LIGHT_COUNT};
use super::froxel_layout::{FroxelGrid, Viewport, compute_froxel_layout};
use super::froxel_lights::{FroxelLight, PositionalLight};
use super::froxel_tracker::{DirtyFlags, FroxelUpdateTracker, PrepareReport};
use super::froxel_upload::{FroxelGpuBuffers, GpuBufferService, align_copy_size};
use super::light_tree::{LightTree, LightTreeNode};
use super::uniforms::FroxelUniforms;

/// Snapshot of the current grid for debugging and visualization tools.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FroxelGridInfo {
    pub grid: FroxelGrid,
    /// Viewport after clamping to the minimum size
    pub viewport: Viewport,
    pub froxel_count: usize,
    /// Clip-space to froxel-index scale per axis
    pub clip_to_froxel: Vec2,
    pub light_near: f32,
    pub light_far: f32,
    pub linearizer: f32,
}

/// Clustered light culling over a froxel grid.
pub struct Froxelizer {
    config: FroxelizerConfig,
    tracker: FroxelUpdateTracker,
    frustum: FroxelFrustum,
    shards: FroxelShardData,
    records: Vec<LightBitset>,
    entries: Vec<FroxelEntry>,
    record_buffer: Vec<u8>,
    lights: Vec<FroxelLight>,
    light_depth_ranges: Vec<Vec2>,
    uniforms: FroxelUniforms,
    stats: CompactionStats,
    exhausted: bool,
}

impl Froxelizer {
    /// Validate `config` and allocate every buffer at its ceiling.
    pub fn new(config: FroxelizerConfig) -> Result<Self, FroxelConfigError> {
        config.validate()?;
        let froxel_capacity = config.froxel_buffer_entry_count as usize;
        let record_capacity = config.record_buffer_entry_count as usize;

        Ok(Self {
            config,
            tracker: FroxelUpdateTracker::new(),
            frustum: FroxelFrustum::new(froxel_capacity),
            shards: FroxelShardData::new(froxel_capacity),
            records: vec![LightBitset::EMPTY; froxel_capacity],
            entries: vec![FroxelEntry::EMPTY; froxel_capacity],
            record_buffer: vec![0u8; align_copy_size(record_capacity)],
            lights: Vec::with_capacity(MAX_LIGHT_COUNT),
            light_depth_ranges: Vec::with_capacity(MAX_LIGHT_COUNT),
            uniforms: FroxelUniforms::default(),
            stats: CompactionStats::default(),
            exhausted: false,
        })
    }

    #[inline]
    pub fn config(&self) -> &FroxelizerConfig {
        &self.config
    }

    /// Scan the whole grid for every light instead of its projected range.
    pub fn set_exhaustive_scan(&mut self, enabled: bool) {
        self.config.exhaustive_scan = enabled;
    }

    /// Returns true when the viewport changed.
    pub fn set_viewport(&mut self, viewport: Viewport) -> bool {
        self.tracker.set_viewport(viewport)
    }

    /// Returns true when the projection or camera clip range changed.
    pub fn set_projection(&mut self, projection: Mat4, near: f32, far: f32) -> bool {
        self.tracker.set_projection(projection, near, far)
    }

    /// Returns true when the light range options changed.
    pub fn set_options(&mut self, options: FroxelOptions) -> bool {
        self.tracker.set_options(options)
    }

    /// Recompute whatever derived state the setters invalidated.
    pub fn prepare(&mut self) -> PrepareReport {
        let dirty = self.tracker.take_dirty();
        let report = PrepareReport::from_dirty(dirty);
        if !report.any() {
            return report;
        }

        if report.layout {
            let viewport = self.tracker.viewport();
            let grid = compute_froxel_layout(viewport, self.config.froxel_buffer_entry_count);
            self.frustum.set_layout(grid, viewport);
            self.entries.fill(FroxelEntry::EMPTY);
            self.stats = CompactionStats::default();
        }
        if dirty.contains(DirtyFlags::PROJECTION) {
            self.frustum.set_projection(
                self.tracker.projection(),
                self.tracker.camera_near(),
                self.tracker.camera_far(),
            );
        }
        if report.planes_xy {
            self.frustum.compute_planes_xy();
        }
        if report.distances_z {
            self.frustum.compute_distances_z(self.tracker.options());
        }
        if report.bounding_spheres {
            self.frustum.compute_bounding_spheres();
        }
        self.uniforms = FroxelUniforms::from_frustum(&self.frustum);

        let grid = self.frustum.grid();
        let options = self.frustum.options();
        debug!(
            "Froxel grid rebuilt ({}): {}x{}x{} froxels of {}px, light range [{}, {}]",
            report,
            grid.count_x,
            grid.count_y,
            grid.count_z,
            grid.dimension,
            options.light_near,
            options.light_far
        );
        report
    }

    /// Assign `lights` (world space) to froxels and compact the result.
    ///
    /// At most [`MAX_LIGHT_COUNT`] lights are supported; callers cap the list
    /// upstream. Pending invalidations are applied first.
    pub fn froxelize_lights(
        &mut self,
        view_matrix: &Mat4,
        lights: &[PositionalLight],
        scheduler: &dyn ShardScheduler,
    ) {
        if !self.tracker.dirty().is_empty() {
            self.prepare();
        }

        debug_assert!(
            lights.len() <= MAX_LIGHT_COUNT,
            "{} lights exceed the supported maximum of {}",
            lights.len(),
            MAX_LIGHT_COUNT
        );
        let lights = &lights[..lights.len().min(MAX_LIGHT_COUNT)];

        let projection = *self.frustum.projection();
        let camera_near = self.frustum.camera_near();
        self.lights.clear();
        self.light_depth_ranges.clear();
        for light in lights {
            let light = FroxelLight::from_light(light, view_matrix);
            self.light_depth_ranges.push(light.depth_range(&projection, camera_near));
            self.lights.push(light);
        }

        let grid = self.frustum.grid();
        let froxel_count = grid.froxel_count();
        self.shards
            .assign(&self.frustum, &self.lights, self.config.exhaustive_scan, scheduler);
        self.shards.merge_into(&mut self.records[..froxel_count]);

        let stats = compact_records(
            &self.records[..froxel_count],
            grid.count_x as usize,
            &mut self.entries[..froxel_count],
            &mut self.record_buffer,
            self.config.record_buffer_entry_count as usize,
        );

        match (stats.exhausted_at, self.exhausted) {
            (Some(froxel), false) => {
                warn!(
                    "Froxel record buffer exhausted at froxel {} of {} ({} bytes); remaining froxels use all {} lights",
                    froxel, froxel_count, self.config.record_buffer_entry_count, stats.all_lights_count
                );
                self.exhausted = true;
            }
            (None, true) => {
                info!("Froxel record buffer fits again ({} bytes used)", stats.bytes_used);
                self.exhausted = false;
            }
            _ => {}
        }
        trace!(
            "Froxelized {} lights: {} records, {} bytes, {} reused from previous row",
            lights.len(),
            stats.records_written,
            stats.bytes_used,
            stats.reused_from_above
        );
        self.stats = stats;
    }

    /// Upload the froxel entries, the used record bytes and the uniforms.
    pub fn commit<S: GpuBufferService>(&self, service: &mut S, buffers: &FroxelGpuBuffers<S::Buffer>) {
        service.update_buffer(
            &buffers.froxel_buffer,
            0,
            bytemuck::cast_slice(self.froxel_entries()),
        );
        let used = align_copy_size(self.stats.bytes_used).min(self.record_buffer.len());
        if used > 0 {
            service.update_buffer(&buffers.record_buffer, 0, &self.record_buffer[..used]);
        }
        service.update_buffer(&buffers.uniform_buffer, 0, bytemuck::bytes_of(&self.uniforms));
    }

    /// Allocate GPU buffers sized for this froxelizer.
    pub fn create_gpu_buffers<S: GpuBufferService>(&self, service: &mut S) -> FroxelGpuBuffers<S::Buffer> {
        FroxelGpuBuffers::new(service, &self.config)
    }

    pub fn grid(&self) -> FroxelGridInfo {
        let grid = self.frustum.grid();
        let options = self.frustum.options();
        FroxelGridInfo {
            grid,
            viewport: self.frustum.viewport(),
            froxel_count: grid.froxel_count(),
            clip_to_froxel: self.frustum.clip_to_froxel(),
            light_near: options.light_near,
            light_far: options.light_far,
            linearizer: self.frustum.linearizer(),
        }
    }

    /// The six view-space planes of froxel (x, y, z).
    pub fn froxel_at(&self, x: u32, y: u32, z: u32) -> Froxel {
        self.frustum.froxel_at(x, y, z)
    }

    /// Entries of the active grid.
    pub fn froxel_entries(&self) -> &[FroxelEntry] {
        &self.entries[..self.frustum.grid().froxel_count()]
    }

    /// Used prefix of the record buffer.
    pub fn record_buffer(&self) -> &[u8] {
        &self.record_buffer[..self.stats.bytes_used]
    }

    /// Light indices stored for froxel `index`.
    pub fn lights_in_froxel(&self, index: usize) -> &[u8] {
        &self.record_buffer[self.entries[index].range()]
    }

    /// Light-range tree over froxel `index`'s lights, keyed by the depth ranges of
    /// the last [`froxelize_lights`](Self::froxelize_lights) call.
    pub fn build_light_tree(&self, froxel_index: usize) -> Vec<LightTreeNode> {
        LightTree::build(self.lights_in_froxel(froxel_index), &self.light_depth_ranges).into_nodes()
    }

    /// Normalized-device depth range of each light from the last frame.
    pub fn light_depth_ranges(&self) -> &[Vec2] {
        &self.light_depth_ranges
    }

    #[inline]
    pub fn uniforms(&self) -> &FroxelUniforms {
        &self.uniforms
    }

    #[inline]
    pub fn stats(&self) -> &CompactionStats {
        &self.stats
    }

    pub fn distances_z(&self) -> &[f32] {
        self.frustum.distances_z()
    }

    pub fn planes_x(&self) -> &[Vec4] {
        self.frustum.planes_x()
    }

    pub fn planes_y(&self) -> &[Vec4] {
        self.frustum.planes_y()
    }

    pub fn bounding_spheres(&self) -> &[Vec4] {
        self.frustum.bounding_spheres()
    }

    /// Light near distance after clamping to the camera range.
    pub fn light_near(&self) -> f32 {
        self.frustum.options().light_near
    }

    /// Light far distance after clamping to the camera range.
    pub fn light_far(&self) -> f32 {
        self.frustum.options().light_far
    }

    /// Froxel column, row and slice of a view-space point.
    pub fn froxel_of_point(&self, point: Vec3) -> (u32, u32, u32) {
        let clip = self.frustum.project(point);
        (
            self.frustum.find_slice_x(clip.x),
            self.frustum.find_slice_y(clip.y),
            self.frustum.find_slice_z(point.z),
        )
    }
}
