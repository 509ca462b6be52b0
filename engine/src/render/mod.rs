//! Render Module
//!
//! Clustered light culling for forward+ shading. The view frustum is split into
//! froxels; every frame each visible point or spot light is assigned to the
//! froxels it can affect, and the per-froxel lists are packed into the two
//! buffers the lighting shader reads.

pub mod froxel_assignment;
pub mod froxel_bounds;
pub mod froxel_buffers;
pub mod froxel_config;
pub mod froxel_geometry;
pub mod froxel_layout;
pub mod froxel_lights;
pub mod froxel_tracker;
pub mod froxel_upload;
pub mod froxelizer;
pub mod light_tree;
pub mod uniforms;

// Re-export the froxelizer entry point and its inputs
pub use froxelizer::{Froxelizer, FroxelGridInfo};
pub use froxel_config::{
    FroxelConfigError, FroxelOptions, FroxelizerConfig,
    FROXEL_SLICE_COUNT, FROXEL_BUFFER_MAX_ENTRY_COUNT, RECORD_BUFFER_ENTRY_COUNT,
    MAX_LIGHT_COUNT, depth_slice_bounds,
};
pub use froxel_layout::{FroxelGrid, Viewport, compute_froxel_layout};
pub use froxel_lights::{LightKind, LightParameters, PositionalLight, SpotCone};

// Re-export the scheduling and upload seams
pub use froxel_assignment::{RayonScheduler, SerialScheduler, ShardScheduler};
pub use froxel_upload::{FroxelGpuBuffers, GpuBufferService, WgpuBufferService};

// Re-export output types consumed by shaders and debug tools
pub use froxel_bounds::Froxel;
pub use froxel_buffers::{CompactionStats, FroxelEntry, LightBitset};
pub use froxel_tracker::PrepareReport;
pub use light_tree::{LightTree, LightTreeNode};
pub use uniforms::FroxelUniforms;
