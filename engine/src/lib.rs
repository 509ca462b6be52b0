//! Clustered Lights Library
//!
//! CPU-side clustered light culling ("froxelization") for wgpu renderers.
//!
//! # Modules
//!
//! - [`render`] - Froxel grid construction, light assignment, record compaction and
//!   GPU upload
//!
//! # Example
//!
//! ```ignore
//! use clustered_lights::{Froxelizer, FroxelizerConfig, RayonScheduler, Viewport, WgpuBufferService};
//!
//! let mut froxelizer = Froxelizer::new(FroxelizerConfig::from_limits(&device.limits())?)?;
//! let mut service = WgpuBufferService::new(&device, &queue);
//! let buffers = froxelizer.create_gpu_buffers(&mut service);
//! let scheduler = RayonScheduler::new();
//!
//! // every frame
//! froxelizer.set_viewport(Viewport::new(width, height));
//! froxelizer.set_projection(camera.projection, camera.near, camera.far);
//! froxelizer.prepare();
//! froxelizer.froxelize_lights(&camera.view, &visible_lights, &scheduler);
//! froxelizer.commit(&mut service, &buffers);
//! ```

pub mod render;

// Re-export the render module contents at crate level for convenience
pub use render::*;
