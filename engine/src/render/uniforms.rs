//! Uniform Structs for GPU Shaders
//!
//! Contains the froxel uniform block the lighting shader reads alongside the
//! froxel and record buffers. Must match the WGSL layout exactly.

use super::froxel_bounds::FroxelFrustum;

/// Fraction of the light far distance over which lights fade out.
pub const LIGHT_FAR_FADE_FRACTION: f32 = 0.1;

/// Froxel uniforms.
///
/// WGSL layout (64 bytes total):
///   offset  0: z_params (vec4<f32>)                 = 16 bytes
///   offset 16: f_params (vec4<u32>)                 = 16 bytes
///   offset 32: counts (vec4<u32>)                   = 16 bytes
///   offset 48: froxel_count_xy (vec2<f32>)          = 8 bytes
///   offset 56: light_far_attenuation (vec2<f32>)    = 8 bytes
///   Total: 64 bytes
///
/// A fragment at pixel `p` and view depth `z < 0` lives in froxel
/// `x = floor(p.x * froxel_count_xy.x)`, `y = floor(p.y * froxel_count_xy.y)`,
/// `slice = floor(log2(-z) * z_params.x + z_params.y)`, at index
/// `dot(f_params.xyz, (x, y, slice))`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FroxelUniforms {
    /// `(1 / linearizer, count_z - log2(light_far) / linearizer, light_far, count_z)`
    pub z_params: [f32; 4],
    /// Froxel index strides `(1, count_x, count_x * count_y, count_z)`
    pub f_params: [u32; 4],
    /// `(count_x, count_y, count_z, dimension)`
    pub counts: [u32; 4],
    /// Pixel to froxel scale, `1 / dimension` on both axes
    pub froxel_count_xy: [f32; 2],
    /// `(a, b)` such that `saturate(a - b * d²)` fades lights out near light far
    pub light_far_attenuation: [f32; 2],
}

// Compile-time assertion to verify struct size is exactly 64 bytes
const _: () = {
    assert!(
        std::mem::size_of::<FroxelUniforms>() == 64,
        "FroxelUniforms must be exactly 64 bytes for GPU compatibility"
    );
};

impl FroxelUniforms {
    /// Derive the uniform block from the current frustum slicing.
    pub fn from_frustum(frustum: &FroxelFrustum) -> Self {
        let grid = frustum.grid();
        let z_params = frustum.z_params();
        let light_far = frustum.options().light_far;
        let inv_dimension = 1.0 / grid.dimension as f32;
        Self {
            z_params: [z_params.x, z_params.y, light_far, grid.count_z as f32],
            f_params: [1, grid.count_x, grid.count_x * grid.count_y, grid.count_z],
            counts: [grid.count_x, grid.count_y, grid.count_z, grid.dimension],
            froxel_count_xy: [inv_dimension, inv_dimension],
            light_far_attenuation: light_far_attenuation(light_far),
        }
    }

    /// Evaluate the light far fade for a view distance, as the shader does.
    pub fn light_far_fade(&self, distance: f32) -> f32 {
        let [a, b] = self.light_far_attenuation;
        (a - b * distance * distance).clamp(0.0, 1.0)
    }

    /// Froxel index the shader computes for a pixel and view depth.
    pub fn froxel_index(&self, pixel_x: f32, pixel_y: f32, view_z: f32) -> u32 {
        let x = ((pixel_x * self.froxel_count_xy[0]) as u32).min(self.counts[0] - 1);
        let y = ((pixel_y * self.froxel_count_xy[1]) as u32).min(self.counts[1] - 1);
        let slice = if view_z >= 0.0 {
            0
        } else {
            let s = ((-view_z).log2() * self.z_params[0] + self.z_params[1]).floor();
            (s.max(0.0) as u32).min(self.counts[2] - 1)
        };
        x * self.f_params[0] + y * self.f_params[1] + slice * self.f_params[2]
    }
}

/// Coefficients of `saturate(a - b * d²)`, which is 1 up to 90% of `light_far`
/// and reaches 0 at `light_far`.
pub fn light_far_attenuation(light_far: f32) -> [f32; 2] {
    let fade = 1.0 - (1.0 - LIGHT_FAR_FADE_FRACTION) * (1.0 - LIGHT_FAR_FADE_FRACTION);
    [1.0 / fade, 1.0 / (fade * light_far * light_far)]
}
