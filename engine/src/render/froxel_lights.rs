//! Positional Lights for Froxelization
//!
//! Inbound description of point and spot lights, plus the per-light working
//! parameters the assignment loop consumes.
//!
//! Lights arrive in world space; [`FroxelLight::from_light`] moves them into view
//! space and precomputes the cone terms once per light per frame.

use glam::{Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use super::froxel_config::MIN_SPOT_OUTER_ANGLE_DEGREES;

/// Light type and its type-specific shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LightKind {
    #[default]
    Point,
    /// Spot light with a cone half-angle in radians
    Spot { outer_angle: f32 },
}

/// A positional light as supplied by the scene.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionalLight {
    /// World position (meters)
    pub position: Vec3,
    /// World direction the light points to (spot lights only)
    pub direction: Vec3,
    /// Influence radius (meters)
    pub radius: f32,
    pub kind: LightKind,
}

impl Default for PositionalLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            radius: 1.0,
            kind: LightKind::Point,
        }
    }
}

impl PositionalLight {
    /// Create a point light.
    pub fn point(position: Vec3, radius: f32) -> Self {
        Self {
            position,
            radius,
            ..Self::default()
        }
    }

    /// Create a spot light; `outer_angle` is the cone half-angle in radians.
    pub fn spot(position: Vec3, direction: Vec3, radius: f32, outer_angle: f32) -> Self {
        Self {
            position,
            direction,
            radius,
            kind: LightKind::Spot { outer_angle },
        }
    }

    #[inline]
    pub fn is_spot(&self) -> bool {
        matches!(self.kind, LightKind::Spot { .. })
    }

    /// Per-type parameters derived from the light description.
    pub fn parameters(&self) -> LightParameters {
        LightParameters {
            falloff_inv_sqr: 1.0 / (self.radius * self.radius),
            cone: match self.kind {
                LightKind::Point => None,
                LightKind::Spot { outer_angle } => Some(SpotCone::from_outer_angle(outer_angle)),
            },
        }
    }
}

/// Precomputed cone terms of a spot light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpotCone {
    /// `cos²(outer_angle)`
    pub cos_sqr: f32,
    /// `1 / sin(outer_angle)`
    pub inv_sin: f32,
}

impl SpotCone {
    /// Build the cone terms, clamping the half-angle to [0.5°, 90°].
    pub fn from_outer_angle(outer_angle: f32) -> Self {
        let angle = outer_angle.clamp(
            MIN_SPOT_OUTER_ANGLE_DEGREES.to_radians(),
            std::f32::consts::FRAC_PI_2,
        );
        let (sin, cos) = angle.sin_cos();
        Self {
            cos_sqr: cos * cos,
            inv_sin: 1.0 / sin,
        }
    }
}

/// Light-parameter view used by the froxelizer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightParameters {
    /// `1 / radius²`
    pub falloff_inv_sqr: f32,
    pub cone: Option<SpotCone>,
}

/// Per-light working parameters in view space.
///
/// Point lights carry `inv_sin = +inf`, which the assignment loop reads as
/// "no cone".
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FroxelLight {
    pub position: Vec3,
    pub radius: f32,
    pub radius_sqr: f32,
    /// Normalized spot axis
    pub axis: Vec3,
    pub inv_sin: f32,
    pub cos_sqr: f32,
}

impl FroxelLight {
    pub fn from_light(light: &PositionalLight, view_matrix: &Mat4) -> Self {
        let position = view_matrix.transform_point3(light.position);
        let axis = view_matrix
            .transform_vector3(light.direction)
            .try_normalize()
            .unwrap_or(Vec3::NEG_Z);
        let (inv_sin, cos_sqr) = match light.parameters().cone {
            Some(cone) => (cone.inv_sin, cone.cos_sqr),
            None => (f32::INFINITY, 0.0),
        };
        Self {
            position,
            radius: light.radius,
            radius_sqr: light.radius * light.radius,
            axis,
            inv_sin,
            cos_sqr,
        }
    }

    #[inline]
    pub fn is_spot(&self) -> bool {
        self.inv_sin.is_finite()
    }

    /// Normalized-device depth range `(min, max)` covered by the light.
    ///
    /// The near side is clipped to the camera near plane so the projection stays
    /// finite.
    pub fn depth_range(&self, projection: &Mat4, camera_near: f32) -> Vec2 {
        let z_near = (-camera_near).min(self.position.z + self.radius);
        let z_far = self.position.z - self.radius;
        let project = |z: f32| {
            let clip = *projection * Vec4::new(0.0, 0.0, z, 1.0);
            clip.z / clip.w
        };
        let (a, b) = (project(z_near), project(z_far));
        Vec2::new(a.min(b), a.max(b))
    }

    /// View-space sphere as `(center, radius²)`.
    #[inline]
    pub fn marching_sphere(&self) -> Vec4 {
        self.position.extend(self.radius_sqr)
    }

    /// Distance of the light's far extent from the camera plane.
    #[inline]
    pub fn far_extent(&self) -> f32 {
        self.radius - self.position.z
    }
}
