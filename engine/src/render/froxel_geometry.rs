//! Closed-form intersection routines used by the froxelizer.
//!
//! Conventions:
//! - A plane is a `Vec4` `(n.x, n.y, n.z, w)`; a point `p` is on its positive side
//!   when `dot(n, p) + w > 0`. Planes are expected to be normalized.
//! - A "marching" sphere is a `Vec4` `(center, radius²)`. Intersecting it with a plane
//!   yields the circle of intersection, stored the same way (center on the plane,
//!   squared radius). A non-positive squared radius means no intersection.
//! - A bounding sphere is a `Vec4` `(center, radius)`.

use glam::{Vec3, Vec4, Vec4Swizzles};

/// Signed distance from `point` to `plane`.
#[inline]
pub fn plane_distance(plane: Vec4, point: Vec3) -> f32 {
    plane.xyz().dot(point) + plane.w
}

/// Intersect a sphere `(center, r²)` with a plane.
///
/// The result is centered on the plane and carries the squared radius of the
/// intersection circle: `r² - d²`.
#[inline]
pub fn sphere_plane_intersection(sphere: Vec4, plane: Vec4) -> Vec4 {
    let d = plane_distance(plane, sphere.xyz());
    let center = sphere.xyz() - plane.xyz() * d;
    center.extend(sphere.w - d * d)
}

/// Intersect a sphere `(center, r²)` with the view-space plane `z = -distance`.
#[inline]
pub fn sphere_plane_intersection_z(sphere: Vec4, distance: f32) -> Vec4 {
    let d = sphere.z + distance;
    Vec4::new(sphere.x, sphere.y, -distance, sphere.w - d * d)
}

/// Intersect a sphere `(center, r²)` with the slab between `lower` and `upper`.
///
/// `lower` faces into the slab (positive inside), `upper` faces out of it. When the
/// center lies inside the slab the sphere is returned untouched; otherwise it is
/// intersected with the nearest boundary.
#[inline]
pub fn sphere_slab_intersection(sphere: Vec4, lower: Vec4, upper: Vec4) -> Vec4 {
    let center = sphere.xyz();
    if plane_distance(lower, center) < 0.0 {
        sphere_plane_intersection(sphere, lower)
    } else if plane_distance(upper, center) > 0.0 {
        sphere_plane_intersection(sphere, upper)
    } else {
        sphere
    }
}

/// Point shared by three planes.
///
/// `P = -(d0·(n1×n2) + d1·(n2×n0) + d2·(n0×n1)) / (n0·(n1×n2))`
#[inline]
pub fn plane_intersection(p0: Vec4, p1: Vec4, p2: Vec4) -> Vec3 {
    let (n0, n1, n2) = (p0.xyz(), p1.xyz(), p2.xyz());
    let n1n2 = n1.cross(n2);
    let n2n0 = n2.cross(n0);
    let n0n1 = n0.cross(n1);
    -(p0.w * n1n2 + p1.w * n2n0 + p2.w * n0n1) / n0.dot(n1n2)
}

/// Fast sphere/cone test (sphere is `(center, radius)`).
///
/// The cone apex is pushed back along the axis by `radius / sin(angle)` so the
/// sphere test reduces to a point-in-cone test. This over-estimates within one
/// sphere radius behind the real apex.
#[inline]
pub fn sphere_cone_intersection_fast(
    sphere: Vec4,
    cone_position: Vec3,
    cone_axis: Vec3,
    cone_inv_sin: f32,
    cone_cos_sqr: f32,
) -> bool {
    let apex = cone_position - (sphere.w * cone_inv_sin) * cone_axis;
    let d = sphere.xyz() - apex;
    let e = cone_axis.dot(d);
    let dd = d.dot(d);
    e * e >= dd * cone_cos_sqr && e > 0.0
}

/// Exact sphere/cone test (sphere is `(center, radius)`).
///
/// Refines the fast test by rejecting spheres that only overlap the region behind
/// the real apex.
#[inline]
pub fn sphere_cone_intersection(
    sphere: Vec4,
    cone_position: Vec3,
    cone_axis: Vec3,
    cone_inv_sin: f32,
    cone_cos_sqr: f32,
) -> bool {
    if !sphere_cone_intersection_fast(sphere, cone_position, cone_axis, cone_inv_sin, cone_cos_sqr) {
        return false;
    }
    let d = sphere.xyz() - cone_position;
    let e = -cone_axis.dot(d);
    let dd = d.dot(d);
    if e * e >= dd * (1.0 - cone_cos_sqr) && e > 0.0 {
        // behind the apex, where the apex is the closest point of the cone
        return dd <= sphere.w * sphere.w;
    }
    true
}
