use std::rc::Rc;

use glam::{Mat3, Mat4, Vec3};
use smallvec::SmallVec;

/// Indexed triangle soup shared between the render side and the ray tests.
#[derive(Debug, Default)]
pub struct SurfaceGeometry {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
}

pub fn ray_sphere_intersection(origin: Vec3, dir: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let to_origin = origin - center;
    let half_b = to_origin.dot(dir);
    let c = to_origin.length_squared() - radius * radius;
    let discriminant = half_b * half_b - c;
    if discriminant < 0.0 {
        return None;
    }
    let sqrt_d = discriminant.sqrt();
    let near = -half_b - sqrt_d;
    if near >= 0.0 {
        return Some(near);
    }
    let far = -half_b + sqrt_d;
    if far >= 0.0 {
        return Some(far);
    }
    None
}

/// Intersects a ray with a finite quad spanning
/// `[-half_width, half_width] x [-half_height, half_height]` in the local
/// XY plane of `to_world`. Returns the world-space distance and hit point.
pub fn ray_quad_intersection(
    origin: Vec3,
    dir: Vec3,
    to_world: &Mat4,
    half_width: f32,
    half_height: f32,
) -> Option<(f32, Vec3)> {
    let inv = to_world.inverse();
    if !matrix_is_finite(&inv) {
        return None;
    }
    let origin_local = inv.transform_point3(origin);
    let dir_local = inv.transform_vector3(dir);
    if dir_local.z.abs() < 1e-8 {
        return None;
    }
    let t_local = -origin_local.z / dir_local.z;
    if t_local < 0.0 {
        return None;
    }
    let hit_local = origin_local + dir_local * t_local;
    if hit_local.x < -half_width
        || hit_local.x > half_width
        || hit_local.y < -half_height
        || hit_local.y > half_height
    {
        return None;
    }
    let hit_world = to_world.transform_point3(hit_local);
    let distance = (hit_world - origin).length();
    Some((distance, hit_world))
}

pub fn ray_triangle_intersection(origin: Vec3, dir: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    let edge_ab = b - a;
    let edge_ac = c - a;
    let p = dir.cross(edge_ac);
    let det = edge_ab.dot(p);
    if det.abs() < 1e-8 {
        return None;
    }
    let inv_det = 1.0 / det;
    let to_a = origin - a;
    let u = to_a.dot(p) * inv_det;
    if u < 0.0 || u > 1.0 {
        return None;
    }
    let q = to_a.cross(edge_ab);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge_ac.dot(q) * inv_det;
    if t < 0.0 {
        return None;
    }
    Some(t)
}

/// Nearest triangle hit on an indexed mesh. Returns the world-space
/// distance, hit point, and (unnormalized-winding) face normal.
pub fn ray_hit_mesh(
    origin: Vec3,
    dir: Vec3,
    to_world: &Mat4,
    geometry: &SurfaceGeometry,
) -> Option<(f32, Vec3, Vec3)> {
    let inv = to_world.inverse();
    if !matrix_is_finite(&inv) {
        return None;
    }
    let origin_local = inv.transform_point3(origin);
    let dir_local = inv.transform_vector3(dir);
    if dir_local.length_squared() <= f32::EPSILON {
        return None;
    }
    let dir_local = dir_local.normalize();
    let mut nearest_t = f32::INFINITY;
    let mut nearest_normal = Vec3::ZERO;
    for tri in geometry.indices.chunks_exact(3) {
        let (Some(&a), Some(&b), Some(&c)) = (
            geometry.positions.get(tri[0] as usize),
            geometry.positions.get(tri[1] as usize),
            geometry.positions.get(tri[2] as usize),
        ) else {
            continue;
        };
        if let Some(t) = ray_triangle_intersection(origin_local, dir_local, a, b, c) {
            if t < nearest_t {
                nearest_t = t;
                nearest_normal = (b - a).cross(c - a);
            }
        }
    }
    if !nearest_t.is_finite() {
        return None;
    }
    let hit_world = to_world.transform_point3(origin_local + dir_local * nearest_t);
    let normal_world = (Mat3::from_mat4(inv.transpose()) * nearest_normal).normalize();
    let distance = (hit_world - origin).length();
    Some((distance, hit_world, normal_world))
}

pub fn matrix_is_finite(mat: &Mat4) -> bool {
    mat.to_cols_array().iter().all(|v| v.is_finite())
}

/// A pickable thing registered with the spatial registry.
pub enum PickTarget {
    /// Debug sphere drawn at a viewpoint. Only registered while debug
    /// mode has them visible.
    NodeSphere {
        uuid: String,
        center: Vec3,
        radius: f32,
    },
    /// The invisible hit plane under a floor marker ring.
    FloorMarker {
        uuid: String,
        to_world: Mat4,
        half_extent: f32,
    },
    /// The exterior model. One entry per mesh primitive.
    ExteriorSurface {
        name: String,
        to_world: Mat4,
        geometry: Rc<SurfaceGeometry>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitTarget {
    Node { uuid: String },
    FloorMarker { uuid: String },
    Exterior { name: String },
}

#[derive(Debug, Clone)]
pub struct PickHit {
    pub target: HitTarget,
    pub distance: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

/// Registry of everything a pointer ray can land on.
///
/// Components re-register their targets whenever their world transforms
/// change. `cast` returns hits ordered nearest first; equal distances keep
/// registration order, so repeated casts over an unchanged registry always
/// produce the same list.
#[derive(Default)]
pub struct PickRegistry {
    targets: Vec<PickTarget>,
}

impl PickRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }

    pub fn add(&mut self, target: PickTarget) {
        self.targets.push(target);
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Casts a ray through every registered target. `dir` must be
    /// normalized so sphere distances come back in world units.
    pub fn cast(&self, origin: Vec3, dir: Vec3) -> SmallVec<[PickHit; 8]> {
        let mut hits: SmallVec<[PickHit; 8]> = SmallVec::new();
        for target in &self.targets {
            match target {
                PickTarget::NodeSphere {
                    uuid,
                    center,
                    radius,
                } => {
                    if let Some(t) = ray_sphere_intersection(origin, dir, *center, *radius) {
                        let point = origin + dir * t;
                        hits.push(PickHit {
                            target: HitTarget::Node { uuid: uuid.clone() },
                            distance: t,
                            point,
                            normal: (point - *center).normalize_or_zero(),
                        });
                    }
                }
                PickTarget::FloorMarker {
                    uuid,
                    to_world,
                    half_extent,
                } => {
                    if let Some((distance, point)) =
                        ray_quad_intersection(origin, dir, to_world, *half_extent, *half_extent)
                    {
                        hits.push(PickHit {
                            target: HitTarget::FloorMarker { uuid: uuid.clone() },
                            distance,
                            point,
                            normal: to_world.transform_vector3(Vec3::Z).normalize(),
                        });
                    }
                }
                PickTarget::ExteriorSurface {
                    name,
                    to_world,
                    geometry,
                } => {
                    if let Some((distance, point, normal)) =
                        ray_hit_mesh(origin, dir, to_world, geometry)
                    {
                        hits.push(PickHit {
                            target: HitTarget::Exterior { name: name.clone() },
                            distance,
                            point,
                            normal,
                        });
                    }
                }
            }
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    pub fn cast_nearest(&self, origin: Vec3, dir: Vec3) -> Option<PickHit> {
        self.cast(origin, dir).into_iter().next()
    }
}
