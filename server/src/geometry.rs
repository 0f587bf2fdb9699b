//! Rigid transforms, bounding boxes and planes shared by every stage of the
//! rewind pipeline.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Translation, rotation and per-axis scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn from_translation_rotation(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
            scale: Vec3::ONE,
        }
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Maps a point from this transform's local space to its parent space.
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.translation + self.rotation * (self.scale * point)
    }

    /// Rotates and scales a direction without translating it.
    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation * (self.scale * vector)
    }

    /// Composes `self * child`: `child` is expressed in the space of `self`.
    ///
    /// Non-uniform parent scale under a rotated child would shear; the scale
    /// is kept per axis, which is what the shape expansion expects.
    pub fn mul_transform(&self, child: &Transform) -> Transform {
        Transform {
            translation: self.transform_point(child.translation),
            rotation: (self.rotation * child.rotation).normalize(),
            scale: self.scale * child.scale,
        }
    }

    /// Largest absolute scale factor over all axes.
    pub fn max_scale(&self) -> f32 {
        self.scale.abs().max_element()
    }

    pub fn is_finite(&self) -> bool {
        self.translation.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }
}

/// Axis-aligned bounding box. `min <= max` on every axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box that becomes valid after the first `include`.
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        let half = half_extents.abs();
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Self {
        points.into_iter().fold(Self::EMPTY, |acc, p| acc.include(p))
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn include(&self, point: Vec3) -> Self {
        Self {
            min: self.min.min(point),
            max: self.max.max(point),
        }
    }

    pub fn union(&self, other: &Aabb) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn inflate(&self, margin: f32) -> Self {
        let delta = Vec3::splat(margin);
        Self {
            min: self.min - delta,
            max: self.max + delta,
        }
    }

    /// Inclusive on faces: touching boxes overlap.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        !(self.max.x < other.min.x
            || self.min.x > other.max.x
            || self.max.y < other.min.y
            || self.min.y > other.max.y
            || self.max.z < other.min.z
            || self.min.z > other.max.z)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Distance from the centre to a corner.
    pub fn bounding_radius(&self) -> f32 {
        self.half_extents().length()
    }

    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min, self.max)
    }

    /// Slab test of the segment `start + t * (end - start)`, `t in [0, 1]`.
    ///
    /// Returns the parametric interval inside the box.
    pub fn segment_interval(&self, start: Vec3, end: Vec3) -> Option<(f32, f32)> {
        let delta = end - start;
        let mut t_min = 0.0_f32;
        let mut t_max = 1.0_f32;

        for axis in 0..3 {
            let origin = start[axis];
            let dir = delta[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);

            if dir.abs() < f32::EPSILON {
                if origin < lo || origin > hi {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / dir;
            let mut t0 = (lo - origin) * inv;
            let mut t1 = (hi - origin) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }

        Some((t_min, t_max))
    }

    /// Segment parameter of the point closest to the box.
    ///
    /// Minimised by golden-section search; the distance to a box is convex
    /// along a segment so this converges.
    pub fn closest_segment_param(&self, start: Vec3, end: Vec3) -> f32 {
        if let Some((t0, t1)) = self.segment_interval(start, end) {
            return (t0 + t1) * 0.5;
        }
        let distance_at = |t: f32| self.distance_to(start.lerp(end, t));

        const INV_PHI: f32 = 0.618_034;
        let (mut a, mut b) = (0.0_f32, 1.0_f32);
        let mut c = b - (b - a) * INV_PHI;
        let mut d = a + (b - a) * INV_PHI;
        for _ in 0..40 {
            if distance_at(c) < distance_at(d) {
                b = d;
            } else {
                a = c;
            }
            c = b - (b - a) * INV_PHI;
            d = a + (b - a) * INV_PHI;
        }

        [(a + b) * 0.5, 0.0, 1.0]
            .into_iter()
            .min_by(|x, y| distance_at(*x).total_cmp(&distance_at(*y)))
            .unwrap_or(0.0)
    }

    /// Smallest distance between the segment and the box.
    pub fn segment_distance(&self, start: Vec3, end: Vec3) -> f32 {
        let t = self.closest_segment_param(start, end);
        self.distance_to(start.lerp(end, t))
    }

    /// Zero inside the box.
    pub fn distance_to(&self, point: Vec3) -> f32 {
        point.distance(self.closest_point(point))
    }
}

/// Plane `normal . x = distance` with a unit normal pointing outward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            distance: normal.dot(point),
        }
    }

    /// Positive outside, negative inside.
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.distance
    }

    /// Maps the plane through `transform`, normals by the inverse transpose.
    pub fn transformed(&self, transform: &Transform) -> Plane {
        let on_plane = self.normal * self.distance;
        let scaled_normal = self.normal / transform.scale;
        let normal = (transform.rotation * scaled_normal).normalize_or_zero();
        Plane::from_point_normal(transform.transform_point(on_plane), normal)
    }
}

/// Closest points between segments `p1-q1` and `p2-q2` as parameters `(s, t)`.
pub fn closest_segment_params(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (f32, f32) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    if a <= f32::EPSILON && e <= f32::EPSILON {
        return (0.0, 0.0);
    }
    if a <= f32::EPSILON {
        return (0.0, (f / e).clamp(0.0, 1.0));
    }
    let c = d1.dot(r);
    if e <= f32::EPSILON {
        return ((-c / a).clamp(0.0, 1.0), 0.0);
    }

    let b = d1.dot(d2);
    let denom = a * e - b * b;
    let mut s = if denom > f32::EPSILON {
        ((b * f - c * e) / denom).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut t = (b * s + f) / e;
    if t < 0.0 {
        t = 0.0;
        s = (-c / a).clamp(0.0, 1.0);
    } else if t > 1.0 {
        t = 1.0;
        s = ((b - c) / a).clamp(0.0, 1.0);
    }
    (s, t)
}
