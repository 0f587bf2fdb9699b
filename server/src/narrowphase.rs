//! Exact swept-sphere tests against expanded world shapes.
//!
//! Every query is a sphere of `radius` moving from `start` to `end`; a zero
//! radius degenerates to a line segment. Tests are written against the
//! shape inflated by the sweep radius, so the swept centre is traced as a
//! point and contact points are pushed back onto the real surface.

use crate::expansion::WorldShape;
use crate::geometry::{closest_segment_params, Aabb, Plane};
use glam::Vec3;
use serde::{Deserialize, Serialize};

const BISECT_STEPS: usize = 40;
const PROJECTION_ROUNDS: usize = 64;
const CONTACT_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepQuery {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
}

impl SweepQuery {
    pub fn new(start: Vec3, end: Vec3, radius: f32) -> Self {
        Self {
            start,
            end,
            radius: radius.max(0.0),
        }
    }

    pub fn ray(start: Vec3, end: Vec3) -> Self {
        Self::new(start, end, 0.0)
    }

    pub fn delta(&self) -> Vec3 {
        self.end - self.start
    }

    pub fn length(&self) -> f32 {
        self.delta().length()
    }

    pub fn direction(&self) -> Vec3 {
        self.delta().normalize_or_zero()
    }

    pub fn point_at(&self, t: f32) -> Vec3 {
        self.start.lerp(self.end, t)
    }

    /// Bounds of the whole swept volume.
    pub fn aabb(&self) -> Aabb {
        Aabb::new(self.start, self.end).inflate(self.radius)
    }

    pub fn is_degenerate(&self) -> bool {
        self.delta().length_squared() <= f32::EPSILON * f32::EPSILON
    }
}

/// Where and how a sweep passes through one shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Sweep fraction at which the sphere first touches the shape.
    pub entry_fraction: f32,
    pub exit_fraction: f32,
    pub entry_point: Vec3,
    pub entry_normal: Vec3,
    pub exit_point: Vec3,
    pub exit_normal: Vec3,
    /// Non-zero only when the sweep starts overlapping the shape.
    pub penetration_depth: f32,
    pub distance: f32,
}

/// Parametric overlap of the swept centre with the inflated shape.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Crossing {
    enter: f32,
    exit: f32,
    starts_inside: bool,
    ends_inside: bool,
}

impl WorldShape {
    /// Positive outside the surface, negative inside.
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        match self {
            WorldShape::Sphere { center, radius } => point.distance(*center) - radius,
            WorldShape::Box {
                center,
                rotation,
                half_extents,
            } => {
                let local = rotation.inverse() * (point - *center);
                let d = local.abs() - *half_extents;
                d.max(Vec3::ZERO).length() + d.max_element().min(0.0)
            }
            WorldShape::Capsule { a, b, radius } => {
                point.distance(closest_on_segment(point, *a, *b)) - radius
            }
            WorldShape::Convex { planes, .. } => {
                let deepest = planes
                    .iter()
                    .map(|p| p.signed_distance(point))
                    .fold(f32::NEG_INFINITY, f32::max);
                if deepest <= 0.0 {
                    deepest
                } else {
                    point.distance(project_onto_planes(planes, point))
                }
            }
        }
    }

    /// Unit direction pointing away from the shape at `point`.
    pub fn outward_normal(&self, point: Vec3) -> Vec3 {
        match self {
            WorldShape::Sphere { center, .. } => (point - *center).normalize_or_zero(),
            WorldShape::Box {
                center,
                rotation,
                half_extents,
            } => {
                let local = rotation.inverse() * (point - *center);
                let clamped = local.clamp(-*half_extents, *half_extents);
                let outside = local - clamped;
                let local_normal = if outside.length_squared() > f32::EPSILON * f32::EPSILON {
                    outside.normalize()
                } else {
                    // Inside: push out through the nearest face.
                    let d = local.abs() - *half_extents;
                    let axis = if d.x >= d.y && d.x >= d.z {
                        0
                    } else if d.y >= d.z {
                        1
                    } else {
                        2
                    };
                    let mut n = Vec3::ZERO;
                    n[axis] = if local[axis] < 0.0 { -1.0 } else { 1.0 };
                    n
                };
                *rotation * local_normal
            }
            WorldShape::Capsule { a, b, .. } => {
                (point - closest_on_segment(point, *a, *b)).normalize_or_zero()
            }
            WorldShape::Convex { planes, .. } => {
                let nearest_face = planes
                    .iter()
                    .max_by(|x, y| x.signed_distance(point).total_cmp(&y.signed_distance(point)));
                let Some(face) = nearest_face else {
                    return Vec3::ZERO;
                };
                if face.signed_distance(point) <= 0.0 {
                    return face.normal;
                }
                let away = point - project_onto_planes(planes, point);
                if away.length_squared() > f32::EPSILON * f32::EPSILON {
                    away.normalize()
                } else {
                    face.normal
                }
            }
        }
    }
}

/// Closest point of the polytope bounded by `planes`, by Dykstra's
/// alternating projections onto the half-spaces.
fn project_onto_planes(planes: &[Plane], point: Vec3) -> Vec3 {
    let mut x = point;
    let mut corrections = vec![Vec3::ZERO; planes.len()];
    for _ in 0..PROJECTION_ROUNDS {
        let before = x;
        for (plane, correction) in planes.iter().zip(corrections.iter_mut()) {
            let y = x + *correction;
            x = y - plane.normal * plane.signed_distance(y).max(0.0);
            *correction = y - x;
        }
        if x.distance_squared(before) <= 1e-12 {
            break;
        }
    }
    x
}

fn closest_on_segment(point: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return a;
    }
    let t = ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Runs the sweep against one shape.
pub fn sweep_shape(sweep: &SweepQuery, shape: &WorldShape) -> Option<Contact> {
    let crossing = if sweep.is_degenerate() {
        static_overlap(sweep, shape)
    } else {
        match shape {
            WorldShape::Sphere { center, radius } => sweep_sphere(sweep, *center, *radius),
            WorldShape::Box {
                center,
                rotation,
                half_extents,
            } => {
                let to_local = |p: Vec3| rotation.inverse() * (p - *center);
                let local_box = Aabb::from_center_half_extents(Vec3::ZERO, *half_extents);
                let (start, end) = (to_local(sweep.start), to_local(sweep.end));
                let t_star = local_box.closest_segment_param(start, end);
                convex_crossing(
                    |t| local_box.distance_to(start.lerp(end, t)),
                    (0.0, 1.0),
                    t_star,
                    sweep.radius,
                )
            }
            WorldShape::Capsule { a, b, radius } => {
                let (t_star, _) = closest_segment_params(sweep.start, sweep.end, *a, *b);
                convex_crossing(
                    |t| {
                        let p = sweep.point_at(t);
                        p.distance(closest_on_segment(p, *a, *b))
                    },
                    (0.0, 1.0),
                    t_star,
                    radius + sweep.radius,
                )
            }
            WorldShape::Convex { planes, .. } => clip_convex(sweep, shape, planes),
        }
    }?;

    Some(contact_from_crossing(sweep, shape, crossing))
}

fn static_overlap(sweep: &SweepQuery, shape: &WorldShape) -> Option<Crossing> {
    if shape.signed_distance(sweep.start) <= sweep.radius {
        Some(Crossing {
            enter: 0.0,
            exit: 0.0,
            starts_inside: true,
            ends_inside: true,
        })
    } else {
        None
    }
}

/// Sphere-sphere time of impact.
fn sweep_sphere(sweep: &SweepQuery, center: Vec3, radius: f32) -> Option<Crossing> {
    let combined = radius + sweep.radius;
    let m = sweep.start - center;
    let d = sweep.delta();
    let a = d.dot(d);
    let b = m.dot(d);
    let c = m.dot(m) - combined * combined;

    let disc = b * b - a * c;
    if disc < 0.0 {
        return None;
    }
    let root = disc.sqrt();
    let t0 = (-b - root) / a;
    let t1 = (-b + root) / a;
    if t1 < 0.0 || t0 > 1.0 {
        return None;
    }
    Some(Crossing {
        enter: t0.max(0.0),
        exit: t1.min(1.0),
        starts_inside: c <= 0.0,
        ends_inside: t1 > 1.0,
    })
}

/// Finds where a convex distance profile crosses `threshold` within
/// `range`, a sub-interval of `[0, 1]`.
///
/// `t_star` must minimise `distance` over `range`.
fn convex_crossing<F>(
    distance: F,
    range: (f32, f32),
    t_star: f32,
    threshold: f32,
) -> Option<Crossing>
where
    F: Fn(f32) -> f32,
{
    let (first, last) = range;
    let inside = |t: f32| distance(t) <= threshold;
    if !inside(t_star) {
        return None;
    }

    let inside_first = inside(first);
    let enter = if inside_first {
        first
    } else {
        let (mut lo, mut hi) = (first, t_star);
        for _ in 0..BISECT_STEPS {
            let mid = (lo + hi) * 0.5;
            if inside(mid) {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        hi
    };

    let inside_last = inside(last);
    let exit = if inside_last {
        last
    } else {
        let (mut lo, mut hi) = (t_star, last);
        for _ in 0..BISECT_STEPS {
            let mid = (lo + hi) * 0.5;
            if inside(mid) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    };

    Some(Crossing {
        enter,
        exit,
        starts_inside: inside_first && first <= 0.0,
        ends_inside: inside_last && last >= 1.0,
    })
}

/// Minimiser of a convex profile over `[lo, hi]` by ternary search.
fn minimise<F>(profile: F, mut lo: f32, mut hi: f32) -> f32
where
    F: Fn(f32) -> f32,
{
    for _ in 0..BISECT_STEPS {
        let a = lo + (hi - lo) / 3.0;
        let b = hi - (hi - lo) / 3.0;
        if profile(a) <= profile(b) {
            hi = b;
        } else {
            lo = a;
        }
    }
    (lo + hi) * 0.5
}

/// Clips against the hull, then rounds off its edges and corners.
///
/// Planes pushed out by the sweep radius bound a sharp-cornered polytope
/// that contains the rounded one, so the clipped interval brackets the
/// exact crossing. Face contacts are already exact and skip refinement.
fn clip_convex(sweep: &SweepQuery, shape: &WorldShape, planes: &[Plane]) -> Option<Crossing> {
    let sharp = clip_planes(sweep, planes)?;
    if sweep.radius <= 0.0 {
        return Some(sharp);
    }

    let distance = |t: f32| shape.signed_distance(sweep.point_at(t));
    let touching = |t: f32| distance(t) <= sweep.radius + CONTACT_TOLERANCE;
    if touching(sharp.enter) && touching(sharp.exit) {
        return Some(sharp);
    }

    let t_star = minimise(distance, sharp.enter, sharp.exit);
    convex_crossing(distance, (sharp.enter, sharp.exit), t_star, sweep.radius)
}

/// Cyrus-Beck clipping against planes pushed out by the sweep radius.
fn clip_planes(sweep: &SweepQuery, planes: &[Plane]) -> Option<Crossing> {
    let delta = sweep.delta();
    let mut enter = f32::NEG_INFINITY;
    let mut exit = f32::INFINITY;

    for plane in planes {
        let offset = plane.distance + sweep.radius;
        let numerator = offset - plane.normal.dot(sweep.start);
        let denominator = plane.normal.dot(delta);

        if denominator.abs() <= f32::EPSILON {
            if numerator < 0.0 {
                return None;
            }
            continue;
        }

        let t = numerator / denominator;
        if denominator < 0.0 {
            enter = enter.max(t);
        } else {
            exit = exit.min(t);
        }
        if enter > exit {
            return None;
        }
    }

    if exit < 0.0 || enter > 1.0 {
        return None;
    }
    Some(Crossing {
        enter: enter.max(0.0),
        exit: exit.min(1.0),
        starts_inside: enter <= 0.0,
        ends_inside: exit >= 1.0,
    })
}

fn contact_from_crossing(sweep: &SweepQuery, shape: &WorldShape, crossing: Crossing) -> Contact {
    let fallback = -sweep.direction();

    let (entry_point, entry_normal) = if crossing.starts_inside {
        let n = shape.outward_normal(sweep.start);
        (sweep.start, if n == Vec3::ZERO { fallback } else { n })
    } else {
        let center = sweep.point_at(crossing.enter);
        let n = shape.outward_normal(center);
        let n = if n == Vec3::ZERO { fallback } else { n };
        (center - n * sweep.radius, n)
    };

    let (exit_point, exit_normal) = if crossing.ends_inside {
        (sweep.end, sweep.direction())
    } else {
        let center = sweep.point_at(crossing.exit);
        let n = shape.outward_normal(center);
        let n = if n == Vec3::ZERO { sweep.direction() } else { n };
        (center - n * sweep.radius, n)
    };

    let penetration_depth = if crossing.starts_inside {
        (sweep.radius - shape.signed_distance(sweep.start)).max(0.0)
    } else {
        0.0
    };

    Contact {
        entry_fraction: crossing.enter,
        exit_fraction: crossing.exit,
        entry_point,
        entry_normal,
        exit_point,
        exit_normal,
        penetration_depth,
        distance: crossing.enter * sweep.length(),
    }
}
