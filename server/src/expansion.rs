//! Turns a local shape table plus a (possibly interpolated) pose into
//! world-space primitives for narrowphase testing.

use crate::geometry::{Aabb, Plane, Transform};
use crate::shape::{MaterialTag, Segment, ShapeDef, ShapeKind};
use crate::snapshot::Pose;
use glam::{Mat3, Quat, Vec3};

#[derive(Debug, Clone, PartialEq)]
pub enum WorldShape {
    Sphere {
        center: Vec3,
        radius: f32,
    },
    Box {
        center: Vec3,
        rotation: Quat,
        half_extents: Vec3,
    },
    /// Medial axis `a-b` swept by `radius`.
    Capsule {
        a: Vec3,
        b: Vec3,
        radius: f32,
    },
    Convex {
        vertices: Vec<Vec3>,
        planes: Vec<Plane>,
    },
}

impl WorldShape {
    pub fn aabb(&self) -> Aabb {
        match self {
            WorldShape::Sphere { center, radius } => {
                Aabb::from_center_half_extents(*center, Vec3::splat(*radius))
            }
            WorldShape::Box {
                center,
                rotation,
                half_extents,
            } => {
                let m = Mat3::from_quat(*rotation);
                let extent = m.x_axis.abs() * half_extents.x
                    + m.y_axis.abs() * half_extents.y
                    + m.z_axis.abs() * half_extents.z;
                Aabb::from_center_half_extents(*center, extent)
            }
            WorldShape::Capsule { a, b, radius } => {
                Aabb::new(a.min(*b), a.max(*b)).inflate(*radius)
            }
            WorldShape::Convex { vertices, .. } => Aabb::from_points(vertices.iter().copied()),
        }
    }
}

/// A world-space primitive tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedShape {
    /// Position in the entity's shape table.
    pub shape_index: usize,
    pub segment: Segment,
    pub material: MaterialTag,
    pub shape: WorldShape,
}

/// Places one shape relative to the transform of its owning segment.
pub fn expand_shape(def: &ShapeDef, segment_transform: &Transform) -> WorldShape {
    let world = segment_transform.mul_transform(&def.local);
    match &def.kind {
        ShapeKind::Sphere { radius } => WorldShape::Sphere {
            center: world.translation,
            radius: radius * world.max_scale(),
        },
        ShapeKind::Box { half_extents } => oriented_box(&world, *half_extents),
        ShapeKind::Capsule {
            radius,
            half_height,
        } => {
            let scale = world.max_scale();
            let axis = world.rotation * Vec3::Y * (half_height * scale);
            WorldShape::Capsule {
                a: world.translation - axis,
                b: world.translation + axis,
                radius: radius * scale,
            }
        }
        ShapeKind::Convex { half_extents, hull } => match hull {
            Some(hull) => WorldShape::Convex {
                vertices: hull
                    .vertices
                    .iter()
                    .map(|v| world.transform_point(*v))
                    .collect(),
                planes: hull.planes.iter().map(|p| p.transformed(&world)).collect(),
            },
            None => oriented_box(&world, *half_extents),
        },
    }
}

fn oriented_box(world: &Transform, half_extents: Vec3) -> WorldShape {
    WorldShape::Box {
        center: world.translation,
        rotation: world.rotation,
        half_extents: half_extents * world.scale.abs(),
    }
}

/// Expands every shape whose segment exists in `pose`.
pub fn expand(shapes: &[ShapeDef], pose: &Pose) -> Vec<ExpandedShape> {
    shapes
        .iter()
        .enumerate()
        .filter_map(|(shape_index, def)| {
            let segment_transform = pose.segment_transform(def.segment)?;
            Some(ExpandedShape {
                shape_index,
                segment: def.segment,
                material: def.material,
                shape: expand_shape(def, segment_transform),
            })
        })
        .collect()
}

/// World bounding box of the whole shape table at `pose`.
pub fn world_bounds(shapes: &[ShapeDef], pose: &Pose) -> Aabb {
    shapes
        .iter()
        .filter_map(|def| {
            pose.segment_transform(def.segment)
                .map(|t| expand_shape(def, t).aabb())
        })
        .fold(Aabb::EMPTY, |acc, b| acc.union(&b))
}
