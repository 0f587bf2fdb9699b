//! Local-space collision primitives making up an entity's shape table.
//!
//! A shape table is validated once at registration and never mutated
//! afterwards; the worker shares it through an `Arc<[ShapeDef]>`.

use crate::geometry::{Plane, Transform};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Opaque material identifier carried through to hit records.
pub type MaterialTag = u32;

/// The pose part a shape is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Segment {
    Root,
    Index(u16),
}

/// Vertex and face data for a convex hull in local space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvexHull {
    pub vertices: Vec<Vec3>,
    pub planes: Vec<Plane>,
}

impl ConvexHull {
    /// Hull of an axis-aligned box, handy for tests and tooling.
    pub fn from_half_extents(half_extents: Vec3) -> Self {
        let h = half_extents.abs();
        let mut vertices = Vec::with_capacity(8);
        for sx in [-1.0, 1.0] {
            for sy in [-1.0, 1.0] {
                for sz in [-1.0, 1.0] {
                    vertices.push(Vec3::new(sx * h.x, sy * h.y, sz * h.z));
                }
            }
        }
        let planes = vec![
            Plane::new(Vec3::X, h.x),
            Plane::new(Vec3::NEG_X, h.x),
            Plane::new(Vec3::Y, h.y),
            Plane::new(Vec3::NEG_Y, h.y),
            Plane::new(Vec3::Z, h.z),
            Plane::new(Vec3::NEG_Z, h.z),
        ];
        Self { vertices, planes }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShapeKind {
    Sphere {
        radius: f32,
    },
    Box {
        half_extents: Vec3,
    },
    /// Aligned with the local Y axis; `half_height` excludes the caps.
    Capsule {
        radius: f32,
        half_height: f32,
    },
    /// `half_extents` bound the hull and serve as the fallback box when
    /// `hull` is missing.
    Convex {
        half_extents: Vec3,
        hull: Option<ConvexHull>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeDef {
    pub kind: ShapeKind,
    pub segment: Segment,
    pub local: Transform,
    pub material: MaterialTag,
}

impl ShapeDef {
    pub fn new(kind: ShapeKind) -> Self {
        Self {
            kind,
            segment: Segment::Root,
            local: Transform::IDENTITY,
            material: 0,
        }
    }

    pub fn sphere(radius: f32) -> Self {
        Self::new(ShapeKind::Sphere { radius })
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        Self::new(ShapeKind::Box { half_extents })
    }

    pub fn capsule(radius: f32, half_height: f32) -> Self {
        Self::new(ShapeKind::Capsule {
            radius,
            half_height,
        })
    }

    pub fn convex(half_extents: Vec3, hull: Option<ConvexHull>) -> Self {
        Self::new(ShapeKind::Convex { half_extents, hull })
    }

    pub fn on_segment(mut self, segment: Segment) -> Self {
        self.segment = segment;
        self
    }

    pub fn at(mut self, local: Transform) -> Self {
        self.local = local;
        self
    }

    pub fn with_material(mut self, material: MaterialTag) -> Self {
        self.material = material;
        self
    }

    /// Returns a description of the first problem found, if any.
    pub fn check(&self) -> Result<(), String> {
        if !self.local.is_finite() {
            return Err("local transform is not finite".to_string());
        }
        let positive = |v: f32| v.is_finite() && v > 0.0;
        match &self.kind {
            ShapeKind::Sphere { radius } => {
                if !positive(*radius) {
                    return Err(format!("sphere radius {} must be positive", radius));
                }
            }
            ShapeKind::Box { half_extents } => {
                if !half_extents.to_array().iter().all(|v| positive(*v)) {
                    return Err(format!("box half extents {} must be positive", half_extents));
                }
            }
            ShapeKind::Capsule {
                radius,
                half_height,
            } => {
                if !positive(*radius) {
                    return Err(format!("capsule radius {} must be positive", radius));
                }
                if !half_height.is_finite() || *half_height < 0.0 {
                    return Err(format!(
                        "capsule half height {} must not be negative",
                        half_height
                    ));
                }
            }
            ShapeKind::Convex { half_extents, hull } => {
                if !half_extents.to_array().iter().all(|v| positive(*v)) {
                    return Err(format!(
                        "convex half extents {} must be positive",
                        half_extents
                    ));
                }
                if let Some(hull) = hull {
                    if hull.vertices.len() < 4 || hull.planes.len() < 4 {
                        return Err(format!(
                            "convex hull needs at least 4 vertices and planes, got {} and {}",
                            hull.vertices.len(),
                            hull.planes.len()
                        ));
                    }
                    if hull.vertices.iter().any(|v| !v.is_finite())
                        || hull
                            .planes
                            .iter()
                            .any(|p| !p.normal.is_finite() || !p.distance.is_finite())
                    {
                        return Err("convex hull contains non-finite data".to_string());
                    }
                }
            }
        }
        Ok(())
    }
}
