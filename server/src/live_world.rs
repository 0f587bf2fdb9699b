//! The present-time world a rewind falls back to.
//!
//! Geometry that is not tracked historically (level geometry, props) is
//! traced at its current position and merged into every rewind result.

use crate::aggregate::HitRecord;
use crate::expansion::{expand_shape, ExpandedShape};
use crate::geometry::Transform;
use crate::narrowphase::{sweep_shape, SweepQuery};
use crate::shape::ShapeDef;
use crate::snapshot::{CollisionMask, EntityId};
use std::collections::HashSet;

pub trait LiveWorld: Send + Sync {
    /// Traces the present world. Shapes owned by an entity in `exclude`
    /// are skipped.
    fn trace(
        &self,
        sweep: &SweepQuery,
        mask: CollisionMask,
        exclude: &HashSet<EntityId>,
    ) -> Vec<HitRecord>;
}

/// A world with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyWorld;

impl LiveWorld for EmptyWorld {
    fn trace(&self, _: &SweepQuery, _: CollisionMask, _: &HashSet<EntityId>) -> Vec<HitRecord> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct LiveShape {
    pub owner: Option<EntityId>,
    pub mask: CollisionMask,
    pub shape: ExpandedShape,
}

/// Fixed geometry placed once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticWorld {
    shapes: Vec<LiveShape>,
}

impl StaticWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `def` at `placement` and returns `self` for chaining.
    pub fn with_shape(mut self, def: &ShapeDef, placement: Transform, mask: CollisionMask) -> Self {
        self.add(None, def, placement, mask);
        self
    }

    pub fn add(
        &mut self,
        owner: Option<EntityId>,
        def: &ShapeDef,
        placement: Transform,
        mask: CollisionMask,
    ) {
        let shape_index = self.shapes.len();
        self.shapes.push(LiveShape {
            owner,
            mask,
            shape: ExpandedShape {
                shape_index,
                segment: def.segment,
                material: def.material,
                shape: expand_shape(def, &placement),
            },
        });
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

impl LiveWorld for StaticWorld {
    fn trace(
        &self,
        sweep: &SweepQuery,
        mask: CollisionMask,
        exclude: &HashSet<EntityId>,
    ) -> Vec<HitRecord> {
        let bounds = sweep.aabb();
        self.shapes
            .iter()
            .filter(|s| s.mask.intersects(mask))
            .filter(|s| s.owner.map_or(true, |id| !exclude.contains(&id)))
            .filter(|s| s.shape.shape.aabb().overlaps(&bounds))
            .filter_map(|s| {
                sweep_shape(sweep, &s.shape.shape)
                    .map(|contact| HitRecord::from_contact(s.owner, &s.shape, &contact))
            })
            .collect()
    }
}
