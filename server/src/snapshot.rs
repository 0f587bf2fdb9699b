//! What the history store keeps per entity and tick: a pose, the world
//! bounds it occupied and the collision channels it answered to.

use crate::geometry::{Aabb, Transform};
use crate::shape::Segment;
use serde::{Deserialize, Serialize};

/// Simulation time in seconds.
pub type SimTime = f64;

/// Identifier the owning game layer uses for an entity.
pub type EntityId = u64;

/// Bit set of collision channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollisionMask(pub u32);

impl CollisionMask {
    pub const ALL: CollisionMask = CollisionMask(u32::MAX);
    pub const NONE: CollisionMask = CollisionMask(0);

    pub fn intersects(self, other: CollisionMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for CollisionMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Generation-checked index into the worker's entity arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityHandle {
    pub index: u32,
    pub generation: u32,
}

/// World-space pose of an entity: the root plus one transform per segment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub root: Transform,
    pub segments: Vec<Transform>,
}

impl Pose {
    pub fn rigid(root: Transform) -> Self {
        Self {
            root,
            segments: Vec::new(),
        }
    }

    pub fn articulated(root: Transform, segments: Vec<Transform>) -> Self {
        Self { root, segments }
    }

    /// Transform of the pose part a shape hangs from.
    pub fn segment_transform(&self, segment: Segment) -> Option<&Transform> {
        match segment {
            Segment::Root => Some(&self.root),
            Segment::Index(i) => self.segments.get(usize::from(i)),
        }
    }
}

/// Immutable capture of an entity at one simulation instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: SimTime,
    pub pose: Pose,
    pub bounds: Aabb,
    pub collision_mask: CollisionMask,
}
