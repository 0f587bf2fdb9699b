//! Hit records and the final merge of historical and live results.

use crate::expansion::ExpandedShape;
use crate::narrowphase::Contact;
use crate::shape::{MaterialTag, Segment};
use crate::snapshot::EntityId;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// One shape crossed by a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    /// `None` for static geometry with no owning entity.
    pub entity: Option<EntityId>,
    pub segment: Option<Segment>,
    pub entry_point: Vec3,
    pub entry_normal: Vec3,
    pub exit_point: Vec3,
    pub exit_normal: Vec3,
    pub penetration_depth: f32,
    pub material: MaterialTag,
    pub distance_from_start: f32,
}

impl HitRecord {
    pub fn from_contact(entity: Option<EntityId>, shape: &ExpandedShape, contact: &Contact) -> Self {
        Self {
            entity,
            segment: entity.map(|_| shape.segment),
            entry_point: contact.entry_point,
            entry_normal: contact.entry_normal,
            exit_point: contact.exit_point,
            exit_normal: contact.exit_normal,
            penetration_depth: contact.penetration_depth,
            material: shape.material,
            distance_from_start: contact.distance,
        }
    }
}

/// A historical hit with the keys used to break distance ties.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub hit: HitRecord,
    /// Registration order of the owning entity.
    pub order: u64,
    pub shape_index: usize,
}

/// Concatenates both lists and sorts by distance from the sweep start.
///
/// Equal distances fall back to registration order, then shape index.
/// Live hits rank after every tracked entity.
pub fn aggregate(historical: Vec<RankedHit>, live: Vec<HitRecord>) -> Vec<HitRecord> {
    let mut ranked = historical;
    ranked.extend(live.into_iter().enumerate().map(|(shape_index, hit)| RankedHit {
        hit,
        order: u64::MAX,
        shape_index,
    }));

    ranked.sort_by(|a, b| {
        a.hit
            .distance_from_start
            .total_cmp(&b.hit.distance_from_start)
            .then(a.order.cmp(&b.order))
            .then(a.shape_index.cmp(&b.shape_index))
    });
    ranked.into_iter().map(|r| r.hit).collect()
}
