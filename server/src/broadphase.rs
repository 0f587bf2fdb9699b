//! Cheap rejection of entities a sweep cannot reach at the target time.
//!
//! Three stages, cheapest first:
//!
//! 1. The padded union of the bracketing snapshots' bounds, grown by the
//!    bypass margin, must overlap the sweep's segment bounds.
//! 2. The sweep segment must cross the padded box (slab test).
//! 3. Near misses from stage 2 are kept when the miss is tiny, or when it
//!    is within the margin and a motion heuristic says the box may be
//!    under-approximating the interpolated pose.

use crate::config::LagCompConfig;
use crate::geometry::Aabb;
use crate::interpolation::Bracket;
use crate::narrowphase::SweepQuery;
use log::trace;

/// Cosine of the widest angle between the sweep and the box centre that
/// still counts as aiming at the entity.
const FACING_COS: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BypassReason {
    WithinTolerance,
    Facing,
    HistoryEdge,
    Stationary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadphaseVerdict {
    Pass,
    Bypass(BypassReason),
    Reject,
}

impl BroadphaseVerdict {
    /// Pass and Bypass both go on to narrowphase.
    pub fn survives(&self) -> bool {
        !matches!(self, BroadphaseVerdict::Reject)
    }
}

/// Bracket bounds grown by the sweep radius and by how far a rotating
/// shape can bulge past the chord between its end poses.
pub fn padded_bounds(bracket: &Bracket<'_>, sweep: &SweepQuery) -> Aabb {
    let bounds = bracket.bounds();
    if bounds.is_empty() {
        return bounds;
    }

    let theta = bracket.max_rotation_delta();
    let rotation_slack = if theta > 0.0 {
        let center = bounds.center();
        let pivot_offset = std::iter::once(bracket.older)
            .chain(bracket.newer)
            .flat_map(|s| std::iter::once(&s.pose.root).chain(&s.pose.segments))
            .map(|t| t.translation.distance(center))
            .fold(0.0_f32, f32::max);
        let reach = bounds.bounding_radius() + pivot_offset;
        reach * (1.0 - (theta * 0.5).cos())
    } else {
        0.0
    };

    bounds.inflate(sweep.radius + rotation_slack)
}

pub fn classify(
    bracket: &Bracket<'_>,
    sweep: &SweepQuery,
    config: &LagCompConfig,
) -> BroadphaseVerdict {
    let padded = padded_bounds(bracket, sweep);
    if padded.is_empty() {
        return BroadphaseVerdict::Reject;
    }

    let segment_bounds = Aabb::new(sweep.start, sweep.end);
    if !padded.inflate(config.bypass_margin).overlaps(&segment_bounds) {
        return BroadphaseVerdict::Reject;
    }

    if padded.segment_interval(sweep.start, sweep.end).is_some() {
        return BroadphaseVerdict::Pass;
    }

    let miss = padded.segment_distance(sweep.start, sweep.end);
    let verdict = if miss <= config.bypass_tolerance {
        BroadphaseVerdict::Bypass(BypassReason::WithinTolerance)
    } else if miss > config.bypass_margin {
        BroadphaseVerdict::Reject
    } else if is_facing(sweep, &padded) {
        BroadphaseVerdict::Bypass(BypassReason::Facing)
    } else if bracket.at_edge || bracket.clamped {
        BroadphaseVerdict::Bypass(BypassReason::HistoryEdge)
    } else if bracket.max_displacement() <= config.stationary_epsilon
        && bracket.max_rotation_delta() <= config.stationary_epsilon
    {
        BroadphaseVerdict::Bypass(BypassReason::Stationary)
    } else {
        BroadphaseVerdict::Reject
    };

    trace!("Near miss of {:.3} classified as {:?}", miss, verdict);
    verdict
}

fn is_facing(sweep: &SweepQuery, bounds: &Aabb) -> bool {
    let to_center = (bounds.center() - sweep.start).normalize_or_zero();
    let direction = sweep.direction();
    if to_center == glam::Vec3::ZERO || direction == glam::Vec3::ZERO {
        return false;
    }
    direction.dot(to_center) >= FACING_COS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Transform;
    use crate::snapshot::{CollisionMask, Pose, Snapshot};
    use glam::{Quat, Vec3};

    fn snapshot_at(timestamp: f64, root: Transform) -> Snapshot {
        Snapshot {
            timestamp,
            pose: Pose::rigid(root),
            bounds: Aabb::from_center_half_extents(root.translation, Vec3::ONE),
            collision_mask: CollisionMask::ALL,
        }
    }

    fn bracket<'a>(older: &'a Snapshot, newer: &'a Snapshot) -> Bracket<'a> {
        Bracket {
            older,
            newer: Some(newer),
            clamped: false,
            at_edge: false,
        }
    }

    #[test]
    fn test_direct_hit_passes() {
        let a = snapshot_at(0.0, Transform::IDENTITY);
        let b = snapshot_at(0.1, Transform::from_translation(Vec3::X));
        let sweep = SweepQuery::ray(Vec3::new(-10.0, 0.0, 0.0), Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(
            classify(&bracket(&a, &b), &sweep, &LagCompConfig::default()),
            BroadphaseVerdict::Pass
        );
    }

    #[test]
    fn test_far_sweep_rejected() {
        let a = snapshot_at(0.0, Transform::IDENTITY);
        let b = snapshot_at(0.1, Transform::IDENTITY);
        let sweep = SweepQuery::ray(Vec3::new(-10.0, 20.0, 0.0), Vec3::new(10.0, 20.0, 0.0));
        assert_eq!(
            classify(&bracket(&a, &b), &sweep, &LagCompConfig::default()),
            BroadphaseVerdict::Reject
        );
    }

    #[test]
    fn test_sweep_radius_pads_bounds() {
        let a = snapshot_at(0.0, Transform::IDENTITY);
        let b = snapshot_at(0.1, Transform::from_translation(Vec3::X * 0.5));
        let ray = SweepQuery::ray(Vec3::new(-10.0, 2.0, 0.0), Vec3::new(10.0, 2.0, 0.0));
        assert_eq!(
            classify(&bracket(&a, &b), &ray, &LagCompConfig::default()),
            BroadphaseVerdict::Reject
        );

        let fat = SweepQuery::new(ray.start, ray.end, 1.5);
        assert_eq!(
            classify(&bracket(&a, &b), &fat, &LagCompConfig::default()),
            BroadphaseVerdict::Pass
        );
    }

    #[test]
    fn test_tiny_miss_is_bypassed() {
        let a = snapshot_at(0.0, Transform::IDENTITY);
        let b = snapshot_at(0.1, Transform::from_translation(Vec3::X * 2.0));
        let sweep = SweepQuery::ray(Vec3::new(-10.0, 1.03, 0.0), Vec3::new(10.0, 1.03, 0.0));
        assert_eq!(
            classify(&bracket(&a, &b), &sweep, &LagCompConfig::default()),
            BroadphaseVerdict::Bypass(BypassReason::WithinTolerance)
        );
    }

    #[test]
    fn test_stationary_near_miss_is_bypassed() {
        let a = snapshot_at(0.0, Transform::IDENTITY);
        let b = snapshot_at(0.1, Transform::IDENTITY);
        // Skims past a corner without aiming at the centre.
        let sweep = SweepQuery::ray(Vec3::new(-1.3, 1.3, -0.5), Vec3::new(-1.3, 1.3, 10.0));
        assert_eq!(
            classify(&bracket(&a, &b), &sweep, &LagCompConfig::default()),
            BroadphaseVerdict::Bypass(BypassReason::Stationary)
        );

        let moving = snapshot_at(0.1, Transform::from_translation(Vec3::X * 0.5));
        assert_eq!(
            classify(&bracket(&a, &moving), &sweep, &LagCompConfig::default()),
            BroadphaseVerdict::Reject
        );

        // Beyond the margin nothing rescues it.
        let moving = snapshot_at(0.1, Transform::from_translation(Vec3::Z * 3.0));
        let side = SweepQuery::ray(Vec3::new(-1.5, 1.3, -10.0), Vec3::new(-1.5, 1.3, 10.0));
        assert_eq!(
            classify(&bracket(&a, &moving), &side, &LagCompConfig::default()),
            BroadphaseVerdict::Reject
        );
    }

    #[test]
    fn test_history_edge_near_miss_is_bypassed() {
        let a = snapshot_at(0.0, Transform::IDENTITY);
        // Starts beside the box, so it is not aimed at the centre.
        let side = SweepQuery::ray(Vec3::new(-1.3, 1.3, -0.5), Vec3::new(-1.3, 1.3, 10.0));
        let mut edge = Bracket::single(&a, true);
        edge.at_edge = true;
        assert_eq!(
            classify(&edge, &side, &LagCompConfig::default()),
            BroadphaseVerdict::Bypass(BypassReason::HistoryEdge)
        );
    }

    #[test]
    fn test_rotation_adds_slack() {
        let a = snapshot_at(0.0, Transform::IDENTITY);
        let b = snapshot_at(
            0.1,
            Transform::from_translation_rotation(Vec3::ZERO, Quat::from_rotation_y(1.5)),
        );
        let sweep = SweepQuery::ray(Vec3::ZERO, Vec3::X);
        let padded = padded_bounds(&bracket(&a, &b), &sweep);
        assert!(padded.max.x > 1.0);

        let still = padded_bounds(&bracket(&a, &a), &sweep);
        assert_eq!(still, a.bounds);
    }

    #[test]
    fn test_verdict_survival() {
        assert!(BroadphaseVerdict::Pass.survives());
        assert!(BroadphaseVerdict::Bypass(BypassReason::Stationary).survives());
        assert!(!BroadphaseVerdict::Reject.survives());
    }
}
