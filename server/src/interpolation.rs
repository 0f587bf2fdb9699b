//! Pose reconstruction between two bracketing snapshots.

use crate::geometry::{Aabb, Transform};
use crate::snapshot::{Pose, SimTime, Snapshot};

/// Normalised position of `t` between `t0` and `t1`, clamped to `[0, 1]`.
pub fn blend_factor(t0: SimTime, t1: SimTime, t: SimTime) -> f32 {
    let span = t1 - t0;
    if span <= 0.0 || t <= t0 {
        return 0.0;
    }
    ((t - t0) / span).clamp(0.0, 1.0) as f32
}

/// Lerps translation and scale, slerps rotation. The end points are
/// returned bit-for-bit at `alpha` 0 and 1.
pub fn interpolate_transform(from: &Transform, to: &Transform, alpha: f32) -> Transform {
    if alpha <= 0.0 {
        return *from;
    }
    if alpha >= 1.0 {
        return *to;
    }
    Transform {
        translation: from.translation.lerp(to.translation, alpha),
        rotation: from.rotation.slerp(to.rotation, alpha).normalize(),
        scale: from.scale.lerp(to.scale, alpha),
    }
}

/// Interpolates the root and every segment with the same `alpha`.
pub fn interpolate_pose(from: &Pose, to: &Pose, alpha: f32) -> Pose {
    if alpha <= 0.0 {
        return from.clone();
    }
    if alpha >= 1.0 {
        return to.clone();
    }
    let mut segments: Vec<Transform> = from
        .segments
        .iter()
        .zip(&to.segments)
        .map(|(a, b)| interpolate_transform(a, b, alpha))
        .collect();
    if to.segments.len() > segments.len() {
        segments.extend_from_slice(&to.segments[segments.len()..]);
    }
    Pose {
        root: interpolate_transform(&from.root, &to.root, alpha),
        segments,
    }
}

/// The snapshots surrounding a target instant.
#[derive(Debug, Clone, Copy)]
pub struct Bracket<'a> {
    pub older: &'a Snapshot,
    /// `None` when a single snapshot answers the query on its own.
    pub newer: Option<&'a Snapshot>,
    /// The target preceded all retained history.
    pub clamped: bool,
    /// The target sits on or beyond either end of the history.
    pub at_edge: bool,
}

impl<'a> Bracket<'a> {
    pub fn single(snapshot: &'a Snapshot, clamped: bool) -> Self {
        Self {
            older: snapshot,
            newer: None,
            clamped,
            at_edge: true,
        }
    }

    pub fn alpha(&self, t: SimTime) -> f32 {
        match self.newer {
            Some(newer) => blend_factor(self.older.timestamp, newer.timestamp, t),
            None => 0.0,
        }
    }

    /// Pose at `t`; the older snapshot unmodified when no blending applies.
    pub fn pose_at(&self, t: SimTime) -> Pose {
        match self.newer {
            Some(newer) => interpolate_pose(&self.older.pose, &newer.pose, self.alpha(t)),
            None => self.older.pose.clone(),
        }
    }

    /// Union of the captured bounds of both ends.
    pub fn bounds(&self) -> Aabb {
        match self.newer {
            Some(newer) => self.older.bounds.union(&newer.bounds),
            None => self.older.bounds,
        }
    }

    /// Largest orientation change across the bracket, root and segments.
    pub fn max_rotation_delta(&self) -> f32 {
        let Some(newer) = self.newer else {
            return 0.0;
        };
        let root = self
            .older
            .pose
            .root
            .rotation
            .angle_between(newer.pose.root.rotation);
        self.older
            .pose
            .segments
            .iter()
            .zip(&newer.pose.segments)
            .map(|(a, b)| a.rotation.angle_between(b.rotation))
            .fold(root, f32::max)
    }

    /// Largest translation of the root or any segment across the bracket.
    pub fn max_displacement(&self) -> f32 {
        let Some(newer) = self.newer else {
            return 0.0;
        };
        let root = self
            .older
            .pose
            .root
            .translation
            .distance(newer.pose.root.translation);
        self.older
            .pose
            .segments
            .iter()
            .zip(&newer.pose.segments)
            .map(|(a, b)| a.translation.distance(b.translation))
            .fold(root, f32::max)
    }
}
