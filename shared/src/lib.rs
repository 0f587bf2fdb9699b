use glam::Vec3;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
pub const ARENA_HALF_EXTENT: f32 = 50.0;
pub const ARENA_HEIGHT: f32 = 10.0;
pub const TARGET_RADIUS: f32 = 0.5;
pub const TARGET_HALF_HEIGHT: f32 = 0.9;
pub const TARGET_SPEED: f32 = 6.0;
pub const MAX_FIRE_RANGE: f32 = 200.0;
pub const MAX_FIRE_RADIUS: f32 = 1.0;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Fire {
        sequence: u32,
        /// Server time of the state the client was looking at when it fired.
        view_time: f64,
        start: Vec3,
        end: Vec3,
        radius: f32,
    },
    Disconnect,

    Connected {
        client_id: u32,
    },
    GameState {
        tick: u32,
        server_time: f64,
        targets: Vec<TargetState>,
    },
    HitConfirm {
        sequence: u32,
        approximate: bool,
        hits: Vec<HitSummary>,
    },
    Disconnected {
        reason: String,
    },
}

/// Replicated pose of a moving target.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TargetState {
    pub id: u64,
    pub position: Vec3,
    pub yaw: f32,
}

impl TargetState {
    pub fn new(id: u64, position: Vec3, yaw: f32) -> Self {
        Self { id, position, yaw }
    }

    /// Centre of the target's body capsule.
    pub fn center(&self) -> Vec3 {
        self.position + Vec3::Y * (TARGET_HALF_HEIGHT + TARGET_RADIUS)
    }
}

/// Wire form of a confirmed hit.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HitSummary {
    /// `None` for static arena geometry.
    pub target: Option<u64>,
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
    pub material: u32,
}

/// Checks that a fire request stays inside the limits the server accepts.
pub fn validate_fire(start: Vec3, end: Vec3, radius: f32) -> bool {
    start.is_finite()
        && end.is_finite()
        && radius.is_finite()
        && (0.0..=MAX_FIRE_RADIUS).contains(&radius)
        && start.distance(end) <= MAX_FIRE_RANGE
}
