//! Moving targets for the demo server.
//!
//! Each target wanders the arena at constant speed, bouncing off the
//! walls, and records its pose with the lag compensator every tick.

use crate::error::RegistrationError;
use crate::geometry::Transform;
use crate::live_world::StaticWorld;
use crate::recorder::EntityRecorder;
use crate::session::LagCompensator;
use crate::shape::{MaterialTag, ShapeDef};
use crate::snapshot::{CollisionMask, EntityId, Pose, SimTime};
use glam::{Quat, Vec3};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    TargetState, ARENA_HALF_EXTENT, ARENA_HEIGHT, TARGET_HALF_HEIGHT, TARGET_RADIUS, TARGET_SPEED,
};

pub const MATERIAL_BODY: MaterialTag = 1;
pub const MATERIAL_HEAD: MaterialTag = 2;
pub const MATERIAL_WALL: MaterialTag = 10;
pub const MATERIAL_FLOOR: MaterialTag = 11;

const HEAD_RADIUS: f32 = 0.3;
const WALL_THICKNESS: f32 = 0.5;

/// Collision channel targets record on.
pub const TARGET_CHANNEL: CollisionMask = CollisionMask(0b01);
/// Collision channel of the arena geometry.
pub const ARENA_CHANNEL: CollisionMask = CollisionMask(0b10);

struct Target {
    id: EntityId,
    position: Vec3,
    velocity: Vec3,
    recorder: EntityRecorder,
}

impl Target {
    fn yaw(&self) -> f32 {
        self.velocity.x.atan2(self.velocity.z)
    }

    fn pose(&self) -> Pose {
        Pose::rigid(Transform::from_translation_rotation(
            self.position,
            Quat::from_rotation_y(self.yaw()),
        ))
    }
}

pub struct TargetField {
    targets: Vec<Target>,
    rng: StdRng,
    pub tick: u32,
}

impl TargetField {
    /// Spawns `count` targets at random positions and registers them.
    pub fn new(
        count: usize,
        compensator: &LagCompensator,
        seed: u64,
    ) -> Result<Self, RegistrationError> {
        let mut field = Self {
            targets: Vec::with_capacity(count),
            rng: StdRng::seed_from_u64(seed),
            tick: 0,
        };
        for id in 1..=count as EntityId {
            field.spawn(id, compensator)?;
        }
        Ok(field)
    }

    fn spawn(&mut self, id: EntityId, compensator: &LagCompensator) -> Result<(), RegistrationError> {
        let limit = ARENA_HALF_EXTENT - TARGET_RADIUS - WALL_THICKNESS;
        let position = Vec3::new(
            self.rng.gen_range(-limit..limit),
            0.0,
            self.rng.gen_range(-limit..limit),
        );
        let heading = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let velocity = Vec3::new(heading.sin(), 0.0, heading.cos()) * TARGET_SPEED;

        let mut recorder = compensator.register(id, target_shapes())?;
        recorder.set_collision_mask(TARGET_CHANNEL);
        info!("Spawned target {} at ({:.1}, {:.1})", id, position.x, position.z);

        self.targets.push(Target {
            id,
            position,
            velocity,
            recorder,
        });
        Ok(())
    }

    /// Moves every target and reflects it off the arena walls.
    pub fn update_positions(&mut self, dt: f32) {
        let limit = ARENA_HALF_EXTENT - TARGET_RADIUS - WALL_THICKNESS;
        for target in &mut self.targets {
            target.position += target.velocity * dt;
            for axis in [0, 2] {
                if target.position[axis].abs() > limit {
                    target.position[axis] = target.position[axis].clamp(-limit, limit);
                    target.velocity[axis] = -target.velocity[axis];
                }
            }
        }
        self.tick += 1;
    }

    /// Hands every target's current pose to the lag compensator.
    pub fn capture(&mut self, now: SimTime) {
        for target in &mut self.targets {
            let pose = target.pose();
            target.recorder.capture(pose, now);
        }
    }

    pub fn states(&self) -> Vec<TargetState> {
        self.targets
            .iter()
            .map(|t| TargetState::new(t.id, t.position, t.yaw()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Body capsule standing on the root plus a head sphere.
pub fn target_shapes() -> Vec<ShapeDef> {
    let body_center = TARGET_HALF_HEIGHT + TARGET_RADIUS;
    vec![
        ShapeDef::capsule(TARGET_RADIUS, TARGET_HALF_HEIGHT)
            .at(Transform::from_translation(Vec3::Y * body_center))
            .with_material(MATERIAL_BODY),
        ShapeDef::sphere(HEAD_RADIUS)
            .at(Transform::from_translation(
                Vec3::Y * (2.0 * body_center + HEAD_RADIUS * 0.5),
            ))
            .with_material(MATERIAL_HEAD),
    ]
}

/// Floor and four walls enclosing the arena.
pub fn arena_world() -> StaticWorld {
    let half = ARENA_HALF_EXTENT;
    let wall_center = half - WALL_THICKNESS * 0.5;
    let half_height = ARENA_HEIGHT * 0.5;

    let floor = ShapeDef::cuboid(Vec3::new(half, WALL_THICKNESS * 0.5, half))
        .with_material(MATERIAL_FLOOR);
    let x_wall = ShapeDef::cuboid(Vec3::new(WALL_THICKNESS * 0.5, half_height, half))
        .with_material(MATERIAL_WALL);
    let z_wall = ShapeDef::cuboid(Vec3::new(half, half_height, WALL_THICKNESS * 0.5))
        .with_material(MATERIAL_WALL);

    StaticWorld::new()
        .with_shape(
            &floor,
            Transform::from_translation(Vec3::new(0.0, -WALL_THICKNESS * 0.5, 0.0)),
            ARENA_CHANNEL,
        )
        .with_shape(
            &x_wall,
            Transform::from_translation(Vec3::new(wall_center, half_height, 0.0)),
            ARENA_CHANNEL,
        )
        .with_shape(
            &x_wall,
            Transform::from_translation(Vec3::new(-wall_center, half_height, 0.0)),
            ARENA_CHANNEL,
        )
        .with_shape(
            &z_wall,
            Transform::from_translation(Vec3::new(0.0, half_height, wall_center)),
            ARENA_CHANNEL,
        )
        .with_shape(
            &z_wall,
            Transform::from_translation(Vec3::new(0.0, half_height, -wall_center)),
            ARENA_CHANNEL,
        )
}
