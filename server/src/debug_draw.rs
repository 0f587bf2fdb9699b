//! Visualisation commands produced by the worker.
//!
//! Nothing is drawn here. Commands queue up until the owning layer calls
//! `LagCompensator::flush_debug_commands` and renders them however it likes.

use crate::geometry::Aabb;
use crate::snapshot::{EntityId, SimTime};
use glam::Vec3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DebugCommand {
    /// Bounds of an entity as reconstructed for a query.
    PoseBox {
        entity: EntityId,
        bounds: Aabb,
        time: SimTime,
    },
    HitMarker {
        entity: Option<EntityId>,
        point: Vec3,
        normal: Vec3,
    },
    Sweep {
        start: Vec3,
        end: Vec3,
        radius: f32,
        approximate: bool,
    },
}

pub trait DebugSink {
    fn draw(&mut self, command: DebugCommand);
}

impl<F> DebugSink for F
where
    F: FnMut(DebugCommand),
{
    fn draw(&mut self, command: DebugCommand) {
        self(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_sink() {
        let mut count = 0;
        let mut sink = |_: DebugCommand| count += 1;
        sink.draw(DebugCommand::Sweep {
            start: Vec3::ZERO,
            end: Vec3::X,
            radius: 0.0,
            approximate: false,
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_sink_keeps_order() {
        let mut drawn: Vec<DebugCommand> = Vec::new();
        let mut sink = |command| drawn.push(command);
        for i in 0..3 {
            sink.draw(DebugCommand::HitMarker {
                entity: Some(i),
                point: Vec3::ZERO,
                normal: Vec3::Y,
            });
        }
        assert_eq!(drawn.len(), 3);
        assert!(matches!(
            drawn[2],
            DebugCommand::HitMarker { entity: Some(2), .. }
        ));
    }
}
