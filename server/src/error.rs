//! Error types surfaced to the owning game layer.
//!
//! Queries never fail: stale or missing history degrades the result
//! instead. Only registration and configuration can be rejected.

use crate::shape::Segment;
use crate::snapshot::EntityId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    #[error("entity {0} is already registered with a different shape table")]
    Duplicate(EntityId),
    #[error("entity {0} has an empty shape table")]
    EmptyShapeTable(EntityId),
    #[error("shape {index} is invalid: {reason}")]
    InvalidShape { index: usize, reason: String },
    #[error("shape {index} references {segment:?} but the pose declares fewer segments")]
    UnknownSegment { index: usize, segment: Segment },
    #[error("the lag compensation engine has been shut down")]
    EngineStopped,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("retention window must be positive")]
    ZeroRetention,
    #[error("per-tick sub-query budget must be at least 1")]
    ZeroBudget,
    #[error("{name} must be a finite, non-negative distance (got {value})")]
    InvalidDistance { name: &'static str, value: f32 },
    #[error("bypass margin {margin} is smaller than bypass tolerance {tolerance}")]
    MarginBelowTolerance { tolerance: f32, margin: f32 },
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn the rewind worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
