//! # Lag Compensation Server Library
//!
//! This library provides server-side lag compensation for an authoritative
//! shooter. Clients see the world as it was one round trip ago; when they
//! fire, the server rewinds the collision geometry of every moving entity
//! to that instant and validates the shot against what the client actually
//! saw.
//!
//! ## Core Responsibilities
//!
//! ### Recording History
//! Each tracked entity owns an [`recorder::EntityRecorder`]. Every simulation
//! tick the game layer hands it the entity's pose; the recorder computes the
//! snapshot's world bounds and pushes it onto an ingestion channel without
//! waiting on anything.
//!
//! ### Rewinding Queries
//! A [`query::RewindRequest`] describes a swept sphere (radius 0 is a ray),
//! the instant to rewind to, a collision mask and an ignore set. The rewind
//! worker culls entities with a conservative broadphase, interpolates the
//! survivors' poses, expands their shape tables into world space and runs
//! exact narrowphase tests. Untracked geometry is traced through the
//! [`live_world::LiveWorld`] seam, and all hits come back sorted by distance.
//!
//! ### Bounded Work
//! Every request's first sweep is traced in the tick that admits it. Ricochet
//! segments draw on a configured per-tick budget; a ricocheting query that
//! runs out of budget is parked and resumed first on the next tick.
//!
//! ## Architecture Design
//!
//! ### Dedicated Worker Thread
//! The history store lives on a single worker thread and is never shared.
//! Producers talk to it only through channels: snapshots and registrations
//! flow in, results flow back through one-shot futures, and debug draw
//! commands flow out to whoever flushes them.
//!
//! ### Session Context
//! [`session::LagCompensator`] is the only entry point. It holds no global
//! state, so independent sessions can run side by side.
//!
//! ## Module Organization
//!
//! ### Geometry and Shapes
//! - `geometry`: transforms, boxes, planes and segment helpers
//! - `shape`: per-entity shape tables
//! - `snapshot`: poses, snapshots and entity handles
//! - `expansion`: shape tables placed in world space
//!
//! ### Engine Pipeline
//! - `recorder`: registration and capture
//! - `history`: per-entity time-ordered buffers
//! - `interpolation`: pose blending between bracketing snapshots
//! - `broadphase`: conservative culling with bypass rules
//! - `narrowphase`: swept-sphere contact tests
//! - `aggregate`: deterministic hit ordering
//! - `worker`: the pipeline driver
//! - `session`: the public face
//!
//! ### Demo Server
//! - `game`: moving targets in a walled arena
//! - `client_manager`: connected shooters
//! - `network`: UDP server answering fire packets with hit confirmations
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::LagCompConfig;
//! use server::live_world::EmptyWorld;
//! use server::session::LagCompensator;
//! use server::shape::ShapeDef;
//! use server::snapshot::{CollisionMask, Pose};
//! use server::geometry::Transform;
//! use glam::Vec3;
//! use std::collections::HashSet;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = LagCompensator::new(LagCompConfig::default(), Arc::new(EmptyWorld))?;
//! let mut recorder = session.register(7, vec![ShapeDef::sphere(0.5)])?;
//!
//! // Once per simulation tick.
//! recorder.capture(Pose::rigid(Transform::from_translation(Vec3::X * 5.0)), 0.0);
//! session.tick(0.0);
//!
//! let pending = session.rewind_query(
//!     0.0,
//!     Vec3::ZERO,
//!     Vec3::X * 10.0,
//!     0.0,
//!     CollisionMask::ALL,
//!     HashSet::new(),
//! );
//! session.tick(1.0 / 30.0);
//! if let Some(result) = pending.blocking_wait() {
//!     println!("first hit: {:?}", result.nearest());
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod broadphase;
pub mod client_manager;
pub mod config;
pub mod debug_draw;
pub mod error;
pub mod expansion;
pub mod game;
pub mod geometry;
pub mod history;
pub mod interpolation;
pub mod live_world;
pub mod narrowphase;
pub mod network;
pub mod query;
pub mod recorder;
pub mod session;
pub mod shape;
pub mod snapshot;
pub mod worker;

pub use config::LagCompConfig;
pub use error::{ConfigError, RegistrationError};
pub use query::{Continuation, PendingRewind, RewindRequest, RewindResult};
pub use session::LagCompensator;
