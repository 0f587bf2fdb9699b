//! Producer side of the history store.
//!
//! The owning game layer registers each entity once and keeps the returned
//! [`EntityRecorder`]. Every simulation tick it calls
//! [`EntityRecorder::capture`], which computes the snapshot bounds on the
//! calling thread and pushes the snapshot onto the ingestion channel
//! without waiting on the worker.

use crate::error::RegistrationError;
use crate::expansion::world_bounds;
use crate::history::Ingest;
use crate::shape::{Segment, ShapeDef};
use crate::snapshot::{CollisionMask, EntityHandle, EntityId, Pose, SimTime, Snapshot};
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone)]
struct Registration {
    handle: EntityHandle,
    order: u64,
    shapes: Arc<[ShapeDef]>,
    segment_count: u16,
    /// Recorders sharing this registration.
    holders: u32,
}

/// Handle allocation and the table of live registrations.
///
/// Freed slots are reused with a bumped generation, so a handle that
/// outlives its entity never matches the slot's next occupant.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    generations: Vec<u32>,
    free: Vec<u32>,
    live: HashMap<EntityId, Registration>,
    next_order: u64,
}

/// What a successful registration hands back.
#[derive(Debug, Clone)]
pub(crate) struct Registered {
    pub handle: EntityHandle,
    pub order: u64,
    pub shapes: Arc<[ShapeDef]>,
    pub segment_count: u16,
    pub reused: bool,
}

impl Registry {
    pub fn register(
        &mut self,
        entity: EntityId,
        shapes: Vec<ShapeDef>,
        segment_count: u16,
    ) -> Result<Registered, RegistrationError> {
        validate_table(entity, &shapes, segment_count)?;

        if let Some(existing) = self.live.get_mut(&entity) {
            if existing.shapes[..] == shapes[..] && existing.segment_count == segment_count {
                existing.holders += 1;
                return Ok(Registered {
                    handle: existing.handle,
                    order: existing.order,
                    shapes: existing.shapes.clone(),
                    segment_count,
                    reused: true,
                });
            }
            return Err(RegistrationError::Duplicate(entity));
        }

        let handle = self.allocate();
        let order = self.next_order;
        self.next_order += 1;
        let shapes: Arc<[ShapeDef]> = shapes.into();
        self.live.insert(
            entity,
            Registration {
                handle,
                order,
                shapes: shapes.clone(),
                segment_count,
                holders: 1,
            },
        );
        Ok(Registered {
            handle,
            order,
            shapes,
            segment_count,
            reused: false,
        })
    }

    /// Frees the handle whatever its holder count. Returns false if it was
    /// already stale.
    pub fn release(&mut self, handle: EntityHandle) -> bool {
        let Some(entity) = self.entity_of(handle) else {
            return false;
        };
        self.live.remove(&entity);
        self.free_slot(handle);
        true
    }

    /// Drops one holder and frees the handle once none are left. Returns
    /// true only when this call freed it.
    pub fn drop_holder(&mut self, handle: EntityHandle) -> bool {
        let Some(entity) = self.entity_of(handle) else {
            return false;
        };
        let Some(registration) = self.live.get_mut(&entity) else {
            return false;
        };
        registration.holders = registration.holders.saturating_sub(1);
        if registration.holders > 0 {
            return false;
        }
        self.live.remove(&entity);
        self.free_slot(handle);
        true
    }

    fn entity_of(&self, handle: EntityHandle) -> Option<EntityId> {
        self.live
            .iter()
            .find(|(_, r)| r.handle == handle)
            .map(|(id, _)| *id)
    }

    fn free_slot(&mut self, handle: EntityHandle) {
        let index = handle.index as usize;
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.free.push(handle.index);
    }

    pub fn is_live(&self, handle: EntityHandle) -> bool {
        self.generations
            .get(handle.index as usize)
            .is_some_and(|g| *g == handle.generation)
            && self.live.values().any(|r| r.handle == handle)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    fn allocate(&mut self) -> EntityHandle {
        match self.free.pop() {
            Some(index) => EntityHandle {
                index,
                generation: self.generations[index as usize],
            },
            None => {
                self.generations.push(0);
                EntityHandle {
                    index: (self.generations.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }
}

pub(crate) type SharedRegistry = Arc<Mutex<Registry>>;

pub(crate) fn lock(registry: &SharedRegistry) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn validate_table(
    entity: EntityId,
    shapes: &[ShapeDef],
    segment_count: u16,
) -> Result<(), RegistrationError> {
    if shapes.is_empty() {
        return Err(RegistrationError::EmptyShapeTable(entity));
    }
    for (index, shape) in shapes.iter().enumerate() {
        shape
            .check()
            .map_err(|reason| RegistrationError::InvalidShape { index, reason })?;
        if let Segment::Index(i) = shape.segment {
            if i >= segment_count {
                return Err(RegistrationError::UnknownSegment {
                    index,
                    segment: shape.segment,
                });
            }
        }
    }
    Ok(())
}

/// Per-entity capture handle owned by the game layer.
///
/// Dropping the recorder stops tracking the entity. Recorders returned by
/// repeated identical registrations share one registration, which is
/// freed when the last of them goes.
#[derive(Debug)]
pub struct EntityRecorder {
    entity: EntityId,
    registered: Registered,
    collision_mask: CollisionMask,
    ingest_tx: mpsc::UnboundedSender<Ingest>,
    discovery: watch::Receiver<u64>,
    registry: SharedRegistry,
    detached: bool,
}

impl EntityRecorder {
    pub(crate) fn new(
        entity: EntityId,
        registered: Registered,
        ingest_tx: mpsc::UnboundedSender<Ingest>,
        discovery: watch::Receiver<u64>,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            entity,
            registered,
            collision_mask: CollisionMask::ALL,
            ingest_tx,
            discovery,
            registry,
            detached: false,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn handle(&self) -> EntityHandle {
        self.registered.handle
    }

    pub fn collision_mask(&self) -> CollisionMask {
        self.collision_mask
    }

    /// Applies to every snapshot captured from now on.
    pub fn set_collision_mask(&mut self, mask: CollisionMask) {
        self.collision_mask = mask;
    }

    /// Records the entity's pose at `timestamp`. Never blocks.
    ///
    /// Returns false when the capture was dropped: malformed pose, or the
    /// engine is gone.
    pub fn capture(&mut self, pose: Pose, timestamp: SimTime) -> bool {
        if self.discovery.has_changed().unwrap_or(false) {
            self.discovery.borrow_and_update();
            self.announce();
        }

        if pose.segments.len() != usize::from(self.registered.segment_count) {
            warn!(
                "Dropping capture for entity {}: expected {} segments, got {}",
                self.entity,
                self.registered.segment_count,
                pose.segments.len()
            );
            return false;
        }
        if !timestamp.is_finite()
            || !pose.root.is_finite()
            || pose.segments.iter().any(|s| !s.is_finite())
        {
            warn!(
                "Dropping capture for entity {}: non-finite pose or timestamp",
                self.entity
            );
            return false;
        }

        let snapshot = Snapshot {
            timestamp,
            bounds: world_bounds(&self.registered.shapes, &pose),
            pose,
            collision_mask: self.collision_mask,
        };
        let sent = self
            .ingest_tx
            .send(Ingest::Snapshot {
                handle: self.registered.handle,
                snapshot,
            })
            .is_ok();
        if !sent {
            trace!("Capture for entity {} after engine shutdown", self.entity);
        }
        sent
    }

    /// Re-sends the registration so a reset worker learns about us.
    fn announce(&self) {
        if !lock(&self.registry).is_live(self.registered.handle) {
            return;
        }
        debug!("Re-registering entity {} after discovery", self.entity);
        let _ = self.ingest_tx.send(self.registered.to_ingest(self.entity));
    }

    /// Stops tracking the entity and frees its history, even if other
    /// recorders share the registration.
    pub fn unregister(mut self) -> bool {
        self.detach(true)
    }

    fn detach(&mut self, force: bool) -> bool {
        if self.detached {
            return false;
        }
        self.detached = true;

        let handle = self.registered.handle;
        let released = {
            let mut registry = lock(&self.registry);
            if force {
                registry.release(handle)
            } else {
                registry.drop_holder(handle)
            }
        };
        if released {
            info!("Unregistered entity {}", self.entity);
            let _ = self.ingest_tx.send(Ingest::Unregister { handle });
        }
        released
    }
}

impl Drop for EntityRecorder {
    fn drop(&mut self) {
        self.detach(false);
    }
}

impl Registered {
    pub fn to_ingest(&self, entity: EntityId) -> Ingest {
        Ingest::Register {
            handle: self.handle,
            entity,
            order: self.order,
            shapes: self.shapes.clone(),
        }
    }
}
