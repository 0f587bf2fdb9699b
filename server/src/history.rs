//! Worker-owned snapshot history for every tracked entity.
//!
//! Producers never touch this memory. Everything arrives through the
//! ingestion channel as [`Ingest`] messages and is applied in FIFO order
//! by [`HistoryStore::drain_ingestion`] at the start of each worker cycle.

use crate::interpolation::Bracket;
use crate::shape::ShapeDef;
use crate::snapshot::{EntityHandle, EntityId, SimTime, Snapshot};
use log::{debug, trace};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Messages flowing from recorder threads to the worker.
#[derive(Debug, Clone)]
pub enum Ingest {
    Register {
        handle: EntityHandle,
        entity: EntityId,
        /// Registration order, used to break result ties.
        order: u64,
        shapes: Arc<[ShapeDef]>,
    },
    Snapshot {
        handle: EntityHandle,
        snapshot: Snapshot,
    },
    Unregister {
        handle: EntityHandle,
    },
}

/// Time-descending snapshot sequence of one entity (newest first).
#[derive(Debug, Clone, Default)]
pub struct HistoryBuffer {
    snapshots: VecDeque<Snapshot>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends at the head. Rejects snapshots that do not advance time.
    pub fn push(&mut self, snapshot: Snapshot) -> bool {
        if let Some(head) = self.snapshots.front() {
            if snapshot.timestamp <= head.timestamp {
                return false;
            }
        }
        self.snapshots.push_front(snapshot);
        true
    }

    /// Drops tail entries that are no longer needed to bracket `horizon`.
    ///
    /// The newest snapshot at or before the horizon is kept so the whole
    /// window stays covered. Returns the number of removed snapshots.
    pub fn prune(&mut self, horizon: SimTime) -> usize {
        let mut removed = 0;
        while self.snapshots.len() >= 2 {
            let second_oldest = &self.snapshots[self.snapshots.len() - 2];
            if second_oldest.timestamp > horizon {
                break;
            }
            self.snapshots.pop_back();
            removed += 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn newest(&self) -> Option<&Snapshot> {
        self.snapshots.front()
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    /// Finds the snapshots surrounding `t`.
    pub fn bracket(&self, t: SimTime) -> Option<Bracket<'_>> {
        let newest = self.snapshots.front()?;
        if t >= newest.timestamp {
            return Some(Bracket::single(newest, false));
        }

        // First index whose timestamp is at or before `t`.
        let idx = self.snapshots.partition_point(|s| s.timestamp > t);
        if idx == self.snapshots.len() {
            return self.snapshots.back().map(|oldest| Bracket::single(oldest, true));
        }

        let older = &self.snapshots[idx];
        Some(Bracket {
            older,
            newer: Some(&self.snapshots[idx - 1]),
            clamped: false,
            at_edge: idx + 1 == self.snapshots.len() && older.timestamp == t,
        })
    }
}

/// Everything the worker knows about one registered entity.
#[derive(Debug, Clone)]
pub struct TrackedEntity {
    pub id: EntityId,
    pub handle: EntityHandle,
    pub order: u64,
    pub shapes: Arc<[ShapeDef]>,
    pub history: HistoryBuffer,
}

/// Counters from one ingestion drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub registered: usize,
    pub unregistered: usize,
    pub appended: usize,
    pub rejected: usize,
    pub pruned: usize,
}

/// Arena of tracked entities indexed by handle.
pub struct HistoryStore {
    slots: Vec<Option<TrackedEntity>>,
    retention: SimTime,
}

impl HistoryStore {
    pub fn new(retention: SimTime) -> Self {
        Self {
            slots: Vec::new(),
            retention,
        }
    }

    pub fn retention(&self) -> SimTime {
        self.retention
    }

    /// Oldest instant the store promises to cover at `now`.
    pub fn horizon(&self, now: SimTime) -> SimTime {
        now - self.retention
    }

    /// Pops every pending message, applies them in order, then prunes.
    pub fn drain_ingestion(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<Ingest>,
        now: SimTime,
    ) -> DrainStats {
        let mut stats = DrainStats::default();
        while let Ok(message) = rx.try_recv() {
            self.apply(message, &mut stats);
        }
        stats.pruned = self.prune(now);
        stats
    }

    pub fn apply(&mut self, message: Ingest, stats: &mut DrainStats) {
        match message {
            Ingest::Register {
                handle,
                entity,
                order,
                shapes,
            } => {
                self.insert(handle, entity, order, shapes);
                stats.registered += 1;
            }
            Ingest::Snapshot { handle, snapshot } => match self.get_mut(handle) {
                Some(tracked) => {
                    let timestamp = snapshot.timestamp;
                    if tracked.history.push(snapshot) {
                        stats.appended += 1;
                    } else {
                        debug!(
                            "Dropped snapshot for entity {} at {:.4}s: not newer than head",
                            tracked.id, timestamp
                        );
                        stats.rejected += 1;
                    }
                }
                None => {
                    trace!("Snapshot for unknown handle {:?} ignored", handle);
                    stats.rejected += 1;
                }
            },
            Ingest::Unregister { handle } => {
                if self.remove_entity(handle) {
                    stats.unregistered += 1;
                }
            }
        }
    }

    /// Registers an entity. Re-registering a live handle keeps its history.
    pub fn insert(
        &mut self,
        handle: EntityHandle,
        entity: EntityId,
        order: u64,
        shapes: Arc<[ShapeDef]>,
    ) {
        let index = handle.index as usize;
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        if let Some(existing) = self.slots[index].as_mut() {
            if existing.handle == handle {
                existing.shapes = shapes;
                return;
            }
        }
        self.slots[index] = Some(TrackedEntity {
            id: entity,
            handle,
            order,
            shapes,
            history: HistoryBuffer::new(),
        });
    }

    /// Drops the entity and frees its buffer.
    pub fn remove_entity(&mut self, handle: EntityHandle) -> bool {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.as_ref().map(|t| t.handle) == Some(handle) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&TrackedEntity> {
        self.slots
            .get(handle.index as usize)?
            .as_ref()
            .filter(|t| t.handle == handle)
    }

    fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut TrackedEntity> {
        self.slots
            .get_mut(handle.index as usize)?
            .as_mut()
            .filter(|t| t.handle == handle)
    }

    pub fn prune(&mut self, now: SimTime) -> usize {
        let horizon = self.horizon(now);
        self.slots
            .iter_mut()
            .flatten()
            .map(|tracked| tracked.history.prune(horizon))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked entities in registration order.
    pub fn tracked_in_order(&self) -> Vec<&TrackedEntity> {
        let mut tracked: Vec<&TrackedEntity> = self.slots.iter().flatten().collect();
        tracked.sort_by_key(|t| t.order);
        tracked
    }
}
