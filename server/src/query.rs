//! Rewind requests, their results, and the future a caller waits on.

use crate::aggregate::HitRecord;
use crate::narrowphase::SweepQuery;
use crate::snapshot::{CollisionMask, EntityId, SimTime};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Lets a sweep ricochet off whatever it hits first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Continuation {
    pub max_bounces: u32,
    /// When set, each bounce looks further into the future by the time the
    /// projectile needs to cover the distance already travelled.
    pub projectile_speed: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewindRequest {
    pub target_time: SimTime,
    pub sweep: SweepQuery,
    pub collision_mask: CollisionMask,
    pub ignore: HashSet<EntityId>,
    pub continuation: Option<Continuation>,
}

impl RewindRequest {
    pub fn new(target_time: SimTime, sweep: SweepQuery) -> Self {
        Self {
            target_time,
            sweep,
            collision_mask: CollisionMask::ALL,
            ignore: HashSet::new(),
            continuation: None,
        }
    }

    pub fn with_mask(mut self, mask: CollisionMask) -> Self {
        self.collision_mask = mask;
        self
    }

    pub fn ignoring<I: IntoIterator<Item = EntityId>>(mut self, entities: I) -> Self {
        self.ignore.extend(entities);
        self
    }

    pub fn with_continuation(mut self, continuation: Continuation) -> Self {
        self.continuation = Some(continuation);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewindResult {
    /// Ascending by distance from the sweep start.
    pub hits: Vec<HitRecord>,
    /// Some entity had to be evaluated at a clamped time.
    pub approximate: bool,
    pub resolved_time: SimTime,
    /// No tracked entity made it past broadphase.
    pub live_only: bool,
    /// Sweep segments traced, bounces included.
    pub sub_queries: u32,
}

impl RewindResult {
    pub fn nearest(&self) -> Option<&HitRecord> {
        self.hits.first()
    }

    pub fn hit_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.hits.iter().filter_map(|h| h.entity)
    }
}

/// A request waiting in the worker queue.
#[derive(Debug)]
pub(crate) struct QueuedRequest {
    pub request: RewindRequest,
    pub responder: oneshot::Sender<RewindResult>,
}

impl QueuedRequest {
    pub fn new(request: RewindRequest) -> (Self, PendingRewind) {
        let (responder, receiver) = oneshot::channel();
        (
            Self { request, responder },
            PendingRewind {
                state: PendingState::Waiting(receiver),
            },
        )
    }
}

#[derive(Debug)]
enum PendingState {
    Ready(Option<RewindResult>),
    Waiting(oneshot::Receiver<RewindResult>),
}

/// Resolves to `None` only when the engine went away without answering.
#[derive(Debug)]
pub struct PendingRewind {
    state: PendingState,
}

impl PendingRewind {
    pub(crate) fn ready(result: Option<RewindResult>) -> Self {
        Self {
            state: PendingState::Ready(result),
        }
    }

    /// Non-blocking check, for callers polling once per frame.
    pub fn try_take(&mut self) -> Option<Option<RewindResult>> {
        match &mut self.state {
            PendingState::Ready(result) => Some(result.take()),
            PendingState::Waiting(rx) => match rx.try_recv() {
                Ok(result) => Some(Some(result)),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(None),
            },
        }
    }

    /// Blocks the current thread. Must not be called from async code.
    pub fn blocking_wait(self) -> Option<RewindResult> {
        match self.state {
            PendingState::Ready(result) => result,
            PendingState::Waiting(rx) => rx.blocking_recv().ok(),
        }
    }
}

impl Future for PendingRewind {
    type Output = Option<RewindResult>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            PendingState::Ready(result) => Poll::Ready(result.take()),
            PendingState::Waiting(rx) => Pin::new(rx).poll(cx).map(Result::ok),
        }
    }
}
