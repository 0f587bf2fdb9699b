//! The engine's public face.
//!
//! A [`LagCompensator`] owns the channels to the rewind worker and the
//! registry of tracked entities. It holds no global state: any number of
//! independent sessions can run side by side, each with its own worker.

use crate::aggregate::aggregate;
use crate::config::LagCompConfig;
use crate::debug_draw::{DebugCommand, DebugSink};
use crate::error::{ConfigError, RegistrationError, StartError};
use crate::history::Ingest;
use crate::live_world::LiveWorld;
use crate::narrowphase::SweepQuery;
use crate::query::{PendingRewind, QueuedRequest, RewindRequest, RewindResult};
use crate::recorder::{lock, EntityRecorder, Registry, SharedRegistry};
use crate::shape::ShapeDef;
use crate::snapshot::{CollisionMask, EntityHandle, EntityId, SimTime};
use crate::worker::{RewindWorker, WorkerSignal};
use glam::Vec3;
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, watch};

const WORKER_THREAD_NAME: &str = "lag-comp-worker";

pub struct LagCompensator {
    config: LagCompConfig,
    enabled: AtomicBool,
    /// Latest simulation time, as `f64` bits.
    now: AtomicU64,
    registry: SharedRegistry,
    live_world: Arc<dyn LiveWorld>,
    ingest_tx: mpsc::UnboundedSender<Ingest>,
    request_tx: mpsc::UnboundedSender<QueuedRequest>,
    debug_rx: Mutex<mpsc::UnboundedReceiver<DebugCommand>>,
    signal_tx: watch::Sender<WorkerSignal>,
    discovery_tx: watch::Sender<u64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LagCompensator {
    /// Starts a session with its worker on a dedicated thread.
    pub fn new(config: LagCompConfig, live_world: Arc<dyn LiveWorld>) -> Result<Self, StartError> {
        let (mut session, worker) = Self::manual(config, live_world)?;
        let signals = session.signal_tx.subscribe();

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run_on_current_thread(signals))?;
        session.worker = Mutex::new(Some(handle));
        Ok(session)
    }

    /// Builds a session without spawning anything. The caller drives the
    /// returned worker with [`RewindWorker::run_cycle`], which makes ticks
    /// fully deterministic.
    pub fn manual(
        config: LagCompConfig,
        live_world: Arc<dyn LiveWorld>,
    ) -> Result<(Self, RewindWorker), ConfigError> {
        config.validate()?;

        let (ingest_tx, ingest_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (debug_tx, debug_rx) = mpsc::unbounded_channel();
        let (signal_tx, _) = watch::channel(WorkerSignal {
            now: 0.0,
            shutting_down: false,
        });
        let (discovery_tx, _) = watch::channel(0);

        let worker = RewindWorker::new(
            config.clone(),
            live_world.clone(),
            ingest_rx,
            request_rx,
            debug_tx,
        );
        let session = Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            now: AtomicU64::new(0.0_f64.to_bits()),
            registry: Arc::new(Mutex::new(Registry::default())),
            live_world,
            ingest_tx,
            request_tx,
            debug_rx: Mutex::new(debug_rx),
            signal_tx,
            discovery_tx,
            worker: Mutex::new(None),
        };
        Ok((session, worker))
    }

    pub fn config(&self) -> &LagCompConfig {
        &self.config
    }

    /// Registers a single-body entity.
    pub fn register(
        &self,
        entity: EntityId,
        shapes: Vec<ShapeDef>,
    ) -> Result<EntityRecorder, RegistrationError> {
        self.register_articulated(entity, shapes, 0)
    }

    /// Registers an entity whose poses carry `segment_count` segments.
    pub fn register_articulated(
        &self,
        entity: EntityId,
        shapes: Vec<ShapeDef>,
        segment_count: u16,
    ) -> Result<EntityRecorder, RegistrationError> {
        if self.ingest_tx.is_closed() {
            return Err(RegistrationError::EngineStopped);
        }

        let registered = lock(&self.registry).register(entity, shapes, segment_count)?;
        if !registered.reused {
            info!(
                "Registered entity {} as {:?} with {} shapes",
                entity,
                registered.handle,
                registered.shapes.len()
            );
        }
        self.ingest_tx
            .send(registered.to_ingest(entity))
            .map_err(|_| RegistrationError::EngineStopped)?;

        Ok(EntityRecorder::new(
            entity,
            registered,
            self.ingest_tx.clone(),
            self.discovery_tx.subscribe(),
            self.registry.clone(),
        ))
    }

    /// Stops tracking by handle. Stale handles are ignored.
    pub fn unregister(&self, handle: EntityHandle) -> bool {
        let released = lock(&self.registry).release(handle);
        if released {
            info!("Unregistered {:?}", handle);
            let _ = self.ingest_tx.send(Ingest::Unregister { handle });
        }
        released
    }

    pub fn registered_count(&self) -> usize {
        lock(&self.registry).len()
    }

    /// Asks every live recorder to re-send its registration on its next
    /// capture.
    pub fn announce_discovery(&self) {
        self.discovery_tx.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
        info!("Discovery announced");
    }

    /// Advances simulation time and wakes the worker.
    pub fn tick(&self, now: SimTime) {
        self.now.store(now.to_bits(), Ordering::Release);
        // Leaves a posted shutdown in place.
        self.signal_tx.send_modify(|signal| signal.now = now);
    }

    pub fn now(&self) -> SimTime {
        f64::from_bits(self.now.load(Ordering::Acquire))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Kill switch. While disabled, queries trace the live world on the
    /// caller's thread.
    pub fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::AcqRel) != enabled {
            warn!(
                "Lag compensation {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    pub fn submit(&self, mut request: RewindRequest) -> PendingRewind {
        let now = self.now();
        if !self.is_enabled() {
            return PendingRewind::ready(Some(self.trace_live(&request, now)));
        }

        if let Some(latency) = self.config.latency_override() {
            request.target_time = now - latency;
        }

        let (queued, pending) = QueuedRequest::new(request);
        if self.request_tx.send(queued).is_err() {
            warn!("Rewind submitted after the worker stopped");
            return PendingRewind::ready(None);
        }
        pending
    }

    /// Shorthand for a plain sweep without continuation.
    pub fn rewind_query(
        &self,
        target_time: SimTime,
        start: Vec3,
        end: Vec3,
        radius: f32,
        mask: CollisionMask,
        ignore: HashSet<EntityId>,
    ) -> PendingRewind {
        let mut request = RewindRequest::new(target_time, SweepQuery::new(start, end, radius))
            .with_mask(mask);
        request.ignore = ignore;
        self.submit(request)
    }

    /// Hands every queued debug command to `sink`. Returns how many.
    pub fn flush_debug_commands<S: DebugSink>(&self, sink: &mut S) -> usize {
        let mut rx = self.debug_rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut flushed = 0;
        while let Ok(command) = rx.try_recv() {
            sink.draw(command);
            flushed += 1;
        }
        flushed
    }

    /// Answers every outstanding request, then stops the worker.
    pub fn shutdown(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        self.signal_shutdown();
        if handle.join().is_err() {
            error!("Rewind worker panicked");
        }
    }

    fn signal_shutdown(&self) {
        let now = self.now();
        self.signal_tx.send_modify(|signal| {
            signal.now = now;
            signal.shutting_down = true;
        });
    }

    fn trace_live(&self, request: &RewindRequest, now: SimTime) -> RewindResult {
        let hits = self
            .live_world
            .trace(&request.sweep, request.collision_mask, &request.ignore);
        RewindResult {
            hits: aggregate(Vec::new(), hits),
            approximate: false,
            resolved_time: now,
            live_only: true,
            sub_queries: 1,
        }
    }
}

impl Drop for LagCompensator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
