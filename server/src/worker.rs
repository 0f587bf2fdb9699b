//! The rewind worker.
//!
//! A single worker owns the [`HistoryStore`] outright. It wakes once per
//! simulation tick, drains the ingestion channel, admits new requests and
//! then resolves queued requests in FIFO order. Every request's first
//! segment is traced in the cycle that admits it; ricochet segments draw
//! on the per-tick sub-query budget. A request that bounces is a pipeline
//! instance that may be parked mid-flight and resumed at the front of the
//! queue on the next tick.

use crate::aggregate::{aggregate, HitRecord, RankedHit};
use crate::broadphase::classify;
use crate::config::LagCompConfig;
use crate::debug_draw::DebugCommand;
use crate::expansion::{expand, world_bounds};
use crate::history::{DrainStats, HistoryStore, Ingest};
use crate::interpolation::Bracket;
use crate::live_world::LiveWorld;
use crate::narrowphase::{sweep_shape, SweepQuery};
use crate::query::{QueuedRequest, RewindRequest, RewindResult};
use crate::snapshot::{CollisionMask, SimTime};
use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tokio::sync::{mpsc, oneshot, watch};

/// Bounce candidates closer than this to their segment start are ignored,
/// and reflected segments start this far off the surface.
const BOUNCE_EPSILON: f32 = 1e-3;

/// Broadcast from the session to wake the worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct WorkerSignal {
    pub now: SimTime,
    pub shutting_down: bool,
}

/// What one worker wake-up did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub drained: DrainStats,
    pub admitted: usize,
    /// Segments traced, first segments and ricochets alike.
    pub sub_queries: u32,
    pub completed: usize,
    /// A request ran out of budget and waits for the next cycle.
    pub parked: bool,
}

/// One in-flight request and everything resolved for it so far.
struct Job {
    request: RewindRequest,
    responder: oneshot::Sender<RewindResult>,
    target: SimTime,
    approximate: bool,
    segment: SweepQuery,
    bounces_left: u32,
    travelled: f32,
    historical: Vec<RankedHit>,
    live: Vec<HitRecord>,
    resolved_any: bool,
    sub_queries: u32,
}

impl Job {
    /// Extra look-ahead accumulated by a projectile over its bounces.
    fn time_offset(&self) -> SimTime {
        match self.request.continuation.and_then(|c| c.projectile_speed) {
            Some(speed) if speed > 0.0 => SimTime::from(self.travelled / speed),
            _ => 0.0,
        }
    }
}

enum SegmentOutcome {
    Continue,
    Done,
}

pub struct RewindWorker {
    store: HistoryStore,
    config: LagCompConfig,
    live_world: Arc<dyn LiveWorld>,
    ingest_rx: mpsc::UnboundedReceiver<Ingest>,
    request_rx: mpsc::UnboundedReceiver<QueuedRequest>,
    debug_tx: mpsc::UnboundedSender<DebugCommand>,
    queue: VecDeque<Job>,
    bound_thread: Option<ThreadId>,
    last_now: SimTime,
}

impl RewindWorker {
    pub(crate) fn new(
        config: LagCompConfig,
        live_world: Arc<dyn LiveWorld>,
        ingest_rx: mpsc::UnboundedReceiver<Ingest>,
        request_rx: mpsc::UnboundedReceiver<QueuedRequest>,
        debug_tx: mpsc::UnboundedSender<DebugCommand>,
    ) -> Self {
        Self {
            store: HistoryStore::new(config.retention_window()),
            config,
            live_world,
            ingest_rx,
            request_rx,
            debug_tx,
            queue: VecDeque::new(),
            bound_thread: None,
            last_now: 0.0,
        }
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Requests admitted but not yet answered.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// One budgeted worker cycle at simulation time `now`.
    pub fn run_cycle(&mut self, now: SimTime) -> CycleStats {
        self.assert_bound();
        self.last_now = now;

        let drained = self.store.drain_ingestion(&mut self.ingest_rx, now);
        let admitted = self.admit(now);
        let (sub_queries, completed, parked) =
            self.process(now, Some(self.config.per_tick_sub_query_budget));

        let stats = CycleStats {
            drained,
            admitted,
            sub_queries,
            completed,
            parked,
        };
        if admitted > 0 || parked || drained.appended + drained.registered > 0 {
            debug!(
                "Cycle at {:.3}s: {} entities, {} snapshots in, {} pruned, {} requests in, {} answered, {} sub-queries{}",
                now,
                self.store.len(),
                drained.appended,
                drained.pruned,
                admitted,
                completed,
                sub_queries,
                if parked { ", budget exhausted" } else { "" }
            );
        }
        stats
    }

    /// Answers every queued request regardless of budget and stops
    /// accepting new ones. Returns how many were answered.
    pub fn drain_all(&mut self, now: SimTime) -> usize {
        self.assert_bound();
        self.store.drain_ingestion(&mut self.ingest_rx, now);
        self.admit(now);
        self.request_rx.close();
        self.admit(now);
        let (_, completed, _) = self.process(now, None);
        completed
    }

    /// Waits for tick signals until shutdown or until the session is gone.
    pub(crate) async fn run(mut self, mut signals: watch::Receiver<WorkerSignal>) {
        self.bound_thread = Some(thread::current().id());
        info!(
            "Rewind worker started (retention {:.3}s, budget {})",
            self.store.retention(),
            self.config.per_tick_sub_query_budget
        );

        loop {
            if signals.changed().await.is_err() {
                let now = self.last_now;
                let answered = self.drain_all(now);
                info!("Session dropped, answered {} outstanding requests", answered);
                break;
            }
            let signal = *signals.borrow_and_update();
            if signal.shutting_down {
                let answered = self.drain_all(signal.now);
                info!("Shutdown requested, answered {} outstanding requests", answered);
                break;
            }
            self.run_cycle(signal.now);
        }

        info!("Rewind worker stopped");
    }

    /// Entry point of the dedicated worker thread.
    pub(crate) fn run_on_current_thread(self, signals: watch::Receiver<WorkerSignal>) {
        match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime.block_on(self.run(signals)),
            Err(e) => error!("Failed to build rewind worker runtime: {}", e),
        }
    }

    fn assert_bound(&self) {
        debug_assert!(
            self.bound_thread
                .map_or(true, |id| id == thread::current().id()),
            "rewind worker state touched from a thread other than its own"
        );
    }

    fn admit(&mut self, now: SimTime) -> usize {
        let horizon = self.store.horizon(now);
        let mut admitted = 0;
        while let Ok(queued) = self.request_rx.try_recv() {
            self.queue.push_back(start_job(queued, now, horizon));
            admitted += 1;
        }
        admitted
    }

    /// Runs every queued job. A request's first segment is always traced;
    /// only ricochet segments draw on `budget`, and a job that cannot
    /// afford its next segment is parked for the next cycle. `None` means
    /// unlimited.
    fn process(&mut self, now: SimTime, budget: Option<u32>) -> (u32, usize, bool) {
        let mut traced = 0;
        let mut charged = 0;
        let mut completed = 0;
        let mut parked = VecDeque::new();

        while let Some(mut job) = self.queue.pop_front() {
            loop {
                let chained = job.sub_queries > 0;
                if chained {
                    if budget.is_some_and(|b| charged >= b) {
                        parked.push_back(job);
                        break;
                    }
                    charged += 1;
                }
                traced += 1;
                match self.trace_segment(&mut job, now) {
                    SegmentOutcome::Continue => continue,
                    SegmentOutcome::Done => {
                        self.finish(job);
                        completed += 1;
                        break;
                    }
                }
            }
        }

        let any_parked = !parked.is_empty();
        self.queue = parked;
        (traced, completed, any_parked)
    }

    /// Broadphase, interpolation, expansion, narrowphase and live trace
    /// for the job's current segment.
    fn trace_segment(&self, job: &mut Job, now: SimTime) -> SegmentOutcome {
        let sweep = job.segment;
        let time = (job.target + job.time_offset()).min(now);
        let mask = job.request.collision_mask;
        job.sub_queries += 1;

        let mut exclude = job.request.ignore.clone();
        let mut historical = Vec::new();

        for tracked in self.store.tracked_in_order() {
            if job.request.ignore.contains(&tracked.id) {
                continue;
            }
            let Some(bracket) = tracked.history.bracket(time) else {
                continue;
            };
            exclude.insert(tracked.id);
            if bracket.clamped {
                job.approximate = true;
            }
            if !bracket_mask(&bracket).intersects(mask) {
                continue;
            }

            let verdict = classify(&bracket, &sweep, &self.config);
            trace!("Entity {} at {:.4}s: {:?}", tracked.id, time, verdict);
            if !verdict.survives() {
                continue;
            }
            job.resolved_any = true;

            let pose = bracket.pose_at(time);
            if self.config.debug_draw {
                self.emit(DebugCommand::PoseBox {
                    entity: tracked.id,
                    bounds: world_bounds(&tracked.shapes, &pose),
                    time,
                });
            }
            for shape in expand(&tracked.shapes, &pose) {
                if let Some(contact) = sweep_shape(&sweep, &shape.shape) {
                    historical.push(RankedHit {
                        hit: HitRecord::from_contact(Some(tracked.id), &shape, &contact),
                        order: tracked.order,
                        shape_index: shape.shape_index,
                    });
                }
            }
        }

        let mut live = self.live_world.trace(&sweep, mask, &exclude);

        let offset = job.travelled;
        for ranked in &mut historical {
            ranked.hit.distance_from_start += offset;
        }
        for hit in &mut live {
            hit.distance_from_start += offset;
        }

        let bounce = if job.bounces_left > 0 {
            historical
                .iter()
                .map(|r| &r.hit)
                .chain(&live)
                .filter(|h| h.distance_from_start - offset > BOUNCE_EPSILON)
                .min_by(|a, b| a.distance_from_start.total_cmp(&b.distance_from_start))
                .map(|h| (h.distance_from_start, h.entry_normal))
        } else {
            None
        };

        let Some((cutoff, normal)) = bounce else {
            job.historical.extend(historical);
            job.live.extend(live);
            return SegmentOutcome::Done;
        };

        // Anything behind the ricochet point was never reached.
        historical.retain(|r| r.hit.distance_from_start <= cutoff);
        live.retain(|h| h.distance_from_start <= cutoff);
        job.historical.extend(historical);
        job.live.extend(live);

        let length = sweep.length();
        let along = cutoff - offset;
        let remaining = length - along;
        if remaining <= BOUNCE_EPSILON {
            return SegmentOutcome::Done;
        }

        let direction = sweep.direction();
        let reflected = direction - 2.0 * direction.dot(normal) * normal;
        let center = sweep.point_at(along / length) + normal * BOUNCE_EPSILON;
        job.segment = SweepQuery::new(center, center + reflected * remaining, sweep.radius);
        job.travelled = cutoff;
        job.bounces_left -= 1;
        SegmentOutcome::Continue
    }

    fn finish(&self, job: Job) {
        let hits = aggregate(job.historical, job.live);
        if self.config.debug_draw {
            let sweep = job.request.sweep;
            self.emit(DebugCommand::Sweep {
                start: sweep.start,
                end: sweep.end,
                radius: sweep.radius,
                approximate: job.approximate,
            });
            for hit in &hits {
                self.emit(DebugCommand::HitMarker {
                    entity: hit.entity,
                    point: hit.entry_point,
                    normal: hit.entry_normal,
                });
            }
        }

        let result = RewindResult {
            hits,
            approximate: job.approximate,
            resolved_time: job.target,
            live_only: !job.resolved_any,
            sub_queries: job.sub_queries,
        };
        if job.responder.send(result).is_err() {
            trace!("Rewind caller went away before its result was ready");
        }
    }

    fn emit(&self, command: DebugCommand) {
        let _ = self.debug_tx.send(command);
    }
}

/// Clamps the request's target into `[horizon, now]`.
fn start_job(queued: QueuedRequest, now: SimTime, horizon: SimTime) -> Job {
    let QueuedRequest { request, responder } = queued;
    let mut target = request.target_time;
    let mut approximate = false;

    if !target.is_finite() || target > now {
        target = now;
        approximate = true;
    }
    if target < horizon {
        warn!(
            "Rewind to {:.3}s is {:.3}s past the retention window, clamping",
            target,
            horizon - target
        );
        target = horizon;
        approximate = true;
    }

    Job {
        segment: request.sweep,
        bounces_left: request.continuation.map_or(0, |c| c.max_bounces),
        request,
        responder,
        target,
        approximate,
        travelled: 0.0,
        historical: Vec::new(),
        live: Vec::new(),
        resolved_any: false,
        sub_queries: 0,
    }
}

fn bracket_mask(bracket: &Bracket<'_>) -> CollisionMask {
    let newer = bracket.newer.map_or(0, |s| s.collision_mask.0);
    CollisionMask(bracket.older.collision_mask.0 | newer)
}
