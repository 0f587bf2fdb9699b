//! Integration tests for the lag compensation engine and the demo server
//!
//! These tests drive the engine through its public session API, mostly with
//! a manually cycled worker so every tick is deterministic.

use bincode::{deserialize, serialize};
use glam::{EulerRot, Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use server::config::LagCompConfig;
use server::geometry::Transform;
use server::live_world::{EmptyWorld, LiveWorld, StaticWorld};
use server::narrowphase::SweepQuery;
use server::query::{Continuation, RewindRequest, RewindResult};
use server::session::LagCompensator;
use server::shape::{ConvexHull, ShapeDef};
use server::snapshot::{CollisionMask, Pose, SimTime};
use server::worker::RewindWorker;
use shared::{HitSummary, Packet, TargetState, PROTOCOL_VERSION};
use std::sync::Arc;
use std::time::Duration;

fn manual_session(config: LagCompConfig, live: Arc<dyn LiveWorld>) -> (LagCompensator, RewindWorker) {
    LagCompensator::manual(config, live).unwrap()
}

fn at(position: Vec3) -> Pose {
    Pose::rigid(Transform::from_translation(position))
}

/// Submits one request at `now` and runs a single worker cycle.
fn resolve(
    session: &LagCompensator,
    worker: &mut RewindWorker,
    request: RewindRequest,
    now: SimTime,
) -> RewindResult {
    session.tick(now);
    let mut pending = session.submit(request);
    worker.run_cycle(now);
    pending
        .try_take()
        .flatten()
        .expect("request answered within one cycle")
}

fn vertical_ray(x: f32) -> SweepQuery {
    SweepQuery::ray(Vec3::new(x, 5.0, 0.0), Vec3::new(x, -5.0, 0.0))
}

/// INTERPOLATION TESTS
mod interpolation_tests {
    use super::*;
    use server::interpolation::{blend_factor, interpolate_pose};

    /// Poses at either end of a bracket come back unchanged, the midpoint
    /// lerps position and slerps rotation
    #[test]
    fn boundary_and_midpoint_poses() {
        let a = Pose::rigid(Transform::from_translation_rotation(
            Vec3::new(0.0, 0.0, 0.0),
            Quat::IDENTITY,
        ));
        let b = Pose::rigid(Transform::from_translation_rotation(
            Vec3::new(10.0, 2.0, 0.0),
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
        ));

        assert_eq!(interpolate_pose(&a, &b, blend_factor(1.0, 2.0, 1.0)), a);
        assert_eq!(interpolate_pose(&a, &b, blend_factor(1.0, 2.0, 2.0)), b);

        let mid = interpolate_pose(&a, &b, blend_factor(1.0, 2.0, 1.5));
        assert!(mid.root.translation.distance(Vec3::new(5.0, 1.0, 0.0)) < 1e-5);
        let expected = Quat::from_rotation_y(std::f32::consts::FRAC_PI_4);
        assert!(mid.root.rotation.angle_between(expected) < 1e-4);
    }

    /// The pipeline traces against the interpolated pose
    #[test]
    fn rewind_follows_interpolated_position() {
        let (session, mut worker) = manual_session(LagCompConfig::default(), Arc::new(EmptyWorld));
        let mut recorder = session
            .register(1, vec![ShapeDef::cuboid(Vec3::ONE)])
            .unwrap();
        recorder.capture(at(Vec3::ZERO), 0.0);
        recorder.capture(at(Vec3::new(10.0, 0.0, 0.0)), 1.0);

        let start = resolve(&session, &mut worker, RewindRequest::new(0.0, vertical_ray(0.0)), 1.0);
        assert_eq!(start.hits.len(), 1);
        assert!((start.hits[0].entry_point.y - 1.0).abs() < 1e-3);

        let mid = resolve(&session, &mut worker, RewindRequest::new(0.5, vertical_ray(5.0)), 1.0);
        assert_eq!(mid.hit_entities().collect::<Vec<_>>(), vec![1]);
        assert!(!mid.approximate);

        let gone = resolve(&session, &mut worker, RewindRequest::new(0.5, vertical_ray(0.0)), 1.0);
        assert!(gone.hits.is_empty());

        let end = resolve(&session, &mut worker, RewindRequest::new(1.0, vertical_ray(10.0)), 1.0);
        assert_eq!(end.hits.len(), 1);
    }

    /// A lone snapshot answers every query time with the same pose
    #[test]
    fn single_snapshot_is_stable() {
        let (session, mut worker) = manual_session(LagCompConfig::default(), Arc::new(EmptyWorld));
        let mut recorder = session.register(4, vec![ShapeDef::sphere(0.5)]).unwrap();
        recorder.capture(at(Vec3::new(3.0, 0.0, 0.0)), 0.5);

        let mut points = Vec::new();
        for target in [0.2, 0.5, 0.9] {
            let result = resolve(
                &session,
                &mut worker,
                RewindRequest::new(target, vertical_ray(3.0)),
                0.9,
            );
            assert_eq!(result.hits.len(), 1, "query at {}", target);
            points.push(result.hits[0].entry_point);
        }
        assert!(points.windows(2).all(|w| w[0].distance(w[1]) < 1e-6));
    }
}

/// HISTORY TESTS
mod history_tests {
    use super::*;

    /// Continuous capture keeps every instant of the window bracketed
    #[test]
    fn retention_window_stays_covered() {
        let (session, mut worker) = manual_session(LagCompConfig::default(), Arc::new(EmptyWorld));
        let mut recorder = session.register(1, vec![ShapeDef::sphere(0.5)]).unwrap();
        let retention = session.config().retention_window();

        for frame in 0..=90 {
            let now = frame as f64 / 30.0;
            recorder.capture(at(Vec3::new(now as f32, 0.0, 0.0)), now);
            worker.run_cycle(now);

            if now < retention {
                continue;
            }
            let tracked = worker.store().tracked_in_order()[0];
            let history = &tracked.history;
            assert!(history.oldest().unwrap().timestamp <= now - retention + 1e-9);
            assert_eq!(history.newest().unwrap().timestamp, now);
            // Bounded by the window plus the one bracketing snapshot.
            assert!(history.len() <= 32);

            for step in 0..=10 {
                let t = now - retention * f64::from(step) / 10.0;
                let bracket = history.bracket(t).unwrap();
                assert!(!bracket.clamped, "t={} uncovered at now={}", t, now);
            }
        }
    }

    /// Rewinding past the window resolves exactly like the window's edge
    #[test]
    fn stale_query_matches_window_edge() {
        let (session, mut worker) = manual_session(LagCompConfig::default(), Arc::new(EmptyWorld));
        let mut recorder = session.register(1, vec![ShapeDef::sphere(0.5)]).unwrap();
        for frame in 0..=60 {
            let now = frame as f64 / 30.0;
            recorder.capture(at(Vec3::new(now as f32, 0.0, 0.0)), now);
            worker.run_cycle(now);
        }

        let now = 2.0;
        let edge = now - session.config().retention_window();
        let sweep = vertical_ray(1.0);

        let exact = resolve(&session, &mut worker, RewindRequest::new(edge, sweep), now);
        let stale = resolve(&session, &mut worker, RewindRequest::new(edge - 1.0, sweep), now);

        assert!(!exact.approximate);
        assert!(stale.approximate);
        assert_eq!(stale.resolved_time, exact.resolved_time);
        assert_eq!(stale.hits, exact.hits);
        assert_eq!(exact.hits.len(), 1);
    }

    /// Re-announcing registrations keeps history intact
    #[test]
    fn discovery_reregisters_without_losing_history() {
        let (session, mut worker) = manual_session(LagCompConfig::default(), Arc::new(EmptyWorld));
        let mut recorder = session.register(9, vec![ShapeDef::sphere(1.0)]).unwrap();
        recorder.capture(at(Vec3::ZERO), 0.0);
        worker.run_cycle(0.0);

        session.announce_discovery();
        recorder.capture(at(Vec3::X), 0.1);
        let stats = worker.run_cycle(0.1);

        assert_eq!(stats.drained.registered, 1);
        assert_eq!(worker.store().len(), 1);
        assert_eq!(worker.store().tracked_in_order()[0].history.len(), 2);
    }

    /// Unregistered entities disappear from query results
    #[test]
    fn unregistered_entity_is_not_hit() {
        let (session, mut worker) = manual_session(LagCompConfig::default(), Arc::new(EmptyWorld));
        let mut recorder = session.register(2, vec![ShapeDef::sphere(1.0)]).unwrap();
        recorder.capture(at(Vec3::ZERO), 0.0);
        worker.run_cycle(0.0);
        assert!(recorder.unregister());

        let result = resolve(&session, &mut worker, RewindRequest::new(0.0, vertical_ray(0.0)), 0.1);
        assert!(result.hits.is_empty());
        assert!(result.live_only);
        assert_eq!(session.registered_count(), 0);
    }

    /// A despawned entity's recorder takes its history with it
    #[test]
    fn dropped_recorder_is_not_hit_later() {
        let (session, mut worker) = manual_session(LagCompConfig::default(), Arc::new(EmptyWorld));
        let mut recorder = session.register(5, vec![ShapeDef::sphere(1.0)]).unwrap();
        let mut shared = session.register(5, vec![ShapeDef::sphere(1.0)]).unwrap();
        recorder.capture(at(Vec3::ZERO), 0.0);
        worker.run_cycle(0.0);

        // Another recorder still holds the registration.
        drop(recorder);
        let held = resolve(&session, &mut worker, RewindRequest::new(0.5, vertical_ray(0.0)), 0.5);
        assert_eq!(held.hit_entities().collect::<Vec<_>>(), vec![5]);

        shared.capture(at(Vec3::ZERO), 0.5);
        drop(shared);
        let later = resolve(&session, &mut worker, RewindRequest::new(30.0, vertical_ray(0.0)), 30.0);
        assert!(later.hits.is_empty());
        assert_eq!(session.registered_count(), 0);
        assert_eq!(worker.store().len(), 0);
    }
}

/// QUERY SCENARIO TESTS
mod query_tests {
    use super::*;
    use server::expansion::expand;
    use server::interpolation::{blend_factor, interpolate_pose};
    use server::narrowphase::sweep_shape;

    /// Capsule moving from the origin to x=10, rewound to its halfway point
    #[test]
    fn capsule_rewound_to_halfway() {
        let (session, mut worker) = manual_session(LagCompConfig::default(), Arc::new(EmptyWorld));
        let capsule = ShapeDef::capsule(1.0, 2.0).at(Transform::from_translation_rotation(
            Vec3::ZERO,
            Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
        ));
        let mut recorder = session.register(1, vec![capsule]).unwrap();
        recorder.capture(at(Vec3::ZERO), 0.0);
        recorder.capture(at(Vec3::new(10.0, 0.0, 0.0)), 0.1);

        let sweep = SweepQuery::new(Vec3::new(5.0, -5.0, 0.0), Vec3::new(5.0, 5.0, 0.0), 0.1);
        let result = resolve(&session, &mut worker, RewindRequest::new(0.05, sweep), 0.1);

        assert_eq!(result.hits.len(), 1);
        let hit = &result.hits[0];
        assert_eq!(hit.entity, Some(1));
        assert!(hit.entry_point.distance(Vec3::new(5.0, -1.0, 0.0)) < 1e-2);
        assert!(hit.exit_point.distance(Vec3::new(5.0, 1.0, 0.0)) < 1e-2);
        assert!(hit.penetration_depth.abs() < 1e-3);
        assert!(!result.approximate);
        assert!(!result.live_only);
    }

    /// Two overlapping entities, one ignored
    #[test]
    fn ignore_set_leaves_one_hit() {
        let (session, mut worker) = manual_session(LagCompConfig::default(), Arc::new(EmptyWorld));
        let mut shooter = session.register(1, vec![ShapeDef::sphere(1.0)]).unwrap();
        let mut victim = session.register(2, vec![ShapeDef::sphere(1.0)]).unwrap();
        shooter.capture(at(Vec3::ZERO), 0.0);
        victim.capture(at(Vec3::new(0.5, 0.0, 0.0)), 0.0);

        let request = RewindRequest::new(0.0, vertical_ray(0.25)).ignoring([1]);
        let result = resolve(&session, &mut worker, request, 0.0);

        assert_eq!(result.hit_entities().collect::<Vec<_>>(), vec![2]);
    }

    /// Equal distances fall back to registration order
    #[test]
    fn ties_follow_registration_order() {
        let run = || {
            let (session, mut worker) =
                manual_session(LagCompConfig::default(), Arc::new(EmptyWorld));
            let mut first = session.register(20, vec![ShapeDef::sphere(1.0)]).unwrap();
            let mut second = session.register(10, vec![ShapeDef::sphere(1.0)]).unwrap();
            first.capture(at(Vec3::ZERO), 0.0);
            second.capture(at(Vec3::ZERO), 0.0);
            resolve(&session, &mut worker, RewindRequest::new(0.0, vertical_ray(0.0)), 0.0)
        };

        let a = run();
        let b = run();
        assert_eq!(a.hit_entities().collect::<Vec<_>>(), vec![20, 10]);
        assert_eq!(a, b);
    }

    /// Tracked hits are merged with static geometry by distance
    #[test]
    fn historical_and_live_hits_sorted_together() {
        let wall = StaticWorld::new().with_shape(
            &ShapeDef::cuboid(Vec3::new(0.5, 5.0, 5.0)),
            Transform::from_translation(Vec3::new(8.0, 0.0, 0.0)),
            CollisionMask::ALL,
        );
        let (session, mut worker) = manual_session(LagCompConfig::default(), Arc::new(wall));
        let mut near = session.register(1, vec![ShapeDef::sphere(0.5)]).unwrap();
        let mut far = session.register(2, vec![ShapeDef::sphere(0.5)]).unwrap();
        near.capture(at(Vec3::new(4.0, 0.0, 0.0)), 0.0);
        far.capture(at(Vec3::new(12.0, 0.0, 0.0)), 0.0);

        let sweep = SweepQuery::ray(Vec3::ZERO, Vec3::new(20.0, 0.0, 0.0));
        let result = resolve(&session, &mut worker, RewindRequest::new(0.0, sweep), 0.0);

        let order: Vec<Option<u64>> = result.hits.iter().map(|h| h.entity).collect();
        assert_eq!(order, vec![Some(1), None, Some(2)]);
        assert!(result
            .hits
            .windows(2)
            .all(|w| w[0].distance_from_start <= w[1].distance_from_start));
    }

    /// Collision masks filter both tracked and static geometry
    #[test]
    fn collision_mask_filters_everything() {
        let wall = StaticWorld::new().with_shape(
            &ShapeDef::cuboid(Vec3::ONE),
            Transform::from_translation(Vec3::new(6.0, 0.0, 0.0)),
            CollisionMask(0b10),
        );
        let (session, mut worker) = manual_session(LagCompConfig::default(), Arc::new(wall));
        let mut recorder = session.register(1, vec![ShapeDef::sphere(0.5)]).unwrap();
        recorder.set_collision_mask(CollisionMask(0b01));
        recorder.capture(at(Vec3::new(3.0, 0.0, 0.0)), 0.0);

        let sweep = SweepQuery::ray(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0));
        let targets_only = resolve(
            &session,
            &mut worker,
            RewindRequest::new(0.0, sweep).with_mask(CollisionMask(0b01)),
            0.0,
        );
        assert_eq!(
            targets_only.hits.iter().map(|h| h.entity).collect::<Vec<_>>(),
            vec![Some(1)]
        );

        let walls_only = resolve(
            &session,
            &mut worker,
            RewindRequest::new(0.0, sweep).with_mask(CollisionMask(0b10)),
            0.0,
        );
        assert_eq!(
            walls_only.hits.iter().map(|h| h.entity).collect::<Vec<_>>(),
            vec![None]
        );
    }

    fn random_shape(rng: &mut StdRng) -> ShapeDef {
        let offset = Vec3::new(
            rng.gen_range(-0.5..0.5),
            rng.gen_range(-0.5..0.5),
            rng.gen_range(-0.5..0.5),
        );
        let tilt = Quat::from_euler(
            EulerRot::XYZ,
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let half_extents = Vec3::new(
            rng.gen_range(0.2..1.2),
            rng.gen_range(0.2..1.2),
            rng.gen_range(0.2..1.2),
        );
        let shape = match rng.gen_range(0..5) {
            0 => ShapeDef::sphere(rng.gen_range(0.2..1.0)),
            1 => ShapeDef::cuboid(half_extents),
            2 => ShapeDef::capsule(rng.gen_range(0.2..0.6), rng.gen_range(0.2..1.0)),
            3 => ShapeDef::convex(half_extents, Some(ConvexHull::from_half_extents(half_extents))),
            _ => ShapeDef::convex(half_extents, None),
        };
        shape.at(Transform::from_translation_rotation(offset, tilt))
    }

    fn random_pose(rng: &mut StdRng) -> Pose {
        Pose::rigid(Transform::from_translation_rotation(
            Vec3::new(
                rng.gen_range(-3.0..3.0),
                rng.gen_range(-3.0..3.0),
                rng.gen_range(-3.0..3.0),
            ),
            Quat::from_euler(
                EulerRot::YXZ,
                rng.gen_range(-3.1..3.1),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(-3.1..3.1),
            ),
        ))
    }

    /// Broadphase never rejects what an unconditional narrowphase would hit
    #[test]
    fn no_false_negatives_against_brute_force() {
        let mut rng = StdRng::seed_from_u64(0x1a6c);
        let mut brute_hits = 0;

        for trial in 0..400 {
            let shapes = vec![random_shape(&mut rng), random_shape(&mut rng)];
            let older = random_pose(&mut rng);
            let newer = random_pose(&mut rng);
            let target: SimTime = rng.gen_range(0.0..0.1);

            let pose = interpolate_pose(&older, &newer, blend_factor(0.0, 0.1, target));
            let aim = pose.root.translation
                + Vec3::new(
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(-1.5..1.5),
                );
            let direction = Vec3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            )
            .try_normalize()
            .unwrap_or(Vec3::X);
            let sweep = SweepQuery::new(
                aim - direction * 8.0,
                aim + direction * 8.0,
                rng.gen_range(0.0..0.3),
            );

            let brute = expand(&shapes, &pose)
                .iter()
                .any(|shape| sweep_shape(&sweep, &shape.shape).is_some());

            let (session, mut worker) =
                manual_session(LagCompConfig::default(), Arc::new(EmptyWorld));
            let mut recorder = session.register(1, shapes).unwrap();
            recorder.capture(older, 0.0);
            recorder.capture(newer, 0.1);
            let result = resolve(&session, &mut worker, RewindRequest::new(target, sweep), 0.1);

            if brute {
                brute_hits += 1;
                assert!(
                    result.hit_entities().any(|id| id == 1),
                    "trial {} missed a brute-force hit",
                    trial
                );
            }
        }

        assert!(brute_hits > 50, "only {} trials produced hits", brute_hits);
    }
}

/// SESSION BEHAVIOUR TESTS
mod session_tests {
    use super::*;

    /// A ricochet off a mirror looks ahead by the projectile's flight time
    /// and resumes across ticks when the budget runs out
    #[test]
    fn ricochet_carries_time_offset_across_ticks() {
        let mirror = StaticWorld::new().with_shape(
            &ShapeDef::cuboid(Vec3::new(0.5, 5.0, 20.0)),
            Transform::from_translation(Vec3::new(10.0, 0.0, 0.0)),
            CollisionMask::ALL,
        );
        let config = LagCompConfig {
            per_tick_sub_query_budget: 1,
            ..Default::default()
        };
        let (session, mut worker) = manual_session(config, Arc::new(mirror));

        // Out of the way until t=0.1, then parked on the rebound path.
        let mut target = session.register(1, vec![ShapeDef::sphere(0.5)]).unwrap();
        let rebound_mid = Vec3::new(4.75, 0.0, 14.25);
        target.capture(at(rebound_mid + Vec3::Y * 20.0), 0.0);
        target.capture(at(rebound_mid), 0.1);
        target.capture(at(rebound_mid), 0.2);

        let to_mirror = 9.5 * 2f32.sqrt();
        let sweep = SweepQuery::ray(Vec3::ZERO, Vec3::new(19.0, 0.0, 19.0));
        let request = RewindRequest::new(0.0, sweep).with_continuation(Continuation {
            max_bounces: 1,
            projectile_speed: Some(to_mirror / 0.1),
        });

        // The first shot's rebound spends the whole budget, so the second
        // one parks before its rebound and finishes next tick.
        session.tick(0.2);
        let mut ahead = session.submit(request.clone());
        let mut pending = session.submit(request.clone());
        let first = worker.run_cycle(0.2);
        assert!(first.parked);
        assert!(pending.try_take().is_none());

        let second = worker.run_cycle(0.2);
        assert_eq!(second.completed, 1);
        let result = pending.try_take().flatten().unwrap();
        assert_eq!(ahead.try_take().flatten().unwrap(), result);

        assert_eq!(result.sub_queries, 2);
        let order: Vec<Option<u64>> = result.hits.iter().map(|h| h.entity).collect();
        assert_eq!(order, vec![None, Some(1)]);
        assert!((result.hits[0].distance_from_start - to_mirror).abs() < 1e-2);
        let rebound_entry = to_mirror + rebound_mid.distance(Vec3::new(9.5, 0.0, 9.5)) - 0.5;
        assert!((result.hits[1].distance_from_start - rebound_entry).abs() < 5e-2);

        // Without a projectile speed the rebound is traced at t=0.
        let mut instant = request;
        instant.continuation = Some(Continuation {
            max_bounces: 1,
            projectile_speed: None,
        });
        let mut pending = session.submit(instant);
        worker.run_cycle(0.2);
        worker.run_cycle(0.2);
        let result = pending.try_take().flatten().unwrap();
        assert_eq!(result.hit_entities().count(), 0);
    }

    /// With the kill switch thrown only live geometry answers
    #[test]
    fn kill_switch_skips_history() {
        let wall = StaticWorld::new().with_shape(
            &ShapeDef::cuboid(Vec3::ONE),
            Transform::from_translation(Vec3::new(8.0, 0.0, 0.0)),
            CollisionMask::ALL,
        );
        let (session, mut worker) = manual_session(LagCompConfig::default(), Arc::new(wall));
        let mut recorder = session.register(1, vec![ShapeDef::sphere(0.5)]).unwrap();
        recorder.capture(at(Vec3::new(3.0, 0.0, 0.0)), 0.0);
        worker.run_cycle(0.0);

        session.set_enabled(false);
        let sweep = SweepQuery::ray(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0));
        let result = session
            .submit(RewindRequest::new(0.0, sweep))
            .blocking_wait()
            .unwrap();
        assert!(result.live_only);
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].entity, None);

        session.set_enabled(true);
        let result = resolve(&session, &mut worker, RewindRequest::new(0.0, sweep), 0.0);
        assert_eq!(result.hits.len(), 2);
    }

    /// Shutting down answers everything still queued
    #[test]
    fn shutdown_fulfils_outstanding_requests() {
        let session = LagCompensator::new(LagCompConfig::default(), Arc::new(EmptyWorld)).unwrap();
        let mut recorder = session.register(1, vec![ShapeDef::sphere(1.0)]).unwrap();
        recorder.capture(at(Vec3::ZERO), 0.0);

        // Never ticked, so only shutdown can answer these.
        let pendings: Vec<_> = (0..4)
            .map(|_| session.submit(RewindRequest::new(0.0, vertical_ray(0.0))))
            .collect();
        session.shutdown();

        for pending in pendings {
            let result = pending.blocking_wait().unwrap();
            assert_eq!(result.hits.len(), 1);
        }
    }

    /// Dropping the session answers outstanding requests too
    #[tokio::test]
    async fn dropping_session_fulfils_futures() {
        let session = LagCompensator::new(LagCompConfig::default(), Arc::new(EmptyWorld)).unwrap();
        let pending = session.submit(RewindRequest::new(0.0, vertical_ray(0.0)));
        drop(session);
        let result = pending.await.unwrap();
        assert!(result.live_only);
    }

    /// Independent sessions never see each other's entities
    #[test]
    fn sessions_are_isolated() {
        let (a, mut worker_a) = manual_session(LagCompConfig::default(), Arc::new(EmptyWorld));
        let (b, mut worker_b) = manual_session(LagCompConfig::default(), Arc::new(EmptyWorld));
        let mut recorder = a.register(1, vec![ShapeDef::sphere(1.0)]).unwrap();
        recorder.capture(at(Vec3::ZERO), 0.0);

        let in_a = resolve(&a, &mut worker_a, RewindRequest::new(0.0, vertical_ray(0.0)), 0.0);
        let in_b = resolve(&b, &mut worker_b, RewindRequest::new(0.0, vertical_ray(0.0)), 0.0);
        assert_eq!(in_a.hits.len(), 1);
        assert!(in_b.hits.is_empty());
    }
}

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;
    use server::game::{arena_world, TargetField};
    use server::network::{Server, ServerMessage};
    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    /// Tests packet serialization round-trip for network protocol validation
    #[test]
    fn packet_serialization_roundtrip() {
        let test_packets = vec![
            Packet::Connect { client_version: 1 },
            Packet::Fire {
                sequence: 3,
                view_time: 12.5,
                start: Vec3::ZERO,
                end: Vec3::X * 50.0,
                radius: 0.1,
            },
            Packet::GameState {
                tick: 9,
                server_time: 0.3,
                targets: vec![TargetState::new(1, Vec3::ONE, 0.5)],
            },
            Packet::HitConfirm {
                sequence: 3,
                approximate: false,
                hits: vec![HitSummary {
                    target: Some(1),
                    point: Vec3::Y,
                    normal: Vec3::NEG_X,
                    distance: 4.0,
                    material: 2,
                }],
            },
            Packet::Disconnected {
                reason: "Test".to_string(),
            },
        ];

        for packet in test_packets {
            let serialized = serialize(&packet).unwrap();
            let deserialized: Packet = deserialize(&serialized).unwrap();
            assert_eq!(format!("{:?}", packet), format!("{:?}", deserialized));
        }
    }

    async fn recv(socket: &UdpSocket) -> Packet {
        let mut buf = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("server answered in time")
            .unwrap();
        deserialize(&buf[..len]).unwrap()
    }

    /// A client fires at the target it was shown and gets the hit confirmed
    #[tokio::test]
    async fn fire_at_broadcast_pose_is_confirmed() {
        let compensator = Arc::new(
            LagCompensator::new(LagCompConfig::default(), Arc::new(arena_world())).unwrap(),
        );
        let targets = TargetField::new(1, &compensator, 5).unwrap();
        let mut server = Server::new(
            "127.0.0.1:0",
            Duration::from_millis(10),
            4,
            Arc::clone(&compensator),
            targets,
        )
        .await
        .unwrap();
        let server_addr = server.local_addr().unwrap();
        let control = server.control();
        let running = tokio::spawn(async move { server.run().await.is_ok() });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let connect = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        client
            .send_to(&serialize(&connect).unwrap(), server_addr)
            .await
            .unwrap();
        assert!(matches!(recv(&client).await, Packet::Connected { .. }));

        let (server_time, target) = loop {
            if let Packet::GameState {
                server_time,
                targets,
                ..
            } = recv(&client).await
            {
                break (server_time, targets[0].clone());
            }
        };

        let eye = Vec3::new(0.0, 1.6, 0.0);
        let aim = (target.center() - eye).normalize();
        let fire = Packet::Fire {
            sequence: 1,
            view_time: server_time,
            start: eye,
            end: eye + aim * 150.0,
            radius: 0.0,
        };
        client
            .send_to(&serialize(&fire).unwrap(), server_addr)
            .await
            .unwrap();

        let hits = loop {
            if let Packet::HitConfirm { sequence, hits, .. } = recv(&client).await {
                assert_eq!(sequence, 1);
                break hits;
            }
        };
        assert_eq!(hits[0].target, Some(target.id));

        control.send(ServerMessage::Shutdown).unwrap();
        assert!(running.await.unwrap());
    }
}
