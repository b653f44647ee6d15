//! Integration tests for atoll-physics
//!
//! End-to-end scenarios exercised through the public API only: free fall,
//! resting contact, hinge limits, island partitioning, client snapshot
//! reconciliation and elastic collision cascades, plus the per-step
//! invariants every simulation must uphold.

use atoll_physics::prelude::*;
use atoll_physics::{
    client_receive_packet, ClientContext, ClientNetworkSettings, ComponentPool, RegistrySnapshot,
};

// ============================================================================
// Helpers
// ============================================================================

fn world_with(settings: Settings) -> PhysicsWorld {
    PhysicsWorld::new(settings)
}

fn sphere(position: Vector3, radius: Scalar) -> RigidBodyDef {
    RigidBodyDef {
        position,
        mass: 1.0,
        shape: Some(Shape::Sphere { radius }),
        ..Default::default()
    }
}

fn unit_box(position: Vector3) -> RigidBodyDef {
    RigidBodyDef {
        position,
        mass: 1.0,
        shape: Some(Shape::Box {
            half_extents: Vector3::splat(0.5),
        }),
        ..Default::default()
    }
}

fn ground_plane() -> RigidBodyDef {
    RigidBodyDef {
        kind: RigidBodyKind::Static,
        shape: Some(Shape::Plane {
            normal: Vector3::UNIT_Y,
            constant: 0.0,
        }),
        ..Default::default()
    }
}

fn run(world: &mut PhysicsWorld, steps: usize) {
    for _ in 0..steps {
        world.step();
    }
}

// ============================================================================
// Scenario 1 — Free fall
// ============================================================================

/// A lone dynamic sphere under gravity follows the ballistic arc: after one
/// second its velocity is exactly -g and its height is near 10 - g/2.
#[test]
fn test_free_fall() {
    let mut world = world_with(Settings::default());
    let body = world
        .make_rigidbody(&sphere(Vector3::new(0.0, 10.0, 0.0), 0.5))
        .unwrap();

    run(&mut world, 60);

    let vel = world.registry().linvel.get(body).unwrap();
    assert!((vel.y + 9.81).abs() < 1e-9, "v.y = {}", vel.y);

    let pos = world.registry().position.get(body).unwrap();
    let expected = 10.0 - 0.5 * 9.81;
    assert!(
        (pos.y - expected).abs() < 0.1,
        "y = {}, expected about {}",
        pos.y,
        expected
    );
}

// ============================================================================
// Scenario 2 — Rest on ground
// ============================================================================

/// A sphere dropped onto a static plane settles at its radius with nearly
/// zero velocity, held by a single persistent contact point.
#[test]
fn test_rest_on_ground() {
    let mut world = world_with(Settings::default());
    let body = world
        .make_rigidbody(&sphere(Vector3::new(0.0, 10.0, 0.0), 0.5))
        .unwrap();
    world.make_rigidbody(&ground_plane()).unwrap();

    // Two seconds of settling.
    run(&mut world, 120);

    let pos = world.registry().position.get(body).unwrap();
    assert!(
        (pos.y - 0.5).abs() < 6e-3,
        "rest height should be the radius, got {}",
        pos.y
    );
    let vel = world.registry().linvel.get(body).unwrap();
    assert!(vel.length() < 0.05, "residual speed {}", vel.length());

    assert_eq!(world.registry().manifold.len(), 1);
    let manifold_entity = world.registry().manifold.entities()[0];
    let manifold = world.registry().manifold.get(manifold_entity).unwrap();
    assert_eq!(manifold.num_points(), 1);
}

// ============================================================================
// Scenario 3 — Hinge limit
// ============================================================================

/// Two dynamic boxes joined by a limited hinge. Driving one hard into the
/// limits for five simulated seconds never lets the tracked angle escape
/// the configured range by more than a hair.
#[test]
fn test_hinge_limit_holds() {
    let mut world = world_with(Settings::default());
    let a = world.make_rigidbody(&unit_box(Vector3::ZERO)).unwrap();
    let b = world
        .make_rigidbody(&unit_box(Vector3::new(1.2, 0.0, 0.0)))
        .unwrap();

    let limit = core::f64::consts::FRAC_PI_4;
    let mut hinge = HingeConstraint {
        pivot: [Vector3::new(0.6, 0.0, 0.0), Vector3::new(-0.6, 0.0, 0.0)],
        angle_min: -limit,
        angle_max: limit,
        ..Default::default()
    };
    hinge.set_axes(Vector3::UNIT_Z, Vector3::UNIT_Z);
    let con = world.add_constraint(a, b, ConstraintKind::Hinge(hinge));

    // Spin the second box around the hinge axis so it slams both limits.
    world
        .registry_mut()
        .angvel
        .insert(b, Vector3::new(0.0, 0.0, 6.0));

    let slack = 1e-2;
    for _ in 0..300 {
        world.step();
        let angle = match &world.registry().constraint.get(con).unwrap().kind {
            ConstraintKind::Hinge(h) => h.angle,
            _ => unreachable!(),
        };
        assert!(
            angle < limit + slack && angle > -limit - slack,
            "hinge angle {angle} escaped [{}, {}]",
            -limit,
            limit
        );
    }
}

// ============================================================================
// Scenario 4 — Islanding
// ============================================================================

/// Three spatially disjoint stacks of five boxes form exactly three
/// islands; joining two stacks with a user constraint leaves two.
#[test]
fn test_islanding_stacks() {
    let mut world = world_with(Settings {
        gravity: Vector3::ZERO,
        ..Default::default()
    });

    let mut tops = Vec::new();
    for stack in 0..3 {
        let x = stack as Scalar * 10.0;
        let mut top = Entity::null();
        for level in 0..5 {
            let def = RigidBodyDef {
                gravity: Some(Vector3::ZERO),
                ..unit_box(Vector3::new(x, 0.5 + level as Scalar, 0.0))
            };
            top = world.make_rigidbody(&def).unwrap();
        }
        tops.push(top);
    }

    // Broadphase links each stack through its contacts.
    world.step();
    assert_eq!(world.registry().island.len(), 3, "one island per stack");

    // A user constraint bridges two stacks.
    world.add_constraint(
        tops[0],
        tops[1],
        ConstraintKind::Distance(DistanceConstraint {
            pivot: [Vector3::ZERO; 2],
            distance: 10.0,
        }),
    );
    world.step();
    assert_eq!(world.registry().island.len(), 2, "bridged stacks merge");
}

/// Members reachable through connecting edges always share an island;
/// disjoint bodies never do.
#[test]
fn test_island_partition_consistency() {
    let mut world = world_with(Settings {
        gravity: Vector3::ZERO,
        ..Default::default()
    });
    let a = world
        .make_rigidbody(&RigidBodyDef {
            gravity: Some(Vector3::ZERO),
            ..sphere(Vector3::ZERO, 0.5)
        })
        .unwrap();
    let b = world
        .make_rigidbody(&RigidBodyDef {
            gravity: Some(Vector3::ZERO),
            ..sphere(Vector3::new(0.9, 0.0, 0.0), 0.5)
        })
        .unwrap();
    let c = world
        .make_rigidbody(&RigidBodyDef {
            gravity: Some(Vector3::ZERO),
            ..sphere(Vector3::new(50.0, 0.0, 0.0), 0.5)
        })
        .unwrap();

    world.step();

    let registry = world.registry();
    let island_a = registry.island_resident.get(a).unwrap().island;
    let island_b = registry.island_resident.get(b).unwrap().island;
    let island_c = registry.island_resident.get(c).unwrap().island;
    assert_eq!(island_a, island_b, "touching spheres share an island");
    assert_ne!(island_a, island_c, "distant sphere is its own island");
}

// ============================================================================
// Scenario 5 — Client snap
// ============================================================================

/// With extrapolation disabled, an authoritative snapshot is applied
/// exactly and the pose delta lands in the discontinuity record.
#[test]
fn test_client_snap_applies_exactly() {
    let settings = Settings {
        network: NetworkSettings::Client(ClientNetworkSettings {
            extrapolation_enabled: false,
            round_trip_time: 0.1,
            ..Default::default()
        }),
        ..Default::default()
    };
    let mut world = PhysicsWorld::new(settings);
    let mut ctx = ClientContext::new(&world);

    let body = world
        .make_rigidbody(&RigidBodyDef {
            position: Vector3::new(4.0, 2.0, 0.0),
            presentation: true,
            networked: true,
            gravity: Some(Vector3::ZERO),
            ..sphere(Vector3::new(4.0, 2.0, 0.0), 0.5)
        })
        .unwrap();

    // The server knows this body under its own handle.
    let mut server_registry = Registry::new();
    let remote = server_registry.create();
    ctx.entity_map.insert(remote, body);

    let local_time = 5.0;
    let playout = 0.1;
    let server_pos = Vector3::new(1.0, 1.0, 0.0);
    let snapshot = RegistrySnapshot {
        timestamp: local_time - 0.5 * 0.1 - playout,
        entities: vec![remote],
        pools: vec![
            ComponentPool::Position(vec![(remote, server_pos)]),
            ComponentPool::Orientation(vec![(remote, Quaternion::IDENTITY)]),
            ComponentPool::LinVel(vec![(remote, Vector3::ZERO)]),
            ComponentPool::AngVel(vec![(remote, Vector3::ZERO)]),
        ],
    };

    client_receive_packet(
        &mut world,
        &mut ctx,
        local_time,
        Packet::RegistrySnapshot { snapshot },
    );

    let pos = *world.registry().position.get(body).unwrap();
    assert_eq!(pos, server_pos, "snap must apply snapshot values exactly");

    let discontinuity = world.registry().discontinuity.get(body).unwrap();
    let expected_offset = Vector3::new(4.0 - 1.0, 2.0 - 1.0, 0.0);
    assert!(
        (discontinuity.position_offset - expected_offset).length() < 1e-9,
        "discontinuity equals old minus new"
    );
}

// ============================================================================
// Scenario 6 — Restitution cascade
// ============================================================================

/// Newton's cradle, vertical: five touching elastic spheres, the topmost
/// struck downward at 10 m/s. The impulse travels through the stack and
/// the bottommost sphere leaves with nearly the full input speed.
#[test]
fn test_restitution_cascade() {
    let mut world = world_with(Settings {
        gravity: Vector3::ZERO,
        ..Default::default()
    });

    let elastic = Material {
        restitution: 1.0,
        friction: 0.0,
        ..Default::default()
    };
    let mut bodies = Vec::new();
    for level in 0..5 {
        let def = RigidBodyDef {
            material: elastic,
            gravity: Some(Vector3::ZERO),
            ..sphere(Vector3::new(0.0, 1.0 + level as Scalar, 0.0), 0.5)
        };
        bodies.push(world.make_rigidbody(&def).unwrap());
    }
    // Let broadphase build the manifolds first, then strike the top.
    world.step();
    world
        .registry_mut()
        .linvel
        .insert(bodies[4], Vector3::new(0.0, -10.0, 0.0));
    world.wake(bodies[4]);

    run(&mut world, 60);

    let bottom = world.registry().linvel.get(bodies[0]).unwrap();
    assert!(
        (bottom.y + 10.0).abs() <= 0.5,
        "bottom sphere should carry the impulse, v.y = {}",
        bottom.y
    );
}

/// Equal-mass elastic spheres colliding head-on swap velocities: the
/// relative speed reverses within one step.
#[test]
fn test_elastic_pair_reverses_relative_speed() {
    let mut world = world_with(Settings {
        gravity: Vector3::ZERO,
        ..Default::default()
    });
    let elastic = Material {
        restitution: 1.0,
        friction: 0.0,
        ..Default::default()
    };
    let a = world
        .make_rigidbody(&RigidBodyDef {
            material: elastic,
            linvel: Vector3::new(2.0, 0.0, 0.0),
            gravity: Some(Vector3::ZERO),
            ..sphere(Vector3::new(-0.505, 0.0, 0.0), 0.5)
        })
        .unwrap();
    let b = world
        .make_rigidbody(&RigidBodyDef {
            material: elastic,
            linvel: Vector3::new(-2.0, 0.0, 0.0),
            gravity: Some(Vector3::ZERO),
            ..sphere(Vector3::new(0.505, 0.0, 0.0), 0.5)
        })
        .unwrap();

    run(&mut world, 3);

    let va = world.registry().linvel.get(a).unwrap();
    let vb = world.registry().linvel.get(b).unwrap();
    let relative = vb.x - va.x;
    // Approach speed was -4 along the a->b axis; it reverses to +4.
    assert!(
        (relative - 4.0).abs() < 0.2,
        "relative speed should reverse, got {relative}"
    );
}

// ============================================================================
// Per-step invariants
// ============================================================================

/// Orientations stay unit length and mass inverses stay exact through a
/// busy pile of bodies.
#[test]
fn test_invariants_under_chaos() {
    let mut world = world_with(Settings::default());
    world.make_rigidbody(&ground_plane()).unwrap();
    let mut bodies = Vec::new();
    for i in 0..12 {
        let x = (i % 4) as Scalar * 0.8 - 1.2;
        let z = (i / 4) as Scalar * 0.8 - 0.8;
        let def = RigidBodyDef {
            angvel: Vector3::new(1.0, 2.0, -1.5),
            ..unit_box(Vector3::new(x, 1.0 + (i / 4) as Scalar * 1.2, z))
        };
        bodies.push(world.make_rigidbody(&def).unwrap());
    }

    for _ in 0..120 {
        world.step();
        let registry = world.registry();
        for &body in &bodies {
            let orn = registry.orientation.get(body).unwrap();
            assert!(
                (orn.length() - 1.0).abs() < 1e-5,
                "orientation norm drifted: {}",
                orn.length()
            );
            let mass = registry.mass.get(body).unwrap();
            let mass_inv = registry.mass_inv.get(body).unwrap();
            assert!((mass * mass_inv - 1.0).abs() < 1e-12);
        }

        // Manifold invariants: point cap, unit normals, bounded distance.
        for (_, manifold) in registry.manifold.iter() {
            assert!(manifold.num_points() <= MAX_CONTACTS);
            for point_entity in manifold.points() {
                let cp = registry.contact_point.get(point_entity).unwrap();
                assert!((cp.normal.length() - 1.0).abs() < 1e-5);
                assert!(
                    cp.distance
                        <= atoll_physics::CONTACT_BREAKING_THRESHOLD + 0.05,
                    "stale contact point at distance {}",
                    cp.distance
                );
            }
        }
    }
}

/// Splitting a two-body island by removing its only edge yields two
/// islands by the end of the next step.
#[test]
fn test_split_after_edge_removal() {
    let mut world = world_with(Settings {
        gravity: Vector3::ZERO,
        ..Default::default()
    });
    let a = world
        .make_rigidbody(&RigidBodyDef {
            gravity: Some(Vector3::ZERO),
            ..sphere(Vector3::ZERO, 0.5)
        })
        .unwrap();
    let b = world
        .make_rigidbody(&RigidBodyDef {
            gravity: Some(Vector3::ZERO),
            ..sphere(Vector3::new(5.0, 0.0, 0.0), 0.5)
        })
        .unwrap();

    let con = world.add_constraint(
        a,
        b,
        ConstraintKind::Distance(DistanceConstraint {
            pivot: [Vector3::ZERO; 2],
            distance: 5.0,
        }),
    );
    world.step();
    assert_eq!(world.registry().island.len(), 1);

    world.remove_constraint(con);
    world.step();
    assert_eq!(world.registry().island.len(), 2);
}
