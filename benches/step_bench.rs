//! Step benchmarks: a settling box pile and a constraint chain, stepped
//! through the full pipeline.

use atoll_physics::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion};

fn build_pile(bodies_per_side: usize) -> PhysicsWorld {
    let mut world = PhysicsWorld::new(Settings::default());
    world
        .make_rigidbody(&RigidBodyDef {
            kind: RigidBodyKind::Static,
            shape: Some(Shape::Plane {
                normal: Vector3::UNIT_Y,
                constant: 0.0,
            }),
            ..Default::default()
        })
        .unwrap();

    for i in 0..bodies_per_side {
        for j in 0..bodies_per_side {
            world
                .make_rigidbody(&RigidBodyDef {
                    position: Vector3::new(i as f64 * 1.1, 0.6 + j as f64 * 1.1, 0.0),
                    shape: Some(Shape::Box {
                        half_extents: Vector3::splat(0.5),
                    }),
                    ..Default::default()
                })
                .unwrap();
        }
    }
    world
}

fn build_chain(links: usize) -> PhysicsWorld {
    let mut world = PhysicsWorld::new(Settings::default());
    let mut prev = world
        .make_rigidbody(&RigidBodyDef {
            kind: RigidBodyKind::Static,
            position: Vector3::new(0.0, 10.0, 0.0),
            shape: Some(Shape::Sphere { radius: 0.1 }),
            ..Default::default()
        })
        .unwrap();

    for i in 1..=links {
        let body = world
            .make_rigidbody(&RigidBodyDef {
                position: Vector3::new(i as f64 * 0.5, 10.0, 0.0),
                shape: Some(Shape::Sphere { radius: 0.2 }),
                ..Default::default()
            })
            .unwrap();
        world.add_constraint(
            prev,
            body,
            ConstraintKind::Point(PointConstraint {
                pivot: [Vector3::new(0.25, 0.0, 0.0), Vector3::new(-0.25, 0.0, 0.0)],
            }),
        );
        prev = body;
    }
    world
}

fn bench_box_pile(c: &mut Criterion) {
    c.bench_function("step_box_pile_5x5", |b| {
        let mut world = build_pile(5);
        // Settle into persistent contacts before measuring.
        for _ in 0..30 {
            world.step();
        }
        b.iter(|| world.step());
    });
}

fn bench_constraint_chain(c: &mut Criterion) {
    c.bench_function("step_chain_32", |b| {
        let mut world = build_chain(32);
        for _ in 0..10 {
            world.step();
        }
        b.iter(|| world.step());
    });
}

criterion_group!(benches, bench_box_pile, bench_constraint_chain);
criterion_main!(benches);
