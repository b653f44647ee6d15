//! Constraint Solver Pipeline
//!
//! Per-island fixed-timestep solve: row preparation for every constraint
//! kind and for contact manifolds, warm starting, a restitution pre-pass,
//! projected Gauss-Seidel velocity iterations, and a non-linear
//! Gauss-Seidel position pass that corrects transforms directly.
//!
//! Rows within one constraint are prepared and solved in their original
//! order (the hinge limit row follows its point rows), and accumulated
//! impulses are stored back into their source constraint or contact point
//! after the velocity solve for next step's warm start.

use crate::constraint::{Constraint, ConstraintKind, MAX_CONSTRAINT_ROWS};
use crate::manifold::ContactPoint;
use crate::math::{
    integrate, plane_space, skew, to_world_space, Matrix3, Scalar, Vector3, EPSILON,
};
use crate::registry::{Entity, Registry};
use crate::row::{
    constraint_velocity, prepare_row, solve_row, warm_start_row, ConstraintRow, RowOptions,
    RowSource, SolverBodies,
};

/// Stand-in for an unbounded limit or error.
const LARGE: Scalar = 1e9;

/// Penetration tolerated before the velocity bias engages.
const CONTACT_SLOP: Scalar = 0.005;

/// Approach speed below which restitution is not applied.
const RESTITUTION_THRESHOLD: Scalar = 0.005;

/// Cap on the velocity bias used to push penetrating contacts apart; depth
/// beyond what this recovers per step is left to the position solver.
const MAX_PENETRATION_CORRECTION_VELOCITY: Scalar = 0.2;

/// Fraction of positional error corrected per position-solver pass.
const POSITION_CORRECTION_RATE: Scalar = 0.2;

/// Position error below which the position solver reports convergence.
const POSITION_SOLVER_TOLERANCE: Scalar = 1e-4;

fn push_row(
    rows: &mut Vec<ConstraintRow>,
    bodies: &SolverBodies,
    j: [Vector3; 4],
    lower: Scalar,
    upper: Scalar,
    impulse: Scalar,
    body: [usize; 2],
    source: RowSource,
    options: RowOptions,
) -> usize {
    let mut row = ConstraintRow {
        j,
        lower_limit: lower,
        upper_limit: upper,
        impulse,
        eff_mass: 0.0,
        rhs: 0.0,
        relvel: 0.0,
        restitution: 0.0,
        body,
        source,
        limit_coupling: None,
    };
    prepare_row(&mut row, &options, bodies);
    rows.push(row);
    rows.len() - 1
}

/// Options for a spring row: the impulse is bounded by the spring force
/// over dt and the target saturates the row at that bound, which is what
/// makes it behave as a true spring.
fn spring_row_parts(bound_impulse: Scalar) -> (Scalar, Scalar, RowOptions) {
    let lower = bound_impulse.min(0.0);
    let upper = bound_impulse.max(0.0);
    let options = RowOptions {
        error: if bound_impulse > 0.0 { -LARGE } else { LARGE },
        ..Default::default()
    };
    (lower, upper, options)
}

/// Prepare solver rows for the given constraints and manifolds.
///
/// Loads any referenced bodies into `bodies`, writes updated per-constraint
/// state (hinge angles) back to the registry, and returns the rows in
/// solve order.
pub fn prepare_rows(
    registry: &mut Registry,
    bodies: &mut SolverBodies,
    constraints: &[Entity],
    manifolds: &[Entity],
    dt: Scalar,
) -> Vec<ConstraintRow> {
    let mut rows = Vec::new();

    for &entity in constraints {
        let Some(mut con) = registry.constraint.get(entity).copied() else {
            continue;
        };
        if registry.is_sleeping(con.body[0]) && registry.is_sleeping(con.body[1]) {
            continue;
        }
        let (Some(a), Some(b)) = (
            bodies.add(registry, con.body[0]),
            bodies.add(registry, con.body[1]),
        ) else {
            continue;
        };
        prepare_constraint(&mut con, entity, &mut rows, bodies, [a, b], dt);
        registry.constraint.insert_silent(entity, con);
    }

    for &manifold_entity in manifolds {
        let Some(manifold) = registry.manifold.get(manifold_entity).copied() else {
            continue;
        };
        for point_entity in manifold.points() {
            let Some(cp) = registry.contact_point.get(point_entity).copied() else {
                continue;
            };
            let (Some(a), Some(b)) = (
                bodies.add(registry, cp.body[0]),
                bodies.add(registry, cp.body[1]),
            ) else {
                continue;
            };
            prepare_contact_rows(&cp, point_entity, &mut rows, bodies, [a, b], dt);
        }
    }

    rows
}

fn prepare_constraint(
    con: &mut Constraint,
    entity: Entity,
    rows: &mut Vec<ConstraintRow>,
    bodies: &SolverBodies,
    slots: [usize; 2],
    dt: Scalar,
) {
    let [a, b] = slots;
    let pos_a = bodies.position[a];
    let pos_b = bodies.position[b];
    let orn_a = bodies.orientation[a];
    let orn_b = bodies.orientation[b];
    let mut row_idx = 0usize;
    let impulses = con.impulse;
    let impulse = move |idx: &mut usize| {
        let v = impulses[(*idx).min(MAX_CONSTRAINT_ROWS - 1)];
        *idx += 1;
        v
    };
    let source = |idx: usize| RowSource::Constraint {
        entity,
        row_index: idx,
    };

    match &mut con.kind {
        ConstraintKind::Point(point) => {
            let pivot_a = to_world_space(point.pivot[0], pos_a, orn_a);
            let pivot_b = to_world_space(point.pivot[1], pos_b, orn_b);
            let r_a = pivot_a - pos_a;
            let r_b = pivot_b - pos_b;
            let r_a_skew = skew(r_a);
            let r_b_skew = skew(r_b);
            let error = pivot_a - pivot_b;

            for i in 0..3 {
                let idx = row_idx;
                push_row(
                    rows,
                    bodies,
                    [
                        Matrix3::IDENTITY.row[i],
                        -r_a_skew.row[i],
                        -Matrix3::IDENTITY.row[i],
                        r_b_skew.row[i],
                    ],
                    -LARGE,
                    LARGE,
                    impulse(&mut row_idx),
                    slots,
                    source(idx),
                    RowOptions {
                        error: error.get(i) / dt,
                        ..Default::default()
                    },
                );
            }
        }

        ConstraintKind::Distance(distance) => {
            let pivot_a = to_world_space(distance.pivot[0], pos_a, orn_a);
            let pivot_b = to_world_space(distance.pivot[1], pos_b, orn_b);
            let r_a = pivot_a - pos_a;
            let r_b = pivot_b - pos_b;
            let d = pivot_a - pivot_b;
            let dist = d.length();
            let dn = if dist > EPSILON { d / dist } else { Vector3::UNIT_X };

            let idx = row_idx;
            push_row(
                rows,
                bodies,
                [dn, r_a.cross(dn), -dn, -(r_b.cross(dn))],
                -LARGE,
                LARGE,
                impulse(&mut row_idx),
                slots,
                source(idx),
                RowOptions {
                    error: (dist - distance.distance) / dt,
                    ..Default::default()
                },
            );
        }

        ConstraintKind::SoftDistance(soft) => {
            let pivot_a = to_world_space(soft.pivot[0], pos_a, orn_a);
            let pivot_b = to_world_space(soft.pivot[1], pos_b, orn_b);
            let r_a = pivot_a - pos_a;
            let r_b = pivot_b - pos_b;
            let d = pivot_a - pivot_b;
            let dist = d.length();
            let dn = if dist > EPSILON { d / dist } else { Vector3::UNIT_X };
            let j = [dn, r_a.cross(dn), -dn, -(r_b.cross(dn))];

            // Spring row: impulse bounded by the spring force over dt, error
            // pushed to the saturating side so the bound drives behavior.
            let spring_impulse = soft.stiffness * (soft.distance - dist) * dt;
            let (lower, upper, options) = spring_row_parts(spring_impulse);
            let idx = row_idx;
            push_row(
                rows,
                bodies,
                j,
                lower,
                upper,
                impulse(&mut row_idx),
                slots,
                source(idx),
                options,
            );

            // Damping row: speed-proportional friction along the same
            // Jacobian.
            let relspd = j[0].dot(bodies.linvel[a])
                + j[1].dot(bodies.angvel[a])
                + j[2].dot(bodies.linvel[b])
                + j[3].dot(bodies.angvel[b]);
            let damping_impulse = (soft.damping * relspd * dt).abs();
            let idx = row_idx;
            push_row(
                rows,
                bodies,
                j,
                -damping_impulse,
                damping_impulse,
                impulse(&mut row_idx),
                slots,
                source(idx),
                RowOptions::default(),
            );
        }

        ConstraintKind::Hinge(hinge) => {
            let pivot_a = to_world_space(hinge.pivot[0], pos_a, orn_a);
            let pivot_b = to_world_space(hinge.pivot[1], pos_b, orn_b);
            let r_a = pivot_a - pos_a;
            let r_b = pivot_b - pos_b;
            let r_a_skew = skew(r_a);
            let r_b_skew = skew(r_b);
            let error = pivot_a - pivot_b;

            // Pivot rows, same as a point constraint.
            for i in 0..3 {
                let idx = row_idx;
                push_row(
                    rows,
                    bodies,
                    [
                        Matrix3::IDENTITY.row[i],
                        -r_a_skew.row[i],
                        -Matrix3::IDENTITY.row[i],
                        r_b_skew.row[i],
                    ],
                    -LARGE,
                    LARGE,
                    impulse(&mut row_idx),
                    slots,
                    source(idx),
                    RowOptions {
                        error: error.get(i) / dt,
                        ..Default::default()
                    },
                );
            }

            // Kill relative angular velocity orthogonal to the hinge axis.
            let p = orn_a.rotate(hinge.frame[0].column(1));
            let q = orn_a.rotate(hinge.frame[0].column(2));
            for axis in [p, q] {
                let idx = row_idx;
                push_row(
                    rows,
                    bodies,
                    [Vector3::ZERO, axis, Vector3::ZERO, -axis],
                    -LARGE,
                    LARGE,
                    impulse(&mut row_idx),
                    slots,
                    source(idx),
                    RowOptions::default(),
                );
            }

            let has_limit = hinge.has_limit();
            let has_spring = hinge.stiffness > 0.0;
            let has_friction = hinge.friction_torque > 0.0 || hinge.damping > 0.0;
            let hinge_axis = orn_a.rotate(hinge.frame[0].column(0));

            if has_limit || has_spring {
                let measured = hinge.measure_angle(orn_a, orn_b);
                hinge.update_angle(measured);
            }

            if has_limit {
                let halfway = (hinge.angle_min + hinge.angle_max) * 0.5;
                let j = [Vector3::ZERO, hinge_axis, Vector3::ZERO, -hinge_axis];
                // The nearer limit decides which side the row may push on.
                let near_min = hinge.angle < halfway;
                let (lower, upper) = if near_min { (0.0, LARGE) } else { (-LARGE, 0.0) };
                let idx = row_idx;
                let row = push_row(
                    rows,
                    bodies,
                    j,
                    lower,
                    upper,
                    impulse(&mut row_idx),
                    slots,
                    source(idx),
                    RowOptions {
                        restitution: hinge.limit_restitution,
                        ..Default::default()
                    },
                );
                // Inside the range, allow exactly the speed that reaches the
                // limit this step; past it, bias gently back.
                let to_limit = if near_min {
                    (hinge.angle_min - hinge.angle) / dt
                } else {
                    (hinge.angle_max - hinge.angle) / dt
                };
                let violated = if near_min { to_limit > 0.0 } else { to_limit < 0.0 };
                rows[row].rhs = if violated { to_limit * 0.2 } else { to_limit };
                if hinge.limit_restitution > 0.0 {
                    let bounce = -hinge.limit_restitution * rows[row].relvel;
                    if near_min && rows[row].relvel < 0.0 {
                        rows[row].rhs = rows[row].rhs.max(bounce);
                    } else if !near_min && rows[row].relvel > 0.0 {
                        rows[row].rhs = rows[row].rhs.min(bounce);
                    }
                }

                // Bump-stop spring inside the limit range.
                if hinge.bump_stop_stiffness > 0.0 && hinge.bump_stop_angle > 0.0 {
                    let bump_min = hinge.angle_min + hinge.bump_stop_angle;
                    let bump_max = hinge.angle_max - hinge.bump_stop_angle;
                    let deflection = if hinge.angle < bump_min {
                        hinge.angle - bump_min
                    } else if hinge.angle > bump_max {
                        hinge.angle - bump_max
                    } else {
                        0.0
                    };
                    if deflection != 0.0 {
                        let bound = -hinge.bump_stop_stiffness * deflection * dt;
                        let (lower, upper, options) = spring_row_parts(bound);
                        let idx = row_idx;
                        push_row(
                            rows,
                            bodies,
                            j,
                            lower,
                            upper,
                            impulse(&mut row_idx),
                            slots,
                            source(idx),
                            options,
                        );
                    }
                }
            }

            if has_spring {
                let deflection = hinge.angle - hinge.rest_angle;
                let bound = -hinge.stiffness * deflection * dt;
                let (lower, upper, options) = spring_row_parts(bound);
                let idx = row_idx;
                push_row(
                    rows,
                    bodies,
                    [Vector3::ZERO, hinge_axis, Vector3::ZERO, -hinge_axis],
                    lower,
                    upper,
                    impulse(&mut row_idx),
                    slots,
                    source(idx),
                    options,
                );
            }

            if has_friction {
                // Damping acts as speed-dependent friction, so one row
                // covers both.
                let mut friction_impulse = hinge.friction_torque * dt;
                if hinge.damping > 0.0 {
                    let relvel =
                        bodies.angvel[a].dot(hinge_axis) - bodies.angvel[b].dot(hinge_axis);
                    friction_impulse += relvel.abs() * hinge.damping * dt;
                }
                let idx = row_idx;
                push_row(
                    rows,
                    bodies,
                    [Vector3::ZERO, hinge_axis, Vector3::ZERO, -hinge_axis],
                    -friction_impulse,
                    friction_impulse,
                    impulse(&mut row_idx),
                    slots,
                    source(idx),
                    RowOptions::default(),
                );
            }
        }

        ConstraintKind::Generic(generic) => {
            let pivot_a = to_world_space(generic.pivot[0], pos_a, orn_a);
            let pivot_b = to_world_space(generic.pivot[1], pos_b, orn_b);
            let r_a = pivot_a - pos_a;
            let r_b = pivot_b - pos_b;
            let r_a_skew = skew(r_a);
            let r_b_skew = skew(r_b);
            let error = pivot_a - pivot_b;

            for i in 0..3 {
                let idx = row_idx;
                push_row(
                    rows,
                    bodies,
                    [
                        Matrix3::IDENTITY.row[i],
                        -r_a_skew.row[i],
                        -Matrix3::IDENTITY.row[i],
                        r_b_skew.row[i],
                    ],
                    -LARGE,
                    LARGE,
                    impulse(&mut row_idx),
                    slots,
                    source(idx),
                    RowOptions {
                        error: error.get(i) / dt,
                        ..Default::default()
                    },
                );
            }

            let mis = frame_misalignment(generic.frame, orn_a, orn_b);
            for i in 0..3 {
                let axis = Matrix3::IDENTITY.row[i];
                let idx = row_idx;
                push_row(
                    rows,
                    bodies,
                    [Vector3::ZERO, axis, Vector3::ZERO, -axis],
                    -LARGE,
                    LARGE,
                    impulse(&mut row_idx),
                    slots,
                    source(idx),
                    RowOptions {
                        error: -mis.get(i) / dt,
                        ..Default::default()
                    },
                );
            }
        }
    }
}

/// Small-angle misalignment vector between the two constraint frames,
/// positive about the axis that would rotate B into A.
fn frame_misalignment(
    frame: [Matrix3; 2],
    orn_a: crate::math::Quaternion,
    orn_b: crate::math::Quaternion,
) -> Vector3 {
    let mut mis = Vector3::ZERO;
    for i in 0..3 {
        let axis_a = orn_a.rotate(frame[0].column(i));
        let axis_b = orn_b.rotate(frame[1].column(i));
        mis += axis_b.cross(axis_a);
    }
    mis * 0.5
}

fn prepare_contact_rows(
    cp: &ContactPoint,
    point_entity: Entity,
    rows: &mut Vec<ConstraintRow>,
    bodies: &SolverBodies,
    slots: [usize; 2],
    dt: Scalar,
) {
    let [a, b] = slots;
    let pivot_a = to_world_space(cp.pivot_a, bodies.position[a], bodies.orientation[a]);
    let pivot_b = to_world_space(cp.pivot_b, bodies.position[b], bodies.orientation[b]);
    let r_a = pivot_a - bodies.position[a];
    let r_b = pivot_b - bodies.position[b];
    let n = cp.normal;

    let rigid = cp.stiffness >= crate::math::SCALAR_MAX;
    let normal_row = if rigid {
        let idx = push_row(
            rows,
            bodies,
            [n, r_a.cross(n), -n, -(r_b.cross(n))],
            0.0,
            LARGE,
            cp.normal_impulse,
            slots,
            RowSource::ContactNormal {
                point: point_entity,
            },
            RowOptions {
                restitution: cp.restitution,
                ..Default::default()
            },
        );
        // Speculative target: while separated, allow exactly the approach
        // speed that closes the gap this step; while penetrating, bias the
        // bodies apart, capped so the position solver handles deep overlap.
        rows[idx].rhs = if cp.distance >= 0.0 {
            -cp.distance / dt
        } else {
            ((-(cp.distance + CONTACT_SLOP)).max(0.0) * 0.2 / dt)
                .min(MAX_PENETRATION_CORRECTION_VELOCITY)
        };
        if cp.restitution > 0.0 && rows[idx].relvel < -RESTITUTION_THRESHOLD {
            rows[idx].rhs = rows[idx].rhs.max(-cp.restitution * rows[idx].relvel);
        }
        idx
    } else {
        // Soft contact: spring-bounded normal impulse.
        let penetration = (-cp.distance).max(0.0);
        let mut bound = cp.stiffness * penetration * dt;
        if cp.damping < crate::math::SCALAR_MAX {
            let j = [n, r_a.cross(n), -n, -(r_b.cross(n))];
            let relspd = j[0].dot(bodies.linvel[a])
                + j[1].dot(bodies.angvel[a])
                + j[2].dot(bodies.linvel[b])
                + j[3].dot(bodies.angvel[b]);
            bound += cp.damping * relspd.abs() * dt;
        }
        push_row(
            rows,
            bodies,
            [n, r_a.cross(n), -n, -(r_b.cross(n))],
            0.0,
            bound,
            cp.normal_impulse,
            slots,
            RowSource::ContactNormal {
                point: point_entity,
            },
            RowOptions {
                error: -LARGE,
                restitution: cp.restitution,
                ..Default::default()
            },
        )
    };

    // Friction pyramid: two tangential rows bounded by the normal impulse.
    let (t0, t1) = plane_space(n);
    for (axis, t) in [t0, t1].into_iter().enumerate() {
        let idx = push_row(
            rows,
            bodies,
            [t, r_a.cross(t), -t, -(r_b.cross(t))],
            0.0,
            0.0,
            cp.friction_impulse[axis],
            slots,
            RowSource::ContactFriction {
                point: point_entity,
                axis,
            },
            RowOptions::default(),
        );
        rows[idx].limit_coupling = Some((normal_row, cp.friction));
    }

    if cp.roll_friction > 0.0 {
        for (axis, t) in [t0, t1].into_iter().enumerate() {
            let idx = push_row(
                rows,
                bodies,
                [Vector3::ZERO, t, Vector3::ZERO, -t],
                0.0,
                0.0,
                cp.roll_impulse[axis],
                slots,
                RowSource::ContactRoll {
                    point: point_entity,
                    axis,
                },
                RowOptions::default(),
            );
            rows[idx].limit_coupling = Some((normal_row, cp.roll_friction));
        }
    }

    if cp.spin_friction > 0.0 {
        let idx = push_row(
            rows,
            bodies,
            [Vector3::ZERO, n, Vector3::ZERO, -n],
            0.0,
            0.0,
            cp.spin_impulse,
            slots,
            RowSource::ContactSpin {
                point: point_entity,
            },
            RowOptions::default(),
        );
        rows[idx].limit_coupling = Some((normal_row, cp.spin_friction));
    }
}

/// Apply each row's carried impulse from the previous step.
pub fn warm_start(rows: &[ConstraintRow], bodies: &mut SolverBodies) {
    for row in rows {
        warm_start_row(row, bodies);
    }
}

/// Restitution pre-pass, run before row preparation.
///
/// Builds transient normal and friction rows for every contact point with
/// restitution, visits them most-approaching first, and drives each toward
/// its bounce target for a few relaxations so impulses travel through
/// stacks. The resulting velocity changes stand on their own: the
/// transient impulses are not carried into the main solver rows, so the
/// main loop (which prepares against post-bounce velocities) cannot undo
/// the cascade.
pub fn solve_restitution(
    registry: &mut Registry,
    manifolds: &[Entity],
    num_iterations: u32,
    num_individual_iterations: u32,
) {
    let mut bodies = SolverBodies::default();
    let mut rows: Vec<ConstraintRow> = Vec::new();
    let mut normal_rows: Vec<usize> = Vec::new();

    for &manifold_entity in manifolds {
        let Some(manifold) = registry.manifold.get(manifold_entity).copied() else {
            continue;
        };
        for point_entity in manifold.points() {
            let Some(cp) = registry.contact_point.get(point_entity).copied() else {
                continue;
            };
            if cp.restitution <= 0.0 || cp.distance > CONTACT_SLOP {
                continue;
            }
            let (Some(a), Some(b)) = (
                bodies.add(registry, cp.body[0]),
                bodies.add(registry, cp.body[1]),
            ) else {
                continue;
            };
            let pivot_a = to_world_space(cp.pivot_a, bodies.position[a], bodies.orientation[a]);
            let pivot_b = to_world_space(cp.pivot_b, bodies.position[b], bodies.orientation[b]);
            let r_a = pivot_a - bodies.position[a];
            let r_b = pivot_b - bodies.position[b];
            let n = cp.normal;

            let normal_idx = push_row(
                &mut rows,
                &bodies,
                [n, r_a.cross(n), -n, -(r_b.cross(n))],
                0.0,
                LARGE,
                0.0,
                [a, b],
                RowSource::ContactNormal {
                    point: point_entity,
                },
                RowOptions {
                    restitution: cp.restitution,
                    ..Default::default()
                },
            );
            rows[normal_idx].rhs = 0.0;
            normal_rows.push(normal_idx);

            let (t0, t1) = plane_space(n);
            for (axis, t) in [t0, t1].into_iter().enumerate() {
                let idx = push_row(
                    &mut rows,
                    &bodies,
                    [t, r_a.cross(t), -t, -(r_b.cross(t))],
                    0.0,
                    0.0,
                    0.0,
                    [a, b],
                    RowSource::ContactFriction {
                        point: point_entity,
                        axis,
                    },
                    RowOptions::default(),
                );
                rows[idx].limit_coupling = Some((normal_idx, cp.friction));
            }
        }
    }
    if normal_rows.is_empty() {
        return;
    }

    // Deepest approach speed first, so bounces propagate outward.
    normal_rows.sort_by(|&i, &j| rows[i].relvel.total_cmp(&rows[j].relvel));

    for _ in 0..num_iterations {
        let mut any_approaching = false;
        for &i in &normal_rows {
            let relvel = constraint_velocity(&rows[i], &bodies);
            if relvel < -RESTITUTION_THRESHOLD {
                rows[i].rhs = rows[i].rhs.max(-rows[i].restitution * relvel);
                any_approaching = true;
            }
            for _ in 0..num_individual_iterations {
                solve_row(&mut rows[i], &mut bodies);
                // Friction rows of this contact follow immediately.
                for f in [i + 1, i + 2] {
                    if f < rows.len() {
                        if let Some((normal_idx, coeff)) = rows[f].limit_coupling {
                            if normal_idx == i {
                                let bound = (coeff * rows[i].impulse).abs();
                                rows[f].lower_limit = -bound;
                                rows[f].upper_limit = bound;
                                solve_row(&mut rows[f], &mut bodies);
                            }
                        }
                    }
                }
            }
        }
        if !any_approaching {
            break;
        }
    }

    bodies.store(registry);
}

/// Projected Gauss-Seidel velocity iterations over the row set.
///
/// Friction-like rows refresh their limits from their normal row's current
/// impulse before each update.
pub fn solve_velocity(rows: &mut [ConstraintRow], bodies: &mut SolverBodies, iterations: u32) {
    for _ in 0..iterations {
        for i in 0..rows.len() {
            if let Some((normal_idx, coeff)) = rows[i].limit_coupling {
                let bound = (coeff * rows[normal_idx].impulse).abs();
                rows[i].lower_limit = -bound;
                rows[i].upper_limit = bound;
            }
            solve_row(&mut rows[i], bodies);
        }
    }
}

/// Store accumulated impulses back into their sources for next step's warm
/// start.
pub fn store_impulses(registry: &mut Registry, rows: &[ConstraintRow]) {
    for row in rows {
        match row.source {
            RowSource::Constraint { entity, row_index } => {
                if let Some(con) = registry.constraint.get_mut(entity) {
                    if row_index < MAX_CONSTRAINT_ROWS {
                        con.impulse[row_index] = row.impulse;
                    }
                }
            }
            RowSource::ContactNormal { point } => {
                if let Some(cp) = registry.contact_point.get_mut(point) {
                    cp.normal_impulse = row.impulse;
                }
            }
            RowSource::ContactFriction { point, axis } => {
                if let Some(cp) = registry.contact_point.get_mut(point) {
                    cp.friction_impulse[axis] = row.impulse;
                }
            }
            RowSource::ContactRoll { point, axis } => {
                if let Some(cp) = registry.contact_point.get_mut(point) {
                    cp.roll_impulse[axis] = row.impulse;
                }
            }
            RowSource::ContactSpin { point } => {
                if let Some(cp) = registry.contact_point.get_mut(point) {
                    cp.spin_impulse = row.impulse;
                }
            }
        }
    }
}

// ============================================================================
// Position solver (non-linear Gauss-Seidel)
// ============================================================================

/// Apply one damped positional correction along a Jacobian.
///
/// `error` is the constraint-space positional error; the correction drives
/// it toward zero, integrating rotational deltas directly into the
/// orientations and refreshing world inertia afterward.
fn apply_position_correction(
    bodies: &mut SolverBodies,
    slots: [usize; 2],
    j: [Vector3; 4],
    error: Scalar,
) {
    let [a, b] = slots;
    let denom = bodies.inv_mass[a] * j[0].length_sqr()
        + j[1].dot(bodies.inv_inertia[a].mul_vec(j[1]))
        + bodies.inv_mass[b] * j[2].length_sqr()
        + j[3].dot(bodies.inv_inertia[b].mul_vec(j[3]));
    if denom < 1e-12 {
        return;
    }
    let correction = -error / denom * POSITION_CORRECTION_RATE;

    if bodies.inv_mass[a] > 0.0 {
        bodies.position[a] += j[0] * (bodies.inv_mass[a] * correction);
        let dw = bodies.inv_inertia[a].mul_vec(j[1] * correction);
        bodies.orientation[a] = integrate(bodies.orientation[a], dw, 1.0);
        bodies.refresh_inertia(a);
    }
    if bodies.inv_mass[b] > 0.0 {
        bodies.position[b] += j[2] * (bodies.inv_mass[b] * correction);
        let dw = bodies.inv_inertia[b].mul_vec(j[3] * correction);
        bodies.orientation[b] = integrate(bodies.orientation[b], dw, 1.0);
        bodies.refresh_inertia(b);
    }
}

fn solve_position_constraint(
    con: &Constraint,
    bodies: &mut SolverBodies,
    slots: [usize; 2],
) -> Scalar {
    let [a, b] = slots;
    let mut max_error: Scalar = 0.0;

    match &con.kind {
        ConstraintKind::Point(point) => {
            let pivot_a = to_world_space(point.pivot[0], bodies.position[a], bodies.orientation[a]);
            let pivot_b = to_world_space(point.pivot[1], bodies.position[b], bodies.orientation[b]);
            let d = pivot_a - pivot_b;
            let error = d.length();
            if error > EPSILON {
                let dir = d / error;
                let r_a = pivot_a - bodies.position[a];
                let r_b = pivot_b - bodies.position[b];
                apply_position_correction(
                    bodies,
                    slots,
                    [dir, r_a.cross(dir), -dir, -(r_b.cross(dir))],
                    error,
                );
                max_error = error;
            }
        }

        ConstraintKind::Distance(distance) => {
            let pivot_a =
                to_world_space(distance.pivot[0], bodies.position[a], bodies.orientation[a]);
            let pivot_b =
                to_world_space(distance.pivot[1], bodies.position[b], bodies.orientation[b]);
            let d = pivot_a - pivot_b;
            let dist = d.length();
            let dn = if dist > EPSILON { d / dist } else { Vector3::UNIT_X };
            let error = dist - distance.distance;
            if error.abs() > EPSILON {
                let r_a = pivot_a - bodies.position[a];
                let r_b = pivot_b - bodies.position[b];
                apply_position_correction(
                    bodies,
                    slots,
                    [dn, r_a.cross(dn), -dn, -(r_b.cross(dn))],
                    error,
                );
                max_error = error.abs();
            }
        }

        // Springs do not position-correct.
        ConstraintKind::SoftDistance(_) => {}

        ConstraintKind::Hinge(hinge) => {
            let orn_a = bodies.orientation[a];
            let orn_b = bodies.orientation[b];
            let axis_a = orn_a.rotate(hinge.frame[0].column(0));
            let axis_b = orn_b.rotate(hinge.frame[1].column(0));

            // Align the hinge axes first.
            let (p, q) = plane_space(axis_a);
            let u = axis_a.cross(axis_b);
            for dir in [p, q] {
                let error = -u.dot(dir);
                if error.abs() > EPSILON {
                    apply_position_correction(
                        bodies,
                        slots,
                        [Vector3::ZERO, dir, Vector3::ZERO, -dir],
                        error,
                    );
                    max_error = max_error.max(error.abs());
                }
            }

            // Then join the pivot points.
            let pivot_a = to_world_space(hinge.pivot[0], bodies.position[a], bodies.orientation[a]);
            let pivot_b = to_world_space(hinge.pivot[1], bodies.position[b], bodies.orientation[b]);
            let d = pivot_a - pivot_b;
            let error = d.length();
            if error > EPSILON {
                let dir = d / error;
                let r_a = pivot_a - bodies.position[a];
                let r_b = pivot_b - bodies.position[b];
                apply_position_correction(
                    bodies,
                    slots,
                    [dir, r_a.cross(dir), -dir, -(r_b.cross(dir))],
                    error,
                );
                max_error = max_error.max(error);
            }
        }

        ConstraintKind::Generic(generic) => {
            let mis = frame_misalignment(generic.frame, bodies.orientation[a], bodies.orientation[b]);
            for i in 0..3 {
                let axis = Matrix3::IDENTITY.row[i];
                let error = -mis.get(i);
                if error.abs() > EPSILON {
                    apply_position_correction(
                        bodies,
                        slots,
                        [Vector3::ZERO, axis, Vector3::ZERO, -axis],
                        error,
                    );
                    max_error = max_error.max(error.abs());
                }
            }

            let pivot_a =
                to_world_space(generic.pivot[0], bodies.position[a], bodies.orientation[a]);
            let pivot_b =
                to_world_space(generic.pivot[1], bodies.position[b], bodies.orientation[b]);
            let d = pivot_a - pivot_b;
            let error = d.length();
            if error > EPSILON {
                let dir = d / error;
                let r_a = pivot_a - bodies.position[a];
                let r_b = pivot_b - bodies.position[b];
                apply_position_correction(
                    bodies,
                    slots,
                    [dir, r_a.cross(dir), -dir, -(r_b.cross(dir))],
                    error,
                );
                max_error = max_error.max(error);
            }
        }
    }
    max_error
}

/// Non-linear Gauss-Seidel position pass over constraints and contacts.
///
/// Corrections are applied directly to positions and orientations, never
/// to velocities. Returns whether the pass converged below tolerance.
pub fn solve_position(
    registry: &mut Registry,
    constraints: &[Entity],
    manifolds: &[Entity],
    iterations: u32,
) -> bool {
    let mut bodies = SolverBodies::default();
    let mut constraint_slots = Vec::new();
    for &entity in constraints {
        let Some(con) = registry.constraint.get(entity).copied() else {
            continue;
        };
        let (Some(a), Some(b)) = (
            bodies.add(registry, con.body[0]),
            bodies.add(registry, con.body[1]),
        ) else {
            continue;
        };
        constraint_slots.push((con, [a, b]));
    }

    let mut contact_slots = Vec::new();
    for &manifold_entity in manifolds {
        let Some(manifold) = registry.manifold.get(manifold_entity).copied() else {
            continue;
        };
        for point_entity in manifold.points() {
            let Some(cp) = registry.contact_point.get(point_entity).copied() else {
                continue;
            };
            let (Some(a), Some(b)) = (
                bodies.add(registry, cp.body[0]),
                bodies.add(registry, cp.body[1]),
            ) else {
                continue;
            };
            contact_slots.push((cp, [a, b]));
        }
    }

    let mut converged = false;
    for _ in 0..iterations {
        let mut max_error: Scalar = 0.0;

        for (con, slots) in &constraint_slots {
            max_error = max_error.max(solve_position_constraint(con, &mut bodies, *slots));
        }

        for (cp, slots) in &contact_slots {
            let [a, b] = *slots;
            let orn_a = bodies.orientation[a];
            let orn_b = bodies.orientation[b];
            let normal = match cp.normal_attachment {
                crate::collide::ContactNormalAttachment::NormalOnA => orn_a.rotate(cp.local_normal),
                crate::collide::ContactNormalAttachment::NormalOnB => orn_b.rotate(cp.local_normal),
                crate::collide::ContactNormalAttachment::None => cp.normal,
            };
            let pivot_a = to_world_space(cp.pivot_a, bodies.position[a], orn_a);
            let pivot_b = to_world_space(cp.pivot_b, bodies.position[b], orn_b);
            let distance = normal.dot(pivot_a - pivot_b);
            if distance < 0.0 {
                let r_a = pivot_a - bodies.position[a];
                let r_b = pivot_b - bodies.position[b];
                apply_position_correction(
                    &mut bodies,
                    *slots,
                    [normal, r_a.cross(normal), -normal, -(r_b.cross(normal))],
                    distance,
                );
                max_error = max_error.max(-distance);
            }
        }

        if max_error < POSITION_SOLVER_TOLERANCE {
            converged = true;
            break;
        }
    }

    bodies.store(registry);
    converged
}
