//! Constraint Kinds
//!
//! Tagged constraint variants with their geometric parameters and the
//! persistent impulse accumulators the solver warm-starts from. Row
//! preparation for each kind lives in [`crate::solver`]; this module owns
//! the data and the pieces of state that persist across steps, such as the
//! hinge's accumulated angle.
//!
//! A constraint lives on its own entity and is an edge in the entity
//! graph, connecting its two bodies into one island. Contact constraints
//! are not represented here: their rows are prepared straight from the
//! manifold's contact points, which carry their own impulse accumulators.

use crate::components::GraphEdge;
use crate::graph::EntityGraph;
use crate::math::{
    normalize_angle, plane_space, to_sign, Matrix3, Quaternion, Scalar, Vector3, PI2,
};
use crate::registry::{Entity, Registry};
use serde::{Deserialize, Serialize};

/// Maximum solver rows a single constraint can produce.
pub const MAX_CONSTRAINT_ROWS: usize = 10;

/// Ball-socket constraint joining two pivot points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointConstraint {
    /// Pivot on each body, object space.
    pub pivot: [Vector3; 2],
}

/// Rigid distance constraint between two pivots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DistanceConstraint {
    /// Pivot on each body, object space.
    pub pivot: [Vector3; 2],
    /// Rest distance between the pivots.
    pub distance: Scalar,
}

/// Spring-damper distance constraint.
///
/// Produces two rows sharing one Jacobian: a spring row whose impulse is
/// bounded by `stiffness * (rest - dist) * dt`, and a damping row bounded
/// by `damping * relspd * dt`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SoftDistanceConstraint {
    /// Pivot on each body, object space.
    pub pivot: [Vector3; 2],
    /// Rest length of the spring.
    pub distance: Scalar,
    /// Spring stiffness.
    pub stiffness: Scalar,
    /// Damping coefficient.
    pub damping: Scalar,
}

/// Hinge constraint: one rotational degree of freedom, with optional angle
/// limits, bump-stop spring, rest-angle spring and friction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HingeConstraint {
    /// Pivot on each body, object space.
    pub pivot: [Vector3; 2],
    /// Hinge frame on each body: column 0 is the hinge axis, columns 1 and
    /// 2 span its orthogonal plane.
    pub frame: [Matrix3; 2],
    /// Lower angle limit; limits apply while `angle_min < angle_max`.
    pub angle_min: Scalar,
    /// Upper angle limit.
    pub angle_max: Scalar,
    /// Restitution applied when bouncing off a limit.
    pub limit_restitution: Scalar,
    /// Bump-stop spring stiffness, active inside `bump_stop_angle` of a
    /// limit.
    pub bump_stop_stiffness: Scalar,
    /// Angular range of the bump stop measured from each limit.
    pub bump_stop_angle: Scalar,
    /// Rest-angle spring stiffness.
    pub stiffness: Scalar,
    /// Angle the spring drives toward.
    pub rest_angle: Scalar,
    /// Constant friction torque.
    pub friction_torque: Scalar,
    /// Speed-dependent friction.
    pub damping: Scalar,
    /// Accumulated hinge angle, tracked across the +/- pi wrap.
    pub angle: Scalar,
}

impl Default for HingeConstraint {
    fn default() -> Self {
        Self {
            pivot: [Vector3::ZERO; 2],
            frame: [Matrix3::IDENTITY; 2],
            angle_min: 1.0,
            angle_max: -1.0,
            limit_restitution: 0.0,
            bump_stop_stiffness: 0.0,
            bump_stop_angle: 0.0,
            stiffness: 0.0,
            rest_angle: 0.0,
            friction_torque: 0.0,
            damping: 0.0,
            angle: 0.0,
        }
    }
}

impl HingeConstraint {
    /// Set the hinge axes, building an orthonormal frame on each body with
    /// the axis in column 0.
    pub fn set_axes(&mut self, axis_a: Vector3, axis_b: Vector3) {
        let (p, q) = plane_space(axis_a);
        self.frame[0] = Matrix3::from_columns(axis_a, p, q);
        let (p, q) = plane_space(axis_b);
        self.frame[1] = Matrix3::from_columns(axis_b, p, q);
    }

    /// Whether angular limits are active.
    pub fn has_limit(&self) -> bool {
        self.angle_min < self.angle_max
    }

    /// Measure the hinge angle from the two current orientations.
    pub fn measure_angle(&self, orn_a: Quaternion, orn_b: Quaternion) -> Scalar {
        let p = orn_a.rotate(self.frame[0].column(1));
        let q = orn_a.rotate(self.frame[0].column(2));
        let angle_axis_b = orn_b.rotate(self.frame[1].column(1));
        angle_axis_b.dot(q).atan2(angle_axis_b.dot(p))
    }

    /// Reset the accumulated angle to the currently measured value.
    pub fn reset_angle(&mut self, orn_a: Quaternion, orn_b: Quaternion) {
        self.angle = self.measure_angle(orn_a, orn_b);
    }

    /// Fold a newly measured angle into the accumulated angle, taking the
    /// shortest path across the +/- pi wrap so limit arithmetic needs no
    /// branches at the seam.
    pub fn update_angle(&mut self, measured: Scalar) {
        let previous = normalize_angle(self.angle);
        let delta0 = measured - previous;
        let delta1 = delta0 + PI2 * to_sign(delta0 < 0.0);
        let delta = if delta0.abs() < delta1.abs() {
            delta0
        } else {
            delta1
        };
        self.angle += delta;
    }
}

/// Generic constraint locking all six relative degrees of freedom (a weld),
/// with per-axis frames for future unlock options.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenericConstraint {
    /// Pivot on each body, object space.
    pub pivot: [Vector3; 2],
    /// Reference frame on each body.
    pub frame: [Matrix3; 2],
}

impl Default for GenericConstraint {
    fn default() -> Self {
        Self {
            pivot: [Vector3::ZERO; 2],
            frame: [Matrix3::IDENTITY; 2],
        }
    }
}

/// Constraint variants.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Ball-socket.
    Point(PointConstraint),
    /// Rigid distance.
    Distance(DistanceConstraint),
    /// Spring-damper distance.
    SoftDistance(SoftDistanceConstraint),
    /// Hinge with limits, springs and friction.
    Hinge(HingeConstraint),
    /// Six-DOF lock.
    Generic(GenericConstraint),
}

/// A constraint between two bodies, stored on its own entity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Constrained bodies.
    pub body: [Entity; 2],
    /// Warm-start impulse per solver row, in preparation order.
    pub impulse: [Scalar; MAX_CONSTRAINT_ROWS],
    /// Kind-specific data.
    pub kind: ConstraintKind,
}

impl Constraint {
    /// Create a constraint of `kind` between two bodies.
    pub fn new(body_a: Entity, body_b: Entity, kind: ConstraintKind) -> Self {
        Self {
            body: [body_a, body_b],
            impulse: [0.0; MAX_CONSTRAINT_ROWS],
            kind,
        }
    }
}

/// Create a constraint entity and register it as a graph edge between its
/// bodies, which merges their islands.
pub fn make_constraint(
    registry: &mut Registry,
    graph: &mut EntityGraph,
    body_a: Entity,
    body_b: Entity,
    kind: ConstraintKind,
) -> Entity {
    let entity = registry.create();
    registry
        .constraint
        .insert(entity, Constraint::new(body_a, body_b, kind));

    if let (Some(node_a), Some(node_b)) = (
        registry.graph_node.get(body_a),
        registry.graph_node.get(body_b),
    ) {
        let edge_index = graph.insert_edge(entity, node_a.node_index, node_b.node_index);
        registry.graph_edge.insert(entity, GraphEdge { edge_index });
    }
    entity
}

/// Destroy a constraint entity, removing its graph edge.
pub fn destroy_constraint(registry: &mut Registry, graph: &mut EntityGraph, entity: Entity) {
    if let Some(edge) = registry.graph_edge.get(entity).copied() {
        graph.remove_edge(edge.edge_index);
    }
    registry.destroy(entity);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hinge_set_axes_orthonormal_frame() {
        let mut hinge = HingeConstraint::default();
        hinge.set_axes(Vector3::UNIT_Z, Vector3::UNIT_Z);
        let axis = hinge.frame[0].column(0);
        let p = hinge.frame[0].column(1);
        let q = hinge.frame[0].column(2);
        assert_relative_eq!(axis.dot(p), 0.0, epsilon = 1e-9);
        assert_relative_eq!(axis.dot(q), 0.0, epsilon = 1e-9);
        assert_relative_eq!(p.dot(q), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_hinge_measure_angle() {
        let mut hinge = HingeConstraint::default();
        hinge.set_axes(Vector3::UNIT_Z, Vector3::UNIT_Z);

        let orn_a = Quaternion::IDENTITY;
        let orn_b = Quaternion::from_axis_angle(Vector3::UNIT_Z, 0.5);
        let angle = hinge.measure_angle(orn_a, orn_b);
        assert_relative_eq!(angle, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_hinge_angle_accumulates_across_wrap() {
        let mut hinge = HingeConstraint::default();
        hinge.angle = 3.0;

        // Measured angle wrapped past +pi to the negative side.
        let measured = normalize_angle(3.0 + 0.4);
        assert!(measured < 0.0);
        hinge.update_angle(measured);
        assert_relative_eq!(hinge.angle, 3.4, epsilon = 1e-9);

        // And back down.
        let measured = normalize_angle(3.4 - 0.6);
        hinge.update_angle(measured);
        assert_relative_eq!(hinge.angle, 2.8, epsilon = 1e-9);
    }

    #[test]
    fn test_hinge_default_has_no_limit() {
        let hinge = HingeConstraint::default();
        assert!(!hinge.has_limit());
    }

    #[test]
    fn test_make_constraint_creates_graph_edge() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();

        let a = registry.create();
        let b = registry.create();
        for &e in &[a, b] {
            let node = graph.insert_node(e, false);
            registry
                .graph_node
                .insert(e, crate::components::GraphNode { node_index: node });
        }

        let entity = make_constraint(
            &mut registry,
            &mut graph,
            a,
            b,
            ConstraintKind::Point(PointConstraint::default()),
        );
        assert!(registry.constraint.contains(entity));
        assert!(registry.graph_edge.contains(entity));
        assert_eq!(graph.edge_count(), 1);

        destroy_constraint(&mut registry, &mut graph, entity);
        assert_eq!(graph.edge_count(), 0);
        assert!(!registry.is_valid(entity));
    }
}
