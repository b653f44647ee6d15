//! Rigid Body Factory and Mutators
//!
//! Assembles the component set of a rigid body from a [`RigidBodyDef`]:
//! transform, velocities, mass and inertia with their derived inverses,
//! shape with AABB and collision filter, material, kind tags, and the
//! entity-graph node. Also the small mutation helpers that keep derived
//! quantities in sync (mass/inertia updates, impulses, kinematic targets).

use crate::components::{CollisionFilter, Discontinuity, GraphNode};
use crate::error::PhysicsError;
use crate::graph::EntityGraph;
use crate::island::wake_touching;
use crate::material::Material;
use crate::math::{
    rotate_inertia_inv, Matrix3, Quaternion, Scalar, Vector3, GRAVITY_EARTH, SCALAR_MAX,
};
use crate::registry::{Entity, Registry, Tag};
use crate::shapes::{moment_of_inertia, shape_aabb, Shape};

/// Kind of rigid body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RigidBodyKind {
    /// Moved by the solver and integrator.
    #[default]
    Dynamic,
    /// Moved by user code; pushes dynamic bodies, never pushed.
    Kinematic,
    /// Never moves.
    Static,
}

/// Everything needed to assemble a rigid body.
#[derive(Clone, Debug)]
pub struct RigidBodyDef {
    /// Body kind.
    pub kind: RigidBodyKind,
    /// Initial position.
    pub position: Vector3,
    /// Initial orientation.
    pub orientation: Quaternion,
    /// Initial linear velocity (ignored for static bodies).
    pub linvel: Vector3,
    /// Initial angular velocity (ignored for static bodies).
    pub angvel: Vector3,
    /// Mass; must be positive and finite for dynamic bodies.
    pub mass: Scalar,
    /// Explicit inertia tensor; derived from the shape when `None`.
    pub inertia: Option<Matrix3>,
    /// Collision shape.
    pub shape: Option<Shape>,
    /// Gravity override; `None` uses earth gravity.
    pub gravity: Option<Vector3>,
    /// Surface material.
    pub material: Material,
    /// Sensors get no material and thus no contact response.
    pub sensor: bool,
    /// Whether to maintain interpolated presentation state.
    pub presentation: bool,
    /// Keep contact points across small separations.
    pub continuous_contacts: bool,
    /// Collision filter group bits.
    pub collision_group: u64,
    /// Collision filter mask bits.
    pub collision_mask: u64,
    /// Whether the body replicates over the network.
    pub networked: bool,
    /// Exempt this body's islands from sleeping.
    pub sleeping_disabled: bool,
}

impl Default for RigidBodyDef {
    fn default() -> Self {
        Self {
            kind: RigidBodyKind::Dynamic,
            position: Vector3::ZERO,
            orientation: Quaternion::IDENTITY,
            linvel: Vector3::ZERO,
            angvel: Vector3::ZERO,
            mass: 1.0,
            inertia: None,
            shape: None,
            gravity: None,
            material: Material::default(),
            sensor: false,
            presentation: false,
            continuous_contacts: false,
            collision_group: CollisionFilter::DEFAULT.group,
            collision_mask: CollisionFilter::DEFAULT.mask,
            networked: false,
            sleeping_disabled: false,
        }
    }
}

/// Create a rigid body from a definition.
///
/// Dynamic bodies must have positive finite mass. The created entity gets
/// a graph node; dynamic bodies are connecting (procedural) nodes, other
/// kinds are not.
pub fn make_rigidbody(
    registry: &mut Registry,
    graph: &mut EntityGraph,
    def: &RigidBodyDef,
) -> Result<Entity, PhysicsError> {
    if def.kind == RigidBodyKind::Dynamic && !(def.mass > 0.0 && def.mass < SCALAR_MAX) {
        return Err(PhysicsError::InvalidRigidBody {
            reason: "dynamic bodies require positive finite mass",
        });
    }

    let entity = registry.create();
    registry.position.insert(entity, def.position);
    registry.orientation.insert(entity, def.orientation);

    if def.kind == RigidBodyKind::Dynamic {
        registry.mass.insert(entity, def.mass);
        registry.mass_inv.insert(entity, 1.0 / def.mass);

        let inertia = def.inertia.unwrap_or_else(|| match &def.shape {
            Some(shape) => moment_of_inertia(shape, def.mass),
            // Unit sphere fallback.
            None => Matrix3::diagonal(Vector3::splat(0.4 * def.mass)),
        });
        let inertia_inv = inertia.inverse_symmetric();
        registry.inertia.insert(entity, inertia);
        registry.inertia_inv.insert(entity, inertia_inv);
        registry
            .inertia_world_inv
            .insert(entity, rotate_inertia_inv(&inertia_inv, def.orientation));
    } else {
        registry.mass.insert(entity, SCALAR_MAX);
        registry.mass_inv.insert(entity, 0.0);
        registry.inertia.insert(entity, Matrix3::ZERO);
        registry.inertia_inv.insert(entity, Matrix3::ZERO);
        registry.inertia_world_inv.insert(entity, Matrix3::ZERO);
    }

    if def.kind == RigidBodyKind::Static {
        registry.linvel.insert(entity, Vector3::ZERO);
        registry.angvel.insert(entity, Vector3::ZERO);
    } else {
        registry.linvel.insert(entity, def.linvel);
        registry.angvel.insert(entity, def.angvel);
    }

    if def.kind == RigidBodyKind::Dynamic {
        let gravity = def.gravity.unwrap_or(GRAVITY_EARTH);
        if gravity != Vector3::ZERO {
            registry.linacc.insert(entity, gravity);
        }
    }

    if !def.sensor {
        registry.material.insert(entity, def.material);
    }

    if def.presentation && def.kind == RigidBodyKind::Dynamic {
        registry.present_position.insert(entity, def.position);
        registry.present_orientation.insert(entity, def.orientation);
        registry
            .discontinuity
            .insert(entity, Discontinuity::default());
    }

    if let Some(shape) = &def.shape {
        let aabb = shape_aabb(shape, def.position, def.orientation);
        registry.shape.insert(entity, shape.clone());
        registry.aabb.insert(entity, aabb);
        registry.collision_filter.insert(
            entity,
            CollisionFilter::new(def.collision_group, def.collision_mask),
        );
    }

    if def.continuous_contacts {
        registry.continuous_contacts_tag.insert(entity, Tag);
    }
    if def.networked {
        registry.networked_tag.insert(entity, Tag);
    }
    if def.sleeping_disabled {
        registry.sleeping_disabled_tag.insert(entity, Tag);
    }

    match def.kind {
        RigidBodyKind::Dynamic => {
            registry.dynamic_tag.insert(entity, Tag);
            registry.procedural_tag.insert(entity, Tag);
        }
        RigidBodyKind::Kinematic => {
            registry.kinematic_tag.insert(entity, Tag);
        }
        RigidBodyKind::Static => {
            registry.static_tag.insert(entity, Tag);
        }
    }

    let non_connecting = def.kind != RigidBodyKind::Dynamic;
    let node_index = graph.insert_node(entity, non_connecting);
    registry.graph_node.insert(entity, GraphNode { node_index });

    Ok(entity)
}

/// Create several bodies that start out in a single shared island.
pub fn batch_rigidbodies(
    registry: &mut Registry,
    graph: &mut EntityGraph,
    defs: &[RigidBodyDef],
) -> Result<Vec<Entity>, PhysicsError> {
    let mut entities = Vec::with_capacity(defs.len());
    for def in defs {
        entities.push(make_rigidbody(registry, graph, def)?);
    }

    // One island holding every procedural body of the batch, so the batch
    // is dispatched as a unit until connectivity says otherwise.
    let members: Vec<Entity> = entities
        .iter()
        .copied()
        .filter(|&e| registry.procedural_tag.contains(e))
        .collect();
    if !members.is_empty() {
        let island_entity = registry.create();
        for &member in &members {
            registry.island_resident.insert_silent(
                member,
                crate::components::IslandResident {
                    island: island_entity,
                },
            );
        }
        registry.island.insert_silent(
            island_entity,
            crate::island::Island {
                entities: members,
                timestamp: 0.0,
                sleep_timer: 0.0,
            },
        );
    }
    Ok(entities)
}

/// Set a body's mass, refreshing `mass_inv` and its inertia from the shape.
pub fn rigidbody_set_mass(
    registry: &mut Registry,
    entity: Entity,
    mass: Scalar,
) -> Result<(), PhysicsError> {
    if !(mass > 0.0 && mass < SCALAR_MAX) {
        return Err(PhysicsError::InvalidRigidBody {
            reason: "mass must be positive and finite",
        });
    }
    if !registry.is_valid(entity) {
        return Err(PhysicsError::InvalidEntity {
            index: entity.index(),
            version: entity.version(),
        });
    }
    registry.mass.insert(entity, mass);
    registry.mass_inv.insert(entity, 1.0 / mass);
    rigidbody_update_inertia(registry, entity)
}

/// Recompute a body's inertia from its shape and mass, refreshing the
/// inverse and world-space tensors.
pub fn rigidbody_update_inertia(registry: &mut Registry, entity: Entity) -> Result<(), PhysicsError> {
    let mass = registry
        .mass
        .get(entity)
        .copied()
        .ok_or(PhysicsError::InvalidEntity {
            index: entity.index(),
            version: entity.version(),
        })?;
    let Some(shape) = registry.shape.get(entity) else {
        return Err(PhysicsError::InvalidRigidBody {
            reason: "cannot derive inertia without a shape",
        });
    };

    let inertia = moment_of_inertia(shape, mass);
    let inertia_inv = inertia.inverse_symmetric();
    let orn = registry
        .orientation
        .get(entity)
        .copied()
        .unwrap_or(Quaternion::IDENTITY);
    registry.inertia.insert(entity, inertia);
    registry.inertia_inv.insert(entity, inertia_inv);
    registry
        .inertia_world_inv
        .insert(entity, rotate_inertia_inv(&inertia_inv, orn));
    Ok(())
}

/// Apply an impulse at a location relative to the center of mass, waking
/// the body's island and its neighbors.
pub fn rigidbody_apply_impulse(
    registry: &mut Registry,
    graph: &EntityGraph,
    entity: Entity,
    impulse: Vector3,
    rel_location: Vector3,
) {
    let Some(&mass_inv) = registry.mass_inv.get(entity) else {
        return;
    };
    let inertia_world_inv = registry
        .inertia_world_inv
        .get(entity)
        .copied()
        .unwrap_or(Matrix3::ZERO);

    if let Some(linvel) = registry.linvel.get_mut(entity) {
        *linvel += impulse * mass_inv;
    }
    if let Some(angvel) = registry.angvel.get_mut(entity) {
        *angvel += inertia_world_inv.mul_vec(rel_location.cross(impulse));
    }
    wake_touching(registry, graph, entity);
}

/// Drive a kinematic body toward a target position by giving it the
/// velocity that reaches the target in `dt`. The integrator moves the body
/// there during the next step and contacts see the true motion; the
/// velocity is cleared again at step end.
pub fn update_kinematic_position(
    registry: &mut Registry,
    entity: Entity,
    target: Vector3,
    dt: Scalar,
) {
    debug_assert!(registry.kinematic_tag.contains(entity));
    let Some(&current) = registry.position.get(entity) else {
        return;
    };
    registry
        .linvel
        .insert_silent(entity, (target - current) / dt);
}

/// Drive a kinematic body toward a target orientation by giving it the
/// angular velocity that reaches the target in `dt`.
pub fn update_kinematic_orientation(
    registry: &mut Registry,
    entity: Entity,
    target: Quaternion,
    dt: Scalar,
) {
    debug_assert!(registry.kinematic_tag.contains(entity));
    let Some(&current) = registry.orientation.get(entity) else {
        return;
    };
    let delta = current.conjugate().mul(target).normalize();
    let angvel = delta.axis() * (delta.angle() / dt);
    registry.angvel.insert_silent(entity, angvel);
}

/// Zero kinematic velocities at the end of a step; kinematic motion is
/// teleport-driven, so velocities only exist within the step that set them.
pub fn clear_kinematic_velocities(registry: &mut Registry) {
    let entities: Vec<Entity> = registry.kinematic_tag.entities().to_vec();
    for entity in entities {
        registry.linvel.insert_silent(entity, Vector3::ZERO);
        registry.angvel.insert_silent(entity, Vector3::ZERO);
    }
}

/// Whether an entity has the minimal component set of a rigid body.
pub fn validate_rigidbody(registry: &Registry, entity: Entity) -> bool {
    registry.position.contains(entity)
        && registry.orientation.contains(entity)
        && registry.linvel.contains(entity)
        && registry.angvel.contains(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_dynamic_body_components() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let def = RigidBodyDef {
            position: Vector3::new(0.0, 10.0, 0.0),
            mass: 2.0,
            shape: Some(Shape::Sphere { radius: 0.5 }),
            ..Default::default()
        };
        let entity = make_rigidbody(&mut registry, &mut graph, &def).unwrap();

        assert!(validate_rigidbody(&registry, entity));
        assert_relative_eq!(*registry.mass_inv.get(entity).unwrap(), 0.5);
        assert!(registry.dynamic_tag.contains(entity));
        assert!(registry.procedural_tag.contains(entity));
        assert!(registry.linacc.contains(entity), "default gravity applied");
        assert!(registry.aabb.contains(entity));
        let node = registry.graph_node.get(entity).unwrap();
        assert!(graph.is_connecting_node(node.node_index));

        // mass * mass_inv == 1 for dynamic bodies.
        let m = registry.mass.get(entity).unwrap();
        let m_inv = registry.mass_inv.get(entity).unwrap();
        assert_relative_eq!(m * m_inv, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_static_body_infinite_mass_zero_velocity() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let def = RigidBodyDef {
            kind: RigidBodyKind::Static,
            linvel: Vector3::new(5.0, 0.0, 0.0),
            shape: Some(Shape::Plane {
                normal: Vector3::UNIT_Y,
                constant: 0.0,
            }),
            ..Default::default()
        };
        let entity = make_rigidbody(&mut registry, &mut graph, &def).unwrap();

        assert_eq!(*registry.mass_inv.get(entity).unwrap(), 0.0);
        assert_eq!(*registry.linvel.get(entity).unwrap(), Vector3::ZERO);
        assert!(!registry.procedural_tag.contains(entity));
        let node = registry.graph_node.get(entity).unwrap();
        assert!(!graph.is_connecting_node(node.node_index));
    }

    #[test]
    fn test_dynamic_body_rejects_zero_mass() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let def = RigidBodyDef {
            mass: 0.0,
            ..Default::default()
        };
        assert!(make_rigidbody(&mut registry, &mut graph, &def).is_err());
    }

    #[test]
    fn test_sensor_gets_no_material() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let def = RigidBodyDef {
            sensor: true,
            ..Default::default()
        };
        let entity = make_rigidbody(&mut registry, &mut graph, &def).unwrap();
        assert!(!registry.material.contains(entity));
    }

    #[test]
    fn test_batch_creates_single_island() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let defs = vec![RigidBodyDef::default(); 3];
        let entities = batch_rigidbodies(&mut registry, &mut graph, &defs).unwrap();

        assert_eq!(registry.island.len(), 1);
        let island = registry.island_resident.get(entities[0]).unwrap().island;
        for &e in &entities {
            assert_eq!(registry.island_resident.get(e).unwrap().island, island);
        }
    }

    #[test]
    fn test_set_mass_updates_inverse_and_inertia() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let def = RigidBodyDef {
            shape: Some(Shape::Sphere { radius: 1.0 }),
            ..Default::default()
        };
        let entity = make_rigidbody(&mut registry, &mut graph, &def).unwrap();
        let inertia_before = *registry.inertia.get(entity).unwrap();

        rigidbody_set_mass(&mut registry, entity, 4.0).unwrap();
        assert_relative_eq!(*registry.mass_inv.get(entity).unwrap(), 0.25);
        let inertia_after = *registry.inertia.get(entity).unwrap();
        assert!(inertia_after.row[0].x > inertia_before.row[0].x);
    }

    #[test]
    fn test_apply_impulse_changes_velocities() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let def = RigidBodyDef {
            shape: Some(Shape::Sphere { radius: 0.5 }),
            ..Default::default()
        };
        let entity = make_rigidbody(&mut registry, &mut graph, &def).unwrap();

        rigidbody_apply_impulse(
            &mut registry,
            &graph,
            entity,
            Vector3::new(0.0, 2.0, 0.0),
            Vector3::new(0.5, 0.0, 0.0),
        );
        assert_relative_eq!(registry.linvel.get(entity).unwrap().y, 2.0);
        // Off-center impulse spins the body.
        assert!(registry.angvel.get(entity).unwrap().z.abs() > 0.0);
    }

    #[test]
    fn test_kinematic_update_derives_velocity_and_clear() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let def = RigidBodyDef {
            kind: RigidBodyKind::Kinematic,
            ..Default::default()
        };
        let entity = make_rigidbody(&mut registry, &mut graph, &def).unwrap();

        update_kinematic_position(&mut registry, entity, Vector3::new(1.0, 0.0, 0.0), 0.5);
        assert_relative_eq!(registry.linvel.get(entity).unwrap().x, 2.0);

        clear_kinematic_velocities(&mut registry);
        assert_eq!(*registry.linvel.get(entity).unwrap(), Vector3::ZERO);
    }
}
