//! Component Pools and Registry Snapshots
//!
//! A snapshot is a set of `(entity, payload)` tuples bundled per component
//! type for compact encoding. The component set is closed, so every pool
//! variant has a stable component index negotiated implicitly by build:
//! the pool enum discriminants below are the wire indices.
//!
//! Pools move state in three places: client/server registry snapshots,
//! coordinator-to-island-worker mirrors, and extrapolation requests. In
//! all three the receiving side first remaps entity handles through an
//! [`EntityMap`], dropping entries whose entities it does not know.

use crate::components::{ActionHistory, CollisionFilter, EntityOwner, NetworkInput};
use crate::constraint::Constraint;
use crate::entity_map::EntityMap;
use crate::material::Material;
use crate::math::{Matrix3, Quaternion, Scalar, Vector3};
use crate::registry::{Entity, Registry, Tag};
use crate::shapes::Shape;
use serde::{Deserialize, Serialize};

/// Stable component indices used in pool encoding.
pub mod component_index {
    /// `position`
    pub const POSITION: u16 = 0;
    /// `orientation`
    pub const ORIENTATION: u16 = 1;
    /// `linvel`
    pub const LINVEL: u16 = 2;
    /// `angvel`
    pub const ANGVEL: u16 = 3;
    /// `linacc`
    pub const LINACC: u16 = 4;
    /// `mass`
    pub const MASS: u16 = 5;
    /// `inertia`
    pub const INERTIA: u16 = 6;
    /// `shape`
    pub const SHAPE: u16 = 7;
    /// `origin`
    pub const ORIGIN: u16 = 8;
    /// `collision_filter`
    pub const COLLISION_FILTER: u16 = 9;
    /// `material`
    pub const MATERIAL: u16 = 10;
    /// `constraint`
    pub const CONSTRAINT: u16 = 11;
    /// `entity_owner`
    pub const ENTITY_OWNER: u16 = 12;
    /// `action_history`
    pub const ACTION_HISTORY: u16 = 13;
    /// `network_input`
    pub const NETWORK_INPUT: u16 = 14;
    /// `dynamic_tag`
    pub const DYNAMIC_TAG: u16 = 15;
    /// `kinematic_tag`
    pub const KINEMATIC_TAG: u16 = 16;
    /// `static_tag`
    pub const STATIC_TAG: u16 = 17;
    /// `procedural_tag`
    pub const PROCEDURAL_TAG: u16 = 18;
    /// `continuous_contacts_tag`
    pub const CONTINUOUS_CONTACTS_TAG: u16 = 19;
    /// `sleeping_disabled_tag`
    pub const SLEEPING_DISABLED_TAG: u16 = 20;
}

/// Component indices always sent for dynamic bodies: transform and
/// velocity.
pub const BODY_STATE_INDICES: [u16; 4] = [
    component_index::POSITION,
    component_index::ORIENTATION,
    component_index::LINVEL,
    component_index::ANGVEL,
];

/// All pool component indices, in index order.
pub const ALL_COMPONENT_INDICES: [u16; 21] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20,
];

/// One per-component pool of `(entity, payload)` pairs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ComponentPool {
    /// World positions.
    Position(Vec<(Entity, Vector3)>),
    /// World orientations.
    Orientation(Vec<(Entity, Quaternion)>),
    /// Linear velocities.
    LinVel(Vec<(Entity, Vector3)>),
    /// Angular velocities.
    AngVel(Vec<(Entity, Vector3)>),
    /// Persistent accelerations.
    LinAcc(Vec<(Entity, Vector3)>),
    /// Masses.
    Mass(Vec<(Entity, Scalar)>),
    /// Inertia tensors.
    Inertia(Vec<(Entity, Matrix3)>),
    /// Collision shapes.
    Shape(Vec<(Entity, Shape)>),
    /// Shape origins.
    Origin(Vec<(Entity, Vector3)>),
    /// Collision filters.
    CollisionFilter(Vec<(Entity, CollisionFilter)>),
    /// Surface materials.
    Material(Vec<(Entity, Material)>),
    /// Constraints; nested body handles are remapped on import.
    Constraint(Vec<(Entity, Constraint)>),
    /// Entity ownership; the nested client handle is remapped on import.
    EntityOwner(Vec<(Entity, EntityOwner)>),
    /// Action histories.
    ActionHistory(Vec<(Entity, ActionHistory)>),
    /// Network input payloads.
    NetworkInput(Vec<(Entity, NetworkInput)>),
    /// Dynamic tags.
    DynamicTag(Vec<Entity>),
    /// Kinematic tags.
    KinematicTag(Vec<Entity>),
    /// Static tags.
    StaticTag(Vec<Entity>),
    /// Procedural tags.
    ProceduralTag(Vec<Entity>),
    /// Continuous-contacts tags.
    ContinuousContactsTag(Vec<Entity>),
    /// Sleeping-disabled tags.
    SleepingDisabledTag(Vec<Entity>),
}

fn map_pairs<T>(pairs: &mut Vec<(Entity, T)>, map: &EntityMap) -> usize {
    let before = pairs.len();
    pairs.retain_mut(|(entity, _)| match map.at_remote(*entity) {
        Some(local) => {
            *entity = local;
            true
        }
        None => false,
    });
    before - pairs.len()
}

fn map_tags(tags: &mut Vec<Entity>, map: &EntityMap) -> usize {
    let before = tags.len();
    tags.retain_mut(|entity| match map.at_remote(*entity) {
        Some(local) => {
            *entity = local;
            true
        }
        None => false,
    });
    before - tags.len()
}

impl ComponentPool {
    /// Create an empty pool for a component index.
    pub fn empty_for_index(index: u16) -> Option<Self> {
        use component_index::*;
        Some(match index {
            POSITION => Self::Position(Vec::new()),
            ORIENTATION => Self::Orientation(Vec::new()),
            LINVEL => Self::LinVel(Vec::new()),
            ANGVEL => Self::AngVel(Vec::new()),
            LINACC => Self::LinAcc(Vec::new()),
            MASS => Self::Mass(Vec::new()),
            INERTIA => Self::Inertia(Vec::new()),
            SHAPE => Self::Shape(Vec::new()),
            ORIGIN => Self::Origin(Vec::new()),
            COLLISION_FILTER => Self::CollisionFilter(Vec::new()),
            MATERIAL => Self::Material(Vec::new()),
            CONSTRAINT => Self::Constraint(Vec::new()),
            ENTITY_OWNER => Self::EntityOwner(Vec::new()),
            ACTION_HISTORY => Self::ActionHistory(Vec::new()),
            NETWORK_INPUT => Self::NetworkInput(Vec::new()),
            DYNAMIC_TAG => Self::DynamicTag(Vec::new()),
            KINEMATIC_TAG => Self::KinematicTag(Vec::new()),
            STATIC_TAG => Self::StaticTag(Vec::new()),
            PROCEDURAL_TAG => Self::ProceduralTag(Vec::new()),
            CONTINUOUS_CONTACTS_TAG => Self::ContinuousContactsTag(Vec::new()),
            SLEEPING_DISABLED_TAG => Self::SleepingDisabledTag(Vec::new()),
            _ => return None,
        })
    }

    /// Stable component index of this pool.
    pub fn component_index(&self) -> u16 {
        use component_index::*;
        match self {
            Self::Position(_) => POSITION,
            Self::Orientation(_) => ORIENTATION,
            Self::LinVel(_) => LINVEL,
            Self::AngVel(_) => ANGVEL,
            Self::LinAcc(_) => LINACC,
            Self::Mass(_) => MASS,
            Self::Inertia(_) => INERTIA,
            Self::Shape(_) => SHAPE,
            Self::Origin(_) => ORIGIN,
            Self::CollisionFilter(_) => COLLISION_FILTER,
            Self::Material(_) => MATERIAL,
            Self::Constraint(_) => CONSTRAINT,
            Self::EntityOwner(_) => ENTITY_OWNER,
            Self::ActionHistory(_) => ACTION_HISTORY,
            Self::NetworkInput(_) => NETWORK_INPUT,
            Self::DynamicTag(_) => DYNAMIC_TAG,
            Self::KinematicTag(_) => KINEMATIC_TAG,
            Self::StaticTag(_) => STATIC_TAG,
            Self::ProceduralTag(_) => PROCEDURAL_TAG,
            Self::ContinuousContactsTag(_) => CONTINUOUS_CONTACTS_TAG,
            Self::SleepingDisabledTag(_) => SLEEPING_DISABLED_TAG,
        }
    }

    /// Number of entries in the pool.
    pub fn len(&self) -> usize {
        match self {
            Self::Position(v) => v.len(),
            Self::Orientation(v) => v.len(),
            Self::LinVel(v) => v.len(),
            Self::AngVel(v) => v.len(),
            Self::LinAcc(v) => v.len(),
            Self::Mass(v) => v.len(),
            Self::Inertia(v) => v.len(),
            Self::Shape(v) => v.len(),
            Self::Origin(v) => v.len(),
            Self::CollisionFilter(v) => v.len(),
            Self::Material(v) => v.len(),
            Self::Constraint(v) => v.len(),
            Self::EntityOwner(v) => v.len(),
            Self::ActionHistory(v) => v.len(),
            Self::NetworkInput(v) => v.len(),
            Self::DynamicTag(v) => v.len(),
            Self::KinematicTag(v) => v.len(),
            Self::StaticTag(v) => v.len(),
            Self::ProceduralTag(v) => v.len(),
            Self::ContinuousContactsTag(v) => v.len(),
            Self::SleepingDisabledTag(v) => v.len(),
        }
    }

    /// Whether the pool has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remap all entity handles (entry keys and nested handles) from remote
    /// to local space. Entries whose key entity is unknown are dropped;
    /// returns the dropped count.
    pub fn map_entities(&mut self, map: &EntityMap) -> usize {
        let dropped = match self {
            Self::Position(v) => map_pairs(v, map),
            Self::Orientation(v) => map_pairs(v, map),
            Self::LinVel(v) => map_pairs(v, map),
            Self::AngVel(v) => map_pairs(v, map),
            Self::LinAcc(v) => map_pairs(v, map),
            Self::Mass(v) => map_pairs(v, map),
            Self::Inertia(v) => map_pairs(v, map),
            Self::Shape(v) => map_pairs(v, map),
            Self::Origin(v) => map_pairs(v, map),
            Self::CollisionFilter(v) => map_pairs(v, map),
            Self::Material(v) => map_pairs(v, map),
            Self::Constraint(v) => {
                let mut dropped = map_pairs(v, map);
                let before = v.len();
                // Nested body handles must resolve as well.
                v.retain_mut(|(_, con)| {
                    for body in &mut con.body {
                        match map.at_remote(*body) {
                            Some(local) => *body = local,
                            None => return false,
                        }
                    }
                    true
                });
                dropped += before - v.len();
                dropped
            }
            Self::EntityOwner(v) => {
                let mut dropped = map_pairs(v, map);
                let before = v.len();
                v.retain_mut(|(_, owner)| match map.at_remote(owner.client_entity) {
                    Some(local) => {
                        owner.client_entity = local;
                        true
                    }
                    None => false,
                });
                dropped += before - v.len();
                dropped
            }
            Self::ActionHistory(v) => map_pairs(v, map),
            Self::NetworkInput(v) => map_pairs(v, map),
            Self::DynamicTag(v) => map_tags(v, map),
            Self::KinematicTag(v) => map_tags(v, map),
            Self::StaticTag(v) => map_tags(v, map),
            Self::ProceduralTag(v) => map_tags(v, map),
            Self::ContinuousContactsTag(v) => map_tags(v, map),
            Self::SleepingDisabledTag(v) => map_tags(v, map),
        };
        if dropped > 0 {
            log::debug!(
                "dropped {dropped} unmapped entries from pool {}",
                self.component_index()
            );
        }
        dropped
    }

    /// Apply the pool to a registry whose entity space the entries already
    /// use. `accept` gates each entry; rejected entries are skipped.
    pub fn apply(&self, registry: &mut Registry, accept: &dyn Fn(&Registry, Entity) -> bool) {
        macro_rules! apply_values {
            ($pairs:expr, $storage:ident) => {
                for (entity, value) in $pairs {
                    if registry.is_valid(*entity) && accept(registry, *entity) {
                        registry.$storage.insert_silent(*entity, value.clone());
                    }
                }
            };
        }
        macro_rules! apply_tags {
            ($tags:expr, $storage:ident) => {
                for entity in $tags {
                    if registry.is_valid(*entity) && accept(registry, *entity) {
                        registry.$storage.insert_silent(*entity, Tag);
                    }
                }
            };
        }
        match self {
            Self::Position(v) => apply_values!(v, position),
            Self::Orientation(v) => apply_values!(v, orientation),
            Self::LinVel(v) => apply_values!(v, linvel),
            Self::AngVel(v) => apply_values!(v, angvel),
            Self::LinAcc(v) => apply_values!(v, linacc),
            Self::Mass(v) => apply_values!(v, mass),
            Self::Inertia(v) => apply_values!(v, inertia),
            Self::Shape(v) => apply_values!(v, shape),
            Self::Origin(v) => apply_values!(v, origin),
            Self::CollisionFilter(v) => apply_values!(v, collision_filter),
            Self::Material(v) => apply_values!(v, material),
            Self::Constraint(v) => apply_values!(v, constraint),
            Self::EntityOwner(v) => apply_values!(v, entity_owner),
            Self::ActionHistory(v) => apply_values!(v, action_history),
            Self::NetworkInput(v) => apply_values!(v, network_input),
            Self::DynamicTag(v) => apply_tags!(v, dynamic_tag),
            Self::KinematicTag(v) => apply_tags!(v, kinematic_tag),
            Self::StaticTag(v) => apply_tags!(v, static_tag),
            Self::ProceduralTag(v) => apply_tags!(v, procedural_tag),
            Self::ContinuousContactsTag(v) => apply_tags!(v, continuous_contacts_tag),
            Self::SleepingDisabledTag(v) => apply_tags!(v, sleeping_disabled_tag),
        }
    }

    /// Append `entity`'s component to this pool if the registry has it.
    pub fn collect(&mut self, registry: &Registry, entity: Entity) {
        macro_rules! collect_value {
            ($pairs:expr, $storage:ident) => {
                if let Some(value) = registry.$storage.get(entity) {
                    $pairs.push((entity, value.clone()));
                }
            };
        }
        macro_rules! collect_tag {
            ($tags:expr, $storage:ident) => {
                if registry.$storage.contains(entity) {
                    $tags.push(entity);
                }
            };
        }
        match self {
            Self::Position(v) => collect_value!(v, position),
            Self::Orientation(v) => collect_value!(v, orientation),
            Self::LinVel(v) => collect_value!(v, linvel),
            Self::AngVel(v) => collect_value!(v, angvel),
            Self::LinAcc(v) => collect_value!(v, linacc),
            Self::Mass(v) => collect_value!(v, mass),
            Self::Inertia(v) => collect_value!(v, inertia),
            Self::Shape(v) => collect_value!(v, shape),
            Self::Origin(v) => collect_value!(v, origin),
            Self::CollisionFilter(v) => collect_value!(v, collision_filter),
            Self::Material(v) => collect_value!(v, material),
            Self::Constraint(v) => collect_value!(v, constraint),
            Self::EntityOwner(v) => collect_value!(v, entity_owner),
            Self::ActionHistory(v) => collect_value!(v, action_history),
            Self::NetworkInput(v) => collect_value!(v, network_input),
            Self::DynamicTag(v) => collect_tag!(v, dynamic_tag),
            Self::KinematicTag(v) => collect_tag!(v, kinematic_tag),
            Self::StaticTag(v) => collect_tag!(v, static_tag),
            Self::ProceduralTag(v) => collect_tag!(v, procedural_tag),
            Self::ContinuousContactsTag(v) => collect_tag!(v, continuous_contacts_tag),
            Self::SleepingDisabledTag(v) => collect_tag!(v, sleeping_disabled_tag),
        }
    }

    /// Entities named by this pool's entries.
    pub fn entities(&self) -> Vec<Entity> {
        macro_rules! keys {
            ($pairs:expr) => {
                $pairs.iter().map(|(e, _)| *e).collect()
            };
        }
        match self {
            Self::Position(v) => keys!(v),
            Self::Orientation(v) => keys!(v),
            Self::LinVel(v) => keys!(v),
            Self::AngVel(v) => keys!(v),
            Self::LinAcc(v) => keys!(v),
            Self::Mass(v) => keys!(v),
            Self::Inertia(v) => keys!(v),
            Self::Shape(v) => keys!(v),
            Self::Origin(v) => keys!(v),
            Self::CollisionFilter(v) => keys!(v),
            Self::Material(v) => keys!(v),
            Self::Constraint(v) => keys!(v),
            Self::EntityOwner(v) => keys!(v),
            Self::ActionHistory(v) => keys!(v),
            Self::NetworkInput(v) => keys!(v),
            Self::DynamicTag(v)
            | Self::KinematicTag(v)
            | Self::StaticTag(v)
            | Self::ProceduralTag(v)
            | Self::ContinuousContactsTag(v)
            | Self::SleepingDisabledTag(v) => v.clone(),
        }
    }
}

/// A set of entities and their component pools, stamped with a simulation
/// time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Simulation time the snapshot represents.
    pub timestamp: Scalar,
    /// Entities included in the snapshot, in the sender's handle space
    /// until remapped.
    pub entities: Vec<Entity>,
    /// Per-component pools.
    pub pools: Vec<ComponentPool>,
}

impl RegistrySnapshot {
    /// Remap every handle from remote to local space, dropping unknown
    /// entries. Returns the total dropped entry count.
    pub fn map_entities(&mut self, map: &EntityMap) -> usize {
        self.entities.retain_mut(|e| match map.at_remote(*e) {
            Some(local) => {
                *e = local;
                true
            }
            None => false,
        });
        self.pools.iter_mut().map(|p| p.map_entities(map)).sum()
    }

    /// Whether the snapshot carries no component data.
    pub fn is_empty(&self) -> bool {
        self.pools.iter().all(ComponentPool::is_empty)
    }

    /// Sort pools by component index, as construction order matters to
    /// importers.
    pub fn sort_pools(&mut self) {
        self.pools.sort_by_key(ComponentPool::component_index);
    }
}

/// Find or create the pool for `index` in a pool list.
pub fn pool_for_index(pools: &mut Vec<ComponentPool>, index: u16) -> Option<&mut ComponentPool> {
    if let Some(pos) = pools.iter().position(|p| p.component_index() == index) {
        return pools.get_mut(pos);
    }
    let pool = ComponentPool::empty_for_index(index)?;
    pools.push(pool);
    pools.last_mut()
}

/// Export the listed component indices of `entities` into pools.
pub fn export_pools(
    registry: &Registry,
    entities: impl IntoIterator<Item = Entity> + Clone,
    indices: &[u16],
) -> Vec<ComponentPool> {
    let mut pools = Vec::new();
    for &index in indices {
        let Some(pool) = pool_for_index(&mut pools, index) else {
            log::debug!("skipping unknown component index {index}");
            continue;
        };
        for entity in entities.clone() {
            pool.collect(registry, entity);
        }
    }
    pools.retain(|p| !p.is_empty());
    pools
}

/// Apply pools to a registry, accepting every entry.
pub fn apply_pools(registry: &mut Registry, pools: &[ComponentPool]) {
    for pool in pools {
        pool.apply(registry, &|_, _| true);
    }
}

/// Derive the non-replicated companions of freshly imported entities:
/// inverse mass and inertia, world inertia, AABBs, graph nodes for bodies
/// and graph edges for constraints. Optionally attaches a discontinuity
/// record to dynamic bodies, which client-side imports require.
pub fn finalize_imported(
    registry: &mut Registry,
    graph: &mut crate::graph::EntityGraph,
    entities: &[Entity],
    with_discontinuity: bool,
) {
    use crate::components::{Discontinuity, GraphEdge, GraphNode};
    use crate::math::{rotate_inertia_inv, SCALAR_MAX};
    use crate::shapes::shape_aabb;

    for &entity in entities {
        if !registry.is_valid(entity) {
            continue;
        }
        let dynamic = registry.dynamic_tag.contains(entity);

        if let Some(&mass) = registry.mass.get(entity) {
            let inv = if dynamic && mass < SCALAR_MAX {
                1.0 / mass
            } else {
                0.0
            };
            registry.mass_inv.insert_silent(entity, inv);
        }

        if let Some(&inertia) = registry.inertia.get(entity) {
            let inv = if dynamic {
                inertia.inverse_symmetric()
            } else {
                Matrix3::ZERO
            };
            let orn = registry
                .orientation
                .get(entity)
                .copied()
                .unwrap_or(Quaternion::IDENTITY);
            registry.inertia_inv.insert_silent(entity, inv);
            registry
                .inertia_world_inv
                .insert_silent(entity, rotate_inertia_inv(&inv, orn));
        }

        if let (Some(shape), Some(&orn)) =
            (registry.shape.get(entity), registry.orientation.get(entity))
        {
            let origin = registry.body_origin(entity);
            let aabb = shape_aabb(shape, origin, orn);
            registry.aabb.insert_silent(entity, aabb);
        }

        if with_discontinuity && dynamic && !registry.discontinuity.contains(entity) {
            registry
                .discontinuity
                .insert_silent(entity, Discontinuity::default());
        }

        let is_body = registry.position.contains(entity)
            && (dynamic
                || registry.static_tag.contains(entity)
                || registry.kinematic_tag.contains(entity));
        if is_body && !registry.graph_node.contains(entity) {
            let non_connecting = !registry.procedural_tag.contains(entity);
            let node_index = graph.insert_node(entity, non_connecting);
            registry
                .graph_node
                .insert_silent(entity, GraphNode { node_index });
        }
    }

    // Edges after nodes, so both endpoints resolve.
    for &entity in entities {
        if !registry.is_valid(entity) || registry.graph_edge.contains(entity) {
            continue;
        }
        let Some(con) = registry.constraint.get(entity).copied() else {
            continue;
        };
        let (Some(node_a), Some(node_b)) = (
            registry.graph_node.get(con.body[0]).copied(),
            registry.graph_node.get(con.body[1]).copied(),
        ) else {
            continue;
        };
        let edge_index = graph.insert_edge(entity, node_a.node_index, node_b.node_index);
        registry
            .graph_edge
            .insert_silent(entity, GraphEdge { edge_index });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_apply_round_trip() {
        let mut registry = Registry::new();
        let e = registry.create();
        registry.position.insert(e, Vector3::new(1.0, 2.0, 3.0));
        registry.linvel.insert(e, Vector3::UNIT_X);
        registry.dynamic_tag.insert(e, Tag);

        let pools = export_pools(
            &registry,
            [e],
            &[
                component_index::POSITION,
                component_index::LINVEL,
                component_index::DYNAMIC_TAG,
            ],
        );
        assert_eq!(pools.len(), 3);

        let mut other = Registry::new();
        let local = other.create();
        let mut map = EntityMap::new();
        map.insert(e, local);

        let mut pools = pools;
        for pool in &mut pools {
            pool.map_entities(&map);
        }
        apply_pools(&mut other, &pools);

        assert_eq!(other.position.get(local).unwrap().y, 2.0);
        assert!(other.dynamic_tag.contains(local));
    }

    #[test]
    fn test_unknown_entities_dropped_on_remap() {
        let mut registry = Registry::new();
        let known = registry.create();
        let unknown = registry.create();
        registry.mass.insert(known, 1.0);
        registry.mass.insert(unknown, 2.0);

        let mut pool = export_pools(&registry, [known, unknown], &[component_index::MASS])
            .pop()
            .unwrap();

        let mut other = Registry::new();
        let local = other.create();
        let mut map = EntityMap::new();
        map.insert(known, local);

        let dropped = pool.map_entities(&map);
        assert_eq!(dropped, 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_constraint_pool_remaps_nested_bodies() {
        use crate::constraint::{ConstraintKind, PointConstraint};

        let mut registry = Registry::new();
        let a = registry.create();
        let b = registry.create();
        let c = registry.create();
        registry.constraint.insert(
            c,
            Constraint::new(a, b, ConstraintKind::Point(PointConstraint::default())),
        );

        let mut pool = export_pools(&registry, [c], &[component_index::CONSTRAINT])
            .pop()
            .unwrap();

        let mut other = Registry::new();
        let la = other.create();
        let lb = other.create();
        let lc = other.create();
        let mut map = EntityMap::new();
        map.insert(a, la);
        map.insert(b, lb);
        map.insert(c, lc);

        assert_eq!(pool.map_entities(&map), 0);
        if let ComponentPool::Constraint(pairs) = &pool {
            assert_eq!(pairs[0].1.body, [la, lb]);
        } else {
            panic!("wrong pool kind");
        }
    }

    #[test]
    fn test_constraint_with_unknown_body_dropped() {
        use crate::constraint::{ConstraintKind, PointConstraint};

        let mut registry = Registry::new();
        let a = registry.create();
        let b = registry.create();
        let c = registry.create();
        registry.constraint.insert(
            c,
            Constraint::new(a, b, ConstraintKind::Point(PointConstraint::default())),
        );

        let mut pool = export_pools(&registry, [c], &[component_index::CONSTRAINT])
            .pop()
            .unwrap();

        let mut other = Registry::new();
        let lc = other.create();
        let la = other.create();
        let mut map = EntityMap::new();
        map.insert(c, lc);
        map.insert(a, la);
        // b unmapped.

        assert_eq!(pool.map_entities(&map), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_snapshot_sort_pools() {
        let mut snapshot = RegistrySnapshot {
            timestamp: 0.0,
            entities: Vec::new(),
            pools: vec![
                ComponentPool::DynamicTag(Vec::new()),
                ComponentPool::Position(Vec::new()),
            ],
        };
        snapshot.sort_pools();
        assert_eq!(snapshot.pools[0].component_index(), 0);
    }

    #[test]
    fn test_unknown_index_skipped() {
        let registry = Registry::new();
        let pools = export_pools(&registry, Vec::<Entity>::new(), &[999]);
        assert!(pools.is_empty());
    }
}
