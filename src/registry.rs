//! Entity Registry
//!
//! Central store mapping opaque entity handles to component records.
//! Components are plain values held in sparse-set storages, one per
//! component type; all behavior lives in systems that iterate storages
//! filtered by presence.
//!
//! # Handles
//!
//! [`Entity`] packs an index and a version. Destroying an entity bumps the
//! version of its slot, so stale handles held elsewhere (graph edges,
//! manifold points, network maps) can be detected on access instead of
//! aliasing a recycled slot.
//!
//! # Write tracking
//!
//! Each storage keeps an event log of entities whose component was
//! inserted or replaced through the tracked mutation paths. The network
//! exporter drains these logs to build its per-entity modified-component
//! records; importers clear the logs after applying remote state so their
//! own writes never echo back out.

use crate::components::{
    ActionHistory, CollisionFilter, Discontinuity, EntityOwner, GraphEdge, GraphNode,
    IslandResident, NetworkInput,
};
use crate::constraint::Constraint;
use crate::material::Material;
use crate::island::Island;
use crate::manifold::{ContactManifold, ContactPoint};
use crate::math::{Matrix3, Quaternion, Scalar, Vector3};
use crate::shapes::{Aabb, Shape};
use serde::{Deserialize, Serialize};

/// Opaque entity handle: slot index plus version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    index: u32,
    version: u32,
}

impl Entity {
    /// The distinguished null handle. Never refers to a live entity.
    pub const fn null() -> Self {
        Self {
            index: u32::MAX,
            version: 0,
        }
    }

    /// Whether this is the null handle.
    #[inline]
    pub fn is_null(self) -> bool {
        self.index == u32::MAX
    }

    /// Slot index of this handle.
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Version of this handle.
    #[inline]
    pub fn version(self) -> u32 {
        self.version
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::null()
    }
}

// ============================================================================
// Sparse-set component storage
// ============================================================================

const TOMBSTONE: u32 = u32::MAX;

/// Sparse-set storage for one component type.
///
/// Dense arrays keep iteration cache-friendly; the sparse array maps entity
/// slots to dense positions. Removal swaps with the last element.
#[derive(Clone, Debug)]
pub struct ComponentStorage<T> {
    sparse: Vec<u32>,
    entities: Vec<Entity>,
    data: Vec<T>,
    events: Vec<Entity>,
}

impl<T> Default for ComponentStorage<T> {
    fn default() -> Self {
        Self {
            sparse: Vec::new(),
            entities: Vec::new(),
            data: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl<T> ComponentStorage<T> {
    fn dense_index(&self, entity: Entity) -> Option<usize> {
        let slot = entity.index as usize;
        if slot >= self.sparse.len() {
            return None;
        }
        let dense = self.sparse[slot];
        if dense == TOMBSTONE {
            return None;
        }
        // Version check guards against recycled slots.
        if self.entities[dense as usize] != entity {
            return None;
        }
        Some(dense as usize)
    }

    /// Whether `entity` has this component.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.dense_index(entity).is_some()
    }

    /// Insert or replace the component for `entity`, logging a write event.
    /// Returns the previous value when replacing.
    pub fn insert(&mut self, entity: Entity, value: T) -> Option<T> {
        self.events.push(entity);
        self.insert_silent(entity, value)
    }

    /// Insert or replace without logging a write event. Used by systems
    /// whose output is already covered by the always-sent body pools.
    pub fn insert_silent(&mut self, entity: Entity, value: T) -> Option<T> {
        if let Some(dense) = self.dense_index(entity) {
            return Some(core::mem::replace(&mut self.data[dense], value));
        }
        let slot = entity.index as usize;
        if slot >= self.sparse.len() {
            self.sparse.resize(slot + 1, TOMBSTONE);
        }
        self.sparse[slot] = self.entities.len() as u32;
        self.entities.push(entity);
        self.data.push(value);
        None
    }

    /// Shared access to the component of `entity`.
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.dense_index(entity).map(|i| &self.data[i])
    }

    /// Exclusive access to the component of `entity`. Does not log a write
    /// event; use [`ComponentStorage::patch`] for tracked mutation.
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.dense_index(entity).map(|i| &mut self.data[i])
    }

    /// Mutate in place through `f` and log a write event.
    pub fn patch(&mut self, entity: Entity, f: impl FnOnce(&mut T)) -> bool {
        if let Some(i) = self.dense_index(entity) {
            f(&mut self.data[i]);
            self.events.push(entity);
            true
        } else {
            false
        }
    }

    /// Remove the component of `entity`, returning it.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let dense = self.dense_index(entity)?;
        let last = self.entities.len() - 1;
        self.entities.swap(dense, last);
        self.data.swap(dense, last);
        let moved = self.entities[dense];
        self.sparse[moved.index as usize] = dense as u32;
        self.sparse[entity.index as usize] = TOMBSTONE;
        self.entities.pop();
        Some(self.data.pop().unwrap())
    }

    /// Number of stored components.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the storage is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate `(entity, &component)` pairs in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.entities.iter().copied().zip(self.data.iter())
    }

    /// Iterate `(entity, &mut component)` pairs in dense order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.entities.iter().copied().zip(self.data.iter_mut())
    }

    /// Entities holding this component, in dense order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Drain the write-event log.
    pub fn take_events(&mut self) -> Vec<Entity> {
        core::mem::take(&mut self.events)
    }

    /// Discard the write-event log.
    pub fn clear_events(&mut self) {
        self.events.clear();
    }
}

/// Marker payload for tag components.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag;

/// Storage of a zero-sized tag component.
pub type TagStorage = ComponentStorage<Tag>;

// ============================================================================
// Registry
// ============================================================================

#[derive(Default)]
struct EntityAllocator {
    versions: Vec<u32>,
    free: Vec<u32>,
}

impl EntityAllocator {
    fn create(&mut self) -> Entity {
        if let Some(index) = self.free.pop() {
            Entity {
                index,
                version: self.versions[index as usize],
            }
        } else {
            let index = self.versions.len() as u32;
            self.versions.push(0);
            Entity { index, version: 0 }
        }
    }

    fn destroy(&mut self, entity: Entity) -> bool {
        let slot = entity.index as usize;
        if slot >= self.versions.len() || self.versions[slot] != entity.version {
            return false;
        }
        self.versions[slot] = self.versions[slot].wrapping_add(1);
        self.free.push(entity.index);
        true
    }

    fn is_valid(&self, entity: Entity) -> bool {
        let slot = entity.index as usize;
        !entity.is_null() && slot < self.versions.len() && self.versions[slot] == entity.version
    }
}

/// Central component store. One storage field per component type; the set
/// is closed, which is what gives networked components their stable pool
/// indices.
#[derive(Default)]
pub struct Registry {
    alloc: EntityAllocator,

    /// World-space center of mass.
    pub position: ComponentStorage<Vector3>,
    /// World-space orientation.
    pub orientation: ComponentStorage<Quaternion>,
    /// Linear velocity.
    pub linvel: ComponentStorage<Vector3>,
    /// Angular velocity.
    pub angvel: ComponentStorage<Vector3>,
    /// Persistent linear acceleration (e.g. gravity).
    pub linacc: ComponentStorage<Vector3>,
    /// Scalar mass.
    pub mass: ComponentStorage<Scalar>,
    /// Inverse mass, kept in sync with `mass`.
    pub mass_inv: ComponentStorage<Scalar>,
    /// Body-frame inertia tensor.
    pub inertia: ComponentStorage<Matrix3>,
    /// Body-frame inverse inertia tensor.
    pub inertia_inv: ComponentStorage<Matrix3>,
    /// World-space inverse inertia tensor, refreshed on rotation.
    pub inertia_world_inv: ComponentStorage<Matrix3>,
    /// World-space axis-aligned bounds.
    pub aabb: ComponentStorage<Aabb>,
    /// Collision geometry (closed shape variant).
    pub shape: ComponentStorage<Shape>,
    /// Shape origin offset from the center of mass, world space.
    pub origin: ComponentStorage<Vector3>,
    /// Group/mask collision filter.
    pub collision_filter: ComponentStorage<CollisionFilter>,
    /// Surface material.
    pub material: ComponentStorage<Material>,
    /// Entity graph node handle.
    pub graph_node: ComponentStorage<GraphNode>,
    /// Entity graph edge handle.
    pub graph_edge: ComponentStorage<GraphEdge>,
    /// Interpolated position for presentation.
    pub present_position: ComponentStorage<Vector3>,
    /// Interpolated orientation for presentation.
    pub present_orientation: ComponentStorage<Quaternion>,
    /// Pose delta accumulated from authoritative corrections.
    pub discontinuity: ComponentStorage<Discontinuity>,
    /// Persistent contact manifold (one per interacting pair).
    pub manifold: ComponentStorage<ContactManifold>,
    /// Individual contact point records.
    pub contact_point: ComponentStorage<ContactPoint>,
    /// Constraints (tagged variant).
    pub constraint: ComponentStorage<Constraint>,
    /// Island records, held by island entities.
    pub island: ComponentStorage<Island>,
    /// Which island a procedural entity currently belongs to.
    pub island_resident: ComponentStorage<IslandResident>,
    /// Owning client of a networked entity.
    pub entity_owner: ComponentStorage<EntityOwner>,
    /// Timestamped action log exported to the server.
    pub action_history: ComponentStorage<ActionHistory>,
    /// Opaque per-entity network input payload.
    pub network_input: ComponentStorage<NetworkInput>,

    /// Dynamic rigid body tag.
    pub dynamic_tag: TagStorage,
    /// Kinematic rigid body tag.
    pub kinematic_tag: TagStorage,
    /// Static rigid body tag.
    pub static_tag: TagStorage,
    /// Connecting-node tag: entity participates in island connectivity.
    pub procedural_tag: TagStorage,
    /// Entity is asleep.
    pub sleeping_tag: TagStorage,
    /// Entity's islands never sleep.
    pub sleeping_disabled_tag: TagStorage,
    /// Entity is excluded from simulation.
    pub disabled_tag: TagStorage,
    /// Manifolds of this body keep points across small separations.
    pub continuous_contacts_tag: TagStorage,
    /// Entity is replicated over the network.
    pub networked_tag: TagStorage,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh entity with no components.
    pub fn create(&mut self) -> Entity {
        self.alloc.create()
    }

    /// Whether `entity` refers to a live entity.
    pub fn is_valid(&self, entity: Entity) -> bool {
        self.alloc.is_valid(entity)
    }

    /// Destroy `entity` and remove all of its components.
    ///
    /// Returns false for stale handles; nothing is touched in that case.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.alloc.destroy(entity) {
            return false;
        }
        self.position.remove(entity);
        self.orientation.remove(entity);
        self.linvel.remove(entity);
        self.angvel.remove(entity);
        self.linacc.remove(entity);
        self.mass.remove(entity);
        self.mass_inv.remove(entity);
        self.inertia.remove(entity);
        self.inertia_inv.remove(entity);
        self.inertia_world_inv.remove(entity);
        self.aabb.remove(entity);
        self.shape.remove(entity);
        self.origin.remove(entity);
        self.collision_filter.remove(entity);
        self.material.remove(entity);
        self.graph_node.remove(entity);
        self.graph_edge.remove(entity);
        self.present_position.remove(entity);
        self.present_orientation.remove(entity);
        self.discontinuity.remove(entity);
        self.manifold.remove(entity);
        self.contact_point.remove(entity);
        self.constraint.remove(entity);
        self.island.remove(entity);
        self.island_resident.remove(entity);
        self.entity_owner.remove(entity);
        self.action_history.remove(entity);
        self.network_input.remove(entity);
        self.dynamic_tag.remove(entity);
        self.kinematic_tag.remove(entity);
        self.static_tag.remove(entity);
        self.procedural_tag.remove(entity);
        self.sleeping_tag.remove(entity);
        self.sleeping_disabled_tag.remove(entity);
        self.disabled_tag.remove(entity);
        self.continuous_contacts_tag.remove(entity);
        self.networked_tag.remove(entity);
        true
    }

    /// Discard all pending write events, in every storage.
    ///
    /// Importers call this after applying remote state so the exporter does
    /// not echo those writes back to their source.
    pub fn clear_modification_events(&mut self) {
        self.position.clear_events();
        self.orientation.clear_events();
        self.linvel.clear_events();
        self.angvel.clear_events();
        self.linacc.clear_events();
        self.mass.clear_events();
        self.mass_inv.clear_events();
        self.inertia.clear_events();
        self.inertia_inv.clear_events();
        self.inertia_world_inv.clear_events();
        self.aabb.clear_events();
        self.shape.clear_events();
        self.origin.clear_events();
        self.collision_filter.clear_events();
        self.material.clear_events();
        self.graph_node.clear_events();
        self.graph_edge.clear_events();
        self.present_position.clear_events();
        self.present_orientation.clear_events();
        self.discontinuity.clear_events();
        self.manifold.clear_events();
        self.contact_point.clear_events();
        self.constraint.clear_events();
        self.island.clear_events();
        self.island_resident.clear_events();
        self.entity_owner.clear_events();
        self.action_history.clear_events();
        self.network_input.clear_events();
    }

    /// Whether the entity has positive finite mass and a dynamic tag.
    pub fn is_dynamic(&self, entity: Entity) -> bool {
        self.dynamic_tag.contains(entity)
    }

    /// Whether the entity is kinematic.
    pub fn is_kinematic(&self, entity: Entity) -> bool {
        self.kinematic_tag.contains(entity)
    }

    /// Whether the entity is static.
    pub fn is_static(&self, entity: Entity) -> bool {
        self.static_tag.contains(entity)
    }

    /// Whether the entity is currently asleep.
    pub fn is_sleeping(&self, entity: Entity) -> bool {
        self.sleeping_tag.contains(entity)
    }

    /// Body transform, `origin` when present, else `position`.
    ///
    /// Narrowphase and constraint preparation use this as the shape frame.
    pub fn body_origin(&self, entity: Entity) -> Vector3 {
        self.origin
            .get(entity)
            .or_else(|| self.position.get(entity))
            .copied()
            .unwrap_or(Vector3::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_create_destroy_versioning() {
        let mut registry = Registry::new();
        let a = registry.create();
        assert!(registry.is_valid(a));
        assert!(registry.destroy(a));
        assert!(!registry.is_valid(a));

        // Slot is recycled with a bumped version; the old handle stays dead.
        let b = registry.create();
        assert_eq!(a.index(), b.index());
        assert_ne!(a.version(), b.version());
        assert!(registry.is_valid(b));
        assert!(!registry.is_valid(a));
    }

    #[test]
    fn test_null_entity_is_never_valid() {
        let registry = Registry::new();
        assert!(!registry.is_valid(Entity::null()));
        assert!(Entity::null().is_null());
    }

    #[test]
    fn test_storage_insert_get_remove() {
        let mut registry = Registry::new();
        let e = registry.create();
        registry.position.insert(e, Vector3::new(1.0, 2.0, 3.0));
        assert!(registry.position.contains(e));
        assert_eq!(registry.position.get(e).unwrap().y, 2.0);

        let removed = registry.position.remove(e).unwrap();
        assert_eq!(removed.y, 2.0);
        assert!(!registry.position.contains(e));
    }

    #[test]
    fn test_stale_handle_does_not_alias_recycled_slot() {
        let mut registry = Registry::new();
        let a = registry.create();
        registry.position.insert(a, Vector3::UNIT_X);
        registry.destroy(a);

        let b = registry.create();
        registry.position.insert(b, Vector3::UNIT_Y);

        // The stale handle must not see b's component.
        assert!(registry.position.get(a).is_none());
        assert_eq!(registry.position.get(b).unwrap().y, 1.0);
    }

    #[test]
    fn test_swap_remove_keeps_dense_mapping() {
        let mut registry = Registry::new();
        let entities: Vec<_> = (0..4).map(|_| registry.create()).collect();
        for (i, &e) in entities.iter().enumerate() {
            registry.mass.insert(e, i as Scalar);
        }
        registry.mass.remove(entities[1]);
        assert_eq!(*registry.mass.get(entities[3]).unwrap(), 3.0);
        assert_eq!(registry.mass.len(), 3);
    }

    #[test]
    fn test_write_events_logged_and_cleared() {
        let mut registry = Registry::new();
        let e = registry.create();
        registry.linvel.insert(e, Vector3::ZERO);
        registry.linvel.patch(e, |v| v.x = 5.0);
        let events = registry.linvel.take_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|&ev| ev == e));

        registry.linvel.insert(e, Vector3::ZERO);
        registry.clear_modification_events();
        assert!(registry.linvel.take_events().is_empty());
    }

    #[test]
    fn test_insert_silent_skips_event_log() {
        let mut registry = Registry::new();
        let e = registry.create();
        registry.position.insert_silent(e, Vector3::ZERO);
        assert!(registry.position.take_events().is_empty());
    }

    #[test]
    fn test_destroy_removes_all_components() {
        let mut registry = Registry::new();
        let e = registry.create();
        registry.position.insert(e, Vector3::ZERO);
        registry.dynamic_tag.insert(e, Tag);
        registry.destroy(e);
        assert!(!registry.position.contains(e));
        assert!(!registry.dynamic_tag.contains(e));
    }
}
