//! Broadphase Pair Generation
//!
//! Incremental fat-AABB tree over all bodies with shapes, plus pair
//! bookkeeping that turns AABB overlap transitions into contact manifold
//! lifecycle events.
//!
//! AABBs are tested inset by `-contact_breaking_threshold`, so a manifold
//! is created slightly before true overlap and survives small separations;
//! it is destroyed only once the pair separates beyond the manifold's
//! `separation_threshold`. The manifold entity doubles as the pair's edge
//! in the entity graph.
//!
//! Each island worker owns its own broadphase; the tree is never shared
//! across threads.

use crate::components::{CollisionFilter, GraphEdge};
use crate::graph::EntityGraph;
use crate::manifold::{destroy_manifold, ContactManifold, CONTACT_BREAKING_THRESHOLD};
use crate::math::Vector3;
use crate::registry::{Entity, Registry};
use crate::shapes::{shape_aabb, Aabb};
use std::collections::HashMap;

const NULL_NODE: u32 = u32::MAX;

/// AABB fattening margin for tree proxies; larger margins mean fewer
/// re-insertions for moving bodies.
const FAT_MARGIN: f64 = 0.1;

#[derive(Clone, Debug)]
struct TreeNode {
    aabb: Aabb,
    parent: u32,
    left: u32,
    right: u32,
    entity: Entity,
    is_leaf: bool,
}

impl TreeNode {
    fn new_leaf(aabb: Aabb, entity: Entity) -> Self {
        Self {
            aabb,
            parent: NULL_NODE,
            left: NULL_NODE,
            right: NULL_NODE,
            entity,
            is_leaf: true,
        }
    }

    fn new_internal() -> Self {
        Self {
            aabb: Aabb::default(),
            parent: NULL_NODE,
            left: NULL_NODE,
            right: NULL_NODE,
            entity: Entity::null(),
            is_leaf: false,
        }
    }
}

/// Incremental AABB tree with fat leaves.
#[derive(Clone, Debug, Default)]
pub struct AabbTree {
    nodes: Vec<TreeNode>,
    free_list: Vec<u32>,
    root: u32,
}

impl AabbTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_list: Vec::new(),
            root: NULL_NODE,
        }
    }

    fn alloc_node(&mut self, node: TreeNode) -> u32 {
        if let Some(index) = self.free_list.pop() {
            self.nodes[index as usize] = node;
            index
        } else {
            self.nodes.push(node);
            (self.nodes.len() - 1) as u32
        }
    }

    fn fatten(aabb: Aabb) -> Aabb {
        aabb.inset(Vector3::splat(-FAT_MARGIN))
    }

    /// Insert a leaf, returns the proxy id.
    pub fn insert(&mut self, aabb: Aabb, entity: Entity) -> u32 {
        let leaf = self.alloc_node(TreeNode::new_leaf(Self::fatten(aabb), entity));
        self.insert_leaf(leaf);
        leaf
    }

    /// Remove a proxy.
    pub fn remove(&mut self, proxy: u32) {
        if (proxy as usize) < self.nodes.len() {
            self.remove_leaf(proxy);
            self.free_list.push(proxy);
        }
    }

    /// Update a proxy's AABB. Re-inserts only when the tight AABB escaped
    /// the stored fat AABB. Returns whether the tree changed.
    pub fn update(&mut self, proxy: u32, aabb: Aabb) -> bool {
        if (proxy as usize) >= self.nodes.len() {
            return false;
        }
        if self.nodes[proxy as usize].aabb.contains(&aabb) {
            return false;
        }
        self.remove_leaf(proxy);
        self.nodes[proxy as usize].aabb = Self::fatten(aabb);
        self.insert_leaf(proxy);
        true
    }

    fn insert_leaf(&mut self, leaf: u32) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        // Walk down picking the child whose merged surface grows least.
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut index = self.root;
        while !self.nodes[index as usize].is_leaf {
            let left = self.nodes[index as usize].left;
            let right = self.nodes[index as usize].right;
            let cost = |child: u32, nodes: &[TreeNode]| {
                let merged = nodes[child as usize].aabb.merge(&leaf_aabb);
                surface(&merged) - surface(&nodes[child as usize].aabb)
            };
            index = if cost(left, &self.nodes) <= cost(right, &self.nodes) {
                left
            } else {
                right
            };
        }

        // Split the chosen sibling with a fresh internal parent.
        let sibling = index;
        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.alloc_node(TreeNode::new_internal());
        self.nodes[new_parent as usize].parent = old_parent;
        self.nodes[new_parent as usize].aabb =
            self.nodes[sibling as usize].aabb.merge(&leaf_aabb);
        self.nodes[new_parent as usize].left = sibling;
        self.nodes[new_parent as usize].right = leaf;
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        if old_parent == NULL_NODE {
            self.root = new_parent;
        } else if self.nodes[old_parent as usize].left == sibling {
            self.nodes[old_parent as usize].left = new_parent;
        } else {
            self.nodes[old_parent as usize].right = new_parent;
        }

        self.refit_upward(new_parent);
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if self.root == leaf {
            self.root = NULL_NODE;
            return;
        }
        let parent = self.nodes[leaf as usize].parent;
        if parent == NULL_NODE {
            return;
        }
        let grandparent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].left == leaf {
            self.nodes[parent as usize].right
        } else {
            self.nodes[parent as usize].left
        };

        if grandparent == NULL_NODE {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL_NODE;
        } else {
            if self.nodes[grandparent as usize].left == parent {
                self.nodes[grandparent as usize].left = sibling;
            } else {
                self.nodes[grandparent as usize].right = sibling;
            }
            self.nodes[sibling as usize].parent = grandparent;
            self.refit_upward(grandparent);
        }
        self.free_list.push(parent);
        self.nodes[leaf as usize].parent = NULL_NODE;
    }

    fn refit_upward(&mut self, mut index: u32) {
        while index != NULL_NODE {
            let left = self.nodes[index as usize].left;
            let right = self.nodes[index as usize].right;
            if left != NULL_NODE && right != NULL_NODE {
                self.nodes[index as usize].aabb = self.nodes[left as usize]
                    .aabb
                    .merge(&self.nodes[right as usize].aabb);
            }
            index = self.nodes[index as usize].parent;
        }
    }

    /// Visit every leaf whose fat AABB overlaps `aabb`.
    pub fn query(&self, aabb: &Aabb, mut callback: impl FnMut(Entity)) {
        if self.root == NULL_NODE {
            return;
        }
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if !node.aabb.intersects(aabb) {
                continue;
            }
            if node.is_leaf {
                callback(node.entity);
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }
}

fn surface(aabb: &Aabb) -> f64 {
    let d = aabb.max - aabb.min;
    2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
}

/// Manifold lifecycle events from one broadphase update.
#[derive(Clone, Debug, Default)]
pub struct BroadphaseResult {
    /// Manifold entities created this update.
    pub created_manifolds: Vec<Entity>,
    /// Destroyed manifolds and the body pairs they connected.
    pub destroyed_manifolds: Vec<(Entity, [Entity; 2])>,
}

/// Broadphase state for one registry: the AABB tree plus the set of active
/// pairs and their manifold entities.
#[derive(Default)]
pub struct Broadphase {
    tree: AabbTree,
    proxies: HashMap<Entity, u32>,
    pairs: HashMap<(Entity, Entity), Entity>,
}

fn pair_key(a: Entity, b: Entity) -> (Entity, Entity) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Broadphase {
    /// Create an empty broadphase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Manifold entity of an active pair, if any.
    pub fn manifold_of(&self, a: Entity, b: Entity) -> Option<Entity> {
        self.pairs.get(&pair_key(a, b)).copied()
    }

    /// Number of active pairs.
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Refresh AABBs, update the tree and emit manifold lifecycle events.
    ///
    /// `should_collide` gates pair creation; the default policy checks
    /// collision filters and rejects pairs without a dynamic body.
    pub fn update(
        &mut self,
        registry: &mut Registry,
        graph: &mut EntityGraph,
        should_collide: &dyn Fn(&Registry, Entity, Entity) -> bool,
    ) -> BroadphaseResult {
        let mut result = BroadphaseResult::default();

        // Refresh AABBs and tree proxies.
        let bodies: Vec<Entity> = registry.shape.entities().to_vec();
        for entity in &bodies {
            let entity = *entity;
            let Some(shape) = registry.shape.get(entity) else {
                continue;
            };
            let Some(&orn) = registry.orientation.get(entity) else {
                continue;
            };
            let origin = registry.body_origin(entity);
            let aabb = shape_aabb(shape, origin, orn);
            registry.aabb.insert_silent(entity, aabb);

            match self.proxies.get(&entity) {
                Some(&proxy) => {
                    self.tree.update(proxy, aabb);
                }
                None => {
                    let proxy = self.tree.insert(aabb, entity);
                    self.proxies.insert(entity, proxy);
                }
            }
        }

        // Drop proxies of entities that no longer exist or lost their shape.
        let stale: Vec<Entity> = self
            .proxies
            .keys()
            .copied()
            .filter(|&e| !registry.is_valid(e) || !registry.shape.contains(e))
            .collect();
        for entity in stale {
            if let Some(proxy) = self.proxies.remove(&entity) {
                self.tree.remove(proxy);
            }
        }

        // Intersection start: create manifolds for fresh overlapping pairs.
        let offset = Vector3::splat(-CONTACT_BREAKING_THRESHOLD);
        for &entity in &bodies {
            let Some(&aabb) = registry.aabb.get(entity) else {
                continue;
            };
            let query_aabb = aabb.inset(offset);
            let mut candidates = Vec::new();
            self.tree.query(&query_aabb, |other| {
                if other != entity {
                    candidates.push(other);
                }
            });

            for other in candidates {
                let key = pair_key(entity, other);
                if self.pairs.contains_key(&key) {
                    continue;
                }
                let Some(&other_aabb) = registry.aabb.get(other) else {
                    continue;
                };
                // Tree AABBs are fat; confirm on the tight boxes.
                if !query_aabb.intersects(&other_aabb) {
                    continue;
                }
                if !should_collide(registry, key.0, key.1) {
                    continue;
                }
                let manifold_entity = self.create_manifold(registry, graph, key.0, key.1);
                self.pairs.insert(key, manifold_entity);
                result.created_manifolds.push(manifold_entity);
            }
        }

        // Intersection end: destroy manifolds whose pair separated beyond
        // the manifold's own separation threshold.
        let mut dead_pairs = Vec::new();
        for (&key, &manifold_entity) in &self.pairs {
            let (a, b) = key;
            let separation = registry
                .manifold
                .get(manifold_entity)
                .map(|m| m.separation_threshold)
                .unwrap_or(CONTACT_BREAKING_THRESHOLD);
            let alive = match (registry.aabb.get(a), registry.aabb.get(b)) {
                (Some(aabb_a), Some(aabb_b)) => aabb_a
                    .inset(Vector3::splat(-separation))
                    .intersects(aabb_b),
                _ => false,
            };
            if !alive {
                dead_pairs.push((key, manifold_entity));
            }
        }
        for (key, manifold_entity) in dead_pairs {
            self.pairs.remove(&key);
            if let Some(edge) = registry.graph_edge.get(manifold_entity).copied() {
                graph.remove_edge(edge.edge_index);
            }
            destroy_manifold(registry, manifold_entity);
            result
                .destroyed_manifolds
                .push((manifold_entity, [key.0, key.1]));
        }

        result
    }

    fn create_manifold(
        &mut self,
        registry: &mut Registry,
        graph: &mut EntityGraph,
        a: Entity,
        b: Entity,
    ) -> Entity {
        let manifold_entity = registry.create();
        let mut manifold = ContactManifold::new(a, b);
        if registry.continuous_contacts_tag.contains(a)
            || registry.continuous_contacts_tag.contains(b)
        {
            manifold.separation_threshold = CONTACT_BREAKING_THRESHOLD * 4.0;
        }
        registry.manifold.insert(manifold_entity, manifold);

        if let (Some(node_a), Some(node_b)) =
            (registry.graph_node.get(a), registry.graph_node.get(b))
        {
            let edge_index = graph.insert_edge(manifold_entity, node_a.node_index, node_b.node_index);
            registry
                .graph_edge
                .insert(manifold_entity, GraphEdge { edge_index });
        }
        manifold_entity
    }
}

/// Default collision gate: both filters must agree and at least one body
/// must be dynamic; disabled and sleeping-pair exclusions are handled by
/// the islands.
pub fn should_collide_default(registry: &Registry, a: Entity, b: Entity) -> bool {
    if registry.disabled_tag.contains(a) || registry.disabled_tag.contains(b) {
        return false;
    }
    if !registry.is_dynamic(a) && !registry.is_dynamic(b) {
        return false;
    }
    let fa = registry
        .collision_filter
        .get(a)
        .copied()
        .unwrap_or_default();
    let fb = registry
        .collision_filter
        .get(b)
        .copied()
        .unwrap_or_default();
    CollisionFilter::can_collide(&fa, &fb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Quaternion;
    use crate::registry::Tag;
    use crate::shapes::Shape;

    fn spawn_sphere(registry: &mut Registry, graph: &mut EntityGraph, pos: Vector3, dynamic: bool) -> Entity {
        let e = registry.create();
        registry.position.insert(e, pos);
        registry.orientation.insert(e, Quaternion::IDENTITY);
        registry.shape.insert(e, Shape::Sphere { radius: 0.5 });
        registry.collision_filter.insert(e, CollisionFilter::DEFAULT);
        if dynamic {
            registry.dynamic_tag.insert(e, Tag);
        } else {
            registry.static_tag.insert(e, Tag);
        }
        let node = graph.insert_node(e, !dynamic);
        registry
            .graph_node
            .insert(e, crate::components::GraphNode { node_index: node });
        e
    }

    #[test]
    fn test_overlapping_pair_creates_manifold_edge() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let mut broadphase = Broadphase::new();

        let a = spawn_sphere(&mut registry, &mut graph, Vector3::ZERO, true);
        let b = spawn_sphere(&mut registry, &mut graph, Vector3::new(0.9, 0.0, 0.0), true);

        let result = broadphase.update(&mut registry, &mut graph, &should_collide_default);
        assert_eq!(result.created_manifolds.len(), 1);
        assert!(broadphase.manifold_of(a, b).is_some());
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_separation_destroys_manifold() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let mut broadphase = Broadphase::new();

        let a = spawn_sphere(&mut registry, &mut graph, Vector3::ZERO, true);
        let _b = spawn_sphere(&mut registry, &mut graph, Vector3::new(0.9, 0.0, 0.0), true);
        broadphase.update(&mut registry, &mut graph, &should_collide_default);
        assert_eq!(broadphase.pair_count(), 1);

        registry.position.insert(a, Vector3::new(10.0, 0.0, 0.0));
        let result = broadphase.update(&mut registry, &mut graph, &should_collide_default);
        assert_eq!(result.destroyed_manifolds.len(), 1);
        assert_eq!(broadphase.pair_count(), 0);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_manifold_survives_small_separation() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let mut broadphase = Broadphase::new();

        let a = spawn_sphere(&mut registry, &mut graph, Vector3::ZERO, true);
        let _b = spawn_sphere(&mut registry, &mut graph, Vector3::new(0.99, 0.0, 0.0), true);
        broadphase.update(&mut registry, &mut graph, &should_collide_default);
        assert_eq!(broadphase.pair_count(), 1);

        // Separate slightly, inside the separation threshold.
        registry.position.insert(a, Vector3::new(-0.015, 0.0, 0.0));
        broadphase.update(&mut registry, &mut graph, &should_collide_default);
        assert_eq!(broadphase.pair_count(), 1);
    }

    #[test]
    fn test_static_pair_not_created() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let mut broadphase = Broadphase::new();

        spawn_sphere(&mut registry, &mut graph, Vector3::ZERO, false);
        spawn_sphere(&mut registry, &mut graph, Vector3::new(0.5, 0.0, 0.0), false);

        let result = broadphase.update(&mut registry, &mut graph, &should_collide_default);
        assert!(result.created_manifolds.is_empty());
    }

    #[test]
    fn test_filter_blocks_pair() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let mut broadphase = Broadphase::new();

        let a = spawn_sphere(&mut registry, &mut graph, Vector3::ZERO, true);
        let b = spawn_sphere(&mut registry, &mut graph, Vector3::new(0.5, 0.0, 0.0), true);
        registry
            .collision_filter
            .insert(a, CollisionFilter::new(0b01, 0b01));
        registry
            .collision_filter
            .insert(b, CollisionFilter::new(0b10, 0b10));

        let result = broadphase.update(&mut registry, &mut graph, &should_collide_default);
        assert!(result.created_manifolds.is_empty());
    }

    #[test]
    fn test_tree_query_finds_neighbors() {
        let mut tree = AabbTree::new();
        let mut registry = Registry::new();
        let e1 = registry.create();
        let e2 = registry.create();
        tree.insert(
            Aabb::new(Vector3::ZERO, Vector3::ONE),
            e1,
        );
        tree.insert(
            Aabb::new(Vector3::splat(10.0), Vector3::splat(11.0)),
            e2,
        );

        let mut hits = Vec::new();
        tree.query(&Aabb::new(Vector3::splat(0.4), Vector3::splat(0.6)), |e| {
            hits.push(e)
        });
        assert_eq!(hits, vec![e1]);
    }
}
