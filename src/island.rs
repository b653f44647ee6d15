//! Island Coordination
//!
//! Groups connected procedural bodies into islands, the unit of parallel
//! dispatch, and keeps the partition consistent as graph edges come and
//! go: edge insertion merges islands (the smaller migrates into the
//! larger), edge removal marks the island dirty for a split re-scan at the
//! next refresh. Non-connecting bodies (static, kinematic) belong to any
//! number of islands without uniting them.
//!
//! Islands also carry the sleep state: when every member's kinetic energy
//! stays below a threshold for a dwell interval, the whole island is put
//! to sleep and skipped by the solver pipeline until something touches it.

use crate::graph::EntityGraph;
use crate::math::Scalar;
use crate::registry::{Entity, Registry, Tag};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Seconds of sustained low energy before an island sleeps.
pub const SLEEP_DWELL: Scalar = 0.25;

/// Kinetic energy proxy threshold for sleeping.
pub const SLEEP_ENERGY_EPSILON: Scalar = 0.005;

/// Weight of angular speed in the sleep energy proxy.
pub const SLEEP_ANGULAR_WEIGHT: Scalar = 0.2;

/// A connected component of procedural bodies. Stored on its own entity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Island {
    /// Procedural member entities.
    pub entities: Vec<Entity>,
    /// Simulation time of the last completed step.
    pub timestamp: Scalar,
    /// Accumulated low-energy dwell time.
    pub sleep_timer: Scalar,
}

/// Maintains the island partition and sleep state.
#[derive(Debug, Default)]
pub struct IslandCoordinator {
    dirty: HashSet<Entity>,
}

impl IslandCoordinator {
    /// Create a coordinator with no pending work.
    pub fn new() -> Self {
        Self::default()
    }

    /// Give every procedural body without a residency its own island.
    pub fn init_new_nodes(&mut self, registry: &mut Registry, time: Scalar) {
        let newcomers: Vec<Entity> = registry
            .procedural_tag
            .entities()
            .iter()
            .copied()
            .filter(|&e| !registry.island_resident.contains(e))
            .collect();

        for entity in newcomers {
            let island_entity = registry.create();
            registry.island.insert_silent(
                island_entity,
                Island {
                    entities: vec![entity],
                    timestamp: time,
                    sleep_timer: 0.0,
                },
            );
            registry.island_resident.insert_silent(
                entity,
                crate::components::IslandResident {
                    island: island_entity,
                },
            );
            log::debug!(
                "created island {}v{} for new node",
                island_entity.index(),
                island_entity.version()
            );
        }
    }

    /// React to a new edge (manifold or constraint) between two bodies:
    /// merge their islands when they differ, and wake everything touched.
    pub fn on_edge_created(&mut self, registry: &mut Registry, bodies: [Entity; 2]) {
        for body in bodies {
            wake_entity(registry, body);
        }

        let island_a = resident_island(registry, bodies[0]);
        let island_b = resident_island(registry, bodies[1]);
        let (Some(island_a), Some(island_b)) = (island_a, island_b) else {
            return; // At least one endpoint is non-connecting.
        };
        if island_a == island_b {
            return;
        }

        // Migrate the smaller island into the larger and destroy it.
        let len_a = registry.island.get(island_a).map_or(0, |i| i.entities.len());
        let len_b = registry.island.get(island_b).map_or(0, |i| i.entities.len());
        let (keep, drop) = if len_a >= len_b {
            (island_a, island_b)
        } else {
            (island_b, island_a)
        };

        let Some(drop_island) = registry.island.remove(drop) else {
            return;
        };
        for member in &drop_island.entities {
            registry.island_resident.insert_silent(
                *member,
                crate::components::IslandResident { island: keep },
            );
        }
        if let Some(keep_island) = registry.island.get_mut(keep) {
            keep_island.entities.extend(drop_island.entities);
            keep_island.sleep_timer = 0.0;
        }
        self.dirty.remove(&drop);
        registry.destroy(drop);
        log::debug!(
            "merged island {}v{} into {}v{}",
            drop.index(),
            drop.version(),
            keep.index(),
            keep.version()
        );
    }

    /// React to an edge removal: both endpoints' islands are re-scanned at
    /// the next refresh to detect a split.
    pub fn on_edge_removed(&mut self, registry: &mut Registry, bodies: [Entity; 2]) {
        for body in bodies {
            wake_entity(registry, body);
            if let Some(island) = resident_island(registry, body) {
                self.dirty.insert(island);
            }
        }
    }

    /// Process pending split re-scans and assign islands to new nodes.
    pub fn refresh(&mut self, registry: &mut Registry, graph: &EntityGraph, time: Scalar) {
        self.init_new_nodes(registry, time);

        let dirty: Vec<Entity> = self.dirty.drain().collect();
        for island_entity in dirty {
            self.rescan_island(registry, graph, island_entity, time);
        }
    }

    /// Re-scan one island: if its members are no longer one connected
    /// component, move each extra component into a fresh island.
    fn rescan_island(
        &mut self,
        registry: &mut Registry,
        graph: &EntityGraph,
        island_entity: Entity,
        time: Scalar,
    ) {
        let Some(island) = registry.island.get(island_entity) else {
            return;
        };
        let members: Vec<Entity> = island
            .entities
            .iter()
            .copied()
            .filter(|&e| {
                registry.is_valid(e)
                    && registry
                        .island_resident
                        .get(e)
                        .is_some_and(|r| r.island == island_entity)
            })
            .collect();

        if members.is_empty() {
            registry.island.remove(island_entity);
            registry.destroy(island_entity);
            log::debug!("destroyed empty island {}v{}", island_entity.index(), island_entity.version());
            return;
        }

        let member_set: HashSet<Entity> = members.iter().copied().collect();
        let mut assigned: HashSet<Entity> = HashSet::new();
        let mut components: Vec<Vec<Entity>> = Vec::new();

        for &seed in &members {
            if assigned.contains(&seed) {
                continue;
            }
            let Some(node) = registry.graph_node.get(seed) else {
                continue;
            };
            let mut component = Vec::new();
            graph.traverse(node.node_index, |node_index| {
                let entity = graph.node_entity(node_index);
                if member_set.contains(&entity) && !assigned.contains(&entity) {
                    assigned.insert(entity);
                    component.push(entity);
                }
            });
            if component.is_empty() {
                assigned.insert(seed);
                component.push(seed);
            }
            components.push(component);
        }

        if components.len() <= 1 {
            return;
        }

        // Keep the first component in place; every other becomes a new
        // island.
        let keep = components.remove(0);
        if let Some(island) = registry.island.get_mut(island_entity) {
            island.entities = keep;
            island.sleep_timer = 0.0;
        }
        for component in components {
            let new_entity = registry.create();
            for &member in &component {
                registry.island_resident.insert_silent(
                    member,
                    crate::components::IslandResident { island: new_entity },
                );
            }
            registry.island.insert_silent(
                new_entity,
                Island {
                    entities: component,
                    timestamp: time,
                    sleep_timer: 0.0,
                },
            );
            log::debug!(
                "split island {}v{} -> {}v{}",
                island_entity.index(),
                island_entity.version(),
                new_entity.index(),
                new_entity.version()
            );
        }
    }

    /// Advance sleep timers and put eligible islands to sleep.
    ///
    /// An island is eligible when every dynamic member's
    /// `|linvel|^2 + k * |angvel|^2` stays under the threshold for the
    /// dwell interval and no member disables sleeping.
    pub fn evaluate_sleep(&mut self, registry: &mut Registry, dt: Scalar) {
        let islands: Vec<Entity> = registry.island.entities().to_vec();
        for island_entity in islands {
            let Some(island) = registry.island.get(island_entity) else {
                continue;
            };
            if registry.sleeping_tag.contains(island_entity) {
                continue;
            }

            let mut eligible = true;
            for &member in &island.entities {
                if registry.sleeping_disabled_tag.contains(member) {
                    eligible = false;
                    break;
                }
                let linvel = registry.linvel.get(member).copied().unwrap_or_default();
                let angvel = registry.angvel.get(member).copied().unwrap_or_default();
                let energy = linvel.length_sqr() + SLEEP_ANGULAR_WEIGHT * angvel.length_sqr();
                if energy >= SLEEP_ENERGY_EPSILON {
                    eligible = false;
                    break;
                }
            }

            let island = registry.island.get_mut(island_entity).unwrap();
            if !eligible {
                island.sleep_timer = 0.0;
                continue;
            }
            island.sleep_timer += dt;
            if island.sleep_timer < SLEEP_DWELL {
                continue;
            }

            let members = island.entities.clone();
            registry.sleeping_tag.insert_silent(island_entity, Tag);
            for member in members {
                registry.sleeping_tag.insert_silent(member, Tag);
                registry.linvel.insert_silent(member, crate::math::Vector3::ZERO);
                registry.angvel.insert_silent(member, crate::math::Vector3::ZERO);
            }
            log::debug!(
                "island {}v{} went to sleep",
                island_entity.index(),
                island_entity.version()
            );
        }
    }

    /// Islands in deterministic dispatch order (by island entity handle).
    pub fn islands_in_order(registry: &Registry) -> Vec<Entity> {
        let mut islands: Vec<Entity> = registry.island.entities().to_vec();
        islands.sort_unstable();
        islands
    }
}

fn resident_island(registry: &Registry, entity: Entity) -> Option<Entity> {
    registry.island_resident.get(entity).map(|r| r.island)
}

/// Wake the island an entity belongs to. For non-connecting entities this
/// is a no-op; use [`wake_touching`] to reach their neighbors.
pub fn wake_entity(registry: &mut Registry, entity: Entity) {
    if let Some(island_entity) = resident_island(registry, entity) {
        wake_island(registry, island_entity);
    }
}

/// Wake every member of an island.
pub fn wake_island(registry: &mut Registry, island_entity: Entity) {
    let was_sleeping = registry.sleeping_tag.remove(island_entity).is_some();
    let Some(island) = registry.island.get_mut(island_entity) else {
        return;
    };
    island.sleep_timer = 0.0;
    let members = island.entities.clone();
    for member in members {
        registry.sleeping_tag.remove(member);
    }
    if was_sleeping {
        log::debug!(
            "island {}v{} woke up",
            island_entity.index(),
            island_entity.version()
        );
    }
}

/// Wake every island that touches `entity` through graph edges. This is
/// how perturbing a static or kinematic body reaches its neighbors.
pub fn wake_touching(registry: &mut Registry, graph: &EntityGraph, entity: Entity) {
    wake_entity(registry, entity);
    let Some(node) = registry.graph_node.get(entity).copied() else {
        return;
    };
    let mut neighbors = Vec::new();
    for &edge in graph.node_edges(node.node_index) {
        let (a, b) = graph.edge_node_entities(edge);
        neighbors.push(a);
        neighbors.push(b);
    }
    for neighbor in neighbors {
        wake_entity(registry, neighbor);
    }
}

/// Collect the constraint and manifold edge entities of an island's
/// members, deduplicated.
pub fn collect_island_edges(
    registry: &Registry,
    graph: &EntityGraph,
    island_entity: Entity,
) -> (Vec<Entity>, Vec<Entity>) {
    let mut constraints = Vec::new();
    let mut manifolds = Vec::new();
    let mut seen = HashSet::new();

    let Some(island) = registry.island.get(island_entity) else {
        return (constraints, manifolds);
    };
    for &member in &island.entities {
        let Some(node) = registry.graph_node.get(member) else {
            continue;
        };
        for &edge in graph.node_edges(node.node_index) {
            let edge_entity = graph.edge_entity(edge);
            if edge_entity.is_null() || !seen.insert(edge_entity) {
                continue;
            }
            if registry.constraint.contains(edge_entity) {
                constraints.push(edge_entity);
            } else if registry.manifold.contains(edge_entity) {
                manifolds.push(edge_entity);
            }
        }
    }
    (constraints, manifolds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::GraphNode;
    use crate::math::Vector3;

    fn spawn_node(registry: &mut Registry, graph: &mut EntityGraph, connecting: bool) -> Entity {
        let e = registry.create();
        registry.linvel.insert_silent(e, Vector3::ZERO);
        registry.angvel.insert_silent(e, Vector3::ZERO);
        if connecting {
            registry.procedural_tag.insert_silent(e, Tag);
            registry.dynamic_tag.insert_silent(e, Tag);
        } else {
            registry.static_tag.insert_silent(e, Tag);
        }
        let node = graph.insert_node(e, !connecting);
        registry.graph_node.insert_silent(e, GraphNode { node_index: node });
        e
    }

    fn connect(
        registry: &mut Registry,
        graph: &mut EntityGraph,
        coordinator: &mut IslandCoordinator,
        a: Entity,
        b: Entity,
    ) -> u32 {
        let edge_entity = registry.create();
        let na = registry.graph_node.get(a).unwrap().node_index;
        let nb = registry.graph_node.get(b).unwrap().node_index;
        let edge = graph.insert_edge(edge_entity, na, nb);
        coordinator.on_edge_created(registry, [a, b]);
        edge
    }

    #[test]
    fn test_new_nodes_get_their_own_island() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let mut coordinator = IslandCoordinator::new();

        let a = spawn_node(&mut registry, &mut graph, true);
        let b = spawn_node(&mut registry, &mut graph, true);
        coordinator.refresh(&mut registry, &graph, 0.0);

        assert_eq!(registry.island.len(), 2);
        assert_ne!(
            registry.island_resident.get(a).unwrap().island,
            registry.island_resident.get(b).unwrap().island
        );
    }

    #[test]
    fn test_edge_merges_islands() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let mut coordinator = IslandCoordinator::new();

        let a = spawn_node(&mut registry, &mut graph, true);
        let b = spawn_node(&mut registry, &mut graph, true);
        coordinator.refresh(&mut registry, &graph, 0.0);

        connect(&mut registry, &mut graph, &mut coordinator, a, b);
        assert_eq!(registry.island.len(), 1);
        assert_eq!(
            registry.island_resident.get(a).unwrap().island,
            registry.island_resident.get(b).unwrap().island
        );
    }

    #[test]
    fn test_static_body_does_not_merge() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let mut coordinator = IslandCoordinator::new();

        let a = spawn_node(&mut registry, &mut graph, true);
        let s = spawn_node(&mut registry, &mut graph, false);
        let b = spawn_node(&mut registry, &mut graph, true);
        coordinator.refresh(&mut registry, &graph, 0.0);

        connect(&mut registry, &mut graph, &mut coordinator, a, s);
        connect(&mut registry, &mut graph, &mut coordinator, s, b);

        // Two dynamic bodies touching the same static one stay apart.
        assert_eq!(registry.island.len(), 2);
    }

    #[test]
    fn test_edge_removal_splits_island() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let mut coordinator = IslandCoordinator::new();

        let a = spawn_node(&mut registry, &mut graph, true);
        let b = spawn_node(&mut registry, &mut graph, true);
        coordinator.refresh(&mut registry, &graph, 0.0);
        let edge = connect(&mut registry, &mut graph, &mut coordinator, a, b);
        assert_eq!(registry.island.len(), 1);

        graph.remove_edge(edge);
        coordinator.on_edge_removed(&mut registry, [a, b]);
        coordinator.refresh(&mut registry, &graph, 1.0);

        assert_eq!(registry.island.len(), 2, "disconnected halves should split");
        assert_ne!(
            registry.island_resident.get(a).unwrap().island,
            registry.island_resident.get(b).unwrap().island
        );
    }

    #[test]
    fn test_island_sleeps_after_dwell_and_wakes() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let mut coordinator = IslandCoordinator::new();

        let a = spawn_node(&mut registry, &mut graph, true);
        coordinator.refresh(&mut registry, &graph, 0.0);

        let dt = 1.0 / 60.0;
        let steps = (SLEEP_DWELL / dt) as usize + 2;
        for _ in 0..steps {
            coordinator.evaluate_sleep(&mut registry, dt);
        }
        assert!(registry.sleeping_tag.contains(a));

        wake_entity(&mut registry, a);
        assert!(!registry.sleeping_tag.contains(a));
    }

    #[test]
    fn test_moving_body_resets_dwell() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let mut coordinator = IslandCoordinator::new();

        let a = spawn_node(&mut registry, &mut graph, true);
        registry.linvel.insert_silent(a, Vector3::new(1.0, 0.0, 0.0));
        coordinator.refresh(&mut registry, &graph, 0.0);

        for _ in 0..60 {
            coordinator.evaluate_sleep(&mut registry, 1.0 / 60.0);
        }
        assert!(!registry.sleeping_tag.contains(a));
    }

    #[test]
    fn test_sleeping_disabled_prevents_sleep() {
        let mut registry = Registry::new();
        let mut graph = EntityGraph::new();
        let mut coordinator = IslandCoordinator::new();

        let a = spawn_node(&mut registry, &mut graph, true);
        registry.sleeping_disabled_tag.insert_silent(a, Tag);
        coordinator.refresh(&mut registry, &graph, 0.0);

        for _ in 0..120 {
            coordinator.evaluate_sleep(&mut registry, 1.0 / 60.0);
        }
        assert!(!registry.sleeping_tag.contains(a));
    }
}
