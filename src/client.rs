//! Client-Side Networking
//!
//! Snapshot export with per-entity modification tracking, import of
//! authoritative server state with snap-or-extrapolate reconciliation,
//! entity map round trips, clock sync and input history upkeep.
//!
//! # Export
//!
//! Writes to networked components are tracked per entity with a decaying
//! time-to-live; at the snapshot rate the exporter bundles them into a
//! `RegistrySnapshot` packet. With full ownership allowed, the client
//! walks its entity graph neighborhood and claims authority over every
//! non-foreign entity it can reach; otherwise only its own input
//! components go out.
//!
//! # Import
//!
//! Authoritative snapshots are remapped into local handles and either
//! snapped (adding the pose delta to each body's discontinuity so
//! presentation can blend) or, when the state is older than one fixed
//! step, handed to the extrapolation worker along with the reachable
//! entity set and recorded inputs. A timed-out extrapolation falls back to
//! snapping the raw snapshot.

use crate::clock_sync::ClockSync;
use crate::components::EntityOwner;
use crate::entity_map::EntityMap;
use crate::extrapolation::{ExtrapolationRequest, ExtrapolationWorker};
use crate::graph::NodeIndex;
use crate::input_history::InputHistory;
use crate::island::wake_touching;
use crate::math::{rotate_inertia_inv, Scalar};
use crate::packet::{Packet, ServerSettingsPacket};
use crate::pool::{
    apply_pools, component_index, export_pools, finalize_imported, pool_for_index, ComponentPool,
    RegistrySnapshot, ALL_COMPONENT_INDICES, BODY_STATE_INDICES,
};
use crate::registry::{Entity, Registry, Tag};
use crate::settings::{ClientNetworkSettings, NetworkSettings};
use crate::stepper::PhysicsWorld;
use std::collections::{HashMap, HashSet};

/// Seconds a tracked modification stays eligible for export.
const MODIFIED_TTL: Scalar = 0.4;

/// Component indices watched by the modification tracker.
const TRACKED_INDICES: [u16; 8] = [
    component_index::POSITION,
    component_index::ORIENTATION,
    component_index::LINVEL,
    component_index::ANGVEL,
    component_index::LINACC,
    component_index::NETWORK_INPUT,
    component_index::MATERIAL,
    component_index::COLLISION_FILTER,
];

/// Client networking state for one world.
pub struct ClientContext {
    /// Local entity standing in for this client, assigned by the server.
    pub client_entity: Entity,
    /// Server handle to local handle map.
    pub entity_map: EntityMap,
    /// Entities owned by this client.
    pub owned_entities: HashSet<Entity>,
    /// Clock offset estimation against the server.
    pub clock_sync: ClockSync,
    /// Recorded inputs for extrapolation.
    pub input_history: InputHistory,
    /// Playout delay the server applies to our input.
    pub server_playout_delay: Scalar,
    /// Whether the server granted neighborhood authority.
    pub allow_full_ownership: bool,
    /// Number of extrapolation jobs that ran out of budget.
    pub extrapolation_timeouts: u32,

    extrapolator: ExtrapolationWorker,
    pending_snapshots: Vec<RegistrySnapshot>,
    modified: HashMap<Entity, Vec<(u16, Scalar)>>,
    last_snapshot_time: Scalar,
    last_update_time: Scalar,
    outbox: Vec<Packet>,
}

impl ClientContext {
    /// Create the client context for a world, spawning the extrapolation
    /// worker.
    pub fn new(world: &PhysicsWorld) -> Self {
        Self {
            client_entity: Entity::null(),
            entity_map: EntityMap::new(),
            owned_entities: HashSet::new(),
            clock_sync: ClockSync::new(),
            input_history: InputHistory::new(),
            server_playout_delay: 0.0,
            allow_full_ownership: false,
            extrapolation_timeouts: 0,
            extrapolator: ExtrapolationWorker::spawn(world.material_table().clone()),
            pending_snapshots: Vec::new(),
            modified: HashMap::new(),
            last_snapshot_time: 0.0,
            last_update_time: 0.0,
            outbox: Vec::new(),
        }
    }

    /// Drain packets queued for the server.
    pub fn take_outbox(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.outbox)
    }

    fn client_settings(world: &PhysicsWorld) -> ClientNetworkSettings {
        match world.settings().network {
            NetworkSettings::Client(settings) => settings,
            _ => ClientNetworkSettings::default(),
        }
    }

    fn mark_modified(&mut self, entity: Entity, index: u16) {
        let entries = self.modified.entry(entity).or_default();
        if let Some(entry) = entries.iter_mut().find(|(i, _)| *i == index) {
            entry.1 = MODIFIED_TTL;
        } else {
            entries.push((index, MODIFIED_TTL));
        }
    }
}

/// Whether this client owns an entity.
pub fn client_owns_entity(registry: &Registry, ctx: &ClientContext, entity: Entity) -> bool {
    registry
        .entity_owner
        .get(entity)
        .is_some_and(|owner| owner.client_entity == ctx.client_entity)
}

/// Periodic client networking update: clock sync, modification tracking,
/// snapshot publication, input history upkeep and extrapolation result
/// application. `time` is the client's wall clock.
pub fn update_network_client(world: &mut PhysicsWorld, ctx: &mut ClientContext, time: Scalar) {
    let settings = ClientContext::client_settings(world);
    let elapsed = (time - ctx.last_update_time).max(0.0);
    ctx.last_update_time = time;

    // Clock sync bursts.
    let packets = ctx
        .clock_sync
        .maybe_start_burst(time, settings.clock_sync_interval);
    ctx.outbox.extend(packets);

    // Newly created networked entities announce themselves.
    process_created_entities(world, ctx, time);

    // Track writes to networked components, then decay old entries.
    drain_modification_events(world, ctx);
    decay_modified(ctx, elapsed);

    // Record own inputs and trim the history window.
    let owned: Vec<Entity> = ctx.owned_entities.iter().copied().collect();
    ctx.input_history
        .emplace(&world.state.registry, owned, time);
    let retention =
        (ctx.server_playout_delay + ctx.clock_sync.round_trip_time * 0.5) * 1.1 + 0.2;
    ctx.input_history.erase_until(time - retention);

    // Trim stale actions.
    let cutoff = time - settings.action_history_max_age;
    let action_entities: Vec<Entity> = world.state.registry.action_history.entities().to_vec();
    for entity in action_entities {
        if let Some(history) = world.state.registry.action_history.get_mut(entity) {
            history.erase_until(cutoff);
        }
    }

    // Publish a snapshot at the configured rate.
    if time - ctx.last_snapshot_time >= 1.0 / settings.snapshot_rate {
        ctx.last_snapshot_time = time;
        let snapshot = export_modified(world, ctx);
        if !snapshot.is_empty() {
            ctx.outbox.push(Packet::RegistrySnapshot { snapshot });
        }
    }

    // Apply finished extrapolations.
    while let Some(result) = ctx.extrapolator.try_result() {
        let original = if ctx.pending_snapshots.is_empty() {
            None
        } else {
            Some(ctx.pending_snapshots.remove(0))
        };
        if result.terminated_early {
            ctx.extrapolation_timeouts += 1;
            log::warn!("extrapolation timed out; snapping to raw snapshot");
            if let Some(snapshot) = original {
                snap_to_snapshot(world, &snapshot.entities, &snapshot.pools);
            }
        } else {
            snap_to_snapshot(world, &result.entities, &result.pools);
        }
    }
}

fn process_created_entities(world: &mut PhysicsWorld, ctx: &mut ClientContext, time: Scalar) {
    let created: Vec<Entity> = world.state.registry.networked_tag.take_events();
    if created.is_empty() {
        return;
    }
    // Locally created networked entities belong to this client.
    for &entity in &created {
        if !world.state.registry.entity_owner.contains(entity) && !ctx.client_entity.is_null() {
            world.state.registry.entity_owner.insert_silent(
                entity,
                EntityOwner {
                    client_entity: ctx.client_entity,
                },
            );
            ctx.owned_entities.insert(entity);
        }
    }

    let mut snapshot = RegistrySnapshot {
        timestamp: time,
        entities: created.clone(),
        pools: export_pools(
            &world.state.registry,
            created.iter().copied(),
            &ALL_COMPONENT_INDICES,
        ),
    };
    snapshot.sort_pools();
    ctx.outbox.push(Packet::CreateEntity { snapshot });
}

fn drain_modification_events(world: &mut PhysicsWorld, ctx: &mut ClientContext) {
    let registry = &mut world.state.registry;
    let mut events: Vec<(u16, Vec<Entity>)> = Vec::new();
    events.push((component_index::POSITION, registry.position.take_events()));
    events.push((
        component_index::ORIENTATION,
        registry.orientation.take_events(),
    ));
    events.push((component_index::LINVEL, registry.linvel.take_events()));
    events.push((component_index::ANGVEL, registry.angvel.take_events()));
    events.push((component_index::LINACC, registry.linacc.take_events()));
    events.push((
        component_index::NETWORK_INPUT,
        registry.network_input.take_events(),
    ));
    events.push((component_index::MATERIAL, registry.material.take_events()));
    events.push((
        component_index::COLLISION_FILTER,
        registry.collision_filter.take_events(),
    ));

    for (index, entities) in events {
        debug_assert!(TRACKED_INDICES.contains(&index));
        for entity in entities {
            if world.state.registry.networked_tag.contains(entity) {
                ctx.mark_modified(entity, index);
            }
        }
    }
}

fn decay_modified(ctx: &mut ClientContext, elapsed: Scalar) {
    ctx.modified.retain(|_, entries| {
        entries.retain_mut(|(_, remaining)| {
            *remaining -= elapsed;
            *remaining > 0.0
        });
        !entries.is_empty()
    });
}

/// Build the outbound snapshot.
///
/// With full ownership: every entity in the connected components reachable
/// from owned entities, except those owned by other clients, sending their
/// modified components plus the always-sent body state of dynamic bodies.
/// Without: only `network_input` components of owned entities. Pending
/// actions of owned entities are always included.
fn export_modified(world: &PhysicsWorld, ctx: &ClientContext) -> RegistrySnapshot {
    let registry = &world.state.registry;
    let graph = &world.state.graph;
    let mut snapshot = RegistrySnapshot {
        timestamp: world.sim_time(),
        entities: Vec::new(),
        pools: Vec::new(),
    };
    let mut included: HashSet<Entity> = HashSet::new();

    if ctx.allow_full_ownership {
        // Collect graph nodes to visit from owned entities.
        let mut start_nodes: Vec<NodeIndex> = Vec::new();
        for &entity in &ctx.owned_entities {
            if registry.is_sleeping(entity) {
                continue;
            }
            if let Some(node) = registry.graph_node.get(entity) {
                start_nodes.push(node.node_index);
            } else if let Some(edge) = registry.graph_edge.get(entity) {
                if let Some((node_a, _)) = graph.edge_nodes(edge.edge_index) {
                    start_nodes.push(node_a);
                }
            }
        }

        let reachable: std::cell::RefCell<Vec<Entity>> = std::cell::RefCell::new(Vec::new());
        graph.reach(
            start_nodes,
            |entity| reachable.borrow_mut().push(entity),
            |edge_entity| {
                // Constraints travel with the neighborhood; manifolds are
                // worker-local state and never exported.
                if registry.constraint.contains(edge_entity) {
                    reachable.borrow_mut().push(edge_entity);
                }
            },
            |_| true,
        );
        let reachable = reachable.into_inner();

        for entity in reachable {
            if !registry.networked_tag.contains(entity) {
                continue;
            }
            let foreign = registry
                .entity_owner
                .get(entity)
                .is_some_and(|owner| owner.client_entity != ctx.client_entity);
            if foreign {
                continue;
            }
            if !included.insert(entity) {
                continue;
            }
            snapshot.entities.push(entity);

            if let Some(entries) = ctx.modified.get(&entity) {
                for &(index, _) in entries {
                    if let Some(pool) = pool_for_index(&mut snapshot.pools, index) {
                        pool.collect(registry, entity);
                    }
                }
            }
            if registry.is_dynamic(entity) {
                for index in BODY_STATE_INDICES {
                    if let Some(pool) = pool_for_index(&mut snapshot.pools, index) {
                        pool.collect(registry, entity);
                    }
                }
            }
        }
    } else {
        for &entity in &ctx.owned_entities {
            if registry.is_sleeping(entity) || !registry.network_input.contains(entity) {
                continue;
            }
            let has_modified_input = ctx
                .modified
                .get(&entity)
                .is_some_and(|entries| entries.iter().any(|(i, _)| *i == component_index::NETWORK_INPUT));
            if !has_modified_input {
                continue;
            }
            if included.insert(entity) {
                snapshot.entities.push(entity);
            }
            if let Some(pool) = pool_for_index(&mut snapshot.pools, component_index::NETWORK_INPUT)
            {
                pool.collect(registry, entity);
            }
        }
    }

    // Actions always ride along.
    for &entity in &ctx.owned_entities {
        let has_actions = registry
            .action_history
            .get(entity)
            .is_some_and(|history| !history.is_empty());
        if has_actions {
            if included.insert(entity) {
                snapshot.entities.push(entity);
            }
            if let Some(pool) = pool_for_index(&mut snapshot.pools, component_index::ACTION_HISTORY)
            {
                pool.collect(registry, entity);
            }
        }
    }

    snapshot.pools.retain(|pool| !pool.is_empty());
    snapshot.sort_pools();
    snapshot
}

/// Apply pools as authoritative state: record the before/after pose delta
/// of every dynamic body into its discontinuity record, wake touched
/// islands, and suppress modification echo.
fn snap_to_snapshot(world: &mut PhysicsWorld, entities: &[Entity], pools: &[ComponentPool]) {
    let registry = &mut world.state.registry;

    let mut old_poses = HashMap::new();
    for &entity in entities {
        if registry.is_dynamic(entity) {
            if let (Some(&pos), Some(&orn)) =
                (registry.position.get(entity), registry.orientation.get(entity))
            {
                old_poses.insert(entity, (pos, orn));
            }
        }
    }

    apply_pools(registry, pools);

    for (&entity, &(old_pos, old_orn)) in &old_poses {
        let (Some(&new_pos), Some(&new_orn)) =
            (registry.position.get(entity), registry.orientation.get(entity))
        else {
            continue;
        };
        if let Some(&inertia_inv) = registry.inertia_inv.get(entity) {
            registry
                .inertia_world_inv
                .insert_silent(entity, rotate_inertia_inv(&inertia_inv, new_orn));
        }
        if let Some(discontinuity) = registry.discontinuity.get_mut(entity) {
            discontinuity.accumulate(old_pos, old_orn, new_pos, new_orn);
        }
    }

    for &entity in entities {
        wake_touching(&mut world.state.registry, &world.state.graph, entity);
    }
    world.state.registry.clear_modification_events();
}

/// Process one packet from the server.
pub fn client_receive_packet(
    world: &mut PhysicsWorld,
    ctx: &mut ClientContext,
    time: Scalar,
    packet: Packet,
) {
    match packet {
        Packet::ClientCreated { client_entity } => {
            let local = world.state.registry.create();
            debug_assert!(ctx.client_entity.is_null());
            ctx.client_entity = local;
            ctx.entity_map.insert(client_entity, local);
            ctx.outbox.push(Packet::UpdateEntityMap {
                pairs: vec![(local, client_entity)],
                timestamp: time,
            });
        }

        Packet::UpdateEntityMap { pairs, .. } => {
            // Pairs arrive as (sender_local, receiver_local).
            for (remote, local) in pairs {
                if world.state.registry.is_valid(local) {
                    ctx.entity_map.insert(remote, local);
                }
            }
        }

        Packet::CreateEntity { snapshot } => {
            process_create_entity(world, ctx, time, snapshot);
        }

        Packet::DestroyEntity { entities, .. } | Packet::EntityExited { entities } => {
            destroy_remote_entities(world, ctx, &entities);
        }

        Packet::EntityEntered {
            entities, owners, ..
        } => {
            let mut pairs = Vec::new();
            for (i, remote) in entities.iter().copied().enumerate() {
                if ctx.entity_map.contains_remote(remote) {
                    continue;
                }
                let local = world.state.registry.create();
                ctx.entity_map.insert(remote, local);
                pairs.push((local, remote));
                world.state.registry.networked_tag.insert_silent(local, Tag);

                if let Some(&remote_owner) = owners.get(i) {
                    if !remote_owner.is_null() {
                        let local_owner = match ctx.entity_map.at_remote(remote_owner) {
                            Some(local_owner) => local_owner,
                            None => {
                                let local_owner = world.state.registry.create();
                                ctx.entity_map.insert(remote_owner, local_owner);
                                pairs.push((local_owner, remote_owner));
                                local_owner
                            }
                        };
                        world.state.registry.entity_owner.insert_silent(
                            local,
                            EntityOwner {
                                client_entity: local_owner,
                            },
                        );
                    }
                }
            }
            if !pairs.is_empty() {
                ctx.outbox.push(Packet::UpdateEntityMap {
                    pairs,
                    timestamp: time,
                });
            }
        }

        Packet::RegistrySnapshot { snapshot } => {
            process_registry_snapshot(world, ctx, time, snapshot);
        }

        Packet::EntityResponse { mut snapshot } | Packet::AssetSyncResponse { mut snapshot, .. } => {
            snapshot.map_entities(&ctx.entity_map);
            snap_to_snapshot(world, &snapshot.entities, &snapshot.pools);
        }

        Packet::SetPlayoutDelay { value } => {
            ctx.server_playout_delay = value;
        }

        Packet::TimeRequest { id } => {
            ctx.outbox.push(Packet::TimeResponse {
                id,
                timestamp: time,
            });
        }

        Packet::TimeResponse { id, timestamp } => {
            ctx.clock_sync.process_time_response(id, timestamp, time);
        }

        Packet::ServerSettings(server) => {
            apply_server_settings(world, ctx, &server);
        }

        // Server-bound packets; nothing to do on the client.
        Packet::SetAabbOfInterest { .. } | Packet::QueryEntity { .. } | Packet::AssetSync { .. } => {}
    }
}

fn apply_server_settings(
    world: &mut PhysicsWorld,
    ctx: &mut ClientContext,
    server: &ServerSettingsPacket,
) {
    let settings = world.settings_mut();
    settings.fixed_dt = server.fixed_dt;
    settings.gravity = server.gravity;
    settings.num_solver_velocity_iterations = server.num_solver_velocity_iterations;
    settings.num_solver_position_iterations = server.num_solver_position_iterations;
    settings.num_restitution_iterations = server.num_restitution_iterations;
    settings.num_individual_restitution_iterations = server.num_individual_restitution_iterations;
    ctx.allow_full_ownership = server.allow_full_ownership;
}

fn process_create_entity(
    world: &mut PhysicsWorld,
    ctx: &mut ClientContext,
    time: Scalar,
    mut snapshot: RegistrySnapshot,
) {
    // Create locals first so nested handles can resolve during remap.
    let mut pairs = Vec::new();
    for &remote in &snapshot.entities {
        if ctx.entity_map.contains_remote(remote) {
            continue;
        }
        let local = world.state.registry.create();
        ctx.entity_map.insert(remote, local);
        pairs.push((local, remote));
    }
    if !pairs.is_empty() {
        ctx.outbox.push(Packet::UpdateEntityMap {
            pairs,
            timestamp: time,
        });
    }

    snapshot.map_entities(&ctx.entity_map);
    apply_pools(&mut world.state.registry, &snapshot.pools);
    finalize_imported(
        &mut world.state.registry,
        &mut world.state.graph,
        &snapshot.entities,
        true,
    );
    for &entity in &snapshot.entities {
        world.state.registry.networked_tag.insert_silent(entity, Tag);
        if client_owns_entity(&world.state.registry, ctx, entity) {
            ctx.owned_entities.insert(entity);
        }
    }
    world.state.registry.clear_modification_events();
}

fn destroy_remote_entities(world: &mut PhysicsWorld, ctx: &mut ClientContext, entities: &[Entity]) {
    for &remote in entities {
        let Some(local) = ctx.entity_map.at_remote(remote) else {
            continue;
        };
        ctx.entity_map.erase_remote(remote);
        ctx.owned_entities.remove(&local);
        if world.state.registry.is_valid(local) {
            if let Some(node) = world.state.registry.graph_node.get(local).copied() {
                world.state.graph.remove_node(node.node_index);
            }
            world.state.registry.destroy(local);
        }
    }
}

fn process_registry_snapshot(
    world: &mut PhysicsWorld,
    ctx: &mut ClientContext,
    time: Scalar,
    mut snapshot: RegistrySnapshot,
) {
    let settings = ClientContext::client_settings(world);

    // Unknown entities mean the entity-map round trip has not completed;
    // ask for them and drop the snapshot.
    let unknown: Vec<Entity> = snapshot
        .entities
        .iter()
        .copied()
        .filter(|&remote| {
            ctx.entity_map
                .at_remote(remote)
                .map_or(true, |local| !world.state.registry.is_valid(local))
        })
        .collect();
    if !unknown.is_empty() {
        log::debug!("snapshot names {} unknown entities, querying", unknown.len());
        ctx.outbox.push(Packet::QueryEntity { entities: unknown });
        return;
    }

    snapshot.map_entities(&ctx.entity_map);

    // Estimate when this state was current on our clock.
    let snapshot_time = if ctx.clock_sync.count > 0 {
        snapshot.timestamp + ctx.clock_sync.time_delta - ctx.server_playout_delay
    } else {
        time - (ctx.server_playout_delay + settings.round_trip_time * 0.5)
    };

    // Inputs of entities other clients own feed the replay history.
    for pool in &snapshot.pools {
        if let ComponentPool::NetworkInput(pairs) = pool {
            let foreign: Vec<_> = pairs
                .iter()
                .filter(|(entity, _)| !ctx.owned_entities.contains(entity))
                .cloned()
                .collect();
            ctx.input_history.emplace_values(foreign, snapshot_time);
        }
    }

    let needs_extrapolation = time - snapshot_time > world.settings().fixed_dt;
    if !needs_extrapolation || !settings.extrapolation_enabled {
        snap_to_snapshot(world, &snapshot.entities, &snapshot.pools);
        return;
    }

    // Collect everything reachable from the snapshot's connecting nodes.
    let collected = {
        let registry = &world.state.registry;
        let graph = &world.state.graph;
        let mut node_indices = Vec::new();
        for &entity in &snapshot.entities {
            if let Some(node) = registry.graph_node.get(entity) {
                if graph.is_connecting_node(node.node_index) {
                    node_indices.push(node.node_index);
                }
            }
        }
        if node_indices.is_empty() {
            None
        } else {
            let entities: std::cell::RefCell<Vec<Entity>> = std::cell::RefCell::new(Vec::new());
            let entity_set: std::cell::RefCell<HashSet<Entity>> =
                std::cell::RefCell::new(HashSet::new());
            graph.reach(
                node_indices,
                |entity| {
                    if entity_set.borrow_mut().insert(entity) {
                        entities.borrow_mut().push(entity);
                    }
                },
                |edge_entity| {
                    // Manifolds make no sense against the server
                    // transforms; constraints do.
                    if registry.constraint.contains(edge_entity)
                        && entity_set.borrow_mut().insert(edge_entity)
                    {
                        entities.borrow_mut().push(edge_entity);
                    }
                },
                |_| true,
            );
            let mut entities = entities.into_inner();
            let mut entity_set = entity_set.into_inner();
            for &entity in registry.static_tag.entities() {
                if entity_set.insert(entity) {
                    entities.push(entity);
                }
            }

            let owned_entities: Vec<Entity> = entities
                .iter()
                .copied()
                .filter(|&e| client_owns_entity(registry, ctx, e))
                .collect();
            let pools = export_pools(registry, entities.iter().copied(), &ALL_COMPONENT_INDICES);
            Some((entities, owned_entities, pools))
        }
    };

    let Some((entities, owned_entities, pools)) = collected else {
        // No procedural entities involved; just snap.
        snap_to_snapshot(world, &snapshot.entities, &snapshot.pools);
        return;
    };

    ctx.pending_snapshots.push(snapshot.clone());
    ctx.extrapolator.request(ExtrapolationRequest {
        start_time: snapshot_time,
        target_time: time,
        snapshot,
        entities,
        pools,
        owned_entities,
        input_history: ctx.input_history.clone(),
        settings: *world.settings(),
        budget_ms: settings.extrapolation_budget_ms,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Quaternion, Vector3};
    use crate::rigidbody::RigidBodyDef;
    use crate::settings::Settings;
    use crate::shapes::Shape;

    fn client_world() -> (PhysicsWorld, ClientContext) {
        let settings = Settings {
            network: NetworkSettings::Client(ClientNetworkSettings {
                extrapolation_enabled: false,
                ..Default::default()
            }),
            ..Default::default()
        };
        let world = PhysicsWorld::new(settings);
        let ctx = ClientContext::new(&world);
        (world, ctx)
    }

    fn body_snapshot(entities: Vec<Entity>, position: Vector3, timestamp: Scalar) -> RegistrySnapshot {
        let pools = vec![
            ComponentPool::Position(entities.iter().map(|&e| (e, position)).collect()),
            ComponentPool::Orientation(
                entities.iter().map(|&e| (e, Quaternion::IDENTITY)).collect(),
            ),
            ComponentPool::LinVel(entities.iter().map(|&e| (e, Vector3::ZERO)).collect()),
            ComponentPool::AngVel(entities.iter().map(|&e| (e, Vector3::ZERO)).collect()),
        ];
        RegistrySnapshot {
            timestamp,
            entities,
            pools,
        }
    }

    #[test]
    fn test_client_created_assigns_entity_and_replies() {
        let (mut world, mut ctx) = client_world();
        let mut server_registry = Registry::new();
        let server_client = server_registry.create();

        client_receive_packet(
            &mut world,
            &mut ctx,
            0.0,
            Packet::ClientCreated {
                client_entity: server_client,
            },
        );
        assert!(!ctx.client_entity.is_null());
        let outbox = ctx.take_outbox();
        assert!(matches!(outbox[0], Packet::UpdateEntityMap { .. }));
    }

    #[test]
    fn test_snapshot_with_unknown_entity_queries_and_drops() {
        let (mut world, mut ctx) = client_world();
        let mut server_registry = Registry::new();
        let stranger = server_registry.create();

        let snapshot = body_snapshot(vec![stranger], Vector3::ZERO, 0.0);
        client_receive_packet(
            &mut world,
            &mut ctx,
            0.0,
            Packet::RegistrySnapshot { snapshot },
        );
        let outbox = ctx.take_outbox();
        assert!(outbox
            .iter()
            .any(|p| matches!(p, Packet::QueryEntity { .. })));
    }

    #[test]
    fn test_snap_applies_exactly_and_records_discontinuity() {
        let (mut world, mut ctx) = client_world();
        let body = world
            .make_rigidbody(&RigidBodyDef {
                position: Vector3::new(5.0, 0.0, 0.0),
                shape: Some(Shape::Sphere { radius: 0.5 }),
                presentation: true,
                networked: true,
                ..Default::default()
            })
            .unwrap();

        // Server knows this body under its own handle.
        let mut server_registry = Registry::new();
        let remote = server_registry.create();
        ctx.entity_map.insert(remote, body);

        let target = Vector3::new(2.0, 0.0, 0.0);
        let snapshot = body_snapshot(vec![remote], target, 0.0);
        client_receive_packet(
            &mut world,
            &mut ctx,
            0.0,
            Packet::RegistrySnapshot { snapshot },
        );

        let pos = *world.registry().position.get(body).unwrap();
        assert_eq!(pos, target, "extrapolation disabled: snap exactly");
        let discontinuity = world.registry().discontinuity.get(body).unwrap();
        // Offset equals old minus new.
        assert!((discontinuity.position_offset.x - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_idempotent() {
        let (mut world, mut ctx) = client_world();
        let body = world
            .make_rigidbody(&RigidBodyDef {
                position: Vector3::new(5.0, 0.0, 0.0),
                shape: Some(Shape::Sphere { radius: 0.5 }),
                networked: true,
                ..Default::default()
            })
            .unwrap();
        let mut server_registry = Registry::new();
        let remote = server_registry.create();
        ctx.entity_map.insert(remote, body);

        let snapshot = body_snapshot(vec![remote], Vector3::new(1.0, 2.0, 3.0), 0.0);
        client_receive_packet(
            &mut world,
            &mut ctx,
            0.0,
            Packet::RegistrySnapshot {
                snapshot: snapshot.clone(),
            },
        );
        let first = *world.registry().position.get(body).unwrap();
        client_receive_packet(
            &mut world,
            &mut ctx,
            0.0,
            Packet::RegistrySnapshot { snapshot },
        );
        let second = *world.registry().position.get(body).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_create_entity_builds_body_with_derived_state() {
        let (mut world, mut ctx) = client_world();

        // Server-side body exported in full.
        let mut server_registry = Registry::new();
        let mut server_graph = crate::graph::EntityGraph::new();
        let remote = crate::rigidbody::make_rigidbody(
            &mut server_registry,
            &mut server_graph,
            &RigidBodyDef {
                position: Vector3::new(0.0, 3.0, 0.0),
                shape: Some(Shape::Sphere { radius: 0.5 }),
                networked: true,
                ..Default::default()
            },
        )
        .unwrap();

        let snapshot = RegistrySnapshot {
            timestamp: 0.0,
            entities: vec![remote],
            pools: export_pools(&server_registry, [remote], &ALL_COMPONENT_INDICES),
        };
        client_receive_packet(&mut world, &mut ctx, 0.0, Packet::CreateEntity { snapshot });

        let local = ctx.entity_map.at_remote(remote).unwrap();
        assert!(world.registry().mass_inv.contains(local));
        assert!(world.registry().graph_node.contains(local));
        assert!(world.registry().discontinuity.contains(local));
        assert!(world.registry().networked_tag.contains(local));
    }

    #[test]
    fn test_modified_tracking_decays() {
        let (mut world, mut ctx) = client_world();
        let body = world
            .make_rigidbody(&RigidBodyDef {
                networked: true,
                ..Default::default()
            })
            .unwrap();
        ctx.client_entity = world.registry_mut().create();

        update_network_client(&mut world, &mut ctx, 0.0);
        world
            .registry_mut()
            .linacc
            .patch(body, |acc| acc.y = -1.0);
        update_network_client(&mut world, &mut ctx, 0.01);
        assert!(ctx.modified.contains_key(&body));

        // Past the TTL the entry is gone.
        update_network_client(&mut world, &mut ctx, 1.0);
        assert!(!ctx.modified.contains_key(&body));
    }

    #[test]
    fn test_server_settings_applied() {
        let (mut world, mut ctx) = client_world();
        client_receive_packet(
            &mut world,
            &mut ctx,
            0.0,
            Packet::ServerSettings(ServerSettingsPacket {
                fixed_dt: 1.0 / 30.0,
                gravity: Vector3::new(0.0, -5.0, 0.0),
                num_solver_velocity_iterations: 4,
                num_solver_position_iterations: 2,
                num_restitution_iterations: 1,
                num_individual_restitution_iterations: 1,
                allow_full_ownership: true,
            }),
        );
        assert!((world.settings().fixed_dt - 1.0 / 30.0).abs() < 1e-12);
        assert!(ctx.allow_full_ownership);
        assert_eq!(world.settings().num_solver_velocity_iterations, 4);
    }
}
