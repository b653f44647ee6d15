//! Server-Side Networking
//!
//! Tracks connected clients, imports their snapshots under ownership
//! rules, answers entity queries and broadcasts authoritative state.
//!
//! The server is authoritative for every dynamic body a client does not
//! fully own: a pool update for a dynamic entity is rejected unless the
//! entity's whole island is owned by the sending client, so a client can
//! never push state into bodies interacting with someone else's.

use crate::components::EntityOwner;
use crate::entity_map::EntityMap;
use crate::math::Scalar;
use crate::packet::{Packet, ServerSettingsPacket};
use crate::pool::{
    component_index, export_pools, finalize_imported, pool_for_index, RegistrySnapshot,
    ALL_COMPONENT_INDICES, BODY_STATE_INDICES,
};
use crate::registry::{Entity, Registry, Tag};
use crate::settings::{NetworkSettings, ServerNetworkSettings};
use crate::stepper::PhysicsWorld;
use std::collections::{HashMap, HashSet};

/// Server-side identifier of a connected client.
pub type ClientId = u64;

/// Per-client state on the server.
pub struct RemoteClient {
    /// Server-side entity standing in for this client.
    pub client_entity: Entity,
    /// Client handle to server handle map.
    pub entity_map: EntityMap,
    /// Entities owned by this client.
    pub owned_entities: HashSet<Entity>,
    outbox: Vec<Packet>,
}

/// Server networking state for one world.
#[derive(Default)]
pub struct ServerContext {
    clients: HashMap<ClientId, RemoteClient>,
    next_client_id: ClientId,
    last_snapshot_time: Scalar,
}

impl ServerContext {
    /// Create an empty server context.
    pub fn new() -> Self {
        Self::default()
    }

    fn server_settings(world: &PhysicsWorld) -> ServerNetworkSettings {
        match world.settings().network {
            NetworkSettings::Server(settings) => settings,
            _ => ServerNetworkSettings::default(),
        }
    }

    /// Connected client ids.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    /// A connected client's state.
    pub fn client(&self, id: ClientId) -> Option<&RemoteClient> {
        self.clients.get(&id)
    }

    /// Drain packets queued for one client.
    pub fn take_outbox(&mut self, id: ClientId) -> Vec<Packet> {
        self.clients
            .get_mut(&id)
            .map(|client| std::mem::take(&mut client.outbox))
            .unwrap_or_default()
    }
}

/// Register a new client: creates its client entity and queues the
/// handshake packets (`ClientCreated`, `ServerSettings`,
/// `SetPlayoutDelay`).
pub fn connect_client(world: &mut PhysicsWorld, ctx: &mut ServerContext) -> ClientId {
    let settings = ServerContext::server_settings(world);
    let client_entity = world.state.registry.create();

    let id = ctx.next_client_id;
    ctx.next_client_id += 1;

    let world_settings = world.settings();
    let outbox = vec![
        Packet::ClientCreated { client_entity },
        Packet::ServerSettings(ServerSettingsPacket {
            fixed_dt: world_settings.fixed_dt,
            gravity: world_settings.gravity,
            num_solver_velocity_iterations: world_settings.num_solver_velocity_iterations,
            num_solver_position_iterations: world_settings.num_solver_position_iterations,
            num_restitution_iterations: world_settings.num_restitution_iterations,
            num_individual_restitution_iterations: world_settings
                .num_individual_restitution_iterations,
            allow_full_ownership: settings.allow_full_ownership,
        }),
        Packet::SetPlayoutDelay {
            value: settings.playout_delay,
        },
    ];

    ctx.clients.insert(
        id,
        RemoteClient {
            client_entity,
            entity_map: EntityMap::new(),
            owned_entities: HashSet::new(),
            outbox,
        },
    );
    log::debug!("client {id} connected");
    id
}

/// Remove a client, destroying the entities it owned.
pub fn disconnect_client(world: &mut PhysicsWorld, ctx: &mut ServerContext, id: ClientId) {
    let Some(client) = ctx.clients.remove(&id) else {
        return;
    };
    for entity in client.owned_entities {
        if world.state.registry.is_valid(entity) {
            if let Some(node) = world.state.registry.graph_node.get(entity).copied() {
                world.state.graph.remove_node(node.node_index);
            }
            world.state.registry.destroy(entity);
        }
    }
    world.state.registry.destroy(client.client_entity);
    log::debug!("client {id} disconnected");
}

/// Whether `entity`'s entire island is owned by `client_entity`. Entities
/// outside any island (static, kinematic) are never fully owned.
pub fn is_fully_owned_by_client(
    registry: &Registry,
    client_entity: Entity,
    entity: Entity,
) -> bool {
    let Some(resident) = registry.island_resident.get(entity) else {
        return false;
    };
    let Some(island) = registry.island.get(resident.island) else {
        return false;
    };
    island.entities.iter().all(|&member| {
        registry
            .entity_owner
            .get(member)
            .is_some_and(|owner| owner.client_entity == client_entity)
    })
}

/// Process one packet from a client.
pub fn server_receive_packet(
    world: &mut PhysicsWorld,
    ctx: &mut ServerContext,
    id: ClientId,
    time: Scalar,
    packet: Packet,
) {
    let Some(client) = ctx.clients.get_mut(&id) else {
        return;
    };
    match packet {
        Packet::UpdateEntityMap { pairs, .. } => {
            for (remote, local) in pairs {
                if world.state.registry.is_valid(local) {
                    client.entity_map.insert(remote, local);
                }
            }
        }

        Packet::CreateEntity { mut snapshot } => {
            let mut pairs = Vec::new();
            for &remote in &snapshot.entities {
                if client.entity_map.contains_remote(remote) {
                    continue;
                }
                let local = world.state.registry.create();
                client.entity_map.insert(remote, local);
                pairs.push((local, remote));
            }
            if !pairs.is_empty() {
                client.outbox.push(Packet::UpdateEntityMap {
                    pairs,
                    timestamp: time,
                });
            }

            snapshot.map_entities(&client.entity_map);
            crate::pool::apply_pools(&mut world.state.registry, &snapshot.pools);
            finalize_imported(
                &mut world.state.registry,
                &mut world.state.graph,
                &snapshot.entities,
                false,
            );
            for &entity in &snapshot.entities {
                world.state.registry.networked_tag.insert_silent(entity, Tag);
                world.state.registry.entity_owner.insert_silent(
                    entity,
                    EntityOwner {
                        client_entity: client.client_entity,
                    },
                );
                client.owned_entities.insert(entity);
            }
            world.state.registry.clear_modification_events();
        }

        Packet::DestroyEntity { entities, .. } => {
            for remote in entities {
                let Some(local) = client.entity_map.at_remote(remote) else {
                    continue;
                };
                // Clients may only destroy what they own.
                if !client.owned_entities.remove(&local) {
                    continue;
                }
                client.entity_map.erase_remote(remote);
                if world.state.registry.is_valid(local) {
                    if let Some(node) = world.state.registry.graph_node.get(local).copied() {
                        world.state.graph.remove_node(node.node_index);
                    }
                    world.state.registry.destroy(local);
                }
            }
        }

        Packet::RegistrySnapshot { mut snapshot } => {
            let dropped = snapshot.map_entities(&client.entity_map);
            if dropped > 0 {
                log::debug!("client {id}: dropped {dropped} stale snapshot entries");
            }
            let client_entity = client.client_entity;
            for pool in &snapshot.pools {
                pool.apply(&mut world.state.registry, &|registry, entity| {
                    // Server stays authoritative over dynamic entities the
                    // client does not fully own.
                    if registry.dynamic_tag.contains(entity) {
                        is_fully_owned_by_client(registry, client_entity, entity)
                    } else {
                        registry
                            .entity_owner
                            .get(entity)
                            .is_some_and(|owner| owner.client_entity == client_entity)
                    }
                });
            }
            for &entity in &snapshot.entities {
                crate::island::wake_touching(
                    &mut world.state.registry,
                    &world.state.graph,
                    entity,
                );
            }
            world.state.registry.clear_modification_events();
        }

        Packet::QueryEntity { entities } => {
            let valid: Vec<Entity> = entities
                .into_iter()
                .filter(|&e| world.state.registry.is_valid(e))
                .collect();
            if !valid.is_empty() {
                let snapshot = RegistrySnapshot {
                    timestamp: world.sim_time(),
                    entities: valid.clone(),
                    pools: export_pools(
                        &world.state.registry,
                        valid.iter().copied(),
                        &ALL_COMPONENT_INDICES,
                    ),
                };
                client.outbox.push(Packet::EntityResponse { snapshot });
            }
        }

        Packet::AssetSync { entity } => {
            if world.state.registry.is_valid(entity) {
                let snapshot = RegistrySnapshot {
                    timestamp: world.sim_time(),
                    entities: vec![entity],
                    pools: export_pools(&world.state.registry, [entity], &ALL_COMPONENT_INDICES),
                };
                client
                    .outbox
                    .push(Packet::AssetSyncResponse { entity, snapshot });
            }
        }

        Packet::TimeRequest { id: request_id } => {
            client.outbox.push(Packet::TimeResponse {
                id: request_id,
                timestamp: time,
            });
        }

        Packet::SetAabbOfInterest { .. } => {
            // Interest management is left to the embedding application.
        }

        // Client-bound packets have no meaning here.
        Packet::ClientCreated { .. }
        | Packet::EntityEntered { .. }
        | Packet::EntityExited { .. }
        | Packet::EntityResponse { .. }
        | Packet::AssetSyncResponse { .. }
        | Packet::TimeResponse { .. }
        | Packet::ServerSettings(_)
        | Packet::SetPlayoutDelay { .. } => {}
    }
}

/// Periodic server update: broadcast the authoritative body state of awake
/// networked entities to every client at the snapshot rate. Input
/// components of entities a client owns are never echoed back to it.
pub fn update_network_server(world: &mut PhysicsWorld, ctx: &mut ServerContext, time: Scalar) {
    let settings = ServerContext::server_settings(world);
    if time - ctx.last_snapshot_time < 1.0 / settings.snapshot_rate {
        return;
    }
    ctx.last_snapshot_time = time;

    let registry = &world.state.registry;
    let networked: Vec<Entity> = registry
        .networked_tag
        .entities()
        .iter()
        .copied()
        .filter(|&e| registry.dynamic_tag.contains(e) && !registry.is_sleeping(e))
        .collect();
    if networked.is_empty() {
        return;
    }

    for client in ctx.clients.values_mut() {
        let mut snapshot = RegistrySnapshot {
            timestamp: world.state.sim_time,
            entities: networked.clone(),
            pools: export_pools(registry, networked.iter().copied(), &BODY_STATE_INDICES),
        };
        // Inputs of entities this client does not own ride along so it can
        // extrapolate them.
        if let Some(pool) = pool_for_index(&mut snapshot.pools, component_index::NETWORK_INPUT) {
            for &entity in registry.network_input.entities() {
                let owned = registry
                    .entity_owner
                    .get(entity)
                    .is_some_and(|owner| owner.client_entity == client.client_entity);
                if !owned {
                    pool.collect(registry, entity);
                    if !snapshot.entities.contains(&entity) {
                        snapshot.entities.push(entity);
                    }
                }
            }
        }
        snapshot.pools.retain(|p| !p.is_empty());
        client.outbox.push(Packet::RegistrySnapshot { snapshot });
    }
}
