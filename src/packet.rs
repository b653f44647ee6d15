//! Network Packets
//!
//! The wire-neutral packet set exchanged between client and server. All
//! payloads derive serde so the embedding application can pick its own
//! encoding and transport; entity handles inside a packet are always in
//! the *sender's* handle space and are remapped on receipt through the
//! entity map built up by `UpdateEntityMap` round trips.

use crate::math::{Scalar, Vector3};
use crate::pool::RegistrySnapshot;
use crate::registry::Entity;
use serde::{Deserialize, Serialize};

/// Server settings replicated to clients so both sides integrate with the
/// same parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerSettingsPacket {
    /// Fixed timestep.
    pub fixed_dt: Scalar,
    /// Gravity vector.
    pub gravity: Vector3,
    /// Velocity solver iterations.
    pub num_solver_velocity_iterations: u32,
    /// Position solver iterations.
    pub num_solver_position_iterations: u32,
    /// Restitution pre-pass iterations.
    pub num_restitution_iterations: u32,
    /// Inner restitution relaxations.
    pub num_individual_restitution_iterations: u32,
    /// Whether clients own their whole physical neighborhood.
    pub allow_full_ownership: bool,
}

/// All packets exchanged between client and server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Packet {
    /// Server informs a new client of its client entity.
    ClientCreated {
        /// The client's entity in the server's registry.
        client_entity: Entity,
    },
    /// Handle pairs `(sender_local, receiver_local)` completing the entity
    /// map round trip.
    UpdateEntityMap {
        /// Pairs of `(sender handle, receiver handle)`.
        pairs: Vec<(Entity, Entity)>,
        /// Send time.
        timestamp: Scalar,
    },
    /// Entities created by the sender, with their full component state.
    CreateEntity {
        /// Entities and pools in the sender's handle space.
        snapshot: RegistrySnapshot,
    },
    /// Entities destroyed by the sender.
    DestroyEntity {
        /// Destroyed entities, sender handle space.
        entities: Vec<Entity>,
        /// Send time.
        timestamp: Scalar,
    },
    /// Entities entering the receiver's interest area.
    EntityEntered {
        /// Entering entities.
        entities: Vec<Entity>,
        /// App-defined asset ids, parallel to `entities`.
        assets: Vec<u64>,
        /// Owning client entities, parallel to `entities`; null when
        /// unowned.
        owners: Vec<Entity>,
    },
    /// Entities leaving the receiver's interest area.
    EntityExited {
        /// Leaving entities.
        entities: Vec<Entity>,
    },
    /// Transient state snapshot.
    RegistrySnapshot {
        /// Entities and pools in the sender's handle space.
        snapshot: RegistrySnapshot,
    },
    /// Authoritative state for explicitly queried entities.
    EntityResponse {
        /// Entities and pools in the sender's handle space.
        snapshot: RegistrySnapshot,
    },
    /// Ask the peer for the full state of entities.
    QueryEntity {
        /// Queried entities, receiver handle space.
        entities: Vec<Entity>,
    },
    /// Request asset-linked state for an entity.
    AssetSync {
        /// The asset root entity.
        entity: Entity,
    },
    /// Response to `AssetSync`.
    AssetSyncResponse {
        /// The asset root entity.
        entity: Entity,
        /// State of the asset's entities.
        snapshot: RegistrySnapshot,
    },
    /// Clock sync probe.
    TimeRequest {
        /// Request id echoed in the response.
        id: u32,
    },
    /// Clock sync answer.
    TimeResponse {
        /// Echoed request id.
        id: u32,
        /// Responder's clock at receipt.
        timestamp: Scalar,
    },
    /// Server simulation parameters.
    ServerSettings(ServerSettingsPacket),
    /// Server playout delay for this client.
    SetPlayoutDelay {
        /// Delay in seconds.
        value: Scalar,
    },
    /// Client's area of interest.
    SetAabbOfInterest {
        /// Minimum corner.
        min: Vector3,
        /// Maximum corner.
        max: Vector3,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_response_fields() {
        let packet = Packet::TimeResponse {
            id: 7,
            timestamp: 1.25,
        };
        match packet.clone() {
            Packet::TimeResponse { id, timestamp } => {
                assert_eq!(id, 7);
                assert!((timestamp - 1.25).abs() < 1e-12);
            }
            _ => panic!("wrong variant"),
        }
    }
}
